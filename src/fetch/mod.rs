//! HTTP plumbing shared by outbound lookups.

mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::Result;
use reqwest::StatusCode;

/// Issues a GET and returns the status with the body parsed as JSON.
/// A body that is not JSON yields `None` rather than an error.
pub async fn get_json<C: HttpClient + ?Sized>(
    client: &C,
    url: reqwest::Url,
) -> Result<(StatusCode, Option<serde_json::Value>)> {
    let req = reqwest::Request::new(reqwest::Method::GET, url);

    let resp = client.execute(req).await?;
    let status = resp.status();
    let bytes = resp.bytes().await?;
    Ok((status, serde_json::from_slice(&bytes).ok()))
}
