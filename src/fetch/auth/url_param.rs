use crate::fetch::client::HttpClient;
use async_trait::async_trait;

/// An [`HttpClient`] wrapper that appends an API key as a URL query parameter.
///
/// `param_name` is the query parameter name (`"key"` for the directions API)
/// and `key` is its value.
pub struct UrlParam<C> {
    pub inner: C,
    pub param_name: String,
    pub key: String,
}

impl<C> UrlParam<C> {
    pub fn new(inner: C, param_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            inner,
            param_name: param_name.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for UrlParam<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.url_mut()
            .query_pairs_mut()
            .append_pair(&self.param_name, &self.key);
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl HttpClient for Recorder {
        async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            self.0.lock().unwrap().push(req.url().to_string());
            Ok(http::Response::builder().status(200).body("{}").unwrap().into())
        }
    }

    #[tokio::test]
    async fn test_appends_key() {
        let client = UrlParam::new(Recorder(Mutex::new(Vec::new())), "key", "secret");
        let req = reqwest::Request::new(
            reqwest::Method::GET,
            "https://example.com/api?origin=A".parse().unwrap(),
        );
        client.execute(req).await.unwrap();

        let urls = client.inner.0.lock().unwrap();
        assert_eq!(urls[0], "https://example.com/api?origin=A&key=secret");
    }
}
