use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::{LookupFailure, TravelTime, TravelTimeLookup};
use crate::fetch::auth::UrlParam;
use crate::fetch::{BasicClient, HttpClient, get_json};

pub const DIRECTIONS_URL: &str = "https://maps.googleapis.com/maps/api/directions/json";

/// API statuses that mean "slow down" rather than "no answer".
const QUOTA_STATUSES: &[&str] = &["OVER_QUERY_LIMIT", "RESOURCE_EXHAUSTED"];

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

/// Interprets one directions response.
pub fn parse_directions(status: StatusCode, body: Option<&Value>) -> Result<TravelTime, LookupFailure> {
    if status != StatusCode::OK {
        return Err(LookupFailure::Unavailable(format!("http status {status}")));
    }
    let body = body.ok_or_else(|| LookupFailure::Unavailable("response body is not JSON".into()))?;

    let api_status = body["status"].as_str().unwrap_or("");
    if QUOTA_STATUSES.contains(&api_status) {
        return Err(LookupFailure::QuotaExceeded(api_status.to_string()));
    }
    if api_status != "OK" {
        return Err(LookupFailure::Unavailable(format!("api status '{api_status}'")));
    }

    let leg = &body["routes"][0]["legs"][0];
    if leg.is_null() {
        return Err(LookupFailure::Unavailable("response has no route legs".into()));
    }

    let distance_m = leg["distance"]["value"].as_u64().unwrap_or(0);
    let duration_s = leg["duration"]["value"].as_u64().unwrap_or(0);
    let duration_in_traffic_s = leg["duration_in_traffic"]["value"]
        .as_u64()
        .unwrap_or(duration_s);

    Ok(TravelTime {
        distance_m,
        duration_s,
        duration_in_traffic_s,
    })
}

/// Directions API client with retry. Credentials are the inner client's job
/// (see [`DirectionsClient::google`]).
pub struct DirectionsClient<C> {
    client: C,
    base_url: Url,
    policy: RetryPolicy,
}

impl DirectionsClient<UrlParam<BasicClient>> {
    /// Client for the public directions endpoint, 10 s request timeout, the
    /// key sent as the `key` query parameter.
    pub fn google(api_key: &str) -> anyhow::Result<Self> {
        let basic = BasicClient::with_timeout(Duration::from_secs(10))?;
        Ok(Self::new(
            UrlParam::new(basic, "key", api_key),
            Url::parse(DIRECTIONS_URL)?,
        ))
    }
}

impl<C: HttpClient> DirectionsClient<C> {
    pub fn new(client: C, base_url: Url) -> Self {
        Self {
            client,
            base_url,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn request_url(&self, origin: &str, destination: &str) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("origin", origin)
            .append_pair("destination", destination)
            .append_pair("departure_time", "now");
        url
    }

    async fn attempt(&self, origin: &str, destination: &str) -> Result<TravelTime, LookupFailure> {
        let (status, body) = get_json(&self.client, self.request_url(origin, destination))
            .await
            .map_err(|e| LookupFailure::Unavailable(e.to_string()))?;
        parse_directions(status, body.as_ref())
    }
}

#[async_trait]
impl<C: HttpClient> TravelTimeLookup for DirectionsClient<C> {
    #[tracing::instrument(skip(self))]
    async fn lookup(&self, origin: &str, destination: &str) -> Option<TravelTime> {
        let mut backoff = self.policy.initial_backoff;

        for attempt in 1..=self.policy.max_attempts {
            match self.attempt(origin, destination).await {
                Ok(tt) => {
                    debug!(attempt, duration_s = tt.duration_s, "Travel time received");
                    return Some(tt);
                }
                Err(failure) => {
                    warn!(attempt, error = %failure, backoff_ms = backoff.as_millis() as u64, "Travel time lookup failed");
                }
            }

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(backoff).await;
                backoff *= self.policy.multiplier;
            }
        }

        error!(attempts = self.policy.max_attempts, "Travel time lookup exhausted retries");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned `(status, body)` pairs and records request URLs.
    struct Canned {
        responses: Mutex<VecDeque<(u16, String)>>,
        urls: Mutex<Vec<String>>,
    }

    impl Canned {
        fn new(responses: Vec<(u16, Value)>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(|(s, v)| (s, v.to_string())).collect()),
                urls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.urls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpClient for Canned {
        async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            self.urls.lock().unwrap().push(req.url().to_string());
            let (status, body) = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or((500, String::new()));
            Ok(http::Response::builder().status(status).body(body).unwrap().into())
        }
    }

    fn ok_body() -> Value {
        json!({
            "status": "OK",
            "routes": [{"legs": [{
                "distance": {"value": 5400},
                "duration": {"value": 780},
                "duration_in_traffic": {"value": 960}
            }]}]
        })
    }

    fn client(responses: Vec<(u16, Value)>) -> DirectionsClient<Canned> {
        DirectionsClient::new(Canned::new(responses), Url::parse(DIRECTIONS_URL).unwrap())
            .with_retry_policy(RetryPolicy {
                initial_backoff: Duration::ZERO,
                ..Default::default()
            })
    }

    #[test]
    fn test_parse_ok() {
        let tt = parse_directions(StatusCode::OK, Some(&ok_body())).unwrap();
        assert_eq!(
            tt,
            TravelTime {
                distance_m: 5400,
                duration_s: 780,
                duration_in_traffic_s: 960
            }
        );
    }

    #[test]
    fn test_parse_traffic_falls_back_to_duration() {
        let body = json!({
            "status": "OK",
            "routes": [{"legs": [{"distance": {"value": 10}, "duration": {"value": 60}}]}]
        });
        let tt = parse_directions(StatusCode::OK, Some(&body)).unwrap();
        assert_eq!(tt.duration_in_traffic_s, 60);
    }

    #[test]
    fn test_parse_failures() {
        let quota = json!({"status": "OVER_QUERY_LIMIT"});
        assert!(matches!(
            parse_directions(StatusCode::OK, Some(&quota)),
            Err(LookupFailure::QuotaExceeded(_))
        ));

        let zero = json!({"status": "ZERO_RESULTS", "routes": []});
        assert!(matches!(
            parse_directions(StatusCode::OK, Some(&zero)),
            Err(LookupFailure::Unavailable(_))
        ));

        let no_legs = json!({"status": "OK", "routes": []});
        assert!(parse_directions(StatusCode::OK, Some(&no_legs)).is_err());

        assert!(parse_directions(StatusCode::SERVICE_UNAVAILABLE, Some(&ok_body())).is_err());
        assert!(parse_directions(StatusCode::OK, None).is_err());
    }

    #[tokio::test]
    async fn test_retries_quota_then_succeeds() {
        let c = client(vec![
            (200, json!({"status": "OVER_QUERY_LIMIT"})),
            (200, json!({"status": "RESOURCE_EXHAUSTED"})),
            (200, ok_body()),
        ]);

        let tt = c.lookup("Central Station", "Airport").await.unwrap();
        assert_eq!(tt.distance_m, 5400);
        assert_eq!(c.client.calls(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_four_attempts() {
        let quota = json!({"status": "OVER_QUERY_LIMIT"});
        let c = client(vec![(200, quota.clone()); 6]);

        assert!(c.lookup("A", "B").await.is_none());
        assert_eq!(c.client.calls(), 4);
    }

    #[tokio::test]
    async fn test_http_errors_are_retried() {
        let c = client(vec![(503, json!({})), (200, ok_body())]);
        assert!(c.lookup("A", "B").await.is_some());
        assert_eq!(c.client.calls(), 2);
    }

    #[tokio::test]
    async fn test_request_carries_route_parameters() {
        let c = client(vec![(200, ok_body())]);
        c.lookup("Main St & 1st", "Airport").await.unwrap();

        let urls = c.client.urls.lock().unwrap();
        let url = Url::parse(&urls[0]).unwrap();
        let params: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(params.contains(&("origin".into(), "Main St & 1st".into())));
        assert!(params.contains(&("destination".into(), "Airport".into())));
        assert!(params.contains(&("departure_time".into(), "now".into())));
    }
}
