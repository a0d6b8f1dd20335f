//! The upstream data provider, seen as an opaque remote service.
//!
//! [`Upstream`] is the only capability the cache layer calls into. The
//! production implementation, [`HttpUpstream`], performs a single `GET` with
//! `reqwest` and classifies every way that can go wrong into an
//! [`UpstreamError`]. It never retries; retry policy belongs to the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::http::Headers;

/// Why an upstream call produced no usable payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("upstream did not answer within {after:?}")]
    Timeout { after: Duration },

    #[error("upstream answered with status {status}")]
    Status { status: u16 },

    #[error("malformed upstream body: {message}")]
    Body { message: String },

    /// The provider answered 2xx but reported errors in its envelope
    /// (bad credential, exhausted quota, bad parameter).
    #[error("upstream rejected the request: {message}")]
    Rejected { message: String },

    #[error("invalid client setup: {message}")]
    Client { message: String },
}

/// Capability to fetch one JSON document from the upstream.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, url: &str, headers: &Headers) -> Result<Value, UpstreamError>;
}

/// `reqwest`-backed upstream client.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpUpstream {
    /// Builds a client whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pitchside/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpstreamError::Client {
                message: e.to_string(),
            })?;
        Ok(Self { client, timeout })
    }

    fn header_map(headers: &Headers) -> Result<HeaderMap, UpstreamError> {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers.iter() {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| UpstreamError::Client {
                message: format!("header name `{name}`: {e}"),
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| UpstreamError::Client {
                message: format!("header `{name}`: {e}"),
            })?;
            map.append(name, value);
        }
        Ok(map)
    }

    fn classify(&self, error: reqwest::Error) -> UpstreamError {
        if error.is_timeout() {
            UpstreamError::Timeout {
                after: self.timeout,
            }
        } else if error.is_decode() || error.is_body() {
            UpstreamError::Body {
                message: error.to_string(),
            }
        } else {
            UpstreamError::Network {
                message: error.without_url().to_string(),
            }
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, url: &str, headers: &Headers) -> Result<Value, UpstreamError> {
        let response = self
            .client
            .get(url)
            .headers(Self::header_map(headers)?)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        debug!(url, status = status.as_u16(), "upstream responded");
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        let body: Value = serde_json::from_slice(&bytes).map_err(|e| UpstreamError::Body {
            message: e.to_string(),
        })?;

        if let Some(message) = envelope_errors(&body) {
            return Err(UpstreamError::Rejected { message });
        }
        Ok(body)
    }
}

/// Extracts the provider's `errors` field when it is non-empty.
///
/// The provider reports quota and credential problems with a `200` and an
/// `errors` object or array; such payloads must never be cached.
fn envelope_errors(body: &Value) -> Option<String> {
    let errors = body.get("errors")?;
    let non_empty = match errors {
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::String(s) => !s.is_empty(),
        _ => false,
    };
    non_empty.then(|| errors.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn credential() -> Headers {
        let mut headers = Headers::new();
        headers.insert("x-apisports-key", "secret");
        headers
    }

    fn client() -> HttpUpstream {
        HttpUpstream::new(Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn returns_json_and_sends_credential() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fixtures"))
            .and(query_param("date", "2024-05-01"))
            .and(header("x-apisports-key", "secret"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "errors": [], "response": [1, 2] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/fixtures?date=2024-05-01", server.uri());
        let body = client().fetch(&url, &credential()).await.unwrap();
        assert_eq!(body["response"], json!([1, 2]));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client()
            .fetch(&format!("{}/leagues", server.uri()), &credential())
            .await
            .unwrap_err();
        assert_eq!(err, UpstreamError::Status { status: 429 });
    }

    #[tokio::test]
    async fn malformed_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client()
            .fetch(&format!("{}/leagues", server.uri()), &credential())
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Body { .. }));
    }

    #[tokio::test]
    async fn envelope_errors_are_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({ "errors": { "requests": "You have reached the request limit for the day" }, "response": [] }),
            ))
            .mount(&server)
            .await;

        let err = client()
            .fetch(&format!("{}/leagues", server.uri()), &credential())
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Rejected { .. }));
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let upstream = HttpUpstream::new(Duration::from_millis(100)).unwrap();
        let err = upstream
            .fetch(&format!("{}/leagues", server.uri()), &credential())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            UpstreamError::Timeout {
                after: Duration::from_millis(100)
            }
        );
    }

    #[test]
    fn empty_envelope_errors_are_ignored() {
        assert_eq!(envelope_errors(&json!({ "errors": [] })), None);
        assert_eq!(envelope_errors(&json!({ "errors": {} })), None);
        assert_eq!(envelope_errors(&json!([1, 2])), None);
        assert!(envelope_errors(&json!({ "errors": ["bad"] })).is_some());
    }
}
