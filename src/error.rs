//! Request-boundary error taxonomy and its HTTP mapping.
//!
//! Every failure a handler can hit is converted here into a JSON body of the
//! form `{"error": "<message>"}`. Server-side failures carry a generic
//! message; their cause goes to the log only.

use serde_json::json;
use thiserror::Error;

use crate::cache::FetchError;
use crate::context::DuplicateParameter;
use crate::http::{Response, StatusCode};
use crate::resolver::ResolveError;

/// Public message for any upstream failure ("could not fetch data").
pub const UPSTREAM_FAILURE_MESSAGE: &str = "تعذر جلب البيانات";

/// Public message for unexpected failures.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed request parameters (400).
    #[error(transparent)]
    InvalidParameters(#[from] ResolveError),

    /// A parameter name repeated in the request (400).
    #[error(transparent)]
    DuplicateParameter(#[from] DuplicateParameter),

    /// The upstream could not supply the data (500).
    #[error(transparent)]
    UpstreamFetchFailed(#[from] FetchError),

    /// Wrong or missing access code on a gated route (401).
    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    /// Anything else (500).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidParameters(_) | Self::DuplicateParameter(_) => StatusCode::BadRequest,
            Self::UpstreamFetchFailed(_) | Self::Internal(_) => StatusCode::InternalServerError,
            Self::Unauthorized => StatusCode::Unauthorized,
            Self::NotFound => StatusCode::NotFound,
        }
    }

    /// The message a client is allowed to see.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidParameters(e) => e.to_string(),
            Self::DuplicateParameter(e) => e.to_string(),
            Self::UpstreamFetchFailed(_) => UPSTREAM_FAILURE_MESSAGE.to_owned(),
            Self::Internal(_) => INTERNAL_ERROR_MESSAGE.to_owned(),
            Self::Unauthorized | Self::NotFound => self.to_string(),
        }
    }

    pub fn into_response(self) -> Response {
        match &self {
            // Already logged with full context by the cache layer.
            Self::UpstreamFetchFailed(_) => {}
            Self::Internal(cause) => tracing::error!(cause = %cause, "internal error"),
            other => tracing::debug!(error = %other, "request rejected"),
        }
        Response::json(self.status(), &json!({ "error": self.public_message() }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::resolver::RouteId;
    use crate::upstream::UpstreamError;

    fn body(response: &Response) -> Value {
        serde_json::from_slice(response.payload()).unwrap()
    }

    #[test]
    fn invalid_parameters_is_400_with_reason() {
        let err = ApiError::from(ResolveError::InvalidParameters {
            route: RouteId::Standings,
            reason: "missing parameter `season`".to_owned(),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BadRequest);
        let message = body(&response)["error"].as_str().unwrap().to_owned();
        assert!(message.contains("season"));
    }

    #[test]
    fn duplicate_parameter_is_400_naming_it() {
        let err = ApiError::from(DuplicateParameter { name: "a".to_owned() });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BadRequest);
        assert_eq!(
            body(&response),
            json!({ "error": "parameter `a` is given more than once" })
        );
    }

    #[test]
    fn upstream_failure_hides_the_cause() {
        let err = ApiError::from(FetchError::UpstreamFetchFailed {
            key: "leagues-all".to_owned(),
            source: UpstreamError::Status { status: 499 },
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert_eq!(body(&response), json!({ "error": UPSTREAM_FAILURE_MESSAGE }));
    }

    #[test]
    fn internal_error_is_generic() {
        let response = ApiError::Internal("secret detail".to_owned()).into_response();
        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert_eq!(body(&response), json!({ "error": INTERNAL_ERROR_MESSAGE }));
    }

    #[test]
    fn unauthorized_and_not_found() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::Unauthorized);
        assert_eq!(
            body(&ApiError::NotFound.into_response()),
            json!({ "error": "not found" })
        );
    }
}
