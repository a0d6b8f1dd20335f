//! Cross-Origin Resource Sharing.

use std::pin::Pin;
use std::sync::Arc;

use crate::{
    Method, Response, StatusCode,
    context::Context,
    middleware::{Middleware, Next},
};

/// CORS middleware.
///
/// - No `Origin`, or an origin outside the allow-list: passes through untouched.
/// - `OPTIONS` preflight: answered here with `204` and the `Access-Control-*`
///   headers; the router is not consulted.
/// - Anything else: the downstream response gets the `Access-Control-*`
///   headers, plus `Vary: Origin` when a specific origin is echoed back.
///
/// The default allows any origin to `GET` the API and send the access-code
/// header.
///
/// ```rust
/// use pitchside::security::CorsMiddleware;
///
/// let cors = CorsMiddleware::only("https://scores.example.com");
/// ```
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    policy: Arc<CorsPolicy>,
}

#[derive(Debug)]
struct CorsPolicy {
    allowed_origins: Vec<String>,
    allow_methods: String,
    allow_headers: String,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self::with_origins(vec!["*".to_owned()])
    }
}

impl CorsMiddleware {
    /// Permits every origin.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Permits a single origin.
    pub fn only(origin: impl Into<String>) -> Self {
        Self::with_origins(vec![origin.into()])
    }

    fn with_origins(allowed_origins: Vec<String>) -> Self {
        Self {
            policy: Arc::new(CorsPolicy {
                allowed_origins,
                allow_methods: "GET, OPTIONS".to_owned(),
                allow_headers: format!("Content-Type, {}", super::ACCESS_CODE_HEADER),
            }),
        }
    }
}

impl CorsPolicy {
    // Returns the value for `Access-Control-Allow-Origin`, if the origin is allowed.
    fn allow_origin(&self, origin: &str) -> Option<String> {
        if self.allowed_origins.iter().any(|o| o == "*") {
            Some("*".to_owned())
        } else if self.allowed_origins.iter().any(|o| o == origin) {
            Some(origin.to_owned())
        } else {
            None
        }
    }

    fn decorate(&self, response: &mut Response, allow_origin: &str) {
        response.add_header("Access-Control-Allow-Origin", allow_origin);
        response.add_header("Access-Control-Allow-Methods", &self.allow_methods);
        response.add_header("Access-Control-Allow-Headers", &self.allow_headers);
        if allow_origin != "*" {
            response.add_header("Vary", "Origin");
        }
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let policy = Arc::clone(&self.policy);

        Box::pin(async move {
            let allow_origin = ctx
                .request()
                .headers()
                .get("origin")
                .and_then(|origin| policy.allow_origin(origin));
            let Some(allow_origin) = allow_origin else {
                return next.run(ctx).await;
            };

            if ctx.request().method() == &Method::Options {
                let mut response =
                    Response::new(StatusCode::NoContent).header("Access-Control-Max-Age", "3600");
                policy.decorate(&mut response, &allow_origin);
                return response;
            }

            let mut response = next.run(ctx).await;
            policy.decorate(&mut response, &allow_origin);
            response
        })
    }
}
