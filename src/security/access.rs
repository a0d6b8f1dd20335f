//! Shared-secret gate for selected path prefixes.

use std::pin::Pin;
use std::sync::Arc;

use crate::{
    Response,
    context::Context,
    error::ApiError,
    middleware::{Middleware, Next},
};

/// Request header carrying the access code.
pub const ACCESS_CODE_HEADER: &str = "x-access-code";

/// Query parameter accepted in place of the header.
pub const ACCESS_CODE_PARAM: &str = "code";

/// Rejects requests under a protected prefix unless they present the code.
///
/// Requests outside the prefix pass through untouched.
///
/// ```rust
/// use pitchside::security::AccessCodeGuard;
///
/// let guard = AccessCodeGuard::new("letmein", "/api/raw");
/// ```
#[derive(Debug, Clone)]
pub struct AccessCodeGuard {
    code: Arc<str>,
    prefix: Arc<str>,
}

impl AccessCodeGuard {
    pub fn new(code: impl Into<String>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            code: Arc::from(code.into()),
            prefix: Arc::from(prefix.trim_end_matches('/')),
        }
    }

    fn protects(&self, path: &str) -> bool {
        path.strip_prefix(&*self.prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    fn presented<'a>(ctx: &'a Context) -> Option<&'a str> {
        ctx.request()
            .headers()
            .get(ACCESS_CODE_HEADER)
            .or_else(|| ctx.request().query_param(ACCESS_CODE_PARAM))
    }
}

impl Middleware for AccessCodeGuard {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let guard = self.clone();

        Box::pin(async move {
            if !guard.protects(ctx.request().path()) {
                return next.run(ctx).await;
            }
            let granted = Self::presented(&ctx).is_some_and(|code| code == &*guard.code);
            if !granted {
                tracing::warn!(path = %ctx.request().path(), "access code rejected");
                return ApiError::Unauthorized.into_response();
            }
            next.run(ctx).await
        })
    }
}
