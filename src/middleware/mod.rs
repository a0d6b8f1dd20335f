//! Middleware pipeline: composable before/after request handler logic.
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`Pipeline`]: an ordered middleware stack terminated by a [`Router`].
//! - [`LoggerMiddleware`]: one `info` line per request.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{Request, Response, StatusCode, context::Context, router::Router};

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a middleware can forward a
/// request at most once.
pub struct Next {
    chain: Arc<[MiddlewareHandler]>,
    index: usize,
}

impl Next {
    pub fn new(chain: Arc<[MiddlewareHandler]>) -> Self {
        Self { chain, index: 0 }
    }

    /// Invokes the next middleware in the chain.
    ///
    /// An exhausted chain yields a `500`; a [`Pipeline`] always ends in its
    /// router, so this only happens with a hand-built chain.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.chain.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline"),
        }
    }
}

/// The core middleware trait.
///
/// Implementors may pass through (`next.run(ctx).await`), short-circuit by
/// returning a response directly, or decorate the downstream response.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Logs method, path, status, and duration once the response is ready.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().path().to_string();

            let response = next.run(ctx).await;

            tracing::info!(
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "request served"
            );

            response
        })
    }
}

/// Builder for a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    layers: Vec<MiddlewareHandler>,
}

impl PipelineBuilder {
    /// Appends a middleware. Layers run in the order they are added.
    #[must_use]
    pub fn layer<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.layers.push(from_middleware(Arc::new(middleware)));
        self
    }

    /// Terminates the stack with `router`.
    pub fn build(mut self, router: Router) -> Pipeline {
        let router = Arc::new(router);
        let endpoint: MiddlewareHandler = Arc::new(
            move |ctx: Context, _next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
                let router = Arc::clone(&router);
                Box::pin(async move { router.dispatch(ctx).await })
            },
        );
        self.layers.push(endpoint);
        Pipeline {
            chain: self.layers.into(),
        }
    }
}

/// An ordered middleware stack ending in a router.
///
/// ```rust,no_run
/// use pitchside::Router;
/// use pitchside::middleware::{LoggerMiddleware, Pipeline};
///
/// let pipeline = Pipeline::builder().layer(LoggerMiddleware).build(Router::new());
/// ```
#[derive(Clone)]
pub struct Pipeline {
    chain: Arc<[MiddlewareHandler]>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub async fn handle(&self, request: Request) -> Response {
        Next::new(Arc::clone(&self.chain))
            .run(Context::new(request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> Request {
        let raw = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    struct Stamp(&'static str);

    impl Middleware for Stamp {
        fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            let tag = self.0;
            Box::pin(async move {
                let mut response = next.run(ctx).await;
                response.add_header("X-Stamp", tag);
                response
            })
        }
    }

    struct Deny;

    impl Middleware for Deny {
        fn handle(&self, _ctx: Context, _next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            Box::pin(async { Response::new(StatusCode::Unauthorized) })
        }
    }

    fn router() -> Router {
        let mut router = Router::new();
        router.get("/health", |_ctx| async { Response::new(StatusCode::Ok) });
        router
    }

    #[tokio::test]
    async fn layers_wrap_the_router_in_order() {
        let pipeline = Pipeline::builder()
            .layer(LoggerMiddleware)
            .layer(Stamp("outer"))
            .layer(Stamp("inner"))
            .build(router());

        let response = pipeline.handle(request("/health")).await;
        assert_eq!(response.status(), StatusCode::Ok);
        let stamps: Vec<_> = response
            .headers()
            .iter()
            .filter(|(name, _)| *name == "X-Stamp")
            .map(|(_, value)| value)
            .collect();
        // Inner decorates first on the way out.
        assert_eq!(stamps, vec!["inner", "outer"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_the_router() {
        let pipeline = Pipeline::builder().layer(Deny).build(router());
        let response = pipeline.handle(request("/health")).await;
        assert_eq!(response.status(), StatusCode::Unauthorized);
    }

    #[tokio::test]
    async fn exhausted_chain_is_a_server_error() {
        let response = Next::new(Arc::from(Vec::new()))
            .run(Context::new(request("/")))
            .await;
        assert_eq!(response.status(), StatusCode::InternalServerError);
    }
}
