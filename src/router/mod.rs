//! Request routing: map URL patterns and HTTP methods to handler functions.
//!
//! | Pattern                   | Example match                 | Captured params                 |
//! |---------------------------|-------------------------------|---------------------------------|
//! | `/api/leagues`            | `/api/leagues`                | *(none)*                        |
//! | `/api/teams/:id`          | `/api/teams/33`               | `id → "33"`                     |
//! | `/api/raw/*`              | `/api/raw/venues/search`      | `wildcard → "/venues/search"`   |
//!
//! Trailing slashes are normalized on both patterns and incoming paths.
//! Routes are matched in registration order; the first route whose method and
//! pattern both match wins. Unmatched requests go to the fallback handler.

use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, PathParams};
use crate::resolver::WILDCARD_PARAM;
use crate::{Method, Request, Response, StatusCode};

/// Type-erased async handler.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait through the blanket impl.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

// A single path segment, either a literal or a named capture (`:name`).
#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

// Compiled representation of a route pattern string.
#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Parameterized { segments: Vec<Segment> },
    // Any path under the prefix; the tail is captured as `wildcard`.
    Wildcard(String),
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

impl Pattern {
    // Classified in order: `/*` suffix → Wildcard, any `:` → Parameterized, else Exact.
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Pattern::Wildcard(prefix.to_string());
        }

        if pattern.contains(':') {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s.strip_prefix(':') {
                    Some(name) => Segment::Parameter(name.to_string()),
                    None => Segment::Static(s.to_string()),
                })
                .collect();
            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_string())
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(PathParams::new),
            Pattern::Parameterized { segments } => {
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != path_segments.len() {
                    return None;
                }

                let mut params = PathParams::new();
                for (seg, path_seg) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) if s != path_seg => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => {
                            params.insert(name.clone(), path_seg.to_string());
                        }
                    }
                }
                Some(params)
            }
            Pattern::Wildcard(prefix) => {
                let suffix = path.strip_prefix(prefix.as_str())?;
                // `/api/raw/*` must not match `/api/rawdata`.
                if !suffix.is_empty() && !suffix.starts_with('/') {
                    return None;
                }
                let mut params = PathParams::new();
                params.insert(WILDCARD_PARAM.to_string(), suffix.to_string());
                Some(params)
            }
        }
    }
}

async fn not_found(_ctx: Context) -> Response {
    Response::new(StatusCode::NotFound)
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

impl Route {
    fn matches(&self, method: &Method, path: &str) -> Option<PathParams> {
        if &self.method == method {
            self.pattern.matches(path)
        } else {
            None
        }
    }
}

/// HTTP request router.
///
/// # Examples
///
/// ```rust,no_run
/// use pitchside::{Router, Response, StatusCode};
/// use pitchside::context::Context;
///
/// let mut router = Router::new();
/// router.get("/api/teams/:id", |ctx: Context| async move {
///     let id = ctx.params().get("id").unwrap_or("unknown").to_owned();
///     Response::new(StatusCode::Ok).body(id)
/// });
/// ```
pub struct Router {
    routes: Vec<Route>,
    fallback: Handler,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Creates an empty router whose fallback answers a bare `404`.
    pub fn new() -> Self {
        let fallback: Handler = Arc::new(|ctx| IntoHandler::call(&not_found, ctx));
        Self {
            routes: Vec::new(),
            fallback,
        }
    }

    /// Registers a handler for `GET` requests matching `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, path, handler);
    }

    /// Replaces the handler used when no route matches.
    pub fn fallback(&mut self, handler: impl IntoHandler) {
        self.fallback = Arc::new(move |ctx| handler.call(ctx));
    }

    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches a context to the first matching route, or the fallback.
    ///
    /// Captured path parameters are stored on the context before the handler runs.
    pub async fn dispatch(&self, mut ctx: Context) -> Response {
        let matched = self.routes.iter().find_map(|route| {
            route
                .matches(ctx.request().method(), ctx.request().path())
                .map(|params| (route, params))
        });

        match matched {
            Some((route, params)) => {
                ctx.set_params(params);
                (route.handler)(ctx).await
            }
            None => (self.fallback)(ctx).await,
        }
    }

    /// Dispatches a bare request.
    pub async fn route(&self, request: Request) -> Response {
        self.dispatch(Context::new(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    fn body_of(res: Response) -> String {
        String::from_utf8(res.payload().to_vec()).unwrap()
    }

    #[test]
    fn pattern_parse_variants() {
        assert!(matches!(Pattern::parse("/"), Pattern::Exact(s) if s == "/"));
        assert!(matches!(Pattern::parse("/api/leagues/"), Pattern::Exact(s) if s == "/api/leagues"));
        assert!(matches!(Pattern::parse("/api/raw/*"), Pattern::Wildcard(s) if s == "/api/raw"));
        match Pattern::parse("/api/standings/:league/:season") {
            Pattern::Parameterized { segments } => {
                assert_eq!(segments.len(), 4);
                assert!(matches!(&segments[2], Segment::Parameter(s) if s == "league"));
                assert!(matches!(&segments[3], Segment::Parameter(s) if s == "season"));
            }
            other => panic!("expected Parameterized, got {other:?}"),
        }
    }

    #[test]
    fn parameterized_pattern_extracts_values() {
        let pat = Pattern::parse("/api/teams/:id/stats/:league/:season");
        let params = pat.matches("/api/teams/33/stats/39/2023").unwrap();
        assert_eq!(params.get("id"), Some("33"));
        assert_eq!(params.get("league"), Some("39"));
        assert_eq!(params.get("season"), Some("2023"));
        assert!(pat.matches("/api/teams/33/stats/39").is_none());
        assert!(pat.matches("/api/teams/33/form/39/2023").is_none());
    }

    #[test]
    fn exact_pattern_normalizes_trailing_slash() {
        let pat = Pattern::parse("/api/leagues");
        assert!(pat.matches("/api/leagues/").is_some());
        assert!(pat.matches("/api/countries").is_none());
    }

    #[test]
    fn wildcard_captures_tail_on_segment_boundary() {
        let pat = Pattern::parse("/api/raw/*");
        let params = pat.matches("/api/raw/venues/search").unwrap();
        assert_eq!(params.get(WILDCARD_PARAM), Some("/venues/search"));
        assert!(pat.matches("/api/rawdata").is_none());
        assert!(pat.matches("/api/other").is_none());
    }

    #[tokio::test]
    async fn unmatched_request_uses_fallback() {
        let mut router = Router::new();
        assert_eq!(
            router.route(make_request("GET", "/nope")).await.status(),
            StatusCode::NotFound
        );

        router.fallback(|_ctx| async { Response::new(StatusCode::NotFound).body("custom") });
        assert_eq!(body_of(router.route(make_request("GET", "/nope")).await), "custom");
    }

    #[tokio::test]
    async fn method_must_match() {
        let mut router = Router::new();
        router.get("/health", |_ctx| async { Response::new(StatusCode::Ok) });
        assert_eq!(
            router.route(make_request("GET", "/health")).await.status(),
            StatusCode::Ok
        );
        assert_eq!(
            router.route(make_request("POST", "/health")).await.status(),
            StatusCode::NotFound
        );
    }

    #[tokio::test]
    async fn first_registered_route_wins() {
        let mut router = Router::new();
        router.get("/api/fixtures/live", |_ctx| async {
            Response::new(StatusCode::Ok).body("live")
        });
        router.get("/api/fixtures/:id", |_ctx| async {
            Response::new(StatusCode::Ok).body("by-id")
        });
        assert_eq!(router.len(), 2);
        assert_eq!(body_of(router.route(make_request("GET", "/api/fixtures/live")).await), "live");
        assert_eq!(body_of(router.route(make_request("GET", "/api/fixtures/7")).await), "by-id");
    }

    #[tokio::test]
    async fn handler_sees_captured_params() {
        let mut router = Router::new();
        router.get("/api/h2h/:team1/:team2", |ctx: Context| async move {
            let pair = format!(
                "{}-{}",
                ctx.params().get("team1").unwrap_or(""),
                ctx.params().get("team2").unwrap_or("")
            );
            Response::new(StatusCode::Ok).body(pair)
        });
        let res = router.route(make_request("GET", "/api/h2h/33/34")).await;
        assert_eq!(body_of(res), "33-34");
    }
}
