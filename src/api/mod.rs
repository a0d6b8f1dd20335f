//! The public HTTP surface: one `GET` endpoint per route-table row, plus
//! `/health`.
//!
//! Every data endpoint follows the same path: merge path captures and query
//! parameters, resolve them into a [`RequestDescriptor`], and hand that to the
//! shared [`CacheAside`]. Successful payloads are returned verbatim as JSON.

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use serde_json::{Value, json};
use tracing::info;

use crate::cache::{CacheAside, CacheStats};
use crate::config::Config;
use crate::context::Context;
use crate::error::ApiError;
use crate::http::{Response, StatusCode};
use crate::middleware::{LoggerMiddleware, Pipeline};
use crate::resolver::{Params, ROUTES, RequestDescriptor, Resolver, RouteId};
use crate::router::Router;
use crate::security::{ACCESS_CODE_PARAM, AccessCodeGuard, CorsMiddleware};
use crate::upstream::{HttpUpstream, UpstreamError};

/// Path prefix gated by the access code, when one is configured.
pub const GATED_PREFIX: &str = "/api/raw";

pub const HEALTH_PATH: &str = "/health";

/// Application state shared by every handler.
pub struct App {
    resolver: Resolver,
    cache: Arc<CacheAside>,
    utc_offset: FixedOffset,
    access_code: Option<String>,
}

impl App {
    /// Creates an app answering in UTC with no gated routes.
    pub fn new(resolver: Resolver, cache: Arc<CacheAside>) -> Self {
        Self {
            resolver,
            cache,
            utc_offset: Utc.fix(),
            access_code: None,
        }
    }

    /// Wires the production upstream and cache from `config`.
    pub fn from_config(config: &Config) -> Result<Self, UpstreamError> {
        let upstream = HttpUpstream::new(config.upstream_timeout)?;
        let cache = CacheAside::new(Arc::new(upstream)).timeout(config.upstream_timeout);
        let resolver = Resolver::new(&config.base_url, &config.api_key, config.ttl_policy.clone());

        Ok(Self::new(resolver, Arc::new(cache))
            .utc_offset(config.utc_offset)
            .access_code(config.access_code.clone()))
    }

    /// Offset used to compute the dates behind `today` and `tomorrow`.
    #[must_use]
    pub fn utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    /// Requires `code` on everything under [`GATED_PREFIX`]. `None` leaves it open.
    #[must_use]
    pub fn access_code(mut self, code: Option<String>) -> Self {
        self.access_code = code;
        self
    }

    pub fn cache(&self) -> &Arc<CacheAside> {
        &self.cache
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The local calendar date, shifted by `days_ahead`.
    fn local_date(&self, days_ahead: u64) -> Result<NaiveDate, ApiError> {
        let today = self
            .cache
            .clock()
            .now()
            .with_timezone(&self.utc_offset)
            .date_naive();
        today
            .checked_add_days(chrono::Days::new(days_ahead))
            .ok_or_else(|| ApiError::Internal(format!("date out of range: {today} + {days_ahead}d")))
    }

    /// Builds the descriptor for `route` from the inbound parameters.
    pub fn describe(&self, route: RouteId, mut params: Params) -> Result<RequestDescriptor, ApiError> {
        match route {
            RouteId::FixturesToday | RouteId::FixturesTomorrow => {
                let days_ahead = u64::from(route == RouteId::FixturesTomorrow);
                let date = self.local_date(days_ahead)?;
                params.insert("date".to_owned(), date.format("%Y-%m-%d").to_string());
            }
            // The access code is a credential for this service, not an upstream parameter.
            RouteId::Passthrough => {
                params.remove(ACCESS_CODE_PARAM);
            }
            _ => {}
        }
        Ok(self.resolver.resolve(route, &params)?)
    }

    /// Resolves and fetches `route`, through the cache.
    pub async fn fetch(&self, route: RouteId, params: Params) -> Result<Arc<Value>, ApiError> {
        let descriptor = self.describe(route, params)?;
        Ok(self.cache.get_or_fetch(&descriptor).await?)
    }

    async fn respond(&self, route: RouteId, ctx: &Context) -> Response {
        let result = match ctx.all_params() {
            Ok(params) => self.fetch(route, params).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(payload) => Response::json(StatusCode::Ok, &*payload),
            Err(e) => e.into_response(),
        }
    }

    fn health(&self) -> Response {
        Response::json(
            StatusCode::Ok,
            &json!({ "status": "ok", "cache": self.stats() }),
        )
    }

    /// A router with every route-table path, `/health`, and a JSON `404` fallback.
    pub fn router(self: &Arc<Self>) -> Router {
        let mut router = Router::new();

        let app = Arc::clone(self);
        router.get(HEALTH_PATH, move |_ctx: Context| {
            let response = app.health();
            async move { response }
        });

        for spec in ROUTES {
            let route = spec.id;
            for path in spec.paths {
                let app = Arc::clone(self);
                router.get(path, move |ctx: Context| {
                    let app = Arc::clone(&app);
                    async move { app.respond(route, &ctx).await }
                });
            }
        }

        router.fallback(|_ctx| async { ApiError::NotFound.into_response() });
        info!(routes = router.len(), "routes registered");
        router
    }

    /// The full request pipeline: logging, CORS, the optional access-code
    /// gate, then the router.
    pub fn pipeline(self: &Arc<Self>) -> Pipeline {
        let builder = Pipeline::builder()
            .layer(LoggerMiddleware)
            .layer(CorsMiddleware::permissive());
        let builder = match &self.access_code {
            Some(code) => builder.layer(AccessCodeGuard::new(code.as_str(), GATED_PREFIX)),
            None => builder,
        };
        builder.build(self.router())
    }
}
