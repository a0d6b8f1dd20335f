//! # pitchside
//!
//! A TTL cache-aside proxy in front of a metered football data API.
//!
//! Each inbound request is resolved into a deterministic cache key and an
//! upstream URL. A payload still within its route's TTL is served from memory;
//! otherwise the upstream is called once and a successful result is stored.
//! Failures are never cached.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pitchside::{App, Config, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let app = Arc::new(App::from_config(&config)?);
//!     let pipeline = app.pipeline();
//!
//!     let server = Server::bind(config.listen_addr()).await?;
//!     server
//!         .run(move |req| {
//!             let pipeline = pipeline.clone();
//!             async move { pipeline.handle(req).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod middleware;
pub mod resolver;
pub mod router;
pub mod security;
pub mod server;
pub mod upstream;

pub use api::App;
pub use cache::{CacheAside, FetchError};
pub use config::{Config, ConfigError};
pub use error::ApiError;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use resolver::{RequestDescriptor, Resolver, RouteId};
pub use router::Router;
pub use server::{Server, ServerError};
