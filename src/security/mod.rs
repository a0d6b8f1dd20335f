//! Security middleware: CORS for browser clients and the access-code gate.

mod access;
mod cors;

pub use access::{ACCESS_CODE_HEADER, ACCESS_CODE_PARAM, AccessCodeGuard};
pub use cors::CorsMiddleware;
