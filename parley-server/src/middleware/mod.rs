//! HTTP middleware stack: bearer auth, CORS and per-request tracing.

pub mod auth;
pub mod cors;
pub mod trace;

pub use auth::Caller;
