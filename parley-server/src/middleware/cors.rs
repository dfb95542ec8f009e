use std::time::Duration;

use http::{HeaderValue, Method, header};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::config::Config;

/// CORS for the single configured front-end origin.
///
/// Credentials are only allowed when bearer auth is on; tower-http refuses
/// wildcard headers together with credentials, so headers are listed.
pub fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(config.auth_enabled())
        .max_age(Duration::from_secs(3600));

    match config.cors_origin.trim().parse::<HeaderValue>() {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            warn!(origin = %config.cors_origin, error = %e, "invalid CORS origin; cross-origin requests will be refused");
            layer
        }
    }
}
