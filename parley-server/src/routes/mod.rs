//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - `/api/health`, never authenticated
//! - `/api/chat`, `/api/chats`, `/api/settings` behind the bearer-auth layer
//! - `/api-docs/openapi.json` (disable with `PARLEY_ENABLE_OPENAPI=false`)
//! - CORS and per-request trace spans around everything

mod chat;
mod chats;
pub mod doc;
mod extract;
mod health;
mod settings;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router, middleware};

use crate::middleware::{auth, cors, trace};
use crate::state::AppState;

// ── Router builder ────────────────────────────────────────────────────────────

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .merge(chat::router())
        .merge(chats::router())
        .merge(settings::router())
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), auth::authenticate));

    let api = Router::new().merge(health::router()).merge(protected);

    let mut app = Router::new().nest("/api", api);

    if state.config.enable_openapi {
        app = app.route("/api-docs/openapi.json", get(openapi_json));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(cors::cors_layer(&state.config))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(doc::get_docs())
}
