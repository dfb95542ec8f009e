//! User settings (`/api/settings`).

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Extension, Json, Router};
use tracing::info;
use utoipa::OpenApi;
use validator::Validate;

use crate::entities::SettingStore;
use crate::entities::setting::CUSTOM_INSTRUCTIONS_KEY;
use crate::error::ServerError;
use crate::middleware::Caller;
use crate::routes::extract::ApiJson;
use crate::schemas::settings::{SettingsRequest, SettingsResponse, SettingsUpdatedResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(get_settings, put_settings),
    components(schemas(SettingsRequest, SettingsResponse, SettingsUpdatedResponse))
)]
pub struct SettingsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/settings", get(get_settings).put(put_settings))
}

#[utoipa::path(
    get,
    path = "/api/settings",
    tag = "settings",
    responses((status = 200, description = "Current settings", body = SettingsResponse))
)]
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<SettingsResponse>, ServerError> {
    let custom_instructions = state
        .store
        .get_setting(caller.user_id(), CUSTOM_INSTRUCTIONS_KEY)
        .await?
        .unwrap_or_default();
    Ok(Json(SettingsResponse { custom_instructions }))
}

#[utoipa::path(
    put,
    path = "/api/settings",
    tag = "settings",
    request_body = SettingsRequest,
    responses(
        (status = 200, description = "Settings stored", body = SettingsUpdatedResponse),
        (status = 400, description = "Malformed body or custom instructions too long"),
    )
)]
pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    ApiJson(req): ApiJson<SettingsRequest>,
) -> Result<Json<SettingsUpdatedResponse>, ServerError> {
    req.validate()?;
    state
        .store
        .set_setting(caller.user_id(), CUSTOM_INSTRUCTIONS_KEY, &req.custom_instructions)
        .await?;
    info!(len = req.custom_instructions.len(), "custom instructions updated");

    Ok(Json(SettingsUpdatedResponse {
        message: "Settings updated successfully".to_owned(),
        custom_instructions: req.custom_instructions,
    }))
}

#[cfg(test)]
mod test {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::generation::testing::ScriptedGenerator;
    use crate::routes::testing::*;

    #[tokio::test]
    async fn unset_instructions_read_as_empty() {
        let state = state_with(Arc::new(ScriptedGenerator::default()), &[]).await;
        let (status, body) = send_json(&state, json_request("GET", "/api/settings", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"custom_instructions": ""}));
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let state = state_with(Arc::new(ScriptedGenerator::default()), &[]).await;
        let (status, body) = send_json(
            &state,
            json_request("PUT", "/api/settings", Some(json!({"custom_instructions": "Be terse."})), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"message": "Settings updated successfully", "custom_instructions": "Be terse."})
        );

        let (_, body) = send_json(&state, json_request("GET", "/api/settings", None, None)).await;
        assert_eq!(body["custom_instructions"], "Be terse.");
    }

    #[tokio::test]
    async fn oversized_instructions_are_rejected() {
        let state = state_with(Arc::new(ScriptedGenerator::default()), &[]).await;
        let huge = "x".repeat(32 * 1024 + 1);
        let (status, _) = send(
            &state,
            json_request("PUT", "/api/settings", Some(json!({"custom_instructions": huge})), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_body_is_a_json_bad_request() {
        let state = state_with(Arc::new(ScriptedGenerator::default()), &[]).await;
        let request = axum::http::Request::builder()
            .method("PUT")
            .uri("/api/settings")
            .header(axum::http::header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from("{\"custom_instructions\": "))
            .unwrap();
        let (status, body) = send_json(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn settings_are_per_user() {
        let state = state_with(Arc::new(ScriptedGenerator::default()), &[("alice", "a"), ("bob", "b")]).await;
        send(
            &state,
            json_request("PUT", "/api/settings", Some(json!({"custom_instructions": "alice's"})), Some("a")),
        )
        .await;

        let (_, body) = send_json(&state, json_request("GET", "/api/settings", None, Some("b"))).await;
        assert_eq!(body["custom_instructions"], "");
        let (_, body) = send_json(&state, json_request("GET", "/api/settings", None, Some("a"))).await;
        assert_eq!(body["custom_instructions"], "alice's");
    }
}
