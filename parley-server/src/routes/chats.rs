//! Chat management routes.
//!
//! Every route is scoped to the caller: unknown ids answer 404, chats owned
//! by another user answer 403.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router};
use tracing::info;
use utoipa::OpenApi;
use validator::Validate;

use crate::entities::{ChatRecord, ChatStore, MessageStore};
use crate::error::ServerError;
use crate::middleware::Caller;
use crate::routes::extract::ApiJson;
use crate::schemas::chat::{ChatResponse, CreateChatRequest, DeleteChatResponse, UpdateChatRequest};
use crate::state::AppState;

const DEFAULT_TITLE: &str = "New Chat";

#[derive(OpenApi)]
#[openapi(
    paths(list_chats, create_chat, get_chat, update_chat, delete_chat),
    components(schemas(ChatResponse, CreateChatRequest, UpdateChatRequest, DeleteChatResponse))
)]
pub struct ChatsApi;

/// Register chat CRUD routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chats", get(list_chats).post(create_chat))
        .route("/chats/{id}", get(get_chat).put(update_chat).delete(delete_chat))
}

/// All chats of the caller, most recently updated first, with their messages.
#[utoipa::path(
    get,
    path = "/api/chats",
    tag = "chats",
    responses(
        (status = 200, description = "Chats with messages", body = [ChatResponse]),
        (status = 401, description = "Missing or unknown bearer token"),
    )
)]
pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Vec<ChatResponse>>, ServerError> {
    let chats = state.store.list_chats(caller.user_id()).await?;
    let mut out = Vec::with_capacity(chats.len());
    for chat in chats {
        out.push(with_messages(&state, chat).await?);
    }
    Ok(Json(out))
}

/// Return the caller's empty chat if there is one (200), else create it (201).
#[utoipa::path(
    post,
    path = "/api/chats",
    tag = "chats",
    request_body(content = CreateChatRequest, description = "Optional title and model"),
    responses(
        (status = 200, description = "An existing empty chat was reused", body = ChatResponse),
        (status = 201, description = "Chat created", body = ChatResponse),
        (status = 400, description = "Malformed body or invalid title"),
    )
)]
pub async fn create_chat(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    body: Option<ApiJson<CreateChatRequest>>,
) -> Result<(StatusCode, Json<ChatResponse>), ServerError> {
    let req = body.map(|ApiJson(r)| r).unwrap_or_default();
    req.validate()?;

    if let Some(chat) = state.store.find_empty_chat(caller.user_id()).await? {
        return Ok((StatusCode::OK, Json(ChatResponse::new(chat, Vec::new()))));
    }

    let title = req.title.as_deref().unwrap_or(DEFAULT_TITLE);
    let model = req
        .model
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(state.config.default_model.as_str());
    let chat = state.store.create_chat(caller.user_id(), title, model).await?;
    info!(chat_id = %chat.id, "chat created");

    Ok((StatusCode::CREATED, Json(ChatResponse::new(chat, Vec::new()))))
}

#[utoipa::path(
    get,
    path = "/api/chats/{id}",
    tag = "chats",
    params(("id" = String, Path, description = "Chat id")),
    responses(
        (status = 200, description = "Chat with messages", body = ChatResponse),
        (status = 403, description = "Chat belongs to another user"),
        (status = 404, description = "Chat not found"),
    )
)]
pub async fn get_chat(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<ChatResponse>, ServerError> {
    let chat = owned_chat(&state, &caller, &id).await?;
    Ok(Json(with_messages(&state, chat).await?))
}

/// Rename a chat. Without a title the chat is returned unchanged.
#[utoipa::path(
    put,
    path = "/api/chats/{id}",
    tag = "chats",
    params(("id" = String, Path, description = "Chat id")),
    request_body = UpdateChatRequest,
    responses(
        (status = 200, description = "Updated chat", body = ChatResponse),
        (status = 400, description = "Malformed body or invalid title"),
        (status = 403, description = "Chat belongs to another user"),
        (status = 404, description = "Chat not found"),
    )
)]
pub async fn update_chat(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    body: Option<ApiJson<UpdateChatRequest>>,
) -> Result<Json<ChatResponse>, ServerError> {
    let req = body.map(|ApiJson(r)| r).unwrap_or_default();
    req.validate()?;

    let mut chat = owned_chat(&state, &caller, &id).await?;
    if let Some(title) = req.title.as_deref() {
        if !state.store.update_chat_title(&id, title).await? {
            return Err(not_found(&id));
        }
        chat = state.store.get_chat(&id).await?.ok_or_else(|| not_found(&id))?;
    }
    Ok(Json(with_messages(&state, chat).await?))
}

/// Delete a chat together with its messages.
#[utoipa::path(
    delete,
    path = "/api/chats/{id}",
    tag = "chats",
    params(("id" = String, Path, description = "Chat id")),
    responses(
        (status = 200, description = "Chat deleted", body = DeleteChatResponse),
        (status = 403, description = "Chat belongs to another user"),
        (status = 404, description = "Chat not found"),
    )
)]
pub async fn delete_chat(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<DeleteChatResponse>, ServerError> {
    owned_chat(&state, &caller, &id).await?;
    if !state.store.delete_chat(&id).await? {
        return Err(not_found(&id));
    }
    info!(chat_id = %id, "chat deleted");
    Ok(Json(DeleteChatResponse { success: true }))
}

// ── helpers ───────────────────────────────────────────────────────────────────

fn not_found(id: &str) -> ServerError {
    ServerError::NotFound(format!("chat {id} not found"))
}

async fn owned_chat(state: &AppState, caller: &Caller, id: &str) -> Result<ChatRecord, ServerError> {
    let chat = state.store.get_chat(id).await?.ok_or_else(|| not_found(id))?;
    if !caller.owns(&chat) {
        return Err(ServerError::Forbidden(format!("chat {id} belongs to another user")));
    }
    Ok(chat)
}

async fn with_messages(state: &AppState, chat: ChatRecord) -> Result<ChatResponse, ServerError> {
    let messages = state.store.list_messages(&chat.id).await?;
    Ok(ChatResponse::new(chat, messages))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
