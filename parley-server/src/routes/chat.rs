//! Streaming chat turn (`POST /api/chat`).
//!
//! Resolves the target chat, stores the user message, builds the prompt
//! (custom instructions + ordered history) and hands the turn to the
//! [`StreamingCoordinator`](crate::turn::StreamingCoordinator). Its events
//! are relayed as Server-Sent Events, one JSON object per `data:` line.

use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Router};
use futures::StreamExt;
use tracing::{debug, info};
use utoipa::OpenApi;
use validator::Validate;

use crate::entities::setting::CUSTOM_INSTRUCTIONS_KEY;
use crate::entities::{ChatRecord, ChatStore, MessageStore, Role, SettingStore};
use crate::error::ServerError;
use crate::generation::PromptMessage;
use crate::middleware::Caller;
use crate::routes::extract::ApiJson;
use crate::schemas::chat::{ChatTurnRequest, StreamFrame};
use crate::state::AppState;
use crate::turn::TurnRequest;

/// Characters of the first message kept in a chat title.
const TITLE_CHARS: usize = 50;

#[derive(OpenApi)]
#[openapi(paths(start_turn), components(schemas(ChatTurnRequest, StreamFrame)))]
pub struct ChatApi;

/// Register the chat-turn route.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat", post(start_turn))
}

/// Start a turn and stream the assistant's answer.
///
/// Validation, ownership and concurrency failures are plain JSON errors;
/// once the stream is open, generation failures arrive in-band as a final
/// `{"error": "..."}` frame.
#[utoipa::path(
    post,
    path = "/api/chat",
    tag = "chat",
    request_body = ChatTurnRequest,
    responses(
        (status = 200, description = "Event stream of content frames ending in done or error", body = StreamFrame, content_type = "text/event-stream"),
        (status = 400, description = "Malformed body, or empty or oversized message"),
        (status = 401, description = "Missing or unknown bearer token"),
        (status = 403, description = "Chat belongs to another user"),
        (status = 404, description = "Chat not found"),
        (status = 409, description = "A turn is already streaming into this chat"),
    )
)]
pub async fn start_turn(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    ApiJson(req): ApiJson<ChatTurnRequest>,
) -> Result<Response, ServerError> {
    req.validate()?;

    let model = req
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.config.default_model.clone());
    let requested_chat = req.chat_id.as_deref().filter(|id| !id.is_empty());

    let mut chat = resolve_chat(&state, &caller, requested_chat, &req.message, &model).await?;

    let lease = match state.turns.try_begin(&chat.id) {
        Some(lease) => lease,
        // A concurrent turn claimed the empty chat we picked; start our own.
        None if requested_chat.is_none() => {
            chat = create_titled_chat(&state, &caller, &req.message, &model).await?;
            state.turns.try_begin(&chat.id).ok_or_else(|| busy(&chat.id))?
        }
        None => return Err(busy(&chat.id)),
    };

    if state.store.list_messages(&chat.id).await?.is_empty() {
        state
            .store
            .update_chat_title(&chat.id, &title_from_message(&req.message))
            .await?;
    }

    state.store.append_message(&chat.id, Role::User, &req.message).await?;

    let messages = build_prompt(&state, &caller, &chat.id).await?;
    debug!(chat_id = %chat.id, model = %model, context = messages.len(), "starting turn");

    let turn = state.coordinator().start(TurnRequest {
        chat_id: chat.id,
        model,
        messages,
        lease: Some(lease),
    });

    let events = turn.map(|event| Event::default().json_data(StreamFrame::from(event)));

    Ok(([("x-accel-buffering", "no")], Sse::new(events)).into_response())
}

/// The chat this turn goes to: the requested one, else the caller's most
/// recent empty chat, else a new one titled after the message.
async fn resolve_chat(
    state: &AppState,
    caller: &Caller,
    chat_id: Option<&str>,
    message: &str,
    model: &str,
) -> Result<ChatRecord, ServerError> {
    if let Some(id) = chat_id {
        let chat = state
            .store
            .get_chat(id)
            .await?
            .ok_or_else(|| ServerError::NotFound(format!("chat {id} not found")))?;
        if !caller.owns(&chat) {
            return Err(ServerError::Forbidden(format!("chat {id} belongs to another user")));
        }
        return Ok(chat);
    }

    if let Some(chat) = state.store.find_empty_chat(caller.user_id()).await? {
        debug!(chat_id = %chat.id, "reusing empty chat");
        return Ok(chat);
    }

    create_titled_chat(state, caller, message, model).await
}

async fn create_titled_chat(
    state: &AppState,
    caller: &Caller,
    message: &str,
    model: &str,
) -> Result<ChatRecord, ServerError> {
    let chat = state
        .store
        .create_chat(caller.user_id(), &title_from_message(message), model)
        .await?;
    info!(chat_id = %chat.id, "created chat for new conversation");
    Ok(chat)
}

fn busy(chat_id: &str) -> ServerError {
    ServerError::Conflict(format!("a reply is already being generated in chat {chat_id}"))
}

/// Ordered history of the chat, behind the caller's custom instructions.
async fn build_prompt(
    state: &AppState,
    caller: &Caller,
    chat_id: &str,
) -> Result<Vec<PromptMessage>, ServerError> {
    let instructions = state
        .store
        .get_setting(caller.user_id(), CUSTOM_INSTRUCTIONS_KEY)
        .await?
        .filter(|s| !s.is_empty());

    let history = state.store.list_messages(chat_id).await?;

    let mut messages = Vec::with_capacity(history.len() + 1);
    if let Some(system) = instructions {
        messages.push(PromptMessage::new(Role::System, system));
    }
    messages.extend(history.into_iter().map(|m| PromptMessage::new(m.role, m.content)));
    Ok(messages)
}

/// First 50 characters of `message`, with `…` appended when cut.
fn title_from_message(message: &str) -> String {
    let mut chars = message.chars();
    let mut title: String = chars.by_ref().take(TITLE_CHARS).collect();
    if chars.next().is_some() {
        title.push('…');
    }
    title
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use std::time::Duration;

    use axum::http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::entities::UserStore;
    use crate::generation::testing::{ChannelGenerator, ScriptedGenerator, Step};
    use crate::routes::testing::*;

    async fn turn(state: &Arc<AppState>, body: serde_json::Value) -> (StatusCode, Vec<serde_json::Value>) {
        let (status, bytes) = send(state, json_request("POST", "/api/chat", Some(body), None)).await;
        let frames = if status == StatusCode::OK { sse_frames(&bytes) } else { Vec::new() };
        (status, frames)
    }

    #[test]
    fn titles_are_cut_at_fifty_characters() {
        let long = "a".repeat(60);
        assert_eq!(title_from_message(&long), format!("{}…", "a".repeat(50)));
        let short = "b".repeat(30);
        assert_eq!(title_from_message(&short), short);
        assert_eq!(title_from_message(&"c".repeat(50)), "c".repeat(50));
        assert_eq!(title_from_message(&"é".repeat(51)).chars().count(), 51);
    }

    #[tokio::test]
    async fn first_turn_creates_a_chat_and_streams_the_answer() {
        let state = state_with(Arc::new(ScriptedGenerator::texts(["Hi", " there"])), &[]).await;
        let (status, frames) = turn(&state, json!({"message": "hello"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(frames[0], json!({"content": "Hi"}));
        assert_eq!(frames[1], json!({"content": " there"}));
        let chat_id = frames[2]["chat_id"].as_str().unwrap().to_owned();
        assert_eq!(frames[2]["done"], true);
        assert_eq!(frames.len(), 3);

        let chat = state.store.get_chat(&chat_id).await.unwrap().unwrap();
        assert_eq!(chat.title, "hello");
        assert_eq!(chat.model, "gemma3:1b");
        let messages = state.store.list_messages(&chat_id).await.unwrap();
        let stored: Vec<_> = messages
            .iter()
            .map(|m| (m.role, m.content.as_str(), m.sequence_order))
            .collect();
        assert_eq!(stored, vec![(Role::User, "hello", 0), (Role::Assistant, "Hi there", 1)]);
    }

    #[tokio::test]
    async fn stream_headers_disable_buffering() {
        let state = state_with(Arc::new(ScriptedGenerator::texts(["x"])), &[]).await;
        let response = tower::ServiceExt::oneshot(
            crate::routes::build(Arc::clone(&state)),
            json_request("POST", "/api/chat", Some(json!({"message": "m"})), None),
        )
        .await
        .unwrap();
        let headers = response.headers();
        assert_eq!(headers["content-type"], "text/event-stream");
        assert_eq!(headers["cache-control"], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");
    }

    #[tokio::test]
    async fn long_first_message_is_truncated_into_the_title() {
        let state = state_with(Arc::new(ScriptedGenerator::texts(["ok"])), &[]).await;
        let message = "x".repeat(60);
        let (_, frames) = turn(&state, json!({"message": message})).await;
        let chat_id = frames.last().unwrap()["chat_id"].as_str().unwrap().to_owned();

        let chat = state.store.get_chat(&chat_id).await.unwrap().unwrap();
        assert_eq!(chat.title, format!("{}…", "x".repeat(50)));
    }

    #[tokio::test]
    async fn turn_without_chat_id_reuses_the_empty_chat() {
        let state = state_with(Arc::new(ScriptedGenerator::texts(["ok"])), &[]).await;
        let empty = state.store.create_chat(None, "New Chat", "m").await.unwrap();

        let (_, frames) = turn(&state, json!({"message": "first question"})).await;
        assert_eq!(frames.last().unwrap()["chat_id"], empty.id.as_str());

        let chat = state.store.get_chat(&empty.id).await.unwrap().unwrap();
        assert_eq!(chat.title, "first question");
        assert_eq!(state.store.list_chats(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn follow_up_turn_keeps_the_title_and_sends_history() {
        let generator = Arc::new(ScriptedGenerator::texts(["answer"]));
        let state = state_with(generator.clone(), &[]).await;
        let (_, frames) = turn(&state, json!({"message": "one"})).await;
        let chat_id = frames.last().unwrap()["chat_id"].as_str().unwrap().to_owned();

        let (status, _) = turn(&state, json!({"message": "two", "chat_id": chat_id})).await;
        assert_eq!(status, StatusCode::OK);

        let chat = state.store.get_chat(&chat_id).await.unwrap().unwrap();
        assert_eq!(chat.title, "one");
        let prompt = generator.last_prompt().unwrap();
        let contents: Vec<_> = prompt.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "answer", "two"]);
        let orders: Vec<_> = state
            .store
            .list_messages(&chat_id)
            .await
            .unwrap()
            .iter()
            .map(|m| m.sequence_order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn custom_instructions_become_the_system_preamble() {
        let generator = Arc::new(ScriptedGenerator::texts(["ok"]));
        let state = state_with(generator.clone(), &[]).await;
        state
            .store
            .set_setting(None, CUSTOM_INSTRUCTIONS_KEY, "Answer in French.")
            .await
            .unwrap();

        turn(&state, json!({"message": "hello"})).await;

        let prompt = generator.last_prompt().unwrap();
        assert_eq!(prompt[0], PromptMessage::new(Role::System, "Answer in French."));
        assert_eq!(prompt[1], PromptMessage::new(Role::User, "hello"));
        assert_eq!(prompt.len(), 2);
    }

    #[tokio::test]
    async fn requested_model_is_forwarded_to_new_chats() {
        let state = state_with(Arc::new(ScriptedGenerator::texts(["ok"])), &[]).await;
        let (_, frames) = turn(&state, json!({"message": "q", "model": "llama3:8b"})).await;
        let chat_id = frames.last().unwrap()["chat_id"].as_str().unwrap().to_owned();
        assert_eq!(state.store.get_chat(&chat_id).await.unwrap().unwrap().model, "llama3:8b");
    }

    #[tokio::test]
    async fn empty_message_is_rejected_before_anything_is_stored() {
        let state = state_with(Arc::new(ScriptedGenerator::texts(["ok"])), &[]).await;
        let (status, body) =
            send_json(&state, json_request("POST", "/api/chat", Some(json!({"message": ""})), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Message is required"));
        assert!(state.store.list_chats(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mistyped_message_is_a_json_bad_request() {
        let state = state_with(Arc::new(ScriptedGenerator::texts(["ok"])), &[]).await;
        let (status, body) =
            send_json(&state, json_request("POST", "/api/chat", Some(json!({"message": 5})), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("message"));
        assert!(state.store.list_chats(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn body_without_json_content_type_is_a_json_bad_request() {
        let state = state_with(Arc::new(ScriptedGenerator::texts(["ok"])), &[]).await;
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/chat")
            .body(axum::body::Body::from(r#"{"message": "hi"}"#))
            .unwrap();
        let (status, body) = send_json(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn unknown_chat_is_not_found() {
        let state = state_with(Arc::new(ScriptedGenerator::texts(["ok"])), &[]).await;
        let (status, _) = turn(&state, json!({"message": "q", "chat_id": "nope"})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn someone_elses_chat_is_forbidden() {
        let state = state_with(Arc::new(ScriptedGenerator::texts(["ok"])), &[("alice", "a"), ("bob", "b")]).await;
        let bob = state.store.record_login("bob").await.unwrap();
        let chat = state.store.create_chat(Some(&bob.id), "bob's", "m").await.unwrap();

        let (status, _) = send(
            &state,
            json_request("POST", "/api/chat", Some(json!({"message": "q", "chat_id": chat.id})), Some("a")),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(state.store.list_messages(&chat.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn authenticated_turns_are_owned_by_the_caller() {
        let state = state_with(Arc::new(ScriptedGenerator::texts(["ok"])), &[("alice", "a")]).await;
        let (status, bytes) =
            send(&state, json_request("POST", "/api/chat", Some(json!({"message": "q"})), Some("a"))).await;
        assert_eq!(status, StatusCode::OK);
        let chat_id = sse_frames(&bytes).last().unwrap()["chat_id"].as_str().unwrap().to_owned();

        let alice = state.store.record_login("alice").await.unwrap();
        let chat = state.store.get_chat(&chat_id).await.unwrap().unwrap();
        assert_eq!(chat.user_id.as_deref(), Some(alice.id.as_str()));
    }

    #[tokio::test]
    async fn concurrent_turn_on_the_same_chat_conflicts() {
        let (generator, feed) = ChannelGenerator::new();
        let state = state_with(Arc::new(generator), &[]).await;
        let chat = state.store.create_chat(None, "t", "m").await.unwrap();

        // Headers arrive as soon as the producer is spawned; the body stays open.
        let first = tower::ServiceExt::oneshot(
            crate::routes::build(Arc::clone(&state)),
            json_request("POST", "/api/chat", Some(json!({"message": "one", "chat_id": chat.id})), None),
        )
        .await
        .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let (status, body) = send_json(
            &state,
            json_request("POST", "/api/chat", Some(json!({"message": "two", "chat_id": chat.id})), None),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains(&chat.id));
        assert_eq!(state.store.list_messages(&chat.id).await.unwrap().len(), 1);

        feed.send(Ok("done".into())).unwrap();
        drop(feed);
        drop(first);
        tokio::time::timeout(Duration::from_secs(2), async {
            while state.turns.is_active(&chat.id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("turn should finish");
    }

    #[tokio::test]
    async fn busy_empty_chat_is_not_reused_for_a_new_conversation() {
        let state = state_with(Arc::new(ScriptedGenerator::texts(["ok"])), &[]).await;
        let empty = state.store.create_chat(None, "New Chat", "m").await.unwrap();
        let held = state.turns.try_begin(&empty.id).unwrap();

        let (status, frames) = turn(&state, json!({"message": "racing"})).await;
        assert_eq!(status, StatusCode::OK);
        let chat_id = frames.last().unwrap()["chat_id"].as_str().unwrap().to_owned();
        assert_ne!(chat_id, empty.id);
        assert_eq!(state.store.get_chat(&chat_id).await.unwrap().unwrap().title, "racing");
        assert!(state.store.list_messages(&empty.id).await.unwrap().is_empty());
        drop(held);
    }

    #[tokio::test]
    async fn generation_failure_is_reported_in_band() {
        let generator = ScriptedGenerator::new(vec![Step::Text("half".into()), Step::Fail("model crashed".into())]);
        let state = state_with(Arc::new(generator), &[]).await;
        let (status, frames) = turn(&state, json!({"message": "q"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(frames, vec![json!({"content": "half"}), json!({"error": "model crashed"})]);
        let chats = state.store.list_chats(None).await.unwrap();
        let messages = state.store.list_messages(&chats[0].id).await.unwrap();
        assert_eq!(messages[1].content, "half");
    }
}
