use utoipa::OpenApi;

use crate::routes::{chat, chats, health, settings};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "parley-server",
        description = "Streaming chat backend: chats, messages, settings and server-sent answer streams",
    ),
    tags(
        (name = "chat", description = "Streaming turns"),
        (name = "chats", description = "Chat management"),
        (name = "settings", description = "Per-user settings"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(chat::ChatApi::openapi());
    root.merge(chats::ChatsApi::openapi());
    root.merge(settings::SettingsApi::openapi());
    root.merge(health::HealthApi::openapi());
    root
}
