use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

use crate::entities::{ChatRecord, UserStore};
use crate::error::ServerError;
use crate::state::AppState;

/// Who is making the request, attached as a request extension.
///
/// `user_id` is `None` when auth is disabled; such a caller owns every
/// chat and setting whose owner is also `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Option<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn owns(&self, chat: &ChatRecord) -> bool {
        chat.user_id == self.user_id
    }
}

/// Resolve the [`Caller`] of every request.
///
/// With no tokens configured everyone is the anonymous caller. Otherwise the
/// request needs `Authorization: Bearer <token>` naming a known token; the
/// mapped identity is upserted into `users` and its id becomes the caller.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let caller = if state.config.auth_enabled() {
        let token = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        let Some(identity) = token.and_then(|t| state.config.api_tokens.get(t)) else {
            warn!(path = %req.uri().path(), has_token = token.is_some(), "rejected unauthenticated request");
            return Err(ServerError::Unauthorized);
        };

        let user = state.store.record_login(identity).await?;
        debug!(
            user_id = %user.id,
            identity = %user.external_identity_id,
            display_name = ?user.display_name,
            email = ?user.email,
            has_avatar = user.avatar.is_some(),
            last_login = %user.last_login,
            "authenticated"
        );
        Caller { user_id: Some(user.id) }
    } else {
        Caller::anonymous()
    };

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
