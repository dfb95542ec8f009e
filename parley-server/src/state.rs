//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::config::Config;
use crate::entities::SqliteStore;
use crate::generation::Generator;
use crate::turn::{StreamingCoordinator, TurnRegistry};

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Chats, messages, settings and users.
    pub store: Arc<SqliteStore>,
    /// Text-generation runtime.
    pub generator: Arc<dyn Generator>,
    /// Chats with a turn currently streaming.
    pub turns: Arc<TurnRegistry>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store)
            .field("turns", &self.turns)
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(config: Config, store: SqliteStore, generator: Arc<dyn Generator>) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            generator,
            turns: Arc::new(TurnRegistry::new()),
        }
    }

    pub fn coordinator(&self) -> StreamingCoordinator<SqliteStore> {
        StreamingCoordinator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.generator),
            self.config.flush_threshold,
        )
    }
}
