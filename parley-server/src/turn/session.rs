//! Per-turn generation state and its persistence policy.

use tracing::{debug, error, info, warn};

use crate::entities::{MessageStore, Role};

use super::StreamEvent;

/// Ephemeral state of one streaming turn.
///
/// Owned by the producer task only. Every write it issues is a full
/// overwrite, so the stored assistant content is always a prefix of
/// `accumulated` and equals it after [`GenerationSession::finalize`].
#[derive(Debug)]
pub struct GenerationSession {
    chat_id: String,
    accumulated: String,
    accumulated_chars: usize,
    /// Whether `accumulated` holds any non-whitespace character.
    has_text: bool,
    message_id: Option<i64>,
    flushed_chars: usize,
    flush_threshold: usize,
    finished: bool,
    error: Option<String>,
}

impl GenerationSession {
    pub fn new(chat_id: impl Into<String>, flush_threshold: usize) -> Self {
        Self {
            chat_id: chat_id.into(),
            accumulated: String::new(),
            accumulated_chars: 0,
            has_text: false,
            message_id: None,
            flushed_chars: 0,
            flush_threshold,
            finished: false,
            error: None,
        }
    }

    pub fn push(&mut self, fragment: &str) {
        debug_assert!(!self.finished, "fragment pushed after finalize");
        self.accumulated.push_str(fragment);
        self.accumulated_chars += fragment.chars().count();
        self.has_text |= fragment.chars().any(|c| !c.is_whitespace());
    }

    pub fn text(&self) -> &str {
        &self.accumulated
    }

    #[cfg(test)]
    pub fn message_id(&self) -> Option<i64> {
        self.message_id
    }

    /// Record a terminal error; the first one wins.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
    }

    /// Persist after a fragment: create the row once there is text, then
    /// overwrite it every `flush_threshold` characters. Failures are logged
    /// and retried on a later fragment.
    pub async fn persist_progress<S: MessageStore>(&mut self, store: &S) {
        match self.message_id {
            None if self.has_text => self.create(store).await,
            Some(id) if self.accumulated_chars - self.flushed_chars >= self.flush_threshold => {
                match store.update_message_content(id, &self.accumulated).await {
                    Ok(true) => {
                        self.flushed_chars = self.accumulated_chars;
                        debug!(message_id = id, len = self.accumulated_chars, "flushed assistant message");
                    }
                    Ok(false) => {
                        warn!(message_id = id, "assistant message vanished mid-stream");
                    }
                    Err(e) => {
                        error!(message_id = id, error = %e, "failed to update assistant message");
                    }
                }
            }
            _ => {}
        }
    }

    /// Final write, run once whether generation succeeded or failed.
    ///
    /// Creates the row if it never got created (or disappeared under us);
    /// does nothing when no visible text was produced.
    pub async fn finalize<S: MessageStore>(&mut self, store: &S) {
        self.finished = true;
        if !self.has_text {
            warn!(chat_id = %self.chat_id, "no assistant content to save");
            return;
        }

        if let Some(id) = self.message_id {
            match store.update_message_content(id, &self.accumulated).await {
                Ok(true) => {
                    self.flushed_chars = self.accumulated_chars;
                    info!(message_id = id, len = self.accumulated_chars, "final update of assistant message");
                    return;
                }
                Ok(false) => {
                    warn!(message_id = id, "assistant message vanished; recreating it");
                }
                Err(e) => {
                    error!(message_id = id, error = %e, "failed final update of assistant message");
                    return;
                }
            }
        }

        self.create(store).await;
    }

    /// `Done` unless an error was recorded.
    pub fn terminal_event(&self) -> StreamEvent {
        match &self.error {
            Some(message) => StreamEvent::Error(message.clone()),
            None => StreamEvent::Done { chat_id: self.chat_id.clone() },
        }
    }

    async fn create<S: MessageStore>(&mut self, store: &S) {
        match store
            .append_message(&self.chat_id, Role::Assistant, &self.accumulated)
            .await
        {
            Ok(record) => {
                self.message_id = Some(record.id);
                self.flushed_chars = self.accumulated_chars;
                info!(
                    message_id = record.id,
                    chat_id = %self.chat_id,
                    len = self.accumulated_chars,
                    "created assistant message"
                );
            }
            Err(e) => {
                error!(chat_id = %self.chat_id, error = %e, "failed to create assistant message");
            }
        }
    }
}
