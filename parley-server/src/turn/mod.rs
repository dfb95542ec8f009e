//! Streaming turn coordinator.
//!
//! One turn = one generation relayed to one client while the assistant
//! message is persisted incrementally. Two tasks cooperate:
//!
//! - the **producer** (spawned, detached) owns the generator stream, the
//!   [`GenerationSession`] and every store write of the turn. It enqueues a
//!   `Content` event per fragment *before* persisting, so a slow write can
//!   only delay the next fragment, never one already queued;
//! - the **consumer** is the returned [`TurnStream`], which drains the
//!   channel for the HTTP response.
//!
//! The producer finishes with the final write and then enqueues exactly one
//! terminal event (`Done` or `Error`). Dropping the consumer (client gone)
//! leaves the producer running to completion, so the assistant message is
//! saved regardless.

pub mod registry;
pub mod session;

pub use registry::{TurnLease, TurnRegistry};
pub use session::GenerationSession;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::entities::MessageStore;
use crate::generation::{GenerationError, Generator, PromptMessage};

/// What the client observes during a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content(String),
    Done { chat_id: String },
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Content(_))
    }
}

/// Consumer side of a turn: `Content*` followed by exactly one terminal event.
pub type TurnStream = BoxStream<'static, StreamEvent>;

/// Input of one turn.
#[derive(Debug)]
pub struct TurnRequest {
    /// Must reference an existing chat.
    pub chat_id: String,
    pub model: String,
    /// Prompt context, system preamble included.
    pub messages: Vec<PromptMessage>,
    /// Held until the producer finishes.
    pub lease: Option<TurnLease>,
}

/// Starts turns against a store and a generator.
pub struct StreamingCoordinator<S> {
    store: Arc<S>,
    generator: Arc<dyn Generator>,
    flush_threshold: usize,
}

impl<S: MessageStore> StreamingCoordinator<S> {
    pub fn new(store: Arc<S>, generator: Arc<dyn Generator>, flush_threshold: usize) -> Self {
        Self { store, generator, flush_threshold }
    }

    /// Spawn the producer for `request` and return the consumer stream.
    pub fn start(&self, request: TurnRequest) -> TurnStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let span = info_span!("turn", chat_id = %request.chat_id, model = %request.model);

        let producer = tokio::spawn(
            produce(
                Arc::clone(&self.store),
                Arc::clone(&self.generator),
                request,
                self.flush_threshold,
                tx,
            )
            .instrument(span),
        );

        relay(rx, producer)
    }
}

// ── producer ─────────────────────────────────────────────────────────────────

async fn produce<S: MessageStore>(
    store: Arc<S>,
    generator: Arc<dyn Generator>,
    request: TurnRequest,
    flush_threshold: usize,
    tx: mpsc::UnboundedSender<StreamEvent>,
) {
    let TurnRequest { chat_id, model, messages, lease } = request;
    let mut session = GenerationSession::new(chat_id, flush_threshold);

    let generated = AssertUnwindSafe(generate_into(
        store.as_ref(),
        generator.as_ref(),
        &model,
        &messages,
        &mut session,
        &tx,
    ))
    .catch_unwind()
    .await
    .unwrap_or(Err(GenerationError::Panicked));

    if let Err(e) = generated {
        warn!(error = %e, len = session.text().len(), "generation stopped early");
        session.fail(e.to_string());
    }

    session.finalize(store.as_ref()).await;

    if tx.send(session.terminal_event()).is_err() {
        debug!("client gone before the terminal event");
    }
    if let Some(lease) = lease {
        debug!(chat_id = lease.chat_id(), "releasing turn");
    }
}

async fn generate_into<S: MessageStore>(
    store: &S,
    generator: &dyn Generator,
    model: &str,
    messages: &[PromptMessage],
    session: &mut GenerationSession,
    tx: &mpsc::UnboundedSender<StreamEvent>,
) -> Result<(), GenerationError> {
    let mut fragments = generator.generate(model, messages).await?;
    let mut client_attached = true;

    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        if fragment.is_empty() {
            continue;
        }

        if tx.send(StreamEvent::Content(fragment.clone())).is_err() && client_attached {
            client_attached = false;
            debug!("client disconnected; generation continues for persistence");
        }

        session.push(&fragment);
        session.persist_progress(store).await;
    }
    Ok(())
}

// ── consumer ─────────────────────────────────────────────────────────────────

struct Relay {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    producer: Option<JoinHandle<()>>,
    terminated: bool,
}

/// Drain the producer's channel until its terminal event.
///
/// If the channel closes without one, the producer died; its join result
/// decides the synthesized `Error`. Dropping the stream detaches the producer
/// instead of aborting it.
fn relay(rx: mpsc::UnboundedReceiver<StreamEvent>, producer: JoinHandle<()>) -> TurnStream {
    let relay = Relay { rx, producer: Some(producer), terminated: false };

    futures::stream::unfold(relay, |mut relay| async move {
        if relay.terminated {
            return None;
        }

        let event = match relay.rx.recv().await {
            Some(event) => event,
            None => {
                let reason = match relay.producer.take() {
                    Some(handle) => match handle.await {
                        Err(e) if e.is_panic() => "generation task panicked".to_owned(),
                        Err(e) => format!("generation task aborted: {e}"),
                        Ok(()) => "generation ended without a result".to_owned(),
                    },
                    None => "generation ended without a result".to_owned(),
                };
                error!(reason = %reason, "turn producer exited without a terminal event");
                StreamEvent::Error(reason)
            }
        };

        relay.terminated = event.is_terminal();
        Some((event, relay))
    })
    .boxed()
}
