//! Ollama `/api/chat` client.
//!
//! With `"stream": true` Ollama answers with newline-delimited JSON, one
//! object per generated chunk:
//!
//! ```text
//! {"model":"gemma3:1b","message":{"role":"assistant","content":"Hel"},"done":false}
//! {"model":"gemma3:1b","message":{"role":"assistant","content":""},"done":true,...}
//! ```
//!
//! Failures after the stream opened arrive as `{"error": "..."}` lines.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{FragmentStream, GenerationError, Generator, PromptMessage};

#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl Generator for OllamaClient {
    async fn generate(
        &self,
        model: &str,
        messages: &[PromptMessage],
    ) -> Result<FragmentStream, GenerationError> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(%url, model, messages = messages.len(), "opening generation stream");

        let response = self
            .http
            .post(&url)
            .json(&ChatRequest { model, messages, stream: true })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ChatChunk>(&body)
                .ok()
                .and_then(|c| c.error)
                .unwrap_or(body);
            return Err(GenerationError::Status { status: status.as_u16(), message });
        }

        Ok(decode_ndjson(response.bytes_stream()))
    }
}

// ── NDJSON decoding ───────────────────────────────────────────────────────────

enum Line {
    Skip,
    Fragment(String),
    Done(Option<String>),
    Failed(GenerationError),
}

fn parse_line(raw: &[u8]) -> Line {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Line::Skip;
    }
    let chunk: ChatChunk = match serde_json::from_slice(raw) {
        Ok(c) => c,
        Err(e) => return Line::Failed(e.into()),
    };
    if let Some(err) = chunk.error {
        return Line::Failed(GenerationError::Runtime(err));
    }
    let content = chunk.message.map(|m| m.content).unwrap_or_default();
    match (chunk.done, content.is_empty()) {
        (true, true) => Line::Done(None),
        (true, false) => Line::Done(Some(content)),
        (false, true) => Line::Skip,
        (false, false) => Line::Fragment(content),
    }
}

struct Decoder<S> {
    body: Pin<Box<S>>,
    buf: Vec<u8>,
    finished: bool,
}

/// Turn a byte stream of newline-delimited chat chunks into text fragments.
///
/// Chunk boundaries of the transport are arbitrary; lines are reassembled
/// before decoding. The stream ends after a `done` line, the first error, or
/// the end of the body.
pub(crate) fn decode_ndjson<S, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<GenerationError> + Send + 'static,
{
    let decoder = Decoder { body: Box::pin(body), buf: Vec::new(), finished: false };

    futures::stream::unfold(decoder, |mut dec| async move {
        loop {
            if dec.finished {
                return None;
            }

            if let Some(pos) = dec.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = dec.buf.drain(..=pos).collect();
                match parse_line(&line) {
                    Line::Skip => continue,
                    Line::Fragment(text) => return Some((Ok(text), dec)),
                    Line::Done(tail) => {
                        dec.finished = true;
                        return tail.map(|text| (Ok(text), dec));
                    }
                    Line::Failed(e) => {
                        dec.finished = true;
                        return Some((Err(e), dec));
                    }
                }
            }

            match dec.body.next().await {
                Some(Ok(bytes)) => dec.buf.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    dec.finished = true;
                    return Some((Err(e.into()), dec));
                }
                None => {
                    // Body ended; a final line may lack its trailing newline.
                    dec.finished = true;
                    let rest = std::mem::take(&mut dec.buf);
                    return match parse_line(&rest) {
                        Line::Fragment(text) | Line::Done(Some(text)) => Some((Ok(text), dec)),
                        Line::Failed(e) => Some((Err(e), dec)),
                        Line::Skip | Line::Done(None) => None,
                    };
                }
            }
        }
    })
    .boxed()
}
