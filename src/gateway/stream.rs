//! SSE fragment parsing and the streaming relay.
//!
//! The upstream delivers completions as server-sent events: `data: {...}`
//! lines carrying `choices[0].delta.content` fragments, terminated by
//! `data: [DONE]`. [`SseParser`] reassembles complete lines across TCP
//! chunk boundaries and yields one event at a time; [`relay`] pumps the
//! fragments to the caller's channel in arrival order and keeps the full
//! concatenation for the audit record.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

/// Terminal fragment written when the upstream fails mid-stream. The caller
/// sees a reply that ends with this notice instead of a broken connection.
pub const STREAM_FALLBACK_FRAGMENT: &str = "\n\n**Erro:** falha na conexão com a IA.";

/// A line buffer larger than this without a newline is garbage, not SSE.
const MAX_BUFFER: usize = 64 * 1024;

/// One parsed upstream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A piece of generated text, in arrival order.
    Fragment(String),
    /// The upstream's explicit end-of-stream marker.
    Done,
}

/// Pull-based incremental SSE parser.
///
/// Feed raw transport chunks with [`push`](Self::push); each call returns
/// the events completed by that chunk. Partial lines are buffered across
/// calls (capped at 64 KiB), malformed events are skipped, and CRLF line
/// endings are tolerated.
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Process a chunk of bytes, returning any events it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&line[..line.len() - 1]) {
                events.push(event);
            }
        }

        if self.buffer.len() > MAX_BUFFER {
            tracing::warn!(len = self.buffer.len(), "SSE line exceeds cap, dropping buffer");
            self.buffer.clear();
        }

        events
    }

    /// Flush whatever remains in the buffer as a final, newline-less line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line).into_iter().collect()
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one complete SSE line. Non-`data:` fields, comments, empty lines
/// and malformed JSON all yield `None` (skipped, never fatal).
fn parse_line(line: &[u8]) -> Option<SseEvent> {
    let line = std::str::from_utf8(line).ok()?;
    let line = line.strip_suffix('\r').unwrap_or(line);
    let data = line.strip_prefix("data:")?.trim_start();

    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    let parsed: serde_json::Value = serde_json::from_str(data).ok()?;
    let content = parsed
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?;

    if content.is_empty() {
        return None;
    }
    Some(SseEvent::Fragment(content.to_string()))
}

/// Result of pumping one upstream stream to completion (or failure).
#[derive(Debug)]
pub struct RelayOutcome {
    /// Concatenation of every fragment delivered, in order. Recorded for
    /// auditing even when the relay was interrupted.
    pub text: String,
    /// Whether the upstream's `[DONE]` marker was seen.
    pub completed: bool,
}

/// Forward upstream fragments to the caller's channel in arrival order.
///
/// On a transport error mid-stream, one final fallback fragment is written
/// and the relay ends; the error never reaches the caller structurally.
/// A closed receiver just stops the relay (the caller went away).
pub async fn relay<S, E>(mut upstream: S, tx: &mpsc::Sender<String>) -> RelayOutcome
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut parser = SseParser::new();
    let mut text = String::new();

    while let Some(chunk) = upstream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Upstream stream failed mid-relay");
                let _ = tx.send(STREAM_FALLBACK_FRAGMENT.to_string()).await;
                return RelayOutcome {
                    text,
                    completed: false,
                };
            }
        };

        for event in parser.push(&bytes) {
            match event {
                SseEvent::Fragment(fragment) => {
                    text.push_str(&fragment);
                    if tx.send(fragment).await.is_err() {
                        return RelayOutcome {
                            text,
                            completed: false,
                        };
                    }
                }
                SseEvent::Done => {
                    return RelayOutcome {
                        text,
                        completed: true,
                    };
                }
            }
        }
    }

    // Transport exhausted without [DONE]; flush any trailing line.
    let mut completed = false;
    for event in parser.finish() {
        match event {
            SseEvent::Fragment(fragment) => {
                text.push_str(&fragment);
                let _ = tx.send(fragment).await;
            }
            SseEvent::Done => completed = true,
        }
    }

    RelayOutcome { text, completed }
}
