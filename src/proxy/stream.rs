//! Streaming relay.
//!
//! [`SseDecoder`] reassembles upstream SSE events across TCP chunk
//! boundaries. [`relay_sse`] turns the decoded JSON chunks into one
//! `data: <json>\n\n` frame each, in upstream order. [`relay_passthrough`]
//! forwards upstream bytes untouched.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};

/// Upper bound on a single buffered SSE line.
const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Line-buffered decoder for `text/event-stream` bodies.
///
/// Yields the joined `data:` payload of every completed event. Comment lines
/// and `event:`/`id:`/`retry:` fields are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning the payloads of events completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.process_line(&line[..line.len() - 1], &mut events);
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                buffered = self.buffer.len(),
                "Dropping oversized SSE line from upstream"
            );
            self.buffer.clear();
        }

        events
    }

    /// Flush whatever is left once the upstream has closed.
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line, &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn process_line(&mut self, line: &[u8], events: &mut Vec<String>) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Ok(line) = std::str::from_utf8(line) else {
            tracing::warn!("Skipping non UTF-8 SSE line from upstream");
            return;
        };

        if line.is_empty() {
            self.dispatch(events);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.data_lines.push(value.to_string());
        }
    }

    fn dispatch(&mut self, events: &mut Vec<String>) {
        if self.data_lines.is_empty() {
            return;
        }
        events.push(self.data_lines.join("\n"));
        self.data_lines.clear();
    }
}

/// Parse one event payload into a JSON chunk.
///
/// `[DONE]` sentinels and payloads that are not JSON are skipped.
pub fn parse_chunk(data: &str) -> Option<serde_json::Value> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match serde_json::from_str(data) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed chunk from upstream");
            None
        }
    }
}

/// Frame a chunk as a single SSE event.
pub fn sse_frame(chunk: &serde_json::Value) -> Bytes {
    Bytes::from(format!("data: {}\n\n", chunk))
}

struct RelayState<S> {
    upstream: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<serde_json::Value>,
    finished: bool,
    frames: usize,
    log_bodies: bool,
}

impl<S> RelayState<S> {
    fn queue(&mut self, payloads: Vec<String>) {
        self.pending
            .extend(payloads.iter().filter_map(|data| parse_chunk(data)));
    }
}

/// Re-frame an upstream SSE body as one `data: <json>\n\n` frame per chunk.
///
/// The next upstream read happens only once every chunk decoded so far has
/// been yielded. An upstream read error is logged and ends the stream.
pub fn relay_sse<S, E>(
    upstream: S,
    log_bodies: bool,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = RelayState {
        upstream: Box::pin(upstream),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
        frames: 0,
        log_bodies,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                state.frames += 1;
                if state.log_bodies {
                    tracing::debug!(frame = state.frames, chunk = %chunk, "Relaying chunk");
                }
                let frame = sse_frame(&chunk);
                return Some((Ok(frame), state));
            }

            if state.finished {
                tracing::debug!(frames = state.frames, "Upstream stream finished");
                return None;
            }

            match state.upstream.next().await {
                Some(Ok(bytes)) => {
                    let payloads = state.decoder.push(&bytes);
                    state.queue(payloads);
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, frames = state.frames, "Error streaming from upstream");
                    state.finished = true;
                    state.pending.clear();
                    return Some((Err(std::io::Error::other(e.to_string())), state));
                }
                None => {
                    let payloads = state.decoder.finish();
                    state.queue(payloads);
                    state.finished = true;
                }
            }
        }
    })
}

/// Forward upstream bytes unchanged.
pub fn relay_passthrough<S, E>(
    upstream: S,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    upstream.map(|chunk| {
        chunk.map_err(|e| {
            tracing::error!(error = %e, "Error streaming from upstream");
            std::io::Error::other(e.to_string())
        })
    })
}
