//! # Server-Sent Event Framing
//!
//! Incremental `text/event-stream` decoder. Chunks may split lines, CRLF
//! pairs or multi-byte characters anywhere; the decoder buffers until a full
//! line is available and emits events on blank lines.

use std::collections::VecDeque;

use futures_util::StreamExt;

use crate::core::ports::ByteStream;
use crate::errors::{IngestError, IngestResult};
use crate::model::SseEvent;

const DEFAULT_EVENT_TYPE: &str = "message";

/// Line-oriented SSE parser state.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    /// Previous byte was CR; a directly following LF belongs to it.
    after_cr: bool,
    started: bool,
    data: String,
    saw_data: bool,
    event: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes a chunk and returns every event it completed, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut out = Vec::new();
        for &byte in chunk {
            match byte {
                b'\n' if self.after_cr => {
                    self.after_cr = false;
                }
                b'\n' | b'\r' => {
                    self.after_cr = byte == b'\r';
                    let raw = std::mem::take(&mut self.line);
                    if let Some(event) = self.process_line(&raw) {
                        out.push(event);
                    }
                }
                _ => {
                    self.after_cr = false;
                    self.line.push(byte);
                }
            }
        }
        out
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<SseEvent> {
        let decoded = String::from_utf8_lossy(raw);
        let mut line: &str = &decoded;
        if !self.started {
            self.started = true;
            line = line.strip_prefix('\u{feff}').unwrap_or(line);
        }

        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                if self.saw_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.saw_data = true;
            }
            "event" => self.event = Some(value.to_string()),
            "id" if !value.contains('\0') => self.id = Some(value.to_string()),
            "retry" if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                self.retry = value.parse().ok();
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let saw_data = std::mem::take(&mut self.saw_data);
        let data = std::mem::take(&mut self.data);
        let event = self.event.take();
        let id = self.id.take();
        let retry = self.retry.take();

        if !saw_data && event.is_none() {
            return None;
        }
        Some(SseEvent {
            id,
            event: event.filter(|e| !e.is_empty()).unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            data,
            retry,
        })
    }
}

/// Ordered, non-restartable event sequence over a body stream.
pub struct SseStream {
    inner: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

impl SseStream {
    pub fn new(inner: ByteStream) -> Self {
        Self { inner, decoder: SseDecoder::new(), pending: VecDeque::new(), finished: false }
    }

    /// Next complete event; `None` once the body has ended.
    ///
    /// A body error is yielded once as `Transport` and ends the sequence.
    pub async fn next_event(&mut self) -> Option<IngestResult<SseEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.finished {
                return None;
            }
            match self.inner.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.decoder.feed(&chunk)),
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(match e {
                        IngestError::Transport(msg) => IngestError::Transport(msg),
                        other => IngestError::Transport(other.to_string()),
                    }));
                }
                None => {
                    self.finished = true;
                    tracing::debug!("Event stream body ended");
                }
            }
        }
    }
}
