//! Incremental reconciliation of newline-delimited response fragments.
//!
//! Network reads may split a logical line anywhere, including inside a
//! multi-byte UTF-8 character, so the buffer holds raw bytes and a line is
//! only decoded once its terminator has arrived.

use serde_json::Value;
use tracing::{debug, trace};

use crate::config::StreamConfig;

// MARK: - Items

/// One element of a reconciled stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// Text appended to the message since the previous item.
    Delta(String),
    /// Terminal element; always the last item.
    Final(FinalMessage),
}

/// The complete message once the upstream has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalMessage {
    /// Accumulated text, or the configured placeholder when nothing arrived.
    pub text: String,
    /// First correlation identifier seen in the stream.
    pub id: Option<String>,
    /// `false` when `text` is the placeholder.
    pub produced: bool,
}

impl FinalMessage {
    #[must_use]
    pub fn is_empty_response(&self) -> bool {
        !self.produced
    }
}

/// How lines are framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Every line is a fragment.
    #[default]
    Ndjson,
    /// Only `data:` lines carry fragments; other SSE fields are ignored.
    Sse,
}

// MARK: - Reconciler

/// Push-style reconciler: feed it chunks, then finish it once.
#[derive(Debug)]
pub struct StreamReconciler {
    config: StreamConfig,
    framing: Framing,
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no terminator.
    scanned: usize,
    /// Dropping the rest of an oversized line.
    discarding: bool,
    accumulated: String,
    extracted_id: Option<String>,
    anomalies: usize,
    finished: bool,
}

impl StreamReconciler {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            framing: Framing::Ndjson,
            buffer: Vec::new(),
            scanned: 0,
            discarding: false,
            accumulated: String::new(),
            extracted_id: None,
            anomalies: 0,
            finished: false,
        }
    }

    #[must_use]
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated
    }

    pub fn extracted_id(&self) -> Option<&str> {
        self.extracted_id.as_deref()
    }

    /// Fragments that were neither structured nor text.
    pub fn anomalies(&self) -> usize {
        self.anomalies
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume a chunk and return the deltas for every line it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamItem> {
        let mut items = Vec::new();
        if self.finished {
            return items;
        }

        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.extend_from_slice(chunk);

        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = buffer[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            if self.discarding {
                self.discarding = false;
            } else {
                self.complete_line(&buffer[start..end], &mut items);
            }
            start = end + 1;
            from = start;
        }
        buffer.drain(..start);

        if buffer.len() > self.config.max_line_bytes {
            if !self.discarding {
                self.anomaly("line exceeds max_line_bytes");
                self.discarding = true;
            }
            buffer.clear();
        }
        self.scanned = buffer.len();
        self.buffer = buffer;
        items
    }

    /// Flush the trailing partial line and emit the final message.
    ///
    /// Returns nothing on a second call.
    pub fn finish(&mut self) -> Vec<StreamItem> {
        let mut items = Vec::new();
        if self.finished {
            return items;
        }
        self.finished = true;

        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if self.discarding {
            self.discarding = false;
        } else if !rest.is_empty() {
            self.complete_line(&rest, &mut items);
        }

        let produced = !self.accumulated.is_empty();
        let text = if produced {
            self.accumulated.clone()
        } else {
            self.config.empty_response_text.clone()
        };
        debug!(
            chars = self.accumulated.len(),
            has_id = self.extracted_id.is_some(),
            anomalies = self.anomalies,
            "Stream finished"
        );
        items.push(StreamItem::Final(FinalMessage {
            text,
            id: self.extracted_id.clone(),
            produced,
        }));
        items
    }

    fn complete_line(&mut self, raw: &[u8], items: &mut Vec<StreamItem>) {
        if raw.len() > self.config.max_line_bytes {
            self.anomaly("line exceeds max_line_bytes");
        } else {
            self.process_line(raw, items);
        }
    }

    fn process_line(&mut self, raw: &[u8], items: &mut Vec<StreamItem>) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            return;
        }
        let Ok(line) = std::str::from_utf8(raw) else {
            self.anomaly("line is not valid UTF-8");
            return;
        };

        let fragment = match self.framing {
            Framing::Ndjson => line,
            Framing::Sse => match line.strip_prefix("data:") {
                Some(data) => data.strip_prefix(' ').unwrap_or(data),
                None => return,
            },
        };
        if fragment.is_empty() || (self.framing == Framing::Sse && fragment == "[DONE]") {
            return;
        }
        trace!(fragment, "Stream fragment");

        match serde_json::from_str::<Value>(fragment) {
            Ok(Value::Object(object)) => {
                if let Some(Value::String(content)) = object.get(&self.config.content_field) {
                    self.push_delta(content, items);
                }
                if self.extracted_id.is_none() {
                    if let Some(Value::String(id)) = object.get(&self.config.id_field) {
                        if !id.is_empty() {
                            self.extracted_id = Some(id.clone());
                        }
                    }
                }
            }
            Ok(Value::String(text)) => self.push_delta(&text, items),
            Ok(_) => self.anomaly("fragment is a JSON value without content"),
            Err(_) => self.push_delta(fragment, items),
        }
    }

    fn push_delta(&mut self, text: &str, items: &mut Vec<StreamItem>) {
        if text.is_empty() {
            return;
        }
        self.accumulated.push_str(text);
        items.push(StreamItem::Delta(text.to_string()));
    }

    fn anomaly(&mut self, what: &str) {
        self.anomalies += 1;
        debug!(what, "Ignoring unreadable stream fragment");
    }
}
