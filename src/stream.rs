//! The stream parser: turns a sequence of provider [`Chunk`]s into a sequence of
//! [`ParserEvent`]s, decoding inline gadget-call markers out of plain text deltas.
//!
//! ## Marker syntax
//!
//! A gadget call is delimited by an opening marker `<gadget:NAME>` and a closing marker
//! `</gadget>`. The body between them is either:
//!
//! - **Structured form**: a one-line type hint (`json`, `yaml`, or `toml`) followed by a
//!   newline and a single block in that format, deserialized directly into the call's
//!   argument object. Only `json` is implemented; `yaml`/`toml` hints are recognized but
//!   rejected with a clear error, since this crate does not depend on a YAML/TOML parser
//!   (see `DESIGN.md`).
//! - **Block form**: zero or more `ARG:<path>\n<value>\n` preludes, each one setting a
//!   single leaf in the call's argument object at the given JSON-pointer-style path.
//!
//! Plain text outside of markers is surfaced as [`ParserEvent::Text`]. Assistant text
//! is always flushed before any gadget-call event from the same turn, regardless of how
//! the raw stream interleaved them — this keeps per-turn history shape stable.
//!
//! ## Provider-native tool calls
//!
//! Some OpenAI-compatible servers report tool calls structurally instead of as inline
//! text (see [`crate::utils::ToolCallAggregator`]). When a [`Chunk`] already carries
//! `gadget_calls`, the parser emits them directly as [`ParserEvent::GadgetCall`] without
//! running the marker scanner, converging on the same event type as the inline path.

use crate::error::{Error, Result};
use crate::schema::set_by_pointer;
use crate::types::{TokenUsage, ToolUseBlock};
use serde_json::Value;
use uuid::Uuid;

const OPEN_PREFIX: &str = "<gadget:";
const CLOSE_MARKER: &str = "</gadget>";

/// An event produced by the stream parser.
#[derive(Debug, Clone)]
pub enum ParserEvent {
    /// Plain assistant text, already de-interleaved from any gadget markers.
    Text(String),
    /// A complete, decoded gadget call.
    GadgetCall(ToolUseBlock),
    /// Model "thinking"/reasoning content, when the provider separates it from the
    /// final answer (not all providers emit this).
    Thinking(String),
    /// Token usage reported for the turn so far.
    Usage(TokenUsage),
    /// The turn finished, carrying the provider's raw finish reason if any.
    Finish(Option<String>),
    /// A gadget marker could not be parsed; the raw body is preserved for diagnostics.
    ParseError(String),
}

#[derive(Debug, PartialEq, Eq)]
enum State {
    /// Scanning plain text for the next opening marker.
    Text,
    /// Inside `<gadget:NAME>`, reading the body up to `</gadget>`.
    InMarker { name: String },
}

/// Incremental marker scanner. Feed it text deltas from successive [`Chunk`]s; it
/// buffers across chunk boundaries so a marker split mid-stream is still parsed
/// correctly.
pub struct StreamParser {
    state: State,
    buffer: String,
    text_out: String,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            state: State::Text,
            buffer: String::new(),
            text_out: String::new(),
        }
    }

    /// Feed one chunk into the parser, returning the events it produced. Gadget-call
    /// events are always preceded by any buffered text from the same call.
    pub fn feed_chunk(&mut self, chunk: &crate::provider::Chunk) -> Vec<ParserEvent> {
        let mut events = Vec::new();

        if let Some(text) = &chunk.text {
            events.extend(self.feed_text(text));
        }

        for call in &chunk.gadget_calls {
            events.push(ParserEvent::GadgetCall(call.clone()));
        }

        if let Some(usage) = chunk.usage {
            events.push(ParserEvent::Usage(usage));
        }

        if let Some(reason) = &chunk.finish_reason {
            events.extend(self.flush_text());
            events.push(ParserEvent::Finish(Some(reason.clone())));
        }

        events
    }

    /// Feed a raw text delta (used when the provider never separates gadget calls from
    /// inline text, i.e. the marker path).
    pub fn feed_text(&mut self, delta: &str) -> Vec<ParserEvent> {
        self.buffer.push_str(delta);
        self.drain_buffer()
    }

    /// Flush any buffered plain text as a final [`ParserEvent::Text`]. Called at end of
    /// stream, or explicitly before a finish marker so text always precedes gadget calls.
    pub fn flush_text(&mut self) -> Vec<ParserEvent> {
        if self.text_out.is_empty() {
            Vec::new()
        } else {
            let text = std::mem::take(&mut self.text_out);
            vec![ParserEvent::Text(text)]
        }
    }

    fn drain_buffer(&mut self) -> Vec<ParserEvent> {
        let mut events = Vec::new();

        loop {
            match &self.state {
                State::Text => {
                    if let Some(idx) = self.buffer.find(OPEN_PREFIX) {
                        // Everything before the marker is plain text.
                        self.text_out.push_str(&self.buffer[..idx]);
                        self.buffer.drain(..idx + OPEN_PREFIX.len());

                        match self.buffer.find('>') {
                            Some(end) => {
                                let name = self.buffer[..end].to_string();
                                self.buffer.drain(..=end);
                                if !self.text_out.is_empty() {
                                    events.push(ParserEvent::Text(std::mem::take(&mut self.text_out)));
                                }
                                self.state = State::InMarker { name };
                            }
                            None => {
                                // Marker name not fully arrived yet; wait for more data,
                                // re-inserting the consumed prefix so the next feed sees it.
                                let mut restored = String::from(OPEN_PREFIX);
                                restored.push_str(&self.buffer);
                                self.buffer = restored;
                                break;
                            }
                        }
                    } else {
                        // No marker prefix present. Keep the tail in case it is a partial
                        // prefix of `<gadget:` split across chunks.
                        let keep = longest_partial_prefix_len(&self.buffer, OPEN_PREFIX);
                        let flush_len = self.buffer.len() - keep;
                        self.text_out.push_str(&self.buffer[..flush_len]);
                        self.buffer.drain(..flush_len);
                        break;
                    }
                }
                State::InMarker { name } => {
                    if let Some(idx) = self.buffer.find(CLOSE_MARKER) {
                        let body = self.buffer[..idx].to_string();
                        self.buffer.drain(..idx + CLOSE_MARKER.len());
                        let name = name.clone();
                        match parse_marker_body(&name, &body) {
                            Ok(call) => events.push(ParserEvent::GadgetCall(call)),
                            Err(e) => events.push(ParserEvent::ParseError(e.to_string())),
                        }
                        self.state = State::Text;
                    } else {
                        break;
                    }
                }
            }
        }

        events
    }
}

/// Length of the longest suffix of `buf` that is a prefix of `needle` (used to hold
/// back a partial marker prefix that may complete once more text arrives).
fn longest_partial_prefix_len(buf: &str, needle: &str) -> usize {
    let max = buf.len().min(needle.len().saturating_sub(1));
    for len in (1..=max).rev() {
        if needle.as_bytes().starts_with(&buf.as_bytes()[buf.len() - len..]) {
            return len;
        }
    }
    0
}

fn parse_marker_body(name: &str, body: &str) -> Result<ToolUseBlock> {
    let trimmed = body.trim_start_matches('\n');
    let (first_line, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));

    let input = match first_line.trim() {
        "json" => serde_json::from_str::<Value>(rest.trim())
            .map_err(|e| Error::stream(format!("invalid json body for gadget '{}': {}", name, e)))?,
        "yaml" | "toml" => {
            return Err(Error::stream(format!(
                "gadget '{}' used a '{}' structured body, which this parser does not support",
                name, first_line.trim()
            )));
        }
        _ => parse_block_form(body)?,
    };

    Ok(ToolUseBlock::new(Uuid::new_v4().to_string(), name, input))
}

/// Parse repeated `ARG:<path>\n<value>\n` preludes into a single arguments object.
fn parse_block_form(body: &str) -> Result<Value> {
    let mut root = Value::Object(serde_json::Map::new());
    let mut lines = body.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(path) = line.strip_prefix("ARG:") else {
            if line.trim().is_empty() {
                continue;
            }
            return Err(Error::stream(format!(
                "expected 'ARG:<path>' line in block-form gadget call, got '{}'",
                line
            )));
        };
        let path = path.trim();

        let mut value_lines = Vec::new();
        while let Some(next) = lines.peek() {
            if next.starts_with("ARG:") {
                break;
            }
            value_lines.push(lines.next().unwrap());
        }
        let raw_value = value_lines.join("\n");

        let value = serde_json::from_str::<Value>(raw_value.trim())
            .unwrap_or_else(|_| Value::String(raw_value.trim().to_string()));

        set_by_pointer(&mut root, path, value)?;
    }

    Ok(root)
}
