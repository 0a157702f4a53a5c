//! Streaming utilities for SSE parsing and provider-native tool-call delta aggregation.
//!
//! This module handles the low-level mechanics of the default OpenAI-compatible provider
//! adapter: turning a raw HTTP response into a stream of [`OpenAIChunk`]s, and reassembling
//! the incremental tool-call deltas some servers emit into complete [`ContentBlock`]s.
//!
//! Gadget calls encoded as inline text markers (the marker syntax in [`crate::stream`]) do
//! not go through this module — this is specifically the provider-native delta path.

use crate::error::{Error, Result};
use crate::types::{ContentBlock, OpenAIChunk, TextBlock, ToolUseBlock};
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;

/// Aggregates streaming tool-call deltas into complete content blocks.
///
/// Tool calls arrive as incremental deltas spread across multiple chunks, keyed by a
/// provider-assigned `index`. This accumulator buffers text and tool-call deltas and only
/// emits complete [`ContentBlock`]s once a chunk's `finish_reason` is set.
pub struct ToolCallAggregator {
    text_buffer: String,
    tool_calls: HashMap<u32, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl Default for ToolCallAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallAggregator {
    pub fn new() -> Self {
        Self {
            text_buffer: String::new(),
            tool_calls: HashMap::new(),
        }
    }

    /// Process one chunk, returning completed blocks only once `finish_reason` is present.
    pub fn process_chunk(&mut self, chunk: OpenAIChunk) -> Result<Vec<ContentBlock>> {
        let mut blocks = Vec::new();

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                self.text_buffer.push_str(&content);
            }

            if let Some(tool_calls) = choice.delta.tool_calls {
                for tool_call in tool_calls {
                    let entry = self.tool_calls.entry(tool_call.index).or_default();

                    if let Some(id) = tool_call.id {
                        entry.id = Some(id);
                    }

                    if let Some(function) = tool_call.function {
                        if let Some(name) = function.name {
                            entry.name = Some(name);
                        }
                        if let Some(args) = function.arguments {
                            entry.arguments.push_str(&args);
                        }
                    }
                }
            }

            if choice.finish_reason.is_some() {
                if !self.text_buffer.is_empty() {
                    blocks.push(ContentBlock::Text(TextBlock::new(self.text_buffer.clone())));
                    self.text_buffer.clear();
                }

                for (_, partial) in self.tool_calls.drain() {
                    if let (Some(id), Some(name)) = (partial.id, partial.name) {
                        let input: serde_json::Value = if partial.arguments.is_empty() {
                            serde_json::json!({})
                        } else {
                            serde_json::from_str(&partial.arguments).map_err(|e| {
                                Error::stream(format!("failed to parse tool arguments: {}", e))
                            })?
                        };

                        blocks.push(ContentBlock::ToolUse(ToolUseBlock::new(id, name, input)));
                    }
                }
            }
        }

        Ok(blocks)
    }
}

/// Parse a raw HTTP response body as a Server-Sent Events stream of [`OpenAIChunk`]s.
///
/// Each event's `data` field carries one JSON chunk; `data: [DONE]` signals stream end
/// and is skipped rather than parsed. `eventsource-stream` owns the line-buffering, so an
/// event split across `bytes_stream()` chunks (or a chunk carrying several events) is
/// handled correctly rather than only seeing the first event per chunk.
pub fn parse_sse_stream(
    body: reqwest::Response,
) -> Pin<Box<dyn Stream<Item = Result<OpenAIChunk>> + Send>> {
    let stream = body.bytes_stream().eventsource().filter_map(|result| async move {
        let event = match result {
            Ok(event) => event,
            Err(e) => return Some(Err(Error::stream(format!("SSE stream error: {}", e)))),
        };

        if event.data == "[DONE]" {
            return None;
        }

        let chunk: OpenAIChunk = match serde_json::from_str(&event.data) {
            Ok(c) => c,
            Err(e) => return Some(Err(Error::stream(format!("failed to parse chunk: {}", e)))),
        };

        Some(Ok(chunk))
    });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OpenAIChoice, OpenAIDelta, OpenAIFunctionDelta, OpenAIToolCallDelta};

    fn chunk(choices: Vec<OpenAIChoice>) -> OpenAIChunk {
        OpenAIChunk {
            id: "test".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "test".to_string(),
            choices,
            usage: None,
        }
    }

    #[test]
    fn aggregates_text_across_chunks() {
        let mut aggregator = ToolCallAggregator::new();

        let blocks = aggregator
            .process_chunk(chunk(vec![OpenAIChoice {
                index: 0,
                delta: OpenAIDelta {
                    role: None,
                    content: Some("Hello ".to_string()),
                    tool_calls: None,
                },
                finish_reason: None,
            }]))
            .unwrap();
        assert_eq!(blocks.len(), 0);

        let blocks = aggregator
            .process_chunk(chunk(vec![OpenAIChoice {
                index: 0,
                delta: OpenAIDelta {
                    role: None,
                    content: Some("world".to_string()),
                    tool_calls: None,
                },
                finish_reason: Some("stop".to_string()),
            }]))
            .unwrap();
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            ContentBlock::Text(text) => assert_eq!(text.text, "Hello world"),
            _ => panic!("expected text block"),
        }
    }

    #[test]
    fn aggregates_tool_call_across_chunks() {
        let mut aggregator = ToolCallAggregator::new();

        let blocks = aggregator
            .process_chunk(chunk(vec![OpenAIChoice {
                index: 0,
                delta: OpenAIDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![OpenAIToolCallDelta {
                        index: 0,
                        id: Some("call_123".to_string()),
                        call_type: Some("function".to_string()),
                        function: Some(OpenAIFunctionDelta {
                            name: Some("get_weather".to_string()),
                            arguments: Some(r#"{"location":"#.to_string()),
                        }),
                    }]),
                },
                finish_reason: None,
            }]))
            .unwrap();
        assert_eq!(blocks.len(), 0);

        let blocks = aggregator
            .process_chunk(chunk(vec![OpenAIChoice {
                index: 0,
                delta: OpenAIDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![OpenAIToolCallDelta {
                        index: 0,
                        id: None,
                        call_type: None,
                        function: Some(OpenAIFunctionDelta {
                            name: None,
                            arguments: Some(r#""Paris"}"#.to_string()),
                        }),
                    }]),
                },
                finish_reason: Some("tool_calls".to_string()),
            }]))
            .unwrap();
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            ContentBlock::ToolUse(tool) => {
                assert_eq!(tool.id, "call_123");
                assert_eq!(tool.name, "get_weather");
                assert_eq!(tool.input["location"], "Paris");
            }
            _ => panic!("expected tool use block"),
        }
    }

    #[test]
    fn incomplete_tool_call_is_dropped() {
        let mut aggregator = ToolCallAggregator::new();
        let blocks = aggregator
            .process_chunk(chunk(vec![OpenAIChoice {
                index: 0,
                delta: OpenAIDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![OpenAIToolCallDelta {
                        index: 0,
                        id: None,
                        call_type: None,
                        function: Some(OpenAIFunctionDelta {
                            name: None,
                            arguments: Some("{}".to_string()),
                        }),
                    }]),
                },
                finish_reason: Some("tool_calls".to_string()),
            }]))
            .unwrap();
        assert!(blocks.is_empty());
    }
}
