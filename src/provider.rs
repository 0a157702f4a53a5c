//! The provider adapter interface: the seam between the agent loop and whatever LLM
//! backend is actually serving completions. The loop only ever talks to this trait;
//! everything provider-specific (auth, wire format, endpoint shape) lives behind it.
//!
//! A default OpenAI-compatible adapter (`OpenAiCompatibleProvider`) is included for
//! local servers such as LM Studio, Ollama, llama.cpp, and vLLM.

use crate::error::{Error, Result};
use crate::gadget::GadgetDescriptor;
use crate::types::{Message, MessageRole, OpenAIContent, TokenUsage};
use crate::utils::parse_sse_stream;
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::pin::Pin;

/// A capability a provider adapter may or may not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFeature {
    Vision,
    Audio,
    ParallelGadgetCalls,
}

/// A single request to stream a completion for.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub gadgets: Vec<GadgetDescriptor>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// One piece of a streamed completion. A provider adapter emits a sequence of these;
/// the stream parser in [`crate::stream`] turns them into [`crate::stream::ParserEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub text: Option<String>,
    /// Raw gadget-call deltas in whatever shape the provider emits them, already
    /// reassembled into complete tool-use blocks where possible (see
    /// [`crate::utils::ToolCallAggregator`] for the OpenAI-compatible path).
    pub gadget_calls: Vec<crate::types::ToolUseBlock>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// The adapter interface between the agent loop and an LLM backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a completion for the given request.
    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<Chunk>> + Send>>>;

    /// Whether this adapter supports a given capability. Defaults to unsupported.
    fn supports(&self, _feature: ProviderFeature) -> bool {
        false
    }

    /// Approximate the token count of a string. Defaults to the common ~4-chars-per-token
    /// heuristic; adapters with a real tokenizer should override this.
    fn count_tokens(&self, text: &str) -> usize {
        (text.len() / 4).max(1)
    }

    /// Generate an image from a prompt, if supported.
    async fn generate_image(&self, _prompt: &str) -> Result<crate::types::MediaSource> {
        Err(Error::other("this provider does not support image generation"))
    }

    /// Generate speech audio from text, if supported.
    async fn generate_speech(&self, _text: &str) -> Result<crate::types::MediaSource> {
        Err(Error::other("this provider does not support speech generation"))
    }
}

/// Default adapter for OpenAI-compatible `/chat/completions` servers (LM Studio, Ollama,
/// llama.cpp, vLLM).
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn message_content(message: &Message) -> OpenAIContent {
        let has_media = message
            .content
            .iter()
            .any(|b| matches!(b, crate::types::ContentBlock::Image(_) | crate::types::ContentBlock::Audio(_)));

        if !has_media {
            let text = message
                .content
                .iter()
                .filter_map(|b| match b {
                    crate::types::ContentBlock::Text(t) => Some(t.text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            return OpenAIContent::Text(text);
        }

        let parts = message
            .content
            .iter()
            .filter_map(|b| match b {
                crate::types::ContentBlock::Text(t) => {
                    Some(crate::types::OpenAIContentPart::text(t.text.clone()))
                }
                crate::types::ContentBlock::Image(img) => Some(
                    crate::types::OpenAIContentPart::image_url(img.url(), img.detail),
                ),
                _ => None,
            })
            .collect();
        OpenAIContent::Parts(parts)
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: OpenAIContent,
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<Chunk>> + Send>>> {
        let messages = request
            .messages
            .iter()
            .map(|m| ChatMessage {
                role: match m.role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                    MessageRole::Tool => "tool",
                },
                content: Self::message_content(m),
            })
            .collect();

        let body = ChatRequest {
            model: request.model,
            messages,
            stream: true,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: Vec::new(),
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut req = self.client.post(url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();
            let suffix = retry_after
                .map(|s| format!(" (retry-after={}s)", s))
                .unwrap_or_default();
            return Err(Error::api(format!("{}{}: {}", status, suffix, text)));
        }

        let sse = parse_sse_stream(response);
        let mut aggregator = crate::utils::ToolCallAggregator::new();

        let chunk_stream = sse.map(move |result| {
            let oac = result?;
            let usage = oac.usage.map(TokenUsage::from);
            let finish_reason = oac
                .choices
                .first()
                .and_then(|c| c.finish_reason.clone());
            let blocks = aggregator.process_chunk(oac)?;

            let mut text = None;
            let mut gadget_calls = Vec::new();
            for block in blocks {
                match block {
                    crate::types::ContentBlock::Text(t) => text = Some(t.text),
                    crate::types::ContentBlock::ToolUse(tu) => gadget_calls.push(tu),
                    _ => {}
                }
            }

            Ok(Chunk {
                text,
                gadget_calls,
                finish_reason,
                usage,
            })
        });

        Ok(Box::pin(chunk_stream))
    }

    fn supports(&self, feature: ProviderFeature) -> bool {
        matches!(feature, ProviderFeature::Vision)
    }
}
