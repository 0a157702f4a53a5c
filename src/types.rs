//! Core data types: messages, content blocks, media, configuration, and the
//! OpenAI-compatible wire format used by the default provider adapter.

use crate::error::{Error, Result};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// MESSAGE ROLE
// ============================================================================

/// Role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

// ============================================================================
// MESSAGE
// ============================================================================

/// A single message in a conversation, made up of one or more content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Build a message from an explicit role and content blocks.
    pub fn new(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    /// Convenience constructor for a plain-text system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(
            MessageRole::System,
            vec![ContentBlock::Text(TextBlock::new(text))],
        )
    }

    /// Convenience constructor for a plain-text user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(
            MessageRole::User,
            vec![ContentBlock::Text(TextBlock::new(text))],
        )
    }

    /// Convenience constructor for an assistant message from already-built content blocks.
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// True if every content block in this message is text (no media, no gadget traffic).
    pub fn is_text_only(&self) -> bool {
        self.content
            .iter()
            .all(|block| matches!(block, ContentBlock::Text(_)))
    }
}

// ============================================================================
// CONTENT BLOCKS
// ============================================================================

/// A single unit of content within a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "block_type")]
pub enum ContentBlock {
    Text(TextBlock),
    Image(ImageBlock),
    Audio(AudioBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
}

/// Plain text content, generated by the model or supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.trim().is_empty() {
            log::warn!("TextBlock constructed with empty or whitespace-only text");
        }
        Self { text }
    }
}

/// Where a piece of media actually lives: a remote URL or inline bytes with a MIME type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source_type", rename_all = "snake_case")]
pub enum MediaSource {
    Url(String),
    Base64 { data: String, mime_type: String },
}

impl MediaSource {
    /// Render as a value usable directly in an `image_url`/`audio_url`-style wire field:
    /// a bare URL, or a `data:` URI for inline bytes.
    pub fn as_url(&self) -> String {
        match self {
            MediaSource::Url(url) => url.clone(),
            MediaSource::Base64 { data, mime_type } => {
                format!("data:{};base64,{}", mime_type, data)
            }
        }
    }
}

/// Detail level hint for image understanding, matching the OpenAI Vision API's `detail` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    High,
    Auto,
}

/// An image attached to a message, either by URL or inline base64 data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBlock {
    pub source: MediaSource,
    pub detail: ImageDetail,
}

impl ImageBlock {
    /// Build an image block from a remote URL (or an already-formed `data:` URI).
    pub fn from_url(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(Error::invalid_input("image URL cannot be empty"));
        }
        Ok(Self {
            source: MediaSource::Url(url),
            detail: ImageDetail::Auto,
        })
    }

    /// Build an image block from raw base64-encoded bytes and a MIME type (e.g. `image/png`).
    pub fn from_base64(data: impl Into<String>, mime_type: impl Into<String>) -> Result<Self> {
        let data = data.into();
        let mime_type = mime_type.into();
        base64::engine::general_purpose::STANDARD
            .decode(&data)
            .map_err(|e| Error::invalid_input(format!("invalid base64 image data: {}", e)))?;
        Ok(Self {
            source: MediaSource::Base64 { data, mime_type },
            detail: ImageDetail::Auto,
        })
    }

    /// Set the vision `detail` hint. Consumes and returns `self` for builder chaining.
    pub fn with_detail(mut self, detail: ImageDetail) -> Self {
        self.detail = detail;
        self
    }

    /// Resolve this image to the URL (or data URI) form the wire format expects.
    pub fn url(&self) -> String {
        let url = self.source.as_url();
        if url.len() > 100 {
            log::debug!("{}... ({} chars)", &url[..100], url.len());
        } else {
            log::debug!("{}", url);
        }
        url
    }
}

/// Audio attached to a message, either by URL or inline base64 data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioBlock {
    pub source: MediaSource,
    pub format: String,
}

impl AudioBlock {
    pub fn from_url(url: impl Into<String>, format: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(Error::invalid_input("audio URL cannot be empty"));
        }
        Ok(Self {
            source: MediaSource::Url(url),
            format: format.into(),
        })
    }

    pub fn from_base64(data: impl Into<String>, mime_type: impl Into<String>) -> Result<Self> {
        let data = data.into();
        let mime_type = mime_type.into();
        base64::engine::general_purpose::STANDARD
            .decode(&data)
            .map_err(|e| Error::invalid_input(format!("invalid base64 audio data: {}", e)))?;
        let format = mime_type
            .split('/')
            .nth(1)
            .unwrap_or("wav")
            .to_string();
        Ok(Self {
            source: MediaSource::Base64 { data, mime_type },
            format,
        })
    }

    pub fn url(&self) -> String {
        self.source.as_url()
    }
}

/// A gadget (tool) call emitted by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

impl ToolUseBlock {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// The result of executing a gadget call, ready to be appended back into history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: Option<bool>,
}

impl ToolResultBlock {
    pub fn new(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: None,
        }
    }

    pub fn error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: Some(true),
        }
    }
}

// ============================================================================
// TOKEN USAGE
// ============================================================================

/// Token accounting for a single LLM call, as reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn merge(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

// ============================================================================
// AGENT OPTIONS
// ============================================================================

/// Configuration for an agent run, built using the builder pattern.
///
/// Required fields: `model`, `base_url`. Everything else has a sensible default.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub system_prompt: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Hard cap on the number of agent-loop iterations (S0..S7 cycles) before the run
    /// terminates with `FinishReason::MaxIterations`.
    pub max_iterations: u32,
    /// Timeout for a single LLM streaming call.
    pub request_timeout: Duration,
    /// Timeout for a single gadget invocation.
    pub gadget_timeout: Duration,
    /// Maximum number of gadget calls from the same turn that may run concurrently.
    pub max_concurrent_gadgets: usize,
    /// Maximum retry attempts for a transient provider error before giving up.
    pub max_retries: u32,
    /// Token count at which the compaction trigger fires, if set.
    pub compaction_trigger_tokens: Option<u64>,
    /// Cumulative token budget for the whole run, if set. Checked at `check_termination`
    /// against the execution tree's running total; crossing it ends the run with
    /// `FinishReason::BudgetExhausted` rather than a provider-reported cost figure, since
    /// no provider in this crate's default adapter reports per-call USD cost.
    pub max_total_tokens: Option<u64>,
}

impl AgentOptions {
    pub fn builder() -> AgentOptionsBuilder {
        AgentOptionsBuilder::default()
    }
}

/// Builder for [`AgentOptions`]. Required fields: `model`, `base_url`.
#[derive(Debug, Default)]
pub struct AgentOptionsBuilder {
    system_prompt: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    max_iterations: Option<u32>,
    request_timeout: Option<Duration>,
    gadget_timeout: Option<Duration>,
    max_concurrent_gadgets: Option<usize>,
    max_retries: Option<u32>,
    compaction_trigger_tokens: Option<u64>,
    max_total_tokens: Option<u64>,
}

impl AgentOptionsBuilder {
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn gadget_timeout(mut self, timeout: Duration) -> Self {
        self.gadget_timeout = Some(timeout);
        self
    }

    pub fn max_concurrent_gadgets(mut self, n: usize) -> Self {
        self.max_concurrent_gadgets = Some(n);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    pub fn compaction_trigger_tokens(mut self, tokens: u64) -> Self {
        self.compaction_trigger_tokens = Some(tokens);
        self
    }

    pub fn max_total_tokens(mut self, tokens: u64) -> Self {
        self.max_total_tokens = Some(tokens);
        self
    }

    pub fn build(self) -> Result<AgentOptions> {
        let model = self
            .model
            .ok_or_else(|| Error::config("model is required"))?;
        if model.trim().is_empty() {
            return Err(Error::config("model cannot be empty"));
        }

        let base_url = self
            .base_url
            .ok_or_else(|| Error::config("base_url is required"))?;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::config(
                "base_url must be a valid HTTP or HTTPS URL",
            ));
        }

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::config("temperature must be between 0.0 and 2.0"));
            }
        }

        let max_concurrent_gadgets = self.max_concurrent_gadgets.unwrap_or(4);
        if max_concurrent_gadgets == 0 {
            return Err(Error::config("max_concurrent_gadgets must be at least 1"));
        }

        Ok(AgentOptions {
            system_prompt: self.system_prompt,
            model,
            base_url,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            max_iterations: self.max_iterations.unwrap_or(25),
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(60)),
            gadget_timeout: self.gadget_timeout.unwrap_or(Duration::from_secs(30)),
            max_concurrent_gadgets,
            max_retries: self.max_retries.unwrap_or(3),
            compaction_trigger_tokens: self.compaction_trigger_tokens,
            max_total_tokens: self.max_total_tokens,
        })
    }
}

// ============================================================================
// OPENAI-COMPATIBLE WIRE FORMAT
// ============================================================================

/// Message content as sent to an OpenAI-compatible `/chat/completions` endpoint.
///
/// Text-only messages serialize as a bare JSON string (the v0.5.0 wire shape); any
/// message carrying an image or audio part switches to the array-of-parts form. This
/// keeps the common case byte-identical to servers that never learned the parts form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIContentPart>),
}

/// One part of a multi-part OpenAI Vision/audio message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAIContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAIImageUrl },
}

impl OpenAIContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        OpenAIContentPart::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>, detail: ImageDetail) -> Self {
        OpenAIContentPart::ImageUrl {
            image_url: OpenAIImageUrl {
                url: url.into(),
                detail,
            },
        }
    }
}

/// The `image_url` object nested inside an [`OpenAIContentPart::ImageUrl`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIImageUrl {
    pub url: String,
    pub detail: ImageDetail,
}

/// One chunk of a streamed `/chat/completions` response.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<OpenAIChoice>,
    #[serde(default)]
    pub usage: Option<OpenAIUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIChoice {
    pub index: u32,
    pub delta: OpenAIDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAIDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAIToolCallDelta>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIToolCallDelta {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub call_type: Option<String>,
    #[serde(default)]
    pub function: Option<OpenAIFunctionDelta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct OpenAIUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl From<OpenAIUsage> for TokenUsage {
    fn from(u: OpenAIUsage) -> Self {
        TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}
