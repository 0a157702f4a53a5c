//! # Open Agent SDK - Rust Implementation
//!
//! A production-ready Rust SDK for building multi-provider LLM agents: a streaming
//! marker/native tool-call parser, an iterative agent loop, a gadget (tool) executor with
//! approval gates and concurrency limits, and a lifecycle hook system.
//!
//! ## Key Features
//!
//! - **Provider-agnostic**: the agent loop only talks to the [`LlmProvider`] trait; a
//!   default OpenAI-compatible adapter covers LM Studio, Ollama, llama.cpp, and vLLM.
//! - **Streaming**: real-time token-by-token streaming, with gadget calls decoded either
//!   from provider-native tool-call deltas or from inline `<gadget:NAME>` markers.
//! - **Gadgets**: define tools with a typed parameter schema; the executor validates
//!   input, gates on approval, bounds concurrency, and enforces a per-call timeout.
//! - **Lifecycle hooks**: observers, interceptors, and controllers at every stage of the
//!   loop, composable across a run and its subagents.
//! - **Retry logic**: exponential backoff with jitter, honoring `Retry-After`.
//! - **Execution tree**: an append-only record of every LLM and gadget call in a run,
//!   with subtree token-usage aggregation.
//!
//! ## Two Interaction Modes
//!
//! ### 1. Simple Query Function (`query()`)
//! For single-turn interactions without conversation state:
//!
//! ```rust,no_run
//! use open_agent::{query, AgentOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = AgentOptions::builder()
//!         .system_prompt("You are a helpful assistant")
//!         .model("qwen2.5-32b-instruct")
//!         .base_url("http://localhost:1234/v1")
//!         .build()?;
//!
//!     let (text, _finish_reason) = query("What's the capital of France?", options).await?;
//!     println!("{text}");
//!
//!     Ok(())
//! }
//! ```
//!
//! ### 2. Client Object (`Client`)
//! For multi-turn conversations with persistent state:
//!
//! ```rust,no_run
//! use open_agent::{Client, AgentOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = AgentOptions::builder()
//!         .system_prompt("You are a helpful assistant")
//!         .model("qwen2.5-32b-instruct")
//!         .base_url("http://localhost:1234/v1")
//!         .build()?;
//!
//!     let mut client = Client::new(options)?;
//!
//!     client.query("What's 2+2?").await?;
//!     client.query("What about if we multiply that by 3?").await?;
//!
//!     for message in client.history() {
//!         println!("{:?}", message.role);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **agent**: the loop orchestrator (`AgentLoop`, `Client`, `query()`) driving the
//!   S0..S7 state machine each iteration.
//! - **provider**: the `LlmProvider` adapter trait and the default OpenAI-compatible
//!   implementation.
//! - **stream**: the marker/native stream parser turning provider chunks into events.
//! - **gadget** / **schema**: gadget descriptors, registry, outcomes, and the parameter
//!   schema tree used to validate and coerce call arguments.
//! - **executor**: dispatches a turn's gadget calls under approval, concurrency, and
//!   timeout constraints.
//! - **hooks** / **approval**: the lifecycle extension system and the human-in-the-loop
//!   approval gate.
//! - **conversation** / **tree** / **compaction**: conversation state, the execution
//!   tree, and the context-compaction trigger.
//! - **retry**: exponential backoff with jitter and proactive rate-limit pacing.
//! - **media**: the session-scoped media store for gadget image/audio outputs.
//! - **config**: provider-specific base-URL/model resolution helpers.
//! - **error**: the `Error` enum and `Result<T>` alias used throughout.

mod agent;
mod approval;
mod compaction;
mod config;
mod conversation;
mod error;
mod executor;
mod gadget;
mod hooks;
mod media;
mod provider;
mod schema;
mod stream;
mod tree;
mod types;
mod utils;

pub mod retry;

// --- Core Agent API ---

pub use agent::{query, AgentLoop, AgentLoopBuilder, Client, FinishReason, RunEvent, TrailingMessageFn};

// --- Provider Adapter ---

pub use provider::{Chunk, CompletionRequest, LlmProvider, OpenAiCompatibleProvider, ProviderFeature};

// --- Stream Parser ---

pub use stream::{ParserEvent, StreamParser};

// --- Gadgets ---

pub use gadget::{
    gadget, GadgetBuilder, GadgetContext, GadgetDescriptor, GadgetHandler, GadgetOutcome,
    GadgetPolicy, GadgetRegistry, SubagentFactory, SubagentOutput, SubagentSpec,
};

pub use schema::SchemaNode;

// --- Gadget Executor ---

pub use executor::{DispatchResult, GadgetExecutor};

// --- Approval Gate ---

pub use approval::{
    ApprovalCallback, ApprovalContext, ApprovalDecision, ApprovalGate, ApprovalMode, ContextProvider,
};

// --- Lifecycle Hooks ---

pub use hooks::{
    Controller, HookDecision, Hooks, Interceptor, IterationProgressHint, LoggingObserver,
    Observer, ParallelGadgetHint, PostToolUseEvent, PreToolUseEvent, TimingObserver,
    TokenTrackingObserver, UserPromptSubmitEvent, HOOK_POST_TOOL_USE, HOOK_PRE_TOOL_USE,
    HOOK_USER_PROMPT_SUBMIT,
};

// --- Conversation, Execution Tree, Compaction ---

pub use conversation::Conversation;
pub use tree::{ExecutionNode, ExecutionTree, NodeKind};
pub use compaction::{CompactionConfig, CompactionContext, CompactionResult, CompactionStrategy, CompactionTrigger};

// --- Media Store ---

pub use media::{MediaBlob, MediaOutput, MediaStore};

// --- Provider Configuration ---

pub use config::Provider;

// --- Error Handling ---

pub use error::{Error, Result};

// --- Core Types ---

pub use types::{
    AgentOptions, AgentOptionsBuilder, AudioBlock, ContentBlock, ImageBlock, ImageDetail, Message,
    MessageRole, MediaSource, OpenAIContent, OpenAIContentPart, OpenAIImageUrl, TextBlock,
    TokenUsage, ToolResultBlock, ToolUseBlock,
};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module containing the most commonly used types and functions.
/// Import with `use open_agent::prelude::*;` to get everything you need for typical usage.
pub mod prelude {
    pub use crate::{
        gadget, query, AgentOptions, AgentOptionsBuilder, ApprovalGate, Client, ContentBlock,
        Error, GadgetOutcome, GadgetRegistry, HookDecision, Hooks, Message, PostToolUseEvent,
        PreToolUseEvent, Result, SchemaNode, TextBlock, ToolUseBlock, UserPromptSubmitEvent,
    };
}
