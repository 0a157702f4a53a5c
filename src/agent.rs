//! The agent loop: the orchestrator that drives `S0 prepare_messages` through
//! `S7 check_termination` every iteration, wiring together the conversation manager,
//! provider adapter, stream parser, gadget executor, hooks, compaction trigger, and
//! execution tree into a single run. [`Client`] is the ergonomic front door most callers
//! use; [`AgentLoop`] is what it drives underneath.

use crate::approval::ApprovalGate;
use crate::compaction::CompactionTrigger;
use crate::conversation::Conversation;
use crate::executor::GadgetExecutor;
use crate::gadget::{GadgetRegistry, SubagentFactory, SubagentOutput, SubagentSpec};
use crate::hooks::{Hooks, UserPromptSubmitEvent};
use crate::provider::{CompletionRequest, LlmProvider};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::stream::{ParserEvent, StreamParser};
use crate::tree::{ExecutionTree, NodeKind};
use crate::types::{AgentOptions, ContentBlock, Message, TextBlock, TokenUsage, ToolUseBlock};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Why a run stopped, in the order `check_termination` evaluates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Cancelled,
    CompletedBySignal,
    BudgetExhausted,
    Finished,
    IterationsExhausted,
    HumanInputRequired,
}

/// One event the agent loop emits as it runs, in emission order.
#[derive(Debug, Clone)]
pub enum RunEvent {
    IterationStart { iteration: u32 },
    Text(String),
    GadgetCall(ToolUseBlock),
    GadgetResult { tool_use_id: String, content: String, is_error: bool },
    IterationEnd { iteration: u32 },
    Finish(FinishReason),
}

/// A trailing message evaluated fresh every iteration and appended ephemerally (never
/// persisted to history) ahead of the outbound call — e.g. a reminder of the remaining
/// iteration budget.
pub type TrailingMessageFn = Box<dyn Fn(u32, u32) -> String + Send + Sync>;

/// Everything the loop needs for one run, assembled once by [`AgentLoop::builder`] (or by
/// [`Client`] on the caller's behalf).
pub struct AgentLoop {
    options: AgentOptions,
    provider: Arc<dyn LlmProvider>,
    registry: Arc<GadgetRegistry>,
    executor: GadgetExecutor,
    hooks: Hooks,
    compaction: CompactionTrigger,
    trailing_message: Option<TrailingMessageFn>,
    tree: Arc<ExecutionTree>,
    retry_config: RetryConfig,
    media_store: Arc<crate::media::MediaStore>,
    /// Optional proactive pacer consulted before every LLM call (§4.6 "Proactive pacing").
    rate_limiter: Option<Arc<crate::retry::RateLimiter>>,
}

impl AgentLoop {
    pub fn builder(options: AgentOptions, provider: Arc<dyn LlmProvider>) -> AgentLoopBuilder {
        AgentLoopBuilder::new(options, provider)
    }

    /// Run to completion, appending to `conversation` as it goes and returning the
    /// reason the run stopped. Callers that want to observe events as they happen should
    /// use [`AgentLoop::run_with_events`] instead.
    pub async fn run(&self, conversation: &mut Conversation, signal: &CancellationToken) -> Result<FinishReason> {
        let mut events = Vec::new();
        let reason = self.run_with_events(conversation, signal, &mut |e| events.push(e)).await?;
        Ok(reason)
    }

    /// Run to completion, invoking `on_event` synchronously for every [`RunEvent`] as it
    /// is produced.
    pub async fn run_with_events(
        &self,
        conversation: &mut Conversation,
        signal: &CancellationToken,
        on_event: &mut dyn FnMut(RunEvent),
    ) -> Result<FinishReason> {
        self.run_inner(conversation, signal, on_event, None).await
    }

    /// Shared implementation behind [`AgentLoop::run_with_events`] and a subagent's run.
    /// `root_parent` is the execution-tree node every LLM call in this run is parented
    /// under — `None` for a top-level run, `Some(gadget_call_node)` for a subagent, so
    /// its cost rolls up into the gadget call that spawned it via
    /// [`ExecutionTree::subtree_usage`].
    async fn run_inner(
        &self,
        conversation: &mut Conversation,
        signal: &CancellationToken,
        on_event: &mut dyn FnMut(RunEvent),
        root_parent: Option<String>,
    ) -> Result<FinishReason> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut iteration: u32 = 0;

        loop {
            if signal.is_cancelled() {
                on_event(RunEvent::Finish(FinishReason::Cancelled));
                return Ok(FinishReason::Cancelled);
            }

            on_event(RunEvent::IterationStart { iteration });
            self.hooks.dispatch_iteration(iteration).await;

            // S0 prepare_messages
            if let Some(trailing) = &self.trailing_message {
                let text = trailing(iteration, self.options.max_iterations);
                conversation.set_ephemeral(Message::user(text));
            }
            let outbound = conversation.take_outbound();

            // S1 before_llm_call
            let prompt_event = UserPromptSubmitEvent {
                prompt: outbound
                    .last()
                    .map(render_text_content)
                    .unwrap_or_default(),
                history: conversation.history().to_vec(),
            };
            if let crate::hooks::HookDecision::Block(reason) =
                self.hooks.dispatch_user_prompt_submit(&prompt_event).await
            {
                return Err(Error::hook(reason));
            }

            // S2 stream_llm + S3 parse_events
            let request = CompletionRequest {
                model: self.options.model.clone(),
                messages: outbound,
                gadgets: self.registry.iter().cloned().collect(),
                temperature: self.options.temperature,
                max_tokens: self.options.max_tokens,
            };

            if let Some(limiter) = &self.rate_limiter {
                limiter.acquire().await;
            }

            let provider = self.provider.clone();
            let turn = retry_with_backoff(&self.retry_config, |_attempt| {
                let provider = provider.clone();
                let request = request.clone();
                async move { run_one_turn(provider, request).await }
            })
            .await?;

            let llm_node_id = self.tree.append(
                root_parent.clone(),
                NodeKind::LlmCall { model: self.options.model.clone() },
                turn.usage,
            );

            if !turn.text.is_empty() {
                conversation.append(Message::assistant(vec![ContentBlock::Text(TextBlock::new(
                    turn.text.clone(),
                ))]));
                on_event(RunEvent::Text(turn.text.clone()));
            }

            for call in &turn.gadget_calls {
                on_event(RunEvent::GadgetCall(call.clone()));
            }

            // S5 dispatch_gadgets + S6 append_results
            let mut completed_by_signal = false;
            let mut human_input_required = false;

            if !turn.gadget_calls.is_empty() {
                conversation.append(Message::assistant(
                    turn.gadget_calls
                        .iter()
                        .cloned()
                        .map(ContentBlock::ToolUse)
                        .collect(),
                ));

                let results = self
                    .executor
                    .dispatch_batch(
                        &turn.gadget_calls,
                        conversation.history(),
                        signal,
                        Some(llm_node_id.clone()),
                    )
                    .await;

                for result in &results {
                    if matches!(result.outcome, crate::gadget::GadgetOutcome::TaskComplete(_)) {
                        completed_by_signal = true;
                    }
                    if matches!(
                        result.outcome,
                        crate::gadget::GadgetOutcome::HumanInputRequired { .. }
                    ) {
                        human_input_required = true;
                    }

                    let block = result.to_tool_result_block();
                    on_event(RunEvent::GadgetResult {
                        tool_use_id: block.tool_use_id.clone(),
                        content: block.content.clone(),
                        is_error: block.is_error.unwrap_or(false),
                    });
                    conversation.append(Message::new(
                        crate::types::MessageRole::Tool,
                        vec![ContentBlock::ToolResult(block)],
                    ));
                }
            }

            // Opportunistic compaction check after this iteration's history growth.
            let current_tokens = self.tree.total_usage().total_tokens;
            self.compaction
                .maybe_compact(conversation, current_tokens, &run_id)
                .await?;

            on_event(RunEvent::IterationEnd { iteration });

            // S7 check_termination, in spec order.
            let reason = if signal.is_cancelled() {
                Some(FinishReason::Cancelled)
            } else if completed_by_signal {
                Some(FinishReason::CompletedBySignal)
            } else if human_input_required {
                Some(FinishReason::HumanInputRequired)
            } else if self
                .options
                .max_total_tokens
                .is_some_and(|budget| current_tokens >= budget)
            {
                Some(FinishReason::BudgetExhausted)
            } else if turn.gadget_calls.is_empty() {
                Some(FinishReason::Finished)
            } else if iteration + 1 >= self.options.max_iterations {
                Some(FinishReason::IterationsExhausted)
            } else {
                None
            };

            if let Some(reason) = reason {
                on_event(RunEvent::Finish(reason.clone()));
                return Ok(reason);
            }

            iteration += 1;
        }
    }

    pub fn execution_tree(&self) -> &ExecutionTree {
        &self.tree
    }

    /// The run's session-scoped media store, for a caller that wants to resolve the
    /// opaque ids a gadget's result may reference.
    pub fn media_store(&self) -> &crate::media::MediaStore {
        &self.media_store
    }
}

/// Accumulated result of driving one provider stream through the parser to completion.
struct TurnResult {
    text: String,
    gadget_calls: Vec<ToolUseBlock>,
    usage: TokenUsage,
}

async fn run_one_turn(provider: Arc<dyn LlmProvider>, request: CompletionRequest) -> Result<TurnResult> {
    let mut stream = provider.stream(request).await?;
    let mut parser = StreamParser::new();
    let mut text = String::new();
    let mut gadget_calls = Vec::new();
    let mut usage = TokenUsage::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for event in parser.feed_chunk(&chunk) {
            match event {
                ParserEvent::Text(t) => text.push_str(&t),
                ParserEvent::GadgetCall(call) => gadget_calls.push(call),
                ParserEvent::Usage(u) => usage = u,
                ParserEvent::ParseError(e) => log::warn!("stream parse error: {}", e),
                ParserEvent::Thinking(_) | ParserEvent::Finish(_) => {}
            }
        }
    }
    for event in parser.flush_text() {
        if let ParserEvent::Text(t) = event {
            text.push_str(&t);
        }
    }

    Ok(TurnResult { text, gadget_calls, usage })
}

fn render_text_content(message: &Message) -> String {
    message
        .content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text(t) => Some(t.text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn finish_reason_label(reason: &FinishReason) -> &'static str {
    match reason {
        FinishReason::Cancelled => "cancelled",
        FinishReason::CompletedBySignal => "completed_by_signal",
        FinishReason::BudgetExhausted => "budget_exhausted",
        FinishReason::Finished => "finished",
        FinishReason::IterationsExhausted => "iterations_exhausted",
        FinishReason::HumanInputRequired => "human_input_required",
    }
}

/// Backs every [`GadgetContext::spawn_subagent`](crate::gadget::GadgetContext::spawn_subagent)
/// call in a run. Holds the ingredients a child [`AgentLoop`] needs rather than a handle to
/// the running loop itself, so `gadget` can depend on this trait without `agent` needing to
/// depend back on `gadget`'s concrete executor — spawning builds a fresh, throwaway
/// `AgentLoop` per call instead of reusing the parent's.
struct LoopSubagentFactory {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<GadgetRegistry>,
    approval: Arc<ApprovalGate>,
    hooks: Hooks,
    media_store: Arc<crate::media::MediaStore>,
    tree: Arc<ExecutionTree>,
    retry_config: RetryConfig,
    options: AgentOptions,
}

impl LoopSubagentFactory {
    fn handle(&self) -> Arc<dyn SubagentFactory> {
        Arc::new(LoopSubagentFactory {
            provider: self.provider.clone(),
            registry: self.registry.clone(),
            approval: self.approval.clone(),
            hooks: self.hooks.clone(),
            media_store: self.media_store.clone(),
            tree: self.tree.clone(),
            retry_config: self.retry_config,
            options: self.options.clone(),
        })
    }
}

#[async_trait]
impl SubagentFactory for LoopSubagentFactory {
    async fn spawn(&self, spec: SubagentSpec, parent_node_id: &str) -> Result<SubagentOutput> {
        let mut options = self.options.clone();
        if let Some(max_iterations) = spec.max_iterations {
            options.max_iterations = max_iterations;
        }
        let system_prompt = spec.system_prompt.clone().or_else(|| options.system_prompt.clone());

        let executor = GadgetExecutor::new(
            self.registry.clone(),
            self.approval.clone(),
            self.hooks.clone(),
            options.max_concurrent_gadgets,
            options.gadget_timeout,
            self.media_store.clone(),
            self.tree.clone(),
            self.handle(),
        );
        let compaction = CompactionTrigger::new(options.compaction_trigger_tokens, None);

        let child = AgentLoop {
            retry_config: self.retry_config,
            options,
            provider: self.provider.clone(),
            registry: self.registry.clone(),
            executor,
            hooks: self.hooks.clone(),
            compaction,
            trailing_message: None,
            tree: self.tree.clone(),
            media_store: self.media_store.clone(),
            rate_limiter: None,
        };

        let mut conversation = Conversation::new(system_prompt);
        conversation.append(Message::user(spec.prompt));

        let signal = CancellationToken::new();
        let reason = child
            .run_inner(
                &mut conversation,
                &signal,
                &mut |_event| {},
                Some(parent_node_id.to_string()),
            )
            .await?;

        let text = conversation
            .history()
            .iter()
            .filter(|m| m.role == crate::types::MessageRole::Assistant)
            .map(render_text_content)
            .collect::<Vec<_>>()
            .join("\n");

        Ok(SubagentOutput {
            text,
            finish_reason: finish_reason_label(&reason).to_string(),
        })
    }
}

/// Builder for [`AgentLoop`]. Required: a provider. Gadgets, hooks, compaction, and a
/// trailing-message provider are all optional.
pub struct AgentLoopBuilder {
    options: AgentOptions,
    provider: Arc<dyn LlmProvider>,
    registry: GadgetRegistry,
    approval: ApprovalGate,
    hooks: Hooks,
    compaction_strategy: Option<Box<dyn crate::compaction::CompactionStrategy>>,
    trailing_message: Option<TrailingMessageFn>,
    media_base_dir: Option<std::path::PathBuf>,
    rate_limiter: Option<Arc<crate::retry::RateLimiter>>,
}

impl AgentLoopBuilder {
    fn new(options: AgentOptions, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            options,
            provider,
            registry: GadgetRegistry::new(),
            approval: ApprovalGate::new(),
            hooks: Hooks::new(),
            compaction_strategy: None,
            trailing_message: None,
            media_base_dir: None,
            rate_limiter: None,
        }
    }

    /// Persist gadget media outputs under `dir/media-<run>/...` instead of keeping them
    /// purely in memory for the run's lifetime.
    pub fn media_base_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.media_base_dir = Some(dir.into());
        self
    }

    /// Install a proactive rate limiter consulted before every LLM call, so the loop
    /// paces itself ahead of the provider's own limiter rather than only reacting to a
    /// 429 after the fact.
    pub fn rate_limiter(mut self, limiter: Arc<crate::retry::RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn gadgets(mut self, registry: GadgetRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn approval(mut self, approval: ApprovalGate) -> Self {
        self.approval = approval;
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn compaction_strategy(mut self, strategy: Box<dyn crate::compaction::CompactionStrategy>) -> Self {
        self.compaction_strategy = Some(strategy);
        self
    }

    pub fn trailing_message<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, u32) -> String + Send + Sync + 'static,
    {
        self.trailing_message = Some(Box::new(f));
        self
    }

    pub fn build(self) -> AgentLoop {
        let registry = Arc::new(self.registry);
        let approval = Arc::new(self.approval);
        let media_store_id = uuid::Uuid::new_v4().to_string();
        let media_store = Arc::new(match &self.media_base_dir {
            Some(dir) => crate::media::MediaStore::new(media_store_id).with_base_dir(dir.clone()),
            None => crate::media::MediaStore::new(media_store_id),
        });
        let tree = Arc::new(ExecutionTree::new());
        let retry_config = RetryConfig {
            max_attempts: self.options.max_retries.max(1),
            ..RetryConfig::default()
        };

        let subagents: Arc<dyn SubagentFactory> = Arc::new(LoopSubagentFactory {
            provider: self.provider.clone(),
            registry: registry.clone(),
            approval: approval.clone(),
            hooks: self.hooks.clone(),
            media_store: media_store.clone(),
            tree: tree.clone(),
            retry_config,
            options: self.options.clone(),
        });

        let executor = GadgetExecutor::new(
            registry.clone(),
            approval,
            self.hooks.clone(),
            self.options.max_concurrent_gadgets,
            self.options.gadget_timeout,
            media_store.clone(),
            tree.clone(),
            subagents,
        );
        let compaction = CompactionTrigger::new(self.options.compaction_trigger_tokens, self.compaction_strategy);

        AgentLoop {
            retry_config,
            options: self.options,
            provider: self.provider,
            registry,
            executor,
            hooks: self.hooks,
            compaction,
            trailing_message: self.trailing_message,
            tree,
            media_store,
            rate_limiter: self.rate_limiter,
        }
    }
}

/// Ergonomic front door for single-conversation use: owns a [`Conversation`] and an
/// [`AgentLoop`], and exposes `history()`/`history_mut()` for direct inspection/seeding
/// the way the v0.5.0-era API did.
pub struct Client {
    conversation: Conversation,
    agent_loop: AgentLoop,
}

impl Client {
    /// Build a client backed by the default OpenAI-compatible provider adapter pointed
    /// at `options.base_url`.
    pub fn new(options: AgentOptions) -> Result<Self> {
        let provider: Arc<dyn LlmProvider> =
            Arc::new(crate::provider::OpenAiCompatibleProvider::new(options.base_url.clone()));
        Ok(Self::with_provider(options, provider))
    }

    /// Build a client against a caller-supplied provider adapter (useful for tests and
    /// non-OpenAI-compatible backends).
    pub fn with_provider(options: AgentOptions, provider: Arc<dyn LlmProvider>) -> Self {
        let conversation = Conversation::new(options.system_prompt.clone());
        let agent_loop = AgentLoop::builder(options, provider).build();
        Self { conversation, agent_loop }
    }

    /// Replace the default-built agent loop (e.g. to register gadgets or hooks) while
    /// keeping this client's conversation state.
    pub fn with_loop(mut self, agent_loop: AgentLoop) -> Self {
        self.agent_loop = agent_loop;
        self
    }

    pub fn history(&self) -> &[Message] {
        self.conversation.history()
    }

    pub fn history_mut(&mut self) -> &mut Vec<Message> {
        self.conversation.history_mut()
    }

    /// Append a user message and run the loop to completion (or a resumable stop), with
    /// no cancellation beyond what the caller does externally.
    pub async fn query(&mut self, prompt: impl Into<String>) -> Result<FinishReason> {
        self.conversation.append(Message::user(prompt));
        let signal = CancellationToken::new();
        self.agent_loop.run(&mut self.conversation, &signal).await
    }

    pub fn execution_tree(&self) -> &ExecutionTree {
        self.agent_loop.execution_tree()
    }

    pub fn media_store(&self) -> &crate::media::MediaStore {
        self.agent_loop.media_store()
    }

    /// Resume a run that stopped with [`FinishReason::HumanInputRequired`]: replace the
    /// placeholder tool-result content for `tool_use_id` with the caller-supplied answer
    /// and run the loop again. Errors if no pending tool result matches `tool_use_id`.
    pub async fn resume_human_input(
        &mut self,
        tool_use_id: &str,
        answer: impl Into<String>,
    ) -> Result<FinishReason> {
        let found = self.conversation.history_mut().iter_mut().rev().find_map(|message| {
            message.content.iter_mut().find_map(|block| match block {
                ContentBlock::ToolResult(result) if result.tool_use_id == tool_use_id => {
                    Some(result)
                }
                _ => None,
            })
        });
        let result = found.ok_or_else(|| {
            crate::error::Error::gadget(format!(
                "no pending tool result for tool_use_id '{}'",
                tool_use_id
            ))
        })?;
        result.content = answer.into();
        result.is_error = None;

        let signal = CancellationToken::new();
        self.agent_loop.run(&mut self.conversation, &signal).await
    }
}

/// Single-turn convenience function: build a throwaway [`Client`] against the default
/// OpenAI-compatible provider, run one query, and return the concatenated assistant text
/// alongside why the run stopped. For multi-turn conversations or custom gadgets/hooks,
/// build a [`Client`] directly instead.
pub async fn query(prompt: impl Into<String>, options: AgentOptions) -> Result<(String, FinishReason)> {
    let mut client = Client::new(options)?;
    let reason = client.query(prompt).await?;
    let text = client
        .history()
        .iter()
        .filter(|m| m.role == crate::types::MessageRole::Assistant)
        .map(render_text_content)
        .collect::<Vec<_>>()
        .join("\n");
    Ok((text, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::{gadget, GadgetOutcome};
    use crate::provider::{Chunk, ProviderFeature};
    use crate::schema::SchemaNode;
    use async_trait::async_trait;
    use futures::stream;
    use serde_json::json;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A fake provider that replays a fixed sequence of chunk batches, one batch per
    /// `stream()` call, so a test can script a whole multi-turn run.
    struct ScriptedProvider {
        turns: std::sync::Mutex<Vec<Vec<Chunk>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(turns: Vec<Vec<Chunk>>) -> Self {
            Self {
                turns: std::sync::Mutex::new(turns),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn stream(
            &self,
            _request: CompletionRequest,
        ) -> Result<Pin<Box<dyn futures::Stream<Item = Result<Chunk>> + Send>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut turns = self.turns.lock().unwrap();
            let batch = if turns.is_empty() {
                Vec::new()
            } else {
                turns.remove(0)
            };
            Ok(Box::pin(stream::iter(batch.into_iter().map(Ok))))
        }

        fn supports(&self, _feature: ProviderFeature) -> bool {
            false
        }
    }

    fn text_chunk(text: &str) -> Chunk {
        Chunk {
            text: Some(text.to_string()),
            finish_reason: Some("stop".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn finishes_normally_with_no_gadget_calls() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![text_chunk("hello there")]]));
        let options = AgentOptions::builder()
            .model("m")
            .base_url("http://localhost:1234/v1")
            .build()
            .unwrap();

        let agent_loop = AgentLoop::builder(options, provider).build();
        let mut conversation = Conversation::new::<String>(None);
        conversation.append(Message::user("hi"));

        let signal = CancellationToken::new();
        let reason = agent_loop.run(&mut conversation, &signal).await.unwrap();
        assert_eq!(reason, FinishReason::Finished);
        assert_eq!(conversation.history().len(), 2);
    }

    #[tokio::test]
    async fn stops_on_iterations_exhausted_when_gadget_keeps_calling() {
        let mut reg = GadgetRegistry::new();
        reg.register(
            gadget("loop")
                .schema(SchemaNode::object([]))
                .handler(|_input, _ctx| async move { GadgetOutcome::Success(json!("ok")) })
                .build()
                .unwrap(),
        )
        .unwrap();

        let call_chunk = Chunk {
            gadget_calls: vec![ToolUseBlock::new("1", "loop", json!({}))],
            finish_reason: Some("tool_calls".to_string()),
            ..Default::default()
        };
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![call_chunk.clone()],
            vec![call_chunk.clone()],
        ]));

        let options = AgentOptions::builder()
            .model("m")
            .base_url("http://localhost:1234/v1")
            .max_iterations(2)
            .build()
            .unwrap();

        let agent_loop = AgentLoop::builder(options, provider).gadgets(reg).build();
        let mut conversation = Conversation::new::<String>(None);
        conversation.append(Message::user("hi"));

        let signal = CancellationToken::new();
        let reason = agent_loop.run(&mut conversation, &signal).await.unwrap();
        assert_eq!(reason, FinishReason::IterationsExhausted);
    }

    #[tokio::test]
    async fn task_complete_outcome_stops_the_run() {
        let mut reg = GadgetRegistry::new();
        reg.register(
            gadget("finish")
                .handler(|_input, _ctx| async move { GadgetOutcome::TaskComplete(json!("done")) })
                .build()
                .unwrap(),
        )
        .unwrap();

        let call_chunk = Chunk {
            gadget_calls: vec![ToolUseBlock::new("1", "finish", json!({}))],
            finish_reason: Some("tool_calls".to_string()),
            ..Default::default()
        };
        let provider = Arc::new(ScriptedProvider::new(vec![vec![call_chunk]]));

        let options = AgentOptions::builder()
            .model("m")
            .base_url("http://localhost:1234/v1")
            .build()
            .unwrap();

        let agent_loop = AgentLoop::builder(options, provider).gadgets(reg).build();
        let mut conversation = Conversation::new::<String>(None);
        conversation.append(Message::user("hi"));

        let signal = CancellationToken::new();
        let reason = agent_loop.run(&mut conversation, &signal).await.unwrap();
        assert_eq!(reason, FinishReason::CompletedBySignal);
    }

    #[tokio::test]
    async fn cancelled_signal_before_first_iteration_stops_immediately() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![text_chunk("unused")]]));
        let options = AgentOptions::builder()
            .model("m")
            .base_url("http://localhost:1234/v1")
            .build()
            .unwrap();

        let agent_loop = AgentLoop::builder(options, provider).build();
        let mut conversation = Conversation::new::<String>(None);
        let signal = CancellationToken::new();
        signal.cancel();

        let reason = agent_loop.run(&mut conversation, &signal).await.unwrap();
        assert_eq!(reason, FinishReason::Cancelled);
    }

    #[tokio::test]
    async fn client_query_appends_user_message_and_runs() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![text_chunk("hi back")]]));
        let options = AgentOptions::builder()
            .model("m")
            .base_url("http://localhost:1234/v1")
            .build()
            .unwrap();

        let mut client = Client::with_provider(options, provider);
        let reason = client.query("hello").await.unwrap();
        assert_eq!(reason, FinishReason::Finished);
        assert_eq!(client.history().len(), 2);
    }

    #[tokio::test]
    async fn client_history_mut_allows_seeding() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![]]));
        let options = AgentOptions::builder()
            .model("test-model")
            .base_url("http://localhost:1234/v1")
            .build()
            .unwrap();

        let mut client = Client::with_provider(options, provider);
        client.history_mut().push(Message::user("seeded"));
        assert_eq!(client.history().len(), 1);
    }

    #[tokio::test]
    async fn resume_human_input_replaces_placeholder_and_continues_run() {
        let mut reg = GadgetRegistry::new();
        reg.register(
            gadget("ask")
                .handler(|_input, _ctx| async move {
                    GadgetOutcome::HumanInputRequired {
                        prompt: "what's your favorite color?".to_string(),
                    }
                })
                .build()
                .unwrap(),
        )
        .unwrap();

        let call_chunk = Chunk {
            gadget_calls: vec![ToolUseBlock::new("1", "ask", json!({}))],
            finish_reason: Some("tool_calls".to_string()),
            ..Default::default()
        };
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![call_chunk],
            vec![text_chunk("thanks, noted")],
        ]));

        let options = AgentOptions::builder()
            .model("m")
            .base_url("http://localhost:1234/v1")
            .build()
            .unwrap();

        let agent_loop = AgentLoop::builder(options.clone(), provider.clone()).gadgets(reg).build();
        let mut client = Client::with_provider(options, provider).with_loop(agent_loop);

        let reason = client.query("hi").await.unwrap();
        assert_eq!(reason, FinishReason::HumanInputRequired);

        let pending_id = client
            .history()
            .iter()
            .flat_map(|m| &m.content)
            .find_map(|block| match block {
                ContentBlock::ToolResult(r) => Some(r.tool_use_id.clone()),
                _ => None,
            })
            .expect("a tool result block should be present");

        let reason = client
            .resume_human_input(&pending_id, "blue")
            .await
            .unwrap();
        assert_eq!(reason, FinishReason::Finished);

        let answered = client.history().iter().flat_map(|m| &m.content).find_map(|block| match block {
            ContentBlock::ToolResult(r) if r.tool_use_id == pending_id => Some(r.content.clone()),
            _ => None,
        });
        assert_eq!(answered.as_deref(), Some("blue"));
    }

    #[tokio::test]
    async fn gadget_can_spawn_a_subagent_parented_under_its_call() {
        let mut reg = GadgetRegistry::new();
        reg.register(
            gadget("delegate")
                .handler(|_input, ctx| async move {
                    let output = ctx
                        .spawn_subagent(SubagentSpec::new("summarize something"))
                        .await
                        .unwrap();
                    GadgetOutcome::Success(json!(output.text))
                })
                .build()
                .unwrap(),
        )
        .unwrap();

        let call_chunk = Chunk {
            gadget_calls: vec![ToolUseBlock::new("1", "delegate", json!({}))],
            finish_reason: Some("tool_calls".to_string()),
            ..Default::default()
        };
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![call_chunk],
            vec![text_chunk("subagent's answer")],
            vec![text_chunk("done")],
        ]));

        let options = AgentOptions::builder()
            .model("m")
            .base_url("http://localhost:1234/v1")
            .build()
            .unwrap();

        let agent_loop = AgentLoop::builder(options, provider).gadgets(reg).build();
        let mut conversation = Conversation::new::<String>(None);
        conversation.append(Message::user("hi"));

        let signal = CancellationToken::new();
        let reason = agent_loop.run(&mut conversation, &signal).await.unwrap();
        assert_eq!(reason, FinishReason::Finished);

        let gadget_result = conversation
            .history()
            .iter()
            .flat_map(|m| &m.content)
            .find_map(|block| match block {
                ContentBlock::ToolResult(r) => Some(r.content.clone()),
                _ => None,
            })
            .expect("delegate gadget should have produced a result");
        assert!(gadget_result.contains("subagent's answer"));

        // The subagent's LLM call should be nested under the delegate gadget call's node.
        let nodes = agent_loop.execution_tree().snapshot();
        let gadget_node = nodes
            .iter()
            .find(|n| matches!(&n.kind, NodeKind::GadgetCall { name } if name == "delegate"))
            .expect("gadget call node should exist");
        let subagent_llm_node = nodes
            .iter()
            .find(|n| n.parent_id.as_deref() == Some(gadget_node.id.as_str()))
            .expect("subagent's LLM call should be parented under the delegate gadget call");
        assert!(matches!(subagent_llm_node.kind, NodeKind::LlmCall { .. }));
    }
}
