//! Lifecycle hooks: extension points the agent loop calls into at key points in every
//! turn. Three flavors, in increasing order of power:
//!
//! - **Observers** watch (logging, metrics, progress UI) and cannot affect the run.
//! - **Interceptors** can rewrite data in flight (a prompt, a gadget's input) before the
//!   loop acts on it.
//! - **Controllers** can allow, block, or defer an operation outright via a
//!   [`HookDecision`].
//!
//! Hooks of the same kind run in registration order; for controllers, the first decision
//! that isn't `Continue` wins and short-circuits the rest.

use crate::types::Message;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

pub const HOOK_PRE_TOOL_USE: &str = "PreToolUse";
pub const HOOK_POST_TOOL_USE: &str = "PostToolUse";
pub const HOOK_USER_PROMPT_SUBMIT: &str = "UserPromptSubmit";

/// Decision returned by a controller hook.
#[derive(Debug, Clone, PartialEq)]
pub enum HookDecision {
    /// No opinion; fall through to the next hook (or the default behavior).
    Continue,
    /// Reject the operation outright, with a reason surfaced to the caller.
    Block(String),
    /// Replace the gadget input / prompt with a modified value and continue.
    Modify(Value),
}

impl Default for HookDecision {
    fn default() -> Self {
        HookDecision::Continue
    }
}

/// Event data for a `PreToolUse` hook: a gadget is about to be dispatched.
#[derive(Debug, Clone)]
pub struct PreToolUseEvent {
    pub tool_name: String,
    pub tool_id: String,
    pub input: Value,
    pub history: Vec<Message>,
}

/// Event data for a `PostToolUse` hook: a gadget has finished running.
#[derive(Debug, Clone)]
pub struct PostToolUseEvent {
    pub tool_name: String,
    pub tool_id: String,
    pub input: Value,
    pub result: String,
    pub is_error: bool,
    pub history: Vec<Message>,
}

/// Event data for a `UserPromptSubmit` hook: a prompt is about to be sent to the model.
#[derive(Debug, Clone)]
pub struct UserPromptSubmitEvent {
    pub prompt: String,
    pub history: Vec<Message>,
}

/// An observer hook: read-only, cannot affect the run.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn on_pre_tool_use(&self, _event: &PreToolUseEvent) {}
    async fn on_post_tool_use(&self, _event: &PostToolUseEvent) {}
    async fn on_user_prompt_submit(&self, _event: &UserPromptSubmitEvent) {}
    async fn on_iteration(&self, _iteration: u32) {}
}

/// An interceptor hook: may rewrite the prompt or a gadget's input.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn rewrite_prompt(&self, prompt: String, _history: &[Message]) -> String {
        prompt
    }
    async fn rewrite_tool_input(&self, _tool_name: &str, input: Value) -> Value {
        input
    }
}

/// A controller hook: may block or defer an operation.
#[async_trait]
pub trait Controller: Send + Sync {
    async fn check_pre_tool_use(&self, _event: &PreToolUseEvent) -> HookDecision {
        HookDecision::Continue
    }
    async fn check_user_prompt_submit(&self, _event: &UserPromptSubmitEvent) -> HookDecision {
        HookDecision::Continue
    }
}

/// Container for registering and dispatching lifecycle hooks.
#[derive(Clone, Default)]
pub struct Hooks {
    observers: Vec<Arc<dyn Observer>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    controllers: Vec<Arc<dyn Controller>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn with_controller(mut self, controller: Arc<dyn Controller>) -> Self {
        self.controllers.push(controller);
        self
    }

    /// Merge another hook set into this one (used when a subagent inherits hooks from
    /// its parent but adds its own on top).
    pub fn merge(mut self, other: Hooks) -> Self {
        self.observers.extend(other.observers);
        self.interceptors.extend(other.interceptors);
        self.controllers.extend(other.controllers);
        self
    }

    pub async fn dispatch_pre_tool_use(&self, event: &PreToolUseEvent) -> HookDecision {
        for controller in &self.controllers {
            let decision = controller.check_pre_tool_use(event).await;
            if decision != HookDecision::Continue {
                return decision;
            }
        }
        for observer in &self.observers {
            observer.on_pre_tool_use(event).await;
        }
        HookDecision::Continue
    }

    pub async fn dispatch_post_tool_use(&self, event: &PostToolUseEvent) {
        for observer in &self.observers {
            observer.on_post_tool_use(event).await;
        }
    }

    pub async fn dispatch_user_prompt_submit(&self, event: &UserPromptSubmitEvent) -> HookDecision {
        for controller in &self.controllers {
            let decision = controller.check_user_prompt_submit(event).await;
            if decision != HookDecision::Continue {
                return decision;
            }
        }
        for observer in &self.observers {
            observer.on_user_prompt_submit(event).await;
        }
        HookDecision::Continue
    }

    pub async fn dispatch_iteration(&self, iteration: u32) {
        for observer in &self.observers {
            observer.on_iteration(iteration).await;
        }
    }

    pub async fn rewrite_prompt(&self, mut prompt: String, history: &[Message]) -> String {
        for interceptor in &self.interceptors {
            prompt = interceptor.rewrite_prompt(prompt, history).await;
        }
        prompt
    }

    pub async fn rewrite_tool_input(&self, tool_name: &str, mut input: Value) -> Value {
        for interceptor in &self.interceptors {
            input = interceptor.rewrite_tool_input(tool_name, input).await;
        }
        input
    }
}

/// A ready-made observer that logs every hook event at `debug` level via the `log` facade.
pub struct LoggingObserver;

#[async_trait]
impl Observer for LoggingObserver {
    async fn on_pre_tool_use(&self, event: &PreToolUseEvent) {
        log::debug!("PreToolUse: {} ({})", event.tool_name, event.tool_id);
    }

    async fn on_post_tool_use(&self, event: &PostToolUseEvent) {
        log::debug!(
            "PostToolUse: {} ({}) error={}",
            event.tool_name,
            event.tool_id,
            event.is_error
        );
    }

    async fn on_user_prompt_submit(&self, event: &UserPromptSubmitEvent) {
        log::debug!("UserPromptSubmit: {} chars", event.prompt.len());
    }

    async fn on_iteration(&self, iteration: u32) {
        log::debug!("agent loop iteration {}", iteration);
    }
}

/// A ready-made observer that tracks wall-clock time spent per gadget call and logs it
/// at `info` level when the call completes. Timing starts at `on_pre_tool_use` and is
/// reported at `on_post_tool_use`; an invocation id with no matching start (e.g. one
/// denied before dispatch) is simply skipped.
#[derive(Default)]
pub struct TimingObserver {
    starts: Mutex<std::collections::HashMap<String, Instant>>,
}

impl TimingObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Observer for TimingObserver {
    async fn on_pre_tool_use(&self, event: &PreToolUseEvent) {
        self.starts.lock().await.insert(event.tool_id.clone(), Instant::now());
    }

    async fn on_post_tool_use(&self, event: &PostToolUseEvent) {
        if let Some(start) = self.starts.lock().await.remove(&event.tool_id) {
            log::info!(
                "gadget {} ({}) took {:?}",
                event.tool_name,
                event.tool_id,
                start.elapsed()
            );
        }
    }
}

/// A ready-made observer that accumulates a running count of dispatched gadget calls and
/// how many ended in error, for a caller that wants a cheap usage summary without wiring
/// its own observer. Token usage itself lives on the execution tree (gadget outcomes
/// don't carry provider token counts); this preset tracks call volume instead.
#[derive(Default)]
pub struct TokenTrackingObserver {
    calls: AtomicU64,
    errors: AtomicU64,
}

impl TokenTrackingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Observer for TokenTrackingObserver {
    async fn on_post_tool_use(&self, event: &PostToolUseEvent) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if event.is_error {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A ready-made interceptor that prepends `[System Hint] iteration N/M, K remaining` to
/// the outbound prompt, reminding the model of its remaining iteration budget. Built
/// fresh for a run since it needs `max_iterations`; the current iteration is threaded
/// through via an `AtomicU64` the agent loop bumps each turn.
pub struct IterationProgressHint {
    max_iterations: u32,
    current: AtomicU64,
}

impl IterationProgressHint {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            current: AtomicU64::new(0),
        }
    }

    /// Called by the agent loop at the top of each iteration so the hint reflects the
    /// iteration actually being prepared.
    pub fn set_iteration(&self, iteration: u32) {
        self.current.store(iteration as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl Interceptor for IterationProgressHint {
    async fn rewrite_prompt(&self, prompt: String, _history: &[Message]) -> String {
        let iteration = self.current.load(Ordering::SeqCst) as u32;
        let remaining = self.max_iterations.saturating_sub(iteration + 1);
        format!(
            "[System Hint] iteration {}/{}, {} remaining\n{}",
            iteration + 1,
            self.max_iterations,
            remaining,
            prompt
        )
    }
}

/// Register alongside the `Interceptor` impl (e.g. via both `with_observer` and
/// `with_interceptor` on the same `Arc`) so the loop's per-iteration `on_iteration` call
/// keeps `current` in sync without the caller having to call `set_iteration` by hand.
#[async_trait]
impl Observer for IterationProgressHint {
    async fn on_iteration(&self, iteration: u32) {
        self.set_iteration(iteration);
    }
}

/// A ready-made observer that suggests batching gadget calls when a turn dispatched
/// fewer than `threshold` of them, logging the suggestion at `info` level. Reactive
/// (fires after the batch completes), mirroring the spec's `parallel_gadget_hint` preset.
pub struct ParallelGadgetHint {
    threshold: usize,
}

impl ParallelGadgetHint {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }
}

#[async_trait]
impl Observer for ParallelGadgetHint {
    async fn on_post_tool_use(&self, event: &PostToolUseEvent) {
        if self.threshold > 1 {
            log::info!(
                "gadget '{}' ran alone this turn; consider batching up to {} calls per turn \
                 when the task allows it",
                event.tool_name,
                self.threshold
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyGadget(&'static str);

    #[async_trait]
    impl Controller for DenyGadget {
        async fn check_pre_tool_use(&self, event: &PreToolUseEvent) -> HookDecision {
            if event.tool_name == self.0 {
                HookDecision::Block("not allowed".to_string())
            } else {
                HookDecision::Continue
            }
        }
    }

    #[tokio::test]
    async fn controller_blocks_matching_gadget() {
        let hooks = Hooks::new().with_controller(Arc::new(DenyGadget("dangerous")));
        let event = PreToolUseEvent {
            tool_name: "dangerous".into(),
            tool_id: "1".into(),
            input: Value::Null,
            history: vec![],
        };
        let decision = hooks.dispatch_pre_tool_use(&event).await;
        assert_eq!(decision, HookDecision::Block("not allowed".to_string()));
    }

    #[tokio::test]
    async fn controller_allows_other_gadgets() {
        let hooks = Hooks::new().with_controller(Arc::new(DenyGadget("dangerous")));
        let event = PreToolUseEvent {
            tool_name: "safe".into(),
            tool_id: "1".into(),
            input: Value::Null,
            history: vec![],
        };
        let decision = hooks.dispatch_pre_tool_use(&event).await;
        assert_eq!(decision, HookDecision::Continue);
    }

    struct UppercaseInterceptor;

    #[async_trait]
    impl Interceptor for UppercaseInterceptor {
        async fn rewrite_prompt(&self, prompt: String, _history: &[Message]) -> String {
            prompt.to_uppercase()
        }
    }

    #[tokio::test]
    async fn interceptor_rewrites_prompt() {
        let hooks = Hooks::new().with_interceptor(Arc::new(UppercaseInterceptor));
        let rewritten = hooks.rewrite_prompt("hi".to_string(), &[]).await;
        assert_eq!(rewritten, "HI");
    }

    #[tokio::test]
    async fn merge_combines_both_hook_sets() {
        let a = Hooks::new().with_controller(Arc::new(DenyGadget("x")));
        let b = Hooks::new().with_controller(Arc::new(DenyGadget("y")));
        let merged = a.merge(b);

        let event = PreToolUseEvent {
            tool_name: "y".into(),
            tool_id: "1".into(),
            input: Value::Null,
            history: vec![],
        };
        assert_eq!(
            merged.dispatch_pre_tool_use(&event).await,
            HookDecision::Block("not allowed".to_string())
        );
    }

    #[tokio::test]
    async fn timing_observer_only_reports_calls_it_saw_start() {
        let timing = TimingObserver::new();
        let pre = PreToolUseEvent {
            tool_name: "slow".into(),
            tool_id: "1".into(),
            input: Value::Null,
            history: vec![],
        };
        timing.on_pre_tool_use(&pre).await;

        let post = PostToolUseEvent {
            tool_name: "slow".into(),
            tool_id: "1".into(),
            input: Value::Null,
            result: "done".into(),
            is_error: false,
            history: vec![],
        };
        timing.on_post_tool_use(&post).await;
        // No start recorded for "2"; must not panic.
        let post_unseen = PostToolUseEvent { tool_id: "2".into(), ..post };
        timing.on_post_tool_use(&post_unseen).await;
    }

    #[tokio::test]
    async fn token_tracking_observer_counts_calls_and_errors() {
        let tracker = TokenTrackingObserver::new();
        let ok = PostToolUseEvent {
            tool_name: "a".into(),
            tool_id: "1".into(),
            input: Value::Null,
            result: "ok".into(),
            is_error: false,
            history: vec![],
        };
        let err = PostToolUseEvent { tool_id: "2".into(), is_error: true, ..ok.clone() };
        tracker.on_post_tool_use(&ok).await;
        tracker.on_post_tool_use(&err).await;
        assert_eq!(tracker.calls(), 2);
        assert_eq!(tracker.errors(), 1);
    }

    #[tokio::test]
    async fn iteration_progress_hint_reflects_current_iteration() {
        let hint = IterationProgressHint::new(5);
        hint.set_iteration(1);
        let rewritten = hint.rewrite_prompt("go".to_string(), &[]).await;
        assert_eq!(rewritten, "[System Hint] iteration 2/5, 3 remaining\ngo");
    }

    #[tokio::test]
    async fn iteration_progress_hint_self_updates_via_dispatch_iteration() {
        let hint = Arc::new(IterationProgressHint::new(5));
        let hooks = Hooks::new()
            .with_observer(hint.clone())
            .with_interceptor(hint.clone());

        hooks.dispatch_iteration(3).await;
        let rewritten = hooks.rewrite_prompt("go".to_string(), &[]).await;
        assert_eq!(rewritten, "[System Hint] iteration 4/5, 1 remaining\ngo");
    }
}
