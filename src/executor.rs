//! The gadget executor: turns a batch of parsed gadget calls from one turn into a batch
//! of [`ToolResultBlock`]s. Per call this looks the gadget up in the registry, clears it
//! through the [`ApprovalGate`], dispatches it under both the executor-wide concurrency
//! limit and that gadget's own `max_concurrent` bound (serialized across the whole run,
//! not just one batch, when `max_concurrent == 1`), and a per-call timeout, then maps
//! whatever [`GadgetOutcome`] comes back onto a result block the conversation can
//! append. Calls within a batch run concurrently; their results are reassembled in the
//! original call order before being returned.

use crate::approval::{ApprovalDecision, ApprovalGate};
use crate::gadget::{GadgetContext, GadgetOutcome, GadgetRegistry, SubagentFactory};
use crate::hooks::{HookDecision, Hooks, PostToolUseEvent, PreToolUseEvent};
use crate::media::MediaStore;
use crate::tree::{ExecutionTree, NodeKind};
use crate::types::{Message, TokenUsage, ToolResultBlock, ToolUseBlock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Per-call outcome the executor reports back to the agent loop, carrying enough to both
/// append a result and decide whether the run should stop.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub tool_use_id: String,
    pub gadget_name: String,
    pub outcome: GadgetOutcome,
}

impl DispatchResult {
    pub fn to_tool_result_block(&self) -> ToolResultBlock {
        let content = self.outcome.to_result_content();
        if self.outcome.is_error() {
            ToolResultBlock::error(self.tool_use_id.clone(), content)
        } else {
            ToolResultBlock::new(self.tool_use_id.clone(), content)
        }
    }
}

/// Dispatches gadget calls against a registry, honoring approval, concurrency, and
/// timeout settings for a single agent run.
pub struct GadgetExecutor {
    registry: Arc<GadgetRegistry>,
    approval: Arc<ApprovalGate>,
    hooks: Hooks,
    semaphore: Arc<Semaphore>,
    /// Per-gadget-name semaphores for gadgets declared with `max_concurrent > 0`,
    /// serializing (or bounding) that gadget's invocations across the whole run,
    /// independent of the executor-wide limit above.
    gadget_semaphores: HashMap<String, Arc<Semaphore>>,
    timeout: Duration,
    media_store: Arc<MediaStore>,
    tree: Arc<ExecutionTree>,
    subagents: Arc<dyn SubagentFactory>,
}

impl GadgetExecutor {
    pub fn new(
        registry: Arc<GadgetRegistry>,
        approval: Arc<ApprovalGate>,
        hooks: Hooks,
        max_concurrent: usize,
        timeout: Duration,
        media_store: Arc<MediaStore>,
        tree: Arc<ExecutionTree>,
        subagents: Arc<dyn SubagentFactory>,
    ) -> Self {
        let gadget_semaphores = registry
            .iter()
            .filter(|g| g.max_concurrent > 0)
            .map(|g| (g.name.clone(), Arc::new(Semaphore::new(g.max_concurrent))))
            .collect();
        Self {
            registry,
            approval,
            hooks,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            gadget_semaphores,
            timeout,
            media_store,
            tree,
            subagents,
        }
    }

    /// Dispatch every call in a turn concurrently (bounded by the configured
    /// concurrency limit), returning results in the same order as `calls`. Each call's
    /// execution-tree node is parented to `parent_node_id` (the LLM call that produced
    /// the turn's gadget calls), so a subagent it spawns nests correctly underneath it.
    pub async fn dispatch_batch(
        &self,
        calls: &[ToolUseBlock],
        history: &[Message],
        signal: &CancellationToken,
        parent_node_id: Option<String>,
    ) -> Vec<DispatchResult> {
        let futures = calls
            .iter()
            .map(|call| self.dispatch_one(call, history, signal, parent_node_id.clone()));
        futures::future::join_all(futures).await
    }

    async fn dispatch_one(
        &self,
        call: &ToolUseBlock,
        history: &[Message],
        signal: &CancellationToken,
        parent_node_id: Option<String>,
    ) -> DispatchResult {
        let make_result = |outcome: GadgetOutcome| DispatchResult {
            tool_use_id: call.id.clone(),
            gadget_name: call.name.clone(),
            outcome,
        };

        let node_id = self.tree.append(
            parent_node_id,
            NodeKind::GadgetCall { name: call.name.clone() },
            TokenUsage::default(),
        );

        let Some(descriptor) = self.registry.get(&call.name) else {
            return make_result(GadgetOutcome::Error(format!(
                "unknown gadget '{}'",
                call.name
            )));
        };

        let pre_event = PreToolUseEvent {
            tool_name: call.name.clone(),
            tool_id: call.id.clone(),
            input: call.input.clone(),
            history: history.to_vec(),
        };
        let input = match self.hooks.dispatch_pre_tool_use(&pre_event).await {
            HookDecision::Block(reason) => {
                return make_result(GadgetOutcome::Error(format!(
                    "blocked by hook: {}",
                    reason
                )));
            }
            HookDecision::Modify(value) => value,
            HookDecision::Continue => call.input.clone(),
        };
        let input = self.hooks.rewrite_tool_input(&call.name, input).await;

        match self
            .approval
            .resolve(&call.name, &call.id, &input, descriptor.policy)
        {
            ApprovalDecision::Denied(reason) => {
                return make_result(GadgetOutcome::Error(format!("denied: {}", reason)));
            }
            ApprovalDecision::Pending => {
                return make_result(GadgetOutcome::HumanInputRequired {
                    prompt: format!(
                        "gadget '{}' requires approval before it can run",
                        call.name
                    ),
                });
            }
            ApprovalDecision::Allowed => {}
        }

        let _permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return make_result(GadgetOutcome::Aborted {
                reason: "executor shut down".to_string(),
            }),
        };

        let _gadget_permit = match self.gadget_semaphores.get(&call.name) {
            Some(sem) => match sem.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return make_result(GadgetOutcome::Aborted {
                    reason: "executor shut down".to_string(),
                }),
            },
            None => None,
        };

        let call_signal = signal.child_token();
        let ctx = GadgetContext {
            invocation_id: call.id.clone(),
            signal: call_signal.clone(),
            media_store: self.media_store.clone(),
            node_id,
            subagents: Some(self.subagents.clone()),
        };

        let outcome = tokio::select! {
            result = tokio::time::timeout(self.timeout, descriptor.execute(input.clone(), ctx)) => {
                match result {
                    Ok(outcome) => outcome,
                    Err(_) => GadgetOutcome::Timeout,
                }
            }
            _ = signal.cancelled() => {
                call_signal.cancel();
                GadgetOutcome::Aborted { reason: "run was cancelled".to_string() }
            }
        };

        let post_event = PostToolUseEvent {
            tool_name: call.name.clone(),
            tool_id: call.id.clone(),
            input,
            result: outcome.to_result_content(),
            is_error: outcome.is_error(),
            history: history.to_vec(),
        };
        self.hooks.dispatch_post_tool_use(&post_event).await;

        make_result(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalMode;
    use crate::gadget::{gadget, GadgetRegistry, SubagentOutput, SubagentSpec};
    use crate::schema::SchemaNode;
    use serde_json::json;

    struct NoSubagents;

    #[async_trait::async_trait]
    impl SubagentFactory for NoSubagents {
        async fn spawn(&self, _spec: SubagentSpec, _parent_node_id: &str) -> crate::error::Result<SubagentOutput> {
            Err(crate::error::Error::gadget("no subagent factory configured in this test"))
        }
    }

    fn no_subagents() -> Arc<dyn SubagentFactory> {
        Arc::new(NoSubagents)
    }

    fn registry_with_echo() -> Arc<GadgetRegistry> {
        let mut reg = GadgetRegistry::new();
        reg.register(
            gadget("echo")
                .schema(SchemaNode::object([("msg", SchemaNode::String)]))
                .handler(|input, _ctx| async move {
                    GadgetOutcome::Success(input["msg"].clone())
                })
                .build()
                .unwrap(),
        )
        .unwrap();
        Arc::new(reg)
    }

    #[tokio::test]
    async fn dispatches_known_gadget_successfully() {
        let executor = GadgetExecutor::new(
            registry_with_echo(),
            Arc::new(ApprovalGate::new()),
            Hooks::new(),
            4,
            Duration::from_secs(5),
            Arc::new(MediaStore::new("test")),
            Arc::new(ExecutionTree::new()),
            no_subagents(),
        );
        let call = ToolUseBlock::new("1", "echo", json!({"msg": "hi"}));
        let signal = CancellationToken::new();

        let results = executor.dispatch_batch(&[call], &[], &signal, None).await;
        assert_eq!(results.len(), 1);
        match &results[0].outcome {
            GadgetOutcome::Success(v) => assert_eq!(v, &json!("hi")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_gadget_errors_without_dispatch() {
        let executor = GadgetExecutor::new(
            registry_with_echo(),
            Arc::new(ApprovalGate::new()),
            Hooks::new(),
            4,
            Duration::from_secs(5),
            Arc::new(MediaStore::new("test")),
            Arc::new(ExecutionTree::new()),
            no_subagents(),
        );
        let call = ToolUseBlock::new("1", "missing", json!({}));
        let signal = CancellationToken::new();

        let results = executor.dispatch_batch(&[call], &[], &signal, None).await;
        assert!(results[0].outcome.is_error());
    }

    #[tokio::test]
    async fn denied_gadget_never_runs() {
        let approval = ApprovalGate::new().with_override("echo", ApprovalMode::Denied);
        let executor = GadgetExecutor::new(
            registry_with_echo(),
            Arc::new(approval),
            Hooks::new(),
            4,
            Duration::from_secs(5),
            Arc::new(MediaStore::new("test")),
            Arc::new(ExecutionTree::new()),
            no_subagents(),
        );
        let call = ToolUseBlock::new("1", "echo", json!({"msg": "hi"}));
        let signal = CancellationToken::new();

        let results = executor.dispatch_batch(&[call], &[], &signal, None).await;
        assert!(results[0].outcome.is_error());
    }

    #[tokio::test]
    async fn approval_required_without_callback_is_human_input_required() {
        let approval = ApprovalGate::new().with_override("echo", ApprovalMode::ApprovalRequired);
        let executor = GadgetExecutor::new(
            registry_with_echo(),
            Arc::new(approval),
            Hooks::new(),
            4,
            Duration::from_secs(5),
            Arc::new(MediaStore::new("test")),
            Arc::new(ExecutionTree::new()),
            no_subagents(),
        );
        let call = ToolUseBlock::new("1", "echo", json!({"msg": "hi"}));
        let signal = CancellationToken::new();

        let results = executor.dispatch_batch(&[call], &[], &signal, None).await;
        assert!(matches!(
            results[0].outcome,
            GadgetOutcome::HumanInputRequired { .. }
        ));
    }

    #[tokio::test]
    async fn slow_gadget_times_out() {
        let mut reg = GadgetRegistry::new();
        reg.register(
            gadget("slow")
                .handler(|_input, _ctx| async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    GadgetOutcome::Success(json!("done"))
                })
                .build()
                .unwrap(),
        )
        .unwrap();

        let executor = GadgetExecutor::new(
            Arc::new(reg),
            Arc::new(ApprovalGate::new()),
            Hooks::new(),
            4,
            Duration::from_millis(5),
            Arc::new(MediaStore::new("test")),
            Arc::new(ExecutionTree::new()),
            no_subagents(),
        );
        let call = ToolUseBlock::new("1", "slow", json!({}));
        let signal = CancellationToken::new();

        let results = executor.dispatch_batch(&[call], &[], &signal, None).await;
        assert!(matches!(results[0].outcome, GadgetOutcome::Timeout));
    }

    #[tokio::test]
    async fn batch_dispatch_preserves_call_order() {
        let mut reg = GadgetRegistry::new();
        for n in ["a", "b", "c"] {
            reg.register(
                gadget(n)
                    .handler(move |_input, _ctx| async move { GadgetOutcome::Success(json!(n)) })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        }

        let executor = GadgetExecutor::new(
            Arc::new(reg),
            Arc::new(ApprovalGate::new()),
            Hooks::new(),
            4,
            Duration::from_secs(5),
            Arc::new(MediaStore::new("test")),
            Arc::new(ExecutionTree::new()),
            no_subagents(),
        );
        let calls = vec![
            ToolUseBlock::new("1", "a", json!({})),
            ToolUseBlock::new("2", "b", json!({})),
            ToolUseBlock::new("3", "c", json!({})),
        ];
        let signal = CancellationToken::new();

        let results = executor.dispatch_batch(&calls, &[], &signal, None).await;
        let names: Vec<&str> = results.iter().map(|r| r.gadget_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn per_gadget_max_concurrent_one_serializes_invocations() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut reg = GadgetRegistry::new();
        {
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            reg.register(
                gadget("serial")
                    .max_concurrent(1)
                    .handler(move |_input, _ctx| {
                        let in_flight = in_flight.clone();
                        let max_seen = max_seen.clone();
                        async move {
                            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            GadgetOutcome::Success(json!("ok"))
                        }
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        }

        let executor = GadgetExecutor::new(
            Arc::new(reg),
            Arc::new(ApprovalGate::new()),
            Hooks::new(),
            4,
            Duration::from_secs(5),
            Arc::new(MediaStore::new("test")),
            Arc::new(ExecutionTree::new()),
            no_subagents(),
        );
        let calls = vec![
            ToolUseBlock::new("1", "serial", json!({})),
            ToolUseBlock::new("2", "serial", json!({})),
            ToolUseBlock::new("3", "serial", json!({})),
        ];
        let signal = CancellationToken::new();

        let results = executor.dispatch_batch(&calls, &[], &signal, None).await;
        assert!(results.iter().all(|r| !r.outcome.is_error()));
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_signal_aborts_pending_dispatch() {
        let mut reg = GadgetRegistry::new();
        reg.register(
            gadget("slow")
                .handler(|_input, _ctx| async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    GadgetOutcome::Success(json!("done"))
                })
                .build()
                .unwrap(),
        )
        .unwrap();

        let executor = GadgetExecutor::new(
            Arc::new(reg),
            Arc::new(ApprovalGate::new()),
            Hooks::new(),
            4,
            Duration::from_secs(30),
            Arc::new(MediaStore::new("test")),
            Arc::new(ExecutionTree::new()),
            no_subagents(),
        );
        let call = ToolUseBlock::new("1", "slow", json!({}));
        let signal = CancellationToken::new();
        signal.cancel();

        let results = executor.dispatch_batch(&[call], &[], &signal, None).await;
        assert!(matches!(results[0].outcome, GadgetOutcome::Aborted { .. }));
    }
}
