//! Gadgets: the SDK's term for tools the model can call. A gadget is a name, a
//! description, a parameter schema, and an async handler. This module defines the
//! descriptor/registry used to advertise gadgets to the model and the [`GadgetOutcome`]
//! sum type the executor uses in place of exception-based control flow.

use crate::error::{Error, Result};
use crate::media::MediaStore;
use crate::schema::SchemaNode;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Whether a gadget may run without explicit human sign-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GadgetPolicy {
    /// Runs automatically once validated.
    Auto,
    /// Must be cleared by the [`crate::approval::ApprovalGate`] before it runs.
    RequiresApproval,
}

/// Parameters a gadget supplies when starting a child agent run.
#[derive(Debug, Clone)]
pub struct SubagentSpec {
    /// Overrides the parent run's system prompt for the child, if set.
    pub system_prompt: Option<String>,
    /// The child run's opening user message.
    pub prompt: String,
    /// Overrides the parent run's iteration budget for the child, if set.
    pub max_iterations: Option<u32>,
}

impl SubagentSpec {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: None,
            prompt: prompt.into(),
            max_iterations: None,
        }
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }
}

/// What a completed subagent run produced.
#[derive(Debug, Clone)]
pub struct SubagentOutput {
    pub text: String,
    pub finish_reason: String,
}

/// Injected into [`GadgetContext`] so a gadget handler can start a child agent run
/// without this module depending on the agent loop directly — the loop already depends
/// on gadgets, so the dependency can't run the other way without a cycle. The loop's
/// implementation parents the child run's execution-tree nodes under the invoking
/// gadget call, so subtree usage aggregation rolls the child's cost up into the parent's.
#[async_trait]
pub trait SubagentFactory: Send + Sync {
    async fn spawn(&self, spec: SubagentSpec, parent_node_id: &str) -> Result<SubagentOutput>;
}

/// Context handed to a gadget's handler: its call arguments, the invocation id, a
/// cancellation signal the handler should honor for long-running work, a handle to the
/// run's session-scoped media store for image/audio outputs, this invocation's own
/// execution-tree node id, and (when running inside a full agent loop) a handle to
/// spawn a child agent run parented under that node.
pub struct GadgetContext {
    pub invocation_id: String,
    pub signal: tokio_util::sync::CancellationToken,
    pub media_store: Arc<MediaStore>,
    pub node_id: String,
    pub subagents: Option<Arc<dyn SubagentFactory>>,
}

impl GadgetContext {
    /// Store a media blob produced by this invocation, returning the opaque id to embed
    /// in the gadget's text result (e.g. `"media:<id>"`) rather than inlining raw bytes.
    pub async fn store_media(&self, gadget_name: &str, output: crate::media::MediaOutput) -> Result<String> {
        self.media_store.store(gadget_name, output).await
    }

    /// Start a child agent run parented to this invocation's execution-tree node,
    /// returning its final text and why it stopped. Errs if this run has no subagent
    /// factory configured (e.g. a standalone `GadgetContext::for_test`).
    pub async fn spawn_subagent(&self, spec: SubagentSpec) -> Result<SubagentOutput> {
        let factory = self
            .subagents
            .as_ref()
            .ok_or_else(|| Error::gadget("this run has no subagent factory configured"))?;
        factory.spawn(spec, &self.node_id).await
    }

    /// A throwaway context for tests and standalone gadget invocation outside a full run.
    pub fn for_test(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            signal: tokio_util::sync::CancellationToken::new(),
            media_store: Arc::new(MediaStore::new("test")),
            node_id: "test-node".to_string(),
            subagents: None,
        }
    }
}

/// The result of running a gadget, replacing exception-based control flow with an
/// explicit sum type the agent loop switches on.
#[derive(Debug, Clone)]
pub enum GadgetOutcome {
    /// Normal success; the value is serialized back into a tool-result message.
    Success(Value),
    /// The gadget signals the agent's task is complete; the loop should stop iterating
    /// after appending this result.
    TaskComplete(Value),
    /// The gadget needs a human in the loop before the run can continue (e.g. the
    /// approval gate deferred the call, or the handler itself asked a clarifying
    /// question). The loop surfaces this as a terminal, resumable run state.
    HumanInputRequired { prompt: String },
    /// The run was aborted mid-execution (cancellation token fired, or the handler
    /// chose to abort outright).
    Aborted { reason: String },
    /// The gadget exceeded its timeout.
    Timeout,
    /// The gadget failed. Unlike [`crate::Error`], this re-enters the conversation as a
    /// tool result so the model can see the failure and retry or adapt.
    Error(String),
}

impl GadgetOutcome {
    /// True for any outcome that should terminate the run rather than continue the loop.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GadgetOutcome::TaskComplete(_)
                | GadgetOutcome::HumanInputRequired { .. }
                | GadgetOutcome::Aborted { .. }
        )
    }

    /// Render this outcome as the string content of a tool-result message.
    pub fn to_result_content(&self) -> String {
        match self {
            GadgetOutcome::Success(v) | GadgetOutcome::TaskComplete(v) => v.to_string(),
            GadgetOutcome::HumanInputRequired { prompt } => prompt.clone(),
            GadgetOutcome::Aborted { reason } => format!("aborted: {}", reason),
            GadgetOutcome::Timeout => "gadget invocation timed out".to_string(),
            GadgetOutcome::Error(msg) => msg.clone(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            GadgetOutcome::Error(_) | GadgetOutcome::Timeout | GadgetOutcome::Aborted { .. }
        )
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = GadgetOutcome> + Send>>;

/// Trait object interface for gadget handlers. Implemented automatically for any async
/// function matching the signature via [`GadgetBuilder::handler`].
#[async_trait]
pub trait GadgetHandler: Send + Sync {
    async fn call(&self, input: Value, ctx: GadgetContext) -> GadgetOutcome;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> GadgetHandler for FnHandler<F>
where
    F: Fn(Value, GadgetContext) -> Fut + Send + Sync,
    Fut: Future<Output = GadgetOutcome> + Send + 'static,
{
    async fn call(&self, input: Value, ctx: GadgetContext) -> GadgetOutcome {
        (self.0)(input, ctx).await
    }
}

/// A registered gadget: name, description, parameter schema, policy, and handler.
#[derive(Clone)]
pub struct GadgetDescriptor {
    pub name: String,
    pub description: String,
    pub schema: Arc<SchemaNode>,
    pub policy: GadgetPolicy,
    /// Per-gadget-name concurrency bound across the whole run, independent of the
    /// executor's overall `max_concurrent_gadgets` limit. `0` means unbounded (only the
    /// executor-wide limit applies); `1` serializes every invocation of this gadget,
    /// including across iterations; `N > 1` allows up to `N` concurrent invocations.
    pub max_concurrent: usize,
    handler: Arc<dyn GadgetHandler>,
}

impl GadgetDescriptor {
    pub fn builder(name: impl Into<String>) -> GadgetBuilder {
        GadgetBuilder::new(name)
    }

    pub async fn execute(&self, input: Value, ctx: GadgetContext) -> GadgetOutcome {
        if let Err(e) = self.schema.validate(&input) {
            return GadgetOutcome::Error(format!("invalid arguments for '{}': {}", self.name, e));
        }
        self.handler.call(input, ctx).await
    }
}

impl std::fmt::Debug for GadgetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GadgetDescriptor")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Builder for [`GadgetDescriptor`]. Required: `description`, `schema`, `handler`.
pub struct GadgetBuilder {
    name: String,
    description: Option<String>,
    schema: Option<SchemaNode>,
    policy: GadgetPolicy,
    max_concurrent: usize,
    handler: Option<Arc<dyn GadgetHandler>>,
}

impl GadgetBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            schema: None,
            policy: GadgetPolicy::Auto,
            max_concurrent: 0,
            handler: None,
        }
    }

    /// Bound how many invocations of this gadget may run at once, across the whole run
    /// (not just one iteration's batch). `1` serializes it entirely; `0` (the default)
    /// leaves it bounded only by the executor's overall concurrency limit.
    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn schema(mut self, schema: SchemaNode) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn requires_approval(mut self) -> Self {
        self.policy = GadgetPolicy::RequiresApproval;
        self
    }

    pub fn handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, GadgetContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GadgetOutcome> + Send + 'static,
    {
        self.handler = Some(Arc::new(FnHandler(f)));
        self
    }

    pub fn build(self) -> Result<GadgetDescriptor> {
        if self.name.trim().is_empty() {
            return Err(Error::config("gadget name cannot be empty"));
        }
        let handler = self
            .handler
            .ok_or_else(|| Error::config(format!("gadget '{}' has no handler", self.name)))?;
        Ok(GadgetDescriptor {
            name: self.name,
            description: self.description.unwrap_or_default(),
            schema: Arc::new(self.schema.unwrap_or(SchemaNode::Object(Vec::new()))),
            policy: self.policy,
            max_concurrent: self.max_concurrent,
            handler,
        })
    }
}

/// Convenience function mirroring the teacher's `tool()` free function: start a builder.
pub fn gadget(name: impl Into<String>) -> GadgetBuilder {
    GadgetDescriptor::builder(name)
}

/// A collection of gadgets, looked up by name when the agent loop dispatches a call.
#[derive(Clone, Default)]
pub struct GadgetRegistry {
    gadgets: HashMap<String, GadgetDescriptor>,
}

impl GadgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gadget, rejecting name collisions.
    pub fn register(&mut self, gadget: GadgetDescriptor) -> Result<()> {
        if self.gadgets.contains_key(&gadget.name) {
            return Err(Error::gadget(format!(
                "gadget '{}' is already registered",
                gadget.name
            )));
        }
        self.gadgets.insert(gadget.name.clone(), gadget);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&GadgetDescriptor> {
        self.gadgets.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GadgetDescriptor> {
        self.gadgets.values()
    }

    pub fn len(&self) -> usize {
        self.gadgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gadgets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn executes_handler_on_valid_input() {
        let g = gadget("add")
            .description("adds two numbers")
            .schema(SchemaNode::object([
                ("a", SchemaNode::Number),
                ("b", SchemaNode::Number),
            ]))
            .handler(|input, _ctx| async move {
                let a = input["a"].as_f64().unwrap_or(0.0);
                let b = input["b"].as_f64().unwrap_or(0.0);
                GadgetOutcome::Success(json!(a + b))
            })
            .build()
            .unwrap();

        let out = g.execute(json!({"a": 2, "b": 3}), GadgetContext::for_test("1")).await;

        match out {
            GadgetOutcome::Success(v) => assert_eq!(v, json!(5.0)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejects_invalid_input_before_calling_handler() {
        let g = gadget("add")
            .schema(SchemaNode::object([("a", SchemaNode::Number)]))
            .handler(|_input, _ctx| async move { GadgetOutcome::Success(json!(null)) })
            .build()
            .unwrap();

        let out = g
            .execute(
                json!({}),
                GadgetContext::for_test("1"),
            )
            .await;

        assert!(matches!(out, GadgetOutcome::Error(_)));
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let mut reg = GadgetRegistry::new();
        let g1 = gadget("x")
            .handler(|_i, _c| async move { GadgetOutcome::Success(json!(null)) })
            .build()
            .unwrap();
        let g2 = gadget("x")
            .handler(|_i, _c| async move { GadgetOutcome::Success(json!(null)) })
            .build()
            .unwrap();

        reg.register(g1).unwrap();
        assert!(reg.register(g2).is_err());
    }

    #[test]
    fn build_requires_handler() {
        assert!(gadget("x").build().is_err());
    }

    #[tokio::test]
    async fn spawn_subagent_without_factory_errors() {
        let ctx = GadgetContext::for_test("1");
        let result = ctx.spawn_subagent(SubagentSpec::new("do something")).await;
        assert!(result.is_err());
    }
}
