//! The approval gate: resolves whether a gadget call may run automatically, must be
//! denied outright, or needs a human decision first.
//!
//! Resolution order for a single call: an explicit per-gadget [`ApprovalMode`] override
//! wins if set; otherwise the gadget's own [`crate::gadget::GadgetPolicy`] decides
//! (`Auto` runs immediately, `RequiresApproval` goes through the configured callback).
//! Once a human has decided on a given invocation id, the decision is cached so retries
//! within the same run don't re-prompt.

use crate::gadget::GadgetPolicy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// How a specific gadget (by name) should be gated, overriding its own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalMode {
    Allowed,
    Denied,
    ApprovalRequired,
}

/// The outcome of resolving an approval check for one gadget call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalDecision {
    Allowed,
    Denied(String),
    Pending,
}

/// Context handed to the approval callback describing the call awaiting a decision. When
/// a context provider is registered for `gadget_name`, `summary`/`details` carry its
/// rendering of `input` (e.g. a one-line description and a unified diff) so an
/// interactive callback can show the user something more legible than raw JSON.
#[derive(Debug, Clone)]
pub struct ApprovalContext {
    pub gadget_name: String,
    pub invocation_id: String,
    pub input: Value,
    pub summary: Option<String>,
    pub details: Option<String>,
}

/// Callback invoked to resolve a pending approval. Returns `true` to allow, `false` to
/// deny. In an interactive CLI this is typically a prompt to the user; in a server this
/// might check an out-of-band approval queue.
pub type ApprovalCallback = Box<dyn Fn(&ApprovalContext) -> bool + Send + Sync>;

/// Renders a gadget's call arguments into a human-legible summary (and optional longer
/// detail, e.g. a unified diff for a file write or the full command line for a shell
/// exec) for display alongside the approval prompt.
pub type ContextProvider = Box<dyn Fn(&Value) -> (String, Option<String>) + Send + Sync>;

/// Gate that decides whether a gadget call may proceed.
pub struct ApprovalGate {
    overrides: HashMap<String, ApprovalMode>,
    callback: Option<ApprovalCallback>,
    context_providers: HashMap<String, ContextProvider>,
    /// Caches decisions by invocation id so a re-dispatched retry doesn't re-prompt.
    cache: Mutex<HashMap<String, ApprovalDecision>>,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            callback: None,
            context_providers: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force a specific gadget to always allow/deny/require approval, overriding its
    /// own [`GadgetPolicy`].
    pub fn with_override(mut self, gadget_name: impl Into<String>, mode: ApprovalMode) -> Self {
        self.overrides.insert(gadget_name.into(), mode);
        self
    }

    /// Install the callback used to resolve `ApprovalRequired` gadgets interactively.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ApprovalContext) -> bool + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Register a renderer for `gadget_name`'s call arguments, used to populate
    /// `ApprovalContext::summary`/`details` before the approval callback runs.
    pub fn with_context_provider<F>(mut self, gadget_name: impl Into<String>, provider: F) -> Self
    where
        F: Fn(&Value) -> (String, Option<String>) + Send + Sync + 'static,
    {
        self.context_providers.insert(gadget_name.into(), Box::new(provider));
        self
    }

    /// Resolve the decision for one gadget call, given its declared policy.
    pub fn resolve(
        &self,
        gadget_name: &str,
        invocation_id: &str,
        input: &Value,
        policy: GadgetPolicy,
    ) -> ApprovalDecision {
        if let Some(cached) = self.cache.lock().expect("approval cache poisoned").get(invocation_id) {
            return cached.clone();
        }

        let effective_mode = self.overrides.get(gadget_name).copied().unwrap_or(match policy {
            GadgetPolicy::Auto => ApprovalMode::Allowed,
            GadgetPolicy::RequiresApproval => ApprovalMode::ApprovalRequired,
        });

        let decision = match effective_mode {
            ApprovalMode::Allowed => ApprovalDecision::Allowed,
            ApprovalMode::Denied => {
                ApprovalDecision::Denied(format!("gadget '{}' is denied by policy", gadget_name))
            }
            ApprovalMode::ApprovalRequired => match &self.callback {
                Some(cb) => {
                    let (summary, details) = match self.context_providers.get(gadget_name) {
                        Some(provider) => {
                            let (summary, details) = provider(input);
                            (Some(summary), details)
                        }
                        None => (None, None),
                    };
                    let ctx = ApprovalContext {
                        gadget_name: gadget_name.to_string(),
                        invocation_id: invocation_id.to_string(),
                        input: input.clone(),
                        summary,
                        details,
                    };
                    if cb(&ctx) {
                        ApprovalDecision::Allowed
                    } else {
                        ApprovalDecision::Denied(format!(
                            "gadget '{}' was denied approval",
                            gadget_name
                        ))
                    }
                }
                None => ApprovalDecision::Pending,
            },
        };

        self.cache
            .lock()
            .expect("approval cache poisoned")
            .insert(invocation_id.to_string(), decision.clone());
        decision
    }
}
