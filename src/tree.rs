//! The execution tree: an append-only record of every LLM call and gadget invocation in
//! a run, with parent/child links (a gadget invocation that itself spawns a subagent
//! becomes a child node) and running cost/usage aggregation.

use crate::types::TokenUsage;
use std::sync::Mutex;

/// What kind of work a tree node represents.
#[derive(Debug, Clone)]
pub enum NodeKind {
    LlmCall { model: String },
    GadgetCall { name: String },
    Subagent { label: String },
}

/// A single node in the execution tree.
#[derive(Debug, Clone)]
pub struct ExecutionNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub kind: NodeKind,
    pub usage: TokenUsage,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Append-only, mutex-guarded tree of execution nodes. Safe to share across concurrently
/// dispatched gadgets via an `Arc<ExecutionTree>`.
#[derive(Default)]
pub struct ExecutionTree {
    nodes: Mutex<Vec<ExecutionNode>>,
}

impl ExecutionTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node, returning its generated id.
    pub fn append(&self, parent_id: Option<String>, kind: NodeKind, usage: TokenUsage) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let node = ExecutionNode {
            id: id.clone(),
            parent_id,
            kind,
            usage,
            started_at: chrono::Utc::now(),
        };
        self.nodes.lock().expect("execution tree mutex poisoned").push(node);
        id
    }

    /// Total token usage across every node in the tree.
    pub fn total_usage(&self) -> TokenUsage {
        let nodes = self.nodes.lock().expect("execution tree mutex poisoned");
        let mut total = TokenUsage::default();
        for node in nodes.iter() {
            total.merge(&node.usage);
        }
        total
    }

    /// Token usage for a node and all of its descendants.
    pub fn subtree_usage(&self, node_id: &str) -> TokenUsage {
        let nodes = self.nodes.lock().expect("execution tree mutex poisoned");
        let mut total = TokenUsage::default();
        let mut stack = vec![node_id.to_string()];
        while let Some(id) = stack.pop() {
            for node in nodes.iter() {
                if node.id == id {
                    total.merge(&node.usage);
                }
                if node.parent_id.as_deref() == Some(id.as_str()) {
                    stack.push(node.id.clone());
                }
            }
        }
        total
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().expect("execution tree mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot all nodes (for inspection/serialization by the caller).
    pub fn snapshot(&self) -> Vec<ExecutionNode> {
        self.nodes.lock().expect("execution tree mutex poisoned").clone()
    }
}
