//! Context compaction: the trigger that decides *when* history must be compressed, plus
//! the trait contract a pluggable strategy implements to decide *how*. Only the trigger
//! is implemented here; concrete strategies (summarization, truncation, sliding windows)
//! are left to callers via [`CompactionStrategy`] — the loop only ever calls through the
//! trait.

use crate::conversation::Conversation;
use crate::types::Message;
use async_trait::async_trait;
use serde_json::Value;

/// Config handed to a compaction strategy: the threshold that triggered it and any
/// strategy-specific tuning the caller supplied.
#[derive(Debug, Clone, Default)]
pub struct CompactionConfig {
    pub trigger_threshold: u64,
    pub options: Value,
}

/// Context handed to a compaction strategy alongside the messages to compact.
#[derive(Debug, Clone)]
pub struct CompactionContext {
    pub current_tokens: u64,
    pub run_id: String,
}

/// The result of a compaction pass: the new history, an optional human-readable summary
/// of what was compacted, and free-form metadata a strategy wants to surface.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    pub messages: Vec<Message>,
    pub summary: Option<String>,
    pub metadata: Value,
}

/// A pluggable strategy for compressing conversation history once it has grown past the
/// configured trigger threshold. Implementations decide *how* to compress (summarize,
/// truncate, slide a window); the agent loop only decides *when* to call one.
#[async_trait]
pub trait CompactionStrategy: Send + Sync {
    async fn compact(
        &self,
        messages: &[Message],
        config: &CompactionConfig,
        context: &CompactionContext,
    ) -> crate::Result<CompactionResult>;
}

/// Measures whether the conversation has crossed its configured trigger threshold and, if
/// so, invokes a strategy and replaces history with its result. A no-op if no threshold
/// or no strategy is configured.
pub struct CompactionTrigger {
    threshold: Option<u64>,
    strategy: Option<Box<dyn CompactionStrategy>>,
}

impl CompactionTrigger {
    pub fn new(threshold: Option<u64>, strategy: Option<Box<dyn CompactionStrategy>>) -> Self {
        Self { threshold, strategy }
    }

    pub fn disabled() -> Self {
        Self {
            threshold: None,
            strategy: None,
        }
    }

    /// Check `current_tokens` against the threshold and, if crossed, run the strategy and
    /// replace `conversation`'s history in place. Returns the compaction result if one ran.
    pub async fn maybe_compact(
        &self,
        conversation: &mut Conversation,
        current_tokens: u64,
        run_id: &str,
    ) -> crate::Result<Option<CompactionResult>> {
        let Some(threshold) = self.threshold else {
            return Ok(None);
        };
        if current_tokens < threshold {
            return Ok(None);
        }
        let Some(strategy) = &self.strategy else {
            log::warn!(
                "compaction threshold {} crossed ({} tokens) but no strategy configured",
                threshold,
                current_tokens
            );
            return Ok(None);
        };

        let config = CompactionConfig {
            trigger_threshold: threshold,
            options: Value::Null,
        };
        let context = CompactionContext {
            current_tokens,
            run_id: run_id.to_string(),
        };

        log::info!(
            "compaction triggered: {} tokens >= threshold {}",
            current_tokens,
            threshold
        );

        let result = strategy
            .compact(conversation.history(), &config, &context)
            .await?;
        conversation.replace_history(result.messages.clone());
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    struct TruncateToLast(usize);

    #[async_trait]
    impl CompactionStrategy for TruncateToLast {
        async fn compact(
            &self,
            messages: &[Message],
            _config: &CompactionConfig,
            _context: &CompactionContext,
        ) -> crate::Result<CompactionResult> {
            let start = messages.len().saturating_sub(self.0);
            Ok(CompactionResult {
                messages: messages[start..].to_vec(),
                summary: Some(format!("truncated to last {} messages", self.0)),
                metadata: Value::Null,
            })
        }
    }

    #[tokio::test]
    async fn below_threshold_does_not_compact() {
        let trigger = CompactionTrigger::new(Some(1000), Some(Box::new(TruncateToLast(1))));
        let mut convo = Conversation::new::<String>(None);
        convo.append(Message::user("a"));
        convo.append(Message::user("b"));

        let result = trigger.maybe_compact(&mut convo, 500, "run-1").await.unwrap();
        assert!(result.is_none());
        assert_eq!(convo.len(), 2);
    }

    #[tokio::test]
    async fn at_or_above_threshold_compacts() {
        let trigger = CompactionTrigger::new(Some(1000), Some(Box::new(TruncateToLast(1))));
        let mut convo = Conversation::new::<String>(None);
        convo.append(Message::user("a"));
        convo.append(Message::user("b"));
        convo.append(Message::user("c"));

        let result = trigger
            .maybe_compact(&mut convo, 1000, "run-1")
            .await
            .unwrap()
            .expect("should compact");
        assert_eq!(convo.len(), 1);
        assert_eq!(result.summary.unwrap(), "truncated to last 1 messages");
    }

    #[tokio::test]
    async fn disabled_trigger_never_compacts() {
        let trigger = CompactionTrigger::disabled();
        let mut convo = Conversation::new::<String>(None);
        convo.append(Message::user("a"));

        let result = trigger.maybe_compact(&mut convo, u64::MAX, "run-1").await.unwrap();
        assert!(result.is_none());
        assert_eq!(convo.len(), 1);
    }

    #[tokio::test]
    async fn threshold_set_without_strategy_is_a_noop() {
        let trigger = CompactionTrigger::new(Some(10), None);
        let mut convo = Conversation::new::<String>(None);
        convo.append(Message::user("a"));

        let result = trigger.maybe_compact(&mut convo, 100, "run-1").await.unwrap();
        assert!(result.is_none());
        assert_eq!(convo.len(), 1);
    }
}
