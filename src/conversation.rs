//! The conversation manager: a fixed base (system prompt plus any seed messages) and a
//! growing history, plus an ephemeral trailing message used for compaction previews and
//! speculative re-sends that should never be persisted into history.

use crate::types::Message;

/// A conversation's message state: an immutable-ish `base` (typically just the system
/// prompt) and a `history` that the agent loop appends to every turn.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    base: Vec<Message>,
    history: Vec<Message>,
    /// A message appended only for the next outbound call, then dropped. Used when the
    /// loop needs to send something (e.g. a compaction summary) without permanently
    /// growing history.
    ephemeral: Option<Message>,
}

impl Conversation {
    /// Start a conversation with an optional system prompt as its base.
    pub fn new(system_prompt: Option<impl Into<String>>) -> Self {
        let base = system_prompt
            .map(|p| vec![Message::system(p)])
            .unwrap_or_default();
        Self {
            base,
            history: Vec::new(),
            ephemeral: None,
        }
    }

    /// Append a message to history.
    pub fn append(&mut self, message: Message) {
        self.history.push(message);
    }

    /// Append several messages to history at once (e.g. a turn's text + gadget calls).
    pub fn append_all(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.history.extend(messages);
    }

    /// Replace the entire history wholesale (used by compaction strategies).
    pub fn replace_history(&mut self, messages: Vec<Message>) {
        self.history = messages;
    }

    /// Set the ephemeral trailing message for the next outbound call only.
    pub fn set_ephemeral(&mut self, message: Message) {
        self.ephemeral = Some(message);
    }

    /// The messages to actually send: base ++ history ++ ephemeral (if any). The
    /// ephemeral message is consumed (cleared) by this call, matching its one-shot
    /// semantics.
    pub fn take_outbound(&mut self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.base.len() + self.history.len() + 1);
        out.extend(self.base.iter().cloned());
        out.extend(self.history.iter().cloned());
        if let Some(msg) = self.ephemeral.take() {
            out.push(msg);
        }
        out
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut Vec<Message> {
        &mut self.history
    }

    pub fn base(&self) -> &[Message] {
        &self.base
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_includes_base_then_history_then_ephemeral() {
        let mut convo = Conversation::new(Some("sys"));
        convo.append(Message::user("hi"));
        convo.set_ephemeral(Message::user("ephemeral"));

        let outbound = convo.take_outbound();
        assert_eq!(outbound.len(), 3);

        // Ephemeral is consumed: calling again without re-setting it omits the message.
        convo.set_ephemeral(Message::user("noop"));
        let _ = convo.take_outbound();
        let outbound2 = convo.take_outbound();
        assert_eq!(outbound2.len(), 2);
    }

    #[test]
    fn replace_history_swaps_whole_vec() {
        let mut convo = Conversation::new::<String>(None);
        convo.append(Message::user("a"));
        convo.append(Message::user("b"));
        convo.replace_history(vec![Message::user("summary")]);
        assert_eq!(convo.len(), 1);
    }
}
