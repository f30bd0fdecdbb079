//! Conversation state threaded through every orchestration stage.

use cardwise_core::error::{CardwiseError, Result};
use cardwise_core::types::{Message, Role, ToolCall};

/// Append-only message log plus the query that started the run.
///
/// Insertion order is chronological order. The query is fixed at
/// construction; the only mutation is appending messages.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    messages: Vec<Message>,
    query: String,
    turn: u64,
}

impl ConversationState {
    /// Fresh state holding exactly one `human` message equal to `query`.
    pub fn new(query: impl Into<String>) -> Self {
        let query = query.into();
        Self {
            messages: vec![Message::human(query.clone())],
            query,
            turn: 0,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Current turn id; 0 before the first turn starts.
    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// Start a new orchestration turn and return its id (monotonically increasing).
    pub fn begin_turn(&mut self) -> u64 {
        self.turn += 1;
        self.turn
    }

    /// Append a message.
    ///
    /// A `tool` message is only accepted when an earlier `ai` message issued
    /// the tool call it answers (matched by id; an empty id matches any call).
    pub fn push(&mut self, message: Message) -> Result<()> {
        if let Message::Tool { tool_call_id, .. } = &message {
            if !self.has_issued_call(tool_call_id) {
                return Err(CardwiseError::Conversation(format!(
                    "tool result for call '{tool_call_id}' has no preceding tool call"
                )));
            }
        }
        self.messages.push(message);
        Ok(())
    }

    fn has_issued_call(&self, tool_call_id: &str) -> bool {
        self.messages
            .iter()
            .flat_map(|m| m.tool_calls())
            .any(|call| tool_call_id.is_empty() || call.id == tool_call_id)
    }

    /// Tool calls of the most recent `ai` message, preferring one named `tool_name`.
    pub fn latest_tool_call(&self, tool_name: &str) -> Option<&ToolCall> {
        let latest_ai = self.messages.iter().rev().find(|m| m.role() == Role::Ai)?;
        let calls = latest_ai.tool_calls();
        calls
            .iter()
            .find(|c| c.name() == tool_name)
            .or_else(|| calls.first())
    }

    /// `tool` messages produced during `turn`, in insertion order.
    pub fn tool_results_for_turn(&self, turn: u64) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| matches!(m, Message::Tool { turn: t, .. } if *t == turn))
            .collect()
    }

    /// Most recent assistant answer, if the log ends with one.
    pub fn final_answer(&self) -> Option<&str> {
        match self.messages.last() {
            Some(Message::Ai { content, tool_calls }) if tool_calls.is_empty() => Some(content.as_str()),
            _ => None,
        }
    }

    /// Every `tool` message is answered by some earlier `ai` tool call.
    pub fn tool_invariant_holds(&self) -> bool {
        self.messages.iter().enumerate().all(|(i, m)| match m {
            Message::Tool { tool_call_id, .. } => self.messages[..i]
                .iter()
                .flat_map(|p| p.tool_calls())
                .any(|c| tool_call_id.is_empty() || c.id == *tool_call_id),
            _ => true,
        })
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}
