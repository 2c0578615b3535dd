//! Core data models: conversation turns and per-thread state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
    System,
}

/// Decision taken by the entry router for the newest user turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Extraction,
    Question,
}

/// Progress of the extract → verify → summarize protocol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPhase {
    Extracting,
    Verifying,
    Complete,
}

//
// ================= Turns =================
//

/// A named, argument-bearing request for an external operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl Invocation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One unit of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        invocations: Vec<Invocation>,
    },
    ToolResult {
        content: String,
        correlation_id: String,
        #[serde(default)]
        name: String,
    },
    System {
        content: String,
    },
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Turn::User {
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Turn::System {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Turn::Assistant {
            content: content.into(),
            invocations: Vec::new(),
        }
    }

    pub fn assistant_with_invocations(
        content: impl Into<String>,
        invocations: Vec<Invocation>,
    ) -> Self {
        Turn::Assistant {
            content: content.into(),
            invocations,
        }
    }

    pub fn tool_result(
        correlation_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Turn::ToolResult {
            content: content.into(),
            correlation_id: correlation_id.into(),
            name: name.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Turn::User { .. } => Role::User,
            Turn::Assistant { .. } => Role::Assistant,
            Turn::ToolResult { .. } => Role::ToolResult,
            Turn::System { .. } => Role::System,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Turn::User { content }
            | Turn::Assistant { content, .. }
            | Turn::ToolResult { content, .. }
            | Turn::System { content } => content,
        }
    }

    /// Requested invocations; empty for every variant but assistant turns.
    pub fn invocations(&self) -> &[Invocation] {
        match self {
            Turn::Assistant { invocations, .. } => invocations,
            _ => &[],
        }
    }

    pub fn has_invocations(&self) -> bool {
        !self.invocations().is_empty()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Turn::ToolResult { correlation_id, .. } => Some(correlation_id),
            _ => None,
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Turn::ToolResult { .. })
    }

    /// Same turn with replaced content. Invocations and correlation ids are kept.
    pub fn with_content(&self, content: String) -> Self {
        match self {
            Turn::User { .. } => Turn::User { content },
            Turn::System { .. } => Turn::System { content },
            Turn::Assistant { invocations, .. } => Turn::Assistant {
                content,
                invocations: invocations.clone(),
            },
            Turn::ToolResult {
                correlation_id,
                name,
                ..
            } => Turn::ToolResult {
                content,
                correlation_id: correlation_id.clone(),
                name: name.clone(),
            },
        }
    }
}

//
// ================= Conversation State =================
//

/// Per-thread state carried between graph steps and checkpointed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_id: String,
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub document_text: Option<String>,
    #[serde(default)]
    pub next: Option<Route>,
    #[serde(default)]
    pub phase: Option<ExtractionPhase>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            turns: Vec::new(),
            document_text: None,
            next: None,
            phase: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn last_user_turn(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.role() == Role::User)
    }

    /// Text of the closing assistant or system turn, if the thread ended on one.
    pub fn final_reply(&self) -> Option<&str> {
        match self.last_turn() {
            Some(turn @ (Turn::Assistant { .. } | Turn::System { .. })) => Some(turn.content()),
            _ => None,
        }
    }

    /// Merge a step's output. Turns are only ever appended.
    pub fn apply(&mut self, update: StateUpdate) {
        self.turns.extend(update.turns);
        if let Some(text) = update.document_text {
            self.document_text = Some(text);
        }
        if let Some(next) = update.next {
            self.next = Some(next);
        }
        if let Some(phase) = update.phase {
            self.phase = Some(phase);
        }
        self.updated_at = Utc::now();
    }
}

/// Output of one graph step.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub turns: Vec<Turn>,
    pub document_text: Option<String>,
    pub next: Option<Route>,
    pub phase: Option<ExtractionPhase>,
}

impl StateUpdate {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn turns(turns: Vec<Turn>) -> Self {
        Self {
            turns,
            ..Self::default()
        }
    }

    pub fn turn(turn: Turn) -> Self {
        Self::turns(vec![turn])
    }

    pub fn with_phase(mut self, phase: ExtractionPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
            && self.document_text.is_none()
            && self.next.is_none()
            && self.phase.is_none()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolResult => "tool",
            Role::System => "system",
        };
        write!(f, "{}", s)
    }
}

impl Route {
    /// Routing key consumed by conditional graph edges
    pub fn key(self) -> &'static str {
        match self {
            Route::Extraction => "extraction",
            Route::Question => "question",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_turn_accessors() {
        let call = Invocation::new("call_1", "get_account_balance", json!({"account": "A"}));
        let assistant = Turn::assistant_with_invocations("", vec![call]);
        assert_eq!(assistant.role(), Role::Assistant);
        assert!(assistant.has_invocations());
        assert_eq!(assistant.invocations()[0].id, "call_1");

        let result = Turn::tool_result("call_1", "get_account_balance", "{\"balance\":10}");
        assert!(result.is_tool_result());
        assert_eq!(result.correlation_id(), Some("call_1"));
        assert!(!result.has_invocations());
    }

    #[test]
    fn test_with_content_keeps_invocations() {
        let call = Invocation::new("call_9", "insert_movement", json!({}));
        let turn = Turn::assistant_with_invocations("long text", vec![call.clone()]);
        let replaced = turn.with_content("short".to_string());
        assert_eq!(replaced.content(), "short");
        assert_eq!(replaced.invocations(), &[call]);
    }

    #[test]
    fn test_turn_serialization_is_tagged() {
        let json = serde_json::to_string(&Turn::user("hola")).unwrap();
        assert!(json.contains("\"role\":\"user\""));
        assert!(!json.contains("invocations"));

        let back: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Turn::user("hola"));
    }

    #[test]
    fn test_apply_appends_only() {
        let mut state = ConversationState::new("thread-1");
        state.apply(StateUpdate::turn(Turn::user("statement.pdf")));
        state.apply(StateUpdate {
            turns: vec![Turn::assistant("done")],
            next: Some(Route::Extraction),
            ..StateUpdate::default()
        });

        assert_eq!(state.turns.len(), 2);
        assert_eq!(state.next, Some(Route::Extraction));
        assert_eq!(state.final_reply(), Some("done"));
        assert_eq!(state.last_user_turn(), Some(&Turn::user("statement.pdf")));
    }
}
