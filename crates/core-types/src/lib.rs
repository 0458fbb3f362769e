//! Shared primitives for the tabflow orchestration crates.
//!
//! Holds the identifiers and the per-tab task data model that the state
//! center persists, the task loop mutates and the command channel returns.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

mod action;
mod chain;
mod event;
mod state;

pub use action::{ArgValue, ParsedAction, StructuredAction};
pub use chain::{
    ChainAction, ChainExecutionResult, ChainMetadata, ChainPartialState, ExecutedChainAction,
    VerificationCheck, VerificationCheckKind, VerificationLevel, VerificationReport,
};
pub use event::TaskEvent;
pub use state::{
    ActionStatus, ChatMessage, DisplayHistoryEntry, MessageRole, MultiTabState,
    OrchestratorStatus, PauseReason, TabTaskState, TaskContext, TaskSettings, TaskStatus,
    TokenUsage,
};

/// Shared error type for the bus and store crates.
#[derive(Debug, Error, Clone)]
pub enum TabflowError {
    #[error("{message}")]
    Message { message: String },
}

impl TabflowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

/// Browser tab identifier as reported by the host browser.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TabId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tab_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&TabId(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
        assert_ne!(TaskId::new(), TaskId::new());
    }
}
