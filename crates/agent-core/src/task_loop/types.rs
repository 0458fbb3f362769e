use serde::{Deserialize, Serialize};
use tabflow_core_types::{PauseReason, TabId, TaskContext, TaskStatus};

/// How a task loop run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLoopResult {
    pub tab_id: TabId,
    /// Status of the context when the loop exited; `idle` when cleared and
    /// `interrupted` when superseded.
    pub status: TaskStatus,
    pub pause_reason: Option<PauseReason>,
    pub message: String,
    pub actions_executed: u32,
    pub total_time_ms: u64,
}

impl TaskLoopResult {
    pub fn new(
        tab_id: TabId,
        status: TaskStatus,
        pause_reason: Option<PauseReason>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tab_id,
            status,
            pause_reason,
            message: message.into(),
            actions_executed: 0,
            total_time_ms: 0,
        }
    }

    pub fn from_context(ctx: &TaskContext, message: impl Into<String>) -> Self {
        let mut result = Self::new(ctx.tab_id, ctx.status, ctx.pause_reason, message);
        result.actions_executed = ctx.actions_executed;
        result
    }

    pub fn cleared(tab_id: TabId) -> Self {
        Self::new(tab_id, TaskStatus::Idle, None, "task context cleared")
    }

    /// The tab moved on to a newer run; its context is not this loop's.
    pub fn superseded(tab_id: TabId) -> Self {
        Self::new(tab_id, TaskStatus::Interrupted, None, "superseded by a newer run")
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}
