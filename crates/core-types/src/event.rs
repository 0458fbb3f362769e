use serde::{Deserialize, Serialize};

use crate::state::{ActionStatus, ChatMessage, DisplayHistoryEntry, PauseReason, TaskStatus};
use crate::TabId;

/// Notifications mirrored to UIs while tasks progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TaskEvent {
    StatusChanged {
        tab_id: TabId,
        status: TaskStatus,
        pause_reason: Option<PauseReason>,
    },
    ActionStatusChanged {
        tab_id: TabId,
        action_status: ActionStatus,
    },
    HistoryAppended {
        tab_id: TabId,
        entry: DisplayHistoryEntry,
    },
    AssistantMessage {
        tab_id: TabId,
        message: ChatMessage,
    },
    TabCleared {
        tab_id: TabId,
    },
    ActiveTabChanged {
        tab_id: TabId,
    },
}

impl TaskEvent {
    pub fn tab_id(&self) -> TabId {
        match self {
            TaskEvent::StatusChanged { tab_id, .. }
            | TaskEvent::ActionStatusChanged { tab_id, .. }
            | TaskEvent::HistoryAppended { tab_id, .. }
            | TaskEvent::AssistantMessage { tab_id, .. }
            | TaskEvent::TabCleared { tab_id }
            | TaskEvent::ActiveTabChanged { tab_id } => *tab_id,
        }
    }
}
