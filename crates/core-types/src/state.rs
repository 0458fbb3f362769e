use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::ParsedAction;
use crate::{SessionId, TabId, TaskId};

/// Lifecycle status of a tab's task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Success,
    Error,
    Interrupted,
}

impl TaskStatus {
    /// Terminal statuses are stable end states.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Error | TaskStatus::Interrupted
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Success => "success",
            TaskStatus::Error => "error",
            TaskStatus::Interrupted => "interrupted",
        };
        f.write_str(label)
    }
}

/// Machine-readable reason carried by every paused task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    TabSwitched,
    UserInputNeeded,
    Navigation,
    Manual,
    RateLimited,
}

impl PauseReason {
    /// Whether a caller may resume without asking the user first.
    pub fn auto_resumable(self) -> bool {
        matches!(
            self,
            PauseReason::TabSwitched | PauseReason::Navigation | PauseReason::RateLimited
        )
    }
}

/// Sub-phase of the current loop iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    #[default]
    Idle,
    Attaching,
    Extracting,
    Transforming,
    Querying,
    Acting,
    Waiting,
}

/// Phase reported by the remote reasoning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorStatus {
    Planning,
    Executing,
    Verifying,
    Correcting,
    Completed,
    Failed,
}

/// Per-tab task context. At most one exists per tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    pub tab_id: TabId,
    pub session_id: Option<SessionId>,
    pub task_id: Option<TaskId>,
    pub status: TaskStatus,
    pub pause_reason: Option<PauseReason>,
    pub action_status: ActionStatus,
    pub instructions: String,
    pub start_url: Option<String>,
    pub current_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub current_step: u32,
    pub total_steps: u32,
    /// Number of actions executed so far; capped by the loop's action budget.
    pub actions_executed: u32,
    pub orchestrator_status: Option<OrchestratorStatus>,
    pub use_org_knowledge: bool,
    pub last_error: Option<String>,
    /// Run that may write to this context. Every start and resume hands
    /// out a new one, so a superseded loop's late writes are dropped.
    #[serde(default)]
    pub run_id: u64,
}

impl TaskContext {
    /// Fresh context for a task that is about to run.
    pub fn start(tab_id: TabId, instructions: impl Into<String>, url: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            tab_id,
            session_id: None,
            task_id: None,
            status: TaskStatus::Running,
            pause_reason: None,
            action_status: ActionStatus::Idle,
            instructions: instructions.into(),
            start_url: url.clone(),
            current_url: url,
            started_at: now,
            last_activity_at: now,
            current_step: 0,
            total_steps: 0,
            actions_executed: 0,
            orchestrator_status: None,
            use_org_knowledge: false,
            last_error: None,
            run_id: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    /// True while `run_id` is the live run of a running task.
    pub fn is_owned_by(&self, run_id: u64) -> bool {
        self.is_running() && self.run_id == run_id
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Moves to `status`, clearing the pause reason unless pausing.
    pub fn transition(&mut self, status: TaskStatus, pause_reason: Option<PauseReason>) {
        self.status = status;
        self.pause_reason = if status == TaskStatus::Paused {
            pause_reason.or(Some(PauseReason::Manual))
        } else {
            None
        };
        if status != TaskStatus::Running {
            self.action_status = ActionStatus::Idle;
        }
        self.touch();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Append-only record of one loop step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayHistoryEntry {
    pub thought: String,
    pub action: String,
    pub parsed_action: ParsedAction,
    pub usage: Option<TokenUsage>,
    pub dom_changes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl DisplayHistoryEntry {
    pub fn new(
        thought: impl Into<String>,
        action: impl Into<String>,
        parsed_action: ParsedAction,
        usage: Option<TokenUsage>,
    ) -> Self {
        Self {
            thought: thought.into(),
            action: action.into(),
            parsed_action,
            usage,
            dom_changes: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_dom_changes(mut self, summary: Option<String>) -> Self {
        self.dom_changes = summary;
        self
    }

    /// Entry recording a fatal failure; the message is kept as the parse error.
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(
            format!("Error: {message}"),
            "",
            ParsedAction::Error { message },
            None,
        )
    }

    pub fn is_error(&self) -> bool {
        self.parsed_action.is_error()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Everything tracked for one tab.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabTaskState {
    pub context: Option<TaskContext>,
    /// Session the next task in this tab continues; survives task resets.
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub display_history: Vec<DisplayHistoryEntry>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl TabTaskState {
    pub fn status(&self) -> TaskStatus {
        self.context
            .as_ref()
            .map(|ctx| ctx.status)
            .unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.status() == TaskStatus::Running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSettings {
    pub max_concurrent_tasks: usize,
    pub auto_pause_on_tab_switch: bool,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            auto_pause_on_tab_switch: false,
        }
    }
}

/// All tabs plus the global settings; the unit the state center snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiTabState {
    #[serde(default)]
    pub tabs: BTreeMap<TabId, TabTaskState>,
    /// Advisory UI pointer; never used for mutual exclusion.
    pub active_tab_id: Option<TabId>,
    #[serde(default)]
    pub settings: TaskSettings,
}

impl MultiTabState {
    pub fn tab(&self, tab_id: TabId) -> Option<&TabTaskState> {
        self.tabs.get(&tab_id)
    }

    pub fn tab_mut(&mut self, tab_id: TabId) -> &mut TabTaskState {
        self.tabs.entry(tab_id).or_default()
    }

    pub fn context(&self, tab_id: TabId) -> Option<&TaskContext> {
        self.tabs.get(&tab_id).and_then(|tab| tab.context.as_ref())
    }

    pub fn context_mut(&mut self, tab_id: TabId) -> Option<&mut TaskContext> {
        self.tabs
            .get_mut(&tab_id)
            .and_then(|tab| tab.context.as_mut())
    }

    /// Snapshot of a tab, or the default empty state when untracked.
    pub fn tab_or_default(&self, tab_id: TabId) -> TabTaskState {
        self.tabs.get(&tab_id).cloned().unwrap_or_default()
    }

    pub fn running_tabs(&self) -> Vec<TabId> {
        self.tabs
            .iter()
            .filter(|(_, tab)| tab.is_running())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.tabs.values().filter(|tab| tab.is_running()).count()
    }
}
