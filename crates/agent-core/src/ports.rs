//! Seams to the external systems a task loop drives.
//!
//! Every collaborator is an object-safe async trait so hosts can plug in a
//! real browser bridge, an HTTP reasoning client, or test doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tabflow_core_types::{
    ChainAction, ChainExecutionResult, ChainMetadata, OrchestratorStatus, SessionId,
    StructuredAction, TabId, TaskId, TokenUsage,
};

use crate::action::DomAction;
use crate::errors::RemoteServiceError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageFormat {
    #[default]
    AccessibilityTree,
    AnnotatedMarkup,
}

/// Structured interactive-element view of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRepresentation {
    #[serde(default)]
    pub format: PageFormat,
    pub content: String,
    #[serde(default)]
    pub element_count: Option<u32>,
    #[serde(default)]
    pub truncated: bool,
}

impl PageRepresentation {
    pub fn new(format: PageFormat, content: impl Into<String>) -> Self {
        Self {
            format,
            content: content.into(),
            element_count: None,
            truncated: false,
        }
    }

    /// Drops blank lines and trailing spaces, then caps the content at
    /// `max_chars` characters. A zero limit disables truncation.
    pub fn compact(mut self, max_chars: usize) -> Self {
        let mut compacted = String::with_capacity(self.content.len());
        for line in self.content.lines().map(str::trim_end) {
            if line.trim().is_empty() {
                continue;
            }
            if !compacted.is_empty() {
                compacted.push('\n');
            }
            compacted.push_str(line);
        }
        if max_chars > 0 {
            if let Some((cut, _)) = compacted.char_indices().nth(max_chars) {
                compacted.truncate(cut);
                self.truncated = true;
            }
        }
        self.content = compacted;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub url: String,
    #[serde(default)]
    pub loading: bool,
    #[serde(default)]
    pub title: Option<String>,
}

#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn extract(&self, tab_id: TabId) -> anyhow::Result<PageRepresentation>;

    /// Current URL and loading state of the tab.
    async fn tab_info(&self, tab_id: TabId) -> anyhow::Result<TabInfo>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractRequest {
    pub session_id: Option<SessionId>,
    pub task_id: Option<TaskId>,
    pub url: Option<String>,
    pub page: PageRepresentation,
    pub instructions: String,
    pub use_org_knowledge: bool,
}

/// One planning step returned by the reasoning service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InteractResponse {
    pub action: Option<String>,
    pub thought: String,
    pub status: Option<OrchestratorStatus>,
    pub current_step: Option<u32>,
    pub total_steps: Option<u32>,
    pub usage: Option<TokenUsage>,
    pub user_question: Option<String>,
    pub needs_user_input: bool,
    pub chained_actions: Vec<ChainAction>,
    pub chain_metadata: Option<ChainMetadata>,
    pub session_id: Option<SessionId>,
    pub task_id: Option<TaskId>,
    pub done: bool,
}

impl InteractResponse {
    pub fn is_complete(&self) -> bool {
        self.done || self.status == Some(OrchestratorStatus::Completed)
    }

    pub fn asks_user(&self) -> bool {
        self.needs_user_input || self.user_question.is_some()
    }

    /// Chained actions, only when the service marked them safe to chain.
    pub fn chain(&self) -> Option<(&[ChainAction], &ChainMetadata)> {
        let metadata = self.chain_metadata.as_ref()?;
        if metadata.can_chain && !self.chained_actions.is_empty() {
            Some((self.chained_actions.as_slice(), metadata))
        } else {
            None
        }
    }
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn interact(
        &self,
        request: &InteractRequest,
    ) -> Result<InteractResponse, RemoteServiceError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomActionOutcome {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    /// Summary of DOM mutations observed after the action.
    #[serde(default)]
    pub dom_changes: Option<String>,
}

impl DomActionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            dom_changes: None,
        }
    }
}

/// Executes the DOM primitives (click, setValue).
#[async_trait]
pub trait DomActionExecutor: Send + Sync {
    async fn execute(&self, tab_id: TabId, action: &DomAction) -> anyhow::Result<DomActionOutcome>;
}

/// Executes every non-DOM, non-terminal action.
#[async_trait]
pub trait GenericActionExecutor: Send + Sync {
    async fn execute(&self, tab_id: TabId, action: &StructuredAction) -> anyhow::Result<()>;
}

/// Debugger-style attachment held for the lifetime of a task loop.
#[async_trait]
pub trait AutomationHook: Send + Sync {
    async fn attach(&self, tab_id: TabId) -> anyhow::Result<()>;
    async fn detach(&self, tab_id: TabId) -> anyhow::Result<()>;
}

/// Runs a server-approved batch of actions without intermediate planning.
#[async_trait]
pub trait ChainRunner: Send + Sync {
    async fn run_chain(
        &self,
        tab_id: TabId,
        actions: &[ChainAction],
        metadata: &ChainMetadata,
    ) -> ChainExecutionResult;
}
