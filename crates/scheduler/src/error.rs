use tabflow_core_types::{TabId, TabflowError, TaskStatus};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error("concurrency limit reached: {limit} tasks already running")]
    ConcurrencyLimit { limit: usize },
    #[error("a task is already running in tab {0}")]
    AlreadyRunning(TabId),
    #[error("no running task in tab {0}")]
    NotRunning(TabId),
    #[error("task in tab {0} is not paused")]
    NotPaused(TabId),
    #[error("no task in tab {0}")]
    NoTask(TabId),
    #[error("cannot {action} tab {tab_id} while {status}")]
    InvalidState {
        tab_id: TabId,
        status: TaskStatus,
        action: &'static str,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<ManagerError> for TabflowError {
    fn from(value: ManagerError) -> Self {
        TabflowError::new(value.to_string())
    }
}
