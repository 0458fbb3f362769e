//! Tuning knobs for a tab's task loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskLoopConfig {
    /// Hard cap on executed actions; reaching it interrupts the task.
    /// Default: 50
    pub max_actions: u32,

    /// Wait after each action so the DOM can settle.
    /// Default: 2000
    pub post_action_settle_ms: u64,

    /// Delay between polls while the tab is still loading.
    /// Default: 500
    pub navigation_wait_ms: u64,

    /// Maximum polls before proceeding with a still-loading tab.
    /// Default: 10
    pub navigation_max_polls: u32,

    /// Page representations are truncated to this many characters.
    /// Default: 100000
    pub max_page_chars: usize,
}

impl Default for TaskLoopConfig {
    fn default() -> Self {
        Self {
            max_actions: 50,
            post_action_settle_ms: 2_000,
            navigation_wait_ms: 500,
            navigation_max_polls: 10,
            max_page_chars: 100_000,
        }
    }
}

impl TaskLoopConfig {
    /// No settle or navigation delays; for tests and scripted hosts.
    pub fn immediate() -> Self {
        Self {
            post_action_settle_ms: 0,
            navigation_wait_ms: 0,
            navigation_max_polls: 1,
            ..Self::default()
        }
    }

    pub fn with_max_actions(mut self, max_actions: u32) -> Self {
        self.max_actions = max_actions;
        self
    }

    pub fn with_settle_ms(mut self, ms: u64) -> Self {
        self.post_action_settle_ms = ms;
        self
    }

    pub fn post_action_settle(&self) -> Duration {
        Duration::from_millis(self.post_action_settle_ms)
    }

    pub fn navigation_wait(&self) -> Duration {
        Duration::from_millis(self.navigation_wait_ms)
    }
}
