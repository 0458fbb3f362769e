use serde::{Deserialize, Serialize};
use tabflow_core_types::{SessionId, TabId, TaskSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTask {
    pub tab_id: TabId,
    pub instructions: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub use_org_knowledge: bool,
}

impl StartTask {
    pub fn new(tab_id: TabId, instructions: impl Into<String>) -> Self {
        Self {
            tab_id,
            instructions: instructions.into(),
            url: None,
            session_id: None,
            use_org_knowledge: false,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Partial update of the global task settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default)]
    pub max_concurrent_tasks: Option<usize>,
    #[serde(default)]
    pub auto_pause_on_tab_switch: Option<bool>,
}

impl SettingsPatch {
    pub fn apply(&self, settings: &mut TaskSettings) {
        if let Some(limit) = self.max_concurrent_tasks {
            settings.max_concurrent_tasks = limit;
        }
        if let Some(enabled) = self.auto_pause_on_tab_switch {
            settings.auto_pause_on_tab_switch = enabled;
        }
    }
}
