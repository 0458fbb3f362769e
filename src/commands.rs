//! Inbound command channel.
//!
//! Commands arrive as JSON objects tagged by `type`; every command yields a
//! [`CommandResponse`], failures included.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tabflow_core_types::{SessionId, TabId, TabTaskState, TaskSettings};
use tabflow_scheduler::{ManagerError, MultiTabManager, SettingsPatch, StartTask};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    StartTask {
        tab_id: TabId,
        instructions: String,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        session_id: Option<SessionId>,
        #[serde(default)]
        use_org_knowledge: bool,
    },
    StopTask {
        tab_id: TabId,
    },
    PauseTask {
        tab_id: TabId,
    },
    ResumeTask {
        tab_id: TabId,
    },
    ClearTask {
        tab_id: TabId,
    },
    GetState {
        tab_id: TabId,
    },
    AddUserMessage {
        tab_id: TabId,
        message: String,
    },
    SwitchSession {
        tab_id: TabId,
        #[serde(default)]
        session_id: Option<SessionId>,
    },
    UpdateSettings {
        #[serde(default)]
        max_concurrent_tasks: Option<usize>,
        #[serde(default)]
        auto_pause_on_tab_switch: Option<bool>,
    },
    TabActivated {
        tab_id: TabId,
    },
    TabClosed {
        tab_id: TabId,
    },
    TabNavigated {
        tab_id: TabId,
        url: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartTask { .. } => "START_TASK",
            Command::StopTask { .. } => "STOP_TASK",
            Command::PauseTask { .. } => "PAUSE_TASK",
            Command::ResumeTask { .. } => "RESUME_TASK",
            Command::ClearTask { .. } => "CLEAR_TASK",
            Command::GetState { .. } => "GET_STATE",
            Command::AddUserMessage { .. } => "ADD_USER_MESSAGE",
            Command::SwitchSession { .. } => "SWITCH_SESSION",
            Command::UpdateSettings { .. } => "UPDATE_SETTINGS",
            Command::TabActivated { .. } => "TAB_ACTIVATED",
            Command::TabClosed { .. } => "TAB_CLOSED",
            Command::TabNavigated { .. } => "TAB_NAVIGATED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TabTaskState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<TaskSettings>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paused_tabs: Vec<TabId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            state: None,
            settings: None,
            paused_tabs: Vec::new(),
            error: None,
        }
    }

    pub fn with_state(state: TabTaskState) -> Self {
        Self {
            state: Some(state),
            ..Self::ok()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Self::ok()
        }
    }
}

impl From<Result<TabTaskState, ManagerError>> for CommandResponse {
    fn from(result: Result<TabTaskState, ManagerError>) -> Self {
        match result {
            Ok(state) => Self::with_state(state),
            Err(err) => Self::error(err.to_string()),
        }
    }
}

/// Routes commands and tab signals to the multi-tab manager.
#[derive(Clone)]
pub struct CommandRouter {
    manager: Arc<MultiTabManager>,
}

impl CommandRouter {
    pub fn new(manager: Arc<MultiTabManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<MultiTabManager> {
        &self.manager
    }

    /// Decodes one JSON command. Malformed input becomes an error response.
    pub async fn handle_json(&self, raw: &str) -> CommandResponse {
        match serde_json::from_str::<Command>(raw) {
            Ok(command) => self.handle(command).await,
            Err(err) => {
                warn!(error = %err, "rejecting malformed command");
                CommandResponse::error(format!("invalid command: {err}"))
            }
        }
    }

    pub async fn handle(&self, command: Command) -> CommandResponse {
        let name = command.name();
        debug!(command = name, "handling command");
        let response = self.dispatch(command).await;
        if let Some(error) = response.error.as_deref() {
            warn!(command = name, %error, "command failed");
        }
        response
    }

    async fn dispatch(&self, command: Command) -> CommandResponse {
        let manager = &self.manager;
        match command {
            Command::StartTask {
                tab_id,
                instructions,
                url,
                session_id,
                use_org_knowledge,
            } => manager
                .start_tab_task(StartTask {
                    tab_id,
                    instructions,
                    url,
                    session_id,
                    use_org_knowledge,
                })
                .await
                .into(),
            Command::StopTask { tab_id } => manager.stop_tab_task(tab_id).await.into(),
            Command::PauseTask { tab_id } => manager.pause_tab_task(tab_id).await.into(),
            Command::ResumeTask { tab_id } => manager.resume_tab_task(tab_id).await.into(),
            Command::ClearTask { tab_id } => manager.clear_tab_task(tab_id).await.into(),
            Command::GetState { tab_id } => CommandResponse::with_state(manager.tab_state(tab_id)),
            Command::AddUserMessage { tab_id, message } => {
                manager.add_user_message(tab_id, &message).await.into()
            }
            Command::SwitchSession { tab_id, session_id } => {
                manager.switch_session(tab_id, session_id).await.into()
            }
            Command::UpdateSettings {
                max_concurrent_tasks,
                auto_pause_on_tab_switch,
            } => {
                let patch = SettingsPatch {
                    max_concurrent_tasks,
                    auto_pause_on_tab_switch,
                };
                match manager.update_settings(patch).await {
                    Ok(settings) => CommandResponse {
                        settings: Some(settings),
                        ..CommandResponse::ok()
                    },
                    Err(err) => CommandResponse::error(err.to_string()),
                }
            }
            Command::TabActivated { tab_id } => {
                let paused_tabs = manager.on_tab_activated(tab_id).await;
                CommandResponse {
                    paused_tabs,
                    ..CommandResponse::ok()
                }
            }
            Command::TabClosed { tab_id } => {
                manager.on_tab_closed(tab_id).await;
                CommandResponse::ok()
            }
            Command::TabNavigated { tab_id, url } => {
                manager.on_tab_navigated(tab_id, url).await;
                CommandResponse::with_state(manager.tab_state(tab_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_screaming_snake_tags_and_camel_case_fields() {
        let command: Command = serde_json::from_str(
            r#"{"type":"START_TASK","tabId":4,"instructions":"buy milk","useOrgKnowledge":true}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            Command::StartTask {
                tab_id: TabId(4),
                instructions: "buy milk".into(),
                url: None,
                session_id: None,
                use_org_knowledge: true,
            }
        );
        assert_eq!(command.name(), "START_TASK");

        let value = serde_json::to_value(Command::TabNavigated {
            tab_id: TabId(2),
            url: "https://a.test".into(),
        })
        .unwrap();
        assert_eq!(value["type"], "TAB_NAVIGATED");
        assert_eq!(value["tabId"], 2);
    }

    #[test]
    fn error_response_omits_empty_fields() {
        let value = serde_json::to_value(CommandResponse::error("nope")).unwrap();
        assert_eq!(value, serde_json::json!({"success": false, "error": "nope"}));
    }
}
