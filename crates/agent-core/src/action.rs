//! Closed set of action kinds and their routing to executors.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tabflow_core_types::{ArgValue, StructuredAction, TabId};
use tracing::debug;

use crate::errors::{AgentError, ParseError};
use crate::ports::{DomActionExecutor, GenericActionExecutor};

/// The DOM primitives handled by [`DomActionExecutor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DomAction {
    Click { element_id: i64 },
    SetValue { element_id: i64, value: String },
}

impl DomAction {
    pub fn name(&self) -> &'static str {
        match self {
            DomAction::Click { .. } => "click",
            DomAction::SetValue { .. } => "setValue",
        }
    }

    pub fn element_id(&self) -> i64 {
        match self {
            DomAction::Click { element_id } | DomAction::SetValue { element_id, .. } => *element_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    Dom(DomAction),
    Navigate { url: String },
    GoBack,
    Scroll { direction: String, amount: Option<f64> },
    Wait { seconds: f64 },
    PressKey { key: String },
    Search { query: String },
    Check { element_id: i64, checked: bool },
    SelectOptions { element_id: i64, values: Vec<String> },
    CreateTab { url: Option<String> },
    SwitchTab { tab_id: i64 },
    Finish,
    Fail { reason: Option<String> },
}

impl ActionKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionKind::Finish | ActionKind::Fail { .. })
    }

    /// Runs the action. Terminal kinds are no-ops here; the caller decides
    /// what ending the task means.
    pub async fn execute(
        &self,
        tab_id: TabId,
        action: &StructuredAction,
        executors: &ActionExecutors,
    ) -> Result<ActionOutcome, AgentError> {
        match self {
            ActionKind::Dom(dom) => {
                debug!(%tab_id, action = dom.name(), element = dom.element_id(), "dom action");
                let outcome = executors
                    .dom
                    .execute(tab_id, dom)
                    .await
                    .map_err(|err| AgentError::execution(format!("{}: {err}", dom.name())))?;
                if !outcome.success {
                    let cause = outcome
                        .error
                        .unwrap_or_else(|| "executor reported failure".to_string());
                    return Err(AgentError::execution(format!("{}: {cause}", dom.name())));
                }
                Ok(ActionOutcome {
                    dom_changes: outcome.dom_changes,
                })
            }
            ActionKind::Finish | ActionKind::Fail { .. } => Ok(ActionOutcome::default()),
            _ => {
                debug!(%tab_id, action = %action.name, "generic action");
                executors
                    .generic
                    .execute(tab_id, action)
                    .await
                    .map_err(|err| AgentError::execution(format!("{}: {err}", action.name)))?;
                Ok(ActionOutcome::default())
            }
        }
    }
}

impl TryFrom<&StructuredAction> for ActionKind {
    type Error = AgentError;

    fn try_from(action: &StructuredAction) -> Result<Self, Self::Error> {
        let args = Args { action };
        let kind = match action.name.as_str() {
            "click" => ActionKind::Dom(DomAction::Click {
                element_id: args.integer("elementId")?,
            }),
            "setValue" => ActionKind::Dom(DomAction::SetValue {
                element_id: args.integer("elementId")?,
                value: args.string("value")?,
            }),
            "navigate" => ActionKind::Navigate {
                url: args.string("url")?,
            },
            "goBack" => ActionKind::GoBack,
            "scroll" => ActionKind::Scroll {
                direction: args.string("direction")?,
                amount: action.arg("amount").and_then(ArgValue::as_f64),
            },
            "wait" => ActionKind::Wait {
                seconds: args.number("seconds")?,
            },
            "pressKey" => ActionKind::PressKey {
                key: args.string("key")?,
            },
            "search" => ActionKind::Search {
                query: args.string("query")?,
            },
            "check" => ActionKind::Check {
                element_id: args.integer("elementId")?,
                checked: action
                    .arg("checked")
                    .and_then(ArgValue::as_bool)
                    .unwrap_or(true),
            },
            "selectOptions" => ActionKind::SelectOptions {
                element_id: args.integer("elementId")?,
                values: args.list("values")?,
            },
            "createTab" => ActionKind::CreateTab {
                url: action.arg("url").and_then(ArgValue::as_str).map(str::to_string),
            },
            "switchTab" => ActionKind::SwitchTab {
                tab_id: args.integer("tabId")?,
            },
            "finish" | "done" => ActionKind::Finish,
            "fail" => ActionKind::Fail {
                reason: action
                    .arg("reason")
                    .and_then(ArgValue::as_str)
                    .map(str::to_string),
            },
            other => return Err(AgentError::UnknownAction(other.to_string())),
        };
        Ok(kind)
    }
}

struct Args<'a> {
    action: &'a StructuredAction,
}

impl Args<'_> {
    fn mismatch(&self, param: &str, expected: &str) -> AgentError {
        let found = self
            .action
            .arg(param)
            .map(|value| format!("{value:?}"))
            .unwrap_or_else(|| "nothing".to_string());
        AgentError::Parse(ParseError::ArgumentType {
            action: self.action.name.clone(),
            param: param.to_string(),
            expected: expected.to_string(),
            found,
        })
    }

    fn number(&self, param: &str) -> Result<f64, AgentError> {
        self.action
            .arg(param)
            .and_then(ArgValue::as_f64)
            .ok_or_else(|| self.mismatch(param, "a number"))
    }

    fn integer(&self, param: &str) -> Result<i64, AgentError> {
        self.action
            .arg(param)
            .and_then(ArgValue::as_i64)
            .ok_or_else(|| self.mismatch(param, "an integer"))
    }

    fn string(&self, param: &str) -> Result<String, AgentError> {
        self.action
            .arg(param)
            .and_then(ArgValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.mismatch(param, "a string"))
    }

    fn list(&self, param: &str) -> Result<Vec<String>, AgentError> {
        self.action
            .arg(param)
            .and_then(ArgValue::as_list)
            .map(<[String]>::to_vec)
            .ok_or_else(|| self.mismatch(param, "an array of strings"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    pub dom_changes: Option<String>,
}

/// The two executors every non-terminal action is routed to.
#[derive(Clone)]
pub struct ActionExecutors {
    pub dom: Arc<dyn DomActionExecutor>,
    pub generic: Arc<dyn GenericActionExecutor>,
}

impl ActionExecutors {
    pub fn new(dom: Arc<dyn DomActionExecutor>, generic: Arc<dyn GenericActionExecutor>) -> Self {
        Self { dom, generic }
    }
}
