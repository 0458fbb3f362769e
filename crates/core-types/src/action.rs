use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Typed argument value produced by the action parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Number(f64),
    String(String),
    StringList(Vec<String>),
}

impl ArgValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// Integer view of a numeric argument; fractional numbers are rejected.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Number(value) if value.fract() == 0.0 => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ArgValue::StringList(values) => Some(values.as_slice()),
            _ => None,
        }
    }
}

/// An action name plus its named, typed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredAction {
    pub name: String,
    #[serde(default)]
    pub args: BTreeMap<String, ArgValue>,
}

impl StructuredAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: ArgValue) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn arg(&self, key: &str) -> Option<&ArgValue> {
        self.args.get(key)
    }
}

/// Outcome of parsing one action string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ParsedAction {
    Success {
        thought: String,
        action_text: String,
        structured_action: StructuredAction,
    },
    Error {
        message: String,
    },
}

impl ParsedAction {
    pub fn structured(&self) -> Option<&StructuredAction> {
        match self {
            ParsedAction::Success {
                structured_action, ..
            } => Some(structured_action),
            ParsedAction::Error { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ParsedAction::Error { .. })
    }
}
