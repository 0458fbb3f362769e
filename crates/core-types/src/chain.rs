use serde::{Deserialize, Serialize};

/// How an action in a chain should be verified after it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationLevel {
    #[default]
    None,
    /// Cheap post-condition checks evaluated in the page.
    Local,
    /// Deferred to the reasoning service's next evaluation.
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationCheckKind {
    UrlChanged,
    UrlContains,
    ElementExists,
    ElementVisible,
    ElementValueEquals,
    TextPresent,
}

/// A local post-condition test for one chained action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationCheck {
    pub kind: VerificationCheckKind,
    #[serde(default)]
    pub element_id: Option<i64>,
    #[serde(default)]
    pub expected: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub passed: bool,
    #[serde(default)]
    pub failures: Vec<String>,
}

impl VerificationReport {
    pub fn passed() -> Self {
        Self {
            passed: true,
            failures: Vec::new(),
        }
    }

    pub fn failed(failures: Vec<String>) -> Self {
        Self {
            passed: false,
            failures,
        }
    }
}

/// One server-declared action in a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainAction {
    pub action: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub element_id: Option<i64>,
    #[serde(default)]
    pub verification_level: Option<VerificationLevel>,
    #[serde(default)]
    pub verification_checks: Vec<VerificationCheck>,
}

impl ChainAction {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            description: None,
            element_id: None,
            verification_level: None,
            verification_checks: Vec::new(),
        }
    }

    pub fn with_checks(mut self, level: VerificationLevel, checks: Vec<VerificationCheck>) -> Self {
        self.verification_level = Some(level);
        self.verification_checks = checks;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainMetadata {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub can_chain: bool,
    #[serde(default)]
    pub default_verification_level: VerificationLevel,
    #[serde(default)]
    pub final_verification_level: VerificationLevel,
    #[serde(default)]
    pub client_verification_sufficient: bool,
}

/// Per-action record inside a chain result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedChainAction {
    pub index: usize,
    pub action_text: String,
    pub success: bool,
    pub error: Option<String>,
    pub dom_changes: Option<String>,
    pub verification: Option<VerificationReport>,
}

/// Exactly the action strings executed before a chain stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainPartialState {
    pub executed_actions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainExecutionResult {
    pub success: bool,
    pub executed_actions: Vec<ExecutedChainAction>,
    pub failed_at_index: Option<usize>,
    pub partial_state: Option<ChainPartialState>,
    pub chain_error: Option<String>,
}

impl ChainExecutionResult {
    pub fn completed(executed_actions: Vec<ExecutedChainAction>) -> Self {
        Self {
            success: true,
            executed_actions,
            failed_at_index: None,
            partial_state: None,
            chain_error: None,
        }
    }

    pub fn failed(
        executed_actions: Vec<ExecutedChainAction>,
        failed_at_index: usize,
        completed: Vec<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            executed_actions,
            failed_at_index: Some(failed_at_index),
            partial_state: Some(ChainPartialState {
                executed_actions: completed,
            }),
            chain_error: Some(error.into()),
        }
    }
}
