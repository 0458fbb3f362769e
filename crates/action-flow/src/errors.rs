//! Chain execution error types

use thiserror::Error;

/// Why a chain stopped early.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The action text did not parse into a known action
    #[error("chained action {index} is invalid: {reason}")]
    InvalidAction { index: usize, reason: String },

    /// The executor rejected or failed the action
    #[error("chained action {index} failed: {reason}")]
    ExecutionFailed { index: usize, reason: String },

    /// Local verification failed and the policy asked to abort
    #[error("verification failed after chained action {index}: {}", .failures.join("; "))]
    VerificationFailed { index: usize, failures: Vec<String> },
}

impl ChainError {
    pub fn index(&self) -> usize {
        match self {
            ChainError::InvalidAction { index, .. }
            | ChainError::ExecutionFailed { index, .. }
            | ChainError::VerificationFailed { index, .. } => *index,
        }
    }
}
