//! What a chain does when local verification fails

use serde::{Deserialize, Serialize};
use tabflow_core_types::ChainMetadata;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationFailurePolicy {
    /// Log the failure and keep executing the chain.
    #[default]
    LogAndContinue,
    /// Abort only when the server declared client verification sufficient.
    HonorClientVerificationFlag,
    /// Always abort on a failed check.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationDecision {
    Continue,
    Abort,
}

impl VerificationFailurePolicy {
    pub fn decide(self, metadata: &ChainMetadata) -> VerificationDecision {
        match self {
            VerificationFailurePolicy::LogAndContinue => VerificationDecision::Continue,
            VerificationFailurePolicy::HonorClientVerificationFlag
                if metadata.client_verification_sufficient =>
            {
                VerificationDecision::Abort
            }
            VerificationFailurePolicy::HonorClientVerificationFlag => {
                VerificationDecision::Continue
            }
            VerificationFailurePolicy::Abort => VerificationDecision::Abort,
        }
    }
}
