//! Chain executor configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::strategies::VerificationFailurePolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainExecutorConfig {
    /// Pause between successful steps for DOM stability.
    pub inter_action_delay_ms: u64,
    /// Pause before running local verification checks.
    pub verification_settle_ms: u64,
    pub verification_policy: VerificationFailurePolicy,
}

impl Default for ChainExecutorConfig {
    fn default() -> Self {
        Self {
            inter_action_delay_ms: 300,
            verification_settle_ms: 500,
            verification_policy: VerificationFailurePolicy::default(),
        }
    }
}

impl ChainExecutorConfig {
    pub fn immediate() -> Self {
        Self {
            inter_action_delay_ms: 0,
            verification_settle_ms: 0,
            ..Self::default()
        }
    }

    pub fn with_policy(mut self, policy: VerificationFailurePolicy) -> Self {
        self.verification_policy = policy;
        self
    }

    pub fn inter_action_delay(&self) -> Duration {
        Duration::from_millis(self.inter_action_delay_ms)
    }

    pub fn verification_settle(&self) -> Duration {
        Duration::from_millis(self.verification_settle_ms)
    }
}
