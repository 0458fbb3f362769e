//! Chain executor implementation

use std::sync::Arc;

use agent_core::{parse_action, ActionExecutors, ActionKind, ChainRunner};
use async_trait::async_trait;
use tabflow_core_types::{
    ChainAction, ChainExecutionResult, ChainMetadata, ExecutedChainAction, TabId,
    VerificationCheck, VerificationLevel, VerificationReport,
};
use tracing::{debug, info, warn};

use crate::errors::ChainError;
use crate::strategies::VerificationDecision;
use crate::types::ChainExecutorConfig;

/// Runs local post-condition checks against a tab.
#[async_trait]
pub trait VerificationChecker: Send + Sync {
    async fn check(
        &self,
        tab_id: TabId,
        checks: &[VerificationCheck],
    ) -> anyhow::Result<VerificationReport>;
}

/// Fail-fast executor for server-approved action batches.
///
/// No rollback: on failure the result lists exactly what already ran.
pub struct ChainExecutor {
    executors: ActionExecutors,
    checker: Option<Arc<dyn VerificationChecker>>,
    config: ChainExecutorConfig,
}

impl ChainExecutor {
    pub fn new(
        executors: ActionExecutors,
        checker: Option<Arc<dyn VerificationChecker>>,
        config: ChainExecutorConfig,
    ) -> Self {
        Self {
            executors,
            checker,
            config,
        }
    }

    pub fn config(&self) -> &ChainExecutorConfig {
        &self.config
    }

    pub async fn execute(
        &self,
        tab_id: TabId,
        actions: &[ChainAction],
        metadata: &ChainMetadata,
    ) -> ChainExecutionResult {
        info!(
            %tab_id,
            actions = actions.len(),
            reason = metadata.reason.as_deref().unwrap_or(""),
            "executing action chain"
        );
        let mut executed = Vec::with_capacity(actions.len());
        let mut completed = Vec::with_capacity(actions.len());

        for (index, action) in actions.iter().enumerate() {
            let dom_changes = match self.execute_action(tab_id, index, action).await {
                Ok(dom_changes) => dom_changes,
                Err(err) => {
                    warn!(%tab_id, index, error = %err, "chain stopped");
                    executed.push(ExecutedChainAction {
                        index,
                        action_text: action.action.clone(),
                        success: false,
                        error: Some(err.to_string()),
                        dom_changes: None,
                        verification: None,
                    });
                    return ChainExecutionResult::failed(executed, index, completed, err.to_string());
                }
            };

            let is_last = index + 1 == actions.len();
            let verification = self
                .verify(tab_id, action, metadata, is_last)
                .await;
            executed.push(ExecutedChainAction {
                index,
                action_text: action.action.clone(),
                success: true,
                error: None,
                dom_changes,
                verification: verification.clone(),
            });
            completed.push(action.action.clone());

            if let Some(report) = verification.filter(|report| !report.passed) {
                match self.config.verification_policy.decide(metadata) {
                    VerificationDecision::Continue => {
                        warn!(
                            %tab_id,
                            index,
                            failures = ?report.failures,
                            "verification failed; continuing chain"
                        );
                    }
                    VerificationDecision::Abort => {
                        let err = ChainError::VerificationFailed {
                            index,
                            failures: report.failures,
                        };
                        warn!(%tab_id, error = %err, "chain aborted");
                        return ChainExecutionResult::failed(
                            executed,
                            index,
                            completed,
                            err.to_string(),
                        );
                    }
                }
            }

            if !is_last && !self.config.inter_action_delay().is_zero() {
                tokio::time::sleep(self.config.inter_action_delay()).await;
            }
        }

        debug!(%tab_id, executed = executed.len(), "chain completed");
        ChainExecutionResult::completed(executed)
    }

    async fn execute_action(
        &self,
        tab_id: TabId,
        index: usize,
        action: &ChainAction,
    ) -> Result<Option<String>, ChainError> {
        let invalid = |reason: String| ChainError::InvalidAction { index, reason };
        let structured = parse_action(&action.action).map_err(|err| invalid(err.to_string()))?;
        let kind = ActionKind::try_from(&structured).map_err(|err| invalid(err.to_string()))?;

        debug!(%tab_id, index, action = %action.action, "chained action");
        let outcome = kind
            .execute(tab_id, &structured, &self.executors)
            .await
            .map_err(|err| ChainError::ExecutionFailed {
                index,
                reason: err.to_string(),
            })?;
        Ok(outcome.dom_changes)
    }

    /// Local checks run only for `local` level actions that carry checks.
    async fn verify(
        &self,
        tab_id: TabId,
        action: &ChainAction,
        metadata: &ChainMetadata,
        is_last: bool,
    ) -> Option<VerificationReport> {
        let fallback = if is_last {
            metadata.final_verification_level
        } else {
            metadata.default_verification_level
        };
        let level = action.verification_level.unwrap_or(fallback);
        if level != VerificationLevel::Local || action.verification_checks.is_empty() {
            return None;
        }
        let Some(checker) = self.checker.as_ref() else {
            debug!(%tab_id, "no verification checker configured; skipping checks");
            return None;
        };

        let settle = self.config.verification_settle();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        let checks: Vec<VerificationCheck> = action
            .verification_checks
            .iter()
            .cloned()
            .map(|mut check| {
                check.element_id = check.element_id.or(action.element_id);
                check
            })
            .collect();
        let report = match checker.check(tab_id, &checks).await {
            Ok(report) => report,
            Err(err) => VerificationReport::failed(vec![format!("verification error: {err}")]),
        };
        Some(report)
    }
}

#[async_trait]
impl ChainRunner for ChainExecutor {
    async fn run_chain(
        &self,
        tab_id: TabId,
        actions: &[ChainAction],
        metadata: &ChainMetadata,
    ) -> ChainExecutionResult {
        self.execute(tab_id, actions, metadata).await
    }
}
