//! Application configuration
//!
//! Resolved from YAML (explicit path, `./config/tabflow.yaml`, then the user
//! config directory) with `TABFLOW_*` environment overrides on top.

use std::env;
use std::path::{Path, PathBuf};

use action_flow::ChainExecutorConfig;
use agent_core::TaskLoopConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tabflow_core_types::TaskSettings;
use tokio::fs;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub reasoning: ReasoningConfig,
    pub bridge: BridgeConfig,
    pub orchestrator: OrchestratorConfig,
    pub chain: ChainExecutorConfig,
    pub state: StateConfig,
    pub logging: LoggingConfig,
}

/// Remote reasoning service endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            api_key: None,
            timeout_ms: 60_000,
        }
    }
}

/// Browser bridge that extracts pages and executes actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8788".to_string(),
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrent_tasks: usize,
    pub auto_pause_on_tab_switch: bool,
    #[serde(flatten)]
    pub task_loop: TaskLoopConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let settings = TaskSettings::default();
        Self {
            max_concurrent_tasks: settings.max_concurrent_tasks,
            auto_pause_on_tab_switch: settings.auto_pause_on_tab_switch,
            task_loop: TaskLoopConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn settings(&self) -> TaskSettings {
        TaskSettings {
            max_concurrent_tasks: self.max_concurrent_tasks,
            auto_pause_on_tab_switch: self.auto_pause_on_tab_switch,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Snapshot file; tasks are kept in memory only when unset.
    pub persist_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).context("Failed to parse config file")
    }

    /// Applies `TABFLOW_*` overrides read through `lookup`, returning the
    /// ones that were rejected.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Vec<IgnoredOverride>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut ignored = Vec::new();
        if let Some(url) = lookup("TABFLOW_REASONING_URL") {
            self.reasoning.base_url = url;
        }
        if let Some(key) = lookup("TABFLOW_API_KEY") {
            self.reasoning.api_key = Some(key);
        }
        if let Some(url) = lookup("TABFLOW_BRIDGE_URL") {
            self.bridge.base_url = url;
        }
        if let Some(raw) = lookup("TABFLOW_MAX_CONCURRENT_TASKS") {
            match raw.trim().parse::<usize>() {
                Ok(limit) if limit > 0 => self.orchestrator.max_concurrent_tasks = limit,
                _ => ignored.push(IgnoredOverride {
                    key: "TABFLOW_MAX_CONCURRENT_TASKS",
                    value: raw,
                }),
            }
        }
        if let Some(path) = lookup("TABFLOW_STATE_PATH") {
            self.state.persist_path = Some(PathBuf::from(path));
        }
        ignored
    }

    pub fn apply_env_overrides(&mut self) -> Vec<IgnoredOverride> {
        self.apply_overrides(|key| env::var(key).ok().filter(|value| !value.is_empty()))
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.reasoning.base_url).context("reasoning.base_url is not a valid URL")?;
        Url::parse(&self.bridge.base_url).context("bridge.base_url is not a valid URL")?;
        anyhow::ensure!(
            self.orchestrator.max_concurrent_tasks > 0,
            "orchestrator.max_concurrent_tasks must be at least 1"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredOverride {
    pub key: &'static str,
    pub value: String,
}

/// A resolved configuration and where it came from.
///
/// Loading happens before the log subscriber exists, so the outcome is
/// kept here and reported once logging is up.
pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    pub from_file: bool,
    pub ignored_overrides: Vec<IgnoredOverride>,
}

impl LoadedConfig {
    pub fn report(&self) {
        if self.from_file {
            info!(path = %self.path.display(), "loaded configuration");
        } else {
            warn!(
                path = %self.path.display(),
                "config file not found, using defaults"
            );
        }
        for ignored in &self.ignored_overrides {
            warn!(value = %ignored.value, "ignoring invalid {}", ignored.key);
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    // Priority: ./config/tabflow.yaml > ~/.config/tabflow/config.yaml
    let local_config = PathBuf::from("config/tabflow.yaml");
    if local_config.exists() {
        return Ok(local_config);
    }
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push("tabflow");
    path.push("config.yaml");
    Ok(path)
}

pub async fn load_config(config_path: Option<&Path>) -> Result<LoadedConfig> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    let from_file = config_path.exists();
    let mut config = if from_file {
        let content = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        AppConfig::from_yaml(&content)?
    } else {
        AppConfig::default()
    };

    let ignored_overrides = config.apply_env_overrides();
    config.validate()?;
    Ok(LoadedConfig {
        config,
        path: config_path,
        from_file,
        ignored_overrides,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = AppConfig::from_yaml(
            "orchestrator:\n  max_concurrent_tasks: 5\n  max_actions: 20\nchain:\n  verification_policy: abort\n",
        )
        .unwrap();
        assert_eq!(config.orchestrator.max_concurrent_tasks, 5);
        assert_eq!(config.orchestrator.task_loop.max_actions, 20);
        assert_eq!(config.orchestrator.task_loop.post_action_settle_ms, 2_000);
        assert_eq!(
            config.chain.verification_policy,
            action_flow::VerificationFailurePolicy::Abort
        );
        assert_eq!(config.reasoning, ReasoningConfig::default());
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let vars: HashMap<&str, &str> = [
            ("TABFLOW_REASONING_URL", "https://reason.test"),
            ("TABFLOW_MAX_CONCURRENT_TASKS", "7"),
            ("TABFLOW_STATE_PATH", "/tmp/tabs.json"),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|value| value.to_string()));

        assert_eq!(config.reasoning.base_url, "https://reason.test");
        assert_eq!(config.orchestrator.max_concurrent_tasks, 7);
        assert_eq!(
            config.state.persist_path.as_deref(),
            Some(Path::new("/tmp/tabs.json"))
        );
        assert_eq!(config.bridge, BridgeConfig::default());
    }

    #[test]
    fn invalid_concurrency_override_is_ignored() {
        let mut config = AppConfig::default();
        let ignored = config.apply_overrides(|key| {
            (key == "TABFLOW_MAX_CONCURRENT_TASKS").then(|| "0".to_string())
        });
        assert_eq!(config.orchestrator.max_concurrent_tasks, 3);
        assert_eq!(
            ignored,
            vec![IgnoredOverride {
                key: "TABFLOW_MAX_CONCURRENT_TASKS",
                value: "0".into(),
            }]
        );
    }

    #[test]
    fn validate_rejects_bad_urls() {
        let mut config = AppConfig::default();
        config.bridge.base_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config(Some(&dir.path().join("absent.yaml")))
            .await
            .unwrap();
        assert!(!loaded.from_file);
        assert_eq!(loaded.config.orchestrator.max_concurrent_tasks, 3);
    }
}
