use std::sync::Arc;
use std::time::Duration;

use agent_core::{
    DomAction, DomActionExecutor, DomActionOutcome, GenericActionExecutor, InteractRequest,
    InteractResponse, PageExtractor, PageFormat, PageRepresentation, ReasoningService,
    RemoteServiceError, TabInfo,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tabflow_cli::{serve_lines, AppConfig, Collaborators, CommandResponse, Orchestrator};
use tabflow_core_types::{StructuredAction, TabId, TaskStatus};

/// Never answers, so started tasks stay running for the whole test.
struct SilentReasoning;

#[async_trait]
impl ReasoningService for SilentReasoning {
    async fn interact(
        &self,
        _request: &InteractRequest,
    ) -> Result<InteractResponse, RemoteServiceError> {
        std::future::pending().await
    }
}

struct FakeBrowser;

#[async_trait]
impl PageExtractor for FakeBrowser {
    async fn extract(&self, _tab_id: TabId) -> anyhow::Result<PageRepresentation> {
        Ok(PageRepresentation::new(PageFormat::AccessibilityTree, "[1] link Home"))
    }

    async fn tab_info(&self, tab_id: TabId) -> anyhow::Result<TabInfo> {
        anyhow::bail!("tab {tab_id} is not attached")
    }
}

#[async_trait]
impl DomActionExecutor for FakeBrowser {
    async fn execute(&self, _tab_id: TabId, _action: &DomAction) -> anyhow::Result<DomActionOutcome> {
        Ok(DomActionOutcome::ok())
    }
}

#[async_trait]
impl GenericActionExecutor for FakeBrowser {
    async fn execute(&self, _tab_id: TabId, _action: &StructuredAction) -> anyhow::Result<()> {
        Ok(())
    }
}

fn orchestrator(config: &AppConfig) -> Orchestrator {
    let browser = Arc::new(FakeBrowser);
    let collaborators = Collaborators {
        extractor: browser.clone(),
        reasoning: Arc::new(SilentReasoning),
        dom: browser.clone(),
        generic: browser,
        hook: None,
        checker: None,
    };
    Orchestrator::build(config, collaborators).unwrap()
}

async fn run(orchestrator: &Orchestrator, commands: &[Value]) -> Vec<Value> {
    let input: String = commands
        .iter()
        .map(|command| format!("{command}\n"))
        .collect();
    let mut output = Vec::new();
    serve_lines(&orchestrator.router, input.as_bytes(), &mut output, None)
        .await
        .unwrap();
    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn every_command_gets_exactly_one_response() {
    let config = AppConfig::default();
    let orchestrator = orchestrator(&config);
    let responses = run(
        &orchestrator,
        &[
            json!({"type": "START_TASK", "tabId": 1, "instructions": "find flights", "url": "https://air.test"}),
            json!({"type": "GET_STATE", "tabId": 1}),
            json!({"type": "PAUSE_TASK", "tabId": 1}),
            json!({"type": "RESUME_TASK", "tabId": 1}),
            json!({"type": "STOP_TASK", "tabId": 1}),
            json!({"type": "STOP_TASK", "tabId": 42}),
            json!({"type": "DANCE", "tabId": 1}),
        ],
    )
    .await;

    assert_eq!(responses.len(), 7);
    assert_eq!(responses[0]["success"], true);
    assert_eq!(responses[0]["state"]["context"]["status"], "running");
    assert_eq!(responses[1]["state"]["messages"][0]["content"], "find flights");
    assert_eq!(responses[2]["state"]["context"]["pauseReason"], "manual");
    assert_eq!(responses[3]["state"]["context"]["status"], "running");
    assert_eq!(responses[4]["state"]["context"]["status"], "interrupted");
    assert_eq!(responses[5]["success"], false);
    assert!(responses[5]["error"].as_str().unwrap().contains("42"));
    assert_eq!(responses[6]["success"], false);
    assert!(responses[6]["error"]
        .as_str()
        .unwrap()
        .starts_with("invalid command"));

    orchestrator.shutdown(Duration::from_secs(1), &config).await.unwrap();
}

#[tokio::test]
async fn concurrency_limit_is_reported_as_a_failed_response() {
    let config = AppConfig::default();
    let orchestrator = orchestrator(&config);
    let responses = run(
        &orchestrator,
        &[
            json!({"type": "UPDATE_SETTINGS", "maxConcurrentTasks": 1}),
            json!({"type": "START_TASK", "tabId": 1, "instructions": "a"}),
            json!({"type": "START_TASK", "tabId": 2, "instructions": "b"}),
        ],
    )
    .await;

    let parsed: Vec<CommandResponse> = responses
        .into_iter()
        .map(|value| serde_json::from_value(value).unwrap())
        .collect();
    assert_eq!(parsed[0].settings.unwrap().max_concurrent_tasks, 1);
    assert!(parsed[1].success);
    assert!(!parsed[2].success);
    assert!(parsed[2].error.as_deref().unwrap().contains("concurrency limit"));
    assert_eq!(
        orchestrator.manager.tab_state(TabId(1)).status(),
        TaskStatus::Running
    );
    assert!(orchestrator.manager.tab_state(TabId(2)).context.is_none());

    orchestrator.shutdown(Duration::from_secs(1), &config).await.unwrap();
}

#[tokio::test]
async fn tab_signals_share_the_command_channel() {
    let mut config = AppConfig::default();
    config.orchestrator.auto_pause_on_tab_switch = true;
    let orchestrator = orchestrator(&config);
    let responses = run(
        &orchestrator,
        &[
            json!({"type": "START_TASK", "tabId": 1, "instructions": "background"}),
            json!({"type": "TAB_NAVIGATED", "tabId": 1, "url": "https://next.test"}),
            json!({"type": "TAB_ACTIVATED", "tabId": 2}),
            json!({"type": "TAB_CLOSED", "tabId": 1}),
            json!({"type": "GET_STATE", "tabId": 1}),
        ],
    )
    .await;

    assert_eq!(
        responses[1]["state"]["context"]["currentUrl"],
        "https://next.test"
    );
    assert_eq!(responses[2]["pausedTabs"], json!([1]));
    assert_eq!(responses[3]["success"], true);
    assert_eq!(responses[4]["state"]["context"], Value::Null);
    assert_eq!(responses[4]["state"]["messages"], json!([]));

    orchestrator.shutdown(Duration::from_secs(1), &config).await.unwrap();
}

#[tokio::test]
async fn persisted_state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.state.persist_path = Some(dir.path().join("tabs.json"));

    let first = orchestrator(&config);
    run(
        &first,
        &[json!({"type": "START_TASK", "tabId": 9, "instructions": "keep going"})],
    )
    .await;
    first.shutdown(Duration::from_secs(1), &config).await.unwrap();

    let second = orchestrator(&config);
    let ctx = second.manager.tab_state(TabId(9)).context.unwrap();
    assert_eq!(ctx.status, TaskStatus::Paused);
    assert_eq!(ctx.instructions, "keep going");
    second.shutdown(Duration::from_secs(1), &config).await.unwrap();
}
