//! Wires configuration, collaborators and the multi-tab manager together.

use std::sync::Arc;
use std::time::Duration;

use action_flow::{ChainExecutor, VerificationChecker};
use agent_core::{
    ActionExecutors, AutomationHook, ChainRunner, DomActionExecutor, GenericActionExecutor,
    Heartbeat, PageExtractor, ReasoningService, TaskLoopDeps,
};
use anyhow::{Context, Result};
use tabflow_core_types::TaskEvent;
use tabflow_event_bus::{EventBus, InMemoryBus};
use tabflow_scheduler::MultiTabManager;
use tabflow_state_center::{InMemoryStateCenter, StateCenter};
use tokio::task::JoinHandle;
use tracing::info;

use crate::commands::CommandRouter;
use crate::config::AppConfig;
use crate::http::{HttpBrowserBridge, HttpReasoningClient};

const EVENT_BUS_CAPACITY: usize = 256;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// External systems a task loop talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn PageExtractor>,
    pub reasoning: Arc<dyn ReasoningService>,
    pub dom: Arc<dyn DomActionExecutor>,
    pub generic: Arc<dyn GenericActionExecutor>,
    pub hook: Option<Arc<dyn AutomationHook>>,
    pub checker: Option<Arc<dyn VerificationChecker>>,
}

impl Collaborators {
    /// HTTP reasoning client plus one browser bridge serving every port.
    pub fn http(config: &AppConfig) -> Result<Self> {
        let reasoning = Arc::new(HttpReasoningClient::new(&config.reasoning)?);
        let bridge = Arc::new(HttpBrowserBridge::new(&config.bridge)?);
        Ok(Self {
            extractor: bridge.clone(),
            reasoning,
            dom: bridge.clone(),
            generic: bridge.clone(),
            hook: Some(bridge.clone()),
            checker: Some(bridge),
        })
    }
}

pub struct Orchestrator {
    pub manager: Arc<MultiTabManager>,
    pub router: CommandRouter,
    pub events: Arc<dyn EventBus<TaskEvent>>,
    pub store: Arc<InMemoryStateCenter>,
    persistence: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// Opens (or creates) the task store and builds the manager. Settings
    /// from the configuration replace any persisted ones.
    pub fn build(config: &AppConfig, collaborators: Collaborators) -> Result<Self> {
        let store = match config.state.persist_path.as_deref() {
            Some(path) => Arc::new(InMemoryStateCenter::open(path).with_context(|| {
                format!("Failed to open task state at {}", path.display())
            })?),
            None => Arc::new(InMemoryStateCenter::new()),
        };
        let settings = config.orchestrator.settings();
        store.update(&mut |state| state.settings = settings);

        let persistence = config.state.persist_path.as_ref().map(|path| {
            info!(path = %path.display(), "persisting task state");
            store.spawn_persistence(path.clone())
        });

        let executors = ActionExecutors::new(collaborators.dom, collaborators.generic);
        let chain_runner: Arc<dyn ChainRunner> = Arc::new(ChainExecutor::new(
            executors.clone(),
            collaborators.checker,
            config.chain.clone(),
        ));
        let events: Arc<dyn EventBus<TaskEvent>> = InMemoryBus::new(EVENT_BUS_CAPACITY);

        let deps = TaskLoopDeps {
            store: store.clone(),
            events: events.clone(),
            extractor: collaborators.extractor,
            reasoning: collaborators.reasoning,
            executors,
            chain_runner: Some(chain_runner),
            hook: collaborators.hook,
            heartbeat: Heartbeat::new(HEARTBEAT_INTERVAL),
        };
        let manager = Arc::new(MultiTabManager::new(
            deps,
            config.orchestrator.task_loop.clone(),
        ));

        Ok(Self {
            router: CommandRouter::new(manager.clone()),
            manager,
            events,
            store,
            persistence,
        })
    }

    /// Stops every loop, then writes a final snapshot when persisting.
    pub async fn shutdown(self, grace: Duration, config: &AppConfig) -> Result<()> {
        self.manager.shutdown(grace).await;
        if let Some(handle) = self.persistence {
            handle.abort();
        }
        if let Some(path) = config.state.persist_path.as_deref() {
            self.store
                .write_snapshot(path)
                .with_context(|| format!("Failed to write task state to {}", path.display()))?;
        }
        Ok(())
    }
}
