//! Multi-tab manager: owns one task loop per tab.
//!
//! All state lives in the shared state center; this type only decides which
//! transitions are legal and keeps the loop handles. Commands never wait for
//! an in-flight loop step: they flip the status and cancel the loop's token,
//! and the loop notices at the top of its next iteration. Every start and
//! resume stamps the context with a fresh run id, and a retired loop stays
//! registered until the tab's next loop has waited for it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_core::{Heartbeat, TaskLoop, TaskLoopConfig, TaskLoopDeps, TaskLoopResult};
use futures::future::join_all;
use tabflow_core_types::{
    ChatMessage, MultiTabState, PauseReason, SessionId, TabId, TabTaskState, TaskContext,
    TaskEvent, TaskSettings, TaskStatus,
};
use tabflow_state_center::{StateCenter, StateCenterExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ManagerError;
use crate::model::{SettingsPatch, StartTask};
use crate::runtime::{LoopHandle, LoopRegistry};

pub struct MultiTabManager {
    deps: TaskLoopDeps,
    config: TaskLoopConfig,
    loops: Arc<LoopRegistry>,
    next_run: AtomicU64,
}

impl MultiTabManager {
    pub fn new(deps: TaskLoopDeps, config: TaskLoopConfig) -> Self {
        Self {
            deps,
            config,
            loops: Arc::new(LoopRegistry::new()),
            next_run: AtomicU64::new(1),
        }
    }

    fn store(&self) -> &Arc<dyn StateCenter> {
        &self.deps.store
    }

    pub fn state(&self) -> Arc<MultiTabState> {
        self.store().load()
    }

    /// Snapshot of one tab; untracked tabs yield the default empty state.
    pub fn tab_state(&self, tab_id: TabId) -> TabTaskState {
        self.store().tab_state(tab_id)
    }

    pub fn heartbeat(&self) -> &Arc<Heartbeat> {
        &self.deps.heartbeat
    }

    pub fn is_loop_active(&self, tab_id: TabId) -> bool {
        self.loops.is_active(tab_id)
    }

    pub async fn start_tab_task(&self, request: StartTask) -> Result<TabTaskState, ManagerError> {
        let instructions = request.instructions.trim();
        if instructions.is_empty() {
            return Err(ManagerError::InvalidRequest(
                "instructions must not be empty".into(),
            ));
        }
        let tab_id = request.tab_id;
        let run_id = self.next_run_id();

        let started = self.store().update_with(|state| {
            if state.tab(tab_id).is_some_and(TabTaskState::is_running) {
                return Err(ManagerError::AlreadyRunning(tab_id));
            }
            let limit = state.settings.max_concurrent_tasks;
            if state.running_count() >= limit {
                return Err(ManagerError::ConcurrencyLimit { limit });
            }

            let tab = state.tab_mut(tab_id);
            let previous = tab.context.as_ref().and_then(|ctx| ctx.session_id.clone());
            let session_id = request
                .session_id
                .clone()
                .or_else(|| tab.session_id.clone())
                .or(previous);

            let mut ctx = TaskContext::start(tab_id, instructions, request.url.clone());
            ctx.session_id = session_id.clone();
            ctx.use_org_knowledge = request.use_org_knowledge;
            ctx.run_id = run_id;
            tab.session_id = session_id;
            tab.context = Some(ctx);
            tab.display_history.clear();
            tab.messages.push(ChatMessage::user(instructions));
            Ok(tab.clone())
        })?;

        info!(%tab_id, run_id, url = ?request.url, "task started");
        self.emit_status(tab_id, TaskStatus::Running, None).await;
        self.spawn_loop(tab_id, run_id);
        Ok(started)
    }

    pub async fn stop_tab_task(&self, tab_id: TabId) -> Result<TabTaskState, ManagerError> {
        let tab = self.store().update_with(|state| {
            let tab = state
                .tabs
                .get_mut(&tab_id)
                .ok_or(ManagerError::NoTask(tab_id))?;
            let ctx = tab.context.as_mut().ok_or(ManagerError::NoTask(tab_id))?;
            match ctx.status {
                TaskStatus::Running | TaskStatus::Paused => {
                    ctx.transition(TaskStatus::Interrupted, None);
                    Ok(tab.clone())
                }
                status => Err(ManagerError::InvalidState {
                    tab_id,
                    status,
                    action: "stop",
                }),
            }
        })?;

        self.loops.cancel(tab_id);
        info!(%tab_id, "task stopped");
        self.emit_status(tab_id, TaskStatus::Interrupted, None).await;
        Ok(tab)
    }

    pub async fn pause_tab_task(&self, tab_id: TabId) -> Result<TabTaskState, ManagerError> {
        let tab = self.store().update_with(|state| {
            let tab = state
                .tabs
                .get_mut(&tab_id)
                .ok_or(ManagerError::NoTask(tab_id))?;
            let ctx = tab.context.as_mut().ok_or(ManagerError::NoTask(tab_id))?;
            if !ctx.is_running() {
                return Err(ManagerError::NotRunning(tab_id));
            }
            ctx.transition(TaskStatus::Paused, Some(PauseReason::Manual));
            Ok(tab.clone())
        })?;

        self.loops.cancel(tab_id);
        info!(%tab_id, "task paused");
        self.emit_status(tab_id, TaskStatus::Paused, Some(PauseReason::Manual))
            .await;
        Ok(tab)
    }

    pub async fn resume_tab_task(&self, tab_id: TabId) -> Result<TabTaskState, ManagerError> {
        let run_id = self.next_run_id();
        let tab = self.store().update_with(|state| {
            let limit = state.settings.max_concurrent_tasks;
            let running = state.running_count();
            let tab = state
                .tabs
                .get_mut(&tab_id)
                .ok_or(ManagerError::NoTask(tab_id))?;
            let ctx = tab.context.as_mut().ok_or(ManagerError::NoTask(tab_id))?;
            if ctx.status != TaskStatus::Paused {
                return Err(ManagerError::NotPaused(tab_id));
            }
            if running >= limit {
                return Err(ManagerError::ConcurrencyLimit { limit });
            }
            ctx.transition(TaskStatus::Running, None);
            ctx.last_error = None;
            ctx.run_id = run_id;
            Ok(tab.clone())
        })?;

        info!(%tab_id, run_id, "task resumed");
        self.emit_status(tab_id, TaskStatus::Running, None).await;
        self.spawn_loop(tab_id, run_id);
        Ok(tab)
    }

    /// Removes everything tracked for the tab. Clearing an unknown tab is
    /// not an error.
    pub async fn clear_tab_task(&self, tab_id: TabId) -> Result<TabTaskState, ManagerError> {
        let removed = self
            .store()
            .update_with(|state| state.tabs.remove(&tab_id).is_some());
        self.loops.cancel(tab_id);
        if removed {
            info!(%tab_id, "task cleared");
            self.emit(TaskEvent::TabCleared { tab_id }).await;
        }
        Ok(TabTaskState::default())
    }

    /// Records a user message. Answering a `user_input_needed` pause folds
    /// the answer into the instructions and resumes the task.
    pub async fn add_user_message(
        &self,
        tab_id: TabId,
        message: &str,
    ) -> Result<TabTaskState, ManagerError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ManagerError::InvalidRequest(
                "message must not be empty".into(),
            ));
        }

        let run_id = self.next_run_id();
        let (tab, resumed) = self.store().update_with(|state| {
            let limit = state.settings.max_concurrent_tasks;
            let running = state.running_count();
            let tab = state.tab_mut(tab_id);
            let awaiting = tab.context.as_ref().is_some_and(|ctx| {
                ctx.status == TaskStatus::Paused
                    && ctx.pause_reason == Some(PauseReason::UserInputNeeded)
            });
            if awaiting && running >= limit {
                return Err(ManagerError::ConcurrencyLimit { limit });
            }

            tab.messages.push(ChatMessage::user(message));
            if let Some(ctx) = tab.context.as_mut().filter(|_| awaiting) {
                ctx.instructions = format!("{}\n\nUser answer: {message}", ctx.instructions);
                ctx.transition(TaskStatus::Running, None);
                ctx.run_id = run_id;
            }
            Ok((tab.clone(), awaiting))
        })?;

        if resumed {
            info!(%tab_id, "user answered; task resumed");
            self.emit_status(tab_id, TaskStatus::Running, None).await;
            self.spawn_loop(tab_id, run_id);
        }
        Ok(tab)
    }

    /// Binds the tab to another session, dropping its task, history and
    /// messages. `None` starts a brand-new session.
    pub async fn switch_session(
        &self,
        tab_id: TabId,
        session_id: Option<SessionId>,
    ) -> Result<TabTaskState, ManagerError> {
        let session_id = session_id.unwrap_or_default();
        let tab = self.store().update_with(|state| {
            if state.tab(tab_id).is_some_and(TabTaskState::is_running) {
                return Err(ManagerError::InvalidState {
                    tab_id,
                    status: TaskStatus::Running,
                    action: "switch session of",
                });
            }
            let tab = state.tab_mut(tab_id);
            *tab = TabTaskState {
                session_id: Some(session_id.clone()),
                ..TabTaskState::default()
            };
            Ok(tab.clone())
        })?;

        self.loops.cancel(tab_id);
        info!(%tab_id, %session_id, "session switched");
        self.emit(TaskEvent::TabCleared { tab_id }).await;
        Ok(tab)
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<TaskSettings, ManagerError> {
        if patch.max_concurrent_tasks == Some(0) {
            return Err(ManagerError::InvalidRequest(
                "maxConcurrentTasks must be at least 1".into(),
            ));
        }
        let settings = self.store().update_with(|state| {
            patch.apply(&mut state.settings);
            state.settings
        });
        info!(
            max_concurrent_tasks = settings.max_concurrent_tasks,
            auto_pause_on_tab_switch = settings.auto_pause_on_tab_switch,
            "settings updated"
        );
        Ok(settings)
    }

    /// Moves the active-tab pointer and, when enabled, pauses every other
    /// running task. Returns the tabs that were paused.
    pub async fn on_tab_activated(&self, tab_id: TabId) -> Vec<TabId> {
        let paused = self.store().update_with(|state| {
            state.active_tab_id = Some(tab_id);
            if !state.settings.auto_pause_on_tab_switch {
                return Vec::new();
            }
            let others: Vec<TabId> = state
                .running_tabs()
                .into_iter()
                .filter(|id| *id != tab_id)
                .collect();
            for id in &others {
                if let Some(ctx) = state.context_mut(*id) {
                    ctx.transition(TaskStatus::Paused, Some(PauseReason::TabSwitched));
                }
            }
            others
        });

        for id in &paused {
            self.loops.cancel(*id);
            self.emit_status(*id, TaskStatus::Paused, Some(PauseReason::TabSwitched))
                .await;
        }
        if !paused.is_empty() {
            info!(active = %tab_id, paused = ?paused, "paused background tasks on tab switch");
        }
        self.emit(TaskEvent::ActiveTabChanged { tab_id }).await;
        paused
    }

    /// Drops every trace of a closed tab.
    pub async fn on_tab_closed(&self, tab_id: TabId) -> bool {
        let removed = self.store().update_with(|state| {
            if state.active_tab_id == Some(tab_id) {
                state.active_tab_id = None;
            }
            state.tabs.remove(&tab_id).is_some()
        });
        self.loops.cancel(tab_id);
        if removed {
            info!(%tab_id, "tab closed; task removed");
            self.emit(TaskEvent::TabCleared { tab_id }).await;
        }
        removed
    }

    /// Tracks the URL of a running task without interrupting it.
    pub async fn on_tab_navigated(&self, tab_id: TabId, url: String) -> bool {
        let updated = self
            .store()
            .update_with(|state| match state.context_mut(tab_id) {
                Some(ctx) if ctx.is_running() => {
                    ctx.current_url = Some(url);
                    ctx.touch();
                    true
                }
                _ => false,
            });
        debug!(%tab_id, updated, "tab navigated");
        updated
    }

    /// Waits for the tab's current loop to exit.
    pub async fn wait_for(&self, tab_id: TabId) -> Option<TaskLoopResult> {
        self.loops.take(tab_id)?.join().await
    }

    /// Cancels every loop and waits up to `grace` for each to finish.
    pub async fn shutdown(&self, grace: Duration) {
        let handles = self.loops.drain();
        info!(loops = handles.len(), "shutting down task loops");
        for (_, handle) in &handles {
            handle.cancel();
        }
        join_all(
            handles
                .into_iter()
                .map(|(_, handle)| handle.join_within(grace)),
        )
        .await;
    }

    fn next_run_id(&self) -> u64 {
        self.next_run.fetch_add(1, Ordering::Relaxed)
    }

    fn spawn_loop(&self, tab_id: TabId, run_id: u64) {
        let cancel = CancellationToken::new();
        let task_loop =
            TaskLoop::new(tab_id, self.config.clone(), self.deps.clone()).with_run_id(run_id);
        let state = self.store().load();
        self.loops.prune_finished(|tab| state.tabs.contains_key(&tab));
        let previous = self.loops.take(tab_id);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            // A superseded loop finishes its in-flight step before this one
            // starts, so a tab never has two steps running at once.
            if let Some(previous) = previous {
                previous.cancel();
                previous.join().await;
            }
            task_loop.run(token).await
        });
        self.loops.insert(tab_id, LoopHandle::new(cancel, handle));
    }

    async fn emit_status(
        &self,
        tab_id: TabId,
        status: TaskStatus,
        pause_reason: Option<PauseReason>,
    ) {
        self.emit(TaskEvent::StatusChanged {
            tab_id,
            status,
            pause_reason,
        })
        .await;
    }

    async fn emit(&self, event: TaskEvent) {
        if let Err(err) = self.deps.events.publish(event).await {
            debug!(?err, "dropping task event");
        }
    }
}
