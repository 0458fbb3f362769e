//! Task loop controller: one instance drives one tab's task.
//!
//! Each iteration extracts the page, asks the reasoning service for the
//! next step, executes it and records history. Every write the loop makes
//! is conditional on the context still being `running` under this loop's
//! run id, so a stop, pause or restart issued mid-step is never overwritten
//! and a superseded loop cannot leak into the tab's next task.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;

use tabflow_core_types::{
    ActionStatus, ChainAction, ChainMetadata, ChatMessage, DisplayHistoryEntry, MultiTabState,
    ParsedAction, PauseReason, StructuredAction, TabId, TabTaskState, TaskContext, TaskEvent,
    TaskStatus, TokenUsage,
};
use tabflow_event_bus::EventBus;
use tabflow_state_center::{StateCenter, StateCenterExt};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::TaskLoopConfig;
use super::types::TaskLoopResult;
use crate::action::{ActionExecutors, ActionKind};
use crate::errors::{AgentError, RemoteServiceError};
use crate::heartbeat::{Heartbeat, HeartbeatLease};
use crate::parser;
use crate::ports::{
    AutomationHook, ChainRunner, InteractRequest, InteractResponse, PageExtractor,
    ReasoningService,
};

type Step = ControlFlow<TaskLoopResult>;

/// Collaborators shared by every loop the manager spawns.
#[derive(Clone)]
pub struct TaskLoopDeps {
    pub store: Arc<dyn StateCenter>,
    pub events: Arc<dyn EventBus<TaskEvent>>,
    pub extractor: Arc<dyn PageExtractor>,
    pub reasoning: Arc<dyn ReasoningService>,
    pub executors: ActionExecutors,
    pub chain_runner: Option<Arc<dyn ChainRunner>>,
    pub hook: Option<Arc<dyn AutomationHook>>,
    pub heartbeat: Arc<Heartbeat>,
}

pub struct TaskLoop {
    tab_id: TabId,
    run_id: u64,
    config: TaskLoopConfig,
    deps: TaskLoopDeps,
    cancel: CancellationToken,
}

impl TaskLoop {
    pub fn new(tab_id: TabId, config: TaskLoopConfig, deps: TaskLoopDeps) -> Self {
        Self {
            tab_id,
            run_id: 0,
            config,
            deps,
            cancel: CancellationToken::new(),
        }
    }

    /// Binds the loop to the context's `run_id`; writes for any other run
    /// are dropped.
    pub fn with_run_id(mut self, run_id: u64) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn config(&self) -> &TaskLoopConfig {
        &self.config
    }

    /// Runs until the task leaves `running` or another run takes the tab.
    ///
    /// `cancel` is checked at the top of an iteration and before any status
    /// change: an extraction, reasoning call or action already in flight
    /// completes first, but a cancelled loop never moves the task's status.
    /// The heartbeat lease and any attached hook are released on every exit.
    pub async fn run(self, cancel: CancellationToken) -> TaskLoopResult {
        Self { cancel, ..self }.run_to_end().await
    }

    async fn run_to_end(&self) -> TaskLoopResult {
        let started = Instant::now();
        let mut guard = LoopGuard {
            tab_id: self.tab_id,
            hook: None,
            lease: Some(self.deps.heartbeat.acquire()),
        };
        info!(tab_id = %self.tab_id, "task loop started");

        let mut result = match self.attach(&mut guard).await {
            Ok(()) => self.drive().await,
            Err(err) => self.fail(err).await,
        };
        guard.release().await;

        result.total_time_ms = started.elapsed().as_millis() as u64;
        if let Some(ctx) = self
            .deps
            .store
            .context(self.tab_id)
            .filter(|ctx| ctx.run_id == self.run_id)
        {
            result.actions_executed = ctx.actions_executed;
        }
        info!(
            tab_id = %self.tab_id,
            status = %result.status,
            actions = result.actions_executed,
            elapsed_ms = result.total_time_ms,
            "task loop finished"
        );
        result
    }

    async fn attach(&self, guard: &mut LoopGuard) -> Result<(), AgentError> {
        let Some(hook) = self.deps.hook.clone() else {
            return Ok(());
        };
        self.set_action_status(ActionStatus::Attaching).await;
        hook.attach(self.tab_id)
            .await
            .map_err(|err| AgentError::Attach(err.to_string()))?;
        guard.hook = Some(hook);
        Ok(())
    }

    async fn drive(&self) -> TaskLoopResult {
        loop {
            if let ControlFlow::Break(result) = self.step().await {
                return result;
            }
        }
    }

    async fn step(&self) -> Step {
        if self.cancel.is_cancelled() {
            return ControlFlow::Break(self.observed_exit("task loop cancelled"));
        }
        let Some(ctx) = self.deps.store.context(self.tab_id) else {
            return ControlFlow::Break(TaskLoopResult::cleared(self.tab_id));
        };
        if ctx.run_id != self.run_id {
            return ControlFlow::Break(TaskLoopResult::superseded(self.tab_id));
        }
        if !ctx.is_running() {
            return ControlFlow::Break(TaskLoopResult::from_context(&ctx, "task no longer running"));
        }
        if ctx.actions_executed >= self.config.max_actions {
            return ControlFlow::Break(self.interrupt(ctx.actions_executed).await);
        }

        let url = self.await_navigation().await;
        if let Some(url) = url.clone() {
            self.deps.store.update_with(|state| {
                if let Some(ctx) = self.owned(state) {
                    ctx.current_url = Some(url);
                }
            });
        }

        self.set_action_status(ActionStatus::Extracting).await;
        let page = match self.deps.extractor.extract(self.tab_id).await {
            Ok(page) => page,
            Err(err) => {
                return ControlFlow::Break(self.fail(AgentError::extraction(err.to_string())).await)
            }
        };
        self.set_action_status(ActionStatus::Transforming).await;
        let page = page.compact(self.config.max_page_chars);

        self.set_action_status(ActionStatus::Querying).await;
        let request = InteractRequest {
            session_id: ctx.session_id.clone(),
            task_id: ctx.task_id.clone(),
            url: url.or_else(|| ctx.current_url.clone()),
            page,
            instructions: ctx.instructions.clone(),
            use_org_knowledge: ctx.use_org_knowledge,
        };
        let response = match self.deps.reasoning.interact(&request).await {
            Ok(response) => response,
            Err(err) if err.is_rate_limited() => {
                return ControlFlow::Break(self.pause_rate_limited(&err).await)
            }
            Err(err) => return ControlFlow::Break(self.fail(err.into()).await),
        };
        self.record_progress(&response);

        if response.is_complete() {
            let entry = finish_entry(&response.thought, response.usage);
            self.append_history(entry).await;
            return ControlFlow::Break(self.succeed("reasoning service reported completion").await);
        }
        if response.asks_user() {
            return ControlFlow::Break(self.ask_user(&response).await);
        }
        if let (Some((actions, metadata)), Some(runner)) =
            (response.chain(), self.deps.chain_runner.as_ref())
        {
            return self
                .run_chain(runner, &ctx, &response, actions, metadata)
                .await;
        }

        let Some(action_text) = response
            .action
            .as_deref()
            .filter(|text| !text.trim().is_empty())
        else {
            let err = RemoteServiceError::InvalidResponse("response carried no action".into());
            return ControlFlow::Break(self.fail(err.into()).await);
        };
        self.execute_action(&response.thought, action_text, response.usage)
            .await
    }

    async fn execute_action(&self, thought: &str, text: &str, usage: Option<TokenUsage>) -> Step {
        let parsed = match parser::try_parse_response(thought, text) {
            Ok(parsed) => parsed,
            Err(err) => {
                let entry = DisplayHistoryEntry::new(
                    thought,
                    text,
                    ParsedAction::Error {
                        message: err.to_string(),
                    },
                    usage,
                );
                self.append_history(entry).await;
                return ControlFlow::Break(self.end_with_error(&AgentError::Parse(err)).await);
            }
        };
        let Some(structured) = parsed.structured().cloned() else {
            return ControlFlow::Break(self.end_with_error(&AgentError::execution("unparsed action")).await);
        };
        let kind = match ActionKind::try_from(&structured) {
            Ok(kind) => kind,
            Err(err) => return ControlFlow::Break(self.fail(err).await),
        };
        let entry = DisplayHistoryEntry::new(thought, text, parsed, usage);

        if kind.is_terminal() {
            self.append_history(entry).await;
            return ControlFlow::Break(self.terminate(kind).await);
        }

        self.set_action_status(ActionStatus::Acting).await;
        let outcome = match kind
            .execute(self.tab_id, &structured, &self.deps.executors)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => return ControlFlow::Break(self.fail(err).await),
        };
        self.append_history(entry.with_dom_changes(outcome.dom_changes))
            .await;

        self.settle().await;
        let executed = self.count_actions(1);
        if executed >= self.config.max_actions {
            return ControlFlow::Break(self.interrupt(executed).await);
        }
        ControlFlow::Continue(())
    }

    /// Runs a server-approved batch, truncated to the remaining action
    /// budget. A terminal action ends the batch and is applied afterwards.
    async fn run_chain(
        &self,
        runner: &Arc<dyn ChainRunner>,
        ctx: &TaskContext,
        response: &InteractResponse,
        actions: &[ChainAction],
        metadata: &ChainMetadata,
    ) -> Step {
        let budget = self
            .config
            .max_actions
            .saturating_sub(ctx.actions_executed) as usize;
        if actions.len() > budget {
            debug!(
                tab_id = %self.tab_id,
                requested = actions.len(),
                budget,
                "truncating chain to the remaining action budget"
            );
        }

        let mut batch = Vec::new();
        let mut terminal: Option<(ChainAction, StructuredAction)> = None;
        for action in actions.iter().take(budget) {
            match parser::parse_action(&action.action) {
                Ok(structured) if matches!(structured.name.as_str(), "finish" | "fail") => {
                    terminal = Some((action.clone(), structured));
                    break;
                }
                _ => batch.push(action.clone()),
            }
        }

        let mut executed = ctx.actions_executed;
        if !batch.is_empty() {
            self.set_action_status(ActionStatus::Acting).await;
            let result = runner.run_chain(self.tab_id, &batch, metadata).await;

            let mut succeeded = 0;
            for (position, step) in result
                .executed_actions
                .iter()
                .filter(|step| step.success)
                .enumerate()
            {
                let thought = batch
                    .get(step.index)
                    .and_then(|action| action.description.clone())
                    .unwrap_or_else(|| response.thought.clone());
                let usage = if position == 0 { response.usage } else { None };
                let parsed = parser::parse_response(&thought, &step.action_text);
                let entry = DisplayHistoryEntry::new(thought, &step.action_text, parsed, usage)
                    .with_dom_changes(step.dom_changes.clone());
                self.append_history(entry).await;
                succeeded += 1;
            }
            executed = self.count_actions(succeeded);

            if !result.success {
                let cause = result
                    .chain_error
                    .unwrap_or_else(|| "chain failed".to_string());
                let err = match result.failed_at_index {
                    Some(index) => {
                        AgentError::execution(format!("chained action {index} failed: {cause}"))
                    }
                    None => AgentError::execution(cause),
                };
                return ControlFlow::Break(self.fail(err).await);
            }
        }

        if let Some((action, structured)) = terminal {
            let kind = match ActionKind::try_from(&structured) {
                Ok(kind) => kind,
                Err(err) => return ControlFlow::Break(self.fail(err).await),
            };
            let thought = action
                .description
                .clone()
                .unwrap_or_else(|| response.thought.clone());
            let parsed = parser::parse_response(&thought, &action.action);
            let entry = DisplayHistoryEntry::new(thought, &action.action, parsed, None);
            self.append_history(entry).await;
            return ControlFlow::Break(self.terminate(kind).await);
        }

        self.settle().await;
        if executed >= self.config.max_actions {
            return ControlFlow::Break(self.interrupt(executed).await);
        }
        ControlFlow::Continue(())
    }

    async fn terminate(&self, kind: ActionKind) -> TaskLoopResult {
        match kind {
            ActionKind::Fail { reason } => {
                let reason = reason.unwrap_or_else(|| "task reported failure".to_string());
                self.end_with_error(&AgentError::TaskFailed(reason)).await
            }
            _ => self.succeed("task finished").await,
        }
    }

    /// Polls the tab while it is loading and returns its current URL.
    async fn await_navigation(&self) -> Option<String> {
        let max_polls = self.config.navigation_max_polls;
        for poll in 0..=max_polls {
            match self.deps.extractor.tab_info(self.tab_id).await {
                Ok(info) if info.loading && poll < max_polls => {
                    if poll == 0 {
                        self.set_action_status(ActionStatus::Waiting).await;
                    }
                    tokio::time::sleep(self.config.navigation_wait()).await;
                }
                Ok(info) => {
                    if info.loading {
                        debug!(tab_id = %self.tab_id, "tab still loading; proceeding");
                    }
                    return Some(info.url);
                }
                Err(err) => {
                    debug!(tab_id = %self.tab_id, ?err, "tab info unavailable");
                    return None;
                }
            }
        }
        None
    }

    async fn settle(&self) {
        self.set_action_status(ActionStatus::Waiting).await;
        let settle = self.config.post_action_settle();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
    }

    /// Writes back identifiers and progress reported by the service.
    fn record_progress(&self, response: &InteractResponse) {
        self.deps.store.update_with(|state| {
            let Some(tab) = state.tabs.get_mut(&self.tab_id) else {
                return;
            };
            let Some(ctx) = tab.context.as_mut().filter(|ctx| ctx.is_owned_by(self.run_id)) else {
                return;
            };
            if let Some(session_id) = response.session_id.clone() {
                ctx.session_id = Some(session_id.clone());
                tab.session_id = Some(session_id);
            }
            if let Some(task_id) = response.task_id.clone() {
                ctx.task_id = Some(task_id);
            }
            if let Some(step) = response.current_step {
                ctx.current_step = step;
            }
            if let Some(total) = response.total_steps {
                ctx.total_steps = total;
            }
            if response.status.is_some() {
                ctx.orchestrator_status = response.status;
            }
            ctx.touch();
        });
    }

    fn count_actions(&self, added: u32) -> u32 {
        self.deps.store.update_with(|state| match self.owned(state) {
            Some(ctx) => {
                ctx.actions_executed = ctx.actions_executed.saturating_add(added);
                ctx.touch();
                ctx.actions_executed
            }
            None => 0,
        })
    }

    async fn set_action_status(&self, action_status: ActionStatus) {
        let changed = self.deps.store.update_with(|state| match self.owned(state) {
            Some(ctx) if ctx.action_status != action_status => {
                ctx.action_status = action_status;
                true
            }
            _ => false,
        });
        if changed {
            self.emit(TaskEvent::ActionStatusChanged {
                tab_id: self.tab_id,
                action_status,
            })
            .await;
        }
    }

    /// History only grows while this run still owns the tab.
    async fn append_history(&self, entry: DisplayHistoryEntry) {
        let appended = self.deps.store.update_with(|state| match self.owned_tab(state) {
            Some(tab) => {
                tab.display_history.push(entry.clone());
                true
            }
            _ => false,
        });
        if appended {
            self.emit(TaskEvent::HistoryAppended {
                tab_id: self.tab_id,
                entry,
            })
            .await;
        }
    }

    async fn push_assistant_message(&self, content: String) {
        let message = ChatMessage::assistant(content);
        let pushed = self.deps.store.update_with(|state| match self.owned_tab(state) {
            Some(tab) => {
                tab.messages.push(message.clone());
                true
            }
            _ => false,
        });
        if pushed {
            self.emit(TaskEvent::AssistantMessage {
                tab_id: self.tab_id,
                message,
            })
            .await;
        }
    }

    async fn succeed(&self, message: &str) -> TaskLoopResult {
        self.transition(TaskStatus::Success, None, None, message)
            .await
    }

    async fn interrupt(&self, executed: u32) -> TaskLoopResult {
        warn!(
            tab_id = %self.tab_id,
            executed,
            max = self.config.max_actions,
            "action budget exhausted"
        );
        let message = format!("stopped after {executed} actions");
        self.transition(TaskStatus::Interrupted, None, None, &message)
            .await
    }

    async fn ask_user(&self, response: &InteractResponse) -> TaskLoopResult {
        let question = response
            .user_question
            .clone()
            .filter(|question| !question.trim().is_empty())
            .unwrap_or_else(|| response.thought.clone());
        self.push_assistant_message(question.clone()).await;
        self.transition(
            TaskStatus::Paused,
            Some(PauseReason::UserInputNeeded),
            None,
            &question,
        )
        .await
    }

    async fn pause_rate_limited(&self, err: &RemoteServiceError) -> TaskLoopResult {
        warn!(tab_id = %self.tab_id, error = %err, "reasoning service rate limited; pausing");
        let notice = match err.retry_after_secs() {
            Some(secs) => format!("Rate limited by the reasoning service. Retry after {secs} seconds."),
            None => "Rate limited by the reasoning service. Resume to retry.".to_string(),
        };
        self.push_assistant_message(notice.clone()).await;
        self.transition(TaskStatus::Paused, Some(PauseReason::RateLimited), None, &notice)
            .await
    }

    /// Records a fatal error in history, then ends the task.
    async fn fail(&self, err: AgentError) -> TaskLoopResult {
        self.append_history(DisplayHistoryEntry::error(err.to_string()))
            .await;
        self.end_with_error(&err).await
    }

    async fn end_with_error(&self, err: &AgentError) -> TaskLoopResult {
        warn!(tab_id = %self.tab_id, error = %err, "task failed");
        let message = err.to_string();
        self.transition(TaskStatus::Error, None, Some(message.clone()), &message)
            .await
    }

    fn observed_exit(&self, message: &str) -> TaskLoopResult {
        match self.deps.store.context(self.tab_id) {
            Some(ctx) if ctx.run_id == self.run_id => TaskLoopResult::from_context(&ctx, message),
            Some(_) => TaskLoopResult::superseded(self.tab_id),
            None => TaskLoopResult::cleared(self.tab_id),
        }
    }

    fn owned<'a>(&self, state: &'a mut MultiTabState) -> Option<&'a mut TaskContext> {
        state
            .context_mut(self.tab_id)
            .filter(|ctx| ctx.is_owned_by(self.run_id))
    }

    fn owned_tab<'a>(&self, state: &'a mut MultiTabState) -> Option<&'a mut TabTaskState> {
        state.tabs.get_mut(&self.tab_id).filter(|tab| {
            tab.context
                .as_ref()
                .is_some_and(|ctx| ctx.is_owned_by(self.run_id))
        })
    }

    /// Moves the context out of `running`. Loses to any concurrent change,
    /// to a newer run and to cancellation.
    async fn transition(
        &self,
        status: TaskStatus,
        pause_reason: Option<PauseReason>,
        error: Option<String>,
        message: &str,
    ) -> TaskLoopResult {
        let outcome = self.deps.store.update_with(|state| {
            let ctx = state.context_mut(self.tab_id)?;
            if ctx.run_id != self.run_id {
                return None;
            }
            let applied = ctx.is_running() && !self.cancel.is_cancelled();
            if applied {
                ctx.transition(status, pause_reason);
                if error.is_some() {
                    ctx.last_error = error.clone();
                }
            }
            Some((applied, ctx.clone()))
        });

        match outcome {
            Some((true, ctx)) => {
                info!(
                    tab_id = %self.tab_id,
                    status = %ctx.status,
                    pause_reason = ?ctx.pause_reason,
                    "task status changed"
                );
                self.emit(TaskEvent::StatusChanged {
                    tab_id: self.tab_id,
                    status: ctx.status,
                    pause_reason: ctx.pause_reason,
                })
                .await;
                TaskLoopResult::from_context(&ctx, message)
            }
            Some((false, ctx)) => {
                debug!(
                    tab_id = %self.tab_id,
                    current = %ctx.status,
                    wanted = %status,
                    "status already changed elsewhere"
                );
                TaskLoopResult::from_context(&ctx, "task no longer running")
            }
            None => self.observed_exit("task no longer running"),
        }
    }

    async fn emit(&self, event: TaskEvent) {
        if let Err(err) = self.deps.events.publish(event).await {
            debug!(tab_id = %self.tab_id, ?err, "dropping task event");
        }
    }
}

fn finish_entry(thought: &str, usage: Option<TokenUsage>) -> DisplayHistoryEntry {
    let parsed = ParsedAction::Success {
        thought: thought.to_string(),
        action_text: "finish()".to_string(),
        structured_action: StructuredAction::new("finish"),
    };
    DisplayHistoryEntry::new(thought, "finish()", parsed, usage)
}

/// Releases the heartbeat lease and detaches the hook on every exit path.
struct LoopGuard {
    tab_id: TabId,
    hook: Option<Arc<dyn AutomationHook>>,
    lease: Option<HeartbeatLease>,
}

impl LoopGuard {
    async fn release(mut self) {
        if let Some(hook) = self.hook.take() {
            if let Err(err) = hook.detach(self.tab_id).await {
                warn!(tab_id = %self.tab_id, ?err, "failed to detach automation hook");
            }
        }
        self.lease.take();
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        // Reached only when the loop future is dropped mid-flight.
        let Some(hook) = self.hook.take() else {
            return;
        };
        let tab_id = self.tab_id;
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(err) = hook.detach(tab_id).await {
                        warn!(%tab_id, ?err, "failed to detach automation hook");
                    }
                });
            }
            Err(_) => warn!(%tab_id, "automation hook left attached; no runtime for detach"),
        }
    }
}
