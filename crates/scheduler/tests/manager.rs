use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_core::{
    ActionExecutors, DomAction, DomActionExecutor, DomActionOutcome, GenericActionExecutor,
    Heartbeat, InteractRequest, InteractResponse, PageExtractor, PageFormat, PageRepresentation,
    ReasoningService, RemoteServiceError, TabInfo, TaskLoopConfig, TaskLoopDeps,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use tabflow_core_types::{
    PauseReason, SessionId, StructuredAction, TabId, TabTaskState, TaskEvent, TaskStatus,
};
use tabflow_event_bus::InMemoryBus;
use tabflow_scheduler::{ManagerError, MultiTabManager, SettingsPatch, StartTask};
use tabflow_state_center::InMemoryStateCenter;
use tokio::sync::Notify;

/// Replays scripted replies, then blocks forever so the task stays running.
#[derive(Default)]
struct ScriptedReasoning {
    replies: Mutex<VecDeque<InteractResponse>>,
}

#[async_trait]
impl ReasoningService for ScriptedReasoning {
    async fn interact(
        &self,
        _request: &InteractRequest,
    ) -> Result<InteractResponse, RemoteServiceError> {
        let next = self.replies.lock().pop_front();
        match next {
            Some(reply) => Ok(reply),
            None => std::future::pending().await,
        }
    }
}

struct Page;

#[async_trait]
impl PageExtractor for Page {
    async fn extract(&self, _tab_id: TabId) -> anyhow::Result<PageRepresentation> {
        Ok(PageRepresentation::new(PageFormat::AccessibilityTree, "[1] button Buy"))
    }

    // No live tab behind the fake, so the loop never overwrites the URL.
    async fn tab_info(&self, tab_id: TabId) -> anyhow::Result<TabInfo> {
        anyhow::bail!("tab {tab_id} is not attached")
    }
}

struct Noop;

#[async_trait]
impl DomActionExecutor for Noop {
    async fn execute(&self, _tab: TabId, _action: &DomAction) -> anyhow::Result<DomActionOutcome> {
        Ok(DomActionOutcome::ok())
    }
}

#[async_trait]
impl GenericActionExecutor for Noop {
    async fn execute(&self, _tab: TabId, _action: &StructuredAction) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Holds the first reply until released; later calls never answer.
#[derive(Default)]
struct GatedReasoning {
    calls: AtomicUsize,
    release: Notify,
}

impl GatedReasoning {
    async fn wait_for_calls(&self, calls: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls.load(Ordering::SeqCst) < calls {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reasoning service was not called in time");
    }
}

#[async_trait]
impl ReasoningService for GatedReasoning {
    async fn interact(
        &self,
        _request: &InteractRequest,
    ) -> Result<InteractResponse, RemoteServiceError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return std::future::pending().await;
        }
        self.release.notified().await;
        Ok(InteractResponse {
            action: Some("finish()".into()),
            thought: "first task done".into(),
            ..Default::default()
        })
    }
}

fn manager(replies: Vec<InteractResponse>) -> MultiTabManager {
    manager_with(Arc::new(ScriptedReasoning {
        replies: Mutex::new(replies.into()),
    }))
}

fn manager_with(reasoning: Arc<dyn ReasoningService>) -> MultiTabManager {
    let deps = TaskLoopDeps {
        store: Arc::new(InMemoryStateCenter::new()),
        events: InMemoryBus::<TaskEvent>::new(128),
        extractor: Arc::new(Page),
        reasoning,
        executors: ActionExecutors::new(Arc::new(Noop), Arc::new(Noop)),
        chain_runner: None,
        hook: None,
        heartbeat: Heartbeat::new(Duration::from_millis(20)),
    };
    MultiTabManager::new(deps, TaskLoopConfig::immediate())
}

fn reply(action: &str) -> InteractResponse {
    InteractResponse {
        action: Some(action.to_string()),
        thought: format!("doing {action}"),
        ..Default::default()
    }
}

fn status(manager: &MultiTabManager, tab: i64) -> TaskStatus {
    manager.tab_state(TabId(tab)).status()
}

#[tokio::test]
async fn fourth_start_is_rejected_at_the_default_limit() {
    let manager = manager(vec![]);
    for tab in 1..=3 {
        manager
            .start_tab_task(StartTask::new(TabId(tab), format!("task {tab}")))
            .await
            .unwrap();
    }
    let before: Vec<_> = (1..=3)
        .map(|tab| manager.tab_state(TabId(tab)).context.unwrap())
        .map(|ctx| (ctx.status, ctx.instructions, ctx.started_at))
        .collect();

    let err = manager
        .start_tab_task(StartTask::new(TabId(4), "one too many"))
        .await
        .unwrap_err();
    assert_eq!(err, ManagerError::ConcurrencyLimit { limit: 3 });

    let after: Vec<_> = (1..=3)
        .map(|tab| manager.tab_state(TabId(tab)).context.unwrap())
        .map(|ctx| (ctx.status, ctx.instructions, ctx.started_at))
        .collect();
    assert_eq!(before, after);
    assert!(manager.tab_state(TabId(4)).context.is_none());
    assert_eq!(manager.state().running_count(), 3);
}

#[tokio::test]
async fn closing_a_tab_removes_its_task() {
    let manager = manager(vec![]);
    manager
        .start_tab_task(StartTask::new(TabId(5), "read the news"))
        .await
        .unwrap();
    manager.on_tab_activated(TabId(5)).await;

    assert!(manager.on_tab_closed(TabId(5)).await);
    assert_eq!(manager.tab_state(TabId(5)), TabTaskState::default());
    assert_eq!(manager.state().active_tab_id, None);
    assert!(!manager.on_tab_closed(TabId(5)).await);
}

#[tokio::test]
async fn tab_switch_pauses_other_running_tasks_when_enabled() {
    let manager = manager(vec![]);
    manager
        .update_settings(SettingsPatch {
            auto_pause_on_tab_switch: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    for tab in [1, 3] {
        manager
            .start_tab_task(StartTask::new(TabId(tab), "background work"))
            .await
            .unwrap();
    }

    let paused = manager.on_tab_activated(TabId(2)).await;

    assert_eq!(paused, vec![TabId(1), TabId(3)]);
    for tab in [1, 3] {
        let ctx = manager.tab_state(TabId(tab)).context.unwrap();
        assert_eq!(ctx.status, TaskStatus::Paused);
        assert_eq!(ctx.pause_reason, Some(PauseReason::TabSwitched));
    }
    assert!(manager.tab_state(TabId(2)).context.is_none());
    assert_eq!(manager.state().active_tab_id, Some(TabId(2)));
}

#[tokio::test]
async fn tab_switch_leaves_tasks_alone_by_default() {
    let manager = manager(vec![]);
    manager
        .start_tab_task(StartTask::new(TabId(1), "background work"))
        .await
        .unwrap();
    assert!(manager.on_tab_activated(TabId(2)).await.is_empty());
    assert_eq!(status(&manager, 1), TaskStatus::Running);
}

#[tokio::test]
async fn navigation_updates_only_running_tasks() {
    let manager = manager(vec![]);
    manager
        .start_tab_task(StartTask::new(TabId(1), "shop").with_url("https://a.test"))
        .await
        .unwrap();

    assert!(manager.on_tab_navigated(TabId(1), "https://b.test".into()).await);
    let ctx = manager.tab_state(TabId(1)).context.unwrap();
    assert_eq!(ctx.current_url.as_deref(), Some("https://b.test"));
    assert_eq!(ctx.status, TaskStatus::Running);

    manager.pause_tab_task(TabId(1)).await.unwrap();
    assert!(!manager.on_tab_navigated(TabId(1), "https://c.test".into()).await);
    assert!(!manager.on_tab_navigated(TabId(9), "https://c.test".into()).await);
}

#[tokio::test]
async fn pause_resume_and_stop_follow_the_state_machine() {
    let manager = manager(vec![]);
    let tab = TabId(1);
    manager
        .start_tab_task(StartTask::new(tab, "shop"))
        .await
        .unwrap();

    let paused = manager.pause_tab_task(tab).await.unwrap();
    assert_eq!(paused.context.unwrap().pause_reason, Some(PauseReason::Manual));
    assert_eq!(
        manager.pause_tab_task(tab).await.unwrap_err(),
        ManagerError::NotRunning(tab)
    );

    manager.resume_tab_task(tab).await.unwrap();
    assert_eq!(status(&manager, 1), TaskStatus::Running);

    manager.stop_tab_task(tab).await.unwrap();
    assert_eq!(status(&manager, 1), TaskStatus::Interrupted);
    assert_eq!(
        manager.resume_tab_task(tab).await.unwrap_err(),
        ManagerError::NotPaused(tab)
    );
    assert_eq!(
        manager.stop_tab_task(TabId(8)).await.unwrap_err(),
        ManagerError::NoTask(TabId(8))
    );
}

#[tokio::test]
async fn finished_task_releases_the_heartbeat() {
    let manager = manager(vec![reply("click(1)"), reply("finish()")]);
    let tab = TabId(4);
    manager
        .start_tab_task(StartTask::new(tab, "buy"))
        .await
        .unwrap();

    let result = manager.wait_for(tab).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.actions_executed, 1);
    assert_eq!(manager.heartbeat().active_leases(), 0);
    assert!(!manager.heartbeat().is_running());
}

#[tokio::test]
async fn answering_a_question_resumes_the_task() {
    let question = InteractResponse {
        user_question: Some("Which size?".into()),
        ..Default::default()
    };
    let manager = manager(vec![question, reply("finish()")]);
    let tab = TabId(2);
    manager
        .start_tab_task(StartTask::new(tab, "order a shirt"))
        .await
        .unwrap();
    let paused = manager.wait_for(tab).await.unwrap();
    assert_eq!(paused.pause_reason, Some(PauseReason::UserInputNeeded));

    manager.add_user_message(tab, "Large").await.unwrap();
    let finished = manager.wait_for(tab).await.unwrap();
    assert_eq!(finished.status, TaskStatus::Success);

    let state = manager.tab_state(tab);
    assert!(state.context.unwrap().instructions.ends_with("User answer: Large"));
    let contents: Vec<&str> = state.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["order a shirt", "Which size?", "Large"]);
}

#[tokio::test]
async fn restarting_a_tab_keeps_messages_and_session() {
    let manager = manager(vec![reply("finish()"), reply("finish()")]);
    let tab = TabId(3);
    let mut request = StartTask::new(tab, "first");
    request.session_id = Some(SessionId("s-42".into()));
    manager.start_tab_task(request).await.unwrap();
    manager.wait_for(tab).await.unwrap();

    let restarted = manager
        .start_tab_task(StartTask::new(tab, "second"))
        .await
        .unwrap();
    assert_eq!(restarted.messages.len(), 2);
    assert!(restarted.display_history.is_empty());
    assert_eq!(
        restarted.context.unwrap().session_id,
        Some(SessionId("s-42".into()))
    );
    manager.wait_for(tab).await.unwrap();
}

#[tokio::test]
async fn session_switch_is_rejected_while_running() {
    let manager = manager(vec![]);
    let tab = TabId(1);
    manager
        .start_tab_task(StartTask::new(tab, "shop"))
        .await
        .unwrap();
    assert!(matches!(
        manager.switch_session(tab, None).await,
        Err(ManagerError::InvalidState { .. })
    ));

    manager.stop_tab_task(tab).await.unwrap();
    let switched = manager
        .switch_session(tab, Some(SessionId("fresh".into())))
        .await
        .unwrap();
    assert!(switched.context.is_none());
    assert!(switched.messages.is_empty());
    assert_eq!(switched.session_id, Some(SessionId("fresh".into())));
}

#[tokio::test]
async fn zero_concurrency_limit_is_rejected() {
    let manager = manager(vec![]);
    assert!(matches!(
        manager
            .update_settings(SettingsPatch {
                max_concurrent_tasks: Some(0),
                ..Default::default()
            })
            .await,
        Err(ManagerError::InvalidRequest(_))
    ));
}

#[derive(Clone, Copy)]
enum Retire {
    Stop,
    Clear,
    Close,
}

/// Starts a task whose first reasoning call is held, retires it, starts a
/// second task on the same tab and only then lets the first reply through.
async fn late_reply_after(retire: Retire) {
    let reasoning = Arc::new(GatedReasoning::default());
    let manager = manager_with(reasoning.clone());
    let tab = TabId(6);
    manager
        .start_tab_task(StartTask::new(tab, "first task"))
        .await
        .unwrap();
    reasoning.wait_for_calls(1).await;

    match retire {
        Retire::Stop => {
            manager.stop_tab_task(tab).await.unwrap();
        }
        Retire::Clear => {
            manager.clear_tab_task(tab).await.unwrap();
        }
        Retire::Close => assert!(manager.on_tab_closed(tab).await),
    }
    manager
        .start_tab_task(StartTask::new(tab, "second task"))
        .await
        .unwrap();
    reasoning.release.notify_one();
    // The second loop only queries once the first one has exited.
    reasoning.wait_for_calls(2).await;

    let state = manager.tab_state(tab);
    let ctx = state.context.unwrap();
    assert_eq!(ctx.instructions, "second task");
    assert_eq!(ctx.status, TaskStatus::Running);
    assert_eq!(ctx.actions_executed, 0);
    assert!(state.display_history.is_empty());
    manager.shutdown(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn stopped_task_cannot_finish_its_successor() {
    late_reply_after(Retire::Stop).await;
}

#[tokio::test]
async fn cleared_task_cannot_finish_its_successor() {
    late_reply_after(Retire::Clear).await;
}

#[tokio::test]
async fn closed_tab_cannot_finish_a_new_task_on_the_same_id() {
    late_reply_after(Retire::Close).await;
}
