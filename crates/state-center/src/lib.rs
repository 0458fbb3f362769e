//! Task-state repository shared by every tab's task loop.
//!
//! Snapshots are handed out as `Arc<MultiTabState>` and never mutated in
//! place: an update clones the current snapshot, applies the mutation and
//! publishes the result as the next revision. Readers holding an older
//! snapshot keep seeing exactly what they loaded.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::to_writer_pretty;
use tabflow_core_types::{
    MultiTabState, PauseReason, TabId, TabTaskState, TaskContext, TaskStatus,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Key-value style store for the multi-tab state.
///
/// Writers are last-writer-wins: `save` replaces the whole snapshot, while
/// `update` applies a read-modify-write against the latest revision.
pub trait StateCenter: Send + Sync {
    /// Latest committed snapshot.
    fn load(&self) -> Arc<MultiTabState>;

    /// Replaces the whole state.
    fn save(&self, state: MultiTabState);

    /// Applies `mutate` to a copy of the latest snapshot and commits it.
    /// Implementations must invoke `mutate` exactly once.
    fn update(&self, mutate: &mut dyn FnMut(&mut MultiTabState));

    /// Observe committed snapshots.
    fn subscribe(&self) -> watch::Receiver<Arc<MultiTabState>>;
}

/// Convenience helpers layered over any [`StateCenter`].
pub trait StateCenterExt: StateCenter {
    /// Like [`StateCenter::update`] but hands back the closure's result.
    fn update_with<R>(&self, mutate: impl FnOnce(&mut MultiTabState) -> R) -> R {
        let mut mutate = Some(mutate);
        let mut output = None;
        self.update(&mut |state| {
            if let Some(f) = mutate.take() {
                output = Some(f(state));
            }
        });
        output.expect("state center must invoke the update closure")
    }

    /// Mutates one tab's context if it exists; returns whether it did.
    fn update_context(&self, tab_id: TabId, mutate: impl FnOnce(&mut TaskContext)) -> bool {
        self.update_with(|state| match state.context_mut(tab_id) {
            Some(ctx) => {
                mutate(ctx);
                true
            }
            None => false,
        })
    }

    fn tab_state(&self, tab_id: TabId) -> TabTaskState {
        self.load().tab_or_default(tab_id)
    }

    fn context(&self, tab_id: TabId) -> Option<TaskContext> {
        self.load().context(tab_id).cloned()
    }
}

impl<T: StateCenter + ?Sized> StateCenterExt for T {}

#[derive(Clone, Debug, Default, Serialize)]
pub struct StateCenterStats {
    pub revision: u64,
    pub saves: u64,
    pub updates: u64,
}

/// In-memory state center backed by a `watch` channel.
pub struct InMemoryStateCenter {
    sender: watch::Sender<Arc<MultiTabState>>,
    stats: Mutex<StateCenterStats>,
}

impl InMemoryStateCenter {
    pub fn new() -> Self {
        Self::from_snapshot(MultiTabState::default())
    }

    pub fn from_snapshot(state: MultiTabState) -> Self {
        let (sender, _) = watch::channel(Arc::new(state));
        Self {
            sender,
            stats: Mutex::new(StateCenterStats::default()),
        }
    }

    /// Loads a persisted snapshot, or starts empty when the file is absent.
    /// Tasks recorded as running are restored as paused.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no persisted task state; starting empty");
            return Ok(Self::new());
        }
        let mut state = read_snapshot(path)?;
        let restored = recover_interrupted(&mut state);
        if !restored.is_empty() {
            info!(
                path = %path.display(),
                tabs = ?restored,
                "restored running tasks as paused"
            );
        }
        Ok(Self::from_snapshot(state))
    }

    pub fn stats(&self) -> StateCenterStats {
        self.stats.lock().clone()
    }

    pub fn write_snapshot<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        write_snapshot(path.as_ref(), &self.load())
    }

    /// Writes every committed revision to `path` from a background task.
    pub fn spawn_persistence(&self, path: impl Into<PathBuf>) -> JoinHandle<()> {
        let path = path.into();
        let mut receiver = self.sender.subscribe();
        tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                let snapshot = receiver.borrow_and_update().clone();
                let body = match serde_json::to_vec_pretty(snapshot.as_ref()) {
                    Ok(body) => body,
                    Err(err) => {
                        warn!(?err, "failed to serialize task state");
                        continue;
                    }
                };
                if let Err(err) = tokio::fs::write(&path, body).await {
                    warn!(path = %path.display(), ?err, "failed to persist task state");
                }
            }
            debug!(path = %path.display(), "state persistence stopped");
        })
    }

    fn bump(&self, saved: bool) {
        let mut stats = self.stats.lock();
        stats.revision += 1;
        if saved {
            stats.saves += 1;
        } else {
            stats.updates += 1;
        }
    }
}

impl Default for InMemoryStateCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCenter for InMemoryStateCenter {
    fn load(&self) -> Arc<MultiTabState> {
        self.sender.borrow().clone()
    }

    fn save(&self, state: MultiTabState) {
        self.sender.send_replace(Arc::new(state));
        self.bump(true);
    }

    fn update(&self, mutate: &mut dyn FnMut(&mut MultiTabState)) {
        // send_modify holds the channel's write lock for the whole
        // read-modify-write, so concurrent updates never interleave.
        self.sender.send_modify(|current| {
            let mut next = (**current).clone();
            mutate(&mut next);
            *current = Arc::new(next);
        });
        self.bump(false);
    }

    fn subscribe(&self) -> watch::Receiver<Arc<MultiTabState>> {
        self.sender.subscribe()
    }
}

pub fn read_snapshot(path: &Path) -> io::Result<MultiTabState> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

pub fn write_snapshot(path: &Path, state: &MultiTabState) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    to_writer_pretty(&mut writer, state)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    writer.flush()?;
    Ok(())
}

/// A persisted `running` task has no live loop after a restart; mark it
/// paused so the caller can resume it explicitly.
pub fn recover_interrupted(state: &mut MultiTabState) -> Vec<TabId> {
    let mut restored = Vec::new();
    for (tab_id, tab) in state.tabs.iter_mut() {
        if let Some(ctx) = tab.context.as_mut() {
            if ctx.status == TaskStatus::Running {
                ctx.transition(TaskStatus::Paused, Some(PauseReason::Manual));
                restored.push(*tab_id);
            }
        }
    }
    restored
}

#[cfg(test)]
mod tests {
    use super::*;

    use tabflow_core_types::{ChatMessage, TaskContext};
    use tempfile::NamedTempFile;

    #[test]
    fn loaded_snapshots_are_not_affected_by_later_updates() {
        let center = InMemoryStateCenter::new();
        center.update(&mut |state| {
            state.tab_mut(TabId(1)).messages.push(ChatMessage::user("hi"));
        });

        let before = center.load();
        center.update(&mut |state| {
            state.tab_mut(TabId(1)).messages.clear();
        });

        assert_eq!(before.tab(TabId(1)).unwrap().messages.len(), 1);
        assert!(center.load().tab(TabId(1)).unwrap().messages.is_empty());
        assert_eq!(center.stats().revision, 2);
    }

    #[test]
    fn update_with_returns_closure_output() {
        let center = InMemoryStateCenter::new();
        let count = center.update_with(|state| {
            state.tab_mut(TabId(3)).context = Some(TaskContext::start(TabId(3), "go", None));
            state.running_count()
        });
        assert_eq!(count, 1);
        assert!(center.update_context(TabId(3), |ctx| ctx.current_step = 4));
        assert!(!center.update_context(TabId(9), |ctx| ctx.current_step = 4));
        assert_eq!(center.context(TabId(3)).unwrap().current_step, 4);
    }

    #[test]
    fn save_replaces_whole_state() {
        let center = InMemoryStateCenter::new();
        center.update(&mut |state| {
            state.tab_mut(TabId(1));
        });
        center.save(MultiTabState::default());
        assert!(center.load().tabs.is_empty());
        assert_eq!(center.stats().saves, 1);
    }

    #[tokio::test]
    async fn subscribers_observe_commits() {
        let center = InMemoryStateCenter::new();
        let mut rx = center.subscribe();
        center.update(&mut |state| state.active_tab_id = Some(TabId(5)));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().active_tab_id, Some(TabId(5)));
    }

    #[test]
    fn reopening_a_snapshot_pauses_running_tasks() {
        let center = InMemoryStateCenter::new();
        center.update(&mut |state| {
            state.tab_mut(TabId(2)).context = Some(TaskContext::start(TabId(2), "go", None));
        });
        let file = NamedTempFile::new().expect("tempfile");
        center.write_snapshot(file.path()).expect("write snapshot");

        let reopened = InMemoryStateCenter::open(file.path()).expect("open snapshot");
        let ctx = reopened.context(TabId(2)).unwrap();
        assert_eq!(ctx.status, TaskStatus::Paused);
        assert_eq!(ctx.pause_reason, Some(PauseReason::Manual));
    }

    #[tokio::test]
    async fn persistence_task_writes_latest_revision() {
        let file = NamedTempFile::new().expect("tempfile");
        let center = InMemoryStateCenter::new();
        let handle = center.spawn_persistence(file.path());

        center.update(&mut |state| state.active_tab_id = Some(TabId(11)));

        let mut written = None;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            if let Ok(state) = read_snapshot(file.path()) {
                if state.active_tab_id == Some(TabId(11)) {
                    written = Some(state);
                    break;
                }
            }
        }
        handle.abort();
        assert!(written.is_some(), "snapshot should reach disk");
    }
}
