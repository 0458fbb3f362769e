use std::time::Duration;

use dashmap::DashMap;
use tabflow_core_types::TabId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use agent_core::TaskLoopResult;

/// A spawned task loop and the token that asks it to stop.
#[derive(Debug)]
pub struct LoopHandle {
    cancel: CancellationToken,
    handle: JoinHandle<TaskLoopResult>,
}

impl LoopHandle {
    pub fn new(cancel: CancellationToken, handle: JoinHandle<TaskLoopResult>) -> Self {
        Self { cancel, handle }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits up to `grace` for the loop, aborting it afterwards.
    pub async fn join_within(mut self, grace: Duration) -> Option<TaskLoopResult> {
        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(err)) => {
                warn!(?err, "task loop did not complete");
                None
            }
            Err(_) => {
                self.handle.abort();
                warn!("task loop aborted after grace period");
                None
            }
        }
    }

    pub async fn join(self) -> Option<TaskLoopResult> {
        match self.handle.await {
            Ok(result) => Some(result),
            Err(err) => {
                warn!(?err, "task loop did not complete");
                None
            }
        }
    }
}

/// Live loop handles keyed by tab.
#[derive(Debug, Default)]
pub struct LoopRegistry {
    loops: DashMap<TabId, LoopHandle>,
}

impl LoopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `handle`, returning the handle it replaced.
    pub fn insert(&self, tab_id: TabId, handle: LoopHandle) -> Option<LoopHandle> {
        self.loops.insert(tab_id, handle)
    }

    pub fn take(&self, tab_id: TabId) -> Option<LoopHandle> {
        self.loops.remove(&tab_id).map(|(_, handle)| handle)
    }

    pub fn cancel(&self, tab_id: TabId) -> bool {
        match self.loops.get(&tab_id) {
            Some(entry) => {
                entry.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, tab_id: TabId) -> bool {
        self.loops
            .get(&tab_id)
            .map(|entry| !entry.is_finished())
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.loops
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    /// Drops finished loops of tabs `keep` no longer cares about. Handles
    /// of live tabs stay so `take` can still collect their results.
    pub fn prune_finished(&self, keep: impl Fn(TabId) -> bool) {
        self.loops
            .retain(|tab_id, handle| !handle.is_finished() || keep(*tab_id));
    }

    pub fn drain(&self) -> Vec<(TabId, LoopHandle)> {
        let tabs: Vec<TabId> = self.loops.iter().map(|entry| *entry.key()).collect();
        tabs.into_iter()
            .filter_map(|tab_id| self.take(tab_id).map(|handle| (tab_id, handle)))
            .collect()
    }
}
