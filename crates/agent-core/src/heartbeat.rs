//! Keep-alive ticker shared by every running task loop.
//!
//! The heartbeat is an owned resource: the manager creates one and hands it
//! to each loop. Loops hold a [`HeartbeatLease`] while running; the ticker
//! runs while at least one lease is outstanding or after an explicit
//! [`Heartbeat::start`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Callback invoked on every tick with the running beat count.
pub type Pulse = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Default)]
struct HeartbeatState {
    leases: usize,
    ticker: Option<CancellationToken>,
}

pub struct Heartbeat {
    interval: Duration,
    pulse: Option<Pulse>,
    beats: Arc<AtomicU64>,
    state: Mutex<HeartbeatState>,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            interval,
            pulse: None,
            beats: Arc::new(AtomicU64::new(0)),
            state: Mutex::new(HeartbeatState::default()),
        })
    }

    pub fn with_pulse(interval: Duration, pulse: Pulse) -> Arc<Self> {
        Arc::new(Self {
            interval,
            pulse: Some(pulse),
            beats: Arc::new(AtomicU64::new(0)),
            state: Mutex::new(HeartbeatState::default()),
        })
    }

    pub fn start(&self) {
        let mut state = self.state.lock();
        self.start_locked(&mut state);
    }

    pub fn stop(&self) {
        let mut state = self.state.lock();
        Self::stop_locked(&mut state);
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().ticker.is_some()
    }

    pub fn active_leases(&self) -> usize {
        self.state.lock().leases
    }

    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }

    /// Registers a running task; the first lease starts the ticker.
    pub fn acquire(self: &Arc<Self>) -> HeartbeatLease {
        let mut state = self.state.lock();
        state.leases += 1;
        if state.leases == 1 {
            self.start_locked(&mut state);
        }
        HeartbeatLease {
            heartbeat: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.leases = state.leases.saturating_sub(1);
        if state.leases == 0 {
            Self::stop_locked(&mut state);
        }
    }

    fn start_locked(&self, state: &mut HeartbeatState) {
        if state.ticker.is_some() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("heartbeat requested outside a tokio runtime; not started");
            return;
        };

        let shutdown = CancellationToken::new();
        state.ticker = Some(shutdown.clone());

        let period = self.interval;
        let beats = Arc::clone(&self.beats);
        let pulse = self.pulse.clone();
        runtime.spawn(async move {
            info!(interval_ms = period.as_millis() as u64, "heartbeat started");
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let beat = beats.fetch_add(1, Ordering::Relaxed) + 1;
                        trace!(beat, "heartbeat");
                        if let Some(pulse) = pulse.as_ref() {
                            pulse(beat);
                        }
                    }
                    _ = shutdown.cancelled() => {
                        debug!("heartbeat stopped");
                        break;
                    }
                }
            }
        });
    }

    fn stop_locked(state: &mut HeartbeatState) {
        if let Some(ticker) = state.ticker.take() {
            ticker.cancel();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        Self::stop_locked(self.state.get_mut());
    }
}

/// Held by a running task; dropping it releases the heartbeat.
pub struct HeartbeatLease {
    heartbeat: Arc<Heartbeat>,
}

impl Drop for HeartbeatLease {
    fn drop(&mut self) {
        self.heartbeat.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_while_any_lease_is_held() {
        let heartbeat = Heartbeat::new(Duration::from_millis(5));
        assert!(!heartbeat.is_running());

        let first = heartbeat.acquire();
        let second = heartbeat.acquire();
        assert!(heartbeat.is_running());
        assert_eq!(heartbeat.active_leases(), 2);

        drop(first);
        assert!(heartbeat.is_running());
        drop(second);
        assert!(!heartbeat.is_running());
        assert_eq!(heartbeat.active_leases(), 0);
    }

    #[tokio::test]
    async fn ticks_invoke_the_pulse() {
        let seen = Arc::new(AtomicU64::new(0));
        let observed = Arc::clone(&seen);
        let heartbeat = Heartbeat::with_pulse(
            Duration::from_millis(5),
            Arc::new(move |beat| observed.store(beat, Ordering::Relaxed)),
        );
        heartbeat.start();
        tokio::time::sleep(Duration::from_millis(40)).await;
        heartbeat.stop();

        assert!(heartbeat.beats() >= 2);
        assert!(seen.load(Ordering::Relaxed) >= 2);
    }

    #[test]
    fn acquire_without_runtime_does_not_panic() {
        let heartbeat = Heartbeat::new(Duration::from_millis(5));
        let lease = heartbeat.acquire();
        assert!(!heartbeat.is_running());
        drop(lease);
    }
}
