use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use tabflow_core_types::TabflowError;

/// Trait implemented by payload types that can be carried on the bus.
pub trait Event: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Event for T where T: Clone + Send + Sync + std::fmt::Debug + 'static {}

#[async_trait]
pub trait EventBus<E>: Send + Sync
where
    E: Event,
{
    /// Publishes to current subscribers and returns how many received it.
    async fn publish(&self, event: E) -> Result<usize, TabflowError>;
    fn subscribe(&self) -> broadcast::Receiver<E>;
}

/// In-memory broadcast bus. Publishing with no subscribers is not an error:
/// task loops keep running whether or not a UI is attached.
pub struct InMemoryBus<E>
where
    E: Event,
{
    sender: broadcast::Sender<E>,
}

impl<E> InMemoryBus<E>
where
    E: Event,
{
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl<E> EventBus<E> for InMemoryBus<E>
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<usize, TabflowError> {
        if self.sender.receiver_count() == 0 {
            trace!(?event, "no subscribers; event dropped");
            return Ok(0);
        }
        self.sender
            .send(event)
            .map_err(|err| TabflowError::new(err.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }
}

/// Helper to materialise an mpsc receiver from the bus subscription
/// so callers can await events without handling broadcast semantics directly.
pub fn to_mpsc<E>(bus: Arc<dyn EventBus<E>>, capacity: usize) -> mpsc::Receiver<E>
where
    E: Event,
{
    let mut rx = bus.subscribe();
    let (tx, out_rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    if tx.send(ev).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "subscriber lagged behind the bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    out_rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = InMemoryBus::<u32>::new(4);
        assert_eq!(bus.publish(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mpsc_bridge_forwards_events() {
        let bus = InMemoryBus::<u32>::new(4);
        let mut rx = to_mpsc(bus.clone() as Arc<dyn EventBus<u32>>, 4);
        assert_eq!(bus.publish(7).await.unwrap(), 1);
        assert_eq!(rx.recv().await, Some(7));
    }
}
