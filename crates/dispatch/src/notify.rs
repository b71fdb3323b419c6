use std::future::Future;

use chrono::{DateTime, Utc};
use model::{driver::Driver, ride::Ride};
use schemars::JsonSchema;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use utility::id::Id;

/// Emitted once a driver was durably assigned to a ride. The driver still has
/// to be told out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentEvent {
    pub ride_id: Id<Ride>,
    pub driver_id: Id<Driver>,
    pub assigned_at: DateTime<Utc>,
}

pub trait Notifier: Send + Sync + 'static {
    /// Hands the event over without waiting for delivery.
    fn notify(&self, event: AssignmentEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _event: AssignmentEvent) {}
}

/// Queues events on a bounded channel. Events that do not fit are dropped
/// with a warning.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::Sender<AssignmentEvent>,
}

impl ChannelNotifier {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<AssignmentEvent>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }

    /// Spawns a task feeding every event into `sink`. Must be called from
    /// within a tokio runtime.
    pub fn spawn<F, Fut>(buffer: usize, mut sink: F) -> Self
    where
        F: FnMut(AssignmentEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (notifier, mut receiver) = Self::new(buffer);
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                sink(event).await;
            }
            log::debug!("Assignment notifications stopped");
        });
        notifier
    }

    pub fn logging(buffer: usize) -> Self {
        Self::spawn(buffer, |event| async move {
            log::info!(
                "Notify driver {} of ride {} (assigned at {})",
                event.driver_id,
                event.ride_id,
                event.assigned_at
            );
        })
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: AssignmentEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => log::warn!(
                "Notification queue full, dropped assignment of driver {} to ride {}",
                event.driver_id,
                event.ride_id
            ),
            Err(TrySendError::Closed(event)) => log::warn!(
                "Notification queue closed, dropped assignment of driver {} to ride {}",
                event.driver_id,
                event.ride_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio::sync::mpsc;
    use utility::id::Id;

    use super::{AssignmentEvent, ChannelNotifier, Notifier};

    fn event(ride: i64) -> AssignmentEvent {
        AssignmentEvent {
            ride_id: Id::new(ride),
            driver_id: Id::new(7),
            assigned_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (notifier, mut receiver) = ChannelNotifier::new(1);
        notifier.notify(event(1));
        notifier.notify(event(2));
        assert_eq!(receiver.recv().await.unwrap().ride_id, Id::new(1));
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_channel_is_ignored() {
        let (notifier, receiver) = ChannelNotifier::new(4);
        drop(receiver);
        notifier.notify(event(1));
    }

    #[tokio::test]
    async fn spawned_sink_receives_events() {
        let (forward, mut received) = mpsc::unbounded_channel();
        let notifier = ChannelNotifier::spawn(4, move |event| {
            let forward = forward.clone();
            async move {
                let _ = forward.send(event);
            }
        });
        notifier.notify(event(3));
        assert_eq!(received.recv().await.unwrap().ride_id, Id::new(3));
    }
}
