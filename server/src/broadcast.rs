//! Event fan-out for room events.
//!
//! The coordinator publishes every [`RoomEvent`] to a single
//! [`EventBroadcaster`] once the room lock has been released. Delivery to
//! clients is the job of an external fan-out layer, which registers interest
//! either by pulling from a [`RoomSubscription`] or by handing an
//! [`EventSink`] to [`spawn_sink`].
//!
//! Delivery is at-least-once from the consumer's point of view: a slow
//! subscriber that lags behind the channel capacity is told how many events
//! it missed and is expected to resynchronize from a room view. Every event
//! carries a per-room sequence number for ordering and deduplication.
//!
//! # Example
//!
//! ```rust
//! use confessions_server::broadcast::EventBroadcaster;
//!
//! let broadcaster = EventBroadcaster::new();
//! let rx = broadcaster.subscribe();
//! assert_eq!(broadcaster.subscriber_count(), 1);
//! drop(rx);
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::types::{EventPayload, RoomEvent, RoomId};

/// Default channel capacity.
///
/// Subscribers that fall more than this many events behind start lagging
/// and lose the oldest events.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Central hub distributing room events to all subscribers.
///
/// Cloning is cheap; clones share the same channel.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: Sender<RoomEvent>,
}

impl EventBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        debug!(capacity, "Created event broadcaster");
        Self { sender }
    }

    /// Subscribes to events of every room.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<RoomEvent> {
        let rx = self.sender.subscribe();
        debug!(
            subscriber_count = self.subscriber_count(),
            "New subscriber added"
        );
        rx
    }

    /// Subscribes to events matching `filter`.
    #[must_use]
    pub fn subscribe_filtered(&self, filter: SubscriberFilter) -> RoomSubscription {
        RoomSubscription {
            rx: self.subscribe(),
            filter,
        }
    }

    /// Subscribes to the events of one room.
    #[must_use]
    pub fn subscribe_room(&self, room_id: RoomId) -> RoomSubscription {
        self.subscribe_filtered(SubscriberFilter::new().with_room(room_id))
    }

    /// Publishes an event. Returns the number of subscribers that received it.
    pub fn broadcast(&self, event: RoomEvent) -> usize {
        trace!(
            room_id = %event.room_id,
            sequence = event.sequence,
            event = event.payload.name(),
            "Broadcasting event"
        );

        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No active subscribers to receive event");
                0
            }
        }
    }

    /// Publishes a batch in order.
    pub fn broadcast_all(&self, events: Vec<RoomEvent>) {
        for event in events {
            self.broadcast(event);
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Filter criteria for a subscription. Empty filters match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberFilter {
    pub room_id: Option<RoomId>,

    /// Event name as returned by `EventPayload::name`.
    pub event: Option<&'static str>,
}

impl SubscriberFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_room(mut self, room_id: RoomId) -> Self {
        self.room_id = Some(room_id);
        self
    }

    #[must_use]
    pub fn with_event(mut self, event: &'static str) -> Self {
        self.event = Some(event);
        self
    }

    #[must_use]
    pub fn matches(&self, event: &RoomEvent) -> bool {
        if let Some(room_id) = self.room_id {
            if event.room_id != room_id {
                return false;
            }
        }
        if let Some(name) = self.event {
            if event.payload.name() != name {
                return false;
            }
        }
        true
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.room_id.is_none() && self.event.is_none()
    }
}

/// A filtered receiver.
#[derive(Debug)]
pub struct RoomSubscription {
    rx: Receiver<RoomEvent>,
    filter: SubscriberFilter,
}

impl RoomSubscription {
    pub fn filter(&self) -> &SubscriberFilter {
        &self.filter
    }

    /// Waits for the next matching event.
    ///
    /// # Errors
    ///
    /// Returns [`RecvError::Lagged`] when events were dropped because this
    /// subscriber fell behind, and [`RecvError::Closed`] once every
    /// broadcaster is gone.
    pub async fn recv(&mut self) -> Result<RoomEvent, RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// Receiver side of the fan-out collaborator.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: RoomEvent);
}

#[async_trait]
impl<F> EventSink for F
where
    F: Fn(RoomEvent) + Send + Sync,
{
    async fn deliver(&self, event: RoomEvent) {
        self(event);
    }
}

/// Forwards every matching event to `sink` on a background task.
///
/// A sink filtered to one room stops after delivering that room's
/// `RoomClosed` event. Any sink stops when the broadcaster is dropped.
/// Lagging is logged and skipped.
pub fn spawn_sink(
    broadcaster: &EventBroadcaster,
    filter: SubscriberFilter,
    sink: Arc<dyn EventSink>,
) -> JoinHandle<()> {
    let mut subscription = broadcaster.subscribe_filtered(filter);
    tokio::spawn(async move {
        loop {
            match subscription.recv().await {
                Ok(event) => {
                    let room_closed = subscription.filter().room_id.is_some()
                        && matches!(event.payload, EventPayload::RoomClosed { .. });
                    sink.deliver(event).await;
                    if room_closed {
                        debug!(room_id = ?subscription.filter().room_id, "Room closed, stopping sink");
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(
                        missed,
                        room_id = ?subscription.filter().room_id,
                        "Event sink lagged, events dropped"
                    );
                }
                Err(RecvError::Closed) => {
                    debug!("Event broadcaster closed, stopping sink");
                    break;
                }
            }
        }
    })
}
