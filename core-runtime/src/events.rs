//! # Relay Event Bus
//!
//! Provides an event-driven view of channel activity using `tokio::sync::broadcast`.
//! Producers and consumers never talk to the bus directly; the surface registry
//! and the deferred clients publish lifecycle and data-path events so a host can
//! observe what happens on every channel without touching the hot path.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: [`RelayEvent`], tagged with the channel name
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐   emit    ┌───────────┐
//! │ SurfaceRegistry ├──────────>│           │   subscribe   ┌────────────┐
//! └─────────────────┘           │ EventBus  ├──────────────>│ Subscriber │
//! ┌─────────────────┐   emit    │ (broadcast│               └────────────┘
//! │ DeferredClient  ├──────────>│  channel) │
//! └─────────────────┘           └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, RelayEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(RelayEvent::SurfaceCreated {
//!         channel: "default".to_string(),
//!     })
//!     .ok();
//!
//! let event = subscriber.try_recv().unwrap();
//! assert_eq!(event.channel(), "default");
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   Non-fatal; the subscriber keeps receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped.
//!
//! Publishing never blocks. With no subscriber attached, `emit` returns an
//! error that publishers ignore.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Relay Event Types
// ============================================================================

/// Why pending buffers were discarded instead of being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// A newer buffer replaced an unconsumed one.
    Replaced,
    /// Data queued under the old caps is invalid under the new ones.
    CapsChanged,
    /// The pre-roll queue hit its depth limit.
    QueueOverflow,
    /// A delta unit arrived with no sync point to anchor it.
    AwaitingKeyframe,
    /// The client was flushing.
    Flushing,
    /// The client was reset.
    Reset,
}

/// Events published by the relay, tagged with the channel they concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RelayEvent {
    /// First holder attached to a channel name.
    SurfaceCreated {
        /// The channel name.
        channel: String,
    },
    /// Last holder released a channel.
    SurfaceDestroyed {
        /// The channel name.
        channel: String,
    },
    /// The producer published new caps.
    CapsChanged {
        /// The channel name.
        channel: String,
        /// Human-readable form of the new caps.
        caps: String,
        /// Number of stream headers queued for (re)sending.
        headers_queued: usize,
    },
    /// Pending buffers were discarded.
    BuffersDropped {
        /// The channel name.
        channel: String,
        /// Number of buffers discarded.
        count: u64,
        /// Why they were discarded.
        reason: DropReason,
    },
    /// The deferred client was reset.
    ClientReset {
        /// The channel name.
        channel: String,
    },
    /// The deferred client entered or left the flushing state.
    FlushingChanged {
        /// The channel name.
        channel: String,
        /// New flushing state.
        flushing: bool,
    },
}

impl RelayEvent {
    /// Returns the channel this event concerns.
    pub fn channel(&self) -> &str {
        match self {
            RelayEvent::SurfaceCreated { channel }
            | RelayEvent::SurfaceDestroyed { channel }
            | RelayEvent::CapsChanged { channel, .. }
            | RelayEvent::BuffersDropped { channel, .. }
            | RelayEvent::ClientReset { channel }
            | RelayEvent::FlushingChanged { channel, .. } => channel,
        }
    }

    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            RelayEvent::SurfaceCreated { .. } => "Channel surface created",
            RelayEvent::SurfaceDestroyed { .. } => "Channel surface destroyed",
            RelayEvent::CapsChanged { .. } => "Caps changed",
            RelayEvent::BuffersDropped { .. } => "Buffers dropped",
            RelayEvent::ClientReset { .. } => "Client reset",
            RelayEvent::FlushingChanged { .. } => "Flushing state changed",
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            RelayEvent::BuffersDropped {
                reason: DropReason::QueueOverflow,
                ..
            } => EventSeverity::Warning,
            RelayEvent::SurfaceCreated { .. }
            | RelayEvent::SurfaceDestroyed { .. }
            | RelayEvent::CapsChanged { .. } => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for relay events.
///
/// Cloning the bus is cheap; all clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// When a subscriber falls behind by more than `capacity` events it
    /// receives `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: RelayEvent) -> Result<usize, SendError<RelayEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<RelayEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&RelayEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with filtering.
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let camera_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| event.channel() == "camera");
/// ```
pub struct EventStream {
    receiver: Receiver<RelayEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<RelayEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events that match `predicate` will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RelayEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<RelayEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching event is currently available.
    pub fn try_recv(&mut self) -> Option<Result<RelayEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
