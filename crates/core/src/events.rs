//! Event System
//!
//! Pub/sub bus over which the orchestrator reports lifecycle progress.

use parking_lot::RwLock;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::trace;

use crate::orchestrator::LifecycleState;

/// Events emitted during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Lifecycle state changed
    StateChanged(LifecycleState),
    /// A leftover AVD from an earlier run was removed
    StaleImageDeleted { name: String },
    /// AVD created
    ImageCreated { name: String },
    /// AVD deleted during teardown
    ImageDeleted { name: String },
    /// Emulator process spawned
    EmulatorStarted { serial: String },
    /// Android reported boot completion
    EmulatorBooted { serial: String },
    /// Test task finished
    TestTaskFinished { success: bool },
    /// Graceful shutdown failed and the emulator was killed
    EmulatorKilled { serial: String },
    /// Emulator stopped
    EmulatorStopped { serial: String },
}

/// Subscriber handle for receiving events
#[derive(Clone)]
pub struct EventSubscription {
    receiver: Receiver<Event>,
}

impl EventSubscription {
    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> Result<Event, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Every event received so far, without blocking
    pub fn drain(&self) -> Vec<Event> {
        self.receiver.try_iter().collect()
    }
}

/// Event bus for publish/subscribe pattern
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<Event>>>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> EventSubscription {
        let (sender, receiver) = unbounded();
        self.subscribers.write().push(sender);
        EventSubscription { receiver }
    }

    /// Emit an event to all subscribers, dropping ones that went away
    pub fn emit(&self, event: Event) -> usize {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());

        trace!("Event {:?} delivered to {} subscribers", event, subscribers.len());
        subscribers.len()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
