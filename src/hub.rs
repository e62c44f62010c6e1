//! Broadcast hub fanning MIDI input out to WebSocket subscribers
//!
//! Every subscriber owns a bounded queue of serialized frames. Publishing never waits:
//! a full queue drops that frame for that subscriber only, a closed queue removes the
//! subscriber before the next publish.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::midi::MidiMessage;

/// Frames queued per subscriber before new ones are dropped for it
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one streaming connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sending side of a subscriber's frame queue
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<String>,
}

impl Subscriber {
    /// Create a subscriber with a fresh id and the receiving half of its queue
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = SubscriberId(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed));
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

/// Frame sent for every MIDI input event
#[derive(Debug, Serialize)]
pub struct MidiEnvelope<'a> {
    /// Name of the input port the event came from
    pub device: &'a str,
    /// JSON encoding of the event
    pub data: String,
}

/// Outcome of one publish sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that got the frame queued
    pub delivered: usize,
    /// Subscribers whose queue was full; they missed this frame
    pub lagged: usize,
    /// Subscribers found closed and unregistered
    pub removed: usize,
}

/// Set of live subscribers
pub struct BroadcastHub {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<String>>>,
    capacity: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl BroadcastHub {
    /// Create a hub whose [`subscribe`](Self::subscribe) queues hold `capacity` frames
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Create and register a subscriber in one go
    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<String>) {
        let (subscriber, rx) = Subscriber::channel(self.capacity);
        let id = subscriber.id();
        self.register(subscriber);
        (id, rx)
    }

    /// Add a subscriber; returns false if it was already registered
    pub fn register(&self, subscriber: Subscriber) -> bool {
        let mut subscribers = self.subscribers.lock();
        if subscribers.contains_key(&subscriber.id) {
            return false;
        }
        subscribers.insert(subscriber.id, subscriber.tx);
        debug!(
            "Subscriber {} registered ({} total)",
            subscriber.id,
            subscribers.len()
        );
        true
    }

    /// Remove a subscriber; returns false if it was not registered
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let removed = subscribers.remove(&id).is_some();
        if removed {
            debug!("Subscriber {} unregistered ({} left)", id, subscribers.len());
        }
        removed
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    /// Queue `{device, data}` for every subscriber
    pub fn publish(&self, message: &MidiMessage, origin: &str) -> PublishReport {
        let mut subscribers = self.subscribers.lock();
        let mut report = PublishReport::default();

        if subscribers.is_empty() {
            return report;
        }

        let envelope = MidiEnvelope {
            device: origin,
            data: message.to_json(),
        };
        let frame = match serde_json::to_string(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Failed to serialize MIDI envelope: {}", e);
                return report;
            }
        };

        let mut closed = Vec::new();
        for (id, tx) in subscribers.iter() {
            match tx.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    trace!("Subscriber {} lagging, frame dropped", id);
                    report.lagged += 1;
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            subscribers.remove(&id);
            debug!("Subscriber {} disconnected, removed", id);
            report.removed += 1;
        }

        trace!(
            "Broadcast from '{}': {} delivered, {} lagged, {} removed",
            origin,
            report.delivered,
            report.lagged,
            report.removed
        );
        report
    }
}
