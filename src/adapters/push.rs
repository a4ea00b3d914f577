//! Local fan-out for push-delivered job updates.
//!
//! The socket transport (STOMP over websocket in production) is owned by the
//! host; it hands each frame body to [`PushHub::deliver_frame`]. Consumers
//! subscribe and receive updates on their own channel until they drop the
//! returned [`Subscription`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::domain::JobUpdate;

/// Errors raised while decoding push frames
#[derive(Debug, Error)]
pub enum PushError {
    #[error("Malformed job update: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A source of job updates that can be subscribed to
pub trait PushChannel: Send + Sync {
    /// Register a new subscriber
    fn subscribe(&self) -> Subscription;
}

#[derive(Debug, Default)]
struct Subscribers {
    next_id: u64,
    senders: HashMap<u64, UnboundedSender<JobUpdate>>,
}

type Shared = Arc<Mutex<Subscribers>>;

fn lock(shared: &Mutex<Subscribers>) -> MutexGuard<'_, Subscribers> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Explicitly constructed observer list for a single push subject
#[derive(Debug, Clone, Default)]
pub struct PushHub {
    subscribers: Shared,
}

impl PushHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fan an update out to every live subscriber; returns how many received it
    pub fn deliver(&self, update: JobUpdate) -> usize {
        let mut subscribers = lock(&self.subscribers);

        // Receivers that went away without unsubscribing are pruned here
        subscribers
            .senders
            .retain(|_, sender| sender.send(update.clone()).is_ok());

        subscribers.senders.len()
    }

    /// Decode a raw frame body and deliver it.
    ///
    /// Malformed frames are rejected without reaching any subscriber.
    pub fn deliver_frame(&self, body: &str) -> Result<usize, PushError> {
        let update: JobUpdate = serde_json::from_str(body).map_err(|e| {
            warn!(error = %e, "Dropping malformed job update");
            PushError::from(e)
        })?;

        debug!(job_id = %update.job_id, status = %update.status, "Job update received");
        Ok(self.deliver(update))
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).senders.len()
    }

    /// Drop every subscriber; their receivers drain and then end
    pub fn close(&self) {
        lock(&self.subscribers).senders.clear();
    }
}

impl PushChannel for PushHub {
    fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut subscribers = lock(&self.subscribers);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.senders.insert(id, sender);

        Subscription {
            id,
            receiver,
            hub: Arc::downgrade(&self.subscribers),
        }
    }
}

/// Handle returned from [`PushChannel::subscribe`]; unsubscribes on drop
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: UnboundedReceiver<JobUpdate>,
    hub: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next update; `None` once the channel is closed
    pub async fn recv(&mut self) -> Option<JobUpdate> {
        self.receiver.recv().await
    }

    /// Next already-delivered update, if any
    pub fn try_recv(&mut self) -> Option<JobUpdate> {
        self.receiver.try_recv().ok()
    }

    /// Stop receiving updates
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            lock(&hub).senders.remove(&self.id);
        }
    }
}
