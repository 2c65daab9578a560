//! Channel Actor
//!
//! Each active channel id is served by one actor task that owns the channel's
//! listener table. Registration, unregistration and broadcasts are all
//! messages on the actor's mailbox, so they are applied strictly in arrival
//! order and no lock ever guards the listener table.
//!
//! # Backpressure
//!
//! A listener is a capacity-1 queue drained by its connection's writer task.
//! Broadcasts use `try_send`: when a listener's queue is still full the frame
//! is dropped for that listener only. A stalled reader never holds up the
//! other listeners or the mailbox.
//!
//! Broadcasts waiting in the mailbox are capped at
//! [`BROADCAST_QUEUE_CAPACITY`]; past that, new ones are refused with
//! [`SimError::ChannelBusy`]. Control messages are never refused, and
//! everything still goes through the one FIFO mailbox.
//!
//! # Example
//!
//! ```rust,ignore
//! use spectrum_sim::channel::{listener_sink, ChannelHandle, SubscriptionKey};
//!
//! let (handle, task) = ChannelHandle::spawn(37, errors);
//! let (sink, mut frames) = listener_sink();
//!
//! handle.register(SubscriptionKey::for_connection(1), sink)?;
//! handle.broadcast(b"foo".to_vec(), SystemTime::now())?;
//! let frame = frames.recv().await;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use spectrum_protocol::Response;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::SimError;
use crate::events::ErrorSink;

/// Queue depth of a listener sink
pub const LISTENER_QUEUE_CAPACITY: usize = 1;

/// Broadcasts a channel will queue before refusing more
pub const BROADCAST_QUEUE_CAPACITY: usize = 64;

/// Sending half of a listener's frame queue
pub type ListenerSink = mpsc::Sender<Bytes>;

/// Receiving half of a listener's frame queue, drained by a writer task
pub type ListenerStream = mpsc::Receiver<Bytes>;

/// Create a listener queue with [`LISTENER_QUEUE_CAPACITY`]
pub fn listener_sink() -> (ListenerSink, ListenerStream) {
    mpsc::channel(LISTENER_QUEUE_CAPACITY)
}

/// Identity under which a connection registers with a channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    /// Key for the connection with the given id
    pub fn for_connection(connection_id: u64) -> Self {
        Self(format!("conn-{}", connection_id))
    }

    /// The key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Messages processed by a channel actor
#[derive(Debug)]
pub enum ChannelCommand {
    /// Add or replace a listener
    Register {
        /// Listener identity
        key: SubscriptionKey,
        /// Where encoded responses go
        sink: ListenerSink,
    },

    /// Remove a listener (no-op if absent)
    Unregister {
        /// Listener identity
        key: SubscriptionKey,
    },

    /// Deliver a payload to every current listener
    Broadcast {
        /// Payload as sent by the client
        data: Vec<u8>,
        /// Receive time stamped into the response
        timestamp: SystemTime,
        /// Queue slot, freed once the broadcast is applied
        permit: OwnedSemaphorePermit,
    },

    /// Report the number of registered listeners
    ListenerCount {
        /// Channel to send back the count
        response: oneshot::Sender<usize>,
    },

    /// Stop the actor
    Stop,
}

/// Handle for posting to a channel actor's mailbox
///
/// Posting never blocks: the mailbox is unbounded so that the registry can
/// post while holding its lock. Only broadcasts are limited.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: u32,
    tx: mpsc::UnboundedSender<ChannelCommand>,
    broadcast_slots: Arc<Semaphore>,
}

impl ChannelHandle {
    /// Spawn an actor for channel `id` on the current runtime
    pub fn spawn(id: u32, errors: ErrorSink) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_channel_actor(id, rx, errors));
        let handle = Self {
            id,
            tx,
            broadcast_slots: Arc::new(Semaphore::new(BROADCAST_QUEUE_CAPACITY)),
        };
        (handle, task)
    }

    /// Channel id served by the actor
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether the actor has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Post a raw command
    pub fn post(&self, cmd: ChannelCommand) -> Result<(), SimError> {
        self.tx
            .send(cmd)
            .map_err(|_| SimError::MailboxClosed(self.id))
    }

    /// Register a listener sink under `key`
    pub fn register(&self, key: SubscriptionKey, sink: ListenerSink) -> Result<(), SimError> {
        self.post(ChannelCommand::Register { key, sink })
    }

    /// Unregister the listener under `key`
    pub fn unregister(&self, key: SubscriptionKey) -> Result<(), SimError> {
        self.post(ChannelCommand::Unregister { key })
    }

    /// Broadcast a payload stamped with `timestamp`
    ///
    /// Fails with [`SimError::ChannelBusy`] when [`BROADCAST_QUEUE_CAPACITY`]
    /// broadcasts are already waiting.
    pub fn broadcast(&self, data: Vec<u8>, timestamp: SystemTime) -> Result<(), SimError> {
        let permit = Arc::clone(&self.broadcast_slots)
            .try_acquire_owned()
            .map_err(|_| SimError::ChannelBusy(self.id))?;
        self.post(ChannelCommand::Broadcast {
            data,
            timestamp,
            permit,
        })
    }

    /// Ask the actor how many listeners it has
    ///
    /// Returns `None` if the actor stopped before answering.
    pub async fn listener_count(&self) -> Option<usize> {
        let (response, rx) = oneshot::channel();
        self.post(ChannelCommand::ListenerCount { response }).ok()?;
        rx.await.ok()
    }

    /// Ask the actor to stop
    pub fn stop(&self) -> Result<(), SimError> {
        self.post(ChannelCommand::Stop)
    }
}

/// Run a channel actor until it is stopped or every handle is dropped
pub async fn run_channel_actor(
    id: u32,
    mut rx: mpsc::UnboundedReceiver<ChannelCommand>,
    errors: ErrorSink,
) {
    let mut listeners: HashMap<SubscriptionKey, ListenerSink> = HashMap::new();

    info!(channel = id, "Channel started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            ChannelCommand::Register { key, sink } => {
                debug!(channel = id, key = %key, "Listener registered");
                listeners.insert(key, sink);
            }
            ChannelCommand::Unregister { key } => {
                if listeners.remove(&key).is_some() {
                    debug!(channel = id, key = %key, "Listener unregistered");
                }
            }
            ChannelCommand::Broadcast {
                data,
                timestamp,
                permit: _permit,
            } => {
                let frame = match Response::new(id, timestamp, data).encode() {
                    Ok(bytes) => Bytes::from(bytes),
                    Err(e) => {
                        errors.report(format!("channel {}", id), e);
                        continue;
                    }
                };
                fan_out(id, &listeners, &frame);
            }
            ChannelCommand::ListenerCount { response } => {
                let _ = response.send(listeners.len());
            }
            ChannelCommand::Stop => break,
        }
    }

    info!(channel = id, "Channel quit");
}

/// Push one encoded frame to every listener without waiting on any of them
fn fan_out(id: u32, listeners: &HashMap<SubscriptionKey, ListenerSink>, frame: &Bytes) {
    for (key, sink) in listeners {
        match sink.try_send(frame.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(channel = id, key = %key, "Listener queue full, frame dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(channel = id, key = %key, "Listener queue closed, frame dropped");
            }
        }
    }
}
