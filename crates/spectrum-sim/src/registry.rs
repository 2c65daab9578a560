//! Channel Registry
//!
//! The process-wide table of live channel actors. Actors are created lazily
//! on the first Listen for a channel id and stopped as soon as the last
//! listener leaves; a channel with no listeners costs nothing.
//!
//! Shutdown is final. Afterwards no channel can be created and releases from
//! connections still winding down are ignored. Live connections are told to
//! close through [`shutdown_signal`].
//!
//! [`shutdown_signal`]: ChannelRegistry::shutdown_signal
//!
//! The lock only protects the table itself. It is never held across an
//! `.await`, and posting to an actor's mailbox does not block, so independent
//! channels never contend beyond a map lookup.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::channel::{ChannelHandle, SubscriptionKey};
use crate::events::ErrorSink;

/// A live channel and the number of Listen registrations holding it open
struct ChannelSlot {
    handle: ChannelHandle,
    listeners: usize,
}

/// Central registry of channel actors
///
/// Invariant: a channel id has a slot if and only if its listener count is
/// above zero.
pub struct ChannelRegistry {
    channels: Mutex<HashMap<u32, ChannelSlot>>,
    errors: ErrorSink,
    /// Flipped to true, under the table lock, by [`shutdown`](Self::shutdown)
    shutdown: watch::Sender<bool>,
}

impl ChannelRegistry {
    /// Create an empty registry reporting actor errors to `errors`
    pub fn new(errors: ErrorSink) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            channels: Mutex::new(HashMap::new()),
            errors,
            shutdown,
        }
    }

    /// Look up (and maybe create) the actor for channel `id`
    ///
    /// With `may_create` false this is the Send path: an absent channel yields
    /// `None` and nothing changes. With `may_create` true this is the Listen
    /// path: the actor is created if needed and its listener count goes up by
    /// one. Every successful Listen acquisition must be paired with a
    /// [`release`](Self::release).
    ///
    /// After [`shutdown`](Self::shutdown) this always returns `None`.
    pub fn acquire(&self, id: u32, may_create: bool) -> Option<ChannelHandle> {
        let mut channels = self.channels.lock();
        if self.is_shut_down() {
            return None;
        }

        if !may_create {
            return channels.get(&id).map(|slot| slot.handle.clone());
        }

        let slot = channels.entry(id).or_insert_with(|| {
            let (handle, _task) = ChannelHandle::spawn(id, self.errors.clone());
            info!(channel = id, "Channel created");
            ChannelSlot {
                handle,
                listeners: 0,
            }
        });
        slot.listeners += 1;

        debug!(channel = id, listeners = slot.listeners, "Channel acquired");
        Some(slot.handle.clone())
    }

    /// Drop one Listen registration for channel `id`
    ///
    /// Unregisters `key` from the actor. When the last registration goes the
    /// actor is stopped and the channel forgotten.
    pub fn release(&self, id: u32, key: &SubscriptionKey) {
        let mut channels = self.channels.lock();

        let Some(slot) = channels.get_mut(&id) else {
            // Channels acquired before shutdown were already stopped
            if self.is_shut_down() {
                debug!(channel = id, key = %key, "Release after shutdown ignored");
            } else {
                warn!(channel = id, key = %key, "Release of unknown channel");
            }
            return;
        };

        if let Err(e) = slot.handle.unregister(key.clone()) {
            self.errors.report(format!("channel {}", id), e);
        }
        slot.listeners -= 1;

        if slot.listeners > 0 {
            debug!(channel = id, listeners = slot.listeners, "Channel released");
            return;
        }

        if let Some(slot) = channels.remove(&id) {
            info!(channel = id, "Channel does not have any listeners anymore");
            if let Err(e) = slot.handle.stop() {
                self.errors.report(format!("channel {}", id), e);
            }
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has run
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Receiver that turns true once the registry shuts down
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Number of live channels
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Listen registrations currently holding channel `id` open
    pub fn listener_refs(&self, id: u32) -> usize {
        self.channels
            .lock()
            .get(&id)
            .map_or(0, |slot| slot.listeners)
    }

    /// Stop every actor and refuse new channels from now on
    ///
    /// Live connections watching [`shutdown_signal`](Self::shutdown_signal)
    /// tear themselves down.
    pub fn shutdown(&self) {
        let mut channels = self.channels.lock();
        self.shutdown.send_replace(true);
        for (id, slot) in channels.drain() {
            debug!(channel = id, "Stopping channel on shutdown");
            let _ = slot.handle.stop();
        }
    }
}
