//! Service connection shadows.
//!
//! A caller binding to a plugin service supplies a [`ServiceConnection`].
//! The runtime pairs it with a [`ConnectionShadow`], the object the
//! platform actually talks to: the shadow tracks which channel currently
//! serves each component, collapses duplicate deliveries, swaps replaced
//! channels and forwards channel death as a disconnect callback. One shadow
//! exists per live connection, held weakly in the [`ConnectionTable`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use graft_core::{ComponentName, ServiceChannel, StubChannel, WatchId};
use tracing::debug;

use crate::running::RunningTable;

/// Callbacks a service binding delivers to its caller.
pub trait ServiceConnection: Send + Sync {
    /// A channel to `component` is established.
    fn on_connected(&self, component: &ComponentName, channel: ServiceChannel);

    /// The channel to `component` died.
    fn on_disconnected(&self, component: &ComponentName);
}

struct ChannelWatch {
    channel: ServiceChannel,
    watch_id: WatchId,
}

/// The platform-facing side of one service connection.
///
/// The channel map's lock is never held across channel calls or caller
/// callbacks; death watches re-enter the shadow from the channel's side.
pub struct ConnectionShadow {
    caller: Weak<dyn ServiceConnection>,
    channels: Mutex<HashMap<ComponentName, ChannelWatch>>,
}

impl ConnectionShadow {
    /// A shadow forwarding to `caller`.
    #[must_use]
    pub fn new(caller: Weak<dyn ServiceConnection>) -> Self {
        Self {
            caller,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Delivers a connected service channel.
    ///
    /// Dead channels are ignored. Re-delivery of the channel already held
    /// for the component is a no-op; a different channel replaces the held
    /// one, unlinking its death watch and notifying the caller of the
    /// disconnect first.
    pub fn handle_connected(self: &Arc<Self>, stub: StubChannel) {
        let Some(caller) = self.caller.upgrade() else {
            debug!("Dropping connect for a connection that is gone");
            return;
        };
        let (component, channel) = stub.into_parts();
        if !channel.is_alive() {
            debug!(component = %component, "Ignoring connect from a dead channel");
            return;
        }

        let displaced = {
            let mut channels = self.lock_channels();
            match channels.get(&component) {
                Some(held) if held.channel.ptr_eq(&channel) => return,
                _ => channels.remove(&component),
            }
        };
        if let Some(old) = displaced {
            old.channel.unlink(old.watch_id);
            debug!(component = %component, "Replacing service channel");
            caller.on_disconnected(&component);
        }

        let watch_id = {
            let shadow = Arc::downgrade(self);
            let dead_component = component.clone();
            let dead_channel = channel.clone();
            channel.link_to_death(move || {
                if let Some(shadow) = shadow.upgrade() {
                    shadow.channel_died(&dead_component, &dead_channel);
                }
            })
        };
        let Ok(watch_id) = watch_id else {
            debug!(component = %component, "Channel died before its death watch was linked");
            return;
        };

        {
            let mut channels = self.lock_channels();
            channels.insert(
                component.clone(),
                ChannelWatch {
                    channel: channel.clone(),
                    watch_id,
                },
            );
        }
        caller.on_connected(&component, channel.clone());

        // The watch may have fired while the entry was unpublished; deliver
        // the disconnect the watcher could not.
        if !channel.is_alive() {
            self.channel_died(&component, &channel);
        }
    }

    /// Unlinks every death watch and clears the channel map. No disconnect
    /// callbacks are delivered; the caller asked for the teardown.
    pub fn unbind(&self) {
        let drained: Vec<(ComponentName, ChannelWatch)> = {
            let mut channels = self.lock_channels();
            channels.drain().collect()
        };
        if drained.is_empty() {
            return;
        }
        for (_, watch) in &drained {
            watch.channel.unlink(watch.watch_id);
        }
        debug!(channels = drained.len(), "Unbound service connection");
    }

    /// Components with a live channel, unordered.
    #[must_use]
    pub fn connected_components(&self) -> Vec<ComponentName> {
        self.lock_channels().keys().cloned().collect()
    }

    /// Whether no channel is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_channels().is_empty()
    }

    fn channel_died(&self, component: &ComponentName, channel: &ServiceChannel) {
        let removed = {
            let mut channels = self.lock_channels();
            match channels.get(component) {
                Some(held) if held.channel.ptr_eq(channel) => channels.remove(component),
                _ => None,
            }
        };
        if removed.is_some()
            && let Some(caller) = self.caller.upgrade()
        {
            debug!(component = %component, "Service channel died");
            caller.on_disconnected(component);
        }
    }

    fn lock_channels(&self) -> MutexGuard<'_, HashMap<ComponentName, ChannelWatch>> {
        self.channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for ConnectionShadow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionShadow")
            .field("channels", &self.lock_channels().len())
            .field("caller_alive", &(self.caller.strong_count() > 0))
            .finish()
    }
}

/// Weak-keyed table pairing caller connections with their shadows.
///
/// Keys are connection allocations; entries for dropped connections are
/// swept opportunistically, so an unbound-and-forgotten connection does not
/// pin its shadow.
#[derive(Default)]
pub struct ConnectionTable {
    shadows: RunningTable<dyn ServiceConnection, Arc<ConnectionShadow>>,
}

impl ConnectionTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shadow for `connection`, created on first use.
    #[must_use]
    pub fn fetch(&self, connection: &Arc<dyn ServiceConnection>) -> Arc<ConnectionShadow> {
        if let Some(shadow) = self.shadows.lookup(connection) {
            return shadow;
        }
        let shadow = Arc::new(ConnectionShadow::new(Arc::downgrade(connection)));
        match self.shadows.register(connection, Arc::clone(&shadow)) {
            Ok(()) => shadow,
            // Lost a racing first bind; use the registered shadow.
            Err(_) => self.shadows.lookup(connection).unwrap_or(shadow),
        }
    }

    /// The shadow for `connection`, if one exists.
    #[must_use]
    pub fn get(&self, connection: &Arc<dyn ServiceConnection>) -> Option<Arc<ConnectionShadow>> {
        self.shadows.lookup(connection)
    }

    /// Removes and returns the shadow for `connection`.
    pub fn remove(&self, connection: &Arc<dyn ServiceConnection>) -> Option<Arc<ConnectionShadow>> {
        self.shadows.remove(connection)
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shadows.len()
    }

    /// Whether no connection is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shadows.is_empty()
    }
}

impl fmt::Debug for ConnectionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTable")
            .field("connections", &self.len())
            .finish()
    }
}
