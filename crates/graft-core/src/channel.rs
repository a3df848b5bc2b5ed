//! Remote service channels.
//!
//! A [`ServiceChannel`] is the transferable handle to a remote service
//! endpoint. Holders can test liveness, register death watchers, and detach
//! them again. [`StubChannel`] wraps a channel with the identity of the real
//! component it was issued for, so receivers of a stub-mediated connection
//! can recover the target component.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::package::ComponentName;

/// Identifies one registered death watch on a [`ServiceChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(Uuid);

type DeathWatcher = Box<dyn FnOnce() + Send>;

struct ChannelInner {
    id: Uuid,
    alive: AtomicBool,
    watchers: Mutex<Vec<(WatchId, DeathWatcher)>>,
}

/// A handle to a remote service endpoint.
///
/// Clones share liveness state and the watcher table. Death watchers fire
/// exactly once, when the channel dies.
#[derive(Clone)]
pub struct ServiceChannel {
    inner: Arc<ChannelInner>,
}

impl ServiceChannel {
    /// Create a live channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                id: Uuid::new_v4(),
                alive: AtomicBool::new(true),
                watchers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Whether the remote endpoint is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Register a watcher invoked once when this channel dies.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ChannelDead`] if the channel is already dead;
    /// the watcher is not invoked in that case.
    pub fn link_to_death(&self, watcher: impl FnOnce() + Send + 'static) -> CoreResult<WatchId> {
        let mut watchers = self
            .inner
            .watchers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // checked under the watcher lock so kill() cannot race past us
        if !self.is_alive() {
            return Err(CoreError::ChannelDead);
        }
        let id = WatchId(Uuid::new_v4());
        watchers.push((id, Box::new(watcher)));
        Ok(id)
    }

    /// Detach a previously registered watcher.
    ///
    /// Returns `true` if the watcher was present and removed.
    pub fn unlink(&self, id: WatchId) -> bool {
        let mut watchers = self
            .inner
            .watchers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = watchers.len();
        watchers.retain(|(watch, _)| *watch != id);
        watchers.len() != before
    }

    /// Mark the channel dead and fire all watchers.
    ///
    /// Subsequent calls are no-ops. Watchers run on the calling thread, in
    /// registration order, after the watcher table has been cleared.
    pub fn kill(&self) {
        if self
            .inner
            .alive
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let drained: Vec<(WatchId, DeathWatcher)> = {
            let mut watchers = self
                .inner
                .watchers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::take(&mut *watchers)
        };
        debug!(channel = %self.inner.id, watchers = drained.len(), "Service channel died");
        for (_, watcher) in drained {
            watcher();
        }
    }

    /// Whether two handles refer to the same channel.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for ServiceChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceChannel")
            .field("id", &self.inner.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// A service channel wrapped with the identity of the component it serves.
///
/// Stub-mediated bind connections hand these across process boundaries so
/// the receiving side can recover both the real target component and the
/// underlying channel.
#[derive(Debug, Clone)]
pub struct StubChannel {
    component: ComponentName,
    channel: ServiceChannel,
}

impl StubChannel {
    /// Wrap `channel` with the target component identity.
    #[must_use]
    pub fn new(component: ComponentName, channel: ServiceChannel) -> Self {
        Self { component, channel }
    }

    /// The real component this channel serves.
    #[must_use]
    pub fn component(&self) -> &ComponentName {
        &self.component
    }

    /// The underlying channel.
    #[must_use]
    pub fn channel(&self) -> &ServiceChannel {
        &self.channel
    }

    /// Split into component identity and channel.
    #[must_use]
    pub fn into_parts(self) -> (ComponentName, ServiceChannel) {
        (self.component, self.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn watcher_fires_once_on_kill() {
        let channel = ServiceChannel::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        channel
            .link_to_death(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(channel.is_alive());
        channel.kill();
        channel.kill();
        assert!(!channel.is_alive());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unlink_prevents_notification() {
        let channel = ServiceChannel::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let id = channel
            .link_to_death(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(channel.unlink(id));
        assert!(!channel.unlink(id));
        channel.kill();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn link_after_death_fails() {
        let channel = ServiceChannel::new();
        channel.kill();
        let err = channel.link_to_death(|| {}).unwrap_err();
        assert!(matches!(err, CoreError::ChannelDead));
    }

    #[test]
    fn clones_share_liveness() {
        let channel = ServiceChannel::new();
        let clone = channel.clone();
        assert!(channel.ptr_eq(&clone));
        clone.kill();
        assert!(!channel.is_alive());
        assert!(!channel.ptr_eq(&ServiceChannel::new()));
    }

    #[test]
    fn stub_channel_exposes_target() {
        let component = ComponentName::unflatten("com.example.notes/SyncService").unwrap();
        let stub = StubChannel::new(component.clone(), ServiceChannel::new());
        assert_eq!(stub.component(), &component);
        assert!(stub.channel().is_alive());
        let (comp, chan) = stub.into_parts();
        assert_eq!(comp, component);
        assert!(chan.is_alive());
    }
}
