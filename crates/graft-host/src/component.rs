//! Plugin component traits.
//!
//! Plugins implement these traits and export constructors for them through
//! their [`BundleExports`](crate::loader::BundleExports) table; the host
//! instantiates them by tag. Live instances are shared as `Arc<Mutex<dyn
//! Trait>>` cells so lifecycle tables can key them by allocation identity
//! without owning them.

use graft_core::{Intent, ServiceChannel};
use std::sync::{Arc, Mutex};

use crate::context::AppContext;

/// A plugin's application object.
///
/// One instance exists per plugin per hosting process, created on the
/// lifecycle thread during load. `on_attach` runs before any component of
/// the plugin, `on_create` after the plugin's providers are registered.
pub trait Application: Send {
    /// The application is attached to its hosting process.
    fn on_attach(&mut self, ctx: AppContext);

    /// All load-time registration is done; the plugin may start work.
    fn on_create(&mut self) {}
}

/// A user-facing component with a visible lifecycle.
pub trait Activity: Send {
    /// The activity is being created for `intent`.
    fn on_create(&mut self, intent: &Intent);

    /// The activity is going away.
    fn on_destroy(&mut self) {}
}

/// A long-running background component.
pub trait Service: Send {
    /// The service instance was just created.
    fn on_create(&mut self) {}

    /// A start command arrived. `intent` is the caller's original intent.
    fn on_start_command(&mut self, _intent: &Intent) {}

    /// A caller wants to bind. Returning `None` refuses the binding.
    fn on_bind(&mut self, _intent: &Intent) -> Option<ServiceChannel> {
        None
    }

    /// The service is going away.
    fn on_destroy(&mut self) {}
}

/// A data provider. Providers are created when their process loads the
/// plugin and live until the process exits.
pub trait Provider: Send {
    /// The provider was instantiated and registered.
    fn on_create(&mut self) {}
}

/// A broadcast receiver with manifest-declared action filters.
pub trait Receiver: Send + Sync {
    /// A broadcast matching one of the receiver's actions arrived.
    fn on_receive(&self, intent: &Intent);
}

/// Shared handle to a live application instance.
pub type ApplicationCell = Arc<Mutex<dyn Application>>;
/// Shared handle to a live activity instance.
pub type ActivityCell = Arc<Mutex<dyn Activity>>;
/// Shared handle to a live service instance.
pub type ServiceCell = Arc<Mutex<dyn Service>>;
/// Shared handle to a live provider instance.
pub type ProviderCell = Arc<Mutex<dyn Provider>>;
/// Shared handle to a live receiver instance.
pub type ReceiverCell = Arc<dyn Receiver>;

/// Wrap an application in its shared cell.
pub fn application_cell(application: impl Application + 'static) -> ApplicationCell {
    Arc::new(Mutex::new(application))
}

/// Wrap an activity in its shared cell.
pub fn activity_cell(activity: impl Activity + 'static) -> ActivityCell {
    Arc::new(Mutex::new(activity))
}

/// Wrap a service in its shared cell.
pub fn service_cell(service: impl Service + 'static) -> ServiceCell {
    Arc::new(Mutex::new(service))
}

/// Wrap a provider in its shared cell.
pub fn provider_cell(provider: impl Provider + 'static) -> ProviderCell {
    Arc::new(Mutex::new(provider))
}

/// Wrap a receiver in its shared cell.
pub fn receiver_cell(receiver: impl Receiver + 'static) -> ReceiverCell {
    Arc::new(receiver)
}

/// The application used when a package declares no entry tag.
#[derive(Debug, Default)]
pub struct DefaultApplication;

impl Application for DefaultApplication {
    fn on_attach(&mut self, _ctx: AppContext) {}
}
