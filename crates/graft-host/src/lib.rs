//! Graft Host - the in-process plugin hosting runtime.
//!
//! A hosting process attaches one [`PluginHost`] and hands it the seams it
//! runs against: a [`Resolution`] into the coordinator, the platform's
//! [`ComponentDispatcher`] and optional [`ServiceLookup`], a [`CodeSource`]
//! for plugin bundles and the host's own exports. The host then:
//! - Loads plugins on demand and drives their lifecycle callbacks on a
//!   dedicated thread
//! - Rewrites plugin intents to stub form and intercepts the dispatch
//!   entry points platform plumbing cannot handle for plugins
//! - Shadows service connections so channel death reaches callers for the
//!   component they actually bound
//! - Exposes host invoker services to plugin code
//!
//! Plugin code sees none of this machinery directly; it implements the
//! component traits and talks back through its [`AppContext`].

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod attach;
pub mod component;
pub mod connection;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod invoker;
pub mod lifecycle;
pub mod loader;
pub mod registry;
pub mod resolution;
pub mod resources;
pub mod running;

pub use attach::AttachConfig;
pub use component::{
    Activity, ActivityCell, Application, ApplicationCell, DefaultApplication, Provider,
    ProviderCell, Receiver, ReceiverCell, Service, ServiceCell,
};
pub use connection::{ConnectionShadow, ConnectionTable, ServiceConnection};
pub use context::{AppContext, HostIdentity, IdentityScope, PluginContext};
pub use dispatch::{
    BindFlags, ComponentDispatcher, DispatchCall, DispatcherSlot, IntentSender,
    IntentSenderRequest, LookupSlot, SenderKind, ServiceLookup,
};
pub use error::{HostError, HostResult};
pub use invoker::{
    HostInvoker, InvokeCallback, InvokeCode, InvokeContext, InvokeOutcome, InvokerFactories,
    InvokerRegistry,
};
pub use lifecycle::LifecycleExecutor;
pub use loader::{
    BundleExports, BundleLoader, CodeSource, ComponentExport, ComponentLoader, StaticCodeSource,
    StaticLoader,
};
pub use registry::{HostDump, PluginDump, PluginHost, PluginRuntime, PluginState};
pub use resolution::{LocalCoordinator, Resolution};
pub use resources::ResourceTable;
pub use running::{ApplicationRecord, ComponentRecord, RunningTable};
