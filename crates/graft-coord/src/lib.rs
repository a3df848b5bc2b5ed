//! Graft Coordinator - the shared resolution service and its client.
//!
//! One coordinator process owns the authoritative plugin state; any number
//! of hosting processes talk to it over a Unix domain socket. This crate
//! provides:
//! - The install index, stub pool and running-plugin registry
//! - [`CoordService`], the transport-free facade the server dispatches to
//! - The length-prefixed JSON wire protocol and the tokio socket server
//! - [`CoordClient`], the supervised synchronous client hosting processes
//!   embed, with its core-loss policy

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod client;
pub mod error;
pub mod index;
pub mod proto;
pub mod running;
pub mod server;
pub mod service;
pub mod stubs;

mod transport;

pub use client::{ClientIdentity, ClientState, CoordClient, CoreLossPolicy, ExitPolicy};
pub use error::{CoordError, CoordResult};
pub use index::InstallIndex;
pub use proto::{CoordRequest, CoordResponse, Envelope, LifecycleEvent, MAX_FRAME_LEN};
pub use running::{RunningComponent, RunningRegistry};
pub use server::{ServerHandle, coordinator_socket_path, spawn_server};
pub use service::CoordService;
pub use stubs::{DEFAULT_PROCESS_COUNT, DEFAULT_SLOTS_PER_KIND, StubPool};
