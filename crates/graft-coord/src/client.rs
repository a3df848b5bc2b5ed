//! The supervised coordinator client.
//!
//! Every hosting process owns one [`CoordClient`]. The client keeps a
//! single session to the coordinator socket and re-establishes it lazily:
//! when a call finds the transport dead it re-runs the handshake, retrying
//! exactly once. If both attempts fail on a client that had a live session
//! before, the coordinator is considered lost and the configured
//! [`CoreLossPolicy`] fires; a client that never managed to connect stays
//! degraded instead.
//!
//! Public operations never surface transport errors. Each degrades to its
//! sentinel value (`None`, an empty list, `false`) so callers can treat
//! "coordinator unavailable" like "nothing resolved". A sentinel therefore
//! means "unavailable", never a definitive negative.

use graft_core::{
    ComponentDescriptor, ComponentKind, ComponentName, InstalledPluginInfo, Intent,
    PackageManifest, PackageName,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{CoordError, CoordResult};
use crate::proto::{CoordRequest, CoordResponse, LifecycleEvent};
use crate::transport::Transport;

/// How long one coordinator call may take before it is abandoned.
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// What a hosting process reports about itself during the handshake.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    /// OS process id.
    pub pid: u32,
    /// Process name, after any stub process rename.
    pub process_name: String,
}

impl ClientIdentity {
    /// Identity of the calling process under `process_name`.
    #[must_use]
    pub fn current_process(process_name: impl Into<String>) -> Self {
        Self {
            pid: std::process::id(),
            process_name: process_name.into(),
        }
    }
}

/// What to do when the coordinator is lost for good.
///
/// Fires at most once per client, after a dead session fails both
/// reconnection attempts. A hosting process that keeps running without its
/// coordinator would answer every resolution with stale state, so the
/// default policy is [`ExitPolicy`].
pub trait CoreLossPolicy: Send + Sync {
    /// The coordinator connection is gone and could not be re-established.
    fn on_core_lost(&self, reason: &str);
}

/// Loss policy that terminates the process with exit code 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitPolicy;

impl CoreLossPolicy for ExitPolicy {
    fn on_core_lost(&self, reason: &str) {
        error!(reason, "Coordinator lost, terminating process");
        std::process::exit(1);
    }
}

/// Connection state of a [`CoordClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No session yet; the next call will attempt the handshake.
    Disconnected,
    /// A handshake is in flight.
    Connecting,
    /// A live session exists.
    Connected,
    /// The coordinator was lost and the loss policy has fired. Terminal.
    Failed,
}

struct LiveSession {
    transport: Arc<Transport>,
    session: Uuid,
}

struct SessionSlot {
    state: ClientState,
    live: Option<LiveSession>,
}

/// A hosting process's handle to the coordinator.
///
/// Cheap to share behind an [`Arc`]; all methods take `&self`.
pub struct CoordClient {
    endpoint: PathBuf,
    identity: ClientIdentity,
    policy: Arc<dyn CoreLossPolicy>,
    timeout: Duration,
    slot: Mutex<SessionSlot>,
    ever_connected: AtomicBool,
}

impl CoordClient {
    /// A client for the coordinator at `endpoint`. Performs no I/O; the
    /// first call establishes the session.
    #[must_use]
    pub fn new(endpoint: PathBuf, identity: ClientIdentity, policy: Arc<dyn CoreLossPolicy>) -> Self {
        Self {
            endpoint,
            identity,
            policy,
            timeout: CALL_TIMEOUT,
            slot: Mutex::new(SessionSlot {
                state: ClientState::Disconnected,
                live: None,
            }),
            ever_connected: AtomicBool::new(false),
        }
    }

    /// A client with an eagerly established session.
    ///
    /// # Errors
    ///
    /// Returns an error when the handshake fails after one retry.
    pub fn connect(
        endpoint: PathBuf,
        identity: ClientIdentity,
        policy: Arc<dyn CoreLossPolicy>,
    ) -> CoordResult<Self> {
        let client = Self::new(endpoint, identity, policy);
        if client.ensure_session().is_some() {
            Ok(client)
        } else {
            Err(CoordError::Handshake {
                message: format!("coordinator at {} is unreachable", client.endpoint.display()),
            })
        }
    }

    /// Replace the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.locked_slot().state
    }

    /// Session id of the live session, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<Uuid> {
        self.locked_slot().live.as_ref().map(|live| live.session)
    }

    /// Establish the session now if none is live.
    ///
    /// Returns whether a live session exists afterwards. Useful at process
    /// attach, where a failure should log once and proceed degraded rather
    /// than error out of every later call.
    pub fn ensure_connected(&self) -> bool {
        self.ensure_session().is_some()
    }

    // ---- install index ----

    /// Install the bundle rooted at `bundle_path`.
    pub fn install(&self, bundle_path: &Path) -> Option<InstalledPluginInfo> {
        match self.request(CoordRequest::Install {
            bundle_path: bundle_path.to_path_buf(),
        })? {
            CoordResponse::Installed { info } => Some(*info),
            other => self.unexpected("installed", &other),
        }
    }

    /// Uninstall `package`. Returns whether the package was installed.
    pub fn uninstall(&self, package: &PackageName) -> bool {
        self.bool_op(CoordRequest::Uninstall {
            package: package.clone(),
        })
    }

    /// The install record of `package`, if installed.
    pub fn get_installed_plugin(&self, package: &PackageName) -> Option<InstalledPluginInfo> {
        match self.request(CoordRequest::GetInstalledPlugin {
            package: package.clone(),
        })? {
            CoordResponse::MaybePlugin { info } => info.map(|boxed| *boxed),
            other => self.unexpected("maybe_plugin", &other),
        }
    }

    /// All install records.
    pub fn get_all_installed_plugins(&self) -> Vec<InstalledPluginInfo> {
        match self.request(CoordRequest::GetAllInstalledPlugins) {
            Some(CoordResponse::Plugins { infos }) => infos,
            Some(other) => {
                self.unexpected::<()>("plugins", &other);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// The parsed manifest of `package`, if installed.
    pub fn get_package_manifest(&self, package: &PackageName) -> Option<PackageManifest> {
        match self.request(CoordRequest::GetPackageManifest {
            package: package.clone(),
        })? {
            CoordResponse::MaybeManifest { manifest } => manifest.map(|boxed| *boxed),
            other => self.unexpected("maybe_manifest", &other),
        }
    }

    // ---- resolution ----

    /// Rewrite a plugin intent of `kind` into its stub form.
    pub fn rewrite_intent(&self, kind: ComponentKind, intent: &Intent) -> Option<Intent> {
        match self.request(CoordRequest::RewriteIntent {
            kind,
            intent: intent.clone(),
        })? {
            CoordResponse::MaybeIntent { intent } => intent,
            other => self.unexpected("maybe_intent", &other),
        }
    }

    /// Rewrite an activity intent into its stub form.
    pub fn rewrite_activity_intent(&self, intent: &Intent) -> Option<Intent> {
        self.rewrite_intent(ComponentKind::Activity, intent)
    }

    /// Rewrite a service intent into its stub form.
    pub fn rewrite_service_intent(&self, intent: &Intent) -> Option<Intent> {
        self.rewrite_intent(ComponentKind::Service, intent)
    }

    /// Resolve `intent` to the best-matching component of `kind`.
    pub fn resolve_component(
        &self,
        kind: ComponentKind,
        intent: &Intent,
    ) -> Option<ComponentDescriptor> {
        match self.request(CoordRequest::ResolveComponent {
            kind,
            intent: intent.clone(),
        })? {
            CoordResponse::MaybeDescriptor { descriptor } => descriptor,
            other => self.unexpected("maybe_descriptor", &other),
        }
    }

    /// Resolve an activity intent.
    pub fn resolve_activity(&self, intent: &Intent) -> Option<ComponentDescriptor> {
        self.resolve_component(ComponentKind::Activity, intent)
    }

    /// Resolve a service intent.
    pub fn resolve_service(&self, intent: &Intent) -> Option<ComponentDescriptor> {
        self.resolve_component(ComponentKind::Service, intent)
    }

    /// Resolve a provider intent.
    pub fn resolve_provider(&self, intent: &Intent) -> Option<ComponentDescriptor> {
        self.resolve_component(ComponentKind::Provider, intent)
    }

    /// Resolve a receiver intent.
    pub fn resolve_receiver(&self, intent: &Intent) -> Option<ComponentDescriptor> {
        self.resolve_component(ComponentKind::Receiver, intent)
    }

    /// All components of `kind` matching `intent`.
    pub fn query_components(&self, kind: ComponentKind, intent: &Intent) -> Vec<ComponentDescriptor> {
        match self.request(CoordRequest::QueryComponents {
            kind,
            intent: intent.clone(),
        }) {
            Some(CoordResponse::Descriptors { descriptors }) => descriptors,
            Some(other) => {
                self.unexpected::<()>("descriptors", &other);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// All activities matching `intent`.
    pub fn query_activities(&self, intent: &Intent) -> Vec<ComponentDescriptor> {
        self.query_components(ComponentKind::Activity, intent)
    }

    /// All services matching `intent`.
    pub fn query_services(&self, intent: &Intent) -> Vec<ComponentDescriptor> {
        self.query_components(ComponentKind::Service, intent)
    }

    /// All providers matching `intent`.
    pub fn query_providers(&self, intent: &Intent) -> Vec<ComponentDescriptor> {
        self.query_components(ComponentKind::Provider, intent)
    }

    /// All receivers matching `intent`.
    pub fn query_receivers(&self, intent: &Intent) -> Vec<ComponentDescriptor> {
        self.query_components(ComponentKind::Receiver, intent)
    }

    /// The descriptor of one declared component.
    pub fn get_component_descriptor(
        &self,
        kind: ComponentKind,
        component: &ComponentName,
    ) -> Option<ComponentDescriptor> {
        match self.request(CoordRequest::GetComponentDescriptor {
            kind,
            component: component.clone(),
        })? {
            CoordResponse::MaybeDescriptor { descriptor } => descriptor,
            other => self.unexpected("maybe_descriptor", &other),
        }
    }

    // ---- stubs and processes ----

    /// The target component a stub was assigned to.
    pub fn get_stub_target(&self, stub: &ComponentName) -> Option<ComponentName> {
        match self.request(CoordRequest::GetStubTarget { stub: stub.clone() })? {
            CoordResponse::MaybeComponent { component } => component,
            other => self.unexpected("maybe_component", &other),
        }
    }

    /// The stub process for `package`'s declared process.
    pub fn select_stub_process(
        &self,
        package: &PackageName,
        declared: Option<&str>,
    ) -> Option<String> {
        match self.request(CoordRequest::SelectStubProcess {
            package: package.clone(),
            process: declared.map(str::to_string),
        })? {
            CoordResponse::MaybeString { value } => value,
            other => self.unexpected("maybe_string", &other),
        }
    }

    /// Name of the plugin process attached with `pid`, if any.
    pub fn get_plugin_process_name(&self, pid: u32) -> Option<String> {
        match self.request(CoordRequest::GetPluginProcessName { pid })? {
            CoordResponse::MaybeString { value } => value,
            other => self.unexpected("maybe_string", &other),
        }
    }

    // ---- running state ----

    /// Packages with running components or attached applications.
    pub fn get_all_running_plugins(&self) -> Vec<PackageName> {
        match self.request(CoordRequest::GetAllRunningPlugins) {
            Some(CoordResponse::Packages { packages }) => packages,
            Some(other) => {
                self.unexpected::<()>("packages", &other);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Whether `package` is currently running.
    pub fn is_plugin_running(&self, package: &PackageName) -> bool {
        self.bool_op(CoordRequest::IsPluginRunning {
            package: package.clone(),
        })
    }

    // ---- lifecycle notifications ----

    /// Report a component lifecycle transition. Degrades to a no-op when
    /// the coordinator is unavailable.
    pub fn notify_event(&self, event: LifecycleEvent) {
        match self.request(CoordRequest::ComponentEvent { event }) {
            Some(CoordResponse::Ack) | None => {}
            Some(other) => {
                self.unexpected::<()>("ack", &other);
            }
        }
    }

    /// Report that a plugin application attached in `process_name`.
    pub fn notify_application_attached(&self, package: &PackageName, process_name: &str) {
        self.notify_event(LifecycleEvent::ApplicationAttached {
            package: package.clone(),
            process_name: process_name.to_string(),
        });
    }

    /// Report an activity instance creation.
    pub fn notify_activity_created(&self, stub: &ComponentName, target: &ComponentName) {
        self.notify_event(LifecycleEvent::ActivityCreated {
            stub: stub.clone(),
            target: target.clone(),
        });
    }

    /// Report an activity instance destruction.
    pub fn notify_activity_destroyed(&self, stub: &ComponentName, target: &ComponentName) {
        self.notify_event(LifecycleEvent::ActivityDestroyed {
            stub: stub.clone(),
            target: target.clone(),
        });
    }

    /// Report a service instance creation.
    pub fn notify_service_created(&self, stub: &ComponentName, target: &ComponentName) {
        self.notify_event(LifecycleEvent::ServiceCreated {
            stub: stub.clone(),
            target: target.clone(),
        });
    }

    /// Report a service instance destruction.
    pub fn notify_service_destroyed(&self, stub: &ComponentName, target: &ComponentName) {
        self.notify_event(LifecycleEvent::ServiceDestroyed {
            stub: stub.clone(),
            target: target.clone(),
        });
    }

    /// Report a provider instance creation.
    pub fn notify_provider_created(&self, stub: &ComponentName, target: &ComponentName) {
        self.notify_event(LifecycleEvent::ProviderCreated {
            stub: stub.clone(),
            target: target.clone(),
        });
    }

    // ---- session machinery ----

    fn locked_slot(&self) -> std::sync::MutexGuard<'_, SessionSlot> {
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// A live transport, re-handshaking if the cached one is dead.
    ///
    /// The slot lock is held across the handshake, so concurrent callers
    /// ride on one attempt instead of racing their own.
    fn ensure_session(&self) -> Option<Arc<Transport>> {
        let mut slot = self.locked_slot();
        if let Some(live) = &slot.live
            && live.transport.is_alive()
        {
            return Some(Arc::clone(&live.transport));
        }
        if slot.state == ClientState::Failed {
            return None;
        }

        slot.state = ClientState::Connecting;
        slot.live = None;
        let attempt = self.handshake().or_else(|first| {
            debug!(error = %first, "Handshake failed, retrying once");
            self.handshake()
        });
        match attempt {
            Ok(live) => {
                info!(
                    session = %live.session,
                    path = %self.endpoint.display(),
                    "Coordinator session established"
                );
                let transport = Arc::clone(&live.transport);
                slot.state = ClientState::Connected;
                slot.live = Some(live);
                self.ever_connected.store(true, Ordering::Release);
                Some(transport)
            }
            Err(e) if self.ever_connected.load(Ordering::Acquire) => {
                slot.state = ClientState::Failed;
                error!(error = %e, "Coordinator lost and unreachable after retry");
                drop(slot);
                self.policy.on_core_lost(&e.to_string());
                None
            }
            Err(e) => {
                slot.state = ClientState::Disconnected;
                debug!(error = %e, "Coordinator not reachable, staying degraded");
                None
            }
        }
    }

    fn handshake(&self) -> CoordResult<LiveSession> {
        let transport = Transport::connect(&self.endpoint)?;
        let hello = CoordRequest::Hello {
            pid: self.identity.pid,
            process_name: self.identity.process_name.clone(),
        };
        match transport.call(&hello, self.timeout)? {
            CoordResponse::Welcome { session } => Ok(LiveSession {
                transport: Arc::new(transport),
                session,
            }),
            other => Err(CoordError::Handshake {
                message: format!("expected welcome, got {other:?}"),
            }),
        }
    }

    /// One request/response exchange, or `None` when degraded.
    fn request(&self, request: CoordRequest) -> Option<CoordResponse> {
        let transport = self.ensure_session()?;
        match transport.call(&request, self.timeout) {
            Ok(CoordResponse::Error { message }) => {
                debug!(message, "Coordinator rejected request");
                None
            }
            Ok(response) => Some(response),
            Err(e) => {
                warn!(error = %e, "Coordinator call failed");
                None
            }
        }
    }

    fn unexpected<T>(&self, expected: &'static str, response: &CoordResponse) -> Option<T> {
        warn!(expected, response = ?response, "Unexpected coordinator response shape");
        None
    }

    fn bool_op(&self, request: CoordRequest) -> bool {
        match self.request(request) {
            Some(CoordResponse::Bool { value }) => value,
            Some(other) => {
                self.unexpected::<()>("bool", &other);
                false
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for CoordClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordClient")
            .field("endpoint", &self.endpoint)
            .field("process_name", &self.identity.process_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Envelope;
    use crate::transport::{read_frame, write_frame};
    use std::net::Shutdown;
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[derive(Clone, Default)]
    struct RecordingPolicy {
        losses: Arc<AtomicUsize>,
    }

    impl RecordingPolicy {
        fn losses(&self) -> usize {
            self.losses.load(Ordering::SeqCst)
        }
    }

    impl CoreLossPolicy for RecordingPolicy {
        fn on_core_lost(&self, _reason: &str) {
            self.losses.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// A coordinator stand-in: welcomes (or rejects) hellos and answers
    /// every other request with `Bool { value: false }`.
    struct ScriptedServer {
        path: PathBuf,
        stop: Arc<AtomicBool>,
        streams: Arc<Mutex<Vec<UnixStream>>>,
        hellos: Arc<AtomicUsize>,
        accept_thread: Option<thread::JoinHandle<()>>,
    }

    impl ScriptedServer {
        fn spawn(path: &Path, welcome: bool) -> Self {
            let listener = UnixListener::bind(path).unwrap();
            listener.set_nonblocking(true).unwrap();
            let stop = Arc::new(AtomicBool::new(false));
            let streams: Arc<Mutex<Vec<UnixStream>>> = Arc::default();
            let hellos = Arc::new(AtomicUsize::new(0));

            let accept_stop = Arc::clone(&stop);
            let accept_streams = Arc::clone(&streams);
            let accept_hellos = Arc::clone(&hellos);
            let accept_thread = thread::spawn(move || {
                while !accept_stop.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _addr)) => {
                            stream.set_nonblocking(false).unwrap();
                            accept_streams.lock().unwrap().push(stream.try_clone().unwrap());
                            let hellos = Arc::clone(&accept_hellos);
                            thread::spawn(move || serve_connection(stream, welcome, &hellos));
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(2));
                        }
                        Err(_) => break,
                    }
                }
            });

            Self {
                path: path.to_path_buf(),
                stop,
                streams,
                hellos,
                accept_thread: Some(accept_thread),
            }
        }

        fn hellos(&self) -> usize {
            self.hellos.load(Ordering::SeqCst)
        }

        /// Stop accepting, sever every open connection, remove the socket.
        fn halt(&mut self) {
            self.stop.store(true, Ordering::SeqCst);
            for stream in self.streams.lock().unwrap().drain(..) {
                let _ = stream.shutdown(Shutdown::Both);
            }
            if let Some(handle) = self.accept_thread.take() {
                handle.join().unwrap();
            }
            let _ = std::fs::remove_file(&self.path);
        }
    }

    impl Drop for ScriptedServer {
        fn drop(&mut self) {
            self.halt();
        }
    }

    fn serve_connection(mut stream: UnixStream, welcome: bool, hellos: &AtomicUsize) {
        while let Ok(payload) = read_frame(&mut stream) {
            let envelope: Envelope<CoordRequest> = serde_json::from_slice(&payload).unwrap();
            let body = match envelope.body {
                CoordRequest::Hello { .. } => {
                    hellos.fetch_add(1, Ordering::SeqCst);
                    if welcome {
                        CoordResponse::Welcome {
                            session: Uuid::new_v4(),
                        }
                    } else {
                        CoordResponse::Bool { value: false }
                    }
                }
                _ => CoordResponse::Bool { value: false },
            };
            let out = serde_json::to_vec(&Envelope {
                id: envelope.id,
                body,
            })
            .unwrap();
            if write_frame(&mut stream, &out).is_err() {
                break;
            }
        }
    }

    fn identity() -> ClientIdentity {
        ClientIdentity::current_process("com.example.host:p0")
    }

    fn package() -> PackageName {
        PackageName::from_static("com.example.notes")
    }

    fn short_timeout(client: CoordClient) -> CoordClient {
        client.with_timeout(Duration::from_millis(500))
    }

    #[test]
    fn never_connected_stays_degraded_without_policy() {
        let dir = tempfile::tempdir().unwrap();
        let policy = RecordingPolicy::default();
        let client = short_timeout(CoordClient::new(
            dir.path().join("absent.sock"),
            identity(),
            Arc::new(policy.clone()),
        ));

        assert!(!client.is_plugin_running(&package()));
        assert!(client.get_installed_plugin(&package()).is_none());
        assert!(client.get_all_running_plugins().is_empty());
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(policy.losses(), 0);
    }

    #[test]
    fn session_is_reused_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("coord.sock");
        let server = ScriptedServer::spawn(&socket, true);
        let policy = RecordingPolicy::default();
        let client = short_timeout(CoordClient::new(socket, identity(), Arc::new(policy.clone())));

        assert!(!client.is_plugin_running(&package()));
        assert!(!client.uninstall(&package()));
        assert_eq!(client.state(), ClientState::Connected);
        assert!(client.session_id().is_some());
        assert_eq!(server.hellos(), 1);
        assert_eq!(policy.losses(), 0);
    }

    #[test]
    fn handshake_rejection_is_not_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("coord.sock");
        let _server = ScriptedServer::spawn(&socket, false);
        let policy = RecordingPolicy::default();
        let client = short_timeout(CoordClient::new(socket, identity(), Arc::new(policy.clone())));

        assert!(!client.is_plugin_running(&package()));
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(client.session_id().is_none());
        assert_eq!(policy.losses(), 0);
    }

    #[test]
    fn core_loss_invokes_policy_after_retry() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("coord.sock");
        let mut server = ScriptedServer::spawn(&socket, true);
        let policy = RecordingPolicy::default();
        let client = short_timeout(CoordClient::new(socket, identity(), Arc::new(policy.clone())));

        assert!(!client.is_plugin_running(&package()));
        assert_eq!(client.state(), ClientState::Connected);

        server.halt();

        // The dead transport is observed on a later call; the first one
        // after the cut may still be draining the failure.
        for _ in 0..100 {
            let _ = client.is_plugin_running(&package());
            if client.state() == ClientState::Failed {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(client.state(), ClientState::Failed);
        assert_eq!(policy.losses(), 1);

        // Failed is terminal: more calls degrade without re-firing.
        assert!(!client.is_plugin_running(&package()));
        let stub = ComponentName::unflatten("com.example.notes/SyncService").unwrap();
        assert!(client.get_stub_target(&stub).is_none());
        assert_eq!(policy.losses(), 1);
    }

    #[test]
    fn connect_is_eager() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("coord.sock");
        let _server = ScriptedServer::spawn(&socket, true);

        let client = CoordClient::connect(socket, identity(), Arc::new(RecordingPolicy::default()))
            .unwrap();
        assert_eq!(client.state(), ClientState::Connected);

        let absent = CoordClient::connect(
            dir.path().join("absent.sock"),
            identity(),
            Arc::new(RecordingPolicy::default()),
        );
        assert!(absent.is_err());
    }
}
