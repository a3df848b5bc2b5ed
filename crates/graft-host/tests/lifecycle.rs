//! End-to-end hosting tests: a host wired to an in-process coordinator and
//! a fake platform that plays the stub side of service dispatch.

use graft_coord::CoordService;
use graft_core::{
    ComponentDescriptor, ComponentName, Intent, MANIFEST_FILE, PackageName, ProcessTopology,
    ServiceChannel, ServiceOp, StubChannel,
};
use graft_host::{
    Activity, AppContext, Application, AttachConfig, BindFlags, BundleExports, CodeSource,
    ComponentDispatcher, ComponentExport, ConnectionShadow, DispatchCall, HostError,
    IntentSender, IntentSenderRequest, LocalCoordinator, PluginHost, Resolution, Service,
    ServiceCell, ServiceConnection, StaticCodeSource,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

const HUB: &str = r#"
package = "com.example.hub"
version = "2.0.0"

[application]
entry = "HubApp"

[[component]]
name = "MainActivity"
kind = "activity"
actions = ["com.example.hub.MAIN"]

[[component]]
name = "DataService"
kind = "service"
actions = ["com.example.hub.DATA"]
"#;

/// Route host traces through the test writer; repeat calls are no-ops.
fn setup_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("graft_host=debug"))
        .with_test_writer()
        .try_init();
}

type EventLog = Arc<Mutex<Vec<String>>>;

fn hub() -> PackageName {
    PackageName::from_static("com.example.hub")
}

fn host_package() -> PackageName {
    PackageName::from_static("com.example.host")
}

fn data_service() -> ComponentName {
    ComponentName::unflatten("com.example.hub/DataService").unwrap()
}

fn host_call() -> DispatchCall {
    DispatchCall::new(host_package())
}

struct HubApp {
    attaches: Arc<AtomicUsize>,
}

impl Application for HubApp {
    fn on_attach(&mut self, _ctx: AppContext) {
        self.attaches.fetch_add(1, Ordering::SeqCst);
    }
}

struct MainActivity {
    events: EventLog,
}

impl Activity for MainActivity {
    fn on_create(&mut self, intent: &Intent) {
        self.events.lock().unwrap().push(format!(
            "activity-create {}",
            intent.action().unwrap_or("-")
        ));
    }
}

struct DataService {
    events: EventLog,
}

impl Service for DataService {
    fn on_create(&mut self) {
        self.events.lock().unwrap().push("create".to_string());
    }

    fn on_start_command(&mut self, intent: &Intent) {
        self.events
            .lock()
            .unwrap()
            .push(format!("start {}", intent.action().unwrap_or("-")));
    }

    fn on_bind(&mut self, _intent: &Intent) -> Option<ServiceChannel> {
        self.events.lock().unwrap().push("bind".to_string());
        Some(ServiceChannel::new())
    }

    fn on_destroy(&mut self) {
        self.events.lock().unwrap().push("destroy".to_string());
    }
}

fn hub_exports(events: &EventLog, attaches: &Arc<AtomicUsize>) -> BundleExports {
    let app_attaches = Arc::clone(attaches);
    let activity_events = Arc::clone(events);
    let service_events = Arc::clone(events);
    BundleExports::new()
        .application("HubApp", move || HubApp {
            attaches: Arc::clone(&app_attaches),
        })
        .activity("MainActivity", move || MainActivity {
            events: Arc::clone(&activity_events),
        })
        .service("DataService", move || DataService {
            events: Arc::clone(&service_events),
        })
}

/// Plays the platform behind the dispatch seam: stub intents come in, the
/// matching plugin service is loaded, created and driven through the host's
/// lifecycle entry points.
#[derive(Default)]
struct FakePlatform {
    host: Mutex<Option<Weak<PluginHost>>>,
    live: Mutex<HashMap<ComponentName, ServiceCell>>,
}

impl FakePlatform {
    fn wire(&self, host: &Arc<PluginHost>) {
        *self.host.lock().unwrap() = Some(Arc::downgrade(host));
    }

    fn host(&self) -> Option<Arc<PluginHost>> {
        self.host.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    fn ensure_service(
        &self,
        host: &Arc<PluginHost>,
        stub: &ComponentDescriptor,
        target: &ComponentDescriptor,
    ) -> Result<ServiceCell, HostError> {
        if let Some(cell) = self.live.lock().unwrap().get(&target.name) {
            return Ok(Arc::clone(cell));
        }
        host.load_plugin(target.name.package(), None)?;
        let package = target.name.package().clone();
        let export = host.load_component_class(&package, target.name.name())?;
        let ComponentExport::Service(make) = export else {
            return Err(HostError::ComponentClassNotFound {
                tag: target.name.name().to_string(),
            });
        };
        let cell = make();
        host.call_service_on_create(&cell, stub.name.clone(), target.name.clone())?;
        self.live
            .lock()
            .unwrap()
            .insert(target.name.clone(), Arc::clone(&cell));
        Ok(cell)
    }
}

impl ComponentDispatcher for FakePlatform {
    fn start_activity(&self, _call: &DispatchCall, _intent: Intent) {}

    fn start_service(&self, _call: &DispatchCall, intent: Intent) -> Option<ComponentName> {
        let host = self.host()?;
        let stub = intent.stub_descriptor()?;
        let target = intent.target_descriptor()?;
        let cell = match intent.service_op().unwrap_or(ServiceOp::Start) {
            ServiceOp::Start => self.ensure_service(&host, &stub, &target).ok()?,
            ServiceOp::Stop => self
                .live
                .lock()
                .unwrap()
                .get(&target.name)
                .map(Arc::clone)?,
        };
        let op = host.deliver_service_command(&cell, &intent).ok()?;
        if op == ServiceOp::Stop {
            self.live.lock().unwrap().remove(&target.name);
        }
        Some(stub.name.clone())
    }

    fn stop_service(&self, _call: &DispatchCall, _intent: Intent) -> bool {
        false
    }

    fn stop_service_token(
        &self,
        _call: &DispatchCall,
        _component: ComponentName,
        _token: u64,
    ) -> bool {
        false
    }

    fn bind_service(
        &self,
        _call: &DispatchCall,
        intent: Intent,
        connection: Arc<ConnectionShadow>,
        flags: BindFlags,
    ) -> bool {
        let Some(host) = self.host() else {
            return false;
        };
        let (Some(stub), Some(target)) = (intent.stub_descriptor(), intent.target_descriptor())
        else {
            return false;
        };
        let cell = if flags.auto_create {
            match self.ensure_service(&host, &stub, &target) {
                Ok(cell) => cell,
                Err(_) => return false,
            }
        } else {
            match self.live.lock().unwrap().get(&target.name) {
                Some(cell) => Arc::clone(cell),
                None => return false,
            }
        };
        match host.deliver_service_bind(&cell, &intent) {
            Ok(Some(channel)) => {
                connection.handle_connected(StubChannel::new(target.name.clone(), channel));
                true
            }
            Ok(None) | Err(_) => false,
        }
    }

    fn unbind_service(&self, _call: &DispatchCall, _connection: &Arc<ConnectionShadow>) -> bool {
        true
    }

    fn get_intent_sender(
        &self,
        _call: &DispatchCall,
        _request: IntentSenderRequest,
    ) -> Option<IntentSender> {
        None
    }
}

#[derive(Default)]
struct RecordingConnection {
    connected: Mutex<Vec<(ComponentName, ServiceChannel)>>,
    disconnected: Mutex<Vec<ComponentName>>,
}

impl ServiceConnection for RecordingConnection {
    fn on_connected(&self, component: &ComponentName, channel: ServiceChannel) {
        self.connected
            .lock()
            .unwrap()
            .push((component.clone(), channel));
    }

    fn on_disconnected(&self, component: &ComponentName) {
        self.disconnected.lock().unwrap().push(component.clone());
    }
}

struct Fixture {
    host: Arc<PluginHost>,
    service: Arc<CoordService>,
    events: EventLog,
    attaches: Arc<AtomicUsize>,
}

fn fixture(root: &Path) -> Fixture {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let attaches = Arc::new(AtomicUsize::new(0));
    let service = Arc::new(CoordService::new(
        host_package(),
        ProcessTopology::Standalone,
    ));
    let bundle = root.join("hub");
    std::fs::create_dir_all(&bundle).unwrap();
    std::fs::write(bundle.join(MANIFEST_FILE), HUB).unwrap();
    service.install(&bundle).unwrap();

    let code = Arc::new(StaticCodeSource::new());
    code.insert(hub(), hub_exports(&events, &attaches));
    let platform = Arc::new(FakePlatform::default());
    let resolution: Arc<dyn Resolution> = Arc::new(LocalCoordinator::attach(
        Arc::clone(&service),
        17,
        "com.example.host",
    ));
    let host = PluginHost::new(
        AttachConfig::new(
            host_package(),
            "com.example.host",
            resolution,
            Arc::clone(&platform) as Arc<dyn ComponentDispatcher>,
        )
        .with_code_source(code as Arc<dyn CodeSource>),
    )
    .unwrap();
    platform.wire(&host);
    Fixture {
        host,
        service,
        events,
        attaches,
    }
}

#[test]
fn concurrent_load_yields_one_runtime() {
    setup_logging();
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());

    let pointers: Vec<usize> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let host = Arc::clone(&f.host);
                scope.spawn(move || {
                    let runtime = host.load_plugin(&hub(), None).unwrap();
                    Arc::as_ptr(&runtime) as usize
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(pointers.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(f.attaches.load(Ordering::SeqCst), 1);
    assert_eq!(f.service.running_packages(), [hub()]);
}

#[test]
fn full_lifecycle_round_trip() {
    setup_logging();
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());

    let origin = Intent::for_action("com.example.hub.DATA");
    let started = f.host.start_service(&host_call(), &origin).unwrap();
    assert_eq!(started, data_service());
    assert!(f.service.is_running(&hub()));
    assert_eq!(
        f.host.dump().running_services,
        [data_service().flatten()]
    );
    {
        let events = f.events.lock().unwrap();
        assert_eq!(events.as_slice(), ["create", "start com.example.hub.DATA"]);
    }

    // A second start reuses the live instance.
    f.host
        .start_service(&host_call(), &Intent::to(data_service()))
        .unwrap();
    assert_eq!(f.events.lock().unwrap().len(), 3);

    let stopped = f
        .host
        .stop_service(&host_call(), &Intent::to(data_service()))
        .unwrap();
    assert!(stopped);
    assert_eq!(
        f.events.lock().unwrap().last().map(String::as_str),
        Some("destroy")
    );
    assert!(f.host.dump().running_services.is_empty());

    // Stopping again finds nothing live.
    let stopped = f
        .host
        .stop_service(&host_call(), &Intent::to(data_service()))
        .unwrap();
    assert!(!stopped);
}

#[test]
fn bind_service_connects_shadow() {
    setup_logging();
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    let connection = Arc::new(RecordingConnection::default());
    let conn = Arc::clone(&connection) as Arc<dyn ServiceConnection>;

    let bound = f
        .host
        .bind_service(
            &host_call(),
            &Intent::to(data_service()),
            &conn,
            BindFlags::auto_create(),
        )
        .unwrap();
    assert!(bound);
    assert_eq!(f.host.dump().connections, 1);

    let (component, channel) = connection.connected.lock().unwrap()[0].clone();
    assert_eq!(component, data_service());
    assert_eq!(
        f.events.lock().unwrap().as_slice(),
        ["create", "bind"]
    );

    // Channel death reaches the caller under the component it bound.
    channel.kill();
    assert_eq!(
        connection.disconnected.lock().unwrap().as_slice(),
        [data_service()]
    );
}
