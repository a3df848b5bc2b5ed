//! Running-plugin bookkeeping.
//!
//! Tracks, per connected session, which plugin applications have attached
//! and which components are live. Records are fed by
//! [`LifecycleEvent`](crate::proto::LifecycleEvent)s and dropped wholesale
//! when the session disconnects.

use graft_core::{ComponentKind, ComponentName, PackageName};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::proto::LifecycleEvent;

/// One live component instance, as reported by a hosting process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningComponent {
    /// Stub component carrying the instance.
    pub stub: ComponentName,
    /// Real plugin component.
    pub target: ComponentName,
    /// Component kind.
    pub kind: ComponentKind,
}

#[derive(Debug, Default)]
struct ProcessRecord {
    pid: u32,
    process_name: String,
    attached: BTreeSet<PackageName>,
    components: HashMap<ComponentName, RunningComponent>,
}

/// Per-session running state.
#[derive(Debug, Default)]
pub struct RunningRegistry {
    sessions: Mutex<HashMap<Uuid, ProcessRecord>>,
}

impl RunningRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connected hosting process.
    pub fn attach_session(&self, session: Uuid, pid: u32, process_name: impl Into<String>) {
        let process_name = process_name.into();
        debug!(%session, pid, process_name, "Hosting process attached");
        self.lock().insert(
            session,
            ProcessRecord {
                pid,
                process_name,
                ..ProcessRecord::default()
            },
        );
    }

    /// Drop a session and everything it reported.
    pub fn drop_session(&self, session: Uuid) {
        if let Some(record) = self.lock().remove(&session) {
            debug!(
                %session,
                pid = record.pid,
                components = record.components.len(),
                "Hosting process detached"
            );
        }
    }

    /// Apply one lifecycle event reported by `session`.
    pub fn record(&self, session: Uuid, event: &LifecycleEvent) {
        let mut sessions = self.lock();
        let Some(record) = sessions.get_mut(&session) else {
            debug!(%session, "Lifecycle event from unknown session");
            return;
        };
        match event {
            LifecycleEvent::ApplicationAttached { package, .. } => {
                record.attached.insert(package.clone());
            }
            LifecycleEvent::ActivityCreated { stub, target } => {
                record.components.insert(
                    stub.clone(),
                    RunningComponent {
                        stub: stub.clone(),
                        target: target.clone(),
                        kind: ComponentKind::Activity,
                    },
                );
            }
            LifecycleEvent::ServiceCreated { stub, target } => {
                record.components.insert(
                    stub.clone(),
                    RunningComponent {
                        stub: stub.clone(),
                        target: target.clone(),
                        kind: ComponentKind::Service,
                    },
                );
            }
            LifecycleEvent::ProviderCreated { stub, target } => {
                record.components.insert(
                    stub.clone(),
                    RunningComponent {
                        stub: stub.clone(),
                        target: target.clone(),
                        kind: ComponentKind::Provider,
                    },
                );
            }
            LifecycleEvent::ActivityDestroyed { stub, .. }
            | LifecycleEvent::ServiceDestroyed { stub, .. } => {
                record.components.remove(stub);
            }
        }
    }

    /// Packages with an attached application or a live component, sorted.
    #[must_use]
    pub fn running_packages(&self) -> Vec<PackageName> {
        let sessions = self.lock();
        let mut packages: BTreeSet<PackageName> = BTreeSet::new();
        for record in sessions.values() {
            packages.extend(record.attached.iter().cloned());
            packages.extend(
                record
                    .components
                    .values()
                    .map(|c| c.target.package().clone()),
            );
        }
        packages.into_iter().collect()
    }

    /// Whether `package` has an attached application or live component.
    #[must_use]
    pub fn is_running(&self, package: &PackageName) -> bool {
        let sessions = self.lock();
        sessions.values().any(|record| {
            record.attached.contains(package)
                || record
                    .components
                    .values()
                    .any(|c| c.target.package() == package)
        })
    }

    /// Drop every record owned by `package` across all sessions.
    ///
    /// Used on uninstall: the hosting sessions stay connected, but the
    /// package's attach and component records are no longer meaningful.
    pub fn release_package(&self, package: &PackageName) {
        let mut sessions = self.lock();
        let mut removed = 0_usize;
        for record in sessions.values_mut() {
            record.attached.remove(package);
            let before = record.components.len();
            record
                .components
                .retain(|_, c| c.target.package() != package);
            removed = removed.saturating_add(before.saturating_sub(record.components.len()));
        }
        debug!(%package, components = removed, "Released running records");
    }

    /// The reported process name of the session attached with `pid`.
    #[must_use]
    pub fn process_name_of(&self, pid: u32) -> Option<String> {
        let sessions = self.lock();
        sessions
            .values()
            .find(|record| record.pid == pid)
            .map(|record| record.process_name.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, ProcessRecord>> {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(pkg: &str, name: &str) -> ComponentName {
        ComponentName::new(PackageName::from_static(pkg), name).unwrap()
    }

    #[test]
    fn records_and_clears_components() {
        let registry = RunningRegistry::new();
        let session = Uuid::new_v4();
        registry.attach_session(session, 100, "com.example.host:p0");

        let stub = component("com.example.host", "StubServiceP0S0");
        let target = component("com.example.notes", "SyncService");
        registry.record(
            session,
            &LifecycleEvent::ServiceCreated {
                stub: stub.clone(),
                target: target.clone(),
            },
        );

        let pkg = PackageName::from_static("com.example.notes");
        assert!(registry.is_running(&pkg));
        assert_eq!(registry.running_packages(), vec![pkg.clone()]);

        registry.record(
            session,
            &LifecycleEvent::ServiceDestroyed {
                stub,
                target,
            },
        );
        assert!(!registry.is_running(&pkg));
    }

    #[test]
    fn attached_application_counts_as_running() {
        let registry = RunningRegistry::new();
        let session = Uuid::new_v4();
        registry.attach_session(session, 101, "com.example.host:p1");

        let pkg = PackageName::from_static("com.example.notes");
        registry.record(
            session,
            &LifecycleEvent::ApplicationAttached {
                package: pkg.clone(),
                process_name: "com.example.host:p1".to_string(),
            },
        );
        assert!(registry.is_running(&pkg));
    }

    #[test]
    fn session_drop_clears_records() {
        let registry = RunningRegistry::new();
        let session = Uuid::new_v4();
        registry.attach_session(session, 102, "com.example.host:p0");
        registry.record(
            session,
            &LifecycleEvent::ActivityCreated {
                stub: component("com.example.host", "StubActivityP0S0"),
                target: component("com.example.notes", "NotesActivity"),
            },
        );

        assert_eq!(registry.process_name_of(102).as_deref(), Some("com.example.host:p0"));
        registry.drop_session(session);
        assert!(registry.running_packages().is_empty());
        assert!(registry.process_name_of(102).is_none());
    }

    #[test]
    fn release_package_clears_records_but_keeps_sessions() {
        let registry = RunningRegistry::new();
        let session = Uuid::new_v4();
        registry.attach_session(session, 103, "com.example.host:p0");

        let notes = PackageName::from_static("com.example.notes");
        let mail = PackageName::from_static("com.example.mail");
        registry.record(
            session,
            &LifecycleEvent::ApplicationAttached {
                package: notes.clone(),
                process_name: "com.example.host:p0".to_string(),
            },
        );
        registry.record(
            session,
            &LifecycleEvent::ServiceCreated {
                stub: component("com.example.host", "StubServiceP0S0"),
                target: component("com.example.notes", "SyncService"),
            },
        );
        registry.record(
            session,
            &LifecycleEvent::ServiceCreated {
                stub: component("com.example.host", "StubServiceP0S1"),
                target: component("com.example.mail", "MailService"),
            },
        );

        registry.release_package(&notes);
        assert!(!registry.is_running(&notes));
        assert!(registry.is_running(&mail));
        // the session itself survives
        assert_eq!(
            registry.process_name_of(103).as_deref(),
            Some("com.example.host:p0")
        );
    }

    #[test]
    fn events_from_unknown_sessions_are_ignored() {
        let registry = RunningRegistry::new();
        registry.record(
            Uuid::new_v4(),
            &LifecycleEvent::ApplicationAttached {
                package: PackageName::from_static("com.example.notes"),
                process_name: "x".to_string(),
            },
        );
        assert!(registry.running_packages().is_empty());
    }
}
