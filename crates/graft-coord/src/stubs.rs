//! Stub slot allocation.
//!
//! The host application declares a fixed pool of placeholder components:
//! `slots_per_kind` stubs of each kind in each of `process_count` stub
//! processes. The pool hands one stub to each distinct plugin component and
//! keeps the assignment stable until the owning package is released. Slots
//! are not recycled within a package's lifetime; a released package's slots
//! stay retired until the pool wraps to them again.

use graft_core::{ComponentDescriptor, ComponentKind, ComponentName, PackageName, ProcessTopology};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{CoordError, CoordResult};

/// Default number of stub processes the host declares.
pub const DEFAULT_PROCESS_COUNT: usize = 4;
/// Default number of stub slots per component kind per stub process.
pub const DEFAULT_SLOTS_PER_KIND: usize = 4;

/// Stable stub-component assignment for plugin components.
pub struct StubPool {
    host_package: PackageName,
    topology: ProcessTopology,
    process_count: usize,
    slots_per_kind: usize,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    /// (package, effective declared process) -> stub process index.
    process_of: HashMap<(PackageName, String), usize>,
    next_process: usize,
    /// (stub process index, kind) -> next free slot.
    slot_cursor: HashMap<(usize, ComponentKind), usize>,
    /// target component -> assigned stub descriptor.
    stub_of: HashMap<ComponentName, ComponentDescriptor>,
    /// stub component -> target descriptor.
    target_of: HashMap<ComponentName, ComponentDescriptor>,
    /// package -> target components it holds assignments for.
    owned: HashMap<PackageName, Vec<ComponentName>>,
}

impl StubPool {
    /// A pool with the default capacity.
    #[must_use]
    pub fn new(host_package: PackageName, topology: ProcessTopology) -> Self {
        Self::with_capacity(
            host_package,
            topology,
            DEFAULT_PROCESS_COUNT,
            DEFAULT_SLOTS_PER_KIND,
        )
    }

    /// A pool with explicit capacity. Zero values are clamped to one.
    #[must_use]
    pub fn with_capacity(
        host_package: PackageName,
        topology: ProcessTopology,
        process_count: usize,
        slots_per_kind: usize,
    ) -> Self {
        Self {
            host_package,
            topology,
            process_count: process_count.max(1),
            slots_per_kind: slots_per_kind.max(1),
            state: Mutex::new(PoolState::default()),
        }
    }

    /// The stub process assigned to `declared_process` of `package`.
    ///
    /// Standalone topology spreads distinct plugin processes over the stub
    /// process pool and keeps each mapping stable. Dual topology maps every
    /// plugin to the single shared plugin process.
    #[must_use]
    pub fn select_process(&self, package: &PackageName, declared_process: &str) -> String {
        let mut state = self.lock_state();
        let index = self.process_index(&mut state, package, declared_process);
        self.process_name(index)
    }

    /// Assign (or return the existing) stub for `target`.
    ///
    /// `default_process` is the owning package's default process name, used
    /// to resolve the target's declared process.
    ///
    /// # Errors
    ///
    /// Returns [`CoordError::StubPoolExhausted`] when the selected stub
    /// process has no free slot of the target's kind.
    pub fn assign(
        &self,
        target: &ComponentDescriptor,
        default_process: &str,
    ) -> CoordResult<ComponentDescriptor> {
        let mut state = self.lock_state();
        if let Some(stub) = state.stub_of.get(&target.name) {
            return Ok(stub.clone());
        }

        let package = target.name.package().clone();
        let declared = target.process_name(default_process);
        let process_index = self.process_index(&mut state, &package, &declared);

        let cursor = state
            .slot_cursor
            .entry((process_index, target.kind))
            .or_insert(0);
        let slot = *cursor;
        if slot >= self.slots_per_kind {
            warn!(
                target = %target.name,
                kind = %target.kind,
                process_index,
                "Stub pool exhausted"
            );
            return Err(CoordError::StubPoolExhausted { kind: target.kind });
        }
        *cursor = slot.wrapping_add(1);

        let stub = self.stub_descriptor(target.kind, process_index, slot)?;
        debug!(target = %target.name, stub = %stub.name, "Assigned stub component");
        state.stub_of.insert(target.name.clone(), stub.clone());
        state.target_of.insert(stub.name.clone(), target.clone());
        state.owned.entry(package).or_default().push(target.name.clone());
        Ok(stub)
    }

    /// The target descriptor a stub component was assigned to, if any.
    #[must_use]
    pub fn target_of(&self, stub: &ComponentName) -> Option<ComponentDescriptor> {
        self.lock_state().target_of.get(stub).cloned()
    }

    /// The stub descriptor assigned to a target component, if any.
    #[must_use]
    pub fn stub_for(&self, target: &ComponentName) -> Option<ComponentDescriptor> {
        self.lock_state().stub_of.get(target).cloned()
    }

    /// Drop every assignment owned by `package`.
    pub fn release_package(&self, package: &PackageName) {
        let mut state = self.lock_state();
        let Some(targets) = state.owned.remove(package) else {
            return;
        };
        for target in &targets {
            if let Some(stub) = state.stub_of.remove(target) {
                state.target_of.remove(&stub.name);
            }
        }
        debug!(package = %package, released = targets.len(), "Released stub assignments");
    }

    /// Number of live assignments.
    #[must_use]
    pub fn assigned(&self) -> usize {
        self.lock_state().stub_of.len()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn process_index(
        &self,
        state: &mut PoolState,
        package: &PackageName,
        declared_process: &str,
    ) -> usize {
        if self.topology == ProcessTopology::Dual {
            return 0;
        }
        let key = (package.clone(), declared_process.to_string());
        if let Some(index) = state.process_of.get(&key) {
            return *index;
        }
        let index = state
            .next_process
            .checked_rem(self.process_count)
            .unwrap_or(0);
        state.next_process = state.next_process.wrapping_add(1);
        state.process_of.insert(key, index);
        index
    }

    fn process_name(&self, index: usize) -> String {
        match self.topology {
            ProcessTopology::Dual => format!("{}:plugin", self.host_package),
            ProcessTopology::Standalone => format!("{}:p{index}", self.host_package),
        }
    }

    fn stub_descriptor(
        &self,
        kind: ComponentKind,
        process_index: usize,
        slot: usize,
    ) -> CoordResult<ComponentDescriptor> {
        let prefix = match kind {
            ComponentKind::Activity => "StubActivity",
            ComponentKind::Service => "StubService",
            ComponentKind::Provider => "StubProvider",
            ComponentKind::Receiver => "StubReceiver",
        };
        let short = format!("{prefix}P{process_index}S{slot}");
        let process_suffix = match self.topology {
            ProcessTopology::Dual => ":plugin".to_string(),
            ProcessTopology::Standalone => format!(":p{process_index}"),
        };
        let authority = (kind == ComponentKind::Provider)
            .then(|| format!("{}.stub.p{process_index}.s{slot}", self.host_package));
        let name = ComponentName::new(self.host_package.clone(), short)?;
        Ok(ComponentDescriptor {
            name,
            kind,
            process: Some(process_suffix),
            exported: false,
            actions: Vec::new(),
            authority,
        })
    }
}

impl std::fmt::Debug for StubPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubPool")
            .field("host_package", &self.host_package)
            .field("topology", &self.topology)
            .field("process_count", &self.process_count)
            .field("slots_per_kind", &self.slots_per_kind)
            .field("assigned", &self.assigned())
            .finish()
    }
}
