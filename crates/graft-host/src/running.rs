//! Live component instances of one host process.
//!
//! Each component kind gets a [`RunningTable`] keyed by instance identity.
//! Entries hold the instance weakly so a dropped component falls out of the
//! table on the next access instead of pinning the allocation.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use graft_core::{ApplicationDescriptor, ComponentName};

/// Stub/target pairing of one live component instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRecord {
    /// Pre-declared stub the instance runs under.
    pub stub: ComponentName,
    /// Real plugin component.
    pub target: ComponentName,
}

/// Record of one attached plugin application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRecord {
    /// Declared application entry.
    pub descriptor: ApplicationDescriptor,
    /// Process the application attached in.
    pub process_name: String,
}

struct Entry<C: ?Sized, R> {
    key: usize,
    instance: Weak<C>,
    record: R,
}

/// Table of live component instances and their records.
///
/// Instances are keyed by allocation address, so re-registering the same
/// `Arc` is rejected while distinct instances of the same component type
/// coexist.
pub struct RunningTable<C: ?Sized, R> {
    entries: Mutex<Vec<Entry<C, R>>>,
}

fn key_of<C: ?Sized>(instance: &Arc<C>) -> usize {
    Arc::as_ptr(instance).cast::<()>() as usize
}

impl<C: ?Sized, R: Clone> RunningTable<C, R> {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, Vec<Entry<C, R>>> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.retain(|entry| entry.instance.strong_count() > 0);
        entries
    }

    /// Registers `instance` with its record.
    ///
    /// # Errors
    ///
    /// Returns the record back when the instance is already registered.
    pub fn register(&self, instance: &Arc<C>, record: R) -> Result<(), R> {
        let key = key_of(instance);
        let mut entries = self.locked();
        if entries.iter().any(|entry| entry.key == key) {
            return Err(record);
        }
        entries.push(Entry {
            key,
            instance: Arc::downgrade(instance),
            record,
        });
        Ok(())
    }

    /// The record registered for `instance`.
    #[must_use]
    pub fn lookup(&self, instance: &Arc<C>) -> Option<R> {
        let key = key_of(instance);
        self.locked()
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.record.clone())
    }

    /// Removes `instance`, returning its record.
    pub fn remove(&self, instance: &Arc<C>) -> Option<R> {
        let key = key_of(instance);
        let mut entries = self.locked();
        let index = entries.iter().position(|entry| entry.key == key)?;
        Some(entries.swap_remove(index).record)
    }

    /// Records of all live instances.
    #[must_use]
    pub fn records(&self) -> Vec<R> {
        self.locked()
            .iter()
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// Live instance/record pairs.
    #[must_use]
    pub fn entries(&self) -> Vec<(Arc<C>, R)> {
        self.locked()
            .iter()
            .filter_map(|entry| {
                entry
                    .instance
                    .upgrade()
                    .map(|instance| (instance, entry.record.clone()))
            })
            .collect()
    }

    /// First live entry whose record matches `pred`.
    pub fn find(&self, mut pred: impl FnMut(&R) -> bool) -> Option<(Arc<C>, R)> {
        self.locked().iter().find_map(|entry| {
            if pred(&entry.record) {
                entry
                    .instance
                    .upgrade()
                    .map(|instance| (instance, entry.record.clone()))
            } else {
                None
            }
        })
    }

    /// Number of live instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locked().len()
    }

    /// Whether no instance is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }
}

impl<C: ?Sized, R: Clone> Default for RunningTable<C, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized, R> fmt::Debug for RunningTable<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f.debug_struct("RunningTable")
            .field("entries", &entries.len())
            .finish()
    }
}
