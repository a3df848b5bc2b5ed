//! Per-package resource tables.
//!
//! Every loaded plugin gets its own immutable [`ResourceTable`] whose entry
//! ids live in a package-derived namespace. Ids are `base_id + index` where
//! the base is a hash of the package name shifted past the index byte, so
//! entries from different packages (the host included) do not land on the
//! same id.

use std::collections::BTreeMap;

use graft_core::PackageName;
use serde_json::Value;

/// Immutable name/value table scoped to one package.
#[derive(Debug, Clone)]
pub struct ResourceTable {
    package: PackageName,
    base_id: u32,
    entries: BTreeMap<String, (u32, Value)>,
}

impl ResourceTable {
    /// Builds a table from `entries`. Ids are assigned in name order and are
    /// stable for a given entry set.
    pub fn build<I>(package: PackageName, entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let base_id = base_id_for(&package);
        let sorted: BTreeMap<String, Value> = entries.into_iter().collect();
        let mut table = BTreeMap::new();
        let mut index: u32 = 0;
        for (name, value) in sorted {
            table.insert(name, (base_id.wrapping_add(index), value));
            index = index.wrapping_add(1);
        }
        Self {
            package,
            base_id,
            entries: table,
        }
    }

    /// An empty table for `package`.
    #[must_use]
    pub fn empty(package: PackageName) -> Self {
        let base_id = base_id_for(&package);
        Self {
            package,
            base_id,
            entries: BTreeMap::new(),
        }
    }

    /// The owning package.
    #[must_use]
    pub fn package(&self) -> &PackageName {
        &self.package
    }

    /// First id of this package's namespace.
    #[must_use]
    pub fn base_id(&self) -> u32 {
        self.base_id
    }

    /// The value stored under `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).map(|(_, value)| value)
    }

    /// The id assigned to `name`.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.entries.get(name).map(|(id, _)| *id)
    }

    /// The entry name behind `id`.
    #[must_use]
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, (entry_id, _))| *entry_id == id)
            .map(|(name, _)| name.as_str())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// FNV-1a over the package name, shifted past the low index byte. The high
/// bit is forced so plugin ids stay out of the range small hand-numbered
/// host tables tend to use.
fn base_id_for(package: &PackageName) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in package.as_str().bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash.wrapping_shl(8) | 0x8000_0000
}
