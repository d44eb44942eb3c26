use indexmap::IndexMap;

use crate::package::{Package, PackageId};

/// Packages by absolute label, in insertion order, remembering whether the
/// content changed since it was last persisted.
#[derive(Debug, Clone, Default)]
pub struct PackageCollection {
    packages: IndexMap<String, PackageId>,
    changed: bool,
}

impl PackageCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, package: &Package) {
        let previous = self
            .packages
            .insert(package.absolute_label.clone(), package.id);
        if previous != Some(package.id) {
            self.changed = true;
        }
    }

    pub fn remove(&mut self, label: &str) -> Option<PackageId> {
        let removed = self.packages.shift_remove(label);
        if removed.is_some() {
            self.changed = true;
        }
        removed
    }

    /// Drop every package `keep` rejects.
    pub fn retain(&mut self, mut keep: impl FnMut(PackageId) -> bool) {
        let before = self.packages.len();
        self.packages.retain(|_, id| keep(*id));
        if self.packages.len() != before {
            self.changed = true;
        }
    }

    pub fn get(&self, label: &str) -> Option<PackageId> {
        self.packages.get(label).copied()
    }

    pub fn contains(&self, id: PackageId) -> bool {
        self.packages.values().any(|p| *p == id)
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.packages.contains_key(label)
    }

    pub fn ids(&self) -> Vec<PackageId> {
        self.packages.values().copied().collect()
    }

    pub fn labels(&self) -> Vec<String> {
        self.packages.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn set_changed(&mut self, changed: bool) {
        self.changed = changed;
    }
}
