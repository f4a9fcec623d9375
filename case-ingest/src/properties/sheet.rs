use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use super::{Property, PropertyValue};

/// Ordered slots plus a name index, always mutated together.
#[derive(Default)]
struct SheetSet {
    slots: Vec<Property>,
    index: HashMap<String, usize>,
}

impl SheetSet {
    fn from_properties(properties: impl IntoIterator<Item = Property>) -> Self {
        let mut set = Self::default();
        for property in properties {
            set.upsert(property);
        }
        set
    }

    fn upsert(&mut self, property: Property) {
        match self.index.get(property.name()) {
            Some(&slot) => self.slots[slot] = property,
            None => {
                self.index.insert(property.name().to_string(), self.slots.len());
                self.slots.push(property);
            }
        }
    }

    fn reindex(&mut self) {
        self.index = self
            .slots
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name().to_string(), i))
            .collect();
    }
}

/// Outcome of a [`PropertySheet::reconcile`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Names whose slot was replaced.
    pub applied: Vec<String>,
    /// Names with no slot in the sheet.
    pub unknown: Vec<String>,
    /// Names whose incoming property was disabled.
    pub disabled: Vec<String>,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

/// The live property collection of one displayed entity.
///
/// Every operation takes the same lock, so a reader never observes a
/// half-applied batch and reconciliation never interleaves with re-creation.
#[derive(Default)]
pub struct PropertySheet {
    set: Mutex<SheetSet>,
    revision: AtomicU64,
}

impl PropertySheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sheet from declared properties, keeping only those enabled now.
    pub fn from_declared(properties: impl IntoIterator<Item = Property>) -> Self {
        Self {
            set: Mutex::new(SheetSet::from_properties(
                properties.into_iter().filter(Property::is_enabled),
            )),
            revision: AtomicU64::new(0),
        }
    }

    /// Replace the whole sheet. Only the owner of the declared schema calls this.
    pub fn recreate(&self, properties: impl IntoIterator<Item = Property>) {
        let set = SheetSet::from_properties(properties.into_iter().filter(Property::is_enabled));
        *self.set.lock() = set;
        self.revision.fetch_add(1, Ordering::Release);
    }

    /// Apply a batch of computed properties to existing slots.
    ///
    /// A property replaces the slot of the same name when that slot exists and
    /// the incoming property is enabled. No slot is ever added.
    pub fn reconcile(&self, batch: impl IntoIterator<Item = Property>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut set = self.set.lock();

        for property in batch {
            let Some(&slot) = set.index.get(property.name()) else {
                report.unknown.push(property.name().to_string());
                continue;
            };
            if !property.is_enabled() {
                report.disabled.push(property.name().to_string());
                continue;
            }
            report.applied.push(property.name().to_string());
            set.slots[slot] = property;
        }

        if report.changed() {
            self.revision.fetch_add(1, Ordering::Release);
        }
        drop(set);

        trace!(
            applied = report.applied.len(),
            unknown = report.unknown.len(),
            disabled = report.disabled.len(),
            "Reconciled property batch"
        );
        report
    }

    /// Remove a slot, returning the property it held. This is a schema change
    /// reserved for collaborators that own the sheet layout.
    pub fn remove(&self, name: &str) -> Option<Property> {
        let mut set = self.set.lock();
        let slot = set.index.remove(name)?;
        let removed = set.slots.remove(slot);
        set.reindex();
        drop(set);
        self.revision.fetch_add(1, Ordering::Release);
        Some(removed)
    }

    pub fn get(&self, name: &str) -> Option<Property> {
        let set = self.set.lock();
        set.index.get(name).map(|&slot| set.slots[slot].clone())
    }

    pub fn value(&self, name: &str) -> Option<PropertyValue> {
        let set = self.set.lock();
        set.index.get(name).map(|&slot| set.slots[slot].value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.set.lock().index.contains_key(name)
    }

    /// Slot names in display order.
    pub fn names(&self) -> Vec<String> {
        self.set
            .lock()
            .slots
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Consistent copy of every slot.
    pub fn snapshot(&self) -> Vec<Property> {
        self.set.lock().slots.clone()
    }

    pub fn len(&self) -> usize {
        self.set.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Incremented on every change; lets observers detect updates cheaply.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }
}
