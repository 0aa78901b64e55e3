//! Resource table: identity to stable slot index plus metadata.

use hashbrown::HashMap;
use lumora_core::ResourceId;
use lumora_gpu::{GpuError, Result};
use tracing::debug;

/// Maps each distinct resource to a stable small slot index and its
/// per-resource metadata (geometry ranges, texture bindings).
///
/// Slot indices are dense: releasing a resource compacts the slot space
/// and yields a [`SlotRemap`] that callers apply to every live record
/// referencing a slot.
pub struct ResourceTable<M> {
    /// Resource identity -> slot index.
    entries: HashMap<ResourceId, usize>,
    /// Slot-ordered resources and their metadata.
    slots: Vec<(ResourceId, M)>,
    /// Fixed ceiling; exceeding it is a configuration error.
    capacity: usize,
}

impl<M> ResourceTable<M> {
    /// Create a table with a fixed slot ceiling.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Register a resource, assigning it the next free slot.
    ///
    /// Idempotent per identity: re-registering returns the existing slot
    /// with `newly_added = false` and does not invoke `metadata`.
    pub fn register(
        &mut self,
        id: ResourceId,
        metadata: impl FnOnce() -> M,
    ) -> Result<(u32, bool)> {
        if let Some(&slot) = self.entries.get(&id) {
            return Ok((slot as u32, false));
        }

        if self.slots.len() >= self.capacity {
            return Err(GpuError::SlotCeilingExceeded {
                used: self.slots.len(),
                capacity: self.capacity,
            });
        }

        let slot = self.slots.len();
        self.slots.push((id, metadata()));
        self.entries.insert(id, slot);
        debug!(resource = id.raw(), slot, "registered resource");
        Ok((slot as u32, true))
    }

    /// Release a resource, compacting the slot space.
    ///
    /// Returns the removed metadata and the remap every live record's slot
    /// field must be passed through. `None` if the resource was never
    /// registered.
    pub fn release(&mut self, id: ResourceId) -> Option<(M, SlotRemap)> {
        let slot = self.entries.remove(&id)?;
        let (_, metadata) = self.slots.remove(slot);

        // Re-link the identities that shifted down.
        for (shifted, (moved_id, _)) in self.slots.iter().enumerate().skip(slot) {
            self.entries.insert(*moved_id, shifted);
        }

        debug!(resource = id.raw(), slot, "released resource slot");
        Some((metadata, SlotRemap { removed: slot as u32 }))
    }

    /// The slot assigned to a resource.
    pub fn slot_of(&self, id: ResourceId) -> Option<u32> {
        self.entries.get(&id).map(|&slot| slot as u32)
    }

    /// Metadata for a resource.
    pub fn get(&self, id: ResourceId) -> Option<&M> {
        self.entries.get(&id).map(|&slot| &self.slots[slot].1)
    }

    /// Resource and metadata at a slot.
    pub fn get_by_slot(&self, slot: u32) -> Option<(ResourceId, &M)> {
        self.slots.get(slot as usize).map(|(id, m)| (*id, m))
    }

    /// Iterate `(slot, resource, metadata)` in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, ResourceId, &M)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(slot, (id, m))| (slot as u32, *id, m))
    }

    /// Number of registered resources.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no resources are registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The fixed slot ceiling.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Compaction table produced by releasing one slot.
///
/// Slots above the removed one shift down by one; the removed slot itself
/// must no longer be referenced by any live record when the remap is
/// applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotRemap {
    removed: u32,
}

impl SlotRemap {
    /// The slot that was freed.
    pub fn removed(&self) -> u32 {
        self.removed
    }

    /// Map a pre-release slot index to its post-release value.
    #[inline]
    pub fn remap(&self, slot: u32) -> u32 {
        debug_assert_ne!(slot, self.removed, "remap applied to a freed slot");
        if slot > self.removed {
            slot - 1
        } else {
            slot
        }
    }

    /// Slots at or above the freed one, whose bindings moved.
    pub fn shifted_from(&self) -> u32 {
        self.removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> ResourceId {
        ResourceId::from_raw(raw)
    }

    #[test]
    fn register_is_idempotent() {
        let mut table = ResourceTable::with_capacity(4);
        let (slot, added) = table.register(id(7), || "seven").unwrap();
        assert!(added);
        let (again, added) = table.register(id(7), || unreachable!()).unwrap();
        assert!(!added);
        assert_eq!(slot, again);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn slots_are_dense_and_stable() {
        let mut table = ResourceTable::with_capacity(4);
        assert_eq!(table.register(id(1), || 1).unwrap().0, 0);
        assert_eq!(table.register(id(2), || 2).unwrap().0, 1);
        assert_eq!(table.register(id(3), || 3).unwrap().0, 2);
        assert_eq!(table.slot_of(id(2)), Some(1));
    }

    #[test]
    fn ceiling_is_a_hard_error() {
        let mut table = ResourceTable::with_capacity(2);
        table.register(id(1), || ()).unwrap();
        table.register(id(2), || ()).unwrap();
        assert!(matches!(
            table.register(id(3), || ()),
            Err(GpuError::SlotCeilingExceeded { used: 2, capacity: 2 })
        ));
    }

    #[test]
    fn release_compacts_and_remaps() {
        let mut table = ResourceTable::with_capacity(4);
        table.register(id(1), || 'a').unwrap();
        table.register(id(2), || 'b').unwrap();
        table.register(id(3), || 'c').unwrap();

        let (meta, remap) = table.release(id(2)).unwrap();
        assert_eq!(meta, 'b');
        assert_eq!(remap.removed(), 1);
        assert_eq!(remap.remap(0), 0);
        assert_eq!(remap.remap(2), 1);

        // id(3) shifted down into slot 1 and stays reachable.
        assert_eq!(table.slot_of(id(3)), Some(1));
        assert_eq!(table.get_by_slot(1), Some((id(3), &'c')));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn release_unknown_is_none() {
        let mut table = ResourceTable::<()>::with_capacity(2);
        assert!(table.release(id(9)).is_none());
    }
}
