//! Shadow-map entries.
//!
//! Each record carries one light projection and its cascade metadata, plus
//! the slot of the shadow map it samples from in the bindless map array.
//! Maps are shared: several entries (cascades of one light, for instance)
//! can reference the same slot; the slot is released when the map's last
//! entry goes away.

use std::mem::offset_of;
use std::sync::{Arc, Weak};

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use lumora_core::ResourceId;
use lumora_gpu::{BufferId, InstanceDevice, ResourceBinder, Result, TextureBinding};
use lumora_instance::{
    InstanceHandle, InstanceRecord, InstanceRegistry, MirrorConfig, ResourceTable, SlotIndexed,
};
use parking_lot::Mutex;

/// Shadow-map array ceiling. Matches the descriptor array size the device
/// backend was configured with.
pub const MAX_SHADOW_MAPS: usize = 256;

/// GPU-side data for one shadow-map entry.
///
/// Layout must match the shader struct exactly.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ShadowEntryRecord {
    /// World-to-shadow-clip matrix.
    pub matrix: Mat4,
    /// Shadow-clip-to-world matrix.
    pub inverse_matrix: Mat4,
    /// Slot into the shadow-map array; `NO_SLOT` on the end marker.
    pub map_index: u32,
    /// Number of cascades rooted at this entry; zero for non-root entries.
    pub cascade_count: u32,
    /// Far distance of this entry's cascade.
    pub cascade_split: f32,
    /// Pads the record to a 16-byte multiple.
    pub reserved: u32,
}

impl ShadowEntryRecord {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    fn new(matrix: Mat4, map_index: u32) -> Self {
        Self {
            matrix,
            inverse_matrix: matrix.inverse(),
            map_index,
            cascade_count: 0,
            cascade_split: 0.0,
            reserved: 0,
        }
    }
}

impl InstanceRecord for ShadowEntryRecord {
    const LABEL: &'static str = "shadow_entries";

    fn end_marker() -> Self {
        Self {
            map_index: Self::NO_SLOT,
            ..Self::zeroed()
        }
    }
}

impl SlotIndexed for ShadowEntryRecord {
    fn slot(&self) -> u32 {
        self.map_index
    }

    fn set_slot(&mut self, slot: u32) {
        self.map_index = slot;
    }
}

const MATRIX_OFFSET: usize = offset_of!(ShadowEntryRecord, matrix);
const INVERSE_OFFSET: usize = offset_of!(ShadowEntryRecord, inverse_matrix);
const MAP_INDEX_OFFSET: usize = offset_of!(ShadowEntryRecord, map_index);
const CASCADE_COUNT_OFFSET: usize = offset_of!(ShadowEntryRecord, cascade_count);
const CASCADE_SPLIT_OFFSET: usize = offset_of!(ShadowEntryRecord, cascade_split);

/// Map slots plus the descriptor traffic owed to the device.
///
/// Binds and unbinds are queued here and drained at flush, so slot churn
/// mid-frame never races the command stream.
struct MapTable {
    table: ResourceTable<TextureBinding>,
    pending_binds: Vec<(u32, TextureBinding)>,
    pending_unbinds: Vec<u32>,
}

/// Caller-held capability for one shadow-map entry.
#[derive(Clone)]
pub struct ShadowEntry {
    handle: InstanceHandle<ShadowEntryRecord>,
    maps: Weak<Mutex<MapTable>>,
}

impl ShadowEntry {
    /// Replace the light matrix. Writes the inverse alongside. Unchanged
    /// matrices are skipped; returns whether anything was written.
    pub fn set_matrix(&self, matrix: Mat4) -> bool {
        let changed = self.handle.write_field(MATRIX_OFFSET, matrix);
        if changed {
            self.handle.write_field(INVERSE_OFFSET, matrix.inverse());
        }
        changed
    }

    /// The current light matrix, while the entry is live.
    pub fn matrix(&self) -> Option<Mat4> {
        self.handle.read_field(MATRIX_OFFSET)
    }

    /// Mark this entry as the root of a cascade chain of `cascade_count`
    /// entries (itself included).
    pub fn make_root(&self, cascade_count: u32) -> bool {
        self.handle.write_field(CASCADE_COUNT_OFFSET, cascade_count)
    }

    /// Set the far distance of this entry's cascade.
    pub fn set_cascade_split(&self, split: f32) -> bool {
        self.handle.write_field(CASCADE_SPLIT_OFFSET, split)
    }

    /// The map-array slot this entry samples from.
    pub fn map_slot(&self) -> Option<u32> {
        self.handle.read_field(MAP_INDEX_OFFSET)
    }

    /// The shadow map this entry references.
    pub fn map(&self) -> Option<ResourceId> {
        self.handle.resource()
    }

    /// Whether the entry is still live.
    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    /// Remove the entry. Releasing a map's last entry frees its slot:
    /// live records are renumbered immediately, and the descriptor
    /// unbind/rebinds are queued for the next flush.
    pub fn destroy(self) {
        let registry = self.handle.registry();
        let Some(outcome) = self.handle.destroy() else {
            return;
        };
        if !outcome.group_emptied {
            return;
        }
        let Some(maps) = self.maps.upgrade() else {
            return;
        };
        let mut maps = maps.lock();
        let Some((_, remap)) = maps.table.release(outcome.resource) else {
            return;
        };
        if let Some(registry) = registry {
            registry.renumber_slots(&remap);
        }
        maps.pending_unbinds.push(remap.removed());
        // Compaction moved every binding at or above the freed slot down
        // one; their descriptors must follow.
        let rebinds: Vec<_> = maps
            .table
            .iter()
            .filter(|(slot, _, _)| *slot >= remap.shifted_from())
            .map(|(slot, _, texture)| (slot, *texture))
            .collect();
        maps.pending_binds.extend(rebinds);
    }
}

/// All shadow-map entries, mirrored to one device buffer, plus the map
/// array's slot assignments.
pub struct ShadowMapSet {
    registry: InstanceRegistry<ShadowEntryRecord>,
    maps: Arc<Mutex<MapTable>>,
}

impl ShadowMapSet {
    /// Create an empty set whose mirror uses `config`.
    pub fn new(config: MirrorConfig) -> Self {
        Self {
            registry: InstanceRegistry::new(config),
            maps: Arc::new(Mutex::new(MapTable {
                table: ResourceTable::with_capacity(MAX_SHADOW_MAPS),
                pending_binds: Vec::new(),
                pending_unbinds: Vec::new(),
            })),
        }
    }

    /// Add an entry sampling from `map`.
    ///
    /// First use of a map assigns it a slot and queues `texture` for
    /// binding at the next flush; later uses share the slot and ignore
    /// `texture`.
    pub fn instantiate(
        &self,
        map: ResourceId,
        texture: TextureBinding,
        matrix: Mat4,
    ) -> Result<ShadowEntry> {
        let slot = {
            let mut maps = self.maps.lock();
            let (slot, newly_added) = maps.table.register(map, || texture)?;
            if newly_added {
                maps.pending_binds.push((slot, texture));
            }
            slot
        };
        let handle = self
            .registry
            .instantiate(map, ShadowEntryRecord::new(matrix, slot));
        Ok(ShadowEntry {
            handle,
            maps: Arc::downgrade(&self.maps),
        })
    }

    /// Once per frame: drain queued descriptor traffic, then grow and
    /// upload the record mirror for `frame`'s slot.
    pub fn flush<D: InstanceDevice + ResourceBinder>(
        &self,
        device: &mut D,
        frame: usize,
    ) -> Result<()> {
        let (unbinds, binds) = {
            let mut maps = self.maps.lock();
            (
                std::mem::take(&mut maps.pending_unbinds),
                std::mem::take(&mut maps.pending_binds),
            )
        };
        for slot in unbinds {
            device.unbind_texture(slot)?;
        }
        for (slot, texture) in binds {
            device.bind_texture(slot, texture)?;
        }
        self.registry.flush(device, frame)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether no entries are live.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Number of occupied map slots.
    pub fn map_count(&self) -> usize {
        self.maps.lock().table.len()
    }

    /// Copy of all live records in array order.
    pub fn records(&self) -> Vec<ShadowEntryRecord> {
        self.registry.records()
    }

    /// The buffer backing a mirror frame slot, for per-frame binding.
    pub fn buffer(&self, frame: usize) -> Option<BufferId> {
        self.registry.buffer(frame)
    }

    /// Destroy the mirror's device buffers.
    pub fn destroy_buffers(&self, device: &mut dyn InstanceDevice) -> Result<()> {
        self.registry.destroy_buffers(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumora_gpu::BindingPoint;
    use lumora_test::MockDevice;

    fn set() -> ShadowMapSet {
        lumora_test::init_test_logging();
        ShadowMapSet::new(MirrorConfig::new(BindingPoint::new(0, 1)))
    }

    fn id(raw: u64) -> ResourceId {
        ResourceId::from_raw(raw)
    }

    fn texture(raw: u64) -> TextureBinding {
        TextureBinding {
            image: raw,
            sampler: 100 + raw,
        }
    }

    #[test]
    fn record_layout() {
        assert_eq!(ShadowEntryRecord::SIZE, 144);
        assert_eq!(offset_of!(ShadowEntryRecord, matrix), 0);
        assert_eq!(offset_of!(ShadowEntryRecord, inverse_matrix), 64);
        assert_eq!(offset_of!(ShadowEntryRecord, map_index), 128);
        assert_eq!(offset_of!(ShadowEntryRecord, cascade_count), 132);
        assert_eq!(offset_of!(ShadowEntryRecord, cascade_split), 136);
        assert_eq!(ShadowEntryRecord::end_marker().map_index, u32::MAX);
    }

    #[test]
    fn first_use_of_a_map_binds_its_texture() {
        let set = set();
        let mut device = MockDevice::new();
        let map = id(1);

        let entry = set.instantiate(map, texture(1), Mat4::IDENTITY).unwrap();
        set.flush(&mut device, 0).unwrap();

        assert_eq!(device.texture_binds, vec![(0, texture(1))]);
        assert_eq!(entry.map_slot(), Some(0));

        // A second entry on the same map shares the slot without rebinding.
        device.clear_journal();
        let second = set.instantiate(map, texture(9), Mat4::IDENTITY).unwrap();
        set.flush(&mut device, 0).unwrap();
        assert!(device.texture_binds.is_empty());
        assert_eq!(second.map_slot(), Some(0));
        assert_eq!(set.map_count(), 1);
    }

    #[test]
    fn releasing_a_map_compacts_slots_and_descriptors() {
        let set = set();
        let mut device = MockDevice::new();
        let (a, b, c) = (id(1), id(2), id(3));

        let _entry_a = set.instantiate(a, texture(1), Mat4::IDENTITY).unwrap();
        let entry_b = set.instantiate(b, texture(2), Mat4::IDENTITY).unwrap();
        let entry_c = set.instantiate(c, texture(3), Mat4::IDENTITY).unwrap();
        set.flush(&mut device, 0).unwrap();
        device.clear_journal();

        // b's only entry goes away: slot 1 is freed and c shifts 2 -> 1.
        entry_b.destroy();

        assert_eq!(set.map_count(), 2);
        assert_eq!(entry_c.map_slot(), Some(1));
        assert!(set.records().iter().all(|record| record.map_index != 2));

        set.flush(&mut device, 0).unwrap();
        assert_eq!(device.texture_unbinds, vec![1]);
        assert_eq!(device.texture_binds, vec![(1, texture(3))]);

        // The renumbered records landed on the device in the same flush.
        let mut expected = set.records();
        expected.push(ShadowEntryRecord::end_marker());
        let expected: &[u8] = bytemuck::cast_slice(&expected);
        let buffer = set.buffer(0).unwrap();
        assert_eq!(&device.bytes(buffer)[..expected.len()], expected);
    }

    #[test]
    fn shared_slot_survives_until_the_last_entry() {
        let set = set();
        let mut device = MockDevice::new();
        let map = id(1);

        let first = set.instantiate(map, texture(1), Mat4::IDENTITY).unwrap();
        let second = set.instantiate(map, texture(1), Mat4::IDENTITY).unwrap();
        set.flush(&mut device, 0).unwrap();
        device.clear_journal();

        first.destroy();
        set.flush(&mut device, 0).unwrap();
        assert!(device.texture_unbinds.is_empty());
        assert_eq!(set.map_count(), 1);

        second.destroy();
        set.flush(&mut device, 0).unwrap();
        assert_eq!(device.texture_unbinds, vec![0]);
        assert_eq!(set.map_count(), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn cascade_metadata_writes_are_field_granular() {
        let set = set();
        let mut device = MockDevice::new();
        let map = id(1);

        let root = set.instantiate(map, texture(1), Mat4::IDENTITY).unwrap();
        set.flush(&mut device, 0).unwrap();
        device.clear_journal();

        assert!(root.make_root(4));
        assert!(root.set_cascade_split(25.0));
        set.flush(&mut device, 0).unwrap();

        // cascade_count and cascade_split are adjacent; one coalesced upload.
        assert_eq!(device.uploads.len(), 1);
        assert_eq!(device.uploads[0].offset, CASCADE_COUNT_OFFSET as u64);
        assert_eq!(device.uploads[0].len, 8);

        // Unchanged re-writes stay off the wire.
        assert!(!root.make_root(4));
        assert!(!root.set_cascade_split(25.0));
    }

    #[test]
    fn matrix_update_writes_both_matrices() {
        let set = set();
        let map = id(1);

        let entry = set.instantiate(map, texture(1), Mat4::IDENTITY).unwrap();
        let light = Mat4::from_translation(glam::Vec3::new(0.0, 10.0, 0.0));
        assert!(entry.set_matrix(light));

        assert_eq!(entry.matrix(), Some(light));
        let records = set.records();
        assert_eq!(records[0].inverse_matrix, light.inverse());
    }

    #[test]
    fn destroyed_entries_are_silent_noops() {
        let set = set();
        let map = id(1);

        let entry = set.instantiate(map, texture(1), Mat4::IDENTITY).unwrap();
        let clone = entry.clone();
        entry.destroy();

        assert!(!clone.is_live());
        assert!(!clone.set_matrix(Mat4::IDENTITY));
        assert!(clone.map_slot().is_none());
        clone.destroy();
        assert_eq!(set.map_count(), 0);
    }
}
