//! The instance registry: compact record array, resource grouping, handle
//! indirection, dirty tracking, and batched draw emission.

use std::mem::size_of;
use std::sync::Arc;

use bytemuck::Pod;
use hashbrown::HashMap;
use lumora_core::ResourceId;
use lumora_gpu::{InstanceDevice, Result};
use parking_lot::Mutex;
use tracing::trace;

use crate::handle::InstanceHandle;
use crate::mirror::{DeviceMirror, MirrorConfig};
use crate::record::{InstanceRecord, SlotIndexed};
use crate::table::SlotRemap;

const NO_HANDLE: u32 = u32::MAX;

/// Contiguous run of records referencing one resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceGroup {
    /// Index of the group's first record.
    pub first_record_index: usize,
    /// Number of records in the group.
    pub record_count: usize,
}

/// One draw command covering all contiguous instances of a resource group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawBatch {
    /// The resource every instance in the batch references.
    pub resource: ResourceId,
    /// First instance index in the record array.
    pub first_instance: u32,
    /// Number of instances.
    pub instance_count: u32,
}

/// Generation-checked key into the registry's handle table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstanceKey {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// What a destroy did, so specializations can release per-resource state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DestroyOutcome {
    /// The resource the destroyed record referenced.
    pub resource: ResourceId,
    /// Whether this was the resource's last instance (its group is gone).
    pub group_emptied: bool,
}

/// Handle-table entry: stable key -> current byte offset.
///
/// Handles never point into the record array directly; inserts and
/// destroys patch only this table, so caller-held handles stay valid while
/// the array compacts under them.
struct HandleSlot {
    generation: u32,
    occupied: bool,
    byte_offset: u64,
    resource: ResourceId,
    next_free: u32,
}

/// Alias so the handle module can name the shared state type.
pub(crate) type RegistryStateFor<R> = RegistryState<R>;

pub(crate) struct RegistryState<R: InstanceRecord> {
    /// Live records followed by one end marker.
    records: Vec<R>,
    groups: HashMap<ResourceId, ResourceGroup>,
    handles: Vec<HandleSlot>,
    free_head: u32,
    mirror: DeviceMirror,
}

impl<R: InstanceRecord> RegistryState<R> {
    const RECORD_SIZE: u64 = size_of::<R>() as u64;

    fn new(config: MirrorConfig) -> Self {
        Self {
            records: vec![R::end_marker()],
            groups: HashMap::new(),
            handles: Vec::new(),
            free_head: NO_HANDLE,
            mirror: DeviceMirror::new(config, size_of::<R>(), R::LABEL),
        }
    }

    /// Live record count (end marker excluded).
    fn len(&self) -> usize {
        self.records.len() - 1
    }

    fn resolve(&self, key: InstanceKey) -> Option<&HandleSlot> {
        let slot = self.handles.get(key.index as usize)?;
        (slot.occupied && slot.generation == key.generation).then_some(slot)
    }

    fn alloc_handle(&mut self, byte_offset: u64, resource: ResourceId) -> InstanceKey {
        if self.free_head != NO_HANDLE {
            let index = self.free_head;
            let slot = &mut self.handles[index as usize];
            self.free_head = slot.next_free;
            slot.occupied = true;
            slot.byte_offset = byte_offset;
            slot.resource = resource;
            return InstanceKey {
                index,
                generation: slot.generation,
            };
        }

        let index = self.handles.len() as u32;
        self.handles.push(HandleSlot {
            generation: 0,
            occupied: true,
            byte_offset,
            resource,
            next_free: NO_HANDLE,
        });
        InstanceKey {
            index,
            generation: 0,
        }
    }

    fn free_handle(&mut self, key: InstanceKey) {
        let slot = &mut self.handles[key.index as usize];
        slot.occupied = false;
        slot.generation = slot.generation.wrapping_add(1);
        slot.next_free = self.free_head;
        self.free_head = key.index;
    }

    pub(crate) fn instantiate(&mut self, resource: ResourceId, record: R) -> InstanceKey {
        let total = self.len();

        // New groups are appended at the current end of the array.
        let group = self.groups.entry(resource).or_insert(ResourceGroup {
            first_record_index: total,
            record_count: 0,
        });
        let insertion = group.first_record_index + group.record_count;
        group.record_count += 1;

        // Everything at or past the insertion point slides forward one
        // record: later groups, the tail of the array (end marker
        // included), and every live handle offset.
        for (id, group) in self.groups.iter_mut() {
            if *id != resource && group.first_record_index >= insertion {
                group.first_record_index += 1;
            }
        }
        self.records.insert(insertion, record);

        let insertion_byte = insertion as u64 * Self::RECORD_SIZE;
        for slot in &mut self.handles {
            if slot.occupied && slot.byte_offset >= insertion_byte {
                slot.byte_offset += Self::RECORD_SIZE;
            }
        }

        self.mirror
            .mark_dirty(insertion_byte, self.records.len() as u64 * Self::RECORD_SIZE);

        trace!(
            resource = resource.raw(),
            index = insertion,
            total = total + 1,
            "instantiated record"
        );
        self.alloc_handle(insertion_byte, resource)
    }

    pub(crate) fn destroy(&mut self, key: InstanceKey) -> Option<DestroyOutcome> {
        let slot = self.resolve(key)?;
        let byte_offset = slot.byte_offset;
        let resource = slot.resource;

        debug_assert_eq!(
            byte_offset % Self::RECORD_SIZE,
            0,
            "handle offset lost record alignment"
        );
        let index = (byte_offset / Self::RECORD_SIZE) as usize;
        debug_assert!(index < self.len(), "handle offset past the record array");

        let group_emptied = {
            let Some(group) = self.groups.get_mut(&resource) else {
                debug_assert!(false, "live handle without a group");
                return None;
            };
            debug_assert!(
                (group.first_record_index..group.first_record_index + group.record_count)
                    .contains(&index),
                "record escaped its resource group"
            );
            group.record_count -= 1;
            group.record_count == 0
        };
        if group_emptied {
            self.groups.remove(&resource);
        }

        self.records.remove(index);
        for group in self.groups.values_mut() {
            if group.first_record_index > index {
                group.first_record_index -= 1;
            }
        }
        for slot in &mut self.handles {
            if slot.occupied && slot.byte_offset > byte_offset {
                slot.byte_offset -= Self::RECORD_SIZE;
            }
        }
        self.free_handle(key);

        self.mirror
            .mark_dirty(byte_offset, self.records.len() as u64 * Self::RECORD_SIZE);

        trace!(
            resource = resource.raw(),
            index,
            group_emptied,
            "destroyed record"
        );
        Some(DestroyOutcome {
            resource,
            group_emptied,
        })
    }

    /// Write one field of a record, skipping the write (and the dirty
    /// marking) when the value is unchanged.
    ///
    /// Most callers push the same transform every frame; the read-compare
    /// keeps those idempotent writes out of the dirty region.
    pub(crate) fn write_field<F: Pod + PartialEq>(
        &mut self,
        key: InstanceKey,
        field_offset: usize,
        value: F,
    ) -> bool {
        let Some(slot) = self.resolve(key) else {
            return false;
        };
        let byte_offset = slot.byte_offset;
        let index = (byte_offset / Self::RECORD_SIZE) as usize;
        debug_assert!(field_offset + size_of::<F>() <= size_of::<R>());

        let bytes = bytemuck::bytes_of_mut(&mut self.records[index]);
        let field: &mut F =
            bytemuck::from_bytes_mut(&mut bytes[field_offset..field_offset + size_of::<F>()]);
        if *field == value {
            return false;
        }
        *field = value;

        let start = byte_offset + field_offset as u64;
        self.mirror.mark_dirty(start, start + size_of::<F>() as u64);
        true
    }

    pub(crate) fn read_field<F: Pod>(&self, key: InstanceKey, field_offset: usize) -> Option<F> {
        let slot = self.resolve(key)?;
        let index = (slot.byte_offset / Self::RECORD_SIZE) as usize;
        let bytes = bytemuck::bytes_of(&self.records[index]);
        Some(*bytemuck::from_bytes(
            &bytes[field_offset..field_offset + size_of::<F>()],
        ))
    }

    pub(crate) fn byte_offset(&self, key: InstanceKey) -> Option<u64> {
        self.resolve(key).map(|slot| slot.byte_offset)
    }

    pub(crate) fn resource(&self, key: InstanceKey) -> Option<ResourceId> {
        self.resolve(key).map(|slot| slot.resource)
    }

    fn renumber_slots(&mut self, remap: &SlotRemap)
    where
        R: SlotIndexed,
    {
        let total = self.len();
        let mut first_changed = usize::MAX;
        let mut last_changed = 0;

        for (index, record) in self.records[..total].iter_mut().enumerate() {
            let slot = record.slot();
            if slot == R::NO_SLOT {
                continue;
            }
            let renumbered = remap.remap(slot);
            if renumbered != slot {
                record.set_slot(renumbered);
                first_changed = first_changed.min(index);
                last_changed = last_changed.max(index + 1);
            }
        }

        if first_changed < last_changed {
            self.mirror.mark_dirty(
                first_changed as u64 * Self::RECORD_SIZE,
                last_changed as u64 * Self::RECORD_SIZE,
            );
            trace!(
                removed = remap.removed(),
                records = last_changed - first_changed,
                "renumbered record slots"
            );
        }
    }

    fn draw_batches(&self) -> Vec<DrawBatch> {
        let mut batches: Vec<DrawBatch> = self
            .groups
            .iter()
            .map(|(resource, group)| DrawBatch {
                resource: *resource,
                first_instance: group.first_record_index as u32,
                instance_count: group.record_count as u32,
            })
            .collect();
        // Draws respect array layout, not registration order.
        batches.sort_by_key(|batch| batch.first_instance);
        batches
    }

    fn flush(&mut self, device: &mut dyn InstanceDevice, frame: usize) -> Result<()> {
        let host: &[u8] = bytemuck::cast_slice(&self.records);
        self.mirror.flush(device, frame, host)
    }
}

/// Registry of device-mirrored instance records, grouped by resource.
///
/// Single logical owner, single-threaded frame loop: all mutations, the
/// flush, and draw emission happen on the same thread within a frame. The
/// internal lock exists for the weak-handle pattern, not for concurrent
/// mutation.
pub struct InstanceRegistry<R: InstanceRecord> {
    state: Arc<Mutex<RegistryState<R>>>,
}

impl<R: InstanceRecord> InstanceRegistry<R> {
    /// Create an empty registry whose mirror uses `config`.
    pub fn new(config: MirrorConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::new(config))),
        }
    }

    pub(crate) fn from_state(state: Arc<Mutex<RegistryState<R>>>) -> Self {
        Self { state }
    }

    /// Insert a record at the end of its resource's contiguous run.
    ///
    /// All previously issued handles keep resolving to their records; the
    /// returned handle is bound to the new record.
    pub fn instantiate(&self, resource: ResourceId, record: R) -> InstanceHandle<R> {
        let key = self.state.lock().instantiate(resource, record);
        InstanceHandle::new(Arc::downgrade(&self.state), key)
    }

    /// Rewrite every live record's slot field through `remap`.
    ///
    /// Must run in the same frame as the release that produced the remap,
    /// before the next flush.
    pub fn renumber_slots(&self, remap: &SlotRemap)
    where
        R: SlotIndexed,
    {
        self.state.lock().renumber_slots(remap);
    }

    /// One batch per resource group, in ascending first-index order.
    pub fn draw_batches(&self) -> Vec<DrawBatch> {
        self.state.lock().draw_batches()
    }

    /// Once per frame: grow the device buffer if needed and upload the
    /// pending dirty range for `frame`'s mirror slot.
    pub fn flush(&self, device: &mut dyn InstanceDevice, frame: usize) -> Result<()> {
        self.state.lock().flush(device, frame)
    }

    /// Destroy the mirror's device buffers.
    pub fn destroy_buffers(&self, device: &mut dyn InstanceDevice) -> Result<()> {
        self.state.lock().mirror.destroy(device)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    /// Whether the registry holds no live records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of resource groups.
    pub fn group_count(&self) -> usize {
        self.state.lock().groups.len()
    }

    /// The group for a resource, if it has live records.
    pub fn group(&self, resource: ResourceId) -> Option<ResourceGroup> {
        self.state.lock().groups.get(&resource).copied()
    }

    /// Copy of the record at `index` (end marker addressable at `len()`).
    pub fn record_at(&self, index: usize) -> Option<R> {
        self.state.lock().records.get(index).copied()
    }

    /// Copy of all live records in array order.
    pub fn records(&self) -> Vec<R> {
        let state = self.state.lock();
        let total = state.len();
        state.records[..total].to_vec()
    }

    /// The buffer backing a mirror frame slot, for frame drivers that bind
    /// per frame.
    pub fn buffer(&self, frame: usize) -> Option<lumora_gpu::BufferId> {
        self.state.lock().mirror.buffer(frame)
    }

    /// Mirror capacity of a frame slot in records.
    pub fn capacity_records(&self, frame: usize) -> usize {
        self.state.lock().mirror.capacity_records(frame)
    }

    /// Pending dirty range of a mirror frame slot.
    pub fn pending(&self, frame: usize) -> crate::dirty::ByteRange {
        self.state.lock().mirror.pending(frame)
    }
}

impl<R: InstanceRecord> Clone for InstanceRegistry<R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::MirrorConfig;
    use crate::record::SlotIndexed;
    use crate::table::ResourceTable;
    use lumora_gpu::BindingPoint;
    use lumora_test::MockDevice;

    /// Minimal slot-indexed record for exercising the registry.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    struct ProbeRecord {
        position: [f32; 3],
        slot: u32,
    }

    impl InstanceRecord for ProbeRecord {
        const LABEL: &'static str = "probe_instances";

        fn end_marker() -> Self {
            Self {
                position: [0.0; 3],
                slot: Self::NO_SLOT,
            }
        }
    }

    impl SlotIndexed for ProbeRecord {
        fn slot(&self) -> u32 {
            self.slot
        }

        fn set_slot(&mut self, slot: u32) {
            self.slot = slot;
        }
    }

    const RECORD: u64 = size_of::<ProbeRecord>() as u64;

    fn registry(floor: usize) -> InstanceRegistry<ProbeRecord> {
        lumora_test::init_test_logging();
        let config = MirrorConfig {
            binding: BindingPoint::new(0, 0),
            floor_records: floor,
            frames_in_flight: 1,
        };
        InstanceRegistry::new(config)
    }

    fn probe(x: f32, slot: u32) -> ProbeRecord {
        ProbeRecord {
            position: [x, 0.0, 0.0],
            slot,
        }
    }

    fn id(raw: u64) -> ResourceId {
        ResourceId::from_raw(raw)
    }

    /// Host array bytes, end marker included, as the device should see them.
    fn host_bytes(registry: &InstanceRegistry<ProbeRecord>) -> Vec<u8> {
        let mut records = registry.records();
        records.push(ProbeRecord::end_marker());
        bytemuck::cast_slice(&records).to_vec()
    }

    fn assert_handle_consistent(
        registry: &InstanceRegistry<ProbeRecord>,
        handle: &InstanceHandle<ProbeRecord>,
        resource: ResourceId,
    ) {
        let offset = handle.byte_offset().expect("handle should be live");
        assert_eq!(offset % RECORD, 0);
        let index = (offset / RECORD) as usize;
        assert!(index < registry.len());
        let group = registry.group(resource).expect("group should exist");
        assert!(
            (group.first_record_index..group.first_record_index + group.record_count)
                .contains(&index),
            "record index {index} outside its group {group:?}"
        );
    }

    #[test]
    fn groups_stay_contiguous_under_interleaving() {
        let registry = registry(32);
        let (a, b) = (id(1), id(2));

        // Interleave three A with two B.
        let handles = [
            (a, registry.instantiate(a, probe(0.0, 0))),
            (b, registry.instantiate(b, probe(10.0, 1))),
            (a, registry.instantiate(a, probe(1.0, 0))),
            (b, registry.instantiate(b, probe(11.0, 1))),
            (a, registry.instantiate(a, probe(2.0, 0))),
        ];

        assert_eq!(registry.len(), 5);
        let group_a = registry.group(a).unwrap();
        let group_b = registry.group(b).unwrap();
        assert_eq!(group_a.record_count, 3);
        assert_eq!(group_b.record_count, 2);

        // Contiguous per resource, jointly covering [0, 5).
        let records = registry.records();
        for index in group_a.first_record_index..group_a.first_record_index + 3 {
            assert_eq!(records[index].slot, 0);
        }
        for index in group_b.first_record_index..group_b.first_record_index + 2 {
            assert_eq!(records[index].slot, 1);
        }
        let mut firsts = [group_a, group_b];
        firsts.sort_by_key(|g| g.first_record_index);
        assert_eq!(firsts[0].first_record_index, 0);
        assert_eq!(
            firsts[1].first_record_index,
            firsts[0].record_count
        );

        for (resource, handle) in &handles {
            assert_handle_consistent(&registry, handle, *resource);
        }
    }

    #[test]
    fn destroy_middle_shifts_survivors() {
        let registry = registry(32);
        let a = id(1);

        let first = registry.instantiate(a, probe(0.0, 0));
        let middle = registry.instantiate(a, probe(1.0, 0));
        let last = registry.instantiate(a, probe(2.0, 0));

        let outcome = middle.destroy().unwrap();
        assert!(!outcome.group_emptied);
        assert_eq!(registry.group(a).unwrap().record_count, 2);
        assert_eq!(registry.len(), 2);

        // Survivors resolve to the correct, now-shifted data.
        assert_eq!(first.read_field::<f32>(0), Some(0.0));
        assert_eq!(last.read_field::<f32>(0), Some(2.0));
        assert_eq!(last.byte_offset(), Some(RECORD));
        assert_handle_consistent(&registry, &first, a);
        assert_handle_consistent(&registry, &last, a);
    }

    #[test]
    fn destroying_the_last_instance_empties_the_group() {
        let registry = registry(32);
        let a = id(1);

        let handle = registry.instantiate(a, probe(0.0, 0));
        let outcome = handle.destroy().unwrap();

        assert!(outcome.group_emptied);
        assert_eq!(outcome.resource, a);
        assert!(registry.group(a).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn offsets_stay_consistent_across_churn() {
        let registry = registry(32);
        let (a, b, c) = (id(1), id(2), id(3));

        let mut live = vec![
            (a, registry.instantiate(a, probe(0.0, 0))),
            (b, registry.instantiate(b, probe(10.0, 1))),
            (c, registry.instantiate(c, probe(20.0, 2))),
            (a, registry.instantiate(a, probe(1.0, 0))),
            (b, registry.instantiate(b, probe(11.0, 1))),
        ];

        // Drop one of each in arbitrary order, checking after each step.
        for victim in [1usize, 2, 0] {
            let (_, handle) = live.remove(victim);
            handle.destroy().unwrap();
            for (resource, handle) in &live {
                assert_handle_consistent(&registry, handle, *resource);
            }
        }
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn end_marker_survives_churn() {
        let registry = registry(32);
        let a = id(1);

        let first = registry.instantiate(a, probe(0.0, 0));
        registry.instantiate(a, probe(1.0, 0));
        first.destroy().unwrap();
        registry.instantiate(a, probe(2.0, 0));

        assert_eq!(
            registry.record_at(registry.len()),
            Some(ProbeRecord::end_marker())
        );
    }

    #[test]
    fn flush_reproduces_host_bytes() {
        let registry = registry(8);
        let mut device = MockDevice::new();
        let (a, b) = (id(1), id(2));

        registry.instantiate(a, probe(0.5, 0));
        registry.instantiate(b, probe(1.5, 1));
        registry.instantiate(a, probe(2.5, 0));
        registry.flush(&mut device, 0).unwrap();

        let expected = host_bytes(&registry);
        let buffer = registry.buffer(0).unwrap();
        assert_eq!(&device.bytes(buffer)[..expected.len()], &expected[..]);
        assert!(registry.pending(0).is_empty());
    }

    #[test]
    fn unflushed_bytes_outside_dirty_region_stay_put() {
        let registry = registry(8);
        let mut device = MockDevice::new();
        let a = id(1);

        let first = registry.instantiate(a, probe(0.5, 0));
        registry.instantiate(a, probe(1.5, 0));
        registry.flush(&mut device, 0).unwrap();
        device.uploads.clear();

        // Only the first record's position changes; the upload must not
        // touch the second record's bytes.
        first.write_field(0, [9.0f32, 0.0, 0.0]);
        registry.flush(&mut device, 0).unwrap();

        assert_eq!(device.uploads.len(), 1);
        assert_eq!(device.uploads[0].offset, 0);
        assert_eq!(device.uploads[0].len, 12);
        let expected = host_bytes(&registry);
        let buffer = registry.buffer(0).unwrap();
        assert_eq!(&device.bytes(buffer)[..expected.len()], &expected[..]);
    }

    #[test]
    fn idempotent_update_leaves_dirty_empty() {
        let registry = registry(8);
        let mut device = MockDevice::new();
        let a = id(1);

        let handle = registry.instantiate(a, probe(3.0, 0));
        registry.flush(&mut device, 0).unwrap();

        assert!(!handle.write_field(0, [3.0f32, 0.0, 0.0]));
        assert!(registry.pending(0).is_empty());

        assert!(handle.write_field(0, [4.0f32, 0.0, 0.0]));
        assert!(!registry.pending(0).is_empty());
    }

    #[test]
    fn growth_covers_the_full_record_range() {
        let registry = registry(32);
        let mut device = MockDevice::new();
        let a = id(1);

        for i in 0..40 {
            registry.instantiate(a, probe(i as f32, 0));
        }
        registry.flush(&mut device, 0).unwrap();

        // Next power of two above 41 records (40 live + marker).
        assert_eq!(registry.capacity_records(0), 64);
        assert_eq!(device.uploads.len(), 1);
        assert_eq!(device.uploads[0].offset, 0);
        assert_eq!(device.uploads[0].len, 41 * RECORD as usize);
    }

    #[test]
    fn growth_preserves_previously_uploaded_data() {
        let registry = registry(4);
        let mut device = MockDevice::new();
        let a = id(1);

        for i in 0..3 {
            registry.instantiate(a, probe(i as f32, 0));
        }
        registry.flush(&mut device, 0).unwrap();

        for i in 3..12 {
            registry.instantiate(a, probe(i as f32, 0));
        }
        registry.flush(&mut device, 0).unwrap();

        let expected = host_bytes(&registry);
        let buffer = registry.buffer(0).unwrap();
        assert_eq!(&device.bytes(buffer)[..expected.len()], &expected[..]);
    }

    #[test]
    fn dead_handles_are_silent_noops() {
        let registry = registry(8);
        let a = id(1);

        let handle = registry.instantiate(a, probe(0.0, 0));
        let clone = handle.clone();
        assert!(handle.destroy().is_some());

        // Second destroy, updates, and reads all no-op.
        assert!(clone.destroy().is_none());
        assert!(!clone.write_field(0, [5.0f32, 0.0, 0.0]));
        assert!(clone.read_field::<f32>(0).is_none());
        assert!(clone.byte_offset().is_none());
        assert!(!clone.is_live());
    }

    #[test]
    fn handle_survives_registry_teardown() {
        let a = id(1);
        let handle = {
            let registry = registry(8);
            registry.instantiate(a, probe(0.0, 0))
        };

        assert!(!handle.is_live());
        assert!(handle.destroy().is_none());
        assert!(!handle.write_field(0, [1.0f32, 0.0, 0.0]));
        assert!(handle.registry().is_none());
    }

    #[test]
    fn reused_handle_slots_do_not_resurrect_old_keys() {
        let registry = registry(8);
        let a = id(1);

        let stale = registry.instantiate(a, probe(0.0, 0));
        stale.destroy().unwrap();

        // The freed table slot gets reused by the next instance.
        let fresh = registry.instantiate(a, probe(1.0, 0));
        assert!(!stale.is_live());
        assert!(fresh.is_live());
        assert!(stale.read_field::<f32>(0).is_none());
        assert_eq!(fresh.read_field::<f32>(0), Some(1.0));
    }

    #[test]
    fn draw_batches_follow_array_order() {
        let registry = registry(32);
        let (a, b, c) = (id(1), id(2), id(3));

        registry.instantiate(b, probe(0.0, 1));
        registry.instantiate(a, probe(1.0, 0));
        registry.instantiate(c, probe(2.0, 2));
        registry.instantiate(b, probe(3.0, 1));

        let batches = registry.draw_batches();
        assert_eq!(batches.len(), 3);
        // Ascending first-index order, one batch per group, counts match.
        assert_eq!(batches[0].first_instance, 0);
        assert_eq!(batches[0].resource, b);
        assert_eq!(batches[0].instance_count, 2);
        assert_eq!(batches[1].first_instance, 2);
        assert_eq!(batches[2].first_instance, 3);
        let covered: u32 = batches.iter().map(|b| b.instance_count).sum();
        assert_eq!(covered as usize, registry.len());
    }

    #[test]
    fn slot_renumbering_rewrites_live_records() {
        let registry = registry(8);
        let mut device = MockDevice::new();
        let mut table = ResourceTable::with_capacity(8);
        let (a, b, c) = (id(1), id(2), id(3));

        let mut handles = Vec::new();
        for resource in [a, b, c] {
            let (slot, _) = table.register(resource, || ()).unwrap();
            handles.push(registry.instantiate(resource, probe(slot as f32, slot)));
            handles.push(registry.instantiate(resource, probe(slot as f32, slot)));
        }
        registry.flush(&mut device, 0).unwrap();

        // Drop both instances of b; its group empties, so its table slot
        // is released and every c record must renumber from 2 to 1.
        handles[2].destroy().unwrap();
        let outcome = handles[3].destroy().unwrap();
        assert!(outcome.group_emptied);
        let (_, remap) = table.release(b).unwrap();
        registry.renumber_slots(&remap);

        let records = registry.records();
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|record| record.slot != 2));
        let group_c = registry.group(c).unwrap();
        for index in group_c.first_record_index..group_c.first_record_index + 2 {
            assert_eq!(records[index].slot, 1);
        }

        // The renumbering lands on the device in the same flush pass.
        registry.flush(&mut device, 0).unwrap();
        let expected = host_bytes(&registry);
        let buffer = registry.buffer(0).unwrap();
        assert_eq!(&device.bytes(buffer)[..expected.len()], &expected[..]);
    }
}
