//! Signed-distance-field entries.
//!
//! Ray marching samples fields in object space, so each record carries the
//! world-to-object transform, the object-space bounds, and the slot of the
//! field volume in the bindless field array. Fields are shared between
//! instances; a slot is released with its last instance.

use std::mem::offset_of;
use std::sync::{Arc, Weak};

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use lumora_core::{Aabb, ResourceId};
use lumora_gpu::{BufferId, InstanceDevice, ResourceBinder, Result, TextureBinding};
use lumora_instance::{
    InstanceHandle, InstanceRecord, InstanceRegistry, MirrorConfig, ResourceTable, SlotIndexed,
};
use parking_lot::Mutex;

/// Field-array ceiling. Matches the descriptor array size the device
/// backend was configured with.
pub const MAX_DISTANCE_FIELDS: usize = 1024;

/// GPU-side data for one distance-field instance.
///
/// Layout must match the shader struct exactly.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DistanceFieldRecord {
    /// World-to-object transform; rays are marched in object space.
    pub inverse_transform: Mat4,
    /// Object-space bounds, minimum corner.
    pub bounds_min: Vec3,
    /// Slot into the field array; `NO_SLOT` on the end marker.
    pub field_index: u32,
    /// Object-space bounds, maximum corner.
    pub bounds_max: Vec3,
    /// Pads the record to a 16-byte multiple.
    pub reserved: u32,
}

impl DistanceFieldRecord {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    fn new(transform: Mat4, bounds: Aabb, field_index: u32) -> Self {
        Self {
            inverse_transform: transform.inverse(),
            bounds_min: bounds.min,
            field_index,
            bounds_max: bounds.max,
            reserved: 0,
        }
    }
}

impl InstanceRecord for DistanceFieldRecord {
    const LABEL: &'static str = "distance_field_instances";

    fn end_marker() -> Self {
        Self {
            field_index: Self::NO_SLOT,
            ..Self::zeroed()
        }
    }
}

impl SlotIndexed for DistanceFieldRecord {
    fn slot(&self) -> u32 {
        self.field_index
    }

    fn set_slot(&mut self, slot: u32) {
        self.field_index = slot;
    }
}

const INVERSE_OFFSET: usize = offset_of!(DistanceFieldRecord, inverse_transform);
const BOUNDS_MIN_OFFSET: usize = offset_of!(DistanceFieldRecord, bounds_min);
const FIELD_INDEX_OFFSET: usize = offset_of!(DistanceFieldRecord, field_index);
const BOUNDS_MAX_OFFSET: usize = offset_of!(DistanceFieldRecord, bounds_max);

/// Field slots plus the descriptor traffic owed to the device.
struct FieldTable {
    table: ResourceTable<TextureBinding>,
    pending_binds: Vec<(u32, TextureBinding)>,
    pending_unbinds: Vec<u32>,
}

/// Caller-held capability for one distance-field instance.
#[derive(Clone)]
pub struct DistanceFieldInstance {
    handle: InstanceHandle<DistanceFieldRecord>,
    fields: Weak<Mutex<FieldTable>>,
}

impl DistanceFieldInstance {
    /// Replace the object-to-world transform. The record stores the
    /// inverse; unchanged transforms are skipped. Returns whether anything
    /// was written.
    pub fn update_transform(&self, transform: Mat4) -> bool {
        self.handle
            .write_field(INVERSE_OFFSET, transform.inverse())
    }

    /// Replace the object-space bounds.
    pub fn set_bounds(&self, bounds: Aabb) -> bool {
        let min_changed = self.handle.write_field(BOUNDS_MIN_OFFSET, bounds.min);
        let max_changed = self.handle.write_field(BOUNDS_MAX_OFFSET, bounds.max);
        min_changed || max_changed
    }

    /// The current object-space bounds, while the instance is live.
    pub fn bounds(&self) -> Option<Aabb> {
        let min: Vec3 = self.handle.read_field(BOUNDS_MIN_OFFSET)?;
        let max: Vec3 = self.handle.read_field(BOUNDS_MAX_OFFSET)?;
        Some(Aabb::new(min, max))
    }

    /// The field-array slot this instance samples from.
    pub fn field_slot(&self) -> Option<u32> {
        self.handle.read_field(FIELD_INDEX_OFFSET)
    }

    /// The field volume this instance references.
    pub fn field(&self) -> Option<ResourceId> {
        self.handle.resource()
    }

    /// Whether the instance is still live.
    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    /// Remove the instance. Releasing a field's last instance frees its
    /// slot: live records are renumbered immediately, and the descriptor
    /// unbind/rebinds are queued for the next flush.
    pub fn destroy(self) {
        let registry = self.handle.registry();
        let Some(outcome) = self.handle.destroy() else {
            return;
        };
        if !outcome.group_emptied {
            return;
        }
        let Some(fields) = self.fields.upgrade() else {
            return;
        };
        let mut fields = fields.lock();
        let Some((_, remap)) = fields.table.release(outcome.resource) else {
            return;
        };
        if let Some(registry) = registry {
            registry.renumber_slots(&remap);
        }
        fields.pending_unbinds.push(remap.removed());
        let rebinds: Vec<_> = fields
            .table
            .iter()
            .filter(|(slot, _, _)| *slot >= remap.shifted_from())
            .map(|(slot, _, texture)| (slot, *texture))
            .collect();
        fields.pending_binds.extend(rebinds);
    }
}

/// All distance-field instances, mirrored to one device buffer, plus the
/// field array's slot assignments.
pub struct DistanceFieldSet {
    registry: InstanceRegistry<DistanceFieldRecord>,
    fields: Arc<Mutex<FieldTable>>,
}

impl DistanceFieldSet {
    /// Create an empty set whose mirror uses `config`.
    pub fn new(config: MirrorConfig) -> Self {
        Self {
            registry: InstanceRegistry::new(config),
            fields: Arc::new(Mutex::new(FieldTable {
                table: ResourceTable::with_capacity(MAX_DISTANCE_FIELDS),
                pending_binds: Vec::new(),
                pending_unbinds: Vec::new(),
            })),
        }
    }

    /// Add an instance of `field` with object-space `bounds`.
    ///
    /// First use of a field assigns it a slot and queues `texture` for
    /// binding at the next flush; later uses share the slot and ignore
    /// `texture`.
    pub fn instantiate(
        &self,
        field: ResourceId,
        texture: TextureBinding,
        transform: Mat4,
        bounds: Aabb,
    ) -> Result<DistanceFieldInstance> {
        let slot = {
            let mut fields = self.fields.lock();
            let (slot, newly_added) = fields.table.register(field, || texture)?;
            if newly_added {
                fields.pending_binds.push((slot, texture));
            }
            slot
        };
        let handle = self
            .registry
            .instantiate(field, DistanceFieldRecord::new(transform, bounds, slot));
        Ok(DistanceFieldInstance {
            handle,
            fields: Arc::downgrade(&self.fields),
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
            let mut fields = self.fields.lock();
            (
                std::mem::take(&mut fields.pending_unbinds),
                std::mem::take(&mut fields.pending_binds),
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

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether no instances are live.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Number of occupied field slots.
    pub fn field_count(&self) -> usize {
        self.fields.lock().table.len()
    }

    /// Copy of all live records in array order.
    pub fn records(&self) -> Vec<DistanceFieldRecord> {
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
