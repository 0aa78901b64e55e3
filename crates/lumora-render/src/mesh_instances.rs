//! Drawable mesh instances.
//!
//! Records are `{transform, inverse_transform}` pairs kept contiguous per
//! mesh so rendering issues one batched draw per mesh instead of one per
//! instance.

use std::mem::offset_of;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use lumora_core::ResourceId;
use lumora_gpu::{GpuError, InstanceDevice, Result};
use lumora_instance::{InstanceHandle, InstanceRecord, InstanceRegistry, MirrorConfig, ResourceTable};

/// Mesh-table ceiling. Exceeding it is a configuration error.
pub const MAX_MESHES: usize = 4096;

/// GPU-side per-instance data for mesh rendering.
///
/// Layout must match the shader struct exactly.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshInstanceRecord {
    /// Object-to-world transform.
    pub transform: Mat4,
    /// World-to-object transform (normals, picking).
    pub inverse_transform: Mat4,
}

impl MeshInstanceRecord {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Build a record from an object-to-world transform.
    pub fn from_transform(transform: Mat4) -> Self {
        Self {
            transform,
            inverse_transform: transform.inverse(),
        }
    }
}

impl InstanceRecord for MeshInstanceRecord {
    const LABEL: &'static str = "mesh_instances";

    fn end_marker() -> Self {
        Self::zeroed()
    }
}

const TRANSFORM_OFFSET: usize = offset_of!(MeshInstanceRecord, transform);
const INVERSE_OFFSET: usize = offset_of!(MeshInstanceRecord, inverse_transform);

/// Geometry ranges needed to draw one mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshGeometry {
    /// First index in the shared index buffer.
    pub first_index: u32,
    /// Number of indices.
    pub index_count: u32,
    /// Offset added to each index before vertex fetch.
    pub vertex_offset: i32,
}

/// One batched draw: all contiguous instances of one mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshDraw {
    /// The mesh being drawn.
    pub mesh: ResourceId,
    /// Its geometry ranges.
    pub geometry: MeshGeometry,
    /// First instance index in the record array.
    pub first_instance: u32,
    /// Number of instances.
    pub instance_count: u32,
}

/// Caller-held capability for one mesh instance.
///
/// Dropping without [`Self::destroy`] leaves the instance live; every
/// operation after destroy (or after the batch is gone) is a silent no-op.
#[derive(Clone)]
pub struct MeshInstance {
    handle: InstanceHandle<MeshInstanceRecord>,
}

impl MeshInstance {
    /// Replace the instance transform.
    ///
    /// Unchanged transforms are skipped entirely, so per-frame callers that
    /// push the same matrix do not grow the dirty region. Returns whether
    /// anything was written.
    pub fn update_transform(&self, transform: Mat4) -> bool {
        let changed = self.handle.write_field(TRANSFORM_OFFSET, transform);
        if changed {
            self.handle
                .write_field(INVERSE_OFFSET, transform.inverse());
        }
        changed
    }

    /// The current transform, while the instance is live.
    pub fn transform(&self) -> Option<Mat4> {
        self.handle.read_field(TRANSFORM_OFFSET)
    }

    /// The mesh this instance draws.
    pub fn mesh(&self) -> Option<ResourceId> {
        self.handle.resource()
    }

    /// Whether the instance is still live.
    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    /// Remove the instance.
    pub fn destroy(self) {
        // Mesh geometry stays registered; only the record goes away.
        let _ = self.handle.destroy();
    }
}

/// All instances of all registered meshes, mirrored to one device buffer.
pub struct MeshInstanceBatch {
    registry: InstanceRegistry<MeshInstanceRecord>,
    meshes: ResourceTable<MeshGeometry>,
}

impl MeshInstanceBatch {
    /// Create an empty batch whose mirror uses `config`.
    pub fn new(config: MirrorConfig) -> Self {
        Self {
            registry: InstanceRegistry::new(config),
            meshes: ResourceTable::with_capacity(MAX_MESHES),
        }
    }

    /// Register a mesh's geometry ranges. Idempotent per mesh.
    pub fn register_mesh(&mut self, mesh: ResourceId, geometry: MeshGeometry) -> Result<()> {
        self.meshes.register(mesh, || geometry)?;
        Ok(())
    }

    /// Add an instance of a registered mesh.
    pub fn instantiate(&self, mesh: ResourceId, transform: Mat4) -> Result<MeshInstance> {
        if self.meshes.get(mesh).is_none() {
            return Err(GpuError::InvalidState(format!(
                "mesh {} instantiated before register_mesh",
                mesh.raw()
            )));
        }
        let handle = self
            .registry
            .instantiate(mesh, MeshInstanceRecord::from_transform(transform));
        Ok(MeshInstance { handle })
    }

    /// Once per frame, before draw emission: grow the device buffer if
    /// needed and upload the dirty range for `frame`'s mirror slot.
    pub fn flush(&self, device: &mut dyn InstanceDevice, frame: usize) -> Result<()> {
        self.registry.flush(device, frame)
    }

    /// One draw per mesh group, in ascending first-instance order.
    pub fn draws(&self) -> Vec<MeshDraw> {
        self.registry
            .draw_batches()
            .into_iter()
            .filter_map(|batch| {
                let geometry = *self.meshes.get(batch.resource)?;
                Some(MeshDraw {
                    mesh: batch.resource,
                    geometry,
                    first_instance: batch.first_instance,
                    instance_count: batch.instance_count,
                })
            })
            .collect()
    }

    /// Number of live instances across all meshes.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether no instances are live.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Number of registered meshes.
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// The buffer backing a mirror frame slot, for per-frame binding.
    pub fn buffer(&self, frame: usize) -> Option<lumora_gpu::BufferId> {
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

    fn batch() -> MeshInstanceBatch {
        lumora_test::init_test_logging();
        MeshInstanceBatch::new(MirrorConfig::new(BindingPoint::new(0, 0)))
    }

    fn geometry(first_index: u32) -> MeshGeometry {
        MeshGeometry {
            first_index,
            index_count: 36,
            vertex_offset: 0,
        }
    }

    fn id(raw: u64) -> ResourceId {
        ResourceId::from_raw(raw)
    }

    #[test]
    fn record_layout() {
        assert_eq!(MeshInstanceRecord::SIZE, 128);
        assert_eq!(offset_of!(MeshInstanceRecord, transform), 0);
        assert_eq!(offset_of!(MeshInstanceRecord, inverse_transform), 64);
    }

    #[test]
    fn instantiate_requires_registration() {
        let batch = batch();
        assert!(matches!(
            batch.instantiate(id(1), Mat4::IDENTITY),
            Err(GpuError::InvalidState(_))
        ));
    }

    #[test]
    fn one_draw_per_mesh_in_array_order() {
        let mut batch = batch();
        let (cube, sphere) = (id(1), id(2));
        batch.register_mesh(cube, geometry(0)).unwrap();
        batch.register_mesh(sphere, geometry(36)).unwrap();

        batch.instantiate(cube, Mat4::IDENTITY).unwrap();
        batch.instantiate(sphere, Mat4::IDENTITY).unwrap();
        batch.instantiate(cube, Mat4::IDENTITY).unwrap();
        batch.instantiate(sphere, Mat4::IDENTITY).unwrap();
        batch.instantiate(cube, Mat4::IDENTITY).unwrap();

        let draws = batch.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].first_instance, 0);
        assert_eq!(draws[0].mesh, cube);
        assert_eq!(draws[0].instance_count, 3);
        assert_eq!(draws[0].geometry, geometry(0));
        assert_eq!(draws[1].first_instance, 3);
        assert_eq!(draws[1].mesh, sphere);
        assert_eq!(draws[1].instance_count, 2);
    }

    #[test]
    fn transform_update_writes_both_matrices() {
        let mut batch = batch();
        let mut device = MockDevice::new();
        let cube = id(1);
        batch.register_mesh(cube, geometry(0)).unwrap();

        let instance = batch.instantiate(cube, Mat4::IDENTITY).unwrap();
        batch.flush(&mut device, 0).unwrap();
        device.uploads.clear();

        let moved = Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
        assert!(instance.update_transform(moved));
        batch.flush(&mut device, 0).unwrap();

        // One coalesced upload covering transform and inverse.
        assert_eq!(device.uploads.len(), 1);
        assert_eq!(device.uploads[0].offset, 0);
        assert_eq!(device.uploads[0].len, MeshInstanceRecord::SIZE);
        assert_eq!(instance.transform(), Some(moved));
    }

    #[test]
    fn repeated_identical_transform_is_a_noop() {
        let mut batch = batch();
        let mut device = MockDevice::new();
        let cube = id(1);
        batch.register_mesh(cube, geometry(0)).unwrap();

        let instance = batch.instantiate(cube, Mat4::IDENTITY).unwrap();
        batch.flush(&mut device, 0).unwrap();
        device.uploads.clear();

        assert!(!instance.update_transform(Mat4::IDENTITY));
        batch.flush(&mut device, 0).unwrap();
        assert!(device.uploads.is_empty());
    }

    #[test]
    fn destroy_keeps_the_mesh_registered() {
        let mut batch = batch();
        let cube = id(1);
        batch.register_mesh(cube, geometry(0)).unwrap();

        let instance = batch.instantiate(cube, Mat4::IDENTITY).unwrap();
        instance.destroy();

        assert!(batch.is_empty());
        assert_eq!(batch.mesh_count(), 1);
        // A later instantiate works without re-registering.
        assert!(batch.instantiate(cube, Mat4::IDENTITY).is_ok());
    }
}
