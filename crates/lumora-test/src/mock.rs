//! In-memory device backend.

use hashbrown::HashMap;
use lumora_gpu::{
    BindingPoint, BufferId, GpuError, InstanceDevice, ResourceBinder, Result, TextureBinding,
};

/// One recorded upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadEvent {
    /// Target buffer.
    pub buffer: BufferId,
    /// Destination byte offset.
    pub offset: u64,
    /// Number of bytes copied.
    pub len: usize,
}

/// Host-memory implementation of the device contracts.
///
/// Buffers are plain byte vectors; every bind, upload, and texture-slot
/// operation is journaled so tests can assert exact device traffic.
#[derive(Default)]
pub struct MockDevice {
    buffers: HashMap<u64, Vec<u8>>,
    next_buffer: u64,
    /// Buffer bindings, in call order.
    pub binds: Vec<(BufferId, BindingPoint)>,
    /// Uploads, in call order.
    pub uploads: Vec<UploadEvent>,
    /// Texture slot bindings, in call order.
    pub texture_binds: Vec<(u32, TextureBinding)>,
    /// Released texture slots, in call order.
    pub texture_unbinds: Vec<u32>,
    /// Buffers created so far.
    pub created: usize,
    /// Buffers destroyed so far.
    pub destroyed: usize,
    /// When set, the next `create_buffer` fails once with
    /// `AllocationFailed` (memory-pressure simulation).
    pub fail_next_allocation: bool,
    /// When set, the next `bind_buffer` fails once with `InvalidState`.
    pub fail_next_bind: bool,
}

impl MockDevice {
    /// Create an empty mock.
    pub fn new() -> Self {
        Self {
            next_buffer: 1,
            ..Self::default()
        }
    }

    /// Contents of a buffer.
    ///
    /// # Panics
    /// Panics when the buffer does not exist; tests want that loud.
    pub fn bytes(&self, buffer: BufferId) -> &[u8] {
        &self.buffers[&buffer.0]
    }

    /// Capacity of a buffer in bytes.
    pub fn capacity(&self, buffer: BufferId) -> u64 {
        self.buffers[&buffer.0].len() as u64
    }

    /// Whether a buffer is still alive.
    pub fn is_alive(&self, buffer: BufferId) -> bool {
        self.buffers.contains_key(&buffer.0)
    }

    /// Forget all journaled events (not the buffers).
    pub fn clear_journal(&mut self) {
        self.binds.clear();
        self.uploads.clear();
        self.texture_binds.clear();
        self.texture_unbinds.clear();
    }
}

impl InstanceDevice for MockDevice {
    fn create_buffer(&mut self, size: u64, _label: &str) -> Result<BufferId> {
        if self.fail_next_allocation {
            self.fail_next_allocation = false;
            return Err(GpuError::AllocationFailed(
                "simulated memory pressure".to_string(),
            ));
        }

        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(id.0, vec![0; size as usize]);
        self.created += 1;
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) -> Result<()> {
        self.buffers
            .remove(&buffer.0)
            .ok_or(GpuError::UnknownBuffer(buffer.0))?;
        self.destroyed += 1;
        Ok(())
    }

    fn bind_buffer(&mut self, buffer: BufferId, binding: BindingPoint) -> Result<()> {
        if self.fail_next_bind {
            self.fail_next_bind = false;
            return Err(GpuError::InvalidState(
                "simulated bind failure".to_string(),
            ));
        }
        if !self.buffers.contains_key(&buffer.0) {
            return Err(GpuError::UnknownBuffer(buffer.0));
        }
        self.binds.push((buffer, binding));
        Ok(())
    }

    fn upload(&mut self, buffer: BufferId, bytes: &[u8], offset: u64) -> Result<()> {
        let backing = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(GpuError::UnknownBuffer(buffer.0))?;

        let start = offset as usize;
        let end = start + bytes.len();
        if end > backing.len() {
            return Err(GpuError::InvalidState(format!(
                "upload [{start}, {end}) past buffer capacity {}",
                backing.len()
            )));
        }
        backing[start..end].copy_from_slice(bytes);
        self.uploads.push(UploadEvent {
            buffer,
            offset,
            len: bytes.len(),
        });
        Ok(())
    }
}

impl ResourceBinder for MockDevice {
    fn bind_texture(&mut self, slot: u32, texture: TextureBinding) -> Result<()> {
        self.texture_binds.push((slot, texture));
        Ok(())
    }

    fn unbind_texture(&mut self, slot: u32) -> Result<()> {
        self.texture_unbinds.push(slot);
        Ok(())
    }
}
