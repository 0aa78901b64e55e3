//! Narrow device contracts for instance data.
//!
//! The instance registries never issue raw graphics-API calls; everything
//! they need from the device fits into two small traits. Backends (the
//! Vulkan implementation in this crate, the in-memory mock in the test
//! crate) implement both.

use crate::error::Result;

/// Opaque handle to a device buffer created through [`InstanceDevice`].
///
/// The value is backend-assigned and only meaningful to the backend that
/// issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct BufferId(pub u64);

/// A (set, binding) pair identifying where a buffer is exposed to shaders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindingPoint {
    /// Descriptor set index.
    pub set: u32,
    /// Binding index within the set.
    pub binding: u32,
}

impl BindingPoint {
    /// Create a binding point.
    #[inline]
    pub const fn new(set: u32, binding: u32) -> Self {
        Self { set, binding }
    }
}

/// Raw image/sampler pair bound into a resource slot.
///
/// Both fields are backend-defined raw handles: the Vulkan backend expects
/// `vk::ImageView`/`vk::Sampler` raw values, the mock treats them as opaque
/// identities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureBinding {
    /// Raw image (view) handle.
    pub image: u64,
    /// Raw sampler handle.
    pub sampler: u64,
}

/// Device-buffer primitive.
///
/// Everything the registries do on the device side: create a buffer of size
/// N, bind it at a binding point, copy bytes into it, and tear it down.
pub trait InstanceDevice {
    /// Create a device-visible buffer of `size` bytes.
    fn create_buffer(&mut self, size: u64, label: &str) -> Result<BufferId>;

    /// Destroy a buffer previously created with [`Self::create_buffer`].
    fn destroy_buffer(&mut self, buffer: BufferId) -> Result<()>;

    /// Expose `buffer` to shaders at `binding`.
    fn bind_buffer(&mut self, buffer: BufferId, binding: BindingPoint) -> Result<()>;

    /// Copy `bytes` into `buffer` starting at byte `offset`.
    fn upload(&mut self, buffer: BufferId, bytes: &[u8], offset: u64) -> Result<()>;
}

/// Resource binding primitive.
///
/// Per-resource visual data (shadow maps, distance fields) is exposed to
/// shaders as a slot-indexed sampled-image array; records reference slots
/// by index.
pub trait ResourceBinder {
    /// Bind an image/sampler pair at array slot `slot`.
    fn bind_texture(&mut self, slot: u32, texture: TextureBinding) -> Result<()>;

    /// Release array slot `slot`.
    ///
    /// After slot compaction no live record references the slot, so a
    /// backend may leave the stale descriptor in place.
    fn unbind_texture(&mut self, slot: u32) -> Result<()>;
}
