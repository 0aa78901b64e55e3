//! Vulkan implementation of the instance-device contracts.
//!
//! Owns one update-after-bind descriptor set: storage-buffer bindings for
//! instance mirrors plus a partially-bound sampled-image array for
//! per-resource slots. The embedding renderer creates the Vulkan instance,
//! device, and queues; this type only manages buffers and descriptor writes.

use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use gpu_allocator::MemoryLocation;
use hashbrown::HashMap;
use tracing::{debug, trace};

use crate::descriptors::{
    write_sampled_image_slot, write_storage_buffer, DescriptorPool, DescriptorSetLayoutBuilder,
};
use crate::device::{BindingPoint, BufferId, InstanceDevice, ResourceBinder, TextureBinding};
use crate::error::{GpuError, Result};
use crate::memory::{GpuAllocator, GpuBuffer};

/// Configuration for [`VulkanDevice`].
#[derive(Clone, Copy, Debug)]
pub struct VulkanDeviceConfig {
    /// Storage-buffer bindings reserved for instance mirrors (set 0,
    /// bindings `0..storage_binding_count`).
    pub storage_binding_count: u32,
    /// Capacity of the sampled-image slot array (the resource-slot
    /// ceiling for shadow maps and distance fields).
    pub texture_slot_capacity: u32,
    /// Shader stages that read instance data.
    pub stage_flags: vk::ShaderStageFlags,
}

impl Default for VulkanDeviceConfig {
    fn default() -> Self {
        Self {
            storage_binding_count: 8,
            texture_slot_capacity: 4096,
            stage_flags: vk::ShaderStageFlags::VERTEX
                | vk::ShaderStageFlags::FRAGMENT
                | vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// Vulkan backend for [`InstanceDevice`] and [`ResourceBinder`].
pub struct VulkanDevice {
    device: Arc<ash::Device>,
    allocator: GpuAllocator,
    pool: DescriptorPool,
    layout: vk::DescriptorSetLayout,
    set: vk::DescriptorSet,
    config: VulkanDeviceConfig,
    buffers: HashMap<u64, GpuBuffer>,
    next_buffer: u64,
}

impl VulkanDevice {
    /// Create the backend over an existing device.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid, and the
    /// device must have been created with the descriptor-indexing features
    /// required for update-after-bind sampled image arrays.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        config: VulkanDeviceConfig,
    ) -> Result<Self> {
        let allocator = GpuAllocator::new(instance, device.clone(), physical_device)?;

        let mut builder = DescriptorSetLayoutBuilder::new();
        for binding in 0..config.storage_binding_count {
            builder = builder.storage_buffer(binding, config.stage_flags);
        }
        let layout = builder
            .sampled_image_array(
                config.storage_binding_count,
                config.texture_slot_capacity,
                config.stage_flags,
            )
            .build(&device)?;

        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(config.storage_binding_count),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(config.texture_slot_capacity),
        ];
        let pool = DescriptorPool::new(&device, 1, &pool_sizes)?;
        let set = pool.allocate(&device, &[layout])?[0];

        Ok(Self {
            device,
            allocator,
            pool,
            layout,
            set,
            config,
            buffers: HashMap::new(),
            next_buffer: 1,
        })
    }

    /// The descriptor set holding all instance bindings.
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.set
    }

    /// The descriptor set layout, for pipeline-layout creation.
    pub fn descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// The raw Vulkan buffer backing `buffer`, for command recording.
    pub fn raw_buffer(&self, buffer: BufferId) -> Option<vk::Buffer> {
        self.buffers.get(&buffer.0).map(|b| b.buffer)
    }

    /// Destroy all remaining buffers and the descriptor objects.
    ///
    /// # Safety
    /// The device must be idle; no submitted work may still reference the
    /// buffers or the descriptor set.
    pub unsafe fn destroy(&mut self) {
        for (_, mut buffer) in self.buffers.drain() {
            let _ = self.allocator.free_buffer(&mut buffer);
        }
        self.pool.destroy(&self.device);
        self.device.destroy_descriptor_set_layout(self.layout, None);
        self.allocator.shutdown();
    }
}

impl InstanceDevice for VulkanDevice {
    fn create_buffer(&mut self, size: u64, label: &str) -> Result<BufferId> {
        let buffer = self.allocator.create_buffer(
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            MemoryLocation::CpuToGpu,
            label,
        )?;

        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(id.0, buffer);

        debug!(label, size, id = id.0, "created instance buffer");
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) -> Result<()> {
        let mut gpu_buffer = self
            .buffers
            .remove(&buffer.0)
            .ok_or(GpuError::UnknownBuffer(buffer.0))?;
        self.allocator.free_buffer(&mut gpu_buffer)
    }

    fn bind_buffer(&mut self, buffer: BufferId, binding: BindingPoint) -> Result<()> {
        if binding.set != 0 {
            return Err(GpuError::InvalidState(format!(
                "VulkanDevice exposes a single descriptor set, got set {}",
                binding.set
            )));
        }
        if binding.binding >= self.config.storage_binding_count {
            return Err(GpuError::InvalidState(format!(
                "storage binding {} out of range (count {})",
                binding.binding, self.config.storage_binding_count
            )));
        }

        let gpu_buffer = self
            .buffers
            .get(&buffer.0)
            .ok_or(GpuError::UnknownBuffer(buffer.0))?;

        unsafe {
            write_storage_buffer(
                &self.device,
                self.set,
                binding.binding,
                gpu_buffer.buffer,
                0,
                vk::WHOLE_SIZE,
            );
        }
        trace!(id = buffer.0, binding = binding.binding, "bound instance buffer");
        Ok(())
    }

    fn upload(&mut self, buffer: BufferId, bytes: &[u8], offset: u64) -> Result<()> {
        let gpu_buffer = self
            .buffers
            .get(&buffer.0)
            .ok_or(GpuError::UnknownBuffer(buffer.0))?;
        gpu_buffer.write_bytes(offset, bytes)
    }
}

impl ResourceBinder for VulkanDevice {
    fn bind_texture(&mut self, slot: u32, texture: TextureBinding) -> Result<()> {
        if slot >= self.config.texture_slot_capacity {
            return Err(GpuError::SlotCeilingExceeded {
                used: slot as usize + 1,
                capacity: self.config.texture_slot_capacity as usize,
            });
        }

        unsafe {
            write_sampled_image_slot(
                &self.device,
                self.set,
                self.config.storage_binding_count,
                slot,
                vk::ImageView::from_raw(texture.image),
                vk::Sampler::from_raw(texture.sampler),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        }
        trace!(slot, "bound resource texture");
        Ok(())
    }

    fn unbind_texture(&mut self, slot: u32) -> Result<()> {
        // The array is partially bound and no live record references the
        // slot after compaction, so the stale descriptor can stay.
        trace!(slot, "released resource texture slot");
        Ok(())
    }
}
