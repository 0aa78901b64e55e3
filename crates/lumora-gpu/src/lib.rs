//! Vulkan abstraction layer for the Lumora engine.
//!
//! This crate provides:
//! - The narrow device contracts the instance registries depend on
//!   ([`InstanceDevice`], [`ResourceBinder`])
//! - Memory allocation via gpu-allocator
//! - Descriptor write helpers
//! - A Vulkan implementation of the device contracts

pub mod descriptors;
pub mod device;
pub mod error;
pub mod memory;
pub mod vulkan;

pub use device::{BindingPoint, BufferId, InstanceDevice, ResourceBinder, TextureBinding};
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuBuffer};
pub use vulkan::{VulkanDevice, VulkanDeviceConfig};
