//! GPU-resident instance registry for the Lumora engine.
//!
//! The registry maintains a compact, device-visible array of fixed-layout
//! records, grouped contiguously by resource so rendering can issue one
//! batched draw per resource. Callers hold stable handles to individual
//! records across insertions and deletions elsewhere in the array, and only
//! the minimally-changed byte range is republished to the device per frame.
//!
//! This crate provides:
//! - [`InstanceRegistry`]: record array, resource grouping, handle table
//! - [`InstanceHandle`]: caller-held capability for one record
//! - [`ResourceTable`]: resource identity to stable slot index + metadata
//! - [`DeviceMirror`]: dirty-tracked device buffer with power-of-two growth

pub mod dirty;
pub mod handle;
pub mod mirror;
pub mod record;
pub mod registry;
pub mod table;

pub use dirty::ByteRange;
pub use handle::InstanceHandle;
pub use mirror::{DeviceMirror, MirrorConfig};
pub use record::{InstanceRecord, SlotIndexed};
pub use registry::{DestroyOutcome, DrawBatch, InstanceKey, InstanceRegistry, ResourceGroup};
pub use table::{ResourceTable, SlotRemap};
