//! Record traits for device-mirrored instance data.

use bytemuck::Pod;

/// A fixed-size, binary-layout-stable record mirrored byte-for-byte into a
/// device buffer.
///
/// Implementors are `#[repr(C)]` Pod structs with explicit fixed-width
/// fields and reserved padding; the layout never changes after
/// construction. Shaders read the same layout on the device side, so every
/// implementor locks its layout with `offset_of!` tests.
pub trait InstanceRecord: Pod {
    /// Debug label for the device buffer backing this record type.
    const LABEL: &'static str;

    /// Record appended after the last live record as an iteration
    /// stop-marker ("no resource").
    fn end_marker() -> Self;
}

/// Records that reference a resource-table slot by index.
///
/// Deleting a resource's last instance frees its slot and compacts the
/// slot space; the registry then rewrites the slot field of every live
/// record in one traversal.
pub trait SlotIndexed: InstanceRecord {
    /// Slot value meaning "no resource" (used by end markers).
    const NO_SLOT: u32 = u32::MAX;

    /// The resource slot this record samples from.
    fn slot(&self) -> u32;

    /// Rewrite the resource slot.
    fn set_slot(&mut self, slot: u32);
}
