//! Device buffer mirror with dirty tracking and power-of-two growth.

use lumora_gpu::{BindingPoint, BufferId, InstanceDevice, Result};
use tracing::debug;

use crate::dirty::ByteRange;

/// Configuration for a [`DeviceMirror`].
#[derive(Clone, Copy, Debug)]
pub struct MirrorConfig {
    /// Where the mirror buffer is exposed to shaders.
    pub binding: BindingPoint,
    /// Minimum capacity in records; the mirror never allocates below this.
    pub floor_records: usize,
    /// Buffer slots in the staging ring. One slot per frame in flight;
    /// `1` means a single buffer shared by all frames (callers must then
    /// serialize frames).
    pub frames_in_flight: usize,
}

impl MirrorConfig {
    /// Mirror bound at `binding` with the default floor and a single slot.
    pub const fn new(binding: BindingPoint) -> Self {
        Self {
            binding,
            floor_records: 32,
            frames_in_flight: 1,
        }
    }
}

struct MirrorSlot {
    buffer: Option<BufferId>,
    capacity_records: usize,
    pending: ByteRange,
}

/// Device-visible mirror of a host record array.
///
/// Capacity is always a power of two, at least the configured floor, and
/// at least large enough for the host array; it only grows, never shrinks,
/// to avoid binding churn. Growth reallocates, re-binds, and marks the full
/// range dirty.
///
/// Every mutation is merged into each slot's pending range, so each frame
/// slot independently catches up to the host array on its next flush
/// (slots other than the flushed one stay pending until their frame comes
/// around).
pub struct DeviceMirror {
    slots: Vec<MirrorSlot>,
    /// Shared growth target; a slot that grew raises it so the other slots
    /// match on their next flush instead of growing one step at a time.
    target_records: usize,
    record_size: usize,
    binding: BindingPoint,
    label: &'static str,
}

impl DeviceMirror {
    /// Create a mirror for records of `record_size` bytes.
    pub fn new(config: MirrorConfig, record_size: usize, label: &'static str) -> Self {
        assert!(record_size > 0, "record size must be non-zero");
        assert!(config.frames_in_flight > 0, "need at least one frame slot");

        let slots = (0..config.frames_in_flight)
            .map(|_| MirrorSlot {
                buffer: None,
                capacity_records: 0,
                pending: ByteRange::EMPTY,
            })
            .collect();

        Self {
            slots,
            target_records: config.floor_records.next_power_of_two(),
            record_size,
            binding: config.binding,
            label,
        }
    }

    /// Record `[start, end)` host bytes as pending for every slot.
    pub fn mark_dirty(&mut self, start: u64, end: u64) {
        for slot in &mut self.slots {
            slot.pending.mark(start, end);
        }
    }

    /// Service one frame slot: grow if the host array outgrew the slot,
    /// then copy the slot's pending byte range from `host`.
    ///
    /// `host` is the full record array including the end marker. Growth
    /// allocation failure propagates; the slot is left unallocated and a
    /// later flush retries.
    pub fn flush(
        &mut self,
        device: &mut dyn InstanceDevice,
        frame: usize,
        host: &[u8],
    ) -> Result<()> {
        let required_bytes = host.len() as u64;
        let required_records = host.len().div_ceil(self.record_size);
        if required_records > self.target_records {
            self.target_records = required_records.next_power_of_two();
        }

        let slot = &mut self.slots[frame];
        if slot.capacity_records < self.target_records {
            if let Some(old) = slot.buffer.take() {
                device.destroy_buffer(old)?;
            }
            let capacity_bytes = (self.target_records * self.record_size) as u64;
            let buffer = device.create_buffer(capacity_bytes, self.label)?;
            if let Err(bind_err) = device.bind_buffer(buffer, self.binding) {
                // Reclaim the fresh buffer; the slot stays unallocated and
                // a later flush retries the growth.
                device.destroy_buffer(buffer)?;
                return Err(bind_err);
            }
            slot.buffer = Some(buffer);
            slot.capacity_records = self.target_records;
            // A fresh buffer holds nothing; any partial-diff assumption is
            // void, so the whole host range is pending.
            slot.pending = ByteRange::spanning(0, required_bytes);
            debug!(
                label = self.label,
                frame,
                records = self.target_records,
                "grew instance mirror"
            );
        }

        if let Some((start, end)) = slot.pending.take_clamped(required_bytes) {
            // The growth branch above ran on the first flush at the latest,
            // so the slot is always backed here.
            if let Some(buffer) = slot.buffer {
                device.upload(buffer, &host[start as usize..end as usize], start)?;
            }
        }

        Ok(())
    }

    /// The buffer currently backing a frame slot, if allocated.
    pub fn buffer(&self, frame: usize) -> Option<BufferId> {
        self.slots[frame].buffer
    }

    /// Capacity of a frame slot in records.
    pub fn capacity_records(&self, frame: usize) -> usize {
        self.slots[frame].capacity_records
    }

    /// Capacity of a frame slot in bytes.
    pub fn capacity_bytes(&self, frame: usize) -> u64 {
        (self.slots[frame].capacity_records * self.record_size) as u64
    }

    /// Pending dirty range of a frame slot (tests and diagnostics).
    pub fn pending(&self, frame: usize) -> ByteRange {
        self.slots[frame].pending
    }

    /// Number of frame slots.
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Destroy all slot buffers.
    pub fn destroy(&mut self, device: &mut dyn InstanceDevice) -> Result<()> {
        for slot in &mut self.slots {
            if let Some(buffer) = slot.buffer.take() {
                device.destroy_buffer(buffer)?;
            }
            slot.capacity_records = 0;
            slot.pending.clear();
        }
        Ok(())
    }
}
