//! Caller-held instance handles.

use std::mem::size_of;
use std::sync::Weak;

use bytemuck::Pod;
use parking_lot::Mutex;

use crate::record::InstanceRecord;
use crate::registry::{DestroyOutcome, InstanceKey, InstanceRegistry};

/// Capability referencing one record in an [`InstanceRegistry`].
///
/// The handle holds a weak back-reference to the registry and a
/// generation-checked key into its handle table; the table tracks the
/// record's current byte offset as the array compacts. The handle is a
/// capability, not an owner: dropping it leaves the record live (a
/// deliberate fire-and-forget instance), and every operation on a handle
/// whose record was destroyed, or whose registry is gone, is a silent
/// no-op.
pub struct InstanceHandle<R: InstanceRecord> {
    state: Weak<Mutex<crate::registry::RegistryStateFor<R>>>,
    key: InstanceKey,
}

impl<R: InstanceRecord> InstanceHandle<R> {
    pub(crate) fn new(
        state: Weak<Mutex<crate::registry::RegistryStateFor<R>>>,
        key: InstanceKey,
    ) -> Self {
        Self { state, key }
    }

    /// Write one record field, given its byte offset within the record.
    ///
    /// No-op (returns `false`) when the value is unchanged, when the record
    /// was destroyed, or when the registry is gone. Offsets come from
    /// `core::mem::offset_of!` on the record type; the specialization
    /// crates wrap this in typed mutators.
    pub fn write_field<F: Pod + PartialEq>(&self, field_offset: usize, value: F) -> bool {
        debug_assert!(field_offset + size_of::<F>() <= size_of::<R>());
        match self.state.upgrade() {
            Some(state) => state.lock().write_field(self.key, field_offset, value),
            None => false,
        }
    }

    /// Read one record field, given its byte offset within the record.
    pub fn read_field<F: Pod>(&self, field_offset: usize) -> Option<F> {
        let state = self.state.upgrade()?;
        let value = state.lock().read_field(self.key, field_offset);
        value
    }

    /// Remove the record from the registry.
    ///
    /// Returns what the removal did so specializations can release
    /// per-resource bindings; `None` if the handle was already dead.
    pub fn destroy(&self) -> Option<DestroyOutcome> {
        let state = self.state.upgrade()?;
        let outcome = state.lock().destroy(self.key);
        outcome
    }

    /// The record's current byte offset in the host array.
    pub fn byte_offset(&self) -> Option<u64> {
        let state = self.state.upgrade()?;
        let offset = state.lock().byte_offset(self.key);
        offset
    }

    /// The resource this record references.
    pub fn resource(&self) -> Option<lumora_core::ResourceId> {
        let state = self.state.upgrade()?;
        let resource = state.lock().resource(self.key);
        resource
    }

    /// Whether the record is still live.
    pub fn is_live(&self) -> bool {
        self.byte_offset().is_some()
    }

    /// The owning registry, while it is still alive.
    pub fn registry(&self) -> Option<InstanceRegistry<R>> {
        self.state.upgrade().map(InstanceRegistry::from_state)
    }
}

impl<R: InstanceRecord> Clone for InstanceHandle<R> {
    fn clone(&self) -> Self {
        Self {
            state: Weak::clone(&self.state),
            key: self.key,
        }
    }
}

impl<R: InstanceRecord> std::fmt::Debug for InstanceHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("live", &self.is_live())
            .field("byte_offset", &self.byte_offset())
            .finish()
    }
}
