//! Core identity types.

/// Opaque identity for a renderable or sample-able resource.
///
/// The engine does not interpret the value; callers derive it from whatever
/// uniquely names the resource on their side (asset handle, render-target
/// id, precomputed-field id). Equality is identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ResourceId(pub u64);

impl ResourceId {
    /// Create a resource id from a raw value.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identity value.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for ResourceId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}
