//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Memory allocation failed.
    ///
    /// Buffer growth surfaces this instead of aborting; transient failure
    /// under memory pressure is recoverable by the caller.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// A fixed resource-slot ceiling was exceeded.
    ///
    /// This is a configuration error: callers registered more distinct
    /// resources than the table was built for.
    #[error("Resource slot ceiling exceeded: {used} slots used, capacity {capacity}")]
    SlotCeilingExceeded {
        /// Slots currently in use.
        used: usize,
        /// Fixed table capacity.
        capacity: usize,
    },

    /// Unknown buffer handle.
    #[error("Unknown buffer: {0}")]
    UnknownBuffer(u64),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
