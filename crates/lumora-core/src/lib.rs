//! Core types and math for the Lumora engine.
//!
//! This crate provides the foundational types used throughout the engine:
//! - Resource identity types
//! - Math utilities (bounding boxes)

pub mod math;
pub mod types;

pub use math::Aabb;
pub use types::ResourceId;
