//! Instance batching and draw emission for the Lumora engine.
//!
//! Three specializations of the instance registry, one per record layout:
//! - Drawable mesh instances (transform pairs, one batched draw per mesh)
//! - Shadow-map entries (light matrices, cascade metadata, map slots)
//! - Signed-distance-field entries (inverse transforms, bounds, field slots)

pub mod distance_fields;
pub mod mesh_instances;
pub mod shadow_maps;

pub use distance_fields::{DistanceFieldInstance, DistanceFieldRecord, DistanceFieldSet};
pub use mesh_instances::{MeshDraw, MeshGeometry, MeshInstance, MeshInstanceBatch, MeshInstanceRecord};
pub use shadow_maps::{ShadowEntry, ShadowEntryRecord, ShadowMapSet};
