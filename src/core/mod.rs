//! Core data structures for the culling pipeline
//! Contains bounding volumes, GPU uniform layouts, vertices and lights.

pub mod bounds;
pub mod light;
pub mod uniforms;
pub mod vertex;

// Re-export commonly used types
pub use bounds::BoundingVolume;
pub use light::{Light, LightUniform};
pub use uniforms::{CounterBlock, CullParams, SceneUniforms};
pub use vertex::{ModelVertex, PatchVertex};
