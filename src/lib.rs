// Core module with bounding volumes, GPU layouts and lights
pub mod core;

// Player module with the camera rig
pub mod player;

// Render module with culling and indirect drawing
pub mod render;

// World module with terrain and grass
pub mod world;

// Other modules
pub mod constants;
pub mod error;
pub mod settings;

// Re-exports
pub use constants::*;
pub use core::{BoundingVolume, Light};
pub use error::{Error, InitError, ReadbackError, SettingsError};
pub use player::{Camera, CameraRig, ViewSource};
pub use render::{
    CullKernel, CullPass, GpuContext, IndirectDrawCoordinator, InstancedModelRenderer, ModelHandle,
    VisibilityCuller,
};
pub use settings::Settings;
pub use world::{ChunkedTerrain, FrameStats, GrassLayer};
