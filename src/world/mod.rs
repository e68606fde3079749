//! Terrain-level modules
//! Contains the chunked terrain and the grass layer that rides on it.

pub mod grass;
pub mod terrain;

// Re-export commonly used types
pub use grass::GrassLayer;
pub use terrain::{ChunkedTerrain, FrameStats};
