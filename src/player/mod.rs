//! Viewer-related modules
//! Contains the camera and the main/inspection camera rig.

pub mod camera;

// Re-export commonly used types
pub use camera::{Camera, CameraRig, ViewSource};
