use glam::{Mat4, Vec3};

use crate::settings::CameraSettings;

/// Anything that can drive a culling pass or a render pass.
pub trait ViewSource {
    fn view_proj(&self) -> Mat4;
    fn position(&self) -> Vec3;
}

#[derive(Clone, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(position: Vec3, settings: &CameraSettings, aspect: f32) -> Self {
        Camera {
            position,
            yaw: 0.0,
            pitch: 0.0,
            fov_y: settings.fov_y_degrees.to_radians(),
            aspect,
            near: settings.near,
            far: settings.far,
        }
    }

    pub fn look_direction(&self) -> Vec3 {
        Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize()
    }

    /// Turns the camera toward `target` (ignored when they coincide).
    pub fn look_at(&mut self, target: Vec3) {
        let dir = target - self.position;
        if dir.length_squared() <= f32::EPSILON {
            return;
        }
        let dir = dir.normalize();
        self.yaw = dir.z.atan2(dir.x);
        self.pitch = dir.y.clamp(-1.0, 1.0).asin();
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.look_direction(), Vec3::Y)
    }

    /// Right-handed perspective with wgpu's [0, 1] depth range.
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }
}

impl ViewSource for Camera {
    fn view_proj(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    fn position(&self) -> Vec3 {
        self.position
    }
}

/// Main camera (drives culling) plus an optional inspection camera that
/// renders the scene culled for the main one.
#[derive(Clone, Debug)]
pub struct CameraRig {
    pub main: Camera,
    pub inspect: Option<Camera>,
}

impl CameraRig {
    pub fn new(main: Camera) -> Self {
        Self { main, inspect: None }
    }

    pub fn main(&self) -> &Camera {
        &self.main
    }

    /// The camera frames are rendered from.
    pub fn active(&self) -> &Camera {
        self.inspect.as_ref().unwrap_or(&self.main)
    }
}
