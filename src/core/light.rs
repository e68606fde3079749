use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Light affecting the terrain, grass and model passes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Light {
    Directional { direction: Vec3, color: Vec3 },
    Point { position: Vec3, color: Vec3, range: f32 },
}

impl Default for Light {
    fn default() -> Self {
        Light::Directional {
            direction: Vec3::new(0.4, -1.0, 0.3).normalize(),
            color: Vec3::new(1.0, 0.96, 0.88),
        }
    }
}

/// GPU form of [`Light`]: `vector.w` is 0 for directional, 1 for point;
/// `color.w` carries the point range.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct LightUniform {
    pub vector: [f32; 4],
    pub color: [f32; 4],
}

impl From<&Light> for LightUniform {
    fn from(light: &Light) -> Self {
        match *light {
            Light::Directional { direction, color } => LightUniform {
                vector: direction.normalize_or_zero().extend(0.0).to_array(),
                color: color.extend(0.0).to_array(),
            },
            Light::Point {
                position,
                color,
                range,
            } => LightUniform {
                vector: position.extend(1.0).to_array(),
                color: color.extend(range).to_array(),
            },
        }
    }
}
