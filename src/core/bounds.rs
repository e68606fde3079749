use glam::{Vec3, Vec4};

/// Axis-aligned box used as the culling shape for every candidate.
///
/// Starts inverted (`+INF` / `-INF`) so the first [`expand`](Self::expand)
/// collapses it onto that point. The corner list is a cache: call
/// [`calc_corners`](Self::calc_corners) after the last extent change and
/// before handing the corners to a culler.
#[derive(Clone, Copy, Debug)]
pub struct BoundingVolume {
    pub min: Vec3,
    pub max: Vec3,
    pub corners: [Vec4; 8],
}

impl Default for BoundingVolume {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundingVolume {
    pub fn new() -> Self {
        BoundingVolume {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
            corners: [Vec4::W; 8],
        }
    }

    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Self {
        let mut volume = Self::new();
        for p in points {
            volume.expand(p);
        }
        volume.calc_corners();
        volume
    }

    pub fn expand(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Emits corners z-major, then y, then x, each axis low before high.
    /// Index 0 is `min`, index 7 is `max`.
    pub fn calc_corners(&mut self) {
        let mut i = 0;
        for z in [self.min.z, self.max.z] {
            for y in [self.min.y, self.max.y] {
                for x in [self.min.x, self.max.x] {
                    self.corners[i] = Vec4::new(x, y, z, 1.0);
                    i += 1;
                }
            }
        }
    }

    /// True once at least one point has been added.
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    /// Corners in the `[[f32; 4]; 8]` layout the culling kernels read.
    pub fn corner_array(&self) -> [[f32; 4]; 8] {
        self.corners.map(|c| c.to_array())
    }
}
