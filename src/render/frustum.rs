use glam::{Mat4, Vec2, Vec3, Vec4};

/// Six view-frustum planes in world space (xyz = normal, w = distance),
/// normalized so that `dot(n, p) + w` is a distance in world units.
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    pub planes: [Vec4; 6],
}

impl Frustum {
    /// Gribb/Hartmann extraction from a column-vector view-projection.
    /// Each plane is `row3 ± row{0,1}`; near is `row2` alone because wgpu
    /// clips depth to [0, 1].
    pub fn from_view_proj(view_proj: &Mat4) -> Self {
        let r0 = view_proj.row(0);
        let r1 = view_proj.row(1);
        let r2 = view_proj.row(2);
        let r3 = view_proj.row(3);

        let mut planes = [
            // Left
            r3 + r0,
            // Right
            r3 - r0,
            // Bottom
            r3 + r1,
            // Top
            r3 - r1,
            // Near
            r2,
            // Far
            r3 - r2,
        ];

        for plane in &mut planes {
            let length = plane.truncate().length();
            if length > 0.0 {
                *plane /= length;
            }
        }

        Frustum { planes }
    }

    pub fn to_array(&self) -> [[f32; 4]; 6] {
        self.planes.map(|p| p.to_array())
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        let p = point.extend(1.0);
        self.planes.iter().all(|plane| plane.dot(p) >= 0.0)
    }

    /// Conservative box test used by every culling kernel: the box is
    /// rejected only when all eight corners sit behind one plane.
    pub fn corners_visible(&self, corners: &[Vec4; 8]) -> bool {
        for plane in &self.planes {
            if corners.iter().all(|c| plane.dot(c.truncate().extend(1.0)) < 0.0) {
                return false;
            }
        }
        true
    }
}

/// Places local corners the way the offset kernel does: `scale * corner`,
/// then shifted by the 2D offset on the x/z plane.
pub fn place_corners_at_offset(corners: &[Vec4; 8], scale: &Mat4, offset: Vec2) -> [Vec4; 8] {
    let shift = Vec4::new(offset.x, 0.0, offset.y, 0.0);
    corners.map(|c| *scale * c + shift)
}

/// Places local corners the way the transform kernel does: `transform * scale * corner`.
pub fn place_corners_with_transform(corners: &[Vec4; 8], scale: &Mat4, transform: &Mat4) -> [Vec4; 8] {
    let m = *transform * *scale;
    corners.map(|c| m * c)
}

/// CPU mirror of the offset kernel. Returns the surviving offsets in input
/// order (the GPU append order is unspecified, the set is the same).
pub fn cull_offsets_reference(
    frustum: &Frustum,
    offsets: &[[f32; 2]],
    corners: &[Vec4; 8],
    scale: &Mat4,
) -> Vec<[f32; 2]> {
    offsets
        .iter()
        .copied()
        .filter(|o| {
            let placed = place_corners_at_offset(corners, scale, Vec2::from_array(*o));
            frustum.corners_visible(&placed)
        })
        .collect()
}

/// CPU mirror of the transform kernel.
pub fn cull_transforms_reference(
    frustum: &Frustum,
    transforms: &[Mat4],
    corners: &[Vec4; 8],
    scale: &Mat4,
) -> Vec<Mat4> {
    transforms
        .iter()
        .copied()
        .filter(|t| frustum.corners_visible(&place_corners_with_transform(corners, scale, t)))
        .collect()
}
