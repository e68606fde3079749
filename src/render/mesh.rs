use crate::core::vertex::{ModelVertex, PatchVertex};

/// Forward lean of a blade tip, in blade widths.
pub const BLADE_BEND: f32 = 0.15;

/// Index range of one drawable part of a mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubMesh {
    pub index_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
}

/// CPU-side mesh: shared vertex/index storage plus the ranges drawn from it.
#[derive(Clone, Debug)]
pub struct MeshData<V> {
    pub vertices: Vec<V>,
    pub indices: Vec<u32>,
    pub submeshes: Vec<SubMesh>,
}

impl<V> MeshData<V> {
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            submeshes: Vec::new(),
        }
    }

    /// Appends `vertices`/`indices` (indices local to `vertices`) as a new submesh.
    pub fn push_submesh(&mut self, vertices: Vec<V>, indices: Vec<u32>) -> SubMesh {
        let submesh = SubMesh {
            index_count: indices.len() as u32,
            first_index: self.indices.len() as u32,
            base_vertex: self.vertices.len() as i32,
        };
        self.vertices.extend(vertices);
        self.indices.extend(indices);
        self.submeshes.push(submesh);
        submesh
    }
}

impl<V> Default for MeshData<V> {
    fn default() -> Self {
        Self::new()
    }
}

pub fn add_quad(
    vertices: &mut Vec<ModelVertex>,
    indices: &mut Vec<u32>,
    v0: [f32; 3],
    v1: [f32; 3],
    v2: [f32; 3],
    v3: [f32; 3],
    normal: [f32; 3],
    color: [f32; 3],
) {
    let base_idx = vertices.len() as u32;
    for position in [v0, v1, v2, v3] {
        vertices.push(ModelVertex {
            position,
            normal,
            color,
        });
    }
    indices.extend_from_slice(&[
        base_idx,
        base_idx + 1,
        base_idx + 2,
        base_idx,
        base_idx + 2,
        base_idx + 3,
    ]);
}

/// Flat grid over `[-0.5, 0.5]` in x/z with `tessellation` quads per side.
/// Height comes from the heightmap in the vertex stage.
pub fn build_patch(tessellation: u32) -> (Vec<PatchVertex>, Vec<u32>) {
    let n = tessellation.max(1);
    let row = n + 1;
    let mut vertices = Vec::with_capacity((row * row) as usize);
    let mut indices = Vec::with_capacity((n * n * 6) as usize);

    for z in 0..row {
        for x in 0..row {
            let u = x as f32 / n as f32;
            let v = z as f32 / n as f32;
            vertices.push(PatchVertex {
                position: [u - 0.5, 0.0, v - 0.5],
                uv: [u, v],
            });
        }
    }

    for z in 0..n {
        for x in 0..n {
            let i0 = z * row + x;
            let i1 = i0 + 1;
            let i2 = i0 + row;
            let i3 = i2 + 1;
            // counter-clockwise seen from +y
            indices.extend_from_slice(&[i0, i2, i1, i1, i2, i3]);
        }
    }

    (vertices, indices)
}

/// Grass blade mesh with two submeshes sharing one buffer pair:
/// `[0]` a tapered blade of `segments` quads for near blades,
/// `[1]` a single triangle for the LOD partition.
/// Blades are unit sized (width 1 along x, height 1 along y) and scaled in the shader.
pub fn build_blades(segments: u32) -> MeshData<PatchVertex> {
    let segments = segments.max(1);
    let mut mesh = MeshData::new();

    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    for s in 0..=segments {
        let t = s as f32 / segments as f32;
        let half = 0.5 * (1.0 - t);
        let bend = BLADE_BEND * t * t;
        vertices.push(PatchVertex {
            position: [-half, t, bend],
            uv: [0.0, t],
        });
        vertices.push(PatchVertex {
            position: [half, t, bend],
            uv: [1.0, t],
        });
    }
    for s in 0..segments {
        let b = s * 2;
        indices.extend_from_slice(&[b, b + 1, b + 2, b + 1, b + 3, b + 2]);
    }
    mesh.push_submesh(vertices, indices);

    let lod = vec![
        PatchVertex {
            position: [-0.5, 0.0, 0.0],
            uv: [0.0, 0.0],
        },
        PatchVertex {
            position: [0.5, 0.0, 0.0],
            uv: [1.0, 0.0],
        },
        PatchVertex {
            position: [0.0, 1.0, BLADE_BEND],
            uv: [0.5, 1.0],
        },
    ];
    mesh.push_submesh(lod, vec![0, 1, 2]);

    mesh
}

/// Axis-aligned cube centered on the origin, one colour per face pair.
pub fn build_cube(half: f32, color: [f32; 3]) -> (Vec<ModelVertex>, Vec<u32>) {
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    let h = half;

    // +X
    add_quad(&mut vertices, &mut indices, [h, -h, h], [h, -h, -h], [h, h, -h], [h, h, h], [1.0, 0.0, 0.0], color);
    // -X
    add_quad(&mut vertices, &mut indices, [-h, -h, -h], [-h, -h, h], [-h, h, h], [-h, h, -h], [-1.0, 0.0, 0.0], color);
    // +Y
    add_quad(&mut vertices, &mut indices, [-h, h, h], [h, h, h], [h, h, -h], [-h, h, -h], [0.0, 1.0, 0.0], color);
    // -Y
    add_quad(&mut vertices, &mut indices, [-h, -h, -h], [h, -h, -h], [h, -h, h], [-h, -h, h], [0.0, -1.0, 0.0], color);
    // +Z
    add_quad(&mut vertices, &mut indices, [-h, -h, h], [h, -h, h], [h, h, h], [-h, h, h], [0.0, 0.0, 1.0], color);
    // -Z
    add_quad(&mut vertices, &mut indices, [h, -h, -h], [-h, -h, -h], [-h, h, -h], [h, h, -h], [0.0, 0.0, -1.0], color);

    (vertices, indices)
}

/// Cube body with a smaller cube on top as a second submesh.
pub fn build_marker(half: f32, body: [f32; 3], cap: [f32; 3]) -> MeshData<ModelVertex> {
    let mut mesh = MeshData::new();
    let (v, i) = build_cube(half, body);
    mesh.push_submesh(v, i);

    let (mut v, i) = build_cube(half * 0.5, cap);
    for vertex in &mut v {
        vertex.position[1] += half * 1.5;
    }
    mesh.push_submesh(v, i);
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_spans_unit_square() {
        let (vertices, indices) = build_patch(4);
        assert_eq!(vertices.len(), 25);
        assert_eq!(indices.len(), 4 * 4 * 6);
        let min_x = vertices.iter().map(|v| v.position[0]).fold(f32::MAX, f32::min);
        let max_z = vertices.iter().map(|v| v.position[2]).fold(f32::MIN, f32::max);
        assert_eq!(min_x, -0.5);
        assert_eq!(max_z, 0.5);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn blade_submeshes_share_buffers() {
        let mesh = build_blades(3);
        assert_eq!(mesh.submeshes.len(), 2);
        let near = mesh.submeshes[0];
        let lod = mesh.submeshes[1];
        assert_eq!(near.first_index, 0);
        assert_eq!(near.index_count, 18);
        assert_eq!(lod.first_index, 18);
        assert_eq!(lod.index_count, 3);
        assert_eq!(lod.base_vertex, 8);
        assert_eq!(mesh.vertices.len(), 11);
    }

    #[test]
    fn blades_stay_inside_unit_height() {
        let mesh = build_blades(4);
        for v in &mesh.vertices {
            assert!((0.0..=1.0).contains(&v.position[1]));
            assert!(v.position[0].abs() <= 0.5);
        }
    }

    #[test]
    fn marker_has_two_cube_submeshes() {
        let mesh = build_marker(1.0, [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]);
        assert_eq!(mesh.submeshes.len(), 2);
        assert_eq!(mesh.submeshes[1].first_index, 36);
        assert_eq!(mesh.submeshes[1].base_vertex, 24);
        assert_eq!(mesh.vertices.len(), 48);
    }
}
