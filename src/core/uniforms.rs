use bytemuck::{Pod, Zeroable};

use crate::core::light::LightUniform;

/// Per-dispatch culling parameters.
/// Note: Must match `CullParams` in cull_common.wgsl byte for byte (336 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct CullParams {
    /// 6 frustum planes (xyz = normal, w = distance), normalized
    pub planes: [[f32; 4]; 6],
    /// Culling shape corners in local space
    pub corners: [[f32; 4]; 8],
    /// Applied to every corner before the candidate placement
    pub scale: [[f32; 4]; 4],
    /// Main camera position (w unused)
    pub camera_pos: [f32; 4],
    /// Number of candidates uploaded this frame
    pub sent_count: u32,
    pub grass_per_chunk: u32,
    pub visible_chunks: u32,
    pub plane_dimension: f32,
    pub height_scale: f32,
    pub lod_distance: f32,
    /// Thread groups along x for this dispatch
    pub group_count_x: u32,
    pub _padding: u32,
}

const _: () = assert!(std::mem::size_of::<CullParams>() == 336);

/// Counter block paired with every append buffer.
/// `primary` is the append counter; `secondary` serves the dependent
/// partition (grass LOD). Capacities are rewritten on every clear.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CounterBlock {
    pub primary: u32,
    pub secondary: u32,
    pub capacity: u32,
    pub secondary_capacity: u32,
}

impl CounterBlock {
    pub fn cleared(capacity: u32, secondary_capacity: u32) -> Self {
        CounterBlock {
            primary: 0,
            secondary: 0,
            capacity,
            secondary_capacity,
        }
    }

    /// Counts the draws will actually see (appends past capacity are dropped).
    pub fn clamped(&self) -> (u32, u32) {
        (
            self.primary.min(self.capacity),
            self.secondary.min(self.secondary_capacity),
        )
    }
}

/// Shared render uniforms for the terrain, grass and model passes.
/// Note: Must match `Scene` in scene_common.wgsl (144 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct SceneUniforms {
    pub view_proj: [[f32; 4]; 4],
    /// Active camera position, w = time in seconds
    pub camera_pos: [f32; 4],
    pub light: LightUniform,
    pub chunk_size: f32,
    pub height_scale: f32,
    pub plane_dimension: f32,
    pub heightmap_resolution: f32,
    /// Blade width, blade height
    pub blade_size: [f32; 2],
    pub lod_distance: f32,
    pub _padding: f32,
}

const _: () = assert!(std::mem::size_of::<SceneUniforms>() == 144);
