// Culling capacities. These size every fixed buffer and are also written into
// each counter block so the kernels clamp against the same numbers.
pub const MAX_INSTANCES: usize = 1024;
pub const MAX_GRASS_PER_CHUNK: usize = 10_000;
pub const MAX_CHUNKS: usize = 1024;

/// Elements per grass output partition (near and LOD each get one).
/// Must stay a multiple of 32 so the LOD partition starts on a 256-byte boundary.
pub const GRASS_PARTITION_CAPACITY: usize = 1 << 21;

// Kernel thread-group shapes (must match the @workgroup_size attributes)
pub const CULL_GROUP_SIZE: u32 = 32;
pub const GRASS_GROUP_SIZE_X: u32 = 32;
pub const GRASS_GROUP_SIZE_Y: u32 = 8;

// Terrain defaults
pub const DEFAULT_CHUNK_DIMENSION: u32 = 8;
pub const DEFAULT_CHUNK_SIZE: f32 = 32.0;
pub const DEFAULT_TESSELLATION: u32 = 16;
pub const DEFAULT_HEIGHT_DISPLACEMENT: f32 = 12.0;
pub const DEFAULT_HEIGHTMAP_RESOLUTION: u32 = 256;
pub const DEFAULT_TERRAIN_SEED: u32 = 2137;

// Grass defaults
pub const DEFAULT_GRASS_PER_CHUNK: u32 = 2048;
pub const DEFAULT_GRASS_LOD_DISTANCE: f32 = 48.0;
pub const DEFAULT_BLADE_HEIGHT: f32 = 0.9;
pub const DEFAULT_BLADE_WIDTH: f32 = 0.12;
pub const DEFAULT_GRASS_SEED: u64 = 7;
/// Peak sideways wind displacement of a blade tip in world units
pub const GRASS_SWAY_AMPLITUDE: f32 = 0.15;

// Camera defaults
pub const DEFAULT_FOV_Y_DEGREES: f32 = 70.0;
pub const DEFAULT_NEAR: f32 = 0.1;
pub const DEFAULT_FAR: f32 = 1000.0;

pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
