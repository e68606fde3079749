//! Rendering-related modules
//! Contains the GPU context, visibility culling, indirect draw plumbing,
//! mesh building, shared scene resources and the instanced model renderer.

pub mod culler;
pub mod frustum;
pub mod gpu;
pub mod indirect;
pub mod mesh;
pub mod model;
pub mod scene;
pub mod target;

// Re-export commonly used types
pub use culler::{CullCandidates, CullFrame, CullKernel, CullPass, CullerDesc, VisibilityCuller};
pub use frustum::{Frustum, cull_offsets_reference, cull_transforms_reference};
pub use gpu::GpuContext;
pub use indirect::{CounterSlot, DrawIndexedIndirect, IndirectArgs, IndirectDrawCoordinator};
pub use mesh::{MeshData, SubMesh, build_blades, build_cube, build_marker, build_patch};
pub use model::{InstancedModelRenderer, ModelHandle};
pub use scene::SceneResources;
pub use target::FrameTarget;
