//! Instanced model renderer
//!
//! Each registered model owns a transform culler and one indirect argument
//! record per sub-mesh. Models live in a `Vec` arena and are addressed by
//! [`ModelHandle`], so a model never points back at its renderer.

use glam::Mat4;
use wgpu::util::DeviceExt;

use crate::constants::MAX_INSTANCES;
use crate::core::bounds::BoundingVolume;
use crate::core::vertex::ModelVertex;
use crate::error::InitError;
use crate::player::camera::ViewSource;
use crate::render::culler::{CullCandidates, CullFrame, CullKernel, CullerDesc, VisibilityCuller};
use crate::render::gpu::GpuContext;
use crate::render::indirect::{CounterSlot, DrawIndexedIndirect, IndirectArgs, IndirectDrawCoordinator};
use crate::render::mesh::MeshData;
use crate::render::scene::{SCENE_COMMON_WGSL, ScenePipelineDesc, SceneResources, create_scene_pipeline};

/// Index of a model in the renderer's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ModelHandle(usize);

impl ModelHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

struct ModelEntry {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    bounds: BoundingVolume,
    culler: VisibilityCuller,
    args: Vec<IndirectArgs>,
    bind_group: wgpu::BindGroup,
    instances: Vec<Mat4>,
}

pub struct InstancedModelRenderer {
    models: Vec<ModelEntry>,
    pipeline: wgpu::RenderPipeline,
}

impl InstancedModelRenderer {
    pub fn new(ctx: &GpuContext, scene: &SceneResources, color_format: wgpu::TextureFormat) -> Self {
        let pipeline = create_scene_pipeline(
            ctx,
            &ScenePipelineDesc {
                label: "Model Pipeline",
                source: format!("{SCENE_COMMON_WGSL}\n{}", include_str!("../shaders/model.wgsl")),
                layout: &scene.model_layout,
                vs_entry: "vs_model",
                fs_entry: "fs_model",
                vertex_layout: ModelVertex::desc(),
                color_format,
                blend: wgpu::BlendState::REPLACE,
                cull_mode: Some(wgpu::Face::Back),
                depth_write: true,
            },
        );

        Self {
            models: Vec::new(),
            pipeline,
        }
    }

    /// Uploads `mesh`, derives its culling box from the vertices and prepares
    /// one argument record per sub-mesh.
    pub fn add_model(
        &mut self,
        ctx: &GpuContext,
        scene: &SceneResources,
        coordinator: &IndirectDrawCoordinator,
        mesh: &MeshData<ModelVertex>,
    ) -> Result<ModelHandle, InitError> {
        if mesh.vertices.is_empty() || mesh.submeshes.is_empty() {
            return Err(InitError::Settings("model mesh has no geometry".into()));
        }

        let bounds = BoundingVolume::from_points(mesh.vertices.iter().map(|v| v.position.into()));

        let culler = VisibilityCuller::new(
            ctx,
            &CullerDesc {
                label: "Model Culler",
                kernel: CullKernel::PlainTransform,
                candidate_capacity: MAX_INSTANCES as u32,
                output_capacity: MAX_INSTANCES as u32,
                secondary_capacity: 0,
                chunk_source: None,
            },
        )?;

        let vertex_buffer = ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Model Vertex Buffer"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Model Index Buffer"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let args = mesh
            .submeshes
            .iter()
            .map(|sub| {
                coordinator.create_args(
                    ctx,
                    "Model Draw Args",
                    &culler,
                    DrawIndexedIndirect::new(sub.index_count, sub.first_index, sub.base_vertex),
                    CounterSlot::Primary,
                )
            })
            .collect();

        let bind_group = scene.model_bind_group(ctx, "Model Bind Group", culler.output_buffer());

        let handle = ModelHandle(self.models.len());
        tracing::debug!(
            "Model {} added: {} vertices, {} submeshes",
            handle.0,
            mesh.vertices.len(),
            mesh.submeshes.len()
        );
        self.models.push(ModelEntry {
            vertex_buffer,
            index_buffer,
            bounds,
            culler,
            args,
            bind_group,
            instances: Vec::new(),
        });
        Ok(handle)
    }

    /// Replaces the candidate transforms of a model. Panics above the instance cap.
    pub fn set_instances(&mut self, handle: ModelHandle, transforms: &[Mat4]) {
        assert!(
            transforms.len() <= MAX_INSTANCES,
            "model {}: {} instances exceed the cap of {}",
            handle.0,
            transforms.len(),
            MAX_INSTANCES
        );
        let entry = &mut self.models[handle.0];
        entry.instances.clear();
        entry.instances.extend_from_slice(transforms);
    }

    pub fn instances(&self, handle: ModelHandle) -> &[Mat4] {
        &self.models[handle.0].instances
    }

    pub fn bounds(&self, handle: ModelHandle) -> &BoundingVolume {
        &self.models[handle.0].bounds
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Records every model's cull and the per-sub-mesh count transfers.
    pub fn prepare(
        &mut self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        coordinator: &IndirectDrawCoordinator,
        camera: &dyn ViewSource,
    ) {
        let frame = CullFrame::new(&camera.view_proj(), camera.position());
        for entry in &mut self.models {
            let pass = entry
                .culler
                .clear_instance_count(&ctx.queue)
                .submit(
                    &ctx.queue,
                    CullCandidates::Transforms(&entry.instances),
                    &entry.bounds.corners,
                    &Mat4::IDENTITY,
                    &frame,
                )
                .dispatch(encoder);
            for args in &entry.args {
                coordinator.send_instance_count(encoder, &pass, args);
            }
        }
    }

    /// One indirect draw per sub-mesh of every model.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        if self.models.is_empty() {
            return;
        }
        pass.set_pipeline(&self.pipeline);
        for entry in &self.models {
            pass.set_bind_group(0, &entry.bind_group, &[]);
            pass.set_vertex_buffer(0, entry.vertex_buffer.slice(..));
            pass.set_index_buffer(entry.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            for args in &entry.args {
                pass.draw_indexed_indirect(args.buffer(), 0);
            }
        }
    }
}
