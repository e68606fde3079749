//! Chunked terrain
//!
//! A square grid of identical patches displaced by one heightmap. Chunks are
//! culled on the GPU with the main camera; the visible count is read back once
//! per frame and gates the whole frame. Grass and models are culled and drawn
//! in the second submission only when at least one chunk survived.

use fastnoise_lite::{FastNoiseLite, FractalType, NoiseType};
use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;

use crate::constants::MAX_CHUNKS;
use crate::core::bounds::BoundingVolume;
use crate::core::light::{Light, LightUniform};
use crate::core::uniforms::SceneUniforms;
use crate::core::vertex::{ModelVertex, PatchVertex};
use crate::error::{InitError, ReadbackError};
use crate::player::camera::{CameraRig, ViewSource};
use crate::render::culler::{CullCandidates, CullFrame, CullKernel, CullerDesc, VisibilityCuller};
use crate::render::gpu::GpuContext;
use crate::render::indirect::{CounterSlot, DrawIndexedIndirect, IndirectArgs, IndirectDrawCoordinator};
use crate::render::mesh::{MeshData, build_patch};
use crate::render::model::{InstancedModelRenderer, ModelHandle};
use crate::render::scene::{HEIGHTMAP_WGSL, SCENE_COMMON_WGSL, ScenePipelineDesc, SceneResources, create_scene_pipeline};
use crate::render::target::FrameTarget;
use crate::settings::{GrassSettings, TerrainSettings};
use crate::world::grass::GrassLayer;

/// Outcome of one [`ChunkedTerrain::render`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Chunks the main camera can see
    pub visible_chunks: u32,
    /// False when nothing was visible and no draw was submitted
    pub rendered: bool,
}

/// Chunk centres of a `dimension` x `dimension` grid of `size`-wide chunks
/// centred on the origin, row by row along z, x varying fastest.
pub fn generate_chunk_offsets(dimension: u32, size: f32) -> Vec<[f32; 2]> {
    let half = dimension as f32 * 0.5;
    let mut offsets = Vec::with_capacity((dimension * dimension) as usize);
    for z in 0..dimension {
        for x in 0..dimension {
            offsets.push([
                (x as f32 - half) * size + size * 0.5,
                (z as f32 - half) * size + size * 0.5,
            ]);
        }
    }
    offsets
}

/// Culling box of the unit patch: x/z span the patch, y spans the full
/// displacement range.
pub fn setup_bounds(height_displacement: f32) -> BoundingVolume {
    BoundingVolume::from_points([
        Vec3::new(-0.5, 0.0, -0.5),
        Vec3::new(0.5, height_displacement.max(0.0), 0.5),
    ])
}

/// Stretches the unit patch to chunk size on x/z; height is already in world units.
pub fn chunk_scale(chunk_size: f32) -> Mat4 {
    Mat4::from_scale(Vec3::new(chunk_size, 1.0, chunk_size))
}

fn create_fbm_noise(seed: u32, frequency: f32) -> FastNoiseLite {
    let mut noise = FastNoiseLite::with_seed(seed as i32);
    noise.set_noise_type(Some(NoiseType::OpenSimplex2));
    noise.set_fractal_type(Some(FractalType::FBm));
    noise.set_fractal_octaves(Some(4));
    noise.set_fractal_lacunarity(Some(2.0));
    noise.set_fractal_gain(Some(0.5));
    noise.set_frequency(Some(frequency));
    noise
}

/// Row-major `resolution` x `resolution` heights in [0, 1] sampled over the
/// whole plane, texel (0, 0) at the (-x, -z) corner.
pub fn generate_heightmap(seed: u32, resolution: u32, plane_dimension: f32) -> Vec<f32> {
    let noise = create_fbm_noise(seed, 0.008);
    let last = (resolution.max(2) - 1) as f32;
    let mut heights = Vec::with_capacity((resolution * resolution) as usize);
    for z in 0..resolution {
        for x in 0..resolution {
            let wx = (x as f32 / last - 0.5) * plane_dimension;
            let wz = (z as f32 / last - 0.5) * plane_dimension;
            let n = noise.get_noise_2d(wx, wz);
            heights.push(((n + 1.0) * 0.5).clamp(0.0, 1.0));
        }
    }
    heights
}

pub struct ChunkedTerrain {
    settings: TerrainSettings,
    chunk_offsets: Vec<[f32; 2]>,
    bounds: BoundingVolume,
    scale: Mat4,
    light: Light,
    time: f32,

    scene: SceneResources,
    coordinator: IndirectDrawCoordinator,
    culler: VisibilityCuller,
    args: IndirectArgs,

    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,

    grass: GrassLayer,
    models: InstancedModelRenderer,
}

impl ChunkedTerrain {
    pub fn new(
        ctx: &GpuContext,
        settings: &TerrainSettings,
        grass_settings: &GrassSettings,
        color_format: wgpu::TextureFormat,
    ) -> Result<Self, InitError> {
        let chunk_count = settings.chunk_dimension as usize * settings.chunk_dimension as usize;
        if chunk_count > MAX_CHUNKS {
            return Err(InitError::Settings(format!(
                "{} chunks exceed the cap of {}",
                chunk_count, MAX_CHUNKS
            )));
        }

        let chunk_offsets = generate_chunk_offsets(settings.chunk_dimension, settings.chunk_size);
        let bounds = setup_bounds(settings.height_displacement);
        let scale = chunk_scale(settings.chunk_size);
        let plane_dimension = settings.chunk_dimension as f32 * settings.chunk_size;

        let heights = generate_heightmap(settings.seed, settings.heightmap_resolution, plane_dimension);
        let scene = SceneResources::new(ctx, &heights, settings.heightmap_resolution);

        let coordinator = IndirectDrawCoordinator::new(ctx);
        let culler = VisibilityCuller::new(
            ctx,
            &CullerDesc {
                label: "Terrain Culler",
                kernel: CullKernel::OffsetBased,
                candidate_capacity: MAX_CHUNKS as u32,
                output_capacity: MAX_CHUNKS as u32,
                secondary_capacity: 0,
                chunk_source: None,
            },
        )?;

        let (vertices, indices) = build_patch(settings.tessellation);
        let vertex_buffer = ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Terrain Patch Vertex Buffer"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Terrain Patch Index Buffer"),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let args = coordinator.create_args(
            ctx,
            "Terrain Draw Args",
            &culler,
            DrawIndexedIndirect::new(indices.len() as u32, 0, 0),
            CounterSlot::Primary,
        );

        let bind_group = scene.heightmapped_bind_group(ctx, "Terrain Bind Group", culler.output_buffer(), 0, None);
        let pipeline = create_scene_pipeline(
            ctx,
            &ScenePipelineDesc {
                label: "Terrain Pipeline",
                source: format!(
                    "{SCENE_COMMON_WGSL}\n{HEIGHTMAP_WGSL}\n{}",
                    include_str!("../shaders/terrain.wgsl")
                ),
                layout: &scene.heightmapped_layout,
                vs_entry: "vs_terrain",
                fs_entry: "fs_terrain",
                vertex_layout: PatchVertex::desc(),
                color_format,
                blend: wgpu::BlendState::REPLACE,
                cull_mode: Some(wgpu::Face::Back),
                depth_write: true,
            },
        );

        let grass = GrassLayer::new(
            ctx,
            grass_settings,
            chunk_count as u32,
            settings.chunk_size,
            settings.height_displacement,
            &coordinator,
            culler.output_buffer(),
            &scene,
            color_format,
        )?;
        let models = InstancedModelRenderer::new(ctx, &scene, color_format);

        tracing::info!(
            "Terrain: {}x{} chunks of {} ({} patch indices), displacement {}",
            settings.chunk_dimension,
            settings.chunk_dimension,
            settings.chunk_size,
            indices.len(),
            settings.height_displacement
        );

        Ok(Self {
            settings: settings.clone(),
            chunk_offsets,
            bounds,
            scale,
            light: Light::default(),
            time: 0.0,
            scene,
            coordinator,
            culler,
            args,
            vertex_buffer,
            index_buffer,
            pipeline,
            bind_group,
            grass,
            models,
        })
    }

    fn plane_dimension(&self) -> f32 {
        self.settings.chunk_dimension as f32 * self.settings.chunk_size
    }

    fn scene_uniforms(&self, view: &dyn ViewSource) -> SceneUniforms {
        let grass = self.grass.settings();
        SceneUniforms {
            view_proj: view.view_proj().to_cols_array_2d(),
            camera_pos: view.position().extend(self.time).to_array(),
            light: LightUniform::from(&self.light),
            chunk_size: self.settings.chunk_size,
            height_scale: self.settings.height_displacement,
            plane_dimension: self.plane_dimension(),
            heightmap_resolution: self.scene.heightmap_resolution as f32,
            blade_size: [grass.blade_width, grass.blade_height],
            lod_distance: grass.lod_distance,
            _padding: 0.0,
        }
    }

    /// Culls chunks with the main camera and, when any survive, draws terrain,
    /// grass and models from the active camera into `target`.
    ///
    /// Blocks once per frame on the chunk count readback.
    pub fn render(
        &mut self,
        ctx: &GpuContext,
        cameras: &CameraRig,
        target: &FrameTarget,
    ) -> Result<FrameStats, ReadbackError> {
        let main = cameras.main();
        let uniforms = self.scene_uniforms(cameras.active());
        let frame = CullFrame::new(&main.view_proj(), main.position())
            .with_plane(self.plane_dimension(), self.settings.height_displacement);

        let mut cull_encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Terrain Cull Encoder"),
        });
        let pass = self
            .culler
            .clear_instance_count(&ctx.queue)
            .submit(
                &ctx.queue,
                CullCandidates::Offsets(&self.chunk_offsets),
                &self.bounds.corners,
                &self.scale,
                &frame,
            )
            .dispatch(&mut cull_encoder);
        let (visible_chunks, pass) = pass.read_instance_count(ctx, cull_encoder)?;

        if visible_chunks == 0 {
            tracing::debug!("No terrain chunk visible, skipping frame");
            return Ok(FrameStats {
                visible_chunks: 0,
                rendered: false,
            });
        }
        tracing::trace!("{} of {} chunks visible", visible_chunks, self.chunk_offsets.len());

        self.scene.write_uniforms(&ctx.queue, &uniforms);

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Terrain Render Encoder"),
        });
        self.coordinator.send_instance_count(&mut encoder, &pass, &self.args);
        self.grass.cull(ctx, &mut encoder, &self.coordinator, &frame, visible_chunks);
        self.models.prepare(ctx, &mut encoder, &self.coordinator, main);

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Terrain Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color_view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.53,
                            g: 0.72,
                            b: 0.92,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &self.bind_group, &[]);
            render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            render_pass.draw_indexed_indirect(self.args.buffer(), 0);

            // Opaque models before the blended grass
            self.models.draw(&mut render_pass);
            self.grass.draw(&mut render_pass);
        }

        ctx.queue.submit(Some(encoder.finish()));

        Ok(FrameStats {
            visible_chunks,
            rendered: true,
        })
    }

    /// Changes the displacement and the culling boxes derived from it.
    /// Chunk offsets are not touched.
    pub fn set_height_displacement(&mut self, height_displacement: f32) {
        self.settings.height_displacement = height_displacement;
        self.bounds = setup_bounds(height_displacement);
        self.grass.set_height_displacement(height_displacement);
    }

    pub fn set_grass_enabled(&mut self, enabled: bool) {
        self.grass.set_enabled(enabled);
    }

    pub fn set_light(&mut self, light: Light) {
        self.light = light;
    }

    /// Seconds fed to the grass sway.
    pub fn set_time(&mut self, seconds: f32) {
        self.time = seconds;
    }

    pub fn chunk_offsets(&self) -> &[[f32; 2]] {
        &self.chunk_offsets
    }

    pub fn bounds(&self) -> &BoundingVolume {
        &self.bounds
    }

    pub fn scale(&self) -> &Mat4 {
        &self.scale
    }

    pub fn settings(&self) -> &TerrainSettings {
        &self.settings
    }

    pub fn grass(&self) -> &GrassLayer {
        &self.grass
    }

    /// Registers an instanced model drawn after the terrain.
    pub fn add_model(&mut self, ctx: &GpuContext, mesh: &MeshData<ModelVertex>) -> Result<ModelHandle, InitError> {
        self.models.add_model(ctx, &self.scene, &self.coordinator, mesh)
    }

    pub fn set_model_instances(&mut self, handle: ModelHandle, transforms: &[Mat4]) {
        self.models.set_instances(handle, transforms);
    }

    pub fn models(&self) -> &InstancedModelRenderer {
        &self.models
    }

    pub fn culler(&self) -> &VisibilityCuller {
        &self.culler
    }
}
