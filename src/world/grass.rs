//! Grass layer
//!
//! Blade roots are generated once per chunk-local square and reused by every
//! chunk. Each frame the second culling pass crosses them with the chunks the
//! terrain pass kept, splitting survivors into a near partition and a LOD
//! partition of the same output buffer.

use std::num::NonZeroU64;

use glam::{Mat4, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wgpu::util::DeviceExt;

use crate::constants::{GRASS_PARTITION_CAPACITY, GRASS_SWAY_AMPLITUDE, MAX_GRASS_PER_CHUNK};
use crate::core::bounds::BoundingVolume;
use crate::core::vertex::PatchVertex;
use crate::error::InitError;
use crate::render::culler::{CullCandidates, CullFrame, CullKernel, CullerDesc, VisibilityCuller};
use crate::render::gpu::GpuContext;
use crate::render::indirect::{CounterSlot, DrawIndexedIndirect, IndirectArgs, IndirectDrawCoordinator};
use crate::render::mesh::{BLADE_BEND, build_blades};
use crate::render::scene::{HEIGHTMAP_WGSL, SCENE_COMMON_WGSL, ScenePipelineDesc, SceneResources, create_scene_pipeline};
use crate::settings::GrassSettings;

const BLADE_SEGMENTS: u32 = 4;

/// Jittered grid of `count` blade roots covering `[-chunk_size/2, chunk_size/2)`
/// on both axes. Same seed, same layout.
pub fn generate_blade_offsets(count: u32, chunk_size: f32, seed: u64) -> Vec<[f32; 2]> {
    if count == 0 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let cells = (count as f32).sqrt().ceil() as u32;
    let cell = chunk_size / cells as f32;
    let half = chunk_size * 0.5;

    (0..count)
        .map(|i| {
            let cx = (i % cells) as f32;
            let cz = (i / cells) as f32;
            let jx: f32 = rng.random_range(0.0..1.0);
            let jz: f32 = rng.random_range(0.0..1.0);
            [
                ((cx + jx) * cell - half).min(half),
                ((cz + jz) * cell - half).min(half),
            ]
        })
        .collect()
}

/// Culling box of a blade root. Horizontally it covers the blade rotated to
/// any heading plus the full wind sway; vertically it spans ground level to
/// the highest terrain point plus one blade.
pub fn blade_bounds(blade_width: f32, height_displacement: f32, blade_height: f32) -> BoundingVolume {
    let reach = blade_width.max(0.0) * 0.5f32.hypot(BLADE_BEND) + GRASS_SWAY_AMPLITUDE;
    BoundingVolume::from_points([
        Vec3::new(-reach, 0.0, -reach),
        Vec3::new(reach, height_displacement + blade_height, reach),
    ])
}

/// Fails when `chunk_count` fully grassed chunks could overflow one output
/// partition, since survivors past the partition would be dropped.
pub fn check_partition_demand(chunk_count: u32, per_chunk: u32) -> Result<(), InitError> {
    let demand = chunk_count as u64 * per_chunk as u64;
    if demand > GRASS_PARTITION_CAPACITY as u64 {
        return Err(InitError::Settings(format!(
            "{} chunks of {} blades need {} slots, a grass partition holds {}",
            chunk_count, per_chunk, demand, GRASS_PARTITION_CAPACITY
        )));
    }
    Ok(())
}

pub struct GrassLayer {
    settings: GrassSettings,
    blade_offsets: Vec<[f32; 2]>,
    bounds: BoundingVolume,
    enabled: bool,

    culler: VisibilityCuller,
    near_args: IndirectArgs,
    lod_args: IndirectArgs,

    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    pipeline: wgpu::RenderPipeline,
    near_bind_group: wgpu::BindGroup,
    lod_bind_group: wgpu::BindGroup,
}

impl GrassLayer {
    /// `chunk_source` is the terrain culler's output (visible chunk offsets),
    /// holding at most `chunk_count` chunks.
    pub fn new(
        ctx: &GpuContext,
        settings: &GrassSettings,
        chunk_count: u32,
        chunk_size: f32,
        height_displacement: f32,
        coordinator: &IndirectDrawCoordinator,
        chunk_source: &wgpu::Buffer,
        scene: &SceneResources,
        color_format: wgpu::TextureFormat,
    ) -> Result<Self, InitError> {
        if settings.per_chunk as usize > MAX_GRASS_PER_CHUNK {
            return Err(InitError::Settings(format!(
                "grass per chunk {} exceeds {}",
                settings.per_chunk, MAX_GRASS_PER_CHUNK
            )));
        }
        check_partition_demand(chunk_count, settings.per_chunk)?;

        let blade_offsets = generate_blade_offsets(settings.per_chunk, chunk_size, settings.seed);
        let bounds = blade_bounds(settings.blade_width, height_displacement, settings.blade_height);

        let partition = GRASS_PARTITION_CAPACITY as u32;
        let culler = VisibilityCuller::new(
            ctx,
            &CullerDesc {
                label: "Grass Culler",
                kernel: CullKernel::GrassTwoPass,
                candidate_capacity: MAX_GRASS_PER_CHUNK as u32,
                output_capacity: partition,
                secondary_capacity: partition,
                chunk_source: Some(chunk_source),
            },
        )?;

        let mesh = build_blades(BLADE_SEGMENTS);
        let vertex_buffer = ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Grass Vertex Buffer"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Grass Index Buffer"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let near = mesh.submeshes[0];
        let lod = mesh.submeshes[1];
        let near_args = coordinator.create_args(
            ctx,
            "Grass Near Args",
            &culler,
            DrawIndexedIndirect::new(near.index_count, near.first_index, near.base_vertex),
            CounterSlot::Primary,
        );
        let lod_args = coordinator.create_args(
            ctx,
            "Grass LOD Args",
            &culler,
            DrawIndexedIndirect::new(lod.index_count, lod.first_index, lod.base_vertex),
            CounterSlot::Secondary,
        );

        let partition_bytes = partition as u64 * CullKernel::GrassTwoPass.element_size();
        let near_bind_group = scene.heightmapped_bind_group(
            ctx,
            "Grass Near Bind Group",
            culler.output_buffer(),
            0,
            NonZeroU64::new(partition_bytes),
        );
        let lod_bind_group = scene.heightmapped_bind_group(
            ctx,
            "Grass LOD Bind Group",
            culler.output_buffer(),
            partition_bytes,
            NonZeroU64::new(partition_bytes),
        );

        let pipeline = create_scene_pipeline(
            ctx,
            &ScenePipelineDesc {
                label: "Grass Pipeline",
                source: format!(
                    "{SCENE_COMMON_WGSL}\n{HEIGHTMAP_WGSL}\nconst SWAY_AMPLITUDE: f32 = {GRASS_SWAY_AMPLITUDE:?};\n{}",
                    include_str!("../shaders/grass.wgsl")
                ),
                layout: &scene.heightmapped_layout,
                vs_entry: "vs_grass",
                fs_entry: "fs_grass",
                vertex_layout: PatchVertex::desc(),
                color_format,
                blend: wgpu::BlendState::ALPHA_BLENDING,
                cull_mode: None,
                depth_write: false,
            },
        );

        tracing::info!(
            "Grass layer: {} blades per chunk, LOD beyond {}",
            settings.per_chunk,
            settings.lod_distance
        );

        Ok(Self {
            settings: settings.clone(),
            blade_offsets,
            bounds,
            enabled: settings.enabled,
            culler,
            near_args,
            lod_args,
            vertex_buffer,
            index_buffer,
            pipeline,
            near_bind_group,
            lod_bind_group,
        })
    }

    /// Records the grass cull over `visible_chunks` terrain survivors and the
    /// two count transfers. Does nothing while disabled.
    pub fn cull(
        &mut self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        coordinator: &IndirectDrawCoordinator,
        frame: &CullFrame,
        visible_chunks: u32,
    ) {
        if !self.enabled {
            return;
        }
        let frame = frame.with_grass(self.settings.per_chunk, visible_chunks, self.settings.lod_distance);
        let pass = self
            .culler
            .clear_instance_count(&ctx.queue)
            .submit(
                &ctx.queue,
                CullCandidates::Offsets(&self.blade_offsets),
                &self.bounds.corners,
                &Mat4::IDENTITY,
                &frame,
            )
            .dispatch(encoder);
        coordinator.send_instance_count(encoder, &pass, &self.near_args);
        coordinator.send_instance_count(encoder, &pass, &self.lod_args);
    }

    /// Near blades then LOD blades, both from the same output buffer.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        if !self.enabled {
            return;
        }
        pass.set_pipeline(&self.pipeline);
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);

        pass.set_bind_group(0, &self.near_bind_group, &[]);
        pass.draw_indexed_indirect(self.near_args.buffer(), 0);

        pass.set_bind_group(0, &self.lod_bind_group, &[]);
        pass.draw_indexed_indirect(self.lod_args.buffer(), 0);
    }

    /// Only the culling box depends on the displacement.
    pub fn set_height_displacement(&mut self, height_displacement: f32) {
        self.bounds = blade_bounds(self.settings.blade_width, height_displacement, self.settings.blade_height);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn blade_offsets(&self) -> &[[f32; 2]] {
        &self.blade_offsets
    }

    pub fn bounds(&self) -> &BoundingVolume {
        &self.bounds
    }

    pub fn settings(&self) -> &GrassSettings {
        &self.settings
    }

    pub fn culler(&self) -> &VisibilityCuller {
        &self.culler
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blade_offsets_stay_inside_the_chunk() {
        let offsets = generate_blade_offsets(2048, 32.0, 7);
        assert_eq!(offsets.len(), 2048);
        for [x, z] in &offsets {
            assert!((-16.0..=16.0).contains(x), "x {x}");
            assert!((-16.0..=16.0).contains(z), "z {z}");
        }
    }

    #[test]
    fn blade_offsets_are_seeded() {
        assert_eq!(generate_blade_offsets(100, 8.0, 3), generate_blade_offsets(100, 8.0, 3));
        assert_ne!(generate_blade_offsets(100, 8.0, 3), generate_blade_offsets(100, 8.0, 4));
        assert!(generate_blade_offsets(0, 8.0, 3).is_empty());
    }

    #[test]
    fn blade_offsets_cover_the_whole_chunk() {
        let offsets = generate_blade_offsets(400, 20.0, 11);
        let quadrants = offsets.iter().fold([0u32; 4], |mut acc, [x, z]| {
            acc[(*x >= 0.0) as usize + 2 * (*z >= 0.0) as usize] += 1;
            acc
        });
        assert!(quadrants.iter().all(|&q| q > 50), "{quadrants:?}");
    }

    #[test]
    fn blade_bounds_reach_above_the_highest_terrain() {
        let bounds = blade_bounds(0.2, 12.0, 0.9);
        assert_eq!(bounds.min.y, 0.0);
        assert!((bounds.max.y - 12.9).abs() < 1e-5);
        assert!(bounds.extent().x >= 0.2);
        assert_eq!(bounds.corners[7].truncate(), bounds.max);
    }

    #[test]
    fn partition_demand_is_bounded_by_one_partition() {
        assert!(check_partition_demand(64, MAX_GRASS_PER_CHUNK as u32).is_ok());
        assert!(check_partition_demand(1024, 2048).is_ok());
        assert!(matches!(
            check_partition_demand(1024, MAX_GRASS_PER_CHUNK as u32),
            Err(InitError::Settings(_))
        ));
        assert!(check_partition_demand(0, MAX_GRASS_PER_CHUNK as u32).is_ok());
    }

    // Same placement as vs_grass: scale, rotate about y, then sway along x.
    fn drawn_offset(position: [f32; 3], settings: &GrassSettings, angle: f32, wind: f32) -> Vec3 {
        let local = Vec3::new(
            position[0] * settings.blade_width,
            position[1] * settings.blade_height,
            position[2] * settings.blade_width,
        );
        let (s, c) = angle.sin_cos();
        let sway = wind * GRASS_SWAY_AMPLITUDE * position[1];
        Vec3::new(local.x * c - local.z * s + sway, local.y, local.x * s + local.z * c)
    }

    #[test]
    fn drawn_blade_stays_inside_its_culling_box() {
        for settings in [
            GrassSettings::default(),
            GrassSettings {
                blade_width: 1.5,
                blade_height: 3.0,
                ..GrassSettings::default()
            },
        ] {
            let bounds = blade_bounds(settings.blade_width, 0.0, settings.blade_height);
            let mesh = build_blades(BLADE_SEGMENTS);
            for vertex in &mesh.vertices {
                for step in 0..64 {
                    let angle = step as f32 / 64.0 * std::f32::consts::TAU;
                    for wind in [-1.0, 0.0, 1.0] {
                        let p = drawn_offset(vertex.position, &settings, angle, wind);
                        assert!(
                            p.cmpge(bounds.min - 1e-5).all() && p.cmple(bounds.max + 1e-5).all(),
                            "vertex {:?} at angle {angle} wind {wind} lands at {p} outside {:?}..{:?}",
                            vertex.position,
                            bounds.min,
                            bounds.max
                        );
                    }
                }
            }
        }
    }
}
