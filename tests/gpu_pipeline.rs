//! End-to-end checks of the culling, transfer and terrain gate on a real
//! device. Each test returns early when no adapter is available.

use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;

use terracull::core::bounds::BoundingVolume;
use terracull::core::uniforms::CounterBlock;
use terracull::render::culler::{CullCandidates, CullFrame, CullKernel, CullerDesc, VisibilityCuller};
use terracull::render::frustum::{Frustum, cull_offsets_reference};
use terracull::render::indirect::{CounterSlot, DrawIndexedIndirect, IndirectDrawCoordinator};
use terracull::render::mesh::build_marker;
use terracull::render::target::FrameTarget;
use terracull::settings::{CameraSettings, GrassSettings, TerrainSettings};
use terracull::{COLOR_FORMAT, Camera, CameraRig, ChunkedTerrain, GpuContext, InitError};

fn gpu() -> Option<GpuContext> {
    match GpuContext::headless_blocking() {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}

fn encoder(ctx: &GpuContext) -> wgpu::CommandEncoder {
    ctx.device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Test Encoder") })
}

fn read_back<T: bytemuck::Pod>(ctx: &GpuContext, source: &wgpu::Buffer, offset: u64, count: usize) -> Vec<T> {
    let size = (count * std::mem::size_of::<T>()) as u64;
    let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Test Staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut enc = encoder(ctx);
    enc.copy_buffer_to_buffer(source, offset, &staging, 0, size);
    ctx.queue.submit(Some(enc.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = crossbeam_channel::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    ctx.device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .unwrap();
    rx.recv().unwrap().unwrap();
    let data = slice.get_mapped_range();
    bytemuck::cast_slice::<u8, T>(&data).to_vec()
}

fn unit_box() -> BoundingVolume {
    BoundingVolume::from_points([Vec3::new(-0.5, 0.0, -0.5), Vec3::new(0.5, 1.0, 0.5)])
}

fn view_proj(eye: Vec3, target: Vec3, fov_degrees: f32) -> Mat4 {
    Mat4::perspective_rh(fov_degrees.to_radians(), 1.0, 0.1, 500.0) * Mat4::look_at_rh(eye, target, Vec3::Y)
}

fn offset_culler(ctx: &GpuContext) -> VisibilityCuller {
    VisibilityCuller::new(
        ctx,
        &CullerDesc {
            label: "Test Offset Culler",
            kernel: CullKernel::OffsetBased,
            candidate_capacity: 1024,
            output_capacity: 1024,
            secondary_capacity: 0,
            chunk_source: None,
        },
    )
    .unwrap()
}

#[test]
fn cleared_counter_reads_zero_after_empty_dispatch() {
    let Some(ctx) = gpu() else { return };
    let mut culler = offset_culler(&ctx);
    let volume = unit_box();
    let frame = CullFrame::new(&view_proj(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, 90.0), Vec3::new(0.0, 2.0, 5.0));

    // leave a non-zero count behind first
    let offsets = [[0.0f32, 0.0]; 8];
    let mut enc = encoder(&ctx);
    let pass = culler
        .clear_instance_count(&ctx.queue)
        .submit(&ctx.queue, CullCandidates::Offsets(&offsets), &volume.corners, &Mat4::IDENTITY, &frame)
        .dispatch(&mut enc);
    let (count, _) = pass.read_instance_count(&ctx, enc).unwrap();
    assert_eq!(count, 8);

    let mut enc = encoder(&ctx);
    let pass = culler
        .clear_instance_count(&ctx.queue)
        .submit(&ctx.queue, CullCandidates::Offsets(&[]), &volume.corners, &Mat4::IDENTITY, &frame)
        .dispatch(&mut enc);
    let (count, _) = pass.read_instance_count(&ctx, enc).unwrap();
    assert_eq!(count, 0);
}

#[test]
fn candidates_inside_a_wide_frustum_all_survive() {
    let Some(ctx) = gpu() else { return };
    let mut culler = VisibilityCuller::new(
        &ctx,
        &CullerDesc {
            label: "Test Transform Culler",
            kernel: CullKernel::PlainTransform,
            candidate_capacity: 1024,
            output_capacity: 1024,
            secondary_capacity: 0,
            chunk_source: None,
        },
    )
    .unwrap();
    let volume = unit_box();
    let eye = Vec3::new(0.0, 3.0, 8.0);
    let frame = CullFrame::new(&view_proj(eye, Vec3::ZERO, 100.0), eye);
    let transforms: Vec<Mat4> = (0..100)
        .map(|i| Mat4::from_translation(Vec3::new((i % 10) as f32 * 0.1 - 0.5, 0.0, (i / 10) as f32 * 0.1 - 0.5)))
        .collect();

    let mut enc = encoder(&ctx);
    let pass = culler
        .clear_instance_count(&ctx.queue)
        .submit(&ctx.queue, CullCandidates::Transforms(&transforms), &volume.corners, &Mat4::IDENTITY, &frame)
        .dispatch(&mut enc);
    let (count, _) = pass.read_instance_count(&ctx, enc).unwrap();
    assert_eq!(count, 100);
}

#[test]
fn candidates_behind_the_camera_are_all_rejected() {
    let Some(ctx) = gpu() else { return };
    let mut culler = offset_culler(&ctx);
    let volume = unit_box();
    let eye = Vec3::new(0.0, 1.0, 0.0);
    let frame = CullFrame::new(&view_proj(eye, Vec3::new(0.0, 1.0, -10.0), 90.0), eye);
    let offsets: Vec<[f32; 2]> = (0..200).map(|i| [(i % 20) as f32 - 10.0, 20.0 + (i / 20) as f32]).collect();

    let mut enc = encoder(&ctx);
    let pass = culler
        .clear_instance_count(&ctx.queue)
        .submit(&ctx.queue, CullCandidates::Offsets(&offsets), &volume.corners, &Mat4::IDENTITY, &frame)
        .dispatch(&mut enc);
    let (count, _) = pass.read_instance_count(&ctx, enc).unwrap();
    assert_eq!(count, 0);
}

#[test]
fn gpu_count_matches_cpu_reference_on_a_grid() {
    let Some(ctx) = gpu() else { return };
    let mut culler = offset_culler(&ctx);
    let volume = unit_box();
    let scale = Mat4::from_scale(Vec3::new(8.0, 4.0, 8.0));
    let eye = Vec3::new(10.0, 20.0, 90.0);
    let vp = view_proj(eye, Vec3::new(-30.0, 0.0, -40.0), 45.0);
    let frame = CullFrame::new(&vp, eye);
    // chunk centres sit on a 13.0 grid so no box touches a plane edge-on
    let offsets: Vec<[f32; 2]> = (0..1024)
        .map(|i| [((i % 32) as f32 - 16.0) * 13.0, ((i / 32) as f32 - 16.0) * 13.0])
        .collect();

    let mut enc = encoder(&ctx);
    let pass = culler
        .clear_instance_count(&ctx.queue)
        .submit(&ctx.queue, CullCandidates::Offsets(&offsets), &volume.corners, &scale, &frame)
        .dispatch(&mut enc);
    let (count, _) = pass.read_instance_count(&ctx, enc).unwrap();

    let expected = cull_offsets_reference(&Frustum::from_view_proj(&vp), &offsets, &volume.corners, &scale);
    assert!(count > 0 && (count as usize) < offsets.len());
    assert!((count as i64 - expected.len() as i64).abs() <= 2, "gpu {count} cpu {}", expected.len());
}

#[test]
fn zero_transfer_leaves_index_count_alone() {
    let Some(ctx) = gpu() else { return };
    let mut culler = offset_culler(&ctx);
    let coordinator = IndirectDrawCoordinator::new(&ctx);
    let template = DrawIndexedIndirect {
        index_count: 1536,
        instance_count: 99,
        first_index: 12,
        base_vertex: 4,
        first_instance: 0,
    };
    let args = coordinator.create_args(&ctx, "Test Args", &culler, template, CounterSlot::Primary);
    let volume = unit_box();
    let frame = CullFrame::new(&Mat4::IDENTITY, Vec3::ZERO);

    let mut enc = encoder(&ctx);
    let pass = culler
        .clear_instance_count(&ctx.queue)
        .submit(&ctx.queue, CullCandidates::Offsets(&[]), &volume.corners, &Mat4::IDENTITY, &frame)
        .dispatch(&mut enc);
    coordinator.send_instance_count(&mut enc, &pass, &args);
    ctx.queue.submit(Some(enc.finish()));

    let words: Vec<u32> = read_back(&ctx, args.buffer(), 0, 5);
    assert_eq!(words, vec![1536, 0, 12, 4, 0]);
}

#[test]
fn transfer_writes_the_culled_count() {
    let Some(ctx) = gpu() else { return };
    let mut culler = offset_culler(&ctx);
    let coordinator = IndirectDrawCoordinator::new(&ctx);
    let args = coordinator.create_args(&ctx, "Test Args", &culler, DrawIndexedIndirect::new(6, 0, 0), CounterSlot::Primary);
    let volume = unit_box();
    let eye = Vec3::new(0.0, 2.0, 6.0);
    let frame = CullFrame::new(&view_proj(eye, Vec3::ZERO, 90.0), eye);
    let offsets = [[0.0f32, 0.0], [0.5, 0.5], [0.0, 100.0]];

    let mut enc = encoder(&ctx);
    let pass = culler
        .clear_instance_count(&ctx.queue)
        .submit(&ctx.queue, CullCandidates::Offsets(&offsets), &volume.corners, &Mat4::IDENTITY, &frame)
        .dispatch(&mut enc);
    coordinator.send_instance_count(&mut enc, &pass, &args);
    let (count, _) = pass.read_instance_count(&ctx, enc).unwrap();
    assert_eq!(count, 2);

    let words: Vec<u32> = read_back(&ctx, args.buffer(), 0, 5);
    assert_eq!(words, vec![6, 2, 0, 0, 0]);
}

fn grass_culler(ctx: &GpuContext, chunks: &wgpu::Buffer) -> VisibilityCuller {
    VisibilityCuller::new(
        ctx,
        &CullerDesc {
            label: "Test Grass Culler",
            kernel: CullKernel::GrassTwoPass,
            candidate_capacity: 64,
            output_capacity: 64,
            secondary_capacity: 64,
            chunk_source: Some(chunks),
        },
    )
    .unwrap()
}

fn single_chunk(ctx: &GpuContext) -> wgpu::Buffer {
    ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Test Visible Chunks"),
        contents: bytemuck::cast_slice(&[[0.0f32, 0.0]]),
        usage: wgpu::BufferUsages::STORAGE,
    })
}

fn blade_volume() -> BoundingVolume {
    BoundingVolume::from_points([Vec3::new(-0.1, 0.0, -0.1), Vec3::new(0.1, 1.0, 0.1)])
}

// Camera at (0, 2, 10) looking down -z, LOD beyond 20 units.
fn grass_frame() -> CullFrame {
    let eye = Vec3::new(0.0, 2.0, 10.0);
    CullFrame::new(&view_proj(eye, Vec3::new(0.0, 2.0, -100.0), 90.0), eye).with_grass(0, 1, 20.0)
}

#[test]
fn grass_splits_near_and_far_blades() {
    let Some(ctx) = gpu() else { return };
    let chunks = single_chunk(&ctx);
    let mut culler = grass_culler(&ctx, &chunks);
    let volume = blade_volume();
    let frame = grass_frame();
    // near, far, behind the camera
    let blades = [[0.0f32, 5.0], [0.0, -50.0], [0.0, 30.0]];

    let mut enc = encoder(&ctx);
    let pass = culler
        .clear_instance_count(&ctx.queue)
        .submit(&ctx.queue, CullCandidates::Offsets(&blades), &volume.corners, &Mat4::IDENTITY, &frame)
        .dispatch(&mut enc);
    let (near, _) = pass.read_instance_count(&ctx, enc).unwrap();
    assert_eq!(near, 1);

    let block: Vec<CounterBlock> = read_back(&ctx, culler.counter_buffer(), 0, 1);
    assert_eq!(block[0].clamped(), (1, 1));

    let near_blade: Vec<[f32; 2]> = read_back(&ctx, culler.output_buffer(), 0, 1);
    let far_blade: Vec<[f32; 2]> = read_back(&ctx, culler.output_buffer(), 64 * 8, 1);
    assert_eq!(near_blade[0], [0.0, 5.0]);
    assert_eq!(far_blade[0], [0.0, -50.0]);
}

#[test]
fn grass_counts_reach_near_and_lod_draw_args() {
    let Some(ctx) = gpu() else { return };
    let chunks = single_chunk(&ctx);
    let mut culler = grass_culler(&ctx, &chunks);
    let coordinator = IndirectDrawCoordinator::new(&ctx);
    let near_args = coordinator.create_args(&ctx, "Near Args", &culler, DrawIndexedIndirect::new(24, 0, 0), CounterSlot::Primary);
    let lod_args = coordinator.create_args(&ctx, "LOD Args", &culler, DrawIndexedIndirect::new(3, 24, 10), CounterSlot::Secondary);
    // same slot, never sent this frame
    let idle_lod_args = coordinator.create_args(&ctx, "Idle LOD Args", &culler, DrawIndexedIndirect::new(3, 24, 10), CounterSlot::Secondary);
    let volume = blade_volume();
    let frame = grass_frame();
    // one near, two far, one behind the camera
    let blades = [[0.0f32, 5.0], [0.0, -50.0], [1.0, -60.0], [0.0, 30.0]];

    let mut enc = encoder(&ctx);
    let pass = culler
        .clear_instance_count(&ctx.queue)
        .submit(&ctx.queue, CullCandidates::Offsets(&blades), &volume.corners, &Mat4::IDENTITY, &frame)
        .dispatch(&mut enc);
    coordinator.send_instance_count(&mut enc, &pass, &near_args);
    coordinator.send_instance_count(&mut enc, &pass, &lod_args);
    ctx.queue.submit(Some(enc.finish()));

    let near: Vec<u32> = read_back(&ctx, near_args.buffer(), 0, 5);
    let lod: Vec<u32> = read_back(&ctx, lod_args.buffer(), 0, 5);
    let idle: Vec<u32> = read_back(&ctx, idle_lod_args.buffer(), 0, 5);
    assert_eq!(near, vec![24, 1, 0, 0, 0]);
    assert_eq!(lod, vec![3, 2, 24, 10, 0]);
    assert_eq!(idle, vec![3, 0, 24, 10, 0]);
}

#[test]
fn transfer_rejects_a_pass_from_another_culler() {
    let Some(ctx) = gpu() else { return };
    let bound = offset_culler(&ctx);
    let mut other = offset_culler(&ctx);
    let coordinator = IndirectDrawCoordinator::new(&ctx);
    let args = coordinator.create_args(&ctx, "Bound Args", &bound, DrawIndexedIndirect::new(6, 0, 0), CounterSlot::Primary);
    let volume = unit_box();
    let frame = CullFrame::new(&Mat4::IDENTITY, Vec3::ZERO);

    let mut enc = encoder(&ctx);
    let pass = other
        .clear_instance_count(&ctx.queue)
        .submit(&ctx.queue, CullCandidates::Offsets(&[]), &volume.corners, &Mat4::IDENTITY, &frame)
        .dispatch(&mut enc);
    let sent = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        coordinator.send_instance_count(&mut enc, &pass, &args);
    }));
    assert!(sent.is_err());
}

fn small_terrain(ctx: &GpuContext) -> ChunkedTerrain {
    let terrain = TerrainSettings {
        chunk_dimension: 4,
        chunk_size: 16.0,
        tessellation: 4,
        heightmap_resolution: 32,
        ..Default::default()
    };
    let grass = GrassSettings {
        per_chunk: 256,
        ..Default::default()
    };
    ChunkedTerrain::new(ctx, &terrain, &grass, COLOR_FORMAT).unwrap()
}

#[test]
fn grass_that_cannot_fit_its_partition_fails_init() {
    let Some(ctx) = gpu() else { return };
    let terrain = TerrainSettings {
        chunk_dimension: 32,
        chunk_size: 4.0,
        tessellation: 1,
        heightmap_resolution: 8,
        ..Default::default()
    };
    let grass = GrassSettings {
        per_chunk: 10_000,
        ..Default::default()
    };
    let result = ChunkedTerrain::new(&ctx, &terrain, &grass, COLOR_FORMAT);
    assert!(matches!(result, Err(InitError::Settings(_))));
}

#[test]
fn terrain_renders_only_when_chunks_are_visible() {
    let Some(ctx) = gpu() else { return };
    let mut terrain = small_terrain(&ctx);
    let target = FrameTarget::new(&ctx, 128, 128);

    let mut camera = Camera::new(Vec3::new(0.0, 40.0, 60.0), &CameraSettings::default(), target.aspect());
    camera.look_at(Vec3::ZERO);
    let mut rig = CameraRig::new(camera);

    let stats = terrain.render(&ctx, &rig, &target).unwrap();
    assert!(stats.rendered);
    assert_eq!(stats.visible_chunks, 16);

    // looking straight away from the grid
    rig.main.position = Vec3::new(0.0, 40.0, 200.0);
    rig.main.look_at(Vec3::new(0.0, 40.0, 400.0));
    let stats = terrain.render(&ctx, &rig, &target).unwrap();
    assert!(!stats.rendered);
    assert_eq!(stats.visible_chunks, 0);
}

#[test]
fn models_render_through_the_terrain_coordinator() {
    let Some(ctx) = gpu() else { return };
    let mut terrain = small_terrain(&ctx);
    let target = FrameTarget::new(&ctx, 64, 64);
    let markers = terrain.add_model(&ctx, &build_marker(1.0, [0.8, 0.3, 0.2], [0.9, 0.9, 0.3])).unwrap();
    let second = terrain.add_model(&ctx, &build_marker(0.5, [0.2, 0.3, 0.8], [0.9, 0.9, 0.9])).unwrap();
    assert_ne!(markers, second);
    terrain.set_model_instances(markers, &[Mat4::from_translation(Vec3::new(0.0, 14.0, 0.0))]);
    terrain.set_model_instances(second, &[Mat4::from_translation(Vec3::new(4.0, 14.0, 4.0)); 3]);

    let mut camera = Camera::new(Vec3::new(0.0, 40.0, 60.0), &CameraSettings::default(), target.aspect());
    camera.look_at(Vec3::ZERO);
    let stats = terrain.render(&ctx, &CameraRig::new(camera), &target).unwrap();
    assert!(stats.rendered);
}

#[test]
fn inspection_camera_does_not_change_culling() {
    let Some(ctx) = gpu() else { return };
    let mut terrain = small_terrain(&ctx);
    let target = FrameTarget::new(&ctx, 64, 64);

    let mut main = Camera::new(Vec3::new(-20.0, 10.0, -20.0), &CameraSettings::default(), 1.0);
    main.look_at(Vec3::new(-40.0, 0.0, -40.0));
    let mut rig = CameraRig::new(main);
    let alone = terrain.render(&ctx, &rig, &target).unwrap();

    let mut overhead = Camera::new(Vec3::new(0.0, 120.0, 120.0), &CameraSettings::default(), 1.0);
    overhead.look_at(Vec3::ZERO);
    rig.inspect = Some(overhead);
    let inspected = terrain.render(&ctx, &rig, &target).unwrap();

    assert_eq!(alone.visible_chunks, inspected.visible_chunks);
    assert!(alone.visible_chunks < 16);
}
