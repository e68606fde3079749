//! Headless terrain culling demo
//!
//! Renders a number of frames offscreen while the main camera orbits the
//! terrain, optionally from a separate inspection camera, and optionally
//! checks every GPU chunk count against the CPU reference.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use glam::{Mat4, Quat, Vec3};

use terracull::render::FrameTarget;
use terracull::render::frustum::{Frustum, cull_offsets_reference};
use terracull::render::mesh::build_marker;
use terracull::{
    COLOR_FORMAT, Camera, CameraRig, ChunkedTerrain, Error, GpuContext, MAX_INSTANCES, ReadbackError, Settings,
    ViewSource,
};

#[derive(Parser, Debug)]
#[command(name = "terracull", about = "GPU-driven terrain, grass and model culling")]
struct Args {
    /// Settings file (bincode); defaults are used when it does not exist
    #[arg(long, default_value = "terracull.bin")]
    settings: PathBuf,

    /// Frames to render
    #[arg(long, default_value_t = 120)]
    frames: u32,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Render from a fixed overhead camera while culling with the orbiting one
    #[arg(long)]
    inspect: bool,

    /// Compare each frame's visible chunk count with the CPU reference
    #[arg(long)]
    verify: bool,

    /// Write the effective settings to the settings file and exit
    #[arg(long)]
    write_settings: bool,
}

fn marker_transforms(plane_dimension: f32, height: f32, count: usize) -> Vec<Mat4> {
    let side = (count as f32).sqrt().ceil().max(1.0) as usize;
    let spacing = plane_dimension / side as f32;
    (0..count)
        .map(|i| {
            let x = ((i % side) as f32 + 0.5) * spacing - plane_dimension * 0.5;
            let z = ((i / side) as f32 + 0.5) * spacing - plane_dimension * 0.5;
            Mat4::from_scale_rotation_translation(
                Vec3::splat(1.5),
                Quat::from_rotation_y(i as f32 * 0.7),
                Vec3::new(x, height, z),
            )
        })
        .collect()
}

fn run(args: &Args) -> Result<u32, Error> {
    let settings = Settings::load_or_default(&args.settings)?;
    settings.validate()?;

    if args.write_settings {
        settings.save(&args.settings)?;
        return Ok(0);
    }

    let ctx = GpuContext::headless_blocking()?;
    let target = FrameTarget::new(&ctx, args.width, args.height);
    let mut terrain = ChunkedTerrain::new(&ctx, &settings.terrain, &settings.grass, COLOR_FORMAT)?;

    let plane_dimension = settings.terrain.chunk_dimension as f32 * settings.terrain.chunk_size;
    let displacement = settings.terrain.height_displacement;
    let markers = terrain.add_model(&ctx, &build_marker(1.0, [0.8, 0.3, 0.2], [0.9, 0.9, 0.3]))?;
    terrain.set_model_instances(
        markers,
        &marker_transforms(plane_dimension, displacement + 1.5, MAX_INSTANCES.min(256)),
    );

    let mut rig = CameraRig::new(Camera::new(Vec3::ZERO, &settings.camera, target.aspect()));
    if args.inspect {
        let mut overhead = Camera::new(
            Vec3::new(0.0, plane_dimension * 0.8, plane_dimension * 0.8),
            &settings.camera,
            target.aspect(),
        );
        overhead.look_at(Vec3::ZERO);
        rig.inspect = Some(overhead);
    }

    let orbit_radius = plane_dimension * 0.35;
    let mut mismatches = 0;
    let mut skipped = 0;
    for frame in 0..args.frames {
        let angle = frame as f32 / args.frames.max(1) as f32 * std::f32::consts::TAU;
        rig.main.position = Vec3::new(angle.cos() * orbit_radius, displacement + 6.0, angle.sin() * orbit_radius);
        rig.main.look_at(Vec3::new(0.0, displacement * 0.5, 0.0));
        terrain.set_time(frame as f32 / 60.0);

        let stats = terrain.render(&ctx, &rig, &target)?;
        if !stats.rendered {
            skipped += 1;
        }

        if args.verify {
            let frustum = Frustum::from_view_proj(&rig.main.view_proj());
            let expected = cull_offsets_reference(
                &frustum,
                terrain.chunk_offsets(),
                &terrain.bounds().corners,
                terrain.scale(),
            )
            .len() as u32;
            if expected != stats.visible_chunks {
                tracing::warn!(
                    "Frame {}: GPU kept {} chunks, CPU reference kept {}",
                    frame,
                    stats.visible_chunks,
                    expected
                );
                mismatches += 1;
            }
        }
    }

    ctx.device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .map_err(ReadbackError::from)?;

    tracing::info!(
        "Rendered {} frames ({} skipped with nothing visible) on {}",
        args.frames,
        skipped,
        ctx.adapter_info.name
    );
    Ok(mismatches)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    tracing::info!("Starting terracull...");

    match run(&args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(mismatches) => {
            tracing::error!("{} frames disagreed with the CPU reference", mismatches);
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
