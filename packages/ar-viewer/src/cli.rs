use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::time::Instant;

use crate::assets;
use crate::config::ViewerConfig;
use crate::gpu::mesh::{self, Vertex};
use crate::gpu::readback;
use crate::gpu::renderer::GpuRenderer;
use crate::material::MaterialInstance;
use crate::media::VideoDims;
use crate::orientation::OrientationSample;
use crate::registry::{MeshNode, SubMesh, Transform, VisualObject};
use crate::render_job::{RenderError, RenderJobSpec, RenderMetadata, RenderPhase, RenderProgress};
use crate::sensors::HostSensors;
use crate::sync::{ControlKey, ControlValue, ObjectProperty};
use crate::viewer::{FrameOutcome, Viewer};

const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the demo scene to PNG frames
    Render {
        /// Output directory for frames
        #[arg(long)]
        out: PathBuf,

        /// Viewer config JSON
        #[arg(long)]
        config: Option<PathBuf>,

        /// Frames per second
        #[arg(long, default_value_t = 30.0)]
        fps: f32,

        /// Duration in seconds
        #[arg(long, default_value_t = 4.0)]
        duration: f32,

        /// Output width
        #[arg(long, default_value_t = 1280)]
        width: u32,

        /// Output height
        #[arg(long, default_value_t = 720)]
        height: u32,

        /// Seed for particle emission sampling
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Sweep a scripted device orientation through the AR camera
        #[arg(long)]
        simulate_ar: bool,

        /// Skip the particle halo
        #[arg(long)]
        no_particles: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            out,
            config,
            fps,
            duration,
            width,
            height,
            seed,
            simulate_ar,
            no_particles,
        } => {
            let job = RenderJobSpec {
                output_dir: out,
                config_path: config,
                fps,
                duration,
                width,
                height,
                seed,
                simulate_ar,
                particles: !no_particles,
            };
            pollster::block_on(render_offline(job))?;
        }
    }
    Ok(())
}

/// Roughly spherical shell of colored points.
fn demo_point_cloud(seed: u64) -> Vec<Vertex> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..4000)
        .map(|_| {
            let dir = Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0))
                .try_normalize()
                .unwrap_or(Vec3::Y);
            let p = dir * rng.gen_range(0.9..1.0) * Vec3::new(1.4, 1.0, 0.8);
            let color = [0.5 + 0.5 * dir.x.abs(), 0.4 + 0.3 * dir.y.abs(), 0.6 + 0.4 * dir.z.abs()];
            Vertex::point(p.to_array(), color)
        })
        .collect()
}

/// A sphere on a flattened cube plinth.
fn demo_mesh() -> MeshNode {
    let (sphere_vertices, sphere_indices) = mesh::create_sphere_geometry(0.8, [0.8, 0.8, 0.9]);
    let (cube_vertices, cube_indices) = mesh::create_cube_geometry([0.9, 0.6, 0.3]);
    let material = MaterialInstance::standard([1.0, 1.0, 1.0, 1.0]);

    MeshNode::new("statue")
        .with_sub_mesh(SubMesh::new(sphere_vertices, sphere_indices, material.clone()))
        .with_child(
            MeshNode::new("plinth")
                .with_transform(Transform {
                    position: Vec3::new(0.0, -1.1, 0.0),
                    rotation: Vec3::ZERO,
                    scale: Vec3::new(1.2, 0.3, 1.2),
                })
                .with_sub_mesh(SubMesh::new(cube_vertices, cube_indices, material)),
        )
}

fn demo_scene(seed: u64) -> Vec<VisualObject> {
    let cloud = assets::place_point_cloud("cloud.ply", demo_point_cloud(seed));
    let statue = assets::place_mesh("statue.glb", demo_mesh());
    vec![cloud, statue]
}

/// Scripted device orientation: a slow yaw sweep with some pitch and roll.
fn simulated_orientation(t: f32) -> OrientationSample {
    OrientationSample::new(20.0 * (t * 0.8).sin(), 90.0 + 10.0 * (t * 0.5).sin(), 8.0 * (t * 1.1).cos())
}

async fn render_offline(job: RenderJobSpec) -> Result<()> {
    job.validate().map_err(|e| RenderError::new(RenderPhase::Initialization, e))?;

    let mut config = match &job.config_path {
        Some(path) => ViewerConfig::from_file(path)
            .map_err(|e| RenderError::with_source(RenderPhase::ConfigLoading, format!("{:?}", path), e))?,
        None => ViewerConfig::default(),
    };
    config.seed = job.seed;
    config.particles_enabled = job.particles;

    let total_frames = job.total_frames();
    let dt = 1.0 / job.fps as f64;
    std::fs::create_dir_all(&job.output_dir)
        .with_context(|| format!("Failed to create output directory {:?}", job.output_dir))?;

    // WGPU Init
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None, // Headless
            force_fallback_adapter: false,
        })
        .await
        .ok_or_else(|| RenderError::new(RenderPhase::GpuSetup, "No adapter found"))?;
    let gpu_adapter = format!("{:?}", adapter.get_info());

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor::default(), None)
        .await
        .map_err(|e| RenderError::with_source(RenderPhase::GpuSetup, "Failed to create device", e))?;

    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Target Texture"),
        size: wgpu::Extent3d {
            width: job.width,
            height: job.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OUTPUT_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });

    let mut renderer = GpuRenderer::new(device, queue, OUTPUT_FORMAT);
    renderer.set_output(
        texture.create_view(&wgpu::TextureViewDescriptor::default()),
        job.width,
        job.height,
    );

    let mut viewer = Viewer::new(config, renderer, HostSensors::granted());
    viewer
        .initialize(job.width, job.height)
        .map_err(|e| RenderError::with_source(RenderPhase::Initialization, "Viewer init failed", e))?;

    let mut warnings = Vec::new();
    for object in demo_scene(job.seed) {
        let name = object.name().to_string();
        if let Err(e) = viewer.add_object(object) {
            return Err(RenderError::with_source(RenderPhase::SceneSetup, format!("Failed to add {}", name), e).into());
        }
    }

    // Reflective toggle on the mesh requests its halo through the control path
    viewer
        .apply_control(
            ControlKey::object("statue.glb", ObjectProperty::Reflective),
            ControlValue::Flag(true),
        )
        .map_err(|e| RenderError::with_source(RenderPhase::SceneSetup, "Reflective toggle failed", e))?;
    if job.particles {
        viewer.queue_activation("cloud.ply");
        let activated = viewer.process_pending().await;
        if activated == 0 {
            warnings.push("No particle halo could be activated".to_string());
        }
    }

    if job.simulate_ar {
        // The offline "feed" is the output frame itself.
        viewer.set_video_source(Some(VideoDims::new(job.width, job.height)));
        viewer.start_ar();
    }

    println!("Rendering {} frames to {:?}...", total_frames, job.output_dir);
    let started_at = chrono::Utc::now();
    let start = Instant::now();
    let mut failed_frames = 0;

    for i in 0..total_frames {
        let t = i as f64 * dt;
        if job.simulate_ar {
            viewer.on_orientation(simulated_orientation(t as f32));
        }

        match viewer.step(t) {
            FrameOutcome::Rendered => {}
            FrameOutcome::Skipped => log::warn!("Frame {} skipped", i),
            FrameOutcome::Failed { consecutive } | FrameOutcome::Degraded { consecutive } => {
                failed_frames += 1;
                log::warn!("Frame {} failed ({} in a row)", i, consecutive);
                continue;
            }
        }

        let driver = viewer.driver();
        let pixels = readback::read_texture_rgba(driver.device(), driver.queue(), &texture)
            .await
            .map_err(|e| RenderError::with_source(RenderPhase::FrameRender, format!("Readback of frame {}", i), e))?;

        let frame_path = job.frame_path(i);
        image::save_buffer(&frame_path, &pixels, job.width, job.height, image::ColorType::Rgba8)
            .map_err(|e| RenderError::with_source(RenderPhase::FrameSave, format!("{:?}", frame_path), e))?;

        if i % 30 == 0 {
            let progress = RenderProgress::new(i + 1, total_frames, start.elapsed().as_secs_f64());
            log::info!("{:.0}% ({}/{})", progress.percentage(), progress.current_frame, progress.total_frames);
        }
    }

    let halos: Vec<String> = viewer.particles().active_names().map(str::to_string).collect();
    let steps = viewer.teardown();
    log::debug!("Teardown: {:?}", steps);

    let render_duration_secs = start.elapsed().as_secs_f64();
    if failed_frames > 0 {
        warnings.push(format!("{} frames failed to render", failed_frames));
    }
    let metadata = RenderMetadata {
        job: job.clone(),
        started_at,
        completed_at: chrono::Utc::now(),
        render_duration_secs,
        frame_count: total_frames,
        failed_frames,
        average_render_fps: if render_duration_secs > 0.0 {
            total_frames as f64 / render_duration_secs
        } else {
            0.0
        },
        halos,
        viewer_version: env!("CARGO_PKG_VERSION").to_string(),
        gpu_adapter,
        warnings,
    };
    metadata
        .save(&job.output_dir.join("metadata.json"))
        .map_err(|e| RenderError::new(RenderPhase::MetadataSave, e))?;

    println!("Done.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_scene_is_deterministic() {
        let a = demo_point_cloud(7);
        let b = demo_point_cloud(7);
        assert_eq!(a, b);
        assert_ne!(a, demo_point_cloud(8));
    }

    #[test]
    fn test_demo_scene_objects() {
        let scene = demo_scene(0);
        assert_eq!(scene.len(), 2);
        assert_eq!(scene[0].name(), "cloud.ply");
        assert!(!scene[1].is_reflective());
        // Normalized so the longest side is two units.
        let bounds = scene[0].world_bounds().unwrap();
        assert!((bounds.max_dimension() - assets::POINT_CLOUD_EXTENT).abs() < 1e-3);
    }

    #[test]
    fn test_cli_parses_render() {
        let cli = Cli::try_parse_from(["ar-viewer", "render", "--out", "frames", "--simulate-ar", "--seed", "3"]).unwrap();
        match cli.command {
            Commands::Render {
                out,
                simulate_ar,
                seed,
                no_particles,
                ..
            } => {
                assert_eq!(out, PathBuf::from("frames"));
                assert!(simulate_ar);
                assert_eq!(seed, 3);
                assert!(!no_particles);
            }
        }
    }
}
