//! Recording render driver for viewer tests.
//!
//! Keeps every live handle so tests can check that activation, deactivation
//! and teardown leave nothing behind. The mask pass paints a centered white
//! disc (or nothing, with `black_masks`), and the edge pass runs the CPU edge
//! filter on it, so readback returns a believable edge image. Like the wgpu
//! renderer it refuses an empty particle buffer.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::future::{ready, Ready};

use ar_viewer::config::ViewerConfig;
use ar_viewer::edge::detect_edges;
use ar_viewer::error::GpuError;
use ar_viewer::gpu::driver::{
    BufferId, FrameScene, GeometryData, GeometryId, MaskGeometry, PixelBuffer, ProgramId, RenderDriver,
    RenderTargetId,
};
use ar_viewer::gpu::mesh::{create_cube_geometry, Vertex};
use ar_viewer::material::MaterialInstance;
use ar_viewer::particle::{ParticleSeed, ParticleUniforms};
use ar_viewer::registry::{MeshNode, SubMesh, VisualObject};
use ar_viewer::sensors::HostSensors;
use ar_viewer::viewer::Viewer;

/// Driver call that should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    RenderTarget,
    /// Every second render target, which is an activation's edge target.
    EdgeTarget,
    MaskPass,
    EdgePass,
    Readback,
    /// The readback starts but resolves to an error.
    MapFailure,
    ParticleBuffer,
    ParticleProgram,
    Upload,
}

#[derive(Debug, Default)]
pub struct RecordingDriver {
    next_id: u64,
    pub targets: BTreeMap<u64, PixelBuffer>,
    pub buffers: BTreeMap<u64, Vec<ParticleSeed>>,
    pub programs: BTreeMap<u64, ParticleUniforms>,
    pub geometry: BTreeSet<u64>,
    pub created: usize,
    pub destroyed: usize,
    pub frames: Vec<FrameScene>,
    pub black_masks: bool,
    pub fail_at: Option<FailAt>,
    render_target_calls: usize,
    /// Number of upcoming `draw_frame` calls that fail.
    pub failing_frames: u32,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_handles(&self) -> usize {
        self.targets.len() + self.buffers.len() + self.programs.len() + self.geometry.len()
    }

    pub fn last_frame(&self) -> Option<&FrameScene> {
        self.frames.last()
    }

    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.created += 1;
        self.next_id
    }

    fn check(&self, at: FailAt) -> Result<(), GpuError> {
        if self.fail_at == Some(at) {
            return Err(GpuError::Resource(format!("injected failure at {:?}", at)));
        }
        Ok(())
    }

    fn target_mut(&mut self, id: RenderTargetId) -> Result<&mut PixelBuffer, GpuError> {
        self.targets.get_mut(&id.0).ok_or(GpuError::UnknownHandle {
            kind: "render target",
            id: id.0,
        })
    }
}

fn white_disc(mut pixels: PixelBuffer) -> PixelBuffer {
    let (w, h) = (pixels.width, pixels.height);
    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
    let radius = w.min(h) as f32 / 4.0;
    for y in 0..h {
        for x in 0..w {
            let (dx, dy) = (x as f32 + 0.5 - cx, y as f32 + 0.5 - cy);
            if dx * dx + dy * dy <= radius * radius {
                pixels.set_pixel(x, y, [255, 255, 255, 255]);
            }
        }
    }
    pixels
}

impl RenderDriver for RecordingDriver {
    type Readback = Ready<Result<PixelBuffer, GpuError>>;

    fn create_render_target(&mut self, width: u32, height: u32, _label: &str) -> Result<RenderTargetId, GpuError> {
        self.check(FailAt::RenderTarget)?;
        self.render_target_calls += 1;
        if self.render_target_calls % 2 == 0 {
            self.check(FailAt::EdgeTarget)?;
        }
        let id = self.id();
        self.targets.insert(id, PixelBuffer::black(width, height));
        Ok(RenderTargetId(id))
    }

    fn destroy_render_target(&mut self, id: RenderTargetId) {
        assert!(self.targets.remove(&id.0).is_some(), "render target {} destroyed twice", id.0);
        self.destroyed += 1;
    }

    fn create_particle_buffer(&mut self, seeds: &[ParticleSeed]) -> Result<BufferId, GpuError> {
        self.check(FailAt::ParticleBuffer)?;
        if seeds.is_empty() {
            return Err(GpuError::Resource("particle buffer needs at least one seed".into()));
        }
        let id = self.id();
        self.buffers.insert(id, seeds.to_vec());
        Ok(BufferId(id))
    }

    fn destroy_particle_buffer(&mut self, id: BufferId) {
        assert!(self.buffers.remove(&id.0).is_some(), "buffer {} destroyed twice", id.0);
        self.destroyed += 1;
    }

    fn create_particle_program(&mut self, uniforms: &ParticleUniforms) -> Result<ProgramId, GpuError> {
        self.check(FailAt::ParticleProgram)?;
        let id = self.id();
        self.programs.insert(id, *uniforms);
        Ok(ProgramId(id))
    }

    fn update_particle_program(&mut self, id: ProgramId, uniforms: &ParticleUniforms) -> Result<(), GpuError> {
        let slot = self.programs.get_mut(&id.0).ok_or(GpuError::UnknownHandle {
            kind: "particle program",
            id: id.0,
        })?;
        *slot = *uniforms;
        Ok(())
    }

    fn destroy_particle_program(&mut self, id: ProgramId) {
        assert!(self.programs.remove(&id.0).is_some(), "program {} destroyed twice", id.0);
        self.destroyed += 1;
    }

    fn upload_geometry(&mut self, _data: GeometryData<'_>) -> Result<GeometryId, GpuError> {
        self.check(FailAt::Upload)?;
        let id = self.id();
        self.geometry.insert(id);
        Ok(GeometryId(id))
    }

    fn release_geometry(&mut self, id: GeometryId) {
        assert!(self.geometry.remove(&id.0), "geometry {} released twice", id.0);
        self.destroyed += 1;
    }

    fn render_mask(&mut self, target: RenderTargetId, mask: &MaskGeometry, _view_proj: glam::Mat4) -> Result<(), GpuError> {
        self.check(FailAt::MaskPass)?;
        let black = self.black_masks || mask.is_empty();
        let pixels = self.target_mut(target)?;
        let cleared = PixelBuffer::black(pixels.width, pixels.height);
        *pixels = if black { cleared } else { white_disc(cleared) };
        Ok(())
    }

    fn render_edges(&mut self, mask: RenderTargetId, target: RenderTargetId) -> Result<(), GpuError> {
        self.check(FailAt::EdgePass)?;
        let edges = detect_edges(self.target_mut(mask)?);
        *self.target_mut(target)? = edges;
        Ok(())
    }

    fn read_pixels(&mut self, target: RenderTargetId) -> Result<Self::Readback, GpuError> {
        self.check(FailAt::Readback)?;
        let pixels = self.target_mut(target)?.clone();
        Ok(ready(self.check(FailAt::MapFailure).map(|_| pixels)))
    }

    fn draw_frame(&mut self, scene: &FrameScene) -> Result<(), GpuError> {
        if self.failing_frames > 0 {
            self.failing_frames -= 1;
            return Err(GpuError::Resource("injected frame failure".into()));
        }
        self.frames.push(scene.clone());
        Ok(())
    }
}

/// Small targets keep the CPU edge filter fast.
pub fn test_config() -> ViewerConfig {
    ViewerConfig {
        edge_target_size: 64,
        base_particle_count: 256,
        ..ViewerConfig::default()
    }
}

pub fn viewer() -> Viewer<RecordingDriver, HostSensors> {
    let mut viewer = Viewer::new(test_config(), RecordingDriver::new(), HostSensors::granted());
    viewer.initialize(640, 480).unwrap();
    viewer
}

pub fn cloud(name: &str) -> VisualObject {
    let vertices = (0..64)
        .map(|i| {
            let a = i as f32 / 64.0 * std::f32::consts::TAU;
            Vertex::point([a.cos(), a.sin(), 0.0], [1.0, 0.5, 0.2])
        })
        .collect();
    VisualObject::point_cloud(name, vertices)
}

pub fn cube(name: &str) -> VisualObject {
    let (v, i) = create_cube_geometry([0.7; 3]);
    VisualObject::mesh(
        name,
        MeshNode::new("root").with_sub_mesh(SubMesh::new(v, i, MaterialInstance::standard([1.0; 4]))),
    )
}
