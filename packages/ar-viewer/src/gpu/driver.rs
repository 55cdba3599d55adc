//! Render driver seam.
//!
//! The viewer core talks to the GPU only through [`RenderDriver`]: opaque
//! handles for render targets, particle buffers, particle programs and object
//! geometry, a mask pass, an edge pass, a pixel readback and a frame draw.
//! Particle buffers always hold at least one seed.
//! [`crate::gpu::renderer::GpuRenderer`] implements it on wgpu; tests use a
//! recording driver.

use std::future::Future;

use crate::error::GpuError;
use crate::gpu::mesh::Vertex;
use crate::particle::{ParticleSeed, ParticleUniforms};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    };
}

handle!(
    /// Off-screen color target.
    RenderTargetId
);
handle!(
    /// Per-particle seed buffer.
    BufferId
);
handle!(
    /// Particle program with its live uniform block.
    ProgramId
);
handle!(
    /// Uploaded object geometry.
    GeometryId
);

/// RGBA8 pixels read back from a render target.
///
/// Rows are stored bottom row first, so `v = y / height` matches texture
/// coordinates with the origin at the bottom-left.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width * height * 4) as usize);
        Self { width, height, data }
    }

    /// An opaque black image.
    pub fn black(width: u32, height: u32) -> Self {
        let mut data = vec![0u8; (width * height * 4) as usize];
        for px in data.chunks_exact_mut(4) {
            px[3] = 255;
        }
        Self { width, height, data }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = ((y * self.width + x) * 4) as usize;
        self.data[i..i + 4].copy_from_slice(&rgba);
    }

    /// Reverse row order (top-first <-> bottom-first).
    pub fn flip_rows(&mut self) {
        let row = (self.width * 4) as usize;
        let h = self.height as usize;
        for y in 0..h / 2 {
            let (top, bottom) = self.data.split_at_mut((h - 1 - y) * row);
            top[y * row..(y + 1) * row].swap_with_slice(&mut bottom[..row]);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskTopology {
    Triangles,
    Points,
}

/// World-space copy of an object's visible geometry, drawn white on black.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskGeometry {
    pub topology: MaskTopology,
    pub positions: Vec<[f32; 3]>,
    /// Triangle indices; empty for points.
    pub indices: Vec<u32>,
}

impl MaskGeometry {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Geometry to upload for one drawable piece of an object.
#[derive(Debug, Clone, Copy)]
pub enum GeometryData<'a> {
    Points(&'a [Vertex]),
    Triangles { vertices: &'a [Vertex], indices: &'a [u32] },
}

/// Per-draw appearance, already routed by object kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawStyle {
    Points {
        opacity: f32,
        brightness: f32,
        point_size: f32,
    },
    Surface {
        alpha: f32,
        reflective: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDraw {
    pub geometry: GeometryId,
    pub model: glam::Mat4,
    pub style: DrawStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticleDraw {
    pub buffer: BufferId,
    pub program: ProgramId,
    pub instance_count: u32,
}

/// Everything drawn in one frame, in order: clear, objects, particles,
/// optional debug overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameScene {
    pub view_proj: glam::Mat4,
    pub camera_position: glam::Vec3,
    pub clear_color: [f32; 4],
    pub objects: Vec<ObjectDraw>,
    pub particles: Vec<ParticleDraw>,
    pub debug_overlay: Option<RenderTargetId>,
}

pub trait RenderDriver {
    /// In-flight pixel readback. Owns what it needs, so the driver is free
    /// for other calls while it resolves.
    type Readback: Future<Output = Result<PixelBuffer, GpuError>> + 'static;

    fn create_render_target(&mut self, width: u32, height: u32, label: &str) -> Result<RenderTargetId, GpuError>;
    fn destroy_render_target(&mut self, id: RenderTargetId);

    fn create_particle_buffer(&mut self, seeds: &[ParticleSeed]) -> Result<BufferId, GpuError>;
    fn destroy_particle_buffer(&mut self, id: BufferId);

    fn create_particle_program(&mut self, uniforms: &ParticleUniforms) -> Result<ProgramId, GpuError>;
    fn update_particle_program(&mut self, id: ProgramId, uniforms: &ParticleUniforms) -> Result<(), GpuError>;
    fn destroy_particle_program(&mut self, id: ProgramId);

    fn upload_geometry(&mut self, data: GeometryData<'_>) -> Result<GeometryId, GpuError>;
    fn release_geometry(&mut self, id: GeometryId);

    /// Clear `target` to black and draw `mask` in white.
    fn render_mask(&mut self, target: RenderTargetId, mask: &MaskGeometry, view_proj: glam::Mat4) -> Result<(), GpuError>;

    /// Full-screen edge detection from `mask` into `target`.
    fn render_edges(&mut self, mask: RenderTargetId, target: RenderTargetId) -> Result<(), GpuError>;

    /// Start copying a render target back to the CPU. The returned readback
    /// resolves once the copy has landed.
    fn read_pixels(&mut self, target: RenderTargetId) -> Result<Self::Readback, GpuError>;

    fn draw_frame(&mut self, scene: &FrameScene) -> Result<(), GpuError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_rows() {
        let mut buf = PixelBuffer::black(2, 3);
        buf.set_pixel(0, 0, [255, 0, 0, 255]);
        buf.set_pixel(1, 2, [0, 255, 0, 255]);
        buf.flip_rows();
        assert_eq!(buf.pixel(0, 2), [255, 0, 0, 255]);
        assert_eq!(buf.pixel(1, 0), [0, 255, 0, 255]);
        assert_eq!(buf.pixel(0, 1), [0, 0, 0, 255]);
    }
}
