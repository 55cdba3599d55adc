//! Edge-particle types and core data structures.
//!
//! Particles carry only a seed UV and a life phase. Every other quantity
//! (age, emission, flow, size, color) is recomputed each frame from the
//! seed and the global time, on the GPU in `shader_particle.wgsl` and on the
//! CPU in [`crate::particle_eval`].

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Particles allocated per unit of density.
pub const BASE_PARTICLE_COUNT: usize = 2048;

fn default_density() -> f32 {
    1.0
}

fn default_speed() -> f32 {
    0.8
}

fn default_strength() -> f32 {
    1.0
}

fn default_burst() -> f32 {
    3.0
}

fn default_settle() -> f32 {
    1.5
}

fn default_orbit_distance() -> f32 {
    1.2
}

fn default_follow_camera() -> bool {
    true
}

/// Live simulation parameters shared by every active particle system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticleParams {
    /// Multiplier on [`BASE_PARTICLE_COUNT`] (0.5 - 2.0).
    #[serde(default = "default_density")]
    pub density: f32,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_strength")]
    pub vortex: f32,
    #[serde(default = "default_strength")]
    pub curl: f32,
    /// Point size multiplier.
    #[serde(default = "default_strength")]
    pub size: f32,
    /// Peak emission multiplier at age 0.
    #[serde(default = "default_burst")]
    pub burst: f32,
    /// Seconds before emission drops to the steady value.
    #[serde(default = "default_settle")]
    pub settle: f32,
    /// 0 = pure vortex, >= 1 = pure orbital.
    #[serde(default)]
    pub attractor: f32,
    #[serde(default = "default_orbit_distance")]
    pub orbit_distance: f32,
    #[serde(default = "default_strength")]
    pub orbit_speed: f32,
    /// Copy the active camera's rotation onto the particle plane.
    #[serde(default = "default_follow_camera")]
    pub follow_camera: bool,
}

impl Default for ParticleParams {
    fn default() -> Self {
        Self {
            density: default_density(),
            speed: default_speed(),
            vortex: default_strength(),
            curl: default_strength(),
            size: default_strength(),
            burst: default_burst(),
            settle: default_settle(),
            attractor: 0.0,
            orbit_distance: default_orbit_distance(),
            orbit_speed: default_strength(),
            follow_camera: default_follow_camera(),
        }
    }
}

/// One numeric simulation parameter, for control bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticleParam {
    Density,
    Speed,
    Vortex,
    Curl,
    Size,
    Burst,
    Settle,
    Attractor,
    OrbitDistance,
    OrbitSpeed,
}

impl ParticleParam {
    pub const ALL: [ParticleParam; 10] = [
        ParticleParam::Density,
        ParticleParam::Speed,
        ParticleParam::Vortex,
        ParticleParam::Curl,
        ParticleParam::Size,
        ParticleParam::Burst,
        ParticleParam::Settle,
        ParticleParam::Attractor,
        ParticleParam::OrbitDistance,
        ParticleParam::OrbitSpeed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ParticleParam::Density => "density",
            ParticleParam::Speed => "speed",
            ParticleParam::Vortex => "vortex",
            ParticleParam::Curl => "curl",
            ParticleParam::Size => "size",
            ParticleParam::Burst => "burst",
            ParticleParam::Settle => "settle",
            ParticleParam::Attractor => "attractor",
            ParticleParam::OrbitDistance => "orbitDistance",
            ParticleParam::OrbitSpeed => "orbitSpeed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

impl ParticleParams {
    pub fn get(&self, param: ParticleParam) -> f32 {
        match param {
            ParticleParam::Density => self.density,
            ParticleParam::Speed => self.speed,
            ParticleParam::Vortex => self.vortex,
            ParticleParam::Curl => self.curl,
            ParticleParam::Size => self.size,
            ParticleParam::Burst => self.burst,
            ParticleParam::Settle => self.settle,
            ParticleParam::Attractor => self.attractor,
            ParticleParam::OrbitDistance => self.orbit_distance,
            ParticleParam::OrbitSpeed => self.orbit_speed,
        }
    }

    /// Set a parameter, clamping negatives to zero. Returns true if the
    /// stored value changed.
    pub fn set(&mut self, param: ParticleParam, value: f32) -> bool {
        let value = value.max(0.0);
        let slot = match param {
            ParticleParam::Density => &mut self.density,
            ParticleParam::Speed => &mut self.speed,
            ParticleParam::Vortex => &mut self.vortex,
            ParticleParam::Curl => &mut self.curl,
            ParticleParam::Size => &mut self.size,
            ParticleParam::Burst => &mut self.burst,
            ParticleParam::Settle => &mut self.settle,
            ParticleParam::Attractor => &mut self.attractor,
            ParticleParam::OrbitDistance => &mut self.orbit_distance,
            ParticleParam::OrbitSpeed => &mut self.orbit_speed,
        };
        let changed = *slot != value;
        *slot = value;
        changed
    }
}

/// Number of particles for a density factor: `floor(base * density)`.
pub fn particle_count(base: usize, density: f32) -> usize {
    (base as f32 * density.max(0.0)).floor() as usize
}

/// Per-particle instance data. Immutable once uploaded.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ParticleSeed {
    /// Emission point in mask UV space, origin bottom-left.
    pub uv: [f32; 2],
    /// Life phase offset in [0, 1).
    pub life: f32,
    pub _padding: f32,
}

impl ParticleSeed {
    pub fn new(uv: [f32; 2], life: f32) -> Self {
        Self { uv, life, _padding: 0.0 }
    }

    /// Instance layout for the particle pipeline.
    /// Location 0 is the quad corner; seeds start at location 1.
    pub fn desc<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<ParticleSeed>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: 8,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32,
                },
            ],
        }
    }
}

/// Uniform block of a particle program.
/// Matches `ParticleUniforms` in shader_particle.wgsl.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ParticleUniforms {
    pub model_view_proj: [[f32; 4]; 4],
    /// time, density, vortex, curl
    pub sim_a: [f32; 4],
    /// speed, burst, settle, attractor
    pub sim_b: [f32; 4],
    /// orbit distance, orbit speed, size, unused
    pub sim_c: [f32; 4],
    /// viewport width, height in pixels
    pub viewport: [f32; 4],
}

impl ParticleUniforms {
    pub fn new(params: &ParticleParams, time: f32, model_view_proj: glam::Mat4, viewport: (u32, u32)) -> Self {
        Self {
            model_view_proj: model_view_proj.to_cols_array_2d(),
            sim_a: [time, params.density, params.vortex, params.curl],
            sim_b: [params.speed, params.burst, params.settle, params.attractor],
            sim_c: [params.orbit_distance, params.orbit_speed, params.size, 0.0],
            viewport: [viewport.0.max(1) as f32, viewport.1.max(1) as f32, 0.0, 0.0],
        }
    }

    pub fn time(&self) -> f32 {
        self.sim_a[0]
    }
}
