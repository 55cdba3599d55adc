//! CPU evaluation of the edge-particle simulation.
//!
//! Mirrors the vertex stage of `shader_particle.wgsl` function for function,
//! so the per-particle math can be inspected and tested without a GPU.

use glam::{Vec2, Vec3};

use crate::particle::{ParticleParams, ParticleSeed};

/// Length of the emission cycle in seconds.
pub const EMISSION_PERIOD: f32 = 10.0;
/// Life advance per second of global time.
pub const LIFE_RATE: f32 = 0.3;
/// Exponential decay rate of the burst.
pub const BURST_DECAY: f32 = 2.5;
/// Finite-difference step for curl noise.
pub const CURL_EPSILON: f32 = 0.1;

const SIZE_YOUNG: f32 = 8.0;
const SIZE_OLD: f32 = 0.5;
const COLOR_OLD: Vec3 = Vec3::new(0.05, 0.0, 0.15);
const COLOR_YOUNG: Vec3 = Vec3::new(1.0, 0.6, 1.2);

// ============================================================================
// GLSL-style helpers
// ============================================================================

pub fn fract(x: f32) -> f32 {
    x - x.floor()
}

/// `x mod y` with the sign of `y`.
pub fn modulo(x: f32, y: f32) -> f32 {
    x - y * (x / y).floor()
}

pub fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

pub fn step(edge: f32, x: f32) -> f32 {
    if x < edge {
        0.0
    } else {
        1.0
    }
}

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

// ============================================================================
// Time curves
// ============================================================================

/// Seconds into the particle's emission cycle.
pub fn particle_age(time: f32, seed: &ParticleSeed) -> f32 {
    modulo(time + seed.uv[0] * EMISSION_PERIOD, EMISSION_PERIOD)
}

/// Normalized life in [0, 1), wrapping.
pub fn particle_life(time: f32, seed: &ParticleSeed) -> f32 {
    fract(seed.life + time * LIFE_RATE)
}

/// Burst-then-settle emission multiplier.
///
/// `step(age, settle)` is 1 while `age <= settle`, so the burst branch
/// `exp(-2.5 age) * burst` holds up to and including `settle` and the
/// steady value 1 takes over immediately after. The switch is a hard jump.
pub fn emission(age: f32, burst: f32, settle: f32) -> f32 {
    mix(1.0, (-age * BURST_DECAY).exp() * burst, step(age, settle))
}

// ============================================================================
// Noise
// ============================================================================

pub fn hash(p: Vec2) -> f32 {
    fract((p.dot(Vec2::new(127.1, 311.7))).sin() * 43758.547)
}

/// Smoothed value noise in [0, 1].
pub fn value_noise(p: Vec2) -> f32 {
    let i = p.floor();
    let f = p - i;

    let a = hash(i);
    let b = hash(i + Vec2::new(1.0, 0.0));
    let c = hash(i + Vec2::new(0.0, 1.0));
    let d = hash(i + Vec2::new(1.0, 1.0));

    let u = f * f * (Vec2::splat(3.0) - 2.0 * f);

    mix(a, b, u.x) + (c - a) * u.y * (1.0 - u.x) + (d - b) * u.x * u.y
}

/// Divergence-free 2D field `(dn/dy, -dn/dx)` by central differences.
///
/// Not normalized: the magnitude follows the local noise gradient, so the
/// `curl` parameter scales a field that is strong where the noise is steep
/// and near zero at its flat spots.
pub fn curl_noise(p: Vec2) -> Vec2 {
    let ex = Vec2::new(CURL_EPSILON, 0.0);
    let ey = Vec2::new(0.0, CURL_EPSILON);

    let dn_dx = (value_noise(p + ex) - value_noise(p - ex)) / (2.0 * CURL_EPSILON);
    let dn_dy = (value_noise(p + ey) - value_noise(p - ey)) / (2.0 * CURL_EPSILON);

    Vec2::new(dn_dy, -dn_dx)
}

// ============================================================================
// Flow field
// ============================================================================

/// Breakdown of the flow at one UV, for inspection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSample {
    pub vortex: Vec2,
    pub curl: Vec2,
    pub orbital: Vec2,
    /// 0 = pure vortex, 1 = pure orbital.
    pub blend: f32,
    pub flow: Vec2,
}

/// Blended vortex/curl/orbital field at `uv` for a particle whose seed x is
/// `seed_x`. Center of the field is the middle of the mask.
pub fn flow_field(uv: Vec2, seed_x: f32, time: f32, params: &ParticleParams) -> FlowSample {
    let dir = uv - Vec2::splat(0.5);
    let dist = dir.length() + 0.0001;
    let radial = dir / dist;
    let tangent = Vec2::new(-dir.y, dir.x);

    let vortex = tangent * params.vortex * 0.4 - radial * 0.3;
    let curl = curl_noise(uv * 6.0 + Vec2::splat(time * 0.8)) * params.curl;

    let target_radius = params.orbit_distance * (0.7 + 0.6 * seed_x);
    let attraction = -radial * (dist - target_radius) * params.attractor * 2.0;
    let rotation = tangent * params.orbit_speed * 0.3;
    let perturbation = curl * 0.3;
    let orbital = attraction + rotation + perturbation;

    let blend = smoothstep(0.0, 1.0, params.attractor);
    let flow = (vortex + curl).lerp(orbital, blend);

    FlowSample { vortex, curl, orbital, blend, flow }
}

/// Fully evaluated particle at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleState {
    pub age: f32,
    pub life: f32,
    pub emission: f32,
    /// Position in mask UV space.
    pub uv: Vec2,
    /// Position on the particle plane, in [-1, 1] for UVs in [0, 1].
    pub plane_position: Vec3,
    /// Point size in pixels.
    pub size: f32,
    pub color: Vec3,
}

pub fn evaluate_particle(seed: &ParticleSeed, time: f32, params: &ParticleParams) -> ParticleState {
    let age = particle_age(time, seed);
    let life = particle_life(time, seed);
    let emission = emission(age, params.burst, params.settle);

    let seed_uv = Vec2::from(seed.uv);
    let flow = flow_field(seed_uv, seed.uv[0], time, params).flow;
    let uv = seed_uv + flow * life * params.speed;

    let plane = uv * 2.0 - Vec2::ONE;

    ParticleState {
        age,
        life,
        emission,
        uv,
        plane_position: Vec3::new(plane.x, plane.y, 0.0),
        size: point_size(life, emission, params.size),
        color: particle_color(life, emission),
    }
}

pub fn point_size(life: f32, emission: f32, size_scale: f32) -> f32 {
    mix(SIZE_YOUNG, SIZE_OLD, life) * emission * size_scale
}

pub fn particle_color(life: f32, emission: f32) -> Vec3 {
    COLOR_OLD.lerp(COLOR_YOUNG, 1.0 - life) * emission
}

/// Fragment alpha at distance `d` from the point center (0 center, 0.5 rim).
pub fn fragment_alpha(d: f32, life: f32) -> f32 {
    smoothstep(0.5, 0.0, d) * smoothstep(1.0, 0.6, life)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-4;

    #[test]
    fn test_emission_boundary() {
        let (burst, settle) = (3.0, 1.5);
        let before = emission(settle - EPS, burst, settle);
        let at = emission(settle, burst, settle);
        let after = emission(settle + EPS, burst, settle);

        let burst_value = (-settle * BURST_DECAY).exp() * burst;
        assert!((before - (-(settle - EPS) * BURST_DECAY).exp() * burst).abs() < 1e-5);
        assert!((at - burst_value).abs() < 1e-6);
        assert_eq!(after, 1.0);
        // Hard jump, not a blend.
        assert!((before - after).abs() > 0.9);
    }

    #[test]
    fn test_emission_starts_at_burst() {
        assert!((emission(0.0, 3.0, 1.5) - 3.0).abs() < 1e-6);
        assert_eq!(emission(9.0, 3.0, 1.5), 1.0);
    }

    #[test]
    fn test_age_wraps_period() {
        let seed = ParticleSeed::new([0.5, 0.5], 0.0);
        assert!((particle_age(0.0, &seed) - 5.0).abs() < EPS);
        assert!((particle_age(6.0, &seed) - 1.0).abs() < EPS);
        let age = particle_age(1234.5, &seed);
        assert!((0.0..EMISSION_PERIOD).contains(&age));
    }

    #[test]
    fn test_life_wraps() {
        let seed = ParticleSeed::new([0.0, 0.0], 0.9);
        assert!((particle_life(0.0, &seed) - 0.9).abs() < EPS);
        assert!((particle_life(1.0, &seed) - 0.2).abs() < EPS);
    }

    #[test]
    fn test_value_noise_range() {
        for i in 0..200 {
            let p = Vec2::new(i as f32 * 0.37 - 20.0, i as f32 * 0.11 + 3.0);
            let n = value_noise(p);
            assert!((-EPS..=1.0 + EPS).contains(&n), "noise {} out of range at {:?}", n, p);
        }
    }

    #[test]
    fn test_curl_is_divergence_free() {
        // Differencing the curl with the same step cancels the mixed terms.
        let h = CURL_EPSILON;
        for i in 0..50 {
            let p = Vec2::new(1.3 + i as f32 * 0.21, 0.7 + i as f32 * 0.13);
            let dvx_dx = (curl_noise(p + Vec2::new(h, 0.0)).x - curl_noise(p - Vec2::new(h, 0.0)).x) / (2.0 * h);
            let dvy_dy = (curl_noise(p + Vec2::new(0.0, h)).y - curl_noise(p - Vec2::new(0.0, h)).y) / (2.0 * h);
            assert!((dvx_dx + dvy_dy).abs() < 1e-2, "divergence {} at {:?}", dvx_dx + dvy_dy, p);
        }
    }

    #[test]
    fn test_curl_magnitude_follows_gradient() {
        let lengths: Vec<f32> = (0..64)
            .map(|i| curl_noise(Vec2::new(i as f32 * 0.37, i as f32 * 0.21)).length())
            .collect();
        let min = lengths.iter().copied().fold(f32::INFINITY, f32::min);
        let max = lengths.iter().copied().fold(0.0, f32::max);
        assert!(max - min > 0.1, "curl magnitude barely varies: {}..{}", min, max);
    }

    #[test]
    fn test_zero_attractor_is_pure_vortex() {
        let params = ParticleParams { attractor: 0.0, ..Default::default() };
        let sample = flow_field(Vec2::new(0.8, 0.3), 0.4, 2.0, &params);
        assert_eq!(sample.blend, 0.0);
        assert!((sample.flow - (sample.vortex + sample.curl)).length() < 1e-6);
    }

    #[test]
    fn test_saturated_attractor_is_pure_orbital() {
        let params = ParticleParams { attractor: 2.0, ..Default::default() };
        let sample = flow_field(Vec2::new(0.8, 0.3), 0.4, 2.0, &params);
        assert_eq!(sample.blend, 1.0);
        assert!((sample.flow - sample.orbital).length() < 1e-6);
    }

    #[test]
    fn test_center_is_finite() {
        let params = ParticleParams { attractor: 0.5, ..Default::default() };
        let sample = flow_field(Vec2::splat(0.5), 0.0, 0.0, &params);
        assert!(sample.flow.is_finite());
    }

    #[test]
    fn test_particle_starts_at_seed_when_life_zero() {
        let seed = ParticleSeed::new([0.25, 0.75], 0.0);
        let state = evaluate_particle(&seed, 0.0, &ParticleParams::default());
        assert_eq!(state.life, 0.0);
        assert!((state.uv - Vec2::new(0.25, 0.75)).length() < 1e-6);
        assert!((state.plane_position - Vec3::new(-0.5, 0.5, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_point_size_shrinks_with_life() {
        assert_eq!(point_size(0.0, 1.0, 1.0), 8.0);
        assert_eq!(point_size(1.0, 1.0, 1.0), 0.5);
        assert_eq!(point_size(0.0, 3.0, 0.5), 12.0);
    }

    #[test]
    fn test_fragment_alpha_falloff() {
        assert_eq!(fragment_alpha(0.0, 0.0), 1.0);
        assert_eq!(fragment_alpha(0.5, 0.0), 0.0);
        assert_eq!(fragment_alpha(0.0, 1.0), 0.0);
        assert!(fragment_alpha(0.25, 0.3) > 0.0);
    }
}
