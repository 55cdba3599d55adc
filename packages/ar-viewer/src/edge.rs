//! Silhouette framing, edge detection and edge-pixel sampling.
//!
//! The GPU runs the mask and edge passes; this module owns the framing math,
//! the CPU reference of the edge filter and the turning of read-back pixels
//! into particle seeds.

use glam::{Mat4, Vec2, Vec3};
use rand::Rng;

use crate::gpu::driver::PixelBuffer;
use crate::gpu::mesh::Bounds;
use crate::particle::ParticleSeed;
use crate::particle_eval::smoothstep;

/// Edge pixels need a red channel strictly above this.
pub const EDGE_THRESHOLD: u8 = 25;
/// Fewer edge pixels than this and the sample set is unusable.
pub const MIN_EDGE_SAMPLES: usize = 100;
/// Side of the square mask and edge targets.
pub const EDGE_TARGET_SIZE: u32 = 1024;

pub const MASK_FOV_DEGREES: f32 = 75.0;
pub const MASK_MARGIN: f32 = 1.5;
const MASK_NEAR: f32 = 0.1;
const MASK_FAR: f32 = 1000.0;
/// Framing extent used for empty or flat-to-a-point bounds.
const MIN_FRAMING_EXTENT: f32 = 1e-3;

const EDGE_LOW: f32 = 0.05;
const EDGE_HIGH: f32 = 0.2;

/// Camera that frames an object's bounding box for the mask pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskFraming {
    pub eye: Vec3,
    pub center: Vec3,
    pub distance: f32,
}

impl MaskFraming {
    /// Place the camera on +Z of the box center at
    /// `max_dim / (2 tan(fov / 2)) * margin`, looking at the center.
    pub fn for_bounds(bounds: &Bounds) -> Self {
        let center = bounds.center();
        let max_dim = bounds.max_dimension().max(MIN_FRAMING_EXTENT);
        let half_fov = (MASK_FOV_DEGREES.to_radians()) * 0.5;
        let distance = max_dim / (2.0 * half_fov.tan()) * MASK_MARGIN;

        Self {
            eye: center + Vec3::Z * distance,
            center,
            distance,
        }
    }

    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        let far = MASK_FAR.max(self.distance * 4.0);
        let proj = Mat4::perspective_rh(MASK_FOV_DEGREES.to_radians(), aspect, MASK_NEAR, far);
        let view = Mat4::look_at_rh(self.eye, self.center, Vec3::Y);
        proj * view
    }
}

/// CPU reference of the edge pass: for every texel, the sum of absolute red
/// differences with its four axis neighbours (clamped at the border), passed
/// through `smoothstep(0.05, 0.2, sum)`.
pub fn detect_edges(mask: &PixelBuffer) -> PixelBuffer {
    let (w, h) = (mask.width, mask.height);
    let mut out = PixelBuffer::black(w, h);
    if w == 0 || h == 0 {
        return out;
    }

    let red = |x: u32, y: u32| mask.pixel(x, y)[0] as f32 / 255.0;

    for y in 0..h {
        for x in 0..w {
            let c = red(x, y);
            let sum = (c - red(x.saturating_sub(1), y)).abs()
                + (c - red((x + 1).min(w - 1), y)).abs()
                + (c - red(x, y.saturating_sub(1))).abs()
                + (c - red(x, (y + 1).min(h - 1))).abs();
            let e = (smoothstep(EDGE_LOW, EDGE_HIGH, sum) * 255.0).round() as u8;
            out.set_pixel(x, y, [e, e, e, 255]);
        }
    }
    out
}

/// Emission points collected from an edge image.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSamples {
    pub uvs: Vec<Vec2>,
}

impl EdgeSamples {
    pub fn len(&self) -> usize {
        self.uvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uvs.is_empty()
    }

    /// Whether there are enough samples to seed from.
    pub fn is_valid(&self) -> bool {
        self.uvs.len() >= MIN_EDGE_SAMPLES
    }
}

/// Collect the UV of every pixel whose red channel exceeds
/// [`EDGE_THRESHOLD`]. `u = x / width`, `v = y / height` with rows bottom-up.
pub fn sample_edges(edges: &PixelBuffer) -> EdgeSamples {
    let (w, h) = (edges.width as f32, edges.height as f32);
    let uvs = edges
        .data
        .chunks_exact(4)
        .enumerate()
        .filter(|(_, px)| px[0] > EDGE_THRESHOLD)
        .map(|(i, _)| {
            let x = (i as u32 % edges.width) as f32;
            let y = (i as u32 / edges.width) as f32;
            Vec2::new(x / w, y / h)
        })
        .collect();
    EdgeSamples { uvs }
}

/// Build exactly `count` seeds. Each draws a UV with replacement from
/// `samples` when they are valid, or a uniform random UV otherwise, plus a
/// uniform life phase in [0, 1).
pub fn build_seeds<R: Rng>(count: usize, samples: &EdgeSamples, rng: &mut R) -> Vec<ParticleSeed> {
    let use_edges = samples.is_valid();
    (0..count)
        .map(|_| {
            let uv = if use_edges {
                samples.uvs[rng.gen_range(0..samples.uvs.len())]
            } else {
                Vec2::new(rng.gen::<f32>(), rng.gen::<f32>())
            };
            ParticleSeed::new(uv.to_array(), rng.gen::<f32>())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn white_square(size: u32, lo: u32, hi: u32) -> PixelBuffer {
        let mut mask = PixelBuffer::black(size, size);
        for y in lo..hi {
            for x in lo..hi {
                mask.set_pixel(x, y, [255, 255, 255, 255]);
            }
        }
        mask
    }

    #[test]
    fn test_fallback_on_black_image() {
        let edges = detect_edges(&PixelBuffer::black(64, 64));
        let samples = sample_edges(&edges);
        assert!(samples.is_empty());
        assert!(!samples.is_valid());

        let mut rng = StdRng::seed_from_u64(7);
        let seeds = build_seeds(2048, &samples, &mut rng);
        assert_eq!(seeds.len(), 2048);
        for seed in &seeds {
            assert!((0.0..=1.0).contains(&seed.uv[0]));
            assert!((0.0..=1.0).contains(&seed.uv[1]));
            assert!((0.0..1.0).contains(&seed.life));
        }
    }

    #[test]
    fn test_square_outline_is_detected() {
        let mask = white_square(128, 32, 96);
        let edges = detect_edges(&mask);

        // Interior and background are flat.
        assert_eq!(edges.pixel(64, 64)[0], 0);
        assert_eq!(edges.pixel(5, 5)[0], 0);
        // Both sides of the boundary light up.
        assert_eq!(edges.pixel(32, 64)[0], 255);
        assert_eq!(edges.pixel(31, 64)[0], 255);

        let samples = sample_edges(&edges);
        assert!(samples.is_valid());
        assert!(samples.uvs.iter().all(|uv| uv.x >= 0.0 && uv.x < 1.0 && uv.y >= 0.0 && uv.y < 1.0));
    }

    #[test]
    fn test_seeds_come_from_edges() {
        let edges = detect_edges(&white_square(128, 32, 96));
        let samples = sample_edges(&edges);
        let mut rng = StdRng::seed_from_u64(1);
        let seeds = build_seeds(500, &samples, &mut rng);
        assert_eq!(seeds.len(), 500);
        for seed in seeds {
            assert!(samples.uvs.contains(&Vec2::from(seed.uv)));
        }
    }

    #[test]
    fn test_too_few_edges_falls_back() {
        let mut edges = PixelBuffer::black(32, 32);
        for x in 0..(MIN_EDGE_SAMPLES as u32 - 1) {
            edges.set_pixel(x % 32, x / 32, [255, 255, 255, 255]);
        }
        let samples = sample_edges(&edges);
        assert_eq!(samples.len(), MIN_EDGE_SAMPLES - 1);
        assert!(!samples.is_valid());
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut edges = PixelBuffer::black(4, 1);
        edges.set_pixel(0, 0, [25, 0, 0, 255]);
        edges.set_pixel(1, 0, [26, 0, 0, 255]);
        let samples = sample_edges(&edges);
        assert_eq!(samples.uvs, vec![Vec2::new(0.25, 0.0)]);
    }

    #[test]
    fn test_uv_rows_are_bottom_up() {
        let mut edges = PixelBuffer::black(10, 10);
        edges.set_pixel(2, 8, [255, 0, 0, 255]);
        let samples = sample_edges(&edges);
        assert_eq!(samples.uvs, vec![Vec2::new(0.2, 0.8)]);
    }

    #[test]
    fn test_framing_distance() {
        let bounds = Bounds {
            min: Vec3::new(-1.0, -0.5, -0.2),
            max: Vec3::new(1.0, 0.5, 0.2),
        };
        let framing = MaskFraming::for_bounds(&bounds);
        let expected = 2.0 / (2.0 * (37.5f32.to_radians()).tan()) * 1.5;
        assert!((framing.distance - expected).abs() < 1e-5);
        assert_eq!(framing.center, Vec3::ZERO);
        assert!((framing.eye - Vec3::new(0.0, 0.0, expected)).length() < 1e-5);

        // The box center projects to the middle of the target.
        let clip = framing.view_projection(1.0) * framing.center.extend(1.0);
        assert!((clip.x / clip.w).abs() < 1e-5 && (clip.y / clip.w).abs() < 1e-5);
    }

    #[test]
    fn test_framing_degenerate_bounds() {
        let bounds = Bounds { min: Vec3::ONE, max: Vec3::ONE };
        let framing = MaskFraming::for_bounds(&bounds);
        assert!(framing.distance > 0.0 && framing.distance.is_finite());
        assert!(framing.view_projection(1.0).is_finite());
    }
}
