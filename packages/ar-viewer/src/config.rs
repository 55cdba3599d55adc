//! Viewer configuration.
//!
//! A JSON document with camelCase keys. Every field has a default, so an
//! empty object is a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ar::{AR_CAMERA_FOV, DEFAULT_PARALLAX_SENSITIVITY};
use crate::edge::EDGE_TARGET_SIZE;
use crate::error::ConfigError;
use crate::particle::{ParticleParams, BASE_PARTICLE_COUNT};

fn default_true() -> bool {
    true
}

fn default_base_particle_count() -> usize {
    BASE_PARTICLE_COUNT
}

fn default_edge_target_size() -> u32 {
    EDGE_TARGET_SIZE
}

fn default_parallax_sensitivity() -> f32 {
    DEFAULT_PARALLAX_SENSITIVITY
}

fn default_main_camera_fov() -> f32 {
    75.0
}

fn default_main_camera_position() -> [f32; 3] {
    [0.0, 0.0, 8.0]
}

fn default_ar_camera_fov() -> f32 {
    AR_CAMERA_FOV
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_animation_duration() -> f32 {
    5.0
}

fn default_clear_color() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerConfig {
    /// Initial edge-particle parameters.
    #[serde(default)]
    pub particles: ParticleParams,

    #[serde(default = "default_true")]
    pub particles_enabled: bool,

    /// Particles allocated at density 1.
    #[serde(default = "default_base_particle_count")]
    pub base_particle_count: usize,

    /// Side of the square mask and edge targets.
    #[serde(default = "default_edge_target_size")]
    pub edge_target_size: u32,

    #[serde(default = "default_parallax_sensitivity")]
    pub parallax_sensitivity: f32,

    /// Drive the AR camera from raw orientation instead of the delta from the
    /// first sample.
    #[serde(default)]
    pub ar_camera_absolute: bool,

    #[serde(default = "default_main_camera_fov")]
    pub main_camera_fov: f32,

    #[serde(default = "default_main_camera_position")]
    pub main_camera_position: [f32; 3],

    #[serde(default = "default_ar_camera_fov")]
    pub ar_camera_fov: f32,

    /// Consecutive failed frames before the viewer reports itself degraded.
    #[serde(default = "default_failure_threshold")]
    pub frame_failure_threshold: u32,

    /// Seconds for a fly-through across all saved camera poses.
    #[serde(default = "default_animation_duration")]
    pub camera_animation_duration: f32,

    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],

    /// Seed for particle placement.
    #[serde(default)]
    pub seed: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            particles: ParticleParams::default(),
            particles_enabled: true,
            base_particle_count: default_base_particle_count(),
            edge_target_size: default_edge_target_size(),
            parallax_sensitivity: default_parallax_sensitivity(),
            ar_camera_absolute: false,
            main_camera_fov: default_main_camera_fov(),
            main_camera_position: default_main_camera_position(),
            ar_camera_fov: default_ar_camera_fov(),
            frame_failure_threshold: default_failure_threshold(),
            camera_animation_duration: default_animation_duration(),
            clear_color: default_clear_color(),
            seed: 0,
        }
    }
}

impl ViewerConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_particle_count == 0 {
            return Err(ConfigError::Invalid("baseParticleCount must be positive".to_string()));
        }
        if !(16..=8192).contains(&self.edge_target_size) {
            return Err(ConfigError::Invalid(format!(
                "edgeTargetSize must be between 16 and 8192, got {}",
                self.edge_target_size
            )));
        }
        if self.parallax_sensitivity < 0.0 {
            return Err(ConfigError::Invalid("parallaxSensitivity must not be negative".to_string()));
        }
        for (name, fov) in [("mainCameraFov", self.main_camera_fov), ("arCameraFov", self.ar_camera_fov)] {
            if !(fov > 0.0 && fov < 180.0) {
                return Err(ConfigError::Invalid(format!("{} must be in (0, 180), got {}", name, fov)));
            }
        }
        if self.frame_failure_threshold == 0 {
            return Err(ConfigError::Invalid("frameFailureThreshold must be at least 1".to_string()));
        }
        if self.camera_animation_duration <= 0.0 {
            return Err(ConfigError::Invalid("cameraAnimationDuration must be positive".to_string()));
        }
        if self.particles.density < 0.0 {
            return Err(ConfigError::Invalid("particles.density must not be negative".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ViewerConfig::from_json("{}").unwrap();
        assert_eq!(config, ViewerConfig::default());
        assert_eq!(config.base_particle_count, 2048);
        assert_eq!(config.edge_target_size, 1024);
        assert_eq!(config.parallax_sensitivity, 0.05);
        assert!(config.particles_enabled);
    }

    #[test]
    fn test_partial_config() {
        let config = ViewerConfig::from_json(r#"{"particles": {"attractor": 0.7}, "seed": 9, "arCameraAbsolute": true}"#).unwrap();
        assert_eq!(config.particles.attractor, 0.7);
        assert_eq!(config.particles.speed, 0.8);
        assert_eq!(config.seed, 9);
        assert!(config.ar_camera_absolute);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(ViewerConfig::from_json(r#"{"edgeTargetSize": 4}"#), Err(ConfigError::Invalid(_))));
        assert!(matches!(ViewerConfig::from_json(r#"{"mainCameraFov": 180}"#), Err(ConfigError::Invalid(_))));
        assert!(matches!(ViewerConfig::from_json(r#"{"baseParticleCount": 0}"#), Err(ConfigError::Invalid(_))));
        assert!(matches!(ViewerConfig::from_json("not json"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = ViewerConfig::from_file(Path::new("/nonexistent/viewer.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
