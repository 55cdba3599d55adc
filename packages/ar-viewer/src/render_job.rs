//! Offline render job specification and metadata.
//!
//! A job renders the demo scene headlessly for a fixed number of frames and
//! writes `metadata.json` next to the PNG frames.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[cfg(not(target_arch = "wasm32"))]
use chrono::{DateTime, Utc};

/// Default FPS for rendering.
fn default_fps() -> f32 {
    30.0
}

/// Default duration in seconds.
fn default_duration() -> f32 {
    4.0
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_true() -> bool {
    true
}

/// Specification for a single render job.
/// Together with the seed it fully determines the rendered frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJobSpec {
    /// Output directory for frames.
    pub output_dir: PathBuf,

    /// Viewer config JSON. None means built-in defaults.
    #[serde(default)]
    pub config_path: Option<PathBuf>,

    #[serde(default = "default_fps")]
    pub fps: f32,

    #[serde(default = "default_duration")]
    pub duration: f32,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// Seed for particle emission sampling. Overrides the config seed.
    #[serde(default)]
    pub seed: u64,

    /// Feed a scripted device-orientation sweep through the AR camera.
    #[serde(default)]
    pub simulate_ar: bool,

    /// Activate the edge-particle halo on reflective objects.
    #[serde(default = "default_true")]
    pub particles: bool,
}

impl RenderJobSpec {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            config_path: None,
            fps: default_fps(),
            duration: default_duration(),
            width: default_width(),
            height: default_height(),
            seed: 0,
            simulate_ar: false,
            particles: true,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(path) = &self.config_path {
            if !path.exists() {
                return Err(format!("Config file not found: {:?}", path));
            }
        }
        if !(self.fps > 0.0) {
            return Err("FPS must be positive".to_string());
        }
        if !(self.duration > 0.0) {
            return Err("Duration must be positive".to_string());
        }
        if self.width == 0 || self.height == 0 {
            return Err("Width and height must be positive".to_string());
        }
        Ok(())
    }

    pub fn total_frames(&self) -> usize {
        (self.duration * self.fps).ceil() as usize
    }

    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.output_dir.join(format!("frame_{:05}.png", index))
    }
}

/// Metadata for a completed render.
/// Written as metadata.json alongside rendered frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg(not(target_arch = "wasm32"))]
pub struct RenderMetadata {
    pub job: RenderJobSpec,

    /// Timestamp when render started (ISO 8601).
    pub started_at: DateTime<Utc>,

    /// Timestamp when render completed (ISO 8601).
    pub completed_at: DateTime<Utc>,

    pub render_duration_secs: f64,

    pub frame_count: usize,

    /// Frames whose render failed inside the frame boundary.
    pub failed_frames: usize,

    /// Average rendering FPS (frames / render_duration).
    pub average_render_fps: f64,

    /// Objects that carried a particle halo.
    pub halos: Vec<String>,

    pub viewer_version: String,

    pub gpu_adapter: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[cfg(not(target_arch = "wasm32"))]
impl RenderMetadata {
    /// Save metadata to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self).map_err(|e| format!("Failed to serialize metadata: {}", e))?;
        std::fs::write(path, json).map_err(|e| format!("Failed to write metadata: {}", e))
    }
}

/// Render phase for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Initialization,
    ConfigLoading,
    GpuSetup,
    SceneSetup,
    ParticleActivation,
    FrameRender,
    FrameSave,
    MetadataSave,
}

impl std::fmt::Display for RenderPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderPhase::Initialization => write!(f, "Initialization"),
            RenderPhase::ConfigLoading => write!(f, "Config Loading"),
            RenderPhase::GpuSetup => write!(f, "GPU Setup"),
            RenderPhase::SceneSetup => write!(f, "Scene Setup"),
            RenderPhase::ParticleActivation => write!(f, "Particle Activation"),
            RenderPhase::FrameRender => write!(f, "Frame Render"),
            RenderPhase::FrameSave => write!(f, "Frame Save"),
            RenderPhase::MetadataSave => write!(f, "Metadata Save"),
        }
    }
}

/// Structured error for render failures.
#[derive(Debug)]
pub struct RenderError {
    pub phase: RenderPhase,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.phase, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl RenderError {
    pub fn new(phase: RenderPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        phase: RenderPhase,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            phase,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Progress information for render callbacks.
#[derive(Debug, Clone)]
pub struct RenderProgress {
    /// Current frame number (1-indexed).
    pub current_frame: usize,
    pub total_frames: usize,
    pub elapsed_secs: f64,
    /// Estimated time remaining in seconds.
    pub eta_secs: Option<f64>,
}

impl RenderProgress {
    pub fn new(current_frame: usize, total_frames: usize, elapsed_secs: f64) -> Self {
        let eta_secs = (current_frame > 0)
            .then(|| elapsed_secs / current_frame as f64 * total_frames.saturating_sub(current_frame) as f64);
        Self {
            current_frame,
            total_frames,
            elapsed_secs,
            eta_secs,
        }
    }

    /// Get progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.total_frames == 0 {
            100.0
        } else {
            (self.current_frame as f64 / self.total_frames as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_job_spec_validation() {
        let mut spec = RenderJobSpec::new(PathBuf::from("/output"));
        assert!(spec.validate().is_ok());

        spec.config_path = Some(PathBuf::from("/nonexistent/viewer.json"));
        assert!(spec.validate().is_err());

        spec.config_path = None;
        spec.fps = 0.0;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_render_job_spec_defaults() {
        let spec: RenderJobSpec = serde_json::from_str(r#"{"outputDir": "out", "simulateAr": true}"#).unwrap();

        assert_eq!(spec.fps, 30.0);
        assert_eq!(spec.width, 1280);
        assert_eq!(spec.height, 720);
        assert_eq!(spec.seed, 0);
        assert!(spec.simulate_ar);
        assert!(spec.particles);
        assert_eq!(spec.total_frames(), 120);
    }

    #[test]
    fn test_frame_path() {
        let spec = RenderJobSpec::new(PathBuf::from("out"));
        assert_eq!(spec.frame_path(7), PathBuf::from("out").join("frame_00007.png"));
    }

    #[test]
    fn test_render_progress() {
        let progress = RenderProgress::new(50, 100, 5.0);
        assert_eq!(progress.percentage(), 50.0);
        assert_eq!(progress.eta_secs, Some(5.0));
        assert_eq!(RenderProgress::new(0, 100, 0.0).eta_secs, None);
    }
}
