//! Error types for the viewer core.
//!
//! Each concern gets its own enum so callers can match on the failure they
//! care about. Nothing in here is fatal to the frame loop; the viewer logs
//! and carries on.

use thiserror::Error;

/// Failures from the object registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object already registered: {0}")]
    Duplicate(String),
    #[error("invalid axis '{0}', expected x, y or z")]
    InvalidAxis(String),
}

/// Failures reported by a render driver.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u64 },
    #[error("resource creation failed: {0}")]
    Resource(String),
    #[error("pixel readback failed: {0}")]
    Readback(String),
    #[error("no output view set for this frame")]
    NoOutput,
    #[error("too many draws in one frame ({count}, limit {limit})")]
    DrawLimit { count: usize, limit: usize },
}

/// Step of the edge-particle activation pipeline that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationStage {
    MaskTarget,
    MaskPass,
    EdgeTarget,
    EdgePass,
    Readback,
    ParticleBuffer,
    ParticleProgram,
}

impl std::fmt::Display for ActivationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationStage::MaskTarget => write!(f, "mask target"),
            ActivationStage::MaskPass => write!(f, "mask pass"),
            ActivationStage::EdgeTarget => write!(f, "edge target"),
            ActivationStage::EdgePass => write!(f, "edge pass"),
            ActivationStage::Readback => write!(f, "edge readback"),
            ActivationStage::ParticleBuffer => write!(f, "particle buffer"),
            ActivationStage::ParticleProgram => write!(f, "particle program"),
        }
    }
}

/// Failures from the edge-particle engine.
#[derive(Debug, Error)]
pub enum ParticleError {
    #[error("edge particle activation failed at {stage}: {source}")]
    Pipeline {
        stage: ActivationStage,
        #[source]
        source: GpuError,
    },
    #[error("edge particles are disabled")]
    Disabled,
    /// The halo was deactivated while its edge readback was in flight.
    #[error("edge particle activation for '{0}' was cancelled")]
    Cancelled(String),
}

/// Media capture and sensor acquisition failures, one variant per category
/// shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("no camera found")]
    NotFound,
    #[error("camera is busy or unreadable")]
    DeviceBusy,
    #[error("camera access requires a secure (HTTPS) context")]
    InsecureContext,
    #[error("camera API unsupported: {0}")]
    Unsupported(String),
    #[error("capture constraints cannot be satisfied")]
    Overconstrained,
    #[error("camera error: {0}")]
    Other(String),
}

/// Initialization and teardown ordering violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("viewer is already initializing")]
    AlreadyInitializing,
    #[error("viewer is already initialized")]
    AlreadyInitialized,
    #[error("viewer is not initialized")]
    NotInitialized,
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Control bindings that cannot be parsed or applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error("unknown control key '{0}'")]
    UnknownKey(String),
    #[error("control '{key}' expects a {expected} value")]
    WrongType { key: String, expected: &'static str },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors surfaced by a single viewer frame or viewer operation.
#[derive(Debug, Error)]
pub enum ViewerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Particle(#[from] ParticleError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("camera pose store is full ({0} poses)")]
    PosesFull(usize),
    #[error("camera pose {0} not found")]
    PoseNotFound(u64),
    #[error("camera animation needs at least two saved poses")]
    NotEnoughPoses,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_particle_error_names_stage() {
        let err = ParticleError::Pipeline {
            stage: ActivationStage::Readback,
            source: GpuError::Readback("device lost".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("edge readback"));
        assert!(msg.contains("device lost"));
    }

    #[test]
    fn test_viewer_error_wraps_registry() {
        let err: ViewerError = RegistryError::NotFound("rock.ply".into()).into();
        assert_eq!(err.to_string(), "object not found: rock.ply");
    }
}
