pub mod error;
pub mod gpu;

// Objects and cameras
pub mod registry;
pub mod material;
pub mod assets;
pub mod camera;
pub mod camera_poses;

// Edge particles
pub mod particle;
pub mod particle_eval;
pub mod edge;
pub mod edge_particles;

// Fake-4DOF AR
pub mod sensors;
pub mod orientation;
pub mod media;
pub mod ar;

// Viewer runtime
pub mod config;
pub mod sync;
pub mod lifecycle;
pub mod viewer;
pub mod render_job;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

#[cfg(target_arch = "wasm32")]
pub mod wasm;
