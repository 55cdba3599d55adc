//! The viewer: one registry, one particle engine, one tracker, one frame loop.
//!
//! Frame order is fixed: registry advance, camera and orientation sync,
//! particle time and uniforms, draw. Each frame runs inside an error boundary:
//! a failure is logged and counted and the next frame proceeds. Controls are
//! applied between frames through [`Viewer::apply_control`]; halo activations
//! they request are queued and run by [`Viewer::process_pending`].

use glam::Vec3;
use serde::Serialize;

use crate::ar::ArSession;
use crate::assets::BackgroundTexture;
use crate::camera::Camera;
use crate::camera_poses::{CameraAnimation, CameraPoseStore, SavedCameraPose};
use crate::config::ViewerConfig;
use crate::edge_particles::{ActivationOutcome, EdgeParticleEngine, ParticleSystemInfo, PendingActivation, ReadbackDone};
use crate::error::{RegistryError, ViewerError};
use crate::gpu::driver::{FrameScene, RenderDriver};
use crate::lifecycle::{FrameClock, FrameScheduler, InitState, TeardownStep};
use crate::media::{VideoDims, VideoSource};
use crate::orientation::{MotionSample, OrientationDelta, OrientationSample, OrientationTracker, TrackerState};
use crate::registry::{ObjectKind, ObjectRegistry, VisualObject};
use crate::sensors::{HostSensors, SensorSource};
use crate::sync::{ControlKey, ControlSync, ControlValue, ObjectProperty, SyncEffect, SyncTargets};

/// Result of one scheduled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameOutcome {
    Rendered,
    /// Stale request, frame already running, or not initialized.
    Skipped,
    Failed { consecutive: u32 },
    /// Failures reached the configured threshold. Frames keep running.
    Degraded { consecutive: u32 },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    pub position: Vec3,
    /// Degrees.
    pub rotation: Vec3,
    pub look_at: Vec3,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportInfo {
    pub width: u32,
    pub height: u32,
    pub aspect: f32,
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub frustum_width: f32,
    pub frustum_height: f32,
    pub distance_to_origin: f32,
    pub visible_area: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub name: String,
    pub kind: ObjectKind,
    pub position: Vec3,
    /// Degrees.
    pub rotation: Vec3,
    pub opacity: f32,
    pub visible: bool,
    pub reflective: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArInfo {
    pub active: bool,
    pub tracker: TrackerState,
    pub sample: Option<OrientationSample>,
    pub delta: Option<OrientationDelta>,
    pub motion: Option<MotionSample>,
    pub video: Option<VideoDims>,
}

/// Per-frame diagnostics for the host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSnapshot {
    pub frame: u64,
    pub camera: CameraInfo,
    pub viewport: ViewportInfo,
    pub objects: Vec<ObjectInfo>,
    pub particles: Vec<ParticleSystemInfo>,
    pub ar: ArInfo,
    pub consecutive_failures: u32,
}

pub struct Viewer<D: RenderDriver, S: SensorSource = HostSensors> {
    config: ViewerConfig,
    driver: D,
    sensors: S,
    init: InitState,
    scheduler: FrameScheduler,
    clock: FrameClock,
    registry: ObjectRegistry,
    particles: EdgeParticleEngine,
    tracker: OrientationTracker,
    ar: ArSession,
    /// Live video behind the AR view, queried every frame.
    video: Box<dyn VideoSource>,
    camera: Camera,
    poses: CameraPoseStore,
    animation: Option<CameraAnimation>,
    sync: ControlSync,
    /// Objects waiting for halo activation, in request order.
    pending: Vec<String>,
    viewport: (u32, u32),
    background: Option<BackgroundTexture>,
    background_enabled: bool,
    consecutive_failures: u32,
}

impl<D: RenderDriver, S: SensorSource> Viewer<D, S> {
    pub fn new(config: ViewerConfig, driver: D, sensors: S) -> Self {
        let particles = EdgeParticleEngine::new(
            config.particles,
            config.base_particle_count,
            config.edge_target_size,
            config.seed,
        );
        let ar = ArSession::new(config.parallax_sensitivity, config.ar_camera_absolute);
        let camera = Camera::main(config.main_camera_fov, Vec3::from(config.main_camera_position));

        Self {
            config,
            driver,
            sensors,
            init: InitState::default(),
            scheduler: FrameScheduler::new(),
            clock: FrameClock::new(),
            registry: ObjectRegistry::new(),
            particles,
            tracker: OrientationTracker::new(),
            ar,
            video: Box::new(None::<VideoDims>),
            camera,
            poses: CameraPoseStore::new(),
            animation: None,
            sync: ControlSync::new(),
            pending: Vec::new(),
            viewport: (1, 1),
            background: None,
            background_enabled: true,
            consecutive_failures: 0,
        }
    }

    /// Move to `Ready`. Rejected while initializing or already ready.
    pub fn initialize(&mut self, width: u32, height: u32) -> Result<(), ViewerError> {
        self.init.begin()?;
        if let Err(e) = self.config.validate() {
            log::error!("Viewer config rejected: {}", e);
            self.init.fail();
            return Err(e.into());
        }

        let enabled = self.config.particles_enabled;
        self.particles.set_enabled(enabled, &mut self.driver);
        self.ar.camera.fov = self.config.ar_camera_fov;
        self.set_viewport(width, height);
        self.scheduler.resume();
        self.init.finish();
        log::info!("Viewer ready at {}x{}", width, height);
        Ok(())
    }

    pub fn init_state(&self) -> InitState {
        self.init
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn sensors_mut(&mut self) -> &mut S {
        &mut self.sensors
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn particles(&self) -> &EdgeParticleEngine {
        &self.particles
    }

    pub fn tracker(&self) -> &OrientationTracker {
        &self.tracker
    }

    pub fn ar(&self) -> &ArSession {
        &self.ar
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Camera used for drawing: the AR camera while AR is active.
    pub fn active_camera(&self) -> &Camera {
        if self.ar.is_active() {
            &self.ar.camera
        } else {
            &self.camera
        }
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width.max(1), height.max(1));
        self.camera.aspect = self.viewport.0 as f32 / self.viewport.1 as f32;
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    /// Upload and register an object. Duplicate names are rejected before
    /// anything is uploaded.
    pub fn add_object(&mut self, mut object: VisualObject) -> Result<(), ViewerError> {
        if self.registry.contains(object.name()) {
            log::warn!("Object '{}' is already registered, ignoring duplicate", object.name());
            return Err(RegistryError::Duplicate(object.name().to_string()).into());
        }
        object.upload(&mut self.driver)?;
        if let Err(e) = self.registry.register(object.clone()) {
            object.release(&mut self.driver);
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove an object, its halo and its GPU geometry.
    pub fn remove_object(&mut self, name: &str) -> Result<(), ViewerError> {
        self.particles.deactivate(name, &mut self.driver);
        self.pending.retain(|n| n != name);
        let mut object = self.registry.remove(name)?;
        object.release(&mut self.driver);
        self.sync.forget_object(name);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Edge particles
    // ------------------------------------------------------------------

    /// Activate the halo for one object now.
    pub async fn activate_particles(&mut self, name: &str) -> Result<ActivationOutcome, ViewerError> {
        match self.begin_activation(name)? {
            Some(pending) => {
                let done = pending.readback().await;
                self.finish_activation(done)
            }
            None => Ok(ActivationOutcome::AlreadyActive),
        }
    }

    /// Start an activation and hand back its in-flight readback. `None` when
    /// the object already has a halo or one is on its way. The viewer stays
    /// free for other calls until [`Viewer::finish_activation`].
    pub fn begin_activation(&mut self, name: &str) -> Result<Option<PendingActivation<D::Readback>>, ViewerError> {
        let object = self.registry.get(name).ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        Ok(self.particles.begin(object, &mut self.driver)?)
    }

    pub fn finish_activation(&mut self, done: ReadbackDone) -> Result<ActivationOutcome, ViewerError> {
        Ok(self.particles.finish(done, &mut self.driver)?)
    }

    /// Remove an object's halo. A later `reflective` control with the same
    /// value is applied again.
    pub fn deactivate_particles(&mut self, name: &str) -> bool {
        self.sync.forget(&ControlKey::object(name, ObjectProperty::Reflective));
        self.release_halo(name)
    }

    fn release_halo(&mut self, name: &str) -> bool {
        self.pending.retain(|n| n != name);
        self.particles.deactivate(name, &mut self.driver)
    }

    pub fn queue_activation(&mut self, name: &str) {
        if !self.pending.iter().any(|n| n == name) {
            self.pending.push(name.to_string());
        }
    }

    pub fn pending_activations(&self) -> &[String] {
        &self.pending
    }

    /// Hand the queued activations to the caller, oldest first.
    pub fn take_pending(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending)
    }

    /// Run queued activations. Failures are logged and do not stop the rest.
    /// Returns how many halos were created.
    pub async fn process_pending(&mut self) -> usize {
        let pending = self.take_pending();
        let mut activated = 0;
        for name in pending {
            match self.activate_particles(&name).await {
                Ok(ActivationOutcome::Activated { .. }) => activated += 1,
                Ok(ActivationOutcome::AlreadyActive) => {}
                Err(e) => log::warn!("Skipping halo for '{}': {}", name, e),
            }
        }
        activated
    }

    // ------------------------------------------------------------------
    // Controls
    // ------------------------------------------------------------------

    pub fn apply_control_str(&mut self, key: &str, value: ControlValue) -> Result<SyncEffect, ViewerError> {
        let key: ControlKey = key.parse().map_err(ViewerError::Sync)?;
        self.apply_control(key, value)
    }

    /// Apply one external control and carry out its follow-up.
    pub fn apply_control(&mut self, key: ControlKey, value: ControlValue) -> Result<SyncEffect, ViewerError> {
        let targets = SyncTargets {
            registry: &mut self.registry,
            particles: &mut self.particles,
            ar: &mut self.ar,
        };
        let effect = self.sync.apply(key, value, targets)?;

        match &effect {
            SyncEffect::None | SyncEffect::Unchanged => {}
            SyncEffect::ActivateParticles(name) => {
                if self.particles.is_enabled() {
                    self.queue_activation(name);
                }
            }
            SyncEffect::DeactivateParticles(name) => {
                self.release_halo(name);
            }
            SyncEffect::SetParticlesEnabled(enabled) => {
                self.particles.set_enabled(*enabled, &mut self.driver);
                if *enabled {
                    let reflective: Vec<String> = self
                        .registry
                        .iter()
                        .filter(|o| o.is_reflective())
                        .map(|o| o.name().to_string())
                        .collect();
                    for name in reflective {
                        self.queue_activation(&name);
                    }
                } else {
                    self.pending.clear();
                }
            }
            SyncEffect::SetArMode(on) => {
                if *on {
                    self.enter_ar();
                } else {
                    self.leave_ar();
                }
            }
        }
        Ok(effect)
    }

    // ------------------------------------------------------------------
    // AR and orientation
    // ------------------------------------------------------------------

    /// Switch to the AR camera and start orientation tracking. AR stays on
    /// without tracking when sensors are denied; objects then use their
    /// explicit transforms. Returns whether tracking runs.
    pub fn start_ar(&mut self) -> bool {
        self.sync.forget(&ControlKey::ArMode);
        self.enter_ar()
    }

    pub fn stop_ar(&mut self) {
        self.sync.forget(&ControlKey::ArMode);
        self.leave_ar();
    }

    fn enter_ar(&mut self) -> bool {
        self.ar.activate();
        self.tracker.start(&mut self.sensors)
    }

    fn leave_ar(&mut self) {
        self.tracker.stop(&mut self.sensors);
        self.ar.deactivate();
    }

    pub fn on_orientation(&mut self, sample: OrientationSample) {
        self.tracker.on_orientation(sample);
    }

    pub fn on_motion(&mut self, sample: MotionSample) {
        self.tracker.on_motion(sample);
    }

    pub fn set_video_source(&mut self, source: impl VideoSource + 'static) {
        self.video = Box::new(source);
    }

    pub fn clear_video_source(&mut self) {
        self.video = Box::new(None::<VideoDims>);
    }

    /// Current size of the live video, read from the source now.
    pub fn video_dims(&self) -> Option<VideoDims> {
        self.video.dimensions()
    }

    // ------------------------------------------------------------------
    // Background
    // ------------------------------------------------------------------

    pub fn set_background(&mut self, background: Option<BackgroundTexture>) {
        self.background = background;
    }

    pub fn set_background_enabled(&mut self, enabled: bool) {
        self.background_enabled = enabled;
    }

    /// The background is never shown in AR; the video shows through.
    pub fn background_visible(&self) -> bool {
        self.background.is_some() && self.background_enabled && !self.ar.is_active()
    }

    pub fn clear_color(&self) -> [f32; 4] {
        if self.ar.is_active() {
            [0.0, 0.0, 0.0, 0.0]
        } else {
            self.config.clear_color
        }
    }

    // ------------------------------------------------------------------
    // Camera poses
    // ------------------------------------------------------------------

    pub fn save_camera_pose(&mut self) -> Result<SavedCameraPose, ViewerError> {
        let camera = self.active_camera().clone();
        self.poses.save(&camera).cloned()
    }

    pub fn apply_camera_pose(&mut self, id: u64) -> Result<(), ViewerError> {
        self.animation = None;
        self.poses.apply(id, &mut self.camera)
    }

    pub fn delete_camera_pose(&mut self, id: u64) -> Result<(), ViewerError> {
        self.poses.delete(id).map(|_| ())
    }

    pub fn camera_poses(&self) -> &[SavedCameraPose] {
        self.poses.list()
    }

    pub fn start_camera_animation(&mut self) -> Result<(), ViewerError> {
        self.animation = Some(CameraAnimation::new(self.poses.list(), self.config.camera_animation_duration)?);
        Ok(())
    }

    pub fn stop_camera_animation(&mut self) {
        if self.animation.take().is_some() {
            log::info!("Camera animation stopped");
        }
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    // ------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------

    pub fn request_frame(&mut self) -> Option<u64> {
        self.scheduler.request()
    }

    /// Run the frame for request `id` at host time `now` (seconds).
    pub fn frame(&mut self, id: u64, now: f64) -> FrameOutcome {
        if !self.scheduler.begin(id) {
            return FrameOutcome::Skipped;
        }
        let outcome = if self.init.is_ready() {
            self.guarded_render(now)
        } else {
            FrameOutcome::Skipped
        };
        self.scheduler.finish();
        outcome
    }

    /// Request and run a frame in one call, for offline rendering.
    pub fn step(&mut self, now: f64) -> FrameOutcome {
        match self.request_frame() {
            Some(id) => self.frame(id, now),
            None => FrameOutcome::Skipped,
        }
    }

    fn guarded_render(&mut self, now: f64) -> FrameOutcome {
        match self.render(now) {
            Ok(()) => {
                if self.consecutive_failures > 0 {
                    log::info!("Frame recovered after {} failures", self.consecutive_failures);
                }
                self.consecutive_failures = 0;
                FrameOutcome::Rendered
            }
            Err(e) => {
                self.consecutive_failures += 1;
                log::error!("Frame {} failed: {}", self.clock.frame(), e);
                if self.consecutive_failures >= self.config.frame_failure_threshold {
                    FrameOutcome::Degraded {
                        consecutive: self.consecutive_failures,
                    }
                } else {
                    FrameOutcome::Failed {
                        consecutive: self.consecutive_failures,
                    }
                }
            }
        }
    }

    fn render(&mut self, now: f64) -> Result<(), ViewerError> {
        let time = self.clock.tick(now);

        // 1. Objects.
        let pose = self.ar.pose(&self.tracker);
        self.registry.advance(time.dt, pose.as_ref());

        // 2. Cameras.
        if let Some(animation) = &mut self.animation {
            if !animation.step(time.dt, &mut self.camera) {
                log::info!("Camera animation complete");
                self.animation = None;
            }
        }
        if self.ar.is_active() {
            self.ar.sync_camera(&self.tracker, self.video.dimensions());
        }

        // 3. Particles.
        let registry = &self.registry;
        self.particles.prune(|name| registry.contains(name), &mut self.driver);
        self.particles.update_time(time.elapsed);
        let camera = self.active_camera().clone();
        self.particles.set_camera_orientation(camera.orientation());
        let view_proj = camera.view_projection_matrix();
        self.particles.flush(&mut self.driver, view_proj, self.viewport)?;

        // 4. Draw.
        let scene = FrameScene {
            view_proj,
            camera_position: camera.position,
            clear_color: self.clear_color(),
            objects: self.registry.draws(),
            particles: self.particles.draws(),
            debug_overlay: self.particles.debug_overlay(),
        };
        self.driver.draw_frame(&scene)?;
        Ok(())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn frame_count(&self) -> u64 {
        self.clock.frame()
    }

    // ------------------------------------------------------------------
    // Diagnostics and teardown
    // ------------------------------------------------------------------

    pub fn debug_snapshot(&self) -> DebugSnapshot {
        let camera = self.active_camera();
        let distance = camera.position.length();
        let (frustum_width, frustum_height) = camera.frustum_size(distance);

        DebugSnapshot {
            frame: self.clock.frame(),
            camera: CameraInfo {
                position: camera.position,
                rotation: camera.rotation_degrees(),
                look_at: camera.position + camera.forward(),
            },
            viewport: ViewportInfo {
                width: self.viewport.0,
                height: self.viewport.1,
                aspect: camera.aspect,
                fov: camera.fov,
                near: camera.near,
                far: camera.far,
                frustum_width,
                frustum_height,
                distance_to_origin: distance,
                visible_area: frustum_width * frustum_height,
            },
            objects: self
                .registry
                .iter()
                .map(|o| {
                    let r = o.transform.rotation;
                    ObjectInfo {
                        name: o.name().to_string(),
                        kind: o.kind(),
                        position: o.transform.position,
                        rotation: Vec3::new(r.x.to_degrees(), r.y.to_degrees(), r.z.to_degrees()),
                        opacity: o.opacity(),
                        visible: o.visible,
                        reflective: o.is_reflective(),
                    }
                })
                .collect(),
            particles: self.particles.info(),
            ar: ArInfo {
                active: self.ar.is_active(),
                tracker: self.tracker.state(),
                sample: self.tracker.last_sample(),
                delta: self.tracker.delta_degrees(),
                motion: self.tracker.last_motion(),
                video: self.video.dimensions(),
            },
            consecutive_failures: self.consecutive_failures,
        }
    }

    /// Release everything. The pending frame is cancelled before any GPU
    /// resource is touched. Returns the steps in the order they ran.
    pub fn teardown(&mut self) -> Vec<TeardownStep> {
        let mut steps = Vec::new();

        if let Some(id) = self.scheduler.cancel() {
            log::debug!("Cancelled frame request {}", id);
        }
        steps.push(TeardownStep::CancelFrame);

        self.animation = None;
        steps.push(TeardownStep::StopAnimation);

        self.leave_ar();
        steps.push(TeardownStep::StopTracking);

        self.pending.clear();
        let removed = self.particles.deactivate_all(&mut self.driver);
        steps.push(TeardownStep::DeactivateParticles);

        let objects = self.registry.drain();
        let count = objects.len();
        for mut object in objects {
            object.release(&mut self.driver);
        }
        steps.push(TeardownStep::ReleaseObjects);

        self.clock.reset();
        self.sync.clear();
        self.consecutive_failures = 0;
        self.init.reset();
        steps.push(TeardownStep::ResetClock);

        log::info!("Viewer torn down: {} halos, {} objects released", removed, count);
        steps
    }
}

impl<D: RenderDriver> Viewer<D, HostSensors> {
    /// Viewer whose sensors are granted by the host without a prompt.
    pub fn with_host_sensors(config: ViewerConfig, driver: D) -> Self {
        Self::new(config, driver, HostSensors::granted())
    }
}
