//! Edge-particle engine.
//!
//! Each decorated object gets one [`ParticleSystem`], keyed by the object's
//! name. Activation is a one-shot pipeline: silhouette mask, edge pass, pixel
//! readback, seed sampling, buffer and program creation. It runs in two
//! halves around the readback ([`EdgeParticleEngine::begin`] and
//! [`EdgeParticleEngine::finish`]) so a host can await the pixels without
//! holding the engine. After that the only per-frame work is pushing live
//! uniforms; parameter changes never recreate GPU objects.

use std::collections::BTreeMap;
use std::future::Future;

use glam::{Mat4, Quat, Vec3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::edge::{build_seeds, sample_edges, MaskFraming, EDGE_TARGET_SIZE};
use crate::error::{ActivationStage, GpuError, ParticleError};
use crate::gpu::driver::{BufferId, ParticleDraw, PixelBuffer, ProgramId, RenderDriver, RenderTargetId};
use crate::gpu::mesh::Bounds;
use crate::particle::{particle_count, ParticleParam, ParticleParams, ParticleUniforms, BASE_PARTICLE_COUNT};
use crate::registry::VisualObject;

/// GPU resources of one object's halo. Every handle is destroyed exactly once,
/// by [`EdgeParticleEngine::deactivate`].
#[derive(Debug)]
pub struct ParticleSystem {
    mask_target: RenderTargetId,
    edge_target: RenderTargetId,
    buffer: BufferId,
    program: ProgramId,
    /// Particles allocated in `buffer`.
    capacity: usize,
    edge_samples: usize,
    used_edges: bool,
}

impl ParticleSystem {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn edge_target(&self) -> RenderTargetId {
        self.edge_target
    }

    /// Whether seeds came from edge pixels rather than the random fallback.
    pub fn used_edges(&self) -> bool {
        self.used_edges
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    Activated { particles: usize, edge_samples: usize, used_edges: bool },
    AlreadyActive,
}

/// Summary of one system for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticleSystemInfo {
    pub name: String,
    pub capacity: usize,
    pub drawn: usize,
    pub edge_samples: usize,
    pub used_edges: bool,
}

/// Handles created so far by an activation, released on failure.
#[derive(Debug, Default)]
struct Staged {
    mask: Option<RenderTargetId>,
    edge: Option<RenderTargetId>,
    buffer: Option<BufferId>,
    program: Option<ProgramId>,
}

impl Staged {
    fn release<D: RenderDriver>(self, driver: &mut D) {
        if let Some(id) = self.program {
            driver.destroy_particle_program(id);
        }
        if let Some(id) = self.buffer {
            driver.destroy_particle_buffer(id);
        }
        if let Some(id) = self.edge {
            driver.destroy_render_target(id);
        }
        if let Some(id) = self.mask {
            driver.destroy_render_target(id);
        }
    }
}

/// Mask and edge targets of an activation whose readback is in flight.
#[derive(Debug)]
pub struct ActivationTicket {
    name: String,
    generation: u64,
    staged: Staged,
}

impl ActivationTicket {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// First half of an activation: the passes have run and the edge readback
/// is in flight. Awaiting [`PendingActivation::readback`] borrows neither the
/// engine nor the driver.
pub struct PendingActivation<R> {
    ticket: ActivationTicket,
    readback: R,
}

impl<R> PendingActivation<R>
where
    R: Future<Output = Result<PixelBuffer, GpuError>>,
{
    pub fn name(&self) -> &str {
        &self.ticket.name
    }

    pub async fn readback(self) -> ReadbackDone {
        let pixels = self.readback.await;
        ReadbackDone {
            ticket: self.ticket,
            pixels,
        }
    }
}

/// Edge pixels for an activation, ready for [`EdgeParticleEngine::finish`].
#[derive(Debug)]
pub struct ReadbackDone {
    ticket: ActivationTicket,
    pixels: Result<PixelBuffer, GpuError>,
}

impl ReadbackDone {
    pub fn name(&self) -> &str {
        &self.ticket.name
    }
}

fn at(stage: ActivationStage) -> impl FnOnce(GpuError) -> ParticleError {
    move |source| ParticleError::Pipeline { stage, source }
}

pub struct EdgeParticleEngine {
    systems: BTreeMap<String, ParticleSystem>,
    params: ParticleParams,
    time: f32,
    enabled: bool,
    base_count: usize,
    target_size: u32,
    rng: StdRng,
    /// Activations waiting on their readback, by object name.
    in_flight: BTreeMap<String, u64>,
    next_generation: u64,
    /// Active camera orientation, copied onto the particle plane when
    /// `follow_camera` is on.
    camera_orientation: Quat,
    edge_debug: bool,
}

impl Default for EdgeParticleEngine {
    fn default() -> Self {
        Self::new(ParticleParams::default(), BASE_PARTICLE_COUNT, EDGE_TARGET_SIZE, 0)
    }
}

impl EdgeParticleEngine {
    pub fn new(params: ParticleParams, base_count: usize, target_size: u32, seed: u64) -> Self {
        Self {
            systems: BTreeMap::new(),
            params,
            time: 0.0,
            enabled: true,
            base_count,
            target_size,
            rng: StdRng::seed_from_u64(seed),
            in_flight: BTreeMap::new(),
            next_generation: 0,
            camera_orientation: Quat::IDENTITY,
            edge_debug: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.systems.contains_key(name)
    }

    pub fn system(&self, name: &str) -> Option<&ParticleSystem> {
        self.systems.get(name)
    }

    pub fn active_names(&self) -> impl Iterator<Item = &str> {
        self.systems.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn params(&self) -> &ParticleParams {
        &self.params
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn is_in_flight(&self, name: &str) -> bool {
        self.in_flight.contains_key(name)
    }

    /// Run the activation pipeline for `object`. Idempotent per name: an
    /// active object is left alone. On failure every handle created so far is
    /// destroyed and the object keeps rendering without a halo.
    pub async fn activate<D: RenderDriver>(&mut self, object: &VisualObject, driver: &mut D) -> Result<ActivationOutcome, ParticleError> {
        match self.begin(object, driver)? {
            Some(pending) => {
                let done = pending.readback().await;
                self.finish(done, driver)
            }
            None => Ok(ActivationOutcome::AlreadyActive),
        }
    }

    /// Render the mask and edge passes and start the edge readback. Returns
    /// `None` when the object already has a halo or one is in flight.
    pub fn begin<D: RenderDriver>(
        &mut self,
        object: &VisualObject,
        driver: &mut D,
    ) -> Result<Option<PendingActivation<D::Readback>>, ParticleError> {
        if !self.enabled {
            return Err(ParticleError::Disabled);
        }
        let name = object.name();
        if self.systems.contains_key(name) || self.in_flight.contains_key(name) {
            log::debug!("Edge particles already active for '{}'", name);
            return Ok(None);
        }

        let mut staged = Staged::default();
        match Self::submit(object, self.target_size, driver, &mut staged) {
            Ok(readback) => {
                self.next_generation += 1;
                let generation = self.next_generation;
                self.in_flight.insert(name.to_string(), generation);
                Ok(Some(PendingActivation {
                    ticket: ActivationTicket {
                        name: name.to_string(),
                        generation,
                        staged,
                    },
                    readback,
                }))
            }
            Err(e) => {
                log::error!("Edge particles for '{}' failed: {}", name, e);
                staged.release(driver);
                Err(e)
            }
        }
    }

    fn submit<D: RenderDriver>(object: &VisualObject, size: u32, driver: &mut D, staged: &mut Staged) -> Result<D::Readback, ParticleError> {
        // 1. Silhouette mask, framed on the object's world bounds.
        let mask_geometry = object.mask_geometry();
        let bounds = Bounds::from_points(mask_geometry.positions.iter().copied().map(Vec3::from)).unwrap_or(Bounds {
            min: object.transform.position,
            max: object.transform.position,
        });
        let framing = MaskFraming::for_bounds(&bounds);
        log::debug!(
            "Mask framing for '{}': distance {:.2}, size {:.2}",
            object.name(),
            framing.distance,
            bounds.max_dimension()
        );

        let mask = driver
            .create_render_target(size, size, "particle mask")
            .map_err(at(ActivationStage::MaskTarget))?;
        staged.mask = Some(mask);
        driver
            .render_mask(mask, &mask_geometry, framing.view_projection(1.0))
            .map_err(at(ActivationStage::MaskPass))?;

        // 2. Edge pass.
        let edge = driver
            .create_render_target(size, size, "particle edges")
            .map_err(at(ActivationStage::EdgeTarget))?;
        staged.edge = Some(edge);
        driver.render_edges(mask, edge).map_err(at(ActivationStage::EdgePass))?;

        // 3. Readback, resolved by the caller.
        driver.read_pixels(edge).map_err(at(ActivationStage::Readback))
    }

    /// Second half of an activation: sample the edge pixels and create the
    /// seed buffer and program. An activation cancelled while its readback
    /// was in flight releases its targets and returns
    /// [`ParticleError::Cancelled`].
    pub fn finish<D: RenderDriver>(&mut self, done: ReadbackDone, driver: &mut D) -> Result<ActivationOutcome, ParticleError> {
        let ReadbackDone { ticket, pixels } = done;
        let ActivationTicket { name, generation, mut staged } = ticket;

        if self.in_flight.get(&name) != Some(&generation) {
            log::info!("Edge particle activation for '{}' was cancelled", name);
            staged.release(driver);
            return Err(ParticleError::Cancelled(name));
        }
        self.in_flight.remove(&name);

        match self.build(&name, pixels, driver, &mut staged) {
            Ok(system) => {
                let outcome = ActivationOutcome::Activated {
                    particles: system.capacity,
                    edge_samples: system.edge_samples,
                    used_edges: system.used_edges,
                };
                log::info!(
                    "Edge particles active for '{}': {} particles from {} edge pixels",
                    name,
                    system.capacity,
                    system.edge_samples
                );
                self.systems.insert(name, system);
                Ok(outcome)
            }
            Err(e) => {
                log::error!("Edge particles for '{}' failed: {}", name, e);
                staged.release(driver);
                Err(e)
            }
        }
    }

    fn build<D: RenderDriver>(
        &mut self,
        name: &str,
        pixels: Result<PixelBuffer, GpuError>,
        driver: &mut D,
        staged: &mut Staged,
    ) -> Result<ParticleSystem, ParticleError> {
        let (Some(mask), Some(edge)) = (staged.mask, staged.edge) else {
            return Err(ParticleError::Pipeline {
                stage: ActivationStage::EdgeTarget,
                source: GpuError::Resource("activation has no edge target".into()),
            });
        };

        let pixels = pixels.map_err(at(ActivationStage::Readback))?;
        let samples = sample_edges(&pixels);
        if !samples.is_valid() {
            log::warn!("Only {} edge pixels for '{}', seeding particles at random", samples.len(), name);
        }

        // 4. Seeds, buffer and program. At least one seed is allocated so a
        // zero density still yields a system that draws nothing.
        let count = particle_count(self.base_count, self.params.density).max(1);
        let seeds = build_seeds(count, &samples, &mut self.rng);
        let buffer = driver.create_particle_buffer(&seeds).map_err(at(ActivationStage::ParticleBuffer))?;
        staged.buffer = Some(buffer);

        let uniforms = ParticleUniforms::new(&self.params, self.time, Mat4::IDENTITY, (1, 1));
        let program = driver
            .create_particle_program(&uniforms)
            .map_err(at(ActivationStage::ParticleProgram))?;
        staged.program = Some(program);

        Ok(ParticleSystem {
            mask_target: mask,
            edge_target: edge,
            buffer,
            program,
            capacity: count,
            edge_samples: samples.len(),
            used_edges: samples.is_valid(),
        })
    }

    /// Destroy the object's halo. Returns false (and does nothing) when there
    /// is none. An activation still in flight is cancelled; its targets are
    /// released when it finishes.
    pub fn deactivate<D: RenderDriver>(&mut self, name: &str, driver: &mut D) -> bool {
        self.in_flight.remove(name);
        let Some(system) = self.systems.remove(name) else {
            return false;
        };
        driver.destroy_particle_program(system.program);
        driver.destroy_particle_buffer(system.buffer);
        driver.destroy_render_target(system.edge_target);
        driver.destroy_render_target(system.mask_target);
        log::info!("Edge particles removed for '{}'", name);
        true
    }

    pub fn deactivate_all<D: RenderDriver>(&mut self, driver: &mut D) -> usize {
        self.in_flight.clear();
        let names: Vec<String> = self.systems.keys().cloned().collect();
        names.iter().filter(|name| self.deactivate(name.as_str(), driver)).count()
    }

    /// Remove systems whose object is gone.
    pub fn prune<D: RenderDriver>(&mut self, is_live: impl Fn(&str) -> bool, driver: &mut D) -> usize {
        let orphans: Vec<String> = self.systems.keys().filter(|n| !is_live(n.as_str())).cloned().collect();
        for name in &orphans {
            log::warn!("Removing edge particles for missing object '{}'", name);
            self.deactivate(name, driver);
        }
        orphans.len()
    }

    /// Turn the effect on or off globally. Turning it off removes every halo.
    pub fn set_enabled<D: RenderDriver>(&mut self, enabled: bool, driver: &mut D) -> bool {
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        if !enabled {
            let removed = self.deactivate_all(driver);
            log::info!("Edge particles disabled, removed {} systems", removed);
        } else {
            log::info!("Edge particles enabled");
        }
        true
    }

    pub fn update_time(&mut self, time: f32) {
        self.time = time;
    }

    /// Set one live parameter. Returns true if it changed.
    pub fn set_param(&mut self, param: ParticleParam, value: f32) -> bool {
        let changed = self.params.set(param, value);
        if changed {
            log::debug!("Particle {} = {}", param.name(), value);
        }
        changed
    }

    pub fn set_follow_camera(&mut self, follow: bool) -> bool {
        let changed = self.params.follow_camera != follow;
        self.params.follow_camera = follow;
        changed
    }

    pub fn set_camera_orientation(&mut self, orientation: Quat) {
        self.camera_orientation = orientation;
    }

    pub fn set_edge_debug(&mut self, on: bool) {
        self.edge_debug = on;
    }

    pub fn edge_debug(&self) -> bool {
        self.edge_debug
    }

    /// Edge target shown by the debug overlay: the first active system's.
    pub fn debug_overlay(&self) -> Option<RenderTargetId> {
        if !self.edge_debug {
            return None;
        }
        self.systems.values().next().map(|s| s.edge_target)
    }

    /// World transform of the particle plane.
    pub fn plane_model(&self) -> Mat4 {
        if self.params.follow_camera {
            Mat4::from_quat(self.camera_orientation)
        } else {
            Mat4::IDENTITY
        }
    }

    /// Particles drawn per system at the current density.
    pub fn drawn_count(&self, system: &ParticleSystem) -> usize {
        particle_count(self.base_count, self.params.density).min(system.capacity)
    }

    /// Push time, parameters and the camera matrix to every program.
    pub fn flush<D: RenderDriver>(&self, driver: &mut D, view_proj: Mat4, viewport: (u32, u32)) -> Result<(), GpuError> {
        if self.systems.is_empty() {
            return Ok(());
        }
        let uniforms = ParticleUniforms::new(&self.params, self.time, view_proj * self.plane_model(), viewport);
        for system in self.systems.values() {
            driver.update_particle_program(system.program, &uniforms)?;
        }
        Ok(())
    }

    pub fn draws(&self) -> Vec<ParticleDraw> {
        self.systems
            .values()
            .map(|system| ParticleDraw {
                buffer: system.buffer,
                program: system.program,
                instance_count: self.drawn_count(system) as u32,
            })
            .filter(|draw| draw.instance_count > 0)
            .collect()
    }

    pub fn info(&self) -> Vec<ParticleSystemInfo> {
        self.systems
            .iter()
            .map(|(name, system)| ParticleSystemInfo {
                name: name.clone(),
                capacity: system.capacity,
                drawn: self.drawn_count(system),
                edge_samples: system.edge_samples,
                used_edges: system.used_edges,
            })
            .collect()
    }
}
