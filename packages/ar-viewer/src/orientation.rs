//! Device orientation tracking.
//!
//! The tracker keeps the last raw sample and a reference sample captured from
//! the first reading after tracking starts. Everything downstream (AR camera,
//! object damping, parallax) works on the shortest-path delta between the two.

use glam::Vec2;
use serde::Serialize;

use crate::sensors::{Permission, SensorSource};

/// Raw device orientation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct OrientationSample {
    /// Yaw around the vertical axis.
    pub alpha: f32,
    /// Pitch, front to back.
    pub beta: f32,
    /// Roll, left to right.
    pub gamma: f32,
}

impl OrientationSample {
    pub fn new(alpha: f32, beta: f32, gamma: f32) -> Self {
        Self { alpha, beta, gamma }
    }
}

/// Acceleration including gravity, m/s^2.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MotionSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Orientation delta from the reference sample.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct OrientationDelta {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl OrientationDelta {
    pub fn to_radians(self) -> Self {
        Self {
            yaw: self.yaw.to_radians(),
            pitch: self.pitch.to_radians(),
            roll: self.roll.to_radians(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackerState {
    Idle,
    Tracking,
}

/// Normalize an angle in degrees to (-180, 180].
pub fn normalize_angle(degrees: f32) -> f32 {
    let a = degrees.rem_euclid(360.0);
    if a > 180.0 {
        a - 360.0
    } else {
        a
    }
}

/// Shortest signed difference `live - reference` in degrees.
pub fn angle_delta(reference: f32, live: f32) -> f32 {
    normalize_angle(normalize_angle(live) - normalize_angle(reference))
}

#[derive(Debug)]
pub struct OrientationTracker {
    state: TrackerState,
    /// Set once permission is denied or sensors are missing; tracking never
    /// starts again.
    blocked: Option<Permission>,
    reference: Option<OrientationSample>,
    last: Option<OrientationSample>,
    motion: Option<MotionSample>,
}

impl Default for OrientationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OrientationTracker {
    pub fn new() -> Self {
        Self {
            state: TrackerState::Idle,
            blocked: None,
            reference: None,
            last: None,
            motion: None,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn is_tracking(&self) -> bool {
        self.state == TrackerState::Tracking
    }

    /// Permission outcome that blocked tracking, if any.
    pub fn blocked(&self) -> Option<Permission> {
        self.blocked
    }

    /// Request permission and attach listeners. Returns whether tracking is
    /// active afterwards.
    pub fn start(&mut self, sensors: &mut dyn SensorSource) -> bool {
        if self.is_tracking() {
            return true;
        }
        if let Some(permission) = self.blocked {
            log::debug!("Orientation tracking unavailable ({:?})", permission);
            return false;
        }

        match sensors.request_permission() {
            Permission::Granted => {}
            denied => {
                log::warn!("Orientation permission {:?}, using explicit transforms only", denied);
                self.blocked = Some(denied);
                return false;
            }
        }

        sensors.subscribe();
        self.state = TrackerState::Tracking;
        self.reference = None;
        self.last = None;
        self.motion = None;
        log::info!("Orientation tracking started");
        true
    }

    /// Detach listeners and clear the reference.
    pub fn stop(&mut self, sensors: &mut dyn SensorSource) {
        if !self.is_tracking() {
            return;
        }
        sensors.unsubscribe();
        self.state = TrackerState::Idle;
        self.reference = None;
        self.last = None;
        self.motion = None;
        log::info!("Orientation tracking stopped");
    }

    /// Feed an orientation sample. The first one after `start` becomes the
    /// reference. Ignored while idle.
    pub fn on_orientation(&mut self, sample: OrientationSample) {
        if !self.is_tracking() {
            return;
        }
        if self.reference.is_none() {
            log::debug!("Orientation reference captured: {:?}", sample);
            self.reference = Some(sample);
        }
        self.last = Some(sample);
    }

    pub fn on_motion(&mut self, sample: MotionSample) {
        if self.is_tracking() {
            self.motion = Some(sample);
        }
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    pub fn reference(&self) -> Option<OrientationSample> {
        self.reference
    }

    pub fn last_sample(&self) -> Option<OrientationSample> {
        self.last
    }

    pub fn last_motion(&self) -> Option<MotionSample> {
        self.motion
    }

    /// Delta in degrees, or `None` before the first sample.
    pub fn delta_degrees(&self) -> Option<OrientationDelta> {
        let (reference, live) = (self.reference?, self.last?);
        Some(OrientationDelta {
            yaw: angle_delta(reference.alpha, live.alpha),
            pitch: angle_delta(reference.beta, live.beta),
            roll: angle_delta(reference.gamma, live.gamma),
        })
    }

    /// Delta in radians.
    pub fn delta_rotation(&self) -> Option<OrientationDelta> {
        self.delta_degrees().map(OrientationDelta::to_radians)
    }

    /// Parallax offset: x from the roll delta, y from the pitch delta, both in
    /// radians times `sensitivity`. Zero without a delta.
    pub fn parallax_offset(&self, sensitivity: f32) -> Vec2 {
        self.delta_rotation()
            .map(|d| Vec2::new(d.roll * sensitivity, d.pitch * sensitivity))
            .unwrap_or(Vec2::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::HostSensors;

    #[test]
    fn test_normalize_angle() {
        assert_eq!(normalize_angle(180.0), 180.0);
        assert_eq!(normalize_angle(-180.0), 180.0);
        assert_eq!(normalize_angle(190.0), -170.0);
        assert_eq!(normalize_angle(720.0), 0.0);
        assert_eq!(normalize_angle(-90.0), -90.0);
    }

    #[test]
    fn test_angle_delta_wraps() {
        assert!((angle_delta(170.0, -170.0) - 20.0).abs() < 1e-4);
        assert!((angle_delta(-170.0, 170.0) + 20.0).abs() < 1e-4);
        assert!((angle_delta(10.0, 350.0) + 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_first_sample_is_reference() {
        let mut sensors = HostSensors::granted();
        let mut tracker = OrientationTracker::new();
        assert!(tracker.start(&mut sensors));
        assert!(sensors.is_subscribed());
        assert_eq!(tracker.delta_degrees(), None);

        tracker.on_orientation(OrientationSample::new(170.0, 45.0, 0.0));
        assert_eq!(tracker.delta_degrees(), Some(OrientationDelta::default()));

        tracker.on_orientation(OrientationSample::new(-170.0, 50.0, -10.0));
        let delta = tracker.delta_degrees().unwrap();
        assert!((delta.yaw - 20.0).abs() < 1e-4);
        assert!((delta.pitch - 5.0).abs() < 1e-4);
        assert!((delta.roll + 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_stop_clears_reference() {
        let mut sensors = HostSensors::granted();
        let mut tracker = OrientationTracker::new();
        tracker.start(&mut sensors);
        tracker.on_orientation(OrientationSample::new(10.0, 20.0, 30.0));
        tracker.stop(&mut sensors);

        assert_eq!(tracker.state(), TrackerState::Idle);
        assert!(!tracker.has_reference());
        assert!(!sensors.is_subscribed());

        // Idle trackers ignore samples.
        tracker.on_orientation(OrientationSample::new(0.0, 0.0, 0.0));
        assert!(tracker.last_sample().is_none());

        // Restart captures a fresh reference.
        tracker.start(&mut sensors);
        tracker.on_orientation(OrientationSample::new(50.0, 0.0, 0.0));
        assert_eq!(tracker.reference().unwrap().alpha, 50.0);
    }

    #[test]
    fn test_denied_is_permanent() {
        let mut sensors = HostSensors::new(Permission::Denied);
        let mut tracker = OrientationTracker::new();
        assert!(!tracker.start(&mut sensors));

        sensors.set_permission(Permission::Granted);
        assert!(!tracker.start(&mut sensors));
        assert_eq!(tracker.blocked(), Some(Permission::Denied));
        assert_eq!(tracker.parallax_offset(0.05), Vec2::ZERO);
    }

    #[test]
    fn test_parallax_offset() {
        let mut sensors = HostSensors::granted();
        let mut tracker = OrientationTracker::new();
        tracker.start(&mut sensors);
        tracker.on_orientation(OrientationSample::new(0.0, 0.0, 0.0));
        tracker.on_orientation(OrientationSample::new(0.0, 90.0, -90.0));

        let offset = tracker.parallax_offset(0.05);
        let quarter = std::f32::consts::FRAC_PI_2 * 0.05;
        assert!((offset.x + quarter).abs() < 1e-5);
        assert!((offset.y - quarter).abs() < 1e-5);
    }
}
