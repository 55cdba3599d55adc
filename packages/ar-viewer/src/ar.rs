//! Fake 4-DOF AR.
//!
//! There is no world tracking. While AR is active the objects counter-rotate
//! against the device's orientation delta (damped by half) and drift by a
//! small parallax offset, which is enough to make them appear anchored in the
//! live video behind them.

use glam::{Vec2, Vec3};

use crate::camera::Camera;
use crate::media::VideoDims;
use crate::orientation::{OrientationDelta, OrientationTracker};

/// Fraction of the device rotation applied (inverted) to objects.
pub const OBJECT_DAMPING: f32 = 0.5;
pub const DEFAULT_PARALLAX_SENSITIVITY: f32 = 0.05;
pub const AR_CAMERA_FOV: f32 = 53.0;
/// Pitch offset so a phone held upright looks at the horizon.
const PITCH_OFFSET_DEGREES: f32 = 90.0;

/// Per-frame AR input for the object registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArPose {
    /// Euler XYZ, radians.
    pub object_rotation: Vec3,
    /// Added to each object's explicit target x and y.
    pub parallax: Vec2,
}

impl ArPose {
    /// `x <- pitch`, `y <- roll`, `z <- yaw`, each `-delta * damping`.
    pub fn from_delta(delta_radians: OrientationDelta, sensitivity: f32) -> Self {
        let d = delta_radians;
        Self {
            object_rotation: Vec3::new(-d.pitch, -d.roll, -d.yaw) * OBJECT_DAMPING,
            parallax: Vec2::new(d.roll * sensitivity, d.pitch * sensitivity),
        }
    }
}

/// AR camera rotation (radians, YXZ) from an orientation in degrees.
pub fn camera_rotation(yaw: f32, pitch: f32, roll: f32) -> Vec3 {
    Vec3::new((pitch - PITCH_OFFSET_DEGREES).to_radians(), yaw.to_radians(), roll.to_radians())
}

#[derive(Debug)]
pub struct ArSession {
    active: bool,
    sensitivity: f32,
    /// Drive the camera from the raw orientation instead of the delta.
    absolute_camera: bool,
    pub camera: Camera,
}

impl ArSession {
    pub fn new(sensitivity: f32, absolute_camera: bool) -> Self {
        Self {
            active: false,
            sensitivity,
            absolute_camera,
            camera: Camera::ar(AR_CAMERA_FOV),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn activate(&mut self) {
        self.active = true;
        log::info!("AR mode on");
    }

    pub fn deactivate(&mut self) {
        if self.active {
            self.active = false;
            log::info!("AR mode off");
        }
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = sensitivity.max(0.0);
    }

    /// Object pose for this frame, or `None` when AR is off or the tracker
    /// has no reference yet.
    pub fn pose(&self, tracker: &OrientationTracker) -> Option<ArPose> {
        if !self.active {
            return None;
        }
        tracker.delta_rotation().map(|d| ArPose::from_delta(d, self.sensitivity))
    }

    /// Update the AR camera: aspect from the video size read this frame,
    /// rotation from the tracker. Independent of object damping.
    pub fn sync_camera(&mut self, tracker: &OrientationTracker, video: Option<VideoDims>) {
        if let Some(aspect) = video.and_then(|v| v.aspect()) {
            if (self.camera.aspect - aspect).abs() > f32::EPSILON {
                log::debug!("AR camera aspect {}", aspect);
                self.camera.aspect = aspect;
            }
        }

        let orientation = if self.absolute_camera {
            tracker.last_sample().map(|s| (s.alpha, s.beta, s.gamma))
        } else {
            tracker.delta_degrees().map(|d| (d.yaw, d.pitch, d.roll))
        };
        if let Some((yaw, pitch, roll)) = orientation {
            self.camera.rotation = camera_rotation(yaw, pitch, roll);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orientation::OrientationSample;
    use crate::sensors::HostSensors;

    fn tracking(reference: OrientationSample, live: OrientationSample) -> OrientationTracker {
        let mut sensors = HostSensors::granted();
        let mut tracker = OrientationTracker::new();
        tracker.start(&mut sensors);
        tracker.on_orientation(reference);
        tracker.on_orientation(live);
        tracker
    }

    #[test]
    fn test_pose_inverts_and_damps() {
        let tracker = tracking(OrientationSample::new(0.0, 0.0, 0.0), OrientationSample::new(20.0, 10.0, -30.0));
        let mut session = ArSession::new(DEFAULT_PARALLAX_SENSITIVITY, false);
        assert!(session.pose(&tracker).is_none());

        session.activate();
        let pose = session.pose(&tracker).unwrap();
        let expected = Vec3::new(-10.0f32.to_radians(), 30.0f32.to_radians(), -20.0f32.to_radians()) * 0.5;
        assert!((pose.object_rotation - expected).length() < 1e-6);
        assert!((pose.parallax.x - (-30.0f32).to_radians() * 0.05).abs() < 1e-6);
        assert!((pose.parallax.y - 10.0f32.to_radians() * 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_no_pose_without_reference() {
        let tracker = OrientationTracker::new();
        let mut session = ArSession::new(DEFAULT_PARALLAX_SENSITIVITY, false);
        session.activate();
        assert!(session.pose(&tracker).is_none());
    }

    #[test]
    fn test_camera_follows_video_aspect() {
        let tracker = OrientationTracker::new();
        let mut session = ArSession::new(DEFAULT_PARALLAX_SENSITIVITY, false);
        session.activate();
        session.sync_camera(&tracker, Some(VideoDims::new(1920, 1440)));
        assert!((session.camera.aspect - 4.0 / 3.0).abs() < 1e-6);

        session.sync_camera(&tracker, Some(VideoDims::new(720, 1280)));
        assert!((session.camera.aspect - 0.5625).abs() < 1e-6);

        // A stream with no size yet leaves the aspect alone.
        session.sync_camera(&tracker, Some(VideoDims::new(0, 0)));
        assert!((session.camera.aspect - 0.5625).abs() < 1e-6);
    }

    #[test]
    fn test_camera_rotation_from_delta_and_absolute() {
        let tracker = tracking(OrientationSample::new(100.0, 90.0, 0.0), OrientationSample::new(110.0, 100.0, 5.0));

        let mut relative = ArSession::new(DEFAULT_PARALLAX_SENSITIVITY, false);
        relative.sync_camera(&tracker, None);
        assert!((relative.camera.rotation - camera_rotation(10.0, 10.0, 5.0)).length() < 1e-5);

        let mut absolute = ArSession::new(DEFAULT_PARALLAX_SENSITIVITY, true);
        absolute.sync_camera(&tracker, None);
        assert!((absolute.camera.rotation - camera_rotation(110.0, 100.0, 5.0)).length() < 1e-5);
        assert!((absolute.camera.rotation.x - 10.0f32.to_radians()).abs() < 1e-5);
    }
}
