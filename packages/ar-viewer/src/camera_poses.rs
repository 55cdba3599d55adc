//! Saved camera poses and the interpolated fly-through between them.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::error::ViewerError;
use crate::orientation::normalize_angle;

pub const MAX_SAVED_POSES: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedCameraPose {
    pub id: u64,
    pub name: String,
    pub position: Vec3,
    /// Degrees.
    pub rotation: Vec3,
    /// Point one unit in front of the camera.
    pub look_at: Vec3,
}

fn round_to(v: f32, decimals: i32) -> f32 {
    let f = 10f32.powi(decimals);
    (v * f).round() / f
}

impl SavedCameraPose {
    /// Snapshot a camera. Position is rounded to 0.01, rotation to 0.1 degree.
    pub fn capture(id: u64, name: String, camera: &Camera) -> Self {
        let rotation = camera.rotation_degrees();
        let look_at = camera.position + camera.forward();
        Self {
            id,
            name,
            position: camera.position.to_array().map(|v| round_to(v, 2)).into(),
            rotation: rotation.to_array().map(|v| round_to(v, 1)).into(),
            look_at: look_at.to_array().map(|v| round_to(v, 2)).into(),
        }
    }

    pub fn apply(&self, camera: &mut Camera) {
        camera.position = self.position;
        camera.set_rotation_degrees(self.rotation);
    }
}

/// In-memory store of up to [`MAX_SAVED_POSES`] poses, in save order.
#[derive(Debug, Default)]
pub struct CameraPoseStore {
    poses: Vec<SavedCameraPose>,
    next_id: u64,
}

impl CameraPoseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&mut self, camera: &Camera) -> Result<&SavedCameraPose, ViewerError> {
        if self.poses.len() >= MAX_SAVED_POSES {
            log::warn!("Camera pose limit of {} reached", MAX_SAVED_POSES);
            return Err(ViewerError::PosesFull(MAX_SAVED_POSES));
        }
        self.next_id += 1;
        let name = format!("Camera {}", self.next_id);
        let pose = SavedCameraPose::capture(self.next_id, name, camera);
        log::info!("Saved camera pose '{}'", pose.name);
        self.poses.push(pose);
        Ok(&self.poses[self.poses.len() - 1])
    }

    pub fn apply(&self, id: u64, camera: &mut Camera) -> Result<(), ViewerError> {
        let pose = self.get(id).ok_or(ViewerError::PoseNotFound(id))?;
        pose.apply(camera);
        log::info!("Applied camera pose '{}'", pose.name);
        Ok(())
    }

    pub fn delete(&mut self, id: u64) -> Result<SavedCameraPose, ViewerError> {
        let index = self.poses.iter().position(|p| p.id == id).ok_or(ViewerError::PoseNotFound(id))?;
        Ok(self.poses.remove(index))
    }

    pub fn get(&self, id: u64) -> Option<&SavedCameraPose> {
        self.poses.iter().find(|p| p.id == id)
    }

    pub fn list(&self) -> &[SavedCameraPose] {
        &self.poses
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn clear(&mut self) {
        self.poses.clear();
    }
}

/// Shortest-path interpolation between two angles in degrees, result in
/// (-180, 180].
pub fn lerp_rotation(start: f32, end: f32, t: f32) -> f32 {
    let s = normalize_angle(start);
    let diff = normalize_angle(normalize_angle(end) - s);
    normalize_angle(s + diff * t)
}

/// Linear fly-through across a snapshot of the saved poses.
#[derive(Debug, Clone)]
pub struct CameraAnimation {
    poses: Vec<SavedCameraPose>,
    duration: f32,
    elapsed: f32,
}

impl CameraAnimation {
    pub fn new(poses: &[SavedCameraPose], duration: f32) -> Result<Self, ViewerError> {
        if poses.len() < 2 {
            log::warn!("Camera animation needs at least two saved poses");
            return Err(ViewerError::NotEnoughPoses);
        }
        log::info!("Camera animation over {} poses", poses.len());
        Ok(Self {
            poses: poses.to_vec(),
            duration: duration.max(f32::EPSILON),
            elapsed: 0.0,
        })
    }

    pub fn progress(&self) -> f32 {
        (self.elapsed / self.duration).min(1.0)
    }

    pub fn is_finished(&self) -> bool {
        self.progress() >= 1.0
    }

    /// Advance by `dt` seconds and pose `camera`. Returns false once the end
    /// has been reached and applied.
    pub fn step(&mut self, dt: f32, camera: &mut Camera) -> bool {
        self.elapsed += dt.max(0.0);
        let (position, rotation) = self.sample(self.progress());
        camera.position = position;
        camera.set_rotation_degrees(rotation);
        !self.is_finished()
    }

    /// Position and rotation (degrees) at `progress` in [0, 1].
    pub fn sample(&self, progress: f32) -> (Vec3, Vec3) {
        let segments = self.poses.len() - 1;
        let scaled = progress.clamp(0.0, 1.0) * segments as f32;
        let segment = (scaled.floor() as usize).min(segments - 1);
        let t = scaled - segment as f32;

        let (a, b) = (&self.poses[segment], &self.poses[segment + 1]);
        let position = a.position.lerp(b.position, t);
        let rotation = Vec3::new(
            lerp_rotation(a.rotation.x, b.rotation.x, t),
            lerp_rotation(a.rotation.y, b.rotation.y, t),
            lerp_rotation(a.rotation.z, b.rotation.z, t),
        );
        (position, rotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose(id: u64, position: Vec3, rotation: Vec3) -> SavedCameraPose {
        SavedCameraPose {
            id,
            name: format!("Camera {}", id),
            position,
            rotation,
            look_at: Vec3::ZERO,
        }
    }

    #[test]
    fn test_store_limit() {
        let camera = Camera::main(75.0, Vec3::new(0.0, 0.0, 8.0));
        let mut store = CameraPoseStore::new();
        for i in 0..MAX_SAVED_POSES {
            let saved = store.save(&camera).unwrap();
            assert_eq!(saved.name, format!("Camera {}", i + 1));
        }
        assert!(matches!(store.save(&camera), Err(ViewerError::PosesFull(4))));
    }

    #[test]
    fn test_save_apply_delete() {
        let mut camera = Camera::main(75.0, Vec3::new(1.234, 2.0, 8.0));
        let mut store = CameraPoseStore::new();
        let id = store.save(&camera).unwrap().id;
        assert_eq!(store.get(id).unwrap().position, Vec3::new(1.23, 2.0, 8.0));

        camera.position = Vec3::ZERO;
        store.apply(id, &mut camera).unwrap();
        assert_eq!(camera.position, Vec3::new(1.23, 2.0, 8.0));

        store.delete(id).unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.apply(id, &mut camera), Err(ViewerError::PoseNotFound(_))));
    }

    #[test]
    fn test_names_stay_unique_after_delete() {
        let camera = Camera::main(75.0, Vec3::new(0.0, 0.0, 8.0));
        let mut store = CameraPoseStore::new();
        let first = store.save(&camera).unwrap().id;
        store.save(&camera).unwrap();
        store.delete(first).unwrap();

        let third = store.save(&camera).unwrap().name.clone();
        assert_eq!(third, "Camera 3");
        let names: Vec<&str> = store.list().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Camera 2", "Camera 3"]);
    }

    #[test]
    fn test_lerp_rotation_shortest_path() {
        assert!((lerp_rotation(170.0, -170.0, 0.5) - 180.0).abs() < 1e-4);
        assert!((lerp_rotation(170.0, -170.0, 0.25) - 175.0).abs() < 1e-4);
        assert!((lerp_rotation(-10.0, 10.0, 0.5)).abs() < 1e-4);
    }

    #[test]
    fn test_animation_needs_two_poses() {
        let poses = vec![pose(1, Vec3::ZERO, Vec3::ZERO)];
        assert!(matches!(CameraAnimation::new(&poses, 5.0), Err(ViewerError::NotEnoughPoses)));
    }

    #[test]
    fn test_animation_segments() {
        let poses = vec![
            pose(1, Vec3::ZERO, Vec3::ZERO),
            pose(2, Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 90.0, 0.0)),
            pose(3, Vec3::new(2.0, 4.0, 0.0), Vec3::new(0.0, 90.0, 0.0)),
        ];
        let animation = CameraAnimation::new(&poses, 4.0).unwrap();

        let (p, r) = animation.sample(0.25);
        assert!((p - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-5);
        assert!((r.y - 45.0).abs() < 1e-4);

        let (p, _) = animation.sample(0.75);
        assert!((p - Vec3::new(2.0, 2.0, 0.0)).length() < 1e-5);

        let (p, _) = animation.sample(1.0);
        assert!((p - Vec3::new(2.0, 4.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_animation_finishes() {
        let poses = vec![pose(1, Vec3::ZERO, Vec3::ZERO), pose(2, Vec3::X, Vec3::ZERO)];
        let mut animation = CameraAnimation::new(&poses, 1.0).unwrap();
        let mut camera = Camera::new(75.0, 0.1, 100.0);
        assert!(animation.step(0.5, &mut camera));
        assert!(!animation.step(0.6, &mut camera));
        assert_eq!(camera.position, Vec3::X);
    }
}
