//! Perspective cameras.
//!
//! A camera is a position plus Euler rotation in one of two orders: `XYZ` for
//! the orbit-style main camera and `YXZ` for the AR camera, whose yaw must be
//! applied first. `look_at` is a one-shot that rewrites the rotation, so the
//! rotation is always the single source of truth for orientation.

use glam::{EulerRot, Mat4, Quat, Vec3};

/// Euler application order. Angles are always stored as (x, y, z).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EulerOrder {
    #[default]
    XYZ,
    YXZ,
}

impl EulerOrder {
    pub fn to_quat(self, r: Vec3) -> Quat {
        match self {
            EulerOrder::XYZ => Quat::from_euler(EulerRot::XYZ, r.x, r.y, r.z),
            EulerOrder::YXZ => Quat::from_euler(EulerRot::YXZ, r.y, r.x, r.z),
        }
    }

    pub fn from_quat(self, q: Quat) -> Vec3 {
        match self {
            EulerOrder::XYZ => {
                let (x, y, z) = q.to_euler(EulerRot::XYZ);
                Vec3::new(x, y, z)
            }
            EulerOrder::YXZ => {
                let (y, x, z) = q.to_euler(EulerRot::YXZ);
                Vec3::new(x, y, z)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    /// Euler angles in radians.
    pub rotation: Vec3,
    pub order: EulerOrder,
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub aspect: f32,
}

impl Camera {
    pub fn new(fov: f32, near: f32, far: f32) -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            order: EulerOrder::XYZ,
            fov,
            near,
            far,
            aspect: 1.0,
        }
    }

    /// Scene camera: 75 degrees, at (0, 0, 8) looking at the origin.
    pub fn main(fov: f32, position: Vec3) -> Self {
        let mut camera = Self::new(fov, 0.1, 1000.0);
        camera.position = position;
        camera.look_at(Vec3::ZERO);
        camera
    }

    /// AR camera: at the origin, YXZ order, rotation driven by the tracker.
    pub fn ar(fov: f32) -> Self {
        let mut camera = Self::new(fov, 0.01, 100.0);
        camera.order = EulerOrder::YXZ;
        camera
    }

    pub fn orientation(&self) -> Quat {
        self.order.to_quat(self.rotation)
    }

    /// Point the camera at `target`, rewriting the rotation.
    pub fn look_at(&mut self, target: Vec3) {
        if (target - self.position).length_squared() < f32::EPSILON {
            return;
        }
        let world = Mat4::look_at_rh(self.position, target, Vec3::Y).inverse();
        let (_, rotation, _) = world.to_scale_rotation_translation();
        self.rotation = self.order.from_quat(rotation);
    }

    /// Rotation in degrees, for diagnostics and saved poses.
    pub fn rotation_degrees(&self) -> Vec3 {
        Vec3::new(
            self.rotation.x.to_degrees(),
            self.rotation.y.to_degrees(),
            self.rotation.z.to_degrees(),
        )
    }

    pub fn set_rotation_degrees(&mut self, degrees: Vec3) {
        self.rotation = Vec3::new(degrees.x.to_radians(), degrees.y.to_radians(), degrees.z.to_radians());
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation(), self.position).inverse()
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov.to_radians(), self.aspect.max(1e-4), self.near, self.far)
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Direction the camera looks along (-Z in camera space).
    pub fn forward(&self) -> Vec3 {
        self.orientation() * Vec3::NEG_Z
    }

    pub fn right(&self) -> Vec3 {
        self.orientation() * Vec3::X
    }

    pub fn camera_up(&self) -> Vec3 {
        self.orientation() * Vec3::Y
    }

    /// Visible (width, height) at `distance` in front of the camera.
    pub fn frustum_size(&self, distance: f32) -> (f32, f32) {
        let height = 2.0 * (self.fov.to_radians() * 0.5).tan() * distance;
        (height * self.aspect, height)
    }
}
