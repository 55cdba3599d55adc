//! Device sensor seam.
//!
//! The orientation tracker never listens to hardware itself. A
//! [`SensorSource`] grants permission and attaches/detaches the host's
//! listeners; the host then pushes samples into the tracker.

/// Outcome of a sensor permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// The platform has no orientation sensors.
    Unsupported,
}

pub trait SensorSource {
    /// Ask for sensor access. Platforms without a prompt answer immediately.
    fn request_permission(&mut self) -> Permission;

    /// Attach orientation and motion listeners.
    fn subscribe(&mut self);

    /// Detach listeners. Safe to call when not subscribed.
    fn unsubscribe(&mut self);
}

/// Sensor source whose permission answer is decided by the host page (or the
/// offline renderer) before tracking starts.
#[derive(Debug, Clone)]
pub struct HostSensors {
    permission: Permission,
    subscribed: bool,
}

impl HostSensors {
    pub fn new(permission: Permission) -> Self {
        Self {
            permission,
            subscribed: false,
        }
    }

    pub fn granted() -> Self {
        Self::new(Permission::Granted)
    }

    pub fn set_permission(&mut self, permission: Permission) {
        self.permission = permission;
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }
}

impl SensorSource for HostSensors {
    fn request_permission(&mut self) -> Permission {
        self.permission
    }

    fn subscribe(&mut self) {
        self.subscribed = true;
    }

    fn unsubscribe(&mut self) {
        self.subscribed = false;
    }
}
