//! Camera capture for AR mode.
//!
//! Capture is requested with ideal constraints first (rear camera,
//! 1920x1440). Failures are mapped to a [`CaptureError`] category with a
//! user-facing message; only unsatisfiable constraints are retried, once,
//! with relaxed constraints. Nothing here is fatal to the viewer.

use std::future::Future;

use serde::Serialize;

use crate::error::CaptureError;

/// Live video frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoDims {
    pub width: u32,
    pub height: u32,
}

impl VideoDims {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// `width / height`, or `None` until the stream reports a size.
    pub fn aspect(&self) -> Option<f32> {
        (self.width > 0 && self.height > 0).then(|| self.width as f32 / self.height as f32)
    }
}

/// Anything that reports the current video frame size. The viewer asks on
/// every frame.
pub trait VideoSource {
    fn dimensions(&self) -> Option<VideoDims>;
}

impl VideoSource for Option<VideoDims> {
    fn dimensions(&self) -> Option<VideoDims> {
        *self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    Environment,
    User,
}

impl FacingMode {
    /// Constraint value for `getUserMedia`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FacingMode::Environment => "environment",
            FacingMode::User => "user",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConstraints {
    pub facing_mode: Option<FacingMode>,
    pub ideal_width: Option<u32>,
    pub ideal_height: Option<u32>,
}

impl CaptureConstraints {
    /// Rear camera at 1920x1440.
    pub fn ideal() -> Self {
        Self {
            facing_mode: Some(FacingMode::Environment),
            ideal_width: Some(1920),
            ideal_height: Some(1440),
        }
    }

    /// Any camera, any size.
    pub fn relaxed() -> Self {
        Self {
            facing_mode: None,
            ideal_width: None,
            ideal_height: None,
        }
    }
}

/// What the host knows about its capture environment before asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEnvironment {
    pub protocol: String,
    pub hostname: String,
    pub has_media_devices: bool,
    pub has_get_user_media: bool,
    /// Only prefixed or legacy `getUserMedia` variants exist.
    pub legacy_api_only: bool,
}

impl CaptureEnvironment {
    pub fn is_secure(&self) -> bool {
        self.protocol == "https:" || self.hostname == "localhost" || self.hostname == "127.0.0.1"
    }

    /// Checks that can fail before any device is touched.
    pub fn preflight(&self) -> Result<(), CaptureError> {
        if !self.is_secure() {
            return Err(CaptureError::InsecureContext);
        }
        if !self.has_media_devices {
            let detail = if self.legacy_api_only {
                "only a legacy getUserMedia API is available"
            } else {
                "mediaDevices is not available"
            };
            return Err(CaptureError::Unsupported(detail.to_string()));
        }
        if !self.has_get_user_media {
            return Err(CaptureError::Unsupported("getUserMedia is not available".to_string()));
        }
        Ok(())
    }
}

impl CaptureError {
    /// Map a DOM exception name to a category.
    pub fn from_dom_name(name: &str, message: &str) -> Self {
        match name {
            "NotAllowedError" | "PermissionDeniedError" => CaptureError::PermissionDenied,
            "NotFoundError" | "DevicesNotFoundError" => CaptureError::NotFound,
            "NotReadableError" | "TrackStartError" | "AbortError" => CaptureError::DeviceBusy,
            "OverconstrainedError" | "ConstraintNotSatisfiedError" => CaptureError::Overconstrained,
            "SecurityError" => CaptureError::InsecureContext,
            "NotSupportedError" | "TypeError" => CaptureError::Unsupported(message.to_string()),
            _ => CaptureError::Other(format!("{}: {}", name, message)),
        }
    }

    /// Message shown to the user for this category.
    pub fn user_message(&self) -> String {
        match self {
            CaptureError::PermissionDenied => {
                "Camera permission was denied. Allow camera access in the browser settings and try again.".to_string()
            }
            CaptureError::NotFound => "No camera was found on this device.".to_string(),
            CaptureError::DeviceBusy => "The camera is in use by another application. Close it and try again.".to_string(),
            CaptureError::InsecureContext => "Camera access requires HTTPS. Open the viewer over https:// or on localhost.".to_string(),
            CaptureError::Unsupported(detail) => format!("This browser does not support camera capture ({}).", detail),
            CaptureError::Overconstrained => "The camera does not support the requested settings.".to_string(),
            CaptureError::Other(detail) => format!("Could not access the camera: {}", detail),
        }
    }
}

/// A camera that can be opened with constraints.
pub trait CaptureDevice {
    fn open(&mut self, constraints: &CaptureConstraints) -> impl Future<Output = Result<VideoDims, CaptureError>>;
    fn close(&mut self);
}

/// Open `device` with ideal constraints, retrying once with relaxed
/// constraints when the ideal ones cannot be satisfied.
pub async fn start_capture<C: CaptureDevice>(device: &mut C, environment: &CaptureEnvironment) -> Result<VideoDims, CaptureError> {
    if let Err(e) = environment.preflight() {
        log::error!("Camera capture unavailable: {}", e);
        return Err(e);
    }

    log::info!("Requesting camera with {:?}", CaptureConstraints::ideal());
    match device.open(&CaptureConstraints::ideal()).await {
        Ok(dims) => {
            log::info!("Camera started at {}x{}", dims.width, dims.height);
            Ok(dims)
        }
        Err(CaptureError::Overconstrained) => {
            log::warn!("Ideal camera constraints unsatisfiable, retrying relaxed");
            let result = device.open(&CaptureConstraints::relaxed()).await;
            match &result {
                Ok(dims) => log::info!("Camera started (relaxed) at {}x{}", dims.width, dims.height),
                Err(e) => log::error!("Camera capture failed: {}", e),
            }
            result
        }
        Err(e) => {
            log::error!("Camera capture failed: {}", e);
            Err(e)
        }
    }
}
