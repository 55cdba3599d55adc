use std::cell::RefCell;
use std::rc::Rc;

use glam::Vec3;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{HtmlCanvasElement, HtmlVideoElement};

use crate::assets::{self, AssetList};
use crate::config::ViewerConfig;
use crate::error::CaptureError;
use crate::gpu::mesh::Vertex;
use crate::gpu::renderer::GpuRenderer;
use crate::material::MaterialInstance;
use crate::media::{self, CaptureConstraints, CaptureDevice, CaptureEnvironment, VideoDims, VideoSource};
use crate::orientation::{MotionSample, OrientationSample};
use crate::registry::{MeshNode, SubMesh};
use crate::sensors::{HostSensors, Permission};
use crate::sync::ControlValue;
use crate::viewer::{FrameOutcome, Viewer};

#[wasm_bindgen]
pub struct WasmViewer {
    inner: Rc<RefCell<ViewerContext>>,
}

struct ViewerContext {
    viewer: Viewer<GpuRenderer, HostSensors>,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    camera: Option<WebCamera>,
    capture_error: Option<String>,
}

/// Video element playing the camera stream. Its size is read on every call.
struct ElementVideo(HtmlVideoElement);

impl VideoSource for ElementVideo {
    fn dimensions(&self) -> Option<VideoDims> {
        let dims = VideoDims::new(self.0.video_width(), self.0.video_height());
        dims.aspect().map(|_| dims)
    }
}

/// `getUserMedia` into a video element.
struct WebCamera {
    video: HtmlVideoElement,
    stream: Option<web_sys::MediaStream>,
}

impl WebCamera {
    fn new(video: HtmlVideoElement) -> Self {
        Self { video, stream: None }
    }
}

fn js_name(value: &JsValue, key: &str) -> Option<String> {
    js_sys::Reflect::get(value, &JsValue::from_str(key)).ok()?.as_string()
}

fn js_has(value: &JsValue, key: &str) -> bool {
    js_sys::Reflect::has(value, &JsValue::from_str(key)).unwrap_or(false)
}

fn capture_failure(e: JsValue) -> CaptureError {
    let name = js_name(&e, "name").unwrap_or_default();
    let message = js_name(&e, "message").unwrap_or_default();
    CaptureError::from_dom_name(&name, &message)
}

fn media_constraints(c: &CaptureConstraints) -> web_sys::MediaStreamConstraints {
    let video = web_sys::MediaTrackConstraints::new();
    if let Some(facing) = c.facing_mode {
        video.set_facing_mode(&JsValue::from_str(facing.as_str()));
    }
    if let Some(width) = c.ideal_width {
        let range = web_sys::ConstrainLongRange::new();
        range.set_ideal(width as i32);
        video.set_width(&range.into());
    }
    if let Some(height) = c.ideal_height {
        let range = web_sys::ConstrainLongRange::new();
        range.set_ideal(height as i32);
        video.set_height(&range.into());
    }
    let constraints = web_sys::MediaStreamConstraints::new();
    constraints.set_video(&video.into());
    constraints.set_audio(&JsValue::FALSE);
    constraints
}

impl CaptureDevice for WebCamera {
    async fn open(&mut self, constraints: &CaptureConstraints) -> Result<VideoDims, CaptureError> {
        self.close();
        let devices = web_sys::window()
            .ok_or_else(|| CaptureError::Unsupported("no window".to_string()))?
            .navigator()
            .media_devices()
            .map_err(capture_failure)?;
        let request = devices
            .get_user_media_with_constraints(&media_constraints(constraints))
            .map_err(capture_failure)?;
        let stream: web_sys::MediaStream = JsFuture::from(request)
            .await
            .map_err(capture_failure)?
            .dyn_into()
            .map_err(capture_failure)?;

        self.video.set_muted(true);
        self.video.set_src_object(Some(&stream));
        self.stream = Some(stream);
        let playing = self.video.play().map_err(capture_failure)?;
        JsFuture::from(playing).await.map_err(capture_failure)?;
        Ok(VideoDims::new(self.video.video_width(), self.video.video_height()))
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            for track in stream.get_tracks().iter() {
                if let Ok(track) = track.dyn_into::<web_sys::MediaStreamTrack>() {
                    track.stop();
                }
            }
        }
        self.video.set_src_object(None);
    }
}

/// Capture environment as the page sees it.
fn web_environment() -> CaptureEnvironment {
    let window = web_sys::window();
    let location = window.as_ref().map(|w| w.location());
    let protocol = location.as_ref().and_then(|l| l.protocol().ok()).unwrap_or_default();
    let hostname = location.as_ref().and_then(|l| l.hostname().ok()).unwrap_or_default();
    let navigator: Option<JsValue> = window.as_ref().map(|w| w.navigator().into());

    let media_devices = navigator
        .as_ref()
        .filter(|n| js_has(n, "mediaDevices"))
        .and_then(|n| js_sys::Reflect::get(n, &JsValue::from_str("mediaDevices")).ok())
        .filter(|d| !d.is_undefined() && !d.is_null());
    let legacy_api_only = navigator
        .as_ref()
        .map(|n| ["getUserMedia", "webkitGetUserMedia", "mozGetUserMedia"].iter().any(|k| js_has(n, k)))
        .unwrap_or(false);

    CaptureEnvironment {
        protocol,
        hostname,
        has_media_devices: media_devices.is_some(),
        has_get_user_media: media_devices.as_ref().map(|d| js_has(d, "getUserMedia")).unwrap_or(false),
        legacy_api_only,
    }
}

#[wasm_bindgen]
pub fn init_panic_hook() {
    console_error_panic_hook::set_once();
    let _ = console_log::init_with_level(log::Level::Info);
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T, fallback: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| fallback.to_string())
}

fn vec3s(values: &[f32]) -> impl Iterator<Item = [f32; 3]> + '_ {
    values.chunks_exact(3).map(|c| [c[0], c[1], c[2]])
}

/// Message for a failed `getUserMedia`, from the DOMException name.
#[wasm_bindgen]
pub fn capture_error_message(name: &str, message: &str) -> String {
    CaptureError::from_dom_name(name, message).user_message()
}

/// Check the page before asking for the camera. Returns the user-facing
/// message when capture cannot work, or `undefined`.
#[wasm_bindgen]
pub fn capture_preflight(
    protocol: &str,
    hostname: &str,
    has_media_devices: bool,
    has_get_user_media: bool,
    legacy_api_only: bool,
) -> Option<String> {
    let env = CaptureEnvironment {
        protocol: protocol.to_string(),
        hostname: hostname.to_string(),
        has_media_devices,
        has_get_user_media,
        legacy_api_only,
    };
    env.preflight().err().map(|e| e.user_message())
}

/// Classify a listing of model paths and an optional background texture.
#[wasm_bindgen]
pub fn classify_assets_json(paths_json: &str, texture: Option<String>) -> String {
    let paths: Vec<String> = serde_json::from_str(paths_json).unwrap_or_default();
    to_json(&AssetList::from_paths(&paths, texture.as_deref()), "{}")
}

#[wasm_bindgen]
impl WasmViewer {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<WasmViewer, JsValue> {
        Err(JsValue::from_str("Use create_viewer async constructor"))
    }

    pub fn resize(&self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        let ctx = &mut *inner;

        ctx.config.width = width;
        ctx.config.height = height;
        ctx.surface.configure(ctx.viewer.driver().device(), &ctx.config);
        ctx.viewer.set_viewport(width, height);
    }

    /// Run one frame at `now_ms` (performance.now()). Returns the outcome as
    /// JSON.
    pub fn render(&self, now_ms: f64) -> String {
        let mut inner = self.inner.borrow_mut();
        let ctx = &mut *inner;

        let Some(id) = ctx.viewer.request_frame() else {
            return to_json(&FrameOutcome::Skipped, "null");
        };

        let outcome = match ctx.surface.get_current_texture() {
            Ok(output) => {
                let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
                ctx.viewer
                    .driver_mut()
                    .set_output(view, ctx.config.width, ctx.config.height);
                let outcome = ctx.viewer.frame(id, now_ms / 1000.0);
                ctx.viewer.driver_mut().clear_output();
                output.present();
                outcome
            }
            Err(wgpu::SurfaceError::Lost) => {
                ctx.surface.configure(ctx.viewer.driver().device(), &ctx.config);
                ctx.viewer.frame(id, now_ms / 1000.0)
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                log::error!("Surface out of memory");
                ctx.viewer.frame(id, now_ms / 1000.0)
            }
            Err(e) => {
                log::warn!("Surface error: {:?}", e);
                ctx.viewer.frame(id, now_ms / 1000.0)
            }
        };
        to_json(&outcome, "null")
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    /// Add a parsed point cloud. `positions` and `colors` are packed xyz / rgb.
    pub fn add_point_cloud(&self, name: &str, positions: &[f32], colors: &[f32]) -> Result<(), JsValue> {
        let colors: Vec<[f32; 3]> = vec3s(colors).collect();
        let vertices: Vec<Vertex> = vec3s(positions)
            .enumerate()
            .map(|(i, p)| Vertex::point(p, colors.get(i).copied().unwrap_or([1.0; 3])))
            .collect();
        let object = assets::place_point_cloud(name, vertices);
        self.inner.borrow_mut().viewer.add_object(object).map_err(js_error)
    }

    /// Add a parsed mesh as a single node. Colors default to white.
    pub fn add_mesh(&self, name: &str, positions: &[f32], normals: &[f32], indices: &[u32]) -> Result<(), JsValue> {
        let normals: Vec<[f32; 3]> = vec3s(normals).collect();
        let vertices: Vec<Vertex> = vec3s(positions)
            .enumerate()
            .map(|(i, p)| Vertex::new(p, normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]), [1.0; 3]))
            .collect();
        let root = MeshNode::new(name).with_sub_mesh(SubMesh::new(
            vertices,
            indices.to_vec(),
            MaterialInstance::standard([1.0, 1.0, 1.0, 1.0]),
        ));
        let object = assets::place_mesh(name, root);
        self.inner.borrow_mut().viewer.add_object(object).map_err(js_error)
    }

    pub fn remove_object(&self, name: &str) -> Result<(), JsValue> {
        self.inner.borrow_mut().viewer.remove_object(name).map_err(js_error)
    }

    pub fn object_names_json(&self) -> String {
        to_json(&self.inner.borrow().viewer.registry().names(), "[]")
    }

    // ------------------------------------------------------------------
    // Controls and particles
    // ------------------------------------------------------------------

    /// Apply a control such as `object:rock.ply.opacity` with a JSON value
    /// (`0.5` or `true`). Halo activations it triggers run in the background.
    pub fn apply_control(&self, key: &str, value_json: &str) -> Result<String, JsValue> {
        let value: ControlValue = serde_json::from_str(value_json).map_err(js_error)?;
        let effect = {
            let mut inner = self.inner.borrow_mut();
            inner.viewer.apply_control_str(key, value).map_err(js_error)?
        };
        self.run_pending();
        Ok(format!("{:?}", effect))
    }

    pub fn activate_particles(&self, name: &str) {
        self.inner.borrow_mut().viewer.queue_activation(name);
        self.run_pending();
    }

    pub fn deactivate_particles(&self, name: &str) -> bool {
        self.inner.borrow_mut().viewer.deactivate_particles(name)
    }

    /// Start every queued activation. Each readback resolves in its own task;
    /// the viewer is only borrowed to begin and to finish, never across the
    /// wait.
    fn run_pending(&self) {
        let names = self.inner.borrow_mut().viewer.take_pending();
        for name in names {
            let begun = self.inner.borrow_mut().viewer.begin_activation(&name);
            let pending = match begun {
                Ok(Some(pending)) => pending,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("Skipping halo for '{}': {}", name, e);
                    continue;
                }
            };
            let inner = Rc::clone(&self.inner);
            wasm_bindgen_futures::spawn_local(async move {
                let done = pending.readback().await;
                let result = inner.borrow_mut().viewer.finish_activation(done);
                match result {
                    Ok(outcome) => log::debug!("Halo for '{}': {:?}", name, outcome),
                    Err(e) => log::warn!("Skipping halo for '{}': {}", name, e),
                }
            });
        }
    }

    // ------------------------------------------------------------------
    // AR and sensors
    // ------------------------------------------------------------------

    /// Record the outcome of the page's permission prompt.
    pub fn set_sensor_permission(&self, permission: &str) {
        let permission = match permission {
            "granted" => Permission::Granted,
            "denied" => Permission::Denied,
            _ => Permission::Unsupported,
        };
        self.inner.borrow_mut().viewer.sensors_mut().set_permission(permission);
    }

    /// Returns whether orientation tracking started.
    pub fn start_ar(&self) -> bool {
        self.inner.borrow_mut().viewer.start_ar()
    }

    pub fn stop_ar(&self) {
        self.inner.borrow_mut().viewer.stop_ar();
    }

    /// Open the rear camera into `video` and size the AR camera from it.
    /// Runs in the background; `capture_error` holds the message for the user
    /// if it fails.
    pub fn start_camera(&self, video: HtmlVideoElement) {
        if let Some(mut camera) = self.inner.borrow_mut().camera.take() {
            camera.close();
        }
        let inner = Rc::clone(&self.inner);
        wasm_bindgen_futures::spawn_local(async move {
            let mut camera = WebCamera::new(video.clone());
            let result = media::start_capture(&mut camera, &web_environment()).await;
            let mut ctx = inner.borrow_mut();
            match result {
                Ok(_) => {
                    ctx.viewer.set_video_source(ElementVideo(video));
                    ctx.camera = Some(camera);
                    ctx.capture_error = None;
                }
                Err(e) => {
                    camera.close();
                    ctx.capture_error = Some(e.user_message());
                }
            }
        });
    }

    pub fn stop_camera(&self) {
        let mut inner = self.inner.borrow_mut();
        if let Some(mut camera) = inner.camera.take() {
            camera.close();
        }
        inner.viewer.clear_video_source();
    }

    pub fn capture_error(&self) -> Option<String> {
        self.inner.borrow().capture_error.clone()
    }

    pub fn push_orientation(&self, alpha: f32, beta: f32, gamma: f32) {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            inner.viewer.on_orientation(OrientationSample::new(alpha, beta, gamma));
        }
    }

    pub fn push_motion(&self, x: f32, y: f32, z: f32) {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            inner.viewer.on_motion(MotionSample { x, y, z });
        }
    }

    // ------------------------------------------------------------------
    // Background
    // ------------------------------------------------------------------

    pub fn set_background(&self, path: Option<String>) {
        let background = path.and_then(|p| AssetList::from_paths::<&str>(&[], Some(&p)).background);
        self.inner.borrow_mut().viewer.set_background(background);
    }

    pub fn set_background_enabled(&self, enabled: bool) {
        self.inner.borrow_mut().viewer.set_background_enabled(enabled);
    }

    pub fn background_visible(&self) -> bool {
        self.inner.borrow().viewer.background_visible()
    }

    // ------------------------------------------------------------------
    // Camera poses
    // ------------------------------------------------------------------

    pub fn save_camera_pose(&self) -> Result<String, JsValue> {
        let pose = self.inner.borrow_mut().viewer.save_camera_pose().map_err(js_error)?;
        Ok(to_json(&pose, "null"))
    }

    pub fn apply_camera_pose(&self, id: u64) -> Result<(), JsValue> {
        self.inner.borrow_mut().viewer.apply_camera_pose(id).map_err(js_error)
    }

    pub fn delete_camera_pose(&self, id: u64) -> Result<(), JsValue> {
        self.inner.borrow_mut().viewer.delete_camera_pose(id).map_err(js_error)
    }

    pub fn camera_poses_json(&self) -> String {
        to_json(&self.inner.borrow().viewer.camera_poses(), "[]")
    }

    pub fn start_camera_animation(&self) -> Result<(), JsValue> {
        self.inner.borrow_mut().viewer.start_camera_animation().map_err(js_error)
    }

    pub fn stop_camera_animation(&self) {
        self.inner.borrow_mut().viewer.stop_camera_animation();
    }

    pub fn set_camera_position(&self, x: f32, y: f32, z: f32) {
        self.inner.borrow_mut().viewer.camera_mut().position = Vec3::new(x, y, z);
    }

    // ------------------------------------------------------------------
    // Diagnostics and teardown
    // ------------------------------------------------------------------

    pub fn debug_snapshot_json(&self) -> String {
        to_json(&self.inner.borrow().viewer.debug_snapshot(), "{}")
    }

    /// Release every GPU resource. Returns the steps taken as JSON.
    pub fn teardown(&self) -> String {
        self.stop_camera();
        let steps = self.inner.borrow_mut().viewer.teardown();
        to_json(&steps, "[]")
    }
}

#[wasm_bindgen]
pub async fn create_viewer(canvas: HtmlCanvasElement, config_json: Option<String>) -> Result<WasmViewer, JsValue> {
    init_panic_hook();

    let viewer_config = match config_json {
        Some(json) => ViewerConfig::from_json(&json).map_err(js_error)?,
        None => ViewerConfig::default(),
    };

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        dx12_shader_compiler: Default::default(),
        flags: wgpu::InstanceFlags::default(),
        gles_minor_version: wgpu::Gles3MinorVersion::Automatic,
    });

    let target = wgpu::SurfaceTarget::Canvas(canvas.clone());
    let surface = instance
        .create_surface(target)
        .map_err(|e| JsValue::from_str(&format!("Failed to create surface: {}", e)))?;

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::None,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        })
        .await
        .ok_or_else(|| JsValue::from_str("Failed to find an appropriate adapter"))?;

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_webgl2_defaults(),
                memory_hints: Default::default(),
            },
            None,
        )
        .await
        .map_err(|e| JsValue::from_str(&format!("Failed to create device: {}", e)))?;

    let surface_caps = surface.get_capabilities(&adapter);
    let surface_format = surface_caps
        .formats
        .iter()
        .copied()
        .find(|f: &wgpu::TextureFormat| f.is_srgb())
        .or_else(|| surface_caps.formats.first().copied())
        .ok_or_else(|| JsValue::from_str("Surface reports no formats"))?;
    // The camera feed shows through the cleared background in AR.
    let alpha_mode = surface_caps
        .alpha_modes
        .iter()
        .copied()
        .find(|m| *m == wgpu::CompositeAlphaMode::PreMultiplied)
        .or_else(|| surface_caps.alpha_modes.first().copied())
        .unwrap_or(wgpu::CompositeAlphaMode::Auto);
    let present_mode = surface_caps
        .present_modes
        .first()
        .copied()
        .unwrap_or(wgpu::PresentMode::Fifo);

    let config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format: surface_format,
        width: canvas.width().max(1),
        height: canvas.height().max(1),
        present_mode,
        alpha_mode,
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };
    surface.configure(&device, &config);

    let renderer = GpuRenderer::new(device, queue, config.format);
    let mut viewer = Viewer::new(viewer_config, renderer, HostSensors::new(Permission::Unsupported));
    viewer.initialize(config.width, config.height).map_err(js_error)?;

    Ok(WasmViewer {
        inner: Rc::new(RefCell::new(ViewerContext {
            viewer,
            surface,
            config,
            camera: None,
            capture_error: None,
        })),
    })
}
