//! Viewer frame loop, controls, AR and teardown against a recording driver.
//!
//! Run with: cargo test --test viewer_lifecycle

mod common;

use std::cell::Cell;
use std::rc::Rc;

use ar_viewer::error::{LifecycleError, RegistryError, ViewerError};
use ar_viewer::gpu::driver::DrawStyle;
use ar_viewer::lifecycle::TeardownStep;
use ar_viewer::media::{VideoDims, VideoSource};
use ar_viewer::orientation::{OrientationSample, TrackerState};
use ar_viewer::sensors::{HostSensors, Permission};
use ar_viewer::sync::{ControlValue, SyncEffect};
use ar_viewer::viewer::{FrameOutcome, Viewer};
use common::{cloud, cube, test_config, viewer, FailAt, RecordingDriver};

#[test]
fn test_frames_wait_for_initialization() {
    let mut viewer = Viewer::new(test_config(), RecordingDriver::new(), HostSensors::granted());
    assert_eq!(viewer.step(0.0), FrameOutcome::Skipped);
    assert!(viewer.driver().frames.is_empty());

    viewer.initialize(320, 240).unwrap();
    assert_eq!(viewer.step(0.0), FrameOutcome::Rendered);
    assert!(matches!(
        viewer.initialize(320, 240),
        Err(ViewerError::Lifecycle(LifecycleError::AlreadyInitialized))
    ));
}

#[test]
fn test_position_converges_within_51_frames() {
    let mut viewer = viewer();
    viewer.add_object(cloud("rock.ply")).unwrap();
    viewer
        .apply_control_str("object:rock.ply.position.x", ControlValue::Number(1.0))
        .unwrap();

    for i in 0..51 {
        viewer.step(i as f64 / 60.0);
    }
    let x = viewer.registry().get("rock.ply").unwrap().transform.position.x;
    assert!((x - 1.0).abs() < 0.01, "x = {}", x);
}

#[test]
fn test_opacity_is_clamped() {
    let mut viewer = viewer();
    viewer.add_object(cloud("rock.ply")).unwrap();

    viewer
        .apply_control_str("object:rock.ply.opacity", ControlValue::Number(1.7))
        .unwrap();
    assert_eq!(viewer.registry().get("rock.ply").unwrap().opacity(), 1.0);

    viewer
        .apply_control_str("object:rock.ply.opacity", ControlValue::Number(-0.2))
        .unwrap();
    viewer.step(0.0);
    match viewer.driver().last_frame().unwrap().objects[0].style {
        DrawStyle::Points { opacity, .. } => assert_eq!(opacity, 0.0),
        other => panic!("unexpected style {:?}", other),
    }
}

#[test]
fn test_repeated_control_is_unchanged() {
    let mut viewer = viewer();
    viewer.add_object(cloud("rock.ply")).unwrap();

    let first = viewer
        .apply_control_str("object:rock.ply.brightness", ControlValue::Number(1.5))
        .unwrap();
    let second = viewer
        .apply_control_str("object:rock.ply.brightness", ControlValue::Number(1.5))
        .unwrap();
    assert_eq!(first, SyncEffect::None);
    assert_eq!(second, SyncEffect::Unchanged);

    assert!(matches!(
        viewer.apply_control_str("object:ghost.ply.brightness", ControlValue::Number(1.0)),
        Err(ViewerError::Sync(_))
    ));
    assert!(viewer
        .apply_control_str("object:rock.ply.visible", ControlValue::Number(1.0))
        .is_err());
}

#[test]
fn test_duplicate_object_is_rejected_without_upload() {
    let mut viewer = viewer();
    viewer.add_object(cloud("rock.ply")).unwrap();
    let created = viewer.driver().created;

    let err = viewer.add_object(cloud("rock.ply")).unwrap_err();
    assert!(matches!(err, ViewerError::Registry(RegistryError::Duplicate(_))));
    assert_eq!(viewer.driver().created, created);
    assert_eq!(viewer.registry().len(), 1);
}

#[test]
fn test_failed_upload_registers_nothing() {
    let mut viewer = viewer();
    viewer.driver_mut().fail_at = Some(FailAt::Upload);
    assert!(viewer.add_object(cube("statue.glb")).is_err());
    assert!(viewer.registry().is_empty());
    assert_eq!(viewer.driver().live_handles(), 0);
}

#[test]
fn test_frame_errors_are_contained() {
    let mut config = test_config();
    config.frame_failure_threshold = 3;
    let mut viewer = Viewer::new(config, RecordingDriver::new(), HostSensors::granted());
    viewer.initialize(320, 240).unwrap();
    viewer.driver_mut().failing_frames = 3;

    assert_eq!(viewer.step(0.0), FrameOutcome::Failed { consecutive: 1 });
    assert_eq!(viewer.step(0.1), FrameOutcome::Failed { consecutive: 2 });
    assert_eq!(viewer.step(0.2), FrameOutcome::Degraded { consecutive: 3 });

    // The loop keeps going and recovers.
    assert_eq!(viewer.step(0.3), FrameOutcome::Rendered);
    assert_eq!(viewer.consecutive_failures(), 0);
}

#[test]
fn test_ar_mode_uses_transparent_clear() {
    let mut viewer = viewer();
    viewer.add_object(cloud("rock.ply")).unwrap();
    viewer.step(0.0);
    assert_eq!(viewer.driver().last_frame().unwrap().clear_color[3], 1.0);

    assert!(viewer.start_ar());
    assert!(!viewer.background_visible());
    viewer.step(0.1);
    assert_eq!(viewer.driver().last_frame().unwrap().clear_color, [0.0; 4]);

    viewer.stop_ar();
    assert_eq!(viewer.tracker().state(), TrackerState::Idle);
}

#[test]
fn test_ar_without_sensor_permission() {
    let mut viewer = Viewer::new(test_config(), RecordingDriver::new(), HostSensors::new(Permission::Denied));
    viewer.initialize(320, 240).unwrap();
    viewer.add_object(cloud("rock.ply")).unwrap();

    assert!(!viewer.start_ar());
    assert!(viewer.ar().is_active());

    // Samples are ignored; the object keeps its explicit transform.
    viewer.on_orientation(OrientationSample::new(30.0, 90.0, 0.0));
    viewer.on_orientation(OrientationSample::new(60.0, 90.0, 0.0));
    viewer.step(0.0);
    let object = viewer.registry().get("rock.ply").unwrap();
    assert_eq!(object.transform.rotation, glam::Vec3::ZERO);
}

#[test]
fn test_ar_rotates_objects_from_orientation_delta() {
    let mut viewer = viewer();
    viewer.add_object(cloud("rock.ply")).unwrap();
    viewer.start_ar();
    viewer.on_orientation(OrientationSample::new(10.0, 90.0, 0.0));
    viewer.on_orientation(OrientationSample::new(40.0, 90.0, 0.0));
    viewer.step(0.0);

    let rotation = viewer.registry().get("rock.ply").unwrap().transform.rotation;
    assert_ne!(rotation, glam::Vec3::ZERO);
}

#[test]
fn test_teardown_order_and_release() {
    let mut viewer = viewer();
    viewer.add_object(cloud("rock.ply")).unwrap();
    viewer.add_object(cube("statue.glb")).unwrap();
    pollster::block_on(viewer.activate_particles("rock.ply")).unwrap();
    viewer.start_ar();
    viewer.request_frame();

    let steps = viewer.teardown();
    assert_eq!(
        steps,
        vec![
            TeardownStep::CancelFrame,
            TeardownStep::StopAnimation,
            TeardownStep::StopTracking,
            TeardownStep::DeactivateParticles,
            TeardownStep::ReleaseObjects,
            TeardownStep::ResetClock,
        ]
    );
    assert_eq!(viewer.driver().live_handles(), 0);
    assert_eq!(viewer.driver().created, viewer.driver().destroyed);
    assert!(viewer.registry().is_empty());

    // Nothing renders until the viewer is initialized again.
    assert_eq!(viewer.step(1.0), FrameOutcome::Skipped);
    viewer.initialize(320, 240).unwrap();
    assert_eq!(viewer.step(1.1), FrameOutcome::Rendered);
}

#[test]
fn test_camera_pose_round_trip() {
    let mut viewer = viewer();
    let saved = viewer.save_camera_pose().unwrap();

    viewer.camera_mut().position = glam::Vec3::new(9.0, 9.0, 9.0);
    viewer.apply_camera_pose(saved.id).unwrap();
    assert_eq!(viewer.camera().position, saved.position);

    viewer.delete_camera_pose(saved.id).unwrap();
    assert!(matches!(viewer.apply_camera_pose(saved.id), Err(ViewerError::PoseNotFound(_))));
    assert!(matches!(viewer.start_camera_animation(), Err(ViewerError::NotEnoughPoses)));
}

#[test]
fn test_debug_snapshot_serializes() {
    let mut viewer = viewer();
    viewer.add_object(cloud("rock.ply")).unwrap();
    viewer.step(0.0);

    let snapshot = viewer.debug_snapshot();
    assert_eq!(snapshot.objects.len(), 1);
    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["objects"][0]["name"], "rock.ply");
    assert_eq!(json["viewport"]["width"], 640);
}

#[test]
fn test_ar_control_applies_after_direct_stop() {
    let mut viewer = viewer();
    viewer.apply_control_str("ar.enabled", ControlValue::Flag(true)).unwrap();
    assert!(viewer.ar().is_active());

    viewer.stop_ar();
    let effect = viewer.apply_control_str("ar.enabled", ControlValue::Flag(true)).unwrap();
    assert_eq!(effect, SyncEffect::SetArMode(true));
    assert!(viewer.ar().is_active());
}

#[test]
fn test_ar_control_applies_after_direct_start() {
    let mut viewer = viewer();
    viewer.apply_control_str("ar.enabled", ControlValue::Flag(false)).unwrap();

    viewer.start_ar();
    let effect = viewer.apply_control_str("ar.enabled", ControlValue::Flag(false)).unwrap();
    assert_eq!(effect, SyncEffect::SetArMode(false));
    assert!(!viewer.ar().is_active());
    assert_eq!(viewer.tracker().state(), TrackerState::Idle);
}

/// Video whose size the test changes between frames.
#[derive(Clone, Default)]
struct LiveVideo(Rc<Cell<Option<VideoDims>>>);

impl VideoSource for LiveVideo {
    fn dimensions(&self) -> Option<VideoDims> {
        self.0.get()
    }
}

#[test]
fn test_ar_aspect_reads_video_every_frame() {
    let mut viewer = viewer();
    let video = LiveVideo::default();
    viewer.set_video_source(video.clone());
    viewer.start_ar();

    video.0.set(Some(VideoDims::new(1920, 1440)));
    viewer.step(0.0);
    assert!((viewer.ar().camera.aspect - 4.0 / 3.0).abs() < 1e-6);

    // Rotating the phone swaps the stream's dimensions.
    video.0.set(Some(VideoDims::new(1440, 1920)));
    viewer.step(0.1);
    assert!((viewer.ar().camera.aspect - 0.75).abs() < 1e-6);
    assert_eq!(viewer.debug_snapshot().ar.video, Some(VideoDims::new(1440, 1920)));

    viewer.clear_video_source();
    assert_eq!(viewer.video_dims(), None);
}
