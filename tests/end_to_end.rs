use std::collections::HashMap;
use std::path::{Path, PathBuf};

use approx::assert_relative_eq;
use nalgebra::{Matrix3, Rotation3, Vector3};

use rust_artrack::TrackingError;
use rust_artrack::backend::native::{FeatureDetection, NativePose};
use rust_artrack::backend::{AlvarBackend, BackendState, FeatureBackend, MarkerSpec, TrackerBackend};
use rust_artrack::config::{
    AlvarConfig, BackendConfig, CalibrationSource, CameraConfig, FeatureConfig, SessionConfig,
};
use rust_artrack::geometry::Pose;
use rust_artrack::io::replay::{Detection, translation_pose};
use rust_artrack::io::{BlankVideo, ReplayLibrary};
use rust_artrack::tracking::frame::{ColorFormat, OwnedFrame};
use rust_artrack::tracking::{FrameProcessingPipeline, PipelineConfig};

fn write_calibration(dir: &Path) -> PathBuf {
    let path = dir.join("camera.yaml");
    std::fs::write(
        &path,
        "width: 640\nheight: 480\nintrinsics: [610.0, 610.0, 320.0, 240.0]\n",
    )
    .unwrap();
    path
}

fn alvar_config(calibration: PathBuf, width: u32, height: u32) -> BackendConfig {
    BackendConfig::Alvar(AlvarConfig {
        camera: CameraConfig::new(width, height, CalibrationSource::File(calibration)),
        ..AlvarConfig::default()
    })
}

/// A rotation as a native library reports it after float drift: slightly
/// scaled and sheared.
fn drifted_pose() -> NativePose {
    let rotation = Rotation3::from_euler_angles(0.3, -0.2, 0.5);
    let mut basis: Matrix3<f64> = rotation.matrix() * 1.03;
    basis[(1, 0)] += 0.02;
    basis[(2, 1)] -= 0.015;
    Pose::from_parts(&basis, &Vector3::new(12.0, -4.0, -250.0)).to_floats()
}

fn frame(width: u32, height: u32) -> OwnedFrame {
    OwnedFrame::blank(width, height, ColorFormat::Bgr24)
}

#[test]
fn test_ground_marker_pose_is_rigid() {
    let dir = tempfile::tempdir().unwrap();
    let calibration = write_calibration(dir.path());

    let library = ReplayLibrary::new().with_frame(vec![Detection::Marker {
        id: 7,
        pose: drifted_pose(),
    }]);
    let mut pipeline =
        FrameProcessingPipeline::new(AlvarBackend::new(library), PipelineConfig::default()).unwrap();
    pipeline.configure(alvar_config(calibration, 640, 480)).unwrap();
    pipeline.register("ground", MarkerSpec::Id(7), false).unwrap();

    let camera = pipeline.backend().camera().copied().unwrap();
    assert_eq!(camera.fx, 610.0);

    let frame = frame(640, 480);
    let poses = pipeline.tick(&frame.as_frame().unwrap()).unwrap();
    let ground = poses.get("ground").expect("ground should be found");

    let basis = ground.rotation_block();
    assert_relative_eq!(basis.determinant(), 1.0, epsilon = 1e-9);
    for column in basis.column_iter() {
        assert_relative_eq!(column.norm(), 1.0, epsilon = 1e-9);
    }
    assert!(ground.is_orthonormal(1e-9));
    // Left-handed output flips z.
    assert_relative_eq!(ground.translation().z, 250.0);
}

#[test]
fn test_reconfigure_requires_reassociation() {
    let dir = tempfile::tempdir().unwrap();
    let calibration = write_calibration(dir.path());
    let seen = Detection::Marker {
        id: 7,
        pose: translation_pose(0.0, 0.0, -100.0),
    };
    let library = ReplayLibrary::new()
        .with_frame(vec![seen.clone()])
        .with_frame(vec![seen]);

    let mut backend = AlvarBackend::new(library);
    backend
        .configure(alvar_config(calibration.clone(), 640, 480))
        .unwrap();
    let old = backend.associate_marker(&MarkerSpec::Id(7)).unwrap();
    backend.process_frame(&frame(640, 480).as_frame().unwrap()).unwrap();
    assert!(backend.query(&old).unwrap().is_found());

    backend.configure(alvar_config(calibration, 320, 240)).unwrap();
    assert_eq!(backend.state(), BackendState::Configured);
    assert_eq!(backend.native().release_count(), 1);
    assert_eq!(backend.camera().unwrap().width, 320);
    assert_relative_eq!(backend.camera().unwrap().fx, 305.0);
    assert!(matches!(backend.query(&old), Err(TrackingError::NotInitialized(_))));

    let new = backend.associate_marker(&MarkerSpec::Id(7)).unwrap();
    assert!(matches!(backend.query(&old), Err(TrackingError::NotInitialized(_))));
    backend.process_frame(&frame(320, 240).as_frame().unwrap()).unwrap();
    assert!(backend.query(&new).unwrap().is_found());
}

#[test]
fn test_pipeline_reassociates_on_reconfigure() {
    let dir = tempfile::tempdir().unwrap();
    let calibration = write_calibration(dir.path());
    let library = ReplayLibrary::new().with_frame(vec![Detection::Marker {
        id: 7,
        pose: translation_pose(1.0, 2.0, -3.0),
    }]);
    let mut pipeline =
        FrameProcessingPipeline::new(AlvarBackend::new(library), PipelineConfig::default()).unwrap();
    pipeline
        .configure(alvar_config(calibration.clone(), 640, 480))
        .unwrap();
    let old = pipeline.register("ground", MarkerSpec::Id(7), false).unwrap();

    pipeline.configure(alvar_config(calibration, 320, 240)).unwrap();
    let new = pipeline.registry().resolve("ground").unwrap().clone();
    assert!(new.generation > old.generation);

    let poses = pipeline.tick(&frame(320, 240).as_frame().unwrap()).unwrap();
    assert!(poses.contains_key("ground"));
}

#[test]
fn test_feature_detection_below_inlier_ratio_is_dropped() {
    let detection = |inlier_ratio| {
        Detection::Feature(FeatureDetection {
            target: "poster".into(),
            pose: translation_pose(0.0, 0.0, -60.0),
            inlier_ratio,
            mapped_points: 80,
        })
    };
    let library = ReplayLibrary::new()
        .with_frame(vec![detection(0.05)])
        .with_frame(vec![detection(0.6)]);
    let mut pipeline =
        FrameProcessingPipeline::new(FeatureBackend::new(library), PipelineConfig::default()).unwrap();
    pipeline
        .configure(BackendConfig::AlvarFeature(FeatureConfig::default()))
        .unwrap();
    pipeline
        .register("poster", MarkerSpec::Feature("poster".into()), false)
        .unwrap();

    let frame = frame(640, 480);
    assert!(pipeline.tick(&frame.as_frame().unwrap()).unwrap().is_empty());
    assert!(pipeline.tick(&frame.as_frame().unwrap()).unwrap().contains_key("poster"));
}

#[test]
fn test_constant_pose_smooths_to_itself() {
    let pose = drifted_pose();
    let mut library = ReplayLibrary::new();
    for _ in 0..40 {
        library = library.with_frame(vec![Detection::Marker { id: 3, pose }]);
    }
    let mut pipeline =
        FrameProcessingPipeline::new(AlvarBackend::new(library), PipelineConfig::default()).unwrap();
    pipeline
        .configure(BackendConfig::Alvar(AlvarConfig::default()))
        .unwrap();
    pipeline.register("toolbar", MarkerSpec::Id(3), true).unwrap();

    let frame = frame(640, 480);
    let last: HashMap<String, Pose> = (0..40)
        .map(|_| pipeline.tick(&frame.as_frame().unwrap()).unwrap())
        .last()
        .unwrap();

    let expected = Pose::from_array(&pose);
    let smoothed = last["toolbar"];
    let converted = rust_artrack::geometry::CoordinateConverter::new(
        rust_artrack::geometry::Handedness::RightHanded,
        rust_artrack::geometry::Handedness::LeftHanded,
    )
    .convert(&expected);
    assert_relative_eq!(smoothed.matrix, converted.matrix, epsilon = 1e-9);
}

#[test]
fn test_session_files_drive_a_replay() {
    let dir = tempfile::tempdir().unwrap();
    let calibration = write_calibration(dir.path());
    let session_path = dir.path().join("session.yaml");
    std::fs::write(
        &session_path,
        format!(
            r#"
backend:
  backend: alvar
  camera:
    width: 640
    height: 480
    calibration:
      file: {}
pipeline:
  handedness: right_handed
markers:
  - name: ground
    spec:
      id: 7
"#,
            calibration.display()
        ),
    )
    .unwrap();
    let recording = dir.path().join("recorded.csv");
    std::fs::write(
        &recording,
        "0, marker, 7, 1,0,0,0, 0,1,0,0, 0,0,1,0, 5,6,-70,1\n\
         2, marker, 7, 1,0,0,0, 0,1,0,0, 0,0,1,0, 8,6,-70,1\n",
    )
    .unwrap();

    let session = SessionConfig::load(&session_path).unwrap();
    let library = ReplayLibrary::from_csv(&recording).unwrap();
    let mut video = BlankVideo::new(640, 480, ColorFormat::Bgr24, library.frame_count());

    let mut pipeline =
        FrameProcessingPipeline::new(AlvarBackend::new(library), session.pipeline.clone()).unwrap();
    pipeline.configure(session.backend.clone()).unwrap();
    for marker in &session.markers {
        pipeline
            .register(marker.name.clone(), marker.spec.clone(), marker.smooth)
            .unwrap();
    }

    let mut published: Vec<(String, Pose)> = Vec::new();
    let stats = pipeline.run(&mut video, &mut published).unwrap();

    assert_eq!(stats.ticks, 3);
    assert_eq!(published.len(), 2);
    // Right-handed output keeps the native z.
    assert_relative_eq!(published[1].1.translation().x, 8.0);
    assert_relative_eq!(published[1].1.translation().z, -70.0);
}
