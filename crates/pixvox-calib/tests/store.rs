use pixvox_calib::{CalibrationStore, StoreError};
use pixvox_core::{CameraCalibration, CameraId, ImageSize};
use std::collections::BTreeSet;

fn calibration(camera: CameraId) -> CameraCalibration {
    CameraCalibration {
        camera,
        camera_matrix: [
            [812.345_678_901_234_5, 0.0, 319.876_543_21],
            [0.0, 811.000_000_000_1, 240.123_456_789],
            [0.0, 0.0, 1.0],
        ],
        distortion: vec![-0.123_456_789_012_345_6, 0.0456, 1e-17, -3.3e-5, 0.0],
        rotation_vectors: vec![[0.1, -0.2, 0.3], [std::f64::consts::PI / 7.0, 0.0, -1e-9]],
        translation_vectors: vec![[-45.0, -35.5, 350.25], [1.0 / 3.0, 2.0 / 3.0, 400.0]],
        view_sequences: vec![0, 3],
        image_size: ImageSize::new(640, 480),
        rms_reprojection_error: 0.271_828_182_845_904_5,
    }
}

#[test]
fn save_then_load_is_bit_exact() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::new(dir.path());
    let calib = calibration(CameraId(4));

    store.save(CameraId(4), &calib).unwrap();
    assert!(store.path_for(CameraId(4)).ends_with("calibration_cam-4.json"));

    let loaded = store.load(CameraId(4)).unwrap().expect("stored");
    assert_eq!(loaded, calib);
    for (a, b) in loaded.distortion.iter().zip(&calib.distortion) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

#[test]
fn save_replaces_previous_calibration() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::new(dir.path());
    let mut calib = calibration(CameraId(1));
    store.save(CameraId(1), &calib).unwrap();
    calib.rms_reprojection_error = 0.5;
    store.save(CameraId(1), &calib).unwrap();
    assert_eq!(store.load(CameraId(1)).unwrap().unwrap().rms_reprojection_error, 0.5);

    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 1);
}

#[test]
fn save_rejects_calibration_of_another_camera() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::new(dir.path());
    let err = store.save(CameraId(2), &calibration(CameraId(3))).unwrap_err();
    assert!(matches!(
        err,
        StoreError::CameraMismatch {
            expected: CameraId(2),
            found: CameraId(3)
        }
    ));
    assert!(!store.contains(CameraId(2)));
}

#[test]
fn load_all_reports_found_missing_and_failed() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::new(dir.path());
    store.save(CameraId(0), &calibration(CameraId(0))).unwrap();
    store.save(CameraId(2), &calibration(CameraId(2))).unwrap();
    std::fs::write(store.path_for(CameraId(3)), b"{ not json").unwrap();

    let all = store.load_all([CameraId(0), CameraId(1), CameraId(2), CameraId(3)]);
    assert_eq!(
        all.found.keys().copied().collect::<Vec<_>>(),
        vec![CameraId(0), CameraId(2)]
    );
    assert_eq!(all.missing, BTreeSet::from([CameraId(1)]));
    assert!(matches!(all.failed.get(&CameraId(3)), Some(StoreError::Json { .. })));
}

#[test]
fn inconsistent_artifact_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::new(dir.path());
    let mut calib = calibration(CameraId(5));
    calib.view_sequences.pop();
    std::fs::write(
        store.path_for(CameraId(5)),
        serde_json::to_vec(&calib).unwrap(),
    )
    .unwrap();
    assert!(matches!(
        store.load(CameraId(5)),
        Err(StoreError::Format { .. })
    ));
}

#[test]
fn list_and_clear_only_touch_calibration_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::new(dir.path());
    for id in [1, 7] {
        store.save(CameraId(id), &calibration(CameraId(id))).unwrap();
    }
    std::fs::write(dir.path().join("notes.json"), b"{}").unwrap();

    assert_eq!(store.list().unwrap(), BTreeSet::from([CameraId(1), CameraId(7)]));
    assert_eq!(store.clear().unwrap(), 2);
    assert!(store.list().unwrap().is_empty());
    assert!(dir.path().join("notes.json").exists());
}
