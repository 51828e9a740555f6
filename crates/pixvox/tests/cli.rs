use assert_cmd::Command;
use image::{GrayImage, Luma};
use pixvox::RigConfig;
use predicates::prelude::*;
use std::path::Path;

fn write_config(root: &Path) -> std::path::PathBuf {
    let mut config = RigConfig::default();
    config.data_dir = root.join("data");
    config.session.images_dir = root.join("images");
    config.session.max_probe_index = 4;
    let path = root.join("rig.json");
    config.write_json(&path).unwrap();
    path
}

fn replay_dir(root: &Path, cameras: &[u32]) -> std::path::PathBuf {
    let dir = root.join("replay");
    std::fs::create_dir_all(&dir).unwrap();
    for id in cameras {
        let cam = dir.join(format!("cam-{id}"));
        std::fs::create_dir_all(&cam).unwrap();
        GrayImage::from_pixel(32, 24, Luma([100]))
            .save(cam.join("frame-000.png"))
            .unwrap();
    }
    dir
}

fn pixvox() -> Command {
    Command::cargo_bin("pixvox").unwrap()
}

#[test]
fn probe_lists_replayed_cameras() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path());
    let replay = replay_dir(tmp.path(), &[0, 2]);

    pixvox()
        .arg("--config")
        .arg(&config)
        .arg("probe")
        .arg("--replay")
        .arg(&replay)
        .assert()
        .success()
        .stdout(predicate::str::contains("found 2 cameras"))
        .stdout(predicate::str::contains("cam2"));
}

#[test]
fn run_without_enough_cameras_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path());
    let replay = replay_dir(tmp.path(), &[]);

    pixvox()
        .arg("--config")
        .arg(&config)
        .args(["run", "--cycles", "1", "--replay"])
        .arg(&replay)
        .assert()
        .failure()
        .stderr(predicate::str::contains("need at least 2 cameras, found 0"));
}

#[test]
fn calibrate_with_a_single_camera_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path());
    let replay = replay_dir(tmp.path(), &[1]);

    pixvox()
        .arg("--config")
        .arg(&config)
        .args(["calibrate", "--replay"])
        .arg(&replay)
        .assert()
        .failure()
        .stderr(predicate::str::contains("need at least 2 cameras, found 1"));
}

#[test]
fn run_without_calibration_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path());
    let replay = replay_dir(tmp.path(), &[0, 1]);

    pixvox()
        .arg("--config")
        .arg(&config)
        .args(["run", "--cycles", "1", "--replay"])
        .arg(&replay)
        .assert()
        .failure()
        .stderr(predicate::str::contains("calibration"));
}

#[test]
fn clean_on_an_empty_rig_succeeds() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path());

    pixvox()
        .arg("--config")
        .arg(&config)
        .arg("clean")
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 0 calibrations and 0 photos"));
}

#[test]
fn solve_without_photos_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path());

    pixvox()
        .arg("--config")
        .arg(&config)
        .arg("solve")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn missing_config_file_fails() {
    let tmp = tempfile::tempdir().unwrap();
    pixvox()
        .arg("--config")
        .arg(tmp.path().join("nope.json"))
        .arg("clean")
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope.json"));
}
