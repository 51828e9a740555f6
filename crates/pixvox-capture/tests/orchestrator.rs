use image::{DynamicImage, GrayImage, Luma};
use pixvox_capture::{
    CameraProvider, CaptureError, CaptureOrchestrator, FrameError, FrameSource,
    OrchestratorOptions, ReplayProvider, SourceOptions, SyntheticProvider,
};
use pixvox_core::CameraId;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn gray(value: u8) -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 6, Luma([value])))
}

fn provider(ids: &[u32]) -> SyntheticProvider {
    ids.iter().fold(
        SyntheticProvider::new(Duration::from_millis(2)),
        |p, &id| p.with_camera(CameraId(id), move |n| gray((n as u8).wrapping_add(id as u8))),
    )
}

fn wait_for_frames(orchestrator: &mut CaptureOrchestrator, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if orchestrator.poll().frames.len() == count {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("cameras never delivered frames");
}

#[test]
fn read_before_first_frame_is_not_yet_available() {
    let provider = SyntheticProvider::new(Duration::from_millis(200))
        .with_static_camera(CameraId(0), gray(1));
    let source = FrameSource::start(CameraId(0), Arc::new(provider), SourceOptions::default())
        .unwrap();
    assert_eq!(
        source.read().unwrap_err(),
        FrameError::NotYetAvailable(CameraId(0))
    );
}

#[test]
fn start_reports_unopenable_device() {
    let provider = Arc::new(provider(&[0]));
    let err = FrameSource::start(CameraId(4), provider, SourceOptions::default())
        .err()
        .unwrap();
    assert!(matches!(err, CaptureError::DeviceUnavailable { camera, .. } if camera == CameraId(4)));
}

#[test]
fn stop_releases_the_device_before_returning() {
    let provider = provider(&[2]);
    let shared: Arc<dyn CameraProvider> = Arc::new(provider.clone());
    let mut source = FrameSource::start(CameraId(2), shared, SourceOptions::default()).unwrap();
    assert!(provider.is_open(CameraId(2)));

    let deadline = Instant::now() + Duration::from_secs(5);
    while source.read().is_err() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
    let frame = source.read().unwrap();
    assert_eq!(frame.camera, CameraId(2));

    source.stop();
    assert!(!provider.is_open(CameraId(2)));
    assert!(!source.is_running());
    // Frames already handed out stay valid.
    assert_eq!(frame.image.width(), 8);
}

#[test]
fn stalled_camera_is_stale_and_the_others_complete() {
    let synthetic = provider(&[0, 1, 2]);
    let options = OrchestratorOptions {
        stale_after_ms: 0,
        ..OrchestratorOptions::default()
    };
    let mut orchestrator = CaptureOrchestrator::start(
        [CameraId(0), CameraId(1), CameraId(2)],
        Arc::new(synthetic.clone()),
        options,
    );
    assert!(orchestrator.unavailable().is_empty());
    wait_for_frames(&mut orchestrator, 3);

    synthetic.set_stalled(CameraId(1), true);
    // Let an in-flight read of the stalled camera finish.
    std::thread::sleep(Duration::from_millis(30));
    orchestrator.poll();
    std::thread::sleep(Duration::from_millis(30));
    let cycle = orchestrator.poll();

    assert_eq!(
        cycle.frames.keys().copied().collect::<Vec<_>>(),
        vec![CameraId(0), CameraId(2)]
    );
    assert!(cycle.stale.contains(&CameraId(1)));
    assert!(cycle.pending.is_empty());
    assert!(!cycle.is_complete());
    assert!(matches!(
        cycle.frame(CameraId(1)),
        Err(FrameError::Stale { camera, .. }) if camera == CameraId(1)
    ));
    for (id, frame) in &cycle.frames {
        assert_eq!(frame.camera, *id);
    }

    synthetic.set_stalled(CameraId(1), false);
    wait_for_frames(&mut orchestrator, 3);

    orchestrator.stop();
    for id in 0..3 {
        assert!(!synthetic.is_open(CameraId(id)));
    }
}

#[test]
fn frame_is_handed_out_once_under_default_options() {
    let synthetic = SyntheticProvider::new(Duration::from_millis(150))
        .with_camera(CameraId(0), |n| gray(n as u8));
    let mut orchestrator = CaptureOrchestrator::start(
        [CameraId(0)],
        Arc::new(synthetic),
        OrchestratorOptions::default(),
    );
    wait_for_frames(&mut orchestrator, 1);

    let again = orchestrator.poll();
    assert!(again.frames.is_empty());
    assert!(again.unchanged.contains(&CameraId(0)));
    assert!(again.stale.is_empty());
    assert!(!again.is_complete());
    assert_eq!(
        again.frame(CameraId(0)).unwrap_err(),
        FrameError::Unchanged(CameraId(0))
    );
}

#[test]
fn stalled_camera_leaves_the_cycle_before_it_turns_stale() {
    let synthetic = provider(&[0, 1, 2]);
    let mut orchestrator = CaptureOrchestrator::start(
        [CameraId(0), CameraId(1), CameraId(2)],
        Arc::new(synthetic.clone()),
        OrchestratorOptions::default(),
    );
    wait_for_frames(&mut orchestrator, 3);

    synthetic.set_stalled(CameraId(1), true);
    std::thread::sleep(Duration::from_millis(30));
    orchestrator.poll();
    std::thread::sleep(Duration::from_millis(30));
    let early = orchestrator.poll();
    assert_eq!(
        early.frames.keys().copied().collect::<Vec<_>>(),
        vec![CameraId(0), CameraId(2)]
    );
    assert!(early.unchanged.contains(&CameraId(1)));
    assert!(early.stale.is_empty());

    std::thread::sleep(OrchestratorOptions::default().stale_after() + Duration::from_millis(50));
    let late = orchestrator.poll();
    assert!(!late.frames.contains_key(&CameraId(1)));
    assert!(late.stale.contains(&CameraId(1)));
    assert!(!late.unchanged.contains(&CameraId(1)));
}

#[test]
fn exhausted_replay_does_not_spin() {
    let dir = tempfile::tempdir().unwrap();
    let cam_dir = dir.path().join("cam-0");
    std::fs::create_dir_all(&cam_dir).unwrap();
    GrayImage::from_pixel(4, 4, Luma([7]))
        .save(cam_dir.join("frame_000.png"))
        .unwrap();
    let replay = ReplayProvider::new(dir.path())
        .with_frame_interval(Duration::ZERO)
        .with_looping(false);

    let mut source =
        FrameSource::start(CameraId(0), Arc::new(replay), SourceOptions::default()).unwrap();
    std::thread::sleep(Duration::from_millis(200));
    let timeouts = source.timeout_count();
    source.stop();

    assert_eq!(source.read().unwrap().sequence, 0);
    assert!(timeouts > 0 && timeouts < 100, "{timeouts} timeouts in 200ms");
}

#[test]
fn orchestrator_records_unavailable_cameras() {
    let mut orchestrator = CaptureOrchestrator::start(
        [CameraId(0), CameraId(5)],
        Arc::new(provider(&[0])),
        OrchestratorOptions::default(),
    );
    assert_eq!(orchestrator.cameras().len(), 1);
    assert!(orchestrator.unavailable().contains_key(&CameraId(5)));
    wait_for_frames(&mut orchestrator, 1);
}

#[test]
fn replay_provider_reads_camera_directories() {
    let dir = tempfile::tempdir().unwrap();
    let cam_dir = dir.path().join("cam-3");
    std::fs::create_dir_all(&cam_dir).unwrap();
    for (i, v) in [10u8, 20, 30].iter().enumerate() {
        GrayImage::from_pixel(4, 4, Luma([*v]))
            .save(cam_dir.join(format!("frame_{i:03}.png")))
            .unwrap();
    }

    let replay = ReplayProvider::new(dir.path()).with_frame_interval(Duration::ZERO);
    assert!(replay.probe(CameraId(3)));
    assert!(!replay.probe(CameraId(0)));

    let mut cam = replay.open(CameraId(3)).unwrap();
    let values: Vec<u8> = (0..4)
        .map(|_| cam.read_frame().unwrap().to_luma8().get_pixel(0, 0)[0])
        .collect();
    assert_eq!(values, vec![10, 20, 30, 10]);
}
