use super::*;
use crate::camera::mock::MockBackend;
use crate::error::VisageError;
use std::time::Duration;
use tempfile::TempDir;

fn create_test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.camera.resolution = (320, 240);
    config.camera.fps = 30;
    config.camera.verify_attempts = 2;
    config.camera.verify_delay_ms = 5;
    config.camera.read_timeout_ms = 200;
    config.camera.max_errors = 3;
    config.recovery.backoff_ms = 20;
    config.motion.check_interval = 1;
    config.overlay.font_path = "/nonexistent/font.ttf".to_string();
    config
}

async fn start_with(backend: &MockBackend, config: EngineConfig) -> Engine {
    Engine::builder()
        .config(config)
        .backend(Arc::new(backend.clone()))
        .start()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_frame_available_after_start() {
    let backend = MockBackend::new(320, 240, 128);
    let engine = start_with(&backend, create_test_config()).await;

    let frame = engine.get_frame(false).unwrap();
    assert_eq!(frame.dimensions(), (320, 240));
    assert!(frame.data().iter().all(|&b| b == 128));

    engine.stop().await;
}

#[tokio::test]
async fn test_steady_capture_rate() {
    let backend = MockBackend::new(320, 240, 128);
    let engine = start_with(&backend, create_test_config()).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = engine.get_stats();
    assert!(stats.frames_captured >= 2, "captured {}", stats.frames_captured);
    assert!(stats.running);
    assert!(stats.device_open);
    assert_eq!(stats.state, CaptureState::Running);
    assert_eq!(stats.consecutive_errors, 0);
    assert_eq!(stats.backend.as_deref(), Some("mock"));

    engine.stop().await;
}

#[tokio::test]
async fn test_returned_frames_are_copies() {
    let backend = MockBackend::new(64, 48, 50);
    let mut config = create_test_config();
    config.camera.resolution = (64, 48);
    let engine = start_with(&backend, config).await;

    let mut frame = engine.get_frame(false).unwrap();
    frame.data_mut().fill(0);

    let again = engine.get_frame(false).unwrap();
    assert!(again.data().iter().all(|&b| b == 50));

    engine.stop().await;
}

#[tokio::test]
async fn test_motion_square_is_detected() {
    let backend = MockBackend::new(320, 240, 128);
    let engine = start_with(&backend, create_test_config()).await;
    let mut events = engine.subscribe();

    // Let the background settle on the empty scene
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(!engine.get_motion_state().detected);

    backend.set_square(Some((100, 80, 50)));

    let event = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(event @ EngineEvent::MotionStarted { .. }) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event bus closed: {}", e),
            }
        }
    })
    .await
    .unwrap();
    assert!(matches!(event, EngineEvent::MotionStarted { regions: 1, .. }));

    let state = engine.get_motion_state();
    assert!(state.detected);
    assert_eq!(state.regions.len(), 1);
    assert!((state.regions[0].area - 2500.0).abs() < 250.0);

    engine.stop().await;
}

#[tokio::test]
async fn test_stop_is_prompt_and_clears_frames() {
    let backend = MockBackend::new(320, 240, 128);
    let engine = start_with(&backend, create_test_config()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    engine.stop().await;
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(engine.get_frame(false).is_none());
    assert!(engine.get_frame(true).is_none());
    assert!(!engine.is_running());
    assert_eq!(engine.get_stats().state, CaptureState::Stopped);
    assert_eq!(backend.releases(), backend.opens());

    // Second stop is a no-op
    engine.stop().await;
}

#[tokio::test]
async fn test_no_analysis_runs_after_stop() {
    let backend = MockBackend::new(320, 240, 128);
    let engine = start_with(&backend, create_test_config()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    engine.stop().await;
    let analyses = engine.get_stats().analyses;
    assert!(analyses > 0);
    assert!(!engine.get_motion_state().detected);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.get_stats().analyses, analyses);
}

#[tokio::test]
async fn test_stop_during_slow_read() {
    let backend = MockBackend::new(320, 240, 128);
    let engine = start_with(&backend, create_test_config()).await;
    backend.set_read_delay(Duration::from_secs(5));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    engine.stop().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(engine.get_frame(false).is_none());
}

#[tokio::test]
async fn test_toggles_round_trip() {
    let backend = MockBackend::new(320, 240, 128);
    let engine = start_with(&backend, create_test_config()).await;

    let detection = engine.get_stats().detection_enabled;
    assert_eq!(engine.toggle_motion_detection(), !detection);
    assert_eq!(engine.toggle_motion_detection(), detection);

    let overlay = engine.is_overlay_enabled();
    assert_eq!(engine.toggle_overlay(), !overlay);
    assert_eq!(engine.toggle_overlay(), overlay);
    assert_eq!(engine.get_stats().detection_enabled, detection);

    engine.stop().await;
}

#[tokio::test]
async fn test_motion_tunables() {
    let backend = MockBackend::new(320, 240, 128);
    let engine = start_with(&backend, create_test_config()).await;

    engine.set_motion_sensitivity(0.1).unwrap();
    engine.set_motion_threshold(800.0).unwrap();
    assert!(matches!(
        engine.set_motion_sensitivity(2.0),
        Err(VisageError::Config(_))
    ));
    assert!(engine.set_motion_threshold(f64::NAN).is_err());

    engine.stop().await;
}

#[tokio::test]
async fn test_annotated_frame_is_cached_per_capture() {
    let backend = MockBackend::new(320, 240, 128);
    let mut config = create_test_config();
    config.camera.fps = 1;
    let engine = start_with(&backend, config).await;

    let raw = engine.get_frame(false).unwrap();
    let first = engine.get_frame(true).unwrap();
    let second = engine.get_frame(true).unwrap();

    assert_eq!(first.id, raw.id);
    assert_eq!(first, second);
    assert_ne!(first.data(), raw.data());

    // Overlay off: annotated requests get the raw frame
    engine.toggle_overlay();
    assert_eq!(engine.get_frame(true).unwrap().data(), raw.data());

    engine.stop().await;
}

#[tokio::test]
async fn test_start_fails_without_device() {
    let backend = MockBackend::new(320, 240, 128);
    backend.disconnect();

    let result = Engine::builder()
        .config(create_test_config())
        .backend(Arc::new(backend))
        .start()
        .await;
    assert!(matches!(result, Err(VisageError::Init { .. })));
}

#[tokio::test]
async fn test_start_rejects_invalid_config() {
    let mut config = create_test_config();
    config.camera.fps = 0;

    let result = Engine::builder()
        .config(config)
        .backend(Arc::new(MockBackend::new(320, 240, 128)))
        .start()
        .await;
    assert!(matches!(result, Err(VisageError::Init { .. })));
}

#[tokio::test]
async fn test_start_rejects_unrepresentable_cooldown() {
    for cooldown in [f64::INFINITY, f64::NAN] {
        let mut config = create_test_config();
        config.motion.cooldown_seconds = cooldown;
        let backend = MockBackend::new(320, 240, 128);

        let result = Engine::builder()
            .config(config)
            .backend(Arc::new(backend.clone()))
            .start()
            .await;
        assert!(
            matches!(result, Err(VisageError::Init { .. })),
            "cooldown {} was accepted",
            cooldown
        );
        assert_eq!(backend.opens(), 0);
    }
}

#[tokio::test]
async fn test_reconnect_converges() {
    let backend = MockBackend::new(320, 240, 128);
    let engine = start_with(&backend, create_test_config()).await;
    let mut events = engine.subscribe();

    backend.fail_next_opens(3);
    backend.disconnect();
    tokio::time::timeout(Duration::from_secs(1), async {
        while engine.get_stats().device_open {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    backend.reconnect();

    let recovered = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(EngineEvent::DeviceRecovered { attempts, .. }) = events.recv().await {
                return attempts;
            }
        }
    })
    .await
    .unwrap();
    assert!(recovered >= 1);

    let stats = engine.get_stats();
    assert_eq!(stats.state, CaptureState::Running);
    assert_eq!(stats.consecutive_errors, 0);
    assert_eq!(stats.reconnects, 1);
    assert!(stats.device_open);

    engine.stop().await;
}

#[tokio::test]
async fn test_engine_events_on_stop() {
    let backend = MockBackend::new(320, 240, 128);
    let engine = start_with(&backend, create_test_config()).await;
    let mut events = engine.subscribe();

    engine.stop().await;
    let event = events.recv().await.unwrap();
    assert_eq!(event.event_type(), "engine_stopped");
}

#[tokio::test]
async fn test_source_chain_falls_back_to_direct_capture() {
    let backend = MockBackend::new(320, 240, 77);
    let engine = start_with(&backend, create_test_config()).await;
    engine.stop().await;

    let direct = MockBackend::named("direct", 160, 120, 33);
    let chain = FrameSourceChain::new()
        .with(EngineSource::new(engine.clone()))
        .with(DirectCaptureSource::new(
            vec![Arc::new(direct.clone())],
            &create_test_config(),
        ));

    let frame = chain.fetch(true).await.unwrap();
    assert_eq!(frame.dimensions(), (160, 120));
    assert_eq!(direct.opens(), 1);
    assert_eq!(direct.releases(), 1);
}

#[tokio::test]
async fn test_engine_record_clip_sets_indicator() {
    let backend = MockBackend::new(320, 240, 128);
    let engine = start_with(&backend, create_test_config()).await;
    let temp_dir = TempDir::new().unwrap();
    let mut writer = JpegSequenceWriter::create(temp_dir.path(), 75).await.unwrap();

    let options = ClipOptions {
        duration: Duration::from_millis(200),
        interval: Duration::from_millis(40),
        annotated: true,
    };

    let recorder = engine.clone();
    let clip = tokio::spawn(async move { recorder.record_clip(&options, &mut writer).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.is_recording());
    assert!(engine.get_stats().recording);

    let summary = clip.await.unwrap().unwrap();
    assert!(summary.frames >= 2);
    assert!(summary.annotated);
    assert!(!engine.is_recording());

    engine.stop().await;
}
