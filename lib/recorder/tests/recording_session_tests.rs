mod common;

use common::*;
use recorder::{
    Clock, ManualClock, RecorderError, RecorderEvent, RecorderMode, RecorderState,
    RecorderStatus, RecordingSession, bounded,
};
use screen_capture::{CaptureError, LogicalSize, Rectangle};
use std::{sync::Arc, thread, time::Duration};
use video_encoder::{EncodedOutput, OutputTarget};

fn session(
    backend: FakeBackend,
    config: recorder::RecorderConfig,
) -> RecordingSession<FakeBackend> {
    let clock = backend.clock.clone();
    RecordingSession::new(backend, config)
        .unwrap()
        .with_clock(clock as Arc<dyn Clock>)
}

#[test]
fn test_invalid_config_is_rejected() {
    let clock = Arc::new(ManualClock::default());
    let mut config = config(OutputTarget::Memory);
    config.sources.clear();

    let result = RecordingSession::new(FakeBackend::new(clock, vec![]), config);
    assert!(matches!(result, Err(RecorderError::InvalidConfig(_))));
}

#[test]
fn test_fixed_framerate_timeline() {
    init_logger();
    let clock = Arc::new(ManualClock::default());
    let backend = FakeBackend::new(clock, frames_every(20 * MS, 300 * MS));
    let log = backend.sink_log.clone();

    let mut config = config(OutputTarget::Memory).with_max_duration_ms(300);
    config.video.fps = 10;
    config.video.fixed_framerate = true;

    let mut session = session(backend, config);
    let events = session.events();
    session.begin_recording().unwrap();
    let outcome = session.wait().unwrap();
    assert_eq!(outcome.output, EncodedOutput::Memory(vec![]));

    let log = log.lock().unwrap();
    assert!(log.finalized);
    let timeline: Vec<_> = log
        .video
        .iter()
        .map(|s| (s.texture, s.start, s.duration))
        .collect();
    assert_eq!(
        timeline,
        vec![
            (0, 0, 1_000_000),
            (5, 1_000_000, 1_000_000),
            (10, 2_000_000, 1_000_000)
        ]
    );

    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(terminal_events(&events), 1);
    assert!(matches!(events.last(), Some(RecorderEvent::Completed { .. })));
    assert_eq!(session.state(), RecorderState::Idle);
}

#[test]
fn test_video_samples_are_contiguous() {
    let clock = Arc::new(ManualClock::default());
    let steps = vec![
        Step::Frame(Duration::ZERO),
        Step::Frame(10 * MS),
        Step::Frame(70 * MS),
        Step::Frame(300 * MS),
    ];
    let backend = FakeBackend::new(clock, steps);
    let log = backend.sink_log.clone();

    let config = config(OutputTarget::Memory).with_max_duration_ms(400);
    let mut session = session(backend, config);
    session.begin_recording().unwrap();
    session.wait().unwrap();

    let log = log.lock().unwrap();
    assert!(!log.video.is_empty());
    assert_eq!(log.video[0].start, 0);
    for pair in log.video.windows(2) {
        assert_eq!(pair[0].start + pair[0].duration, pair[1].start);
    }
    let last = log.video.last().unwrap();
    assert_eq!(last.start + last.duration, 4_000_000);
}

#[test]
fn test_snapshot_to_memory() {
    let clock = Arc::new(ManualClock::default());
    let backend = FakeBackend::new(clock, vec![Step::Frame(5 * MS)]);
    let reads = backend.reads.clone();

    let config = config(OutputTarget::Memory).with_mode(RecorderMode::Snapshot);
    let mut session = session(backend, config);
    let events = session.events();
    session.begin_recording().unwrap();
    let outcome = session.wait().unwrap();

    let EncodedOutput::Memory(bytes) = &outcome.output else {
        panic!("snapshot was not returned in memory: {:?}", outcome.output);
    };
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Png).unwrap();
    assert_eq!((image.width(), image.height()), (8, 6));
    assert_eq!(reads.load(std::sync::atomic::Ordering::SeqCst), 1);

    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(terminal_events(&events), 1);
}

#[test]
fn test_snapshot_without_frame_fails() {
    let clock = Arc::new(ManualClock::default());
    let backend = FakeBackend::new(clock, vec![]);

    let config = config(OutputTarget::Memory).with_mode(RecorderMode::Snapshot);
    let mut session = session(backend, config);
    let events = session.events();
    session.begin_recording().unwrap();
    session.stop();
    assert!(session.wait().is_err());

    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(terminal_events(&events), 1);
    assert!(matches!(
        events.last(),
        Some(RecorderEvent::Failed {
            encoder_failure: false,
            ..
        })
    ));
    assert_eq!(session.state(), RecorderState::Idle);
}

#[test]
fn test_slideshow_writes_changed_frames() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("slides");

    let clock = Arc::new(ManualClock::default());
    let steps = vec![
        Step::Frame(Duration::ZERO),
        Step::Frame(150 * MS),
        Step::Frame(400 * MS),
    ];
    let backend = FakeBackend::new(clock, steps);

    let config = config(OutputTarget::File(output.clone()))
        .with_mode(RecorderMode::Slideshow)
        .with_max_duration_ms(500);
    let mut session = session(backend, config);
    session.begin_recording().unwrap();
    let outcome = session.wait().unwrap();

    assert_eq!(outcome.output, EncodedOutput::File(output.clone()));
    let delays: Vec<_> = outcome
        .frame_delays
        .iter()
        .map(|d| (d.filename.as_str(), d.delay_ms))
        .collect();
    assert_eq!(
        delays,
        vec![("00000.png", 0), ("00001.png", 150), ("00002.png", 250)]
    );
    for delay in &outcome.frame_delays {
        assert!(output.join(&delay.filename).is_file());
    }
}

#[test]
fn test_recovery_keeps_recording() {
    init_logger();
    let clock = Arc::new(ManualClock::default());
    let steps = vec![
        Step::Frame(Duration::ZERO),
        Step::Frame(50 * MS),
        Step::Error(120 * MS, CaptureError::AccessDenied("secure desktop".to_string())),
        Step::Frame(400 * MS),
        Step::Frame(450 * MS),
    ];
    let backend = FakeBackend::new(clock, steps);
    let log = backend.sink_log.clone();
    let starts = backend.starts.clone();

    let config = config(OutputTarget::Memory).with_max_duration_ms(700);
    let mut session = session(backend, config);
    let events = session.events();
    session.begin_recording().unwrap();
    session.wait().unwrap();

    assert_eq!(starts.load(std::sync::atomic::Ordering::SeqCst), 2);

    let log = log.lock().unwrap();
    let timeline: Vec<_> = log
        .video
        .iter()
        .map(|s| (s.texture, s.start, s.duration))
        .collect();
    assert_eq!(
        timeline,
        vec![
            (0, 0, 500_000),
            (1, 500_000, 700_000),
            (BLANK, 1_200_000, 2_800_000),
            (2, 4_000_000, 500_000),
            (3, 4_500_000, 2_500_000),
        ]
    );

    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(terminal_events(&events), 1);
    assert!(matches!(events.last(), Some(RecorderEvent::Completed { .. })));
}

#[test]
fn test_recovery_with_resized_capture() {
    init_logger();
    let clock = Arc::new(ManualClock::default());
    let mut steps = frames_every(16 * MS, 400 * MS);
    let error = Step::Error(120 * MS, CaptureError::AccessLost("mode change".to_string()));
    let at = steps.iter().position(|s| matches!(s, Step::Frame(t) if *t > 120 * MS));
    steps.insert(at.unwrap(), error);

    let backend = FakeBackend::new(clock, steps).with_restart_size(LogicalSize::new(6, 8));
    let log = backend.sink_log.clone();
    let starts = backend.starts.clone();

    let config = config(OutputTarget::Memory).with_max_duration_ms(600);
    let mut session = session(backend, config);
    let events = session.events();
    session.begin_recording().unwrap();
    session.wait().unwrap();

    assert_eq!(starts.load(std::sync::atomic::Ordering::SeqCst), 2);

    let log = log.lock().unwrap();
    let first_blank = log.video.iter().position(|s| s.texture == BLANK).unwrap();
    let last_blank = log.video.iter().rposition(|s| s.texture == BLANK).unwrap();
    assert!(log.video[..first_blank].iter().all(|s| s.texture & FITTED == 0));
    assert!(log.video.len() > last_blank + 1);
    assert!(log.video[last_blank + 1..].iter().all(|s| s.texture & FITTED != 0));

    assert_eq!(log.markers, 1);
    assert_eq!(log.source_rects, vec![Rectangle::new(0, 0, 8, 6)]);

    assert_eq!(log.video[0].start, 0);
    for pair in log.video.windows(2) {
        assert_eq!(pair[0].start + pair[0].duration, pair[1].start);
    }
    let last = log.video.last().unwrap();
    assert_eq!(last.start + last.duration, 6_000_000);

    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(terminal_events(&events), 1);
    assert!(matches!(events.last(), Some(RecorderEvent::Completed { .. })));
}

#[test]
fn test_content_size_change_crops_encoder() {
    let clock = Arc::new(ManualClock::default());
    let half = LogicalSize::new(4, 6);
    let steps = vec![
        Step::Frame(Duration::ZERO),
        Step::Frame(50 * MS),
        Step::Resized(100 * MS, half),
        Step::Resized(150 * MS, half),
    ];
    let backend = FakeBackend::new(clock, steps);
    let log = backend.sink_log.clone();

    let config = config(OutputTarget::Memory).with_max_duration_ms(300);
    let mut session = session(backend, config);
    session.begin_recording().unwrap();
    session.wait().unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.markers, 1);
    assert_eq!(log.source_rects, vec![Rectangle::new(0, 0, 4, 6)]);
    let textures: Vec<_> = log.video.iter().map(|s| s.texture).collect();
    assert_eq!(textures, vec![0, 1, 2, 3]);
}

#[test]
fn test_unexpected_capture_error_fails() {
    let clock = Arc::new(ManualClock::default());
    let steps = vec![
        Step::Frame(Duration::ZERO),
        Step::Error(60 * MS, CaptureError::DeviceRemoved("driver update".to_string())),
    ];
    let backend = FakeBackend::new(clock, steps);
    let starts = backend.starts.clone();

    let mut session = session(backend, config(OutputTarget::Memory));
    let events = session.events();
    session.begin_recording().unwrap();
    let error = session.wait().unwrap_err();
    assert!(matches!(
        error,
        RecorderError::Capture(CaptureError::DeviceRemoved(_))
    ));
    assert_eq!(starts.load(std::sync::atomic::Ordering::SeqCst), 1);

    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(terminal_events(&events), 1);
    assert_eq!(
        events[events.len() - 2],
        RecorderEvent::StatusChanged(RecorderStatus::Idle)
    );
    assert_eq!(session.state(), RecorderState::Idle);
}

#[test]
fn test_snapshot_interruption_fails() {
    let clock = Arc::new(ManualClock::default());
    let steps = vec![Step::Error(
        Duration::ZERO,
        CaptureError::ModeChangeInProgress,
    )];
    let backend = FakeBackend::new(clock, steps);

    let config = config(OutputTarget::Memory).with_mode(RecorderMode::Snapshot);
    let mut session = session(backend, config);
    let events = session.events();
    session.begin_recording().unwrap();
    assert!(session.wait().is_err());

    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(terminal_events(&events), 1);
    assert!(matches!(events.last(), Some(RecorderEvent::Failed { .. })));
}

#[test]
fn test_silence_fills_audio_gaps() {
    let clock = Arc::new(ManualClock::default());
    let backend = FakeBackend::new(clock, frames_every(20 * MS, 500 * MS))
        .with_loud_until(150 * MS);
    let log = backend.sink_log.clone();

    let mut config = config(OutputTarget::Memory).with_max_duration_ms(500);
    config.video.fps = 10;
    config.video.fixed_framerate = true;
    config.audio.output_enabled = true;
    let format = config.audio.pcm_format();
    let interval = format.silence_len(1_000_000);

    let (level_sender, level_receiver) = bounded(16);
    let mut session = session(backend, config).with_audio_level_sender(level_sender);
    session.begin_recording().unwrap();
    session.wait().unwrap();

    let log = log.lock().unwrap();
    let audio: Vec<_> = log.audio.iter().map(|s| (s.len, s.silent)).collect();
    assert_eq!(
        audio,
        vec![
            (interval, false),
            (interval / 2, false),
            (interval, true),
            (interval, true),
            (interval, true)
        ]
    );

    assert_eq!(log.audio[0].start, 0);
    for pair in log.audio.windows(2) {
        assert_eq!(pair[0].start + pair[0].duration, pair[1].start);
    }
    // Only empty intervals are padded, the half-filled one stays short.
    let last = log.audio.last().unwrap();
    assert_eq!(last.start + last.duration, 4_500_000);

    assert!(level_receiver.try_iter().count() >= 2);
}

#[test]
fn test_encoder_failure_is_reported() {
    let clock = Arc::new(ManualClock::default());
    let backend = FakeBackend::new(clock, frames_every(20 * MS, 1000 * MS)).with_faults(Faults {
        fail_video_write: true,
        ..Default::default()
    });

    let config = config(OutputTarget::Memory).with_max_duration_ms(1000);
    let mut session = session(backend, config);
    let events = session.events();
    session.begin_recording().unwrap();
    let error = session.wait().unwrap_err();
    assert!(error.is_encoder_failure());

    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(terminal_events(&events), 1);
    match events.last() {
        Some(RecorderEvent::Failed {
            message,
            encoder_failure,
        }) => {
            assert!(*encoder_failure);
            assert!(message.contains("Try disabling hardware encoding"));
        }
        other => panic!("unexpected last event {other:?}"),
    }
}

#[test]
fn test_setup_failure_has_no_terminal_event() {
    let clock = Arc::new(ManualClock::default());
    let backend = FakeBackend::new(clock, frames_every(20 * MS, 100 * MS)).with_faults(Faults {
        fail_sink: true,
        ..Default::default()
    });

    let mut session = session(backend, config(OutputTarget::Memory));
    let events = session.events();
    let error = session.begin_recording().unwrap_err();
    assert!(error.is_encoder_failure());

    assert_eq!(session.state(), RecorderState::Idle);
    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(terminal_events(&events), 0);
    assert!(session.wait().is_err());
}

#[test]
fn test_pause_resume_and_stop() {
    let clock = Arc::new(ManualClock::default());
    let backend = FakeBackend::new(clock, vec![]);

    let mut session = session(backend, config(OutputTarget::Memory));
    let events = session.events();
    assert!(session.pause().is_err());

    session.begin_recording().unwrap();
    assert_eq!(session.state(), RecorderState::Recording);
    assert!(matches!(
        session.begin_recording(),
        Err(RecorderError::InvalidState { .. })
    ));
    assert!(session.resume().is_err());

    session.pause().unwrap();
    assert_eq!(session.state(), RecorderState::Paused);
    session.resume().unwrap();
    assert_eq!(session.state(), RecorderState::Recording);

    session.stop();
    let outcome = session.wait().unwrap();
    assert_eq!(outcome.output, EncodedOutput::Memory(vec![]));

    let events: Vec<_> = events.try_iter().collect();
    let statuses: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RecorderEvent::StatusChanged(status) => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            RecorderStatus::Recording,
            RecorderStatus::Paused,
            RecorderStatus::Recording,
            RecorderStatus::Finalizing,
            RecorderStatus::Idle,
        ]
    );
    assert_eq!(terminal_events(&events), 1);
    assert!(matches!(events.last(), Some(RecorderEvent::Completed { .. })));
}

#[test]
fn test_pause_is_cut_from_the_timeline() {
    init_logger();
    let clock = Arc::new(ManualClock::default());
    let hold = 200 * MS;
    let mut steps = frames_every(20 * MS, 600 * MS);
    let at = steps.iter().position(|s| matches!(s, Step::Frame(t) if *t == hold));
    steps[at.unwrap()] = Step::Hold(hold);

    let (held_tx, held_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let backend = FakeBackend::new(clock.clone(), steps).with_gate(held_tx, release_rx);
    let log = backend.sink_log.clone();

    let config = config(OutputTarget::Memory).with_max_duration_ms(400);
    let mut session = session(backend, config);
    session.begin_recording().unwrap();

    held_rx.recv().unwrap();
    session.pause().unwrap();
    release_tx.send(()).unwrap();
    while clock.now() < hold + Duration::from_secs(1) {
        thread::sleep(Duration::from_millis(1));
    }
    session.resume().unwrap();
    session.wait().unwrap();

    assert!(clock.now() > Duration::from_millis(1300));

    let log = log.lock().unwrap();
    assert_eq!(log.video[0].start, 0);
    for pair in log.video.windows(2) {
        assert_eq!(pair[0].start + pair[0].duration, pair[1].start);
    }
    let last = log.video.last().unwrap();
    assert_eq!(last.start + last.duration, 4_000_000);

    // Frames captured after the pause still land inside the recording.
    let held = log.video.iter().find(|s| s.texture == 10).unwrap();
    assert!(log.video.iter().any(|s| s.texture > 10 && s.start > held.start));
}

#[test]
fn test_video_snapshots_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::default());
    let backend = FakeBackend::new(clock, frames_every(50 * MS, 350 * MS));

    let mut config = config(OutputTarget::Memory).with_max_duration_ms(350);
    config.snapshot = config
        .snapshot
        .with_enabled(true)
        .with_interval_ms(100)
        .with_directory(dir.path().to_path_buf());

    let mut session = session(backend, config);
    let events = session.events();
    session.begin_recording().unwrap();
    session.wait().unwrap();

    let events: Vec<_> = events.try_iter().collect();
    let snapshots: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RecorderEvent::SnapshotCreated { path } => Some(path.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(snapshots.len(), 3);
    for path in &snapshots {
        assert!(path.is_file());
        assert_eq!(path.parent(), Some(dir.path()));
    }

    assert_eq!(terminal_events(&events), 1);
    assert!(matches!(events.last(), Some(RecorderEvent::Completed { .. })));
}

#[test]
fn test_session_runs_again_after_completion() {
    let clock = Arc::new(ManualClock::default());
    let backend = FakeBackend::new(clock, frames_every(20 * MS, 100 * MS));

    let config = config(OutputTarget::Memory).with_max_duration_ms(100);
    let mut session = session(backend, config);
    let events = session.events();

    session.begin_recording().unwrap();
    session.wait().unwrap();
    session.begin_recording().unwrap();
    session.stop();
    session.wait().unwrap();

    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(terminal_events(&events), 2);
}
