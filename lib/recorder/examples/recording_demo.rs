#[cfg(target_os = "windows")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use recorder::{
        RecorderConfig, RecorderEvent, RecordingSession, Resolution, WindowsRecordingBackend,
        bounded,
    };
    use screen_capture::RecordingSource;
    use video_encoder::OutputTarget;

    env_logger::init();

    log::debug!("Press Ctrl-C to stop recording.");

    let screens = screen_capture_windows::screen_infos()?;
    let Some(screen) = screens.first() else {
        return Err("no display attached".into());
    };
    log::debug!("recording {} {:?}", screen.name, screen.rect);

    std::fs::create_dir_all("target")?;
    let mut config = RecorderConfig::new(
        vec![RecordingSource::display(screen.name.clone())],
        OutputTarget::File(RecorderConfig::make_filename("target")),
    )
    .with_max_duration_ms(60_000);
    config.video.resolution = Resolution::P1080;
    config.audio.input_enabled = true;

    log::debug!("Recording configuration: {:#?}", config);

    let (level_sender, level_receiver) = bounded(64);
    let mut session =
        RecordingSession::new(WindowsRecordingBackend, config)?.with_audio_level_sender(level_sender);
    let events = session.events();

    let (stop_sender, stop_receiver) = bounded(1);
    ctrlc::set_handler(move || {
        log::debug!("Ctrl-C received, stopping recording...");
        let _ = stop_sender.try_send(());
    })?;

    session.begin_recording()?;

    loop {
        if stop_receiver.try_recv().is_ok() {
            session.stop();
        }

        for level in level_receiver.try_iter() {
            log::trace!("audio level {:.0}%", level.normalized() * 100.0);
        }

        match events.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(RecorderEvent::Completed { output, .. }) => {
                log::info!("recording saved: {output:?}");
                break;
            }
            Ok(RecorderEvent::Failed { message, .. }) => {
                log::warn!("recording failed: {message}");
                break;
            }
            Ok(event) => log::debug!("{event:?}"),
            Err(_) => {}
        }
    }

    let _ = session.wait();
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn main() {
    eprintln!("this demo records Windows displays only");
}
