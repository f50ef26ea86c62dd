#[cfg(target_os = "windows")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use recorder::{ImageFormat, RecorderConfig, RecorderMode, RecordingSession, WindowsRecordingBackend};
    use screen_capture::RecordingSource;
    use video_encoder::{EncodedOutput, OutputTarget};

    env_logger::init();

    let sources = screen_capture_windows::screen_infos()?
        .into_iter()
        .map(|screen| RecordingSource::display(screen.name))
        .collect::<Vec<_>>();

    let config = RecorderConfig::new(sources, OutputTarget::Memory)
        .with_mode(RecorderMode::Snapshot)
        .with_image_format(ImageFormat::Png);

    let mut session = RecordingSession::new(WindowsRecordingBackend, config)?;
    session.begin_recording()?;
    let outcome = session.wait()?;

    if let EncodedOutput::Memory(bytes) = outcome.output {
        std::fs::create_dir_all("target")?;
        std::fs::write("target/snapshot.png", &bytes)?;
        println!("wrote {} bytes to target/snapshot.png", bytes.len());
    }
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn main() {
    eprintln!("this demo captures Windows displays only");
}
