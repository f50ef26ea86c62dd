#[cfg(target_os = "windows")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use recorder::{AudioDirection, list_audio_devices};

    let _com = screen_capture_windows::CoInitGuard::init_multithreaded()?;

    for (title, direction) in [
        ("Output Devices", AudioDirection::Output),
        ("Input Devices", AudioDirection::Input),
    ] {
        println!("\n{title}:");
        println!("------------------------");

        let devices = list_audio_devices(direction)?;
        if devices.is_empty() {
            println!("  none");
        }
        for (i, (id, name)) in devices.iter().enumerate() {
            println!("{}. {name} ({id})", i + 1);
        }
    }

    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn main() {
    eprintln!("audio device enumeration needs WASAPI");
}
