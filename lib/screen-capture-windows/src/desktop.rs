use screen_capture::CaptureError;
use windows::Win32::{
    Foundation::GENERIC_ALL,
    System::StationsAndDesktops::{
        CloseDesktop, DESKTOP_ACCESS_FLAGS, DESKTOP_CONTROL_FLAGS, HDESK, OpenInputDesktop,
        SetThreadDesktop,
    },
};

/// Binds the calling thread to the desktop currently receiving user input.
///
/// Duplication of the secure desktop (UAC prompts, lock screen) requires the
/// thread to follow the input desktop.
pub struct InputDesktopGuard {
    desktop: HDESK,
}

impl InputDesktopGuard {
    pub fn attach() -> Result<Self, CaptureError> {
        let desktop = unsafe {
            OpenInputDesktop(
                DESKTOP_CONTROL_FLAGS(0),
                false,
                DESKTOP_ACCESS_FLAGS(GENERIC_ALL.0),
            )
        }
        .map_err(|e| CaptureError::AccessDenied(format!("OpenInputDesktop failed: {e}")))?;

        if let Err(e) = unsafe { SetThreadDesktop(desktop) } {
            unsafe {
                let _ = CloseDesktop(desktop);
            }
            return Err(CaptureError::AccessDenied(format!(
                "SetThreadDesktop failed: {e}"
            )));
        }

        Ok(Self { desktop })
    }
}

impl Drop for InputDesktopGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseDesktop(self.desktop);
        }
    }
}
