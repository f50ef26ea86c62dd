use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AudioCaptureError {
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("Audio device was invalidated: {0}")]
    DeviceInvalidated(String),

    #[error("Unsupported audio format: {0}")]
    Format(String),

    #[error("Audio capture is not running")]
    NotRunning,

    #[error("{message} (HRESULT=0x{code:08X})")]
    Platform { code: i32, message: String },

    #[error("Audio processing failed: {0}")]
    Process(#[from] audio_utils::AudioProcessError),
}

/// Value of `AUDCLNT_E_DEVICE_INVALIDATED`.
pub const AUDCLNT_E_DEVICE_INVALIDATED: i32 = 0x8889_0004_u32 as i32;

impl AudioCaptureError {
    pub fn from_hresult(code: i32, context: impl Into<String>) -> Self {
        let message = context.into();
        match code {
            AUDCLNT_E_DEVICE_INVALIDATED => Self::DeviceInvalidated(message),
            _ => Self::Platform { code, message },
        }
    }
}

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Invalid configuration parameters: {0}")]
    InvalidConfig(String),

    #[error("Screen capture failed: {0}")]
    Capture(#[from] screen_capture::CaptureError),

    #[error("Audio capture failed: {0}")]
    Audio(#[from] AudioCaptureError),

    #[error("Encoder failed: {source}{}", if *hardware_encoding { ". Try disabling hardware encoding" } else { "" })]
    Encoder {
        source: video_encoder::EncoderError,
        hardware_encoding: bool,
    },

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse configuration failed: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidState {
        from: crate::RecorderState,
        to: crate::RecorderState,
    },

    #[error("{0}")]
    Other(String),
}

impl RecorderError {
    pub fn encoder(source: video_encoder::EncoderError, hardware_encoding: bool) -> Self {
        Self::Encoder {
            source,
            hardware_encoding,
        }
    }

    pub fn is_encoder_failure(&self) -> bool {
        matches!(self, Self::Encoder { .. })
    }

    /// A capture fault the session survives by restarting the capture.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Capture(e) if e.is_recoverable())
    }
}

pub type Result<T> = std::result::Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use screen_capture::CaptureError;
    use video_encoder::EncoderError;

    #[test]
    fn test_encoder_hint() {
        let e = RecorderError::encoder(EncoderError::VideoEncodingFailed("x".to_string()), true);
        assert!(e.is_encoder_failure());
        assert!(e.to_string().ends_with("Try disabling hardware encoding"));

        let e = RecorderError::encoder(EncoderError::VideoEncodingFailed("x".to_string()), false);
        assert!(!e.to_string().contains("hardware"));
    }

    #[test]
    fn test_recoverable_capture_errors() {
        assert!(RecorderError::from(CaptureError::AccessDenied("uac".to_string())).is_recoverable());
        assert!(!RecorderError::from(CaptureError::DuplicationLimit).is_recoverable());
        assert!(!RecorderError::Other("x".to_string()).is_recoverable());
    }

    #[test]
    fn test_audio_hresult() {
        assert!(matches!(
            AudioCaptureError::from_hresult(AUDCLNT_E_DEVICE_INVALIDATED, "GetBuffer"),
            AudioCaptureError::DeviceInvalidated(_)
        ));
        assert!(matches!(
            AudioCaptureError::from_hresult(-1, "GetBuffer"),
            AudioCaptureError::Platform { code: -1, .. }
        ));
    }
}
