use thiserror::Error;

pub const DXGI_ERROR_INVALID_CALL: i32 = 0x887A_0001_u32 as i32;
pub const DXGI_ERROR_UNSUPPORTED: i32 = 0x887A_0004_u32 as i32;
pub const DXGI_ERROR_DEVICE_REMOVED: i32 = 0x887A_0005_u32 as i32;
pub const DXGI_ERROR_DEVICE_RESET: i32 = 0x887A_0007_u32 as i32;
pub const DXGI_ERROR_NOT_CURRENTLY_AVAILABLE: i32 = 0x887A_0022_u32 as i32;
pub const DXGI_ERROR_MODE_CHANGE_IN_PROGRESS: i32 = 0x887A_0025_u32 as i32;
pub const DXGI_ERROR_ACCESS_LOST: i32 = 0x887A_0026_u32 as i32;
pub const DXGI_ERROR_WAIT_TIMEOUT: i32 = 0x887A_0027_u32 as i32;
pub const DXGI_ERROR_SESSION_DISCONNECTED: i32 = 0x887A_0028_u32 as i32;
pub const DXGI_ERROR_ACCESS_DENIED: i32 = 0x887A_002B_u32 as i32;
pub const E_ACCESSDENIED: i32 = 0x8007_0005_u32 as i32;
pub const E_OUTOFMEMORY: i32 = 0x8007_000E_u32 as i32;
pub const WAIT_ABANDONED_HRESULT: i32 = 0x8007_02DF_u32 as i32;

/// How the orchestrator must react to a capture failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Reported synchronously before recording starts.
    Configuration,
    /// Tear down the failing capture, recreate it and keep recording.
    Expected,
    /// Abort the session.
    Unexpected,
}

#[derive(Error, Debug, Clone)]
pub enum CaptureError {
    #[error("Access to the desktop was denied: {0}")]
    AccessDenied(String),

    #[error("Desktop duplication access lost: {0}")]
    AccessLost(String),

    #[error("Display mode change in progress")]
    ModeChangeInProgress,

    #[error("Remote session disconnected")]
    SessionDisconnected,

    #[error("Graphics device removed or reset: {0}")]
    DeviceRemoved(String),

    #[error("Maximum number of desktop duplications reached")]
    DuplicationLimit,

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Invalid recording source: {0}")]
    InvalidSource(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Capture timed out")]
    Timeout,

    #[error("{message} (HRESULT=0x{code:08X})")]
    Platform { code: i32, message: String },

    #[error("{0}")]
    Other(String),
}

impl CaptureError {
    /// Map a platform result code onto the capture error taxonomy.
    pub fn from_hresult(code: i32, context: impl Into<String>) -> Self {
        let context = context.into();
        match code {
            DXGI_ERROR_ACCESS_LOST | DXGI_ERROR_INVALID_CALL => Self::AccessLost(context),
            DXGI_ERROR_ACCESS_DENIED | E_ACCESSDENIED | WAIT_ABANDONED_HRESULT => {
                Self::AccessDenied(context)
            }
            DXGI_ERROR_MODE_CHANGE_IN_PROGRESS => Self::ModeChangeInProgress,
            DXGI_ERROR_SESSION_DISCONNECTED => Self::SessionDisconnected,
            DXGI_ERROR_DEVICE_REMOVED | DXGI_ERROR_DEVICE_RESET => Self::DeviceRemoved(context),
            DXGI_ERROR_NOT_CURRENTLY_AVAILABLE => Self::DuplicationLimit,
            DXGI_ERROR_UNSUPPORTED => Self::Unsupported(context),
            DXGI_ERROR_WAIT_TIMEOUT => Self::Timeout,
            E_OUTOFMEMORY => Self::OutOfMemory(context),
            _ => Self::Platform {
                code,
                message: context,
            },
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AccessDenied(_)
            | Self::AccessLost(_)
            | Self::ModeChangeInProgress
            | Self::SessionDisconnected
            | Self::Timeout => ErrorClass::Expected,
            Self::InvalidSource(_) | Self::Unsupported(_) => ErrorClass::Configuration,
            Self::DeviceRemoved(_)
            | Self::DuplicationLimit
            | Self::OutOfMemory(_)
            | Self::Platform { .. }
            | Self::Other(_) => ErrorClass::Unexpected,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.class() == ErrorClass::Expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_hresults() {
        for code in [
            DXGI_ERROR_ACCESS_LOST,
            DXGI_ERROR_INVALID_CALL,
            E_ACCESSDENIED,
            DXGI_ERROR_ACCESS_DENIED,
            DXGI_ERROR_MODE_CHANGE_IN_PROGRESS,
            DXGI_ERROR_SESSION_DISCONNECTED,
            WAIT_ABANDONED_HRESULT,
        ] {
            let err = CaptureError::from_hresult(code, "AcquireNextFrame");
            assert_eq!(err.class(), ErrorClass::Expected, "{err}");
            assert!(err.is_recoverable());
        }
    }

    #[test]
    fn test_unexpected_hresults() {
        for code in [
            DXGI_ERROR_DEVICE_REMOVED,
            DXGI_ERROR_DEVICE_RESET,
            DXGI_ERROR_NOT_CURRENTLY_AVAILABLE,
            E_OUTOFMEMORY,
            0x8000_4005_u32 as i32,
        ] {
            let err = CaptureError::from_hresult(code, "DuplicateOutput");
            assert_eq!(err.class(), ErrorClass::Unexpected, "{err}");
        }
    }

    #[test]
    fn test_unsupported_is_configuration() {
        let err = CaptureError::from_hresult(DXGI_ERROR_UNSUPPORTED, "DuplicateOutput");
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn test_platform_message_contains_code() {
        let err = CaptureError::from_hresult(0x8000_4005_u32 as i32, "CreateTexture2D failed");
        assert_eq!(
            err.to_string(),
            "CreateTexture2D failed (HRESULT=0x80004005)"
        );
    }
}
