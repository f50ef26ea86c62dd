#[cfg(target_os = "windows")]
mod ve_mf;

#[cfg(target_os = "windows")]
pub use ve_mf::{MediaFoundationGuard, MfSinkWriter};

use derive_setters::Setters;
use screen_capture::{LogicalSize, Rectangle};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Media timestamps and durations are expressed in 100ns ticks.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Accepted AAC bitrates in bits per second.
pub const AAC_BITRATES: [u32; 4] = [96_000, 128_000, 160_000, 192_000];

#[derive(thiserror::Error, Debug)]
pub enum EncoderError {
    #[error("Invalid encoder configuration: {0}")]
    Configuration(String),

    #[error("Video encoding failed: {0}")]
    VideoEncodingFailed(String),

    #[error("Audio encoding failed: {0}")]
    AudioEncodingFailed(String),

    #[error("Timed out waiting for the encoder to finalize")]
    FinalizeTimeout,

    #[error("{message} (HRESULT=0x{code:08X})")]
    Platform { code: i32, message: String },
}

pub type Result<T> = std::result::Result<T, EncoderError>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateControl {
    #[default]
    Cbr,
    PeakConstrainedVbr,
    UnconstrainedVbr,
    Quality,
}

impl RateControl {
    /// Value of the platform `eAVEncCommonRateControlMode` enumeration.
    pub fn mode_value(self) -> u32 {
        match self {
            Self::Cbr => 0,
            Self::PeakConstrainedVbr => 1,
            Self::UnconstrainedVbr => 2,
            Self::Quality => 3,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum H264Profile {
    Baseline,
    Main,
    #[default]
    High,
}

impl H264Profile {
    pub fn profile_idc(self) -> u32 {
        match self {
            Self::Baseline => 66,
            Self::Main => 77,
            Self::High => 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputTarget {
    File(PathBuf),
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedOutput {
    File(PathBuf),
    Memory(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Setters)]
#[setters(prefix = "with_")]
pub struct VideoEncoderConfig {
    /// Size of the frames handed to the encoder.
    pub input_size: LogicalSize,
    /// Size of the encoded video.
    pub output_size: LogicalSize,
    pub fps: u32,
    /// Bits per second.
    pub bitrate: u32,
    /// 0-100, only used with [`RateControl::Quality`].
    pub quality: u32,
    pub rate_control: RateControl,
    pub profile: H264Profile,
    pub hardware_encoding: bool,
    pub fragmented: bool,
    pub fast_start: bool,
}

impl VideoEncoderConfig {
    pub fn new(input_size: LogicalSize) -> Self {
        Self {
            input_size,
            output_size: input_size,
            fps: 30,
            bitrate: 9_000_000,
            quality: 70,
            rate_control: RateControl::default(),
            profile: H264Profile::default(),
            hardware_encoding: true,
            fragmented: false,
            fast_start: true,
        }
    }

    pub fn frame_duration(&self) -> i64 {
        frame_duration(self.fps)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fps == 0 || self.fps > 240 {
            return Err(EncoderError::Configuration(format!(
                "unsupported frame rate {}",
                self.fps
            )));
        }

        for (name, size) in [("input", self.input_size), ("output", self.output_size)] {
            if size.is_empty() {
                return Err(EncoderError::Configuration(format!(
                    "empty {name} size {size:?}"
                )));
            }
        }

        // Input frames are cropped by the video processor, only the
        // encoded size has to be even.
        if self.output_size.width % 2 != 0 || self.output_size.height % 2 != 0 {
            return Err(EncoderError::Configuration(format!(
                "output size {}x{} must be even",
                self.output_size.width, self.output_size.height
            )));
        }

        if self.bitrate == 0 {
            return Err(EncoderError::Configuration("bitrate is zero".to_string()));
        }

        if self.quality > 100 {
            return Err(EncoderError::Configuration(format!(
                "quality {} is above 100",
                self.quality
            )));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Setters)]
#[setters(prefix = "with_")]
pub struct AudioEncoderConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Bits per second, one of [`AAC_BITRATES`].
    pub bitrate: u32,
}

impl Default for AudioEncoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            bitrate: 192_000,
        }
    }
}

impl AudioEncoderConfig {
    pub fn block_align(&self) -> u32 {
        self.channels as u32 * 2
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.sample_rate, 44100 | 48000) {
            return Err(EncoderError::Configuration(format!(
                "AAC sample rate {} is not 44100 or 48000",
                self.sample_rate
            )));
        }
        if !matches!(self.channels, 1 | 2 | 6) {
            return Err(EncoderError::Configuration(format!(
                "AAC channel count {} is not supported",
                self.channels
            )));
        }
        if !AAC_BITRATES.contains(&self.bitrate) {
            return Err(EncoderError::Configuration(format!(
                "AAC bitrate {} is not one of {AAC_BITRATES:?}",
                self.bitrate
            )));
        }
        Ok(())
    }
}

/// Duration of one frame in 100ns ticks.
pub fn frame_duration(fps: u32) -> i64 {
    TICKS_PER_SECOND / fps.max(1) as i64
}

/// Timestamped sample sink in front of the platform encoder.
pub trait EncoderSink: Send {
    type Texture;

    fn write_video(&mut self, texture: &Self::Texture, start: i64, duration: i64) -> Result<()>;

    /// `pcm` is interleaved 16-bit PCM in the configured audio format.
    fn write_audio(&mut self, pcm: &[u8], start: i64, duration: i64) -> Result<()>;

    /// Mark the current end of the video stream.
    fn place_marker(&mut self) -> Result<()>;

    /// Block until every sample written before the last marker was
    /// processed. Returns `false` on timeout.
    fn wait_for_marker(&mut self, timeout: Duration) -> Result<bool>;

    /// Encode only `rect` of input frames of size `input_size`.
    fn set_source_rect(&mut self, rect: Rectangle, input_size: LogicalSize) -> Result<()>;

    fn finalize(&mut self, timeout: Duration) -> Result<EncodedOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        assert_eq!(frame_duration(30), 333_333);
        assert_eq!(frame_duration(60), 166_666);
        assert_eq!(frame_duration(0), TICKS_PER_SECOND);
    }

    #[test]
    fn test_video_config_validate() {
        let config = VideoEncoderConfig::new(LogicalSize::new(1920, 1080));
        assert!(config.validate().is_ok());

        assert!(config.clone().with_fps(0).validate().is_err());
        assert!(config.clone().with_bitrate(0).validate().is_err());
        assert!(config.clone().with_quality(101).validate().is_err());
        assert!(
            config
                .clone()
                .with_input_size(LogicalSize::new(801, 600))
                .with_output_size(LogicalSize::new(800, 600))
                .validate()
                .is_ok()
        );
        assert!(
            config
                .clone()
                .with_output_size(LogicalSize::new(1279, 720))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_audio_config_validate() {
        let config = AudioEncoderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.block_align(), 4);

        for bitrate in AAC_BITRATES {
            assert!(config.clone().with_bitrate(bitrate).validate().is_ok());
        }
        assert!(config.clone().with_bitrate(256_000).validate().is_err());
        assert!(config.clone().with_sample_rate(22050).validate().is_err());
        assert!(config.with_channels(3).validate().is_err());
    }

    #[test]
    fn test_platform_enum_values() {
        assert_eq!(RateControl::Quality.mode_value(), 3);
        assert_eq!(H264Profile::Main.profile_idc(), 77);
    }
}
