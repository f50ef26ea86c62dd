use crate::{RecorderError, Resolution, Result};
use audio_utils::PcmFormat;
use chrono::Local;
use derive_setters::Setters;
use screen_capture::{
    ClickDetectionMode, Color, DEFAULT_LEFT_CLICK_COLOR, DEFAULT_RIGHT_CLICK_COLOR, LogicalSize,
    OverlaySource, RecordingSource,
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use video_encoder::{
    AudioEncoderConfig, H264Profile, OutputTarget, RateControl, VideoEncoderConfig,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecorderMode {
    /// Encode video and audio into an MP4 container.
    #[default]
    Video,
    /// Write one image file per changed frame.
    Slideshow,
    /// Write a single image and stop.
    Snapshot,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Bmp,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Bmp => "bmp",
        }
    }

    pub fn to_image_format(self) -> image::ImageFormat {
        match self {
            Self::Png => image::ImageFormat::Png,
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Bmp => image::ImageFormat::Bmp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default)]
#[setters(prefix = "with_")]
pub struct VideoOptions {
    pub fps: u32,
    /// Bits per second.
    pub bitrate: u32,
    /// 0-100, used with [`RateControl::Quality`].
    pub quality: u32,
    pub rate_control: RateControl,
    pub profile: H264Profile,
    pub hardware_encoding: bool,
    pub fragmented: bool,
    pub fast_start: bool,
    /// Submit every frame interval instead of caching premature frames.
    pub fixed_framerate: bool,
    pub resolution: Resolution,
    /// Longest time an unchanged frame stays on screen before it is repeated.
    pub max_frame_length_ms: u64,
}

impl Default for VideoOptions {
    fn default() -> Self {
        Self {
            fps: 30,
            bitrate: 9_000_000,
            quality: 70,
            rate_control: RateControl::default(),
            profile: H264Profile::default(),
            hardware_encoding: true,
            fragmented: false,
            fast_start: true,
            fixed_framerate: false,
            resolution: Resolution::default(),
            max_frame_length_ms: 1000,
        }
    }
}

impl VideoOptions {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.fps.max(1) as u64)
    }

    pub fn max_frame_length(&self) -> Duration {
        Duration::from_millis(self.max_frame_length_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default)]
#[setters(prefix = "with_")]
pub struct AudioOptions {
    /// Record what the output device plays (loopback).
    pub output_enabled: bool,
    /// Record the input device (microphone).
    pub input_enabled: bool,
    /// Empty selects the default endpoint.
    #[setters(into)]
    pub output_device_id: String,
    #[setters(into)]
    pub input_device_id: String,
    pub bitrate: u32,
    pub channels: u16,
    pub sample_rate: u32,
    pub output_volume: f32,
    pub input_volume: f32,
}

impl Default for AudioOptions {
    fn default() -> Self {
        Self {
            output_enabled: true,
            input_enabled: false,
            output_device_id: String::new(),
            input_device_id: String::new(),
            bitrate: 192_000,
            channels: 2,
            sample_rate: 48000,
            output_volume: 1.0,
            input_volume: 1.0,
        }
    }
}

impl AudioOptions {
    pub fn is_enabled(&self) -> bool {
        self.output_enabled || self.input_enabled
    }

    pub fn pcm_format(&self) -> PcmFormat {
        PcmFormat::i16(self.sample_rate, self.channels)
    }

    pub fn encoder_config(&self) -> AudioEncoderConfig {
        AudioEncoderConfig::default()
            .with_sample_rate(self.sample_rate)
            .with_channels(self.channels)
            .with_bitrate(self.bitrate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default)]
#[setters(prefix = "with_")]
pub struct MouseOptions {
    pub draw_pointer: bool,
    pub detect_clicks: bool,
    pub mode: ClickDetectionMode,
    /// `#RRGGBB` or `#AARRGGBB`.
    #[setters(into)]
    pub left_color: String,
    #[setters(into)]
    pub right_color: String,
    pub radius: i32,
    pub duration_ms: u64,
}

impl Default for MouseOptions {
    fn default() -> Self {
        Self {
            draw_pointer: true,
            detect_clicks: false,
            mode: ClickDetectionMode::default(),
            left_color: "#FFFF00".to_string(),
            right_color: "#006AFF".to_string(),
            radius: 20,
            duration_ms: 50,
        }
    }
}

impl MouseOptions {
    pub fn style(&self) -> MouseStyle {
        MouseStyle {
            draw_pointer: self.draw_pointer,
            left_color: Color::parse_or(&self.left_color, DEFAULT_LEFT_CLICK_COLOR),
            right_color: Color::parse_or(&self.right_color, DEFAULT_RIGHT_CLICK_COLOR),
            radius: self.radius,
        }
    }

    pub fn click_duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Parsed mouse options handed to the frame renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseStyle {
    pub draw_pointer: bool,
    pub left_color: Color,
    pub right_color: Color,
    pub radius: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default)]
#[setters(prefix = "with_")]
pub struct SnapshotOptions {
    /// Write periodic images while recording video.
    pub enabled: bool,
    pub interval_ms: u64,
    pub format: ImageFormat,
    /// Defaults to the directory of the video file.
    #[setters(strip_option)]
    pub directory: Option<PathBuf>,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 5000,
            format: ImageFormat::default(),
            directory: None,
        }
    }
}

impl SnapshotOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Everything a recording session needs to know up front.
///
/// # Examples
///
/// ```
/// use recorder::{RecorderConfig, RecorderMode};
/// use screen_capture::RecordingSource;
/// use video_encoder::OutputTarget;
///
/// let config = RecorderConfig::new(
///     vec![RecordingSource::display("\\\\.\\DISPLAY1")],
///     OutputTarget::File("recording.mp4".into()),
/// )
/// .with_mode(RecorderMode::Video)
/// .with_max_duration_ms(10_000);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default)]
#[setters(prefix = "with_")]
pub struct RecorderConfig {
    pub mode: RecorderMode,
    pub sources: Vec<RecordingSource>,
    pub overlays: Vec<OverlaySource>,
    /// Video file, slideshow directory or snapshot image.
    pub output: OutputTarget,
    /// Format of slideshow and snapshot images.
    pub image_format: ImageFormat,
    /// Stop on its own after this long.
    #[setters(strip_option)]
    pub max_duration_ms: Option<u64>,
    pub video: VideoOptions,
    pub audio: AudioOptions,
    pub mouse: MouseOptions,
    pub snapshot: SnapshotOptions,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::new(vec![], OutputTarget::File(Self::make_filename(".")))
    }
}

impl RecorderConfig {
    pub fn new(sources: Vec<RecordingSource>, output: OutputTarget) -> Self {
        Self {
            mode: RecorderMode::default(),
            sources,
            overlays: vec![],
            output,
            image_format: ImageFormat::default(),
            max_duration_ms: None,
            video: VideoOptions::default(),
            audio: AudioOptions::default(),
            mouse: MouseOptions::default(),
            snapshot: SnapshotOptions::default(),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_ms.map(Duration::from_millis)
    }

    /// Audio is only recorded into videos.
    pub fn records_audio(&self) -> bool {
        self.mode == RecorderMode::Video && self.audio.is_enabled()
    }

    pub fn video_encoder_config(&self, input_size: LogicalSize) -> VideoEncoderConfig {
        VideoEncoderConfig::new(input_size)
            .with_output_size(self.video.resolution.dimensions(input_size))
            .with_fps(self.video.fps)
            .with_bitrate(self.video.bitrate)
            .with_quality(self.video.quality)
            .with_rate_control(self.video.rate_control)
            .with_profile(self.video.profile)
            .with_hardware_encoding(self.video.hardware_encoding)
            .with_fragmented(self.video.fragmented)
            .with_fast_start(self.video.fast_start)
    }

    /// Directory receiving snapshot images taken during a video.
    pub fn snapshot_directory(&self) -> PathBuf {
        if let Some(dir) = &self.snapshot.directory {
            return dir.clone();
        }
        match &self.output {
            OutputTarget::File(path) => path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            OutputTarget::Memory => PathBuf::from("."),
        }
    }

    /// Reject configurations no recording can start with.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(RecorderError::InvalidConfig(
                "no valid recording sources".to_string(),
            ));
        }

        let video = &self.video;
        if video.fps == 0 || video.fps > 240 {
            return Err(RecorderError::InvalidConfig(format!(
                "unsupported frame rate {}",
                video.fps
            )));
        }
        if video.bitrate == 0 || video.quality > 100 {
            return Err(RecorderError::InvalidConfig(format!(
                "invalid bitrate {} or quality {}",
                video.bitrate, video.quality
            )));
        }
        if video.max_frame_length_ms == 0 {
            return Err(RecorderError::InvalidConfig(
                "max frame length is zero".to_string(),
            ));
        }

        if self.records_audio() {
            self.audio
                .encoder_config()
                .validate()
                .map_err(|e| RecorderError::InvalidConfig(e.to_string()))?;
            if self.audio.output_volume < 0.0 || self.audio.input_volume < 0.0 {
                return Err(RecorderError::InvalidConfig(
                    "audio volume is negative".to_string(),
                ));
            }
        }

        if self.mouse.radius <= 0 {
            return Err(RecorderError::InvalidConfig(format!(
                "click radius {} is not positive",
                self.mouse.radius
            )));
        }

        if self.mode == RecorderMode::Video && self.snapshot.enabled && self.snapshot.interval_ms == 0
        {
            return Err(RecorderError::InvalidConfig(
                "snapshot interval is zero".to_string(),
            ));
        }

        match (&self.output, self.mode) {
            (OutputTarget::Memory, RecorderMode::Slideshow) => Err(RecorderError::InvalidConfig(
                "slideshow needs an output directory".to_string(),
            )),
            (OutputTarget::File(path), _) if path.as_os_str().is_empty() => Err(
                RecorderError::InvalidConfig("invalid output path".to_string()),
            ),
            (OutputTarget::File(path), RecorderMode::Slideshow) => {
                if path.is_file() {
                    return Err(RecorderError::InvalidConfig(format!(
                        "slideshow output {} is a file",
                        path.display()
                    )));
                }
                Ok(())
            }
            (OutputTarget::File(path), _) => match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
                    Err(RecorderError::InvalidConfig(format!(
                        "invalid output path {}",
                        path.display()
                    )))
                }
                _ => Ok(()),
            },
            (OutputTarget::Memory, _) => Ok(()),
        }
    }

    /// Generate a timestamped video path inside `dir`.
    ///
    /// # Examples
    ///
    /// ```
    /// use recorder::RecorderConfig;
    ///
    /// let path = RecorderConfig::make_filename("/home/user/recordings");
    /// // Example: "/home/user/recordings/2024-01-15_14-30-00.mp4"
    /// assert_eq!(path.extension().unwrap(), "mp4");
    /// ```
    pub fn make_filename(dir: impl AsRef<Path>) -> PathBuf {
        let mut filename = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        filename.push_str(".mp4");
        dir.as_ref().to_path_buf().join(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RecorderConfig {
        RecorderConfig::new(
            vec![RecordingSource::display("\\\\.\\DISPLAY1")],
            OutputTarget::Memory,
        )
    }

    #[test]
    fn test_validate_sources_and_video() {
        assert!(config().validate().is_ok());
        assert!(config().with_sources(vec![]).validate().is_err());

        let bad_fps = config().with_video(VideoOptions::default().with_fps(0));
        assert!(bad_fps.validate().is_err());

        let bad_quality = config().with_video(VideoOptions::default().with_quality(120));
        assert!(bad_quality.validate().is_err());
    }

    #[test]
    fn test_validate_audio_only_in_video_mode() {
        let audio = AudioOptions::default().with_sample_rate(22050);
        assert!(config().with_audio(audio.clone()).validate().is_err());
        assert!(
            config()
                .with_mode(RecorderMode::Snapshot)
                .with_audio(audio)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_validate_output() {
        assert!(
            config()
                .with_mode(RecorderMode::Slideshow)
                .validate()
                .is_err()
        );

        let missing = config().with_output(OutputTarget::File(
            "/definitely/not/a/dir/out.mp4".into(),
        ));
        assert!(missing.validate().is_err());

        let empty = config().with_output(OutputTarget::File(PathBuf::new()));
        assert!(empty.validate().is_err());

        let relative = config().with_output(OutputTarget::File("out.mp4".into()));
        assert!(relative.validate().is_ok());
    }

    #[test]
    fn test_mouse_style_fallback_colors() {
        let style = MouseOptions::default()
            .with_left_color("not a color")
            .with_right_color("#FF0000")
            .style();
        assert_eq!(style.left_color, DEFAULT_LEFT_CLICK_COLOR);
        assert_eq!(style.right_color, Color::rgba(1.0, 0.0, 0.0, 1.0));

        let style = MouseOptions::default().style();
        assert_eq!(style.left_color, DEFAULT_LEFT_CLICK_COLOR);
        assert_eq!(style.right_color, DEFAULT_RIGHT_CLICK_COLOR);
        assert_eq!(style.radius, 20);
    }

    #[test]
    fn test_from_toml() {
        let text = r#"
            mode = "Slideshow"
            output = { File = "frames" }
            image_format = "Jpeg"
            max_duration_ms = 3000

            [[sources]]
            kind = { Display = { device_name = "\\\\.\\DISPLAY2" } }
            api = "WindowsGraphicsCapture"
            capture_cursor = false
            offset = { x = 0, y = 0 }

            [video]
            fps = 60
            fixed_framerate = true

            [mouse]
            detect_clicks = true
            mode = "Hook"
        "#;

        let config = RecorderConfig::from_toml_str(text).unwrap();
        assert_eq!(config.mode, RecorderMode::Slideshow);
        assert_eq!(config.image_format, ImageFormat::Jpeg);
        assert_eq!(config.max_duration(), Some(Duration::from_millis(3000)));
        assert_eq!(config.sources.len(), 1);
        assert!(!config.sources[0].capture_cursor);
        assert_eq!(config.video.fps, 60);
        assert!(config.video.fixed_framerate);
        assert_eq!(config.video.bitrate, 9_000_000);
        assert_eq!(config.mouse.mode, ClickDetectionMode::Hook);
        assert_eq!(config.mouse.radius, 20);

        assert!(RecorderConfig::from_toml_str("mode = \"Video\"").is_err());
        assert!(RecorderConfig::from_toml_str("mode = 3").is_err());
    }

    #[test]
    fn test_encoder_configs() {
        let config = config().with_video(
            VideoOptions::default()
                .with_fps(60)
                .with_resolution(Resolution::P720),
        );
        let video = config.video_encoder_config(LogicalSize::new(2560, 1440));
        assert_eq!(video.input_size, LogicalSize::new(2560, 1440));
        assert_eq!(video.output_size, LogicalSize::new(1280, 720));
        assert_eq!(video.fps, 60);
        assert!(video.validate().is_ok());

        assert_eq!(config.video.frame_interval(), Duration::from_nanos(16_666_666));
        assert!(config.records_audio());
        assert!(!config.with_mode(RecorderMode::Snapshot).records_audio());
    }

    #[test]
    fn test_make_filename() {
        let path = RecorderConfig::make_filename("/tmp");
        assert!(path.starts_with("/tmp"));
        assert_eq!(path.extension().unwrap(), "mp4");
        assert!(!path.to_string_lossy().contains(':'));
    }
}
