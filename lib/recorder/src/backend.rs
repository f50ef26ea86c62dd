//! The platform seam of a recording session.
//!
//! The orchestrator only talks to a capture session, an encoder sink and
//! audio devices through these traits, so a session can be driven by the
//! Windows stack or by an in-process fake.

#[cfg(target_os = "windows")]
mod backend_windows;

#[cfg(target_os = "windows")]
pub use backend_windows::{WindowsRecordingBackend, WindowsSink};

use crate::{AudioCaptureDevice, AudioDirection, CancelToken, MouseStyle, Result, SessionContext};
use screen_capture::{
    ActiveClick, Capture, CaptureError, CaptureSession, ClickDetectionMode, ClickState,
    LogicalSize, MouseButton, PointerState, Position, Rectangle,
};
use std::{sync::Arc, thread::JoinHandle};
use video_encoder::{AudioEncoderConfig, EncoderSink, OutputTarget, VideoEncoderConfig};

/// Drawing and readback on frames of a capture session.
pub trait FrameRenderer {
    type Texture;

    /// Draw the click indicator, then the pointer, onto `frame`.
    fn draw_pointer(
        &self,
        frame: &Self::Texture,
        pointer: &PointerState,
        click: Option<ActiveClick>,
        style: &MouseStyle,
    ) -> std::result::Result<(), CaptureError>;

    fn read_image(&self, frame: &Self::Texture) -> std::result::Result<Capture, CaptureError>;

    /// An opaque black frame, fed to the encoder while capture recovers.
    fn blank_frame(&self, size: LogicalSize) -> std::result::Result<Self::Texture, CaptureError>;

    /// A `size` frame holding `frame` scaled to fit, letterboxed in black.
    fn fit_frame(
        &self,
        frame: &Self::Texture,
        size: LogicalSize,
    ) -> std::result::Result<Self::Texture, CaptureError>;
}

pub trait RecordingBackend: Send + Sync + 'static {
    type Texture: Clone + Send + 'static;
    type Capture: CaptureSession<Texture = Self::Texture> + FrameRenderer<Texture = Self::Texture>;
    type Sink: EncoderSink<Texture = Self::Texture>;
    type Audio: AudioCaptureDevice;
    /// Held by the orchestrator thread for its whole life.
    type ThreadGuard;

    fn attach_thread(&self) -> Result<Self::ThreadGuard>;

    fn create_capture(&self, ctx: &SessionContext) -> Result<Self::Capture>;

    fn create_sink(
        &self,
        capture: &Self::Capture,
        video: &VideoEncoderConfig,
        audio: Option<&AudioEncoderConfig>,
        target: OutputTarget,
    ) -> Result<Self::Sink>;

    fn create_audio_device(&self, direction: AudioDirection, device_id: &str)
    -> Result<Self::Audio>;

    /// Start feeding `clicks` until `cancel` fires. `None` when clicks can not be detected.
    fn spawn_click_detector(
        &self,
        _mode: ClickDetectionMode,
        _clicks: Arc<ClickState>,
        _cancel: &CancelToken,
    ) -> Option<JoinHandle<()>> {
        None
    }
}

/// Where a click indicator is centered: the pointer's hotspot.
pub fn click_center(pointer: &PointerState) -> Position {
    let hotspot = pointer
        .shape()
        .map(|(info, _)| info.hotspot)
        .unwrap_or_default();
    Position::new(pointer.position.x + hotspot.x, pointer.position.y + hotspot.y)
}

pub fn click_color(style: &MouseStyle, click: &ActiveClick) -> screen_capture::Color {
    match click.button {
        MouseButton::Left => style.left_color,
        MouseButton::Right => style.right_color,
    }
}

/// The largest rectangle with the aspect ratio of `content` centered in `into`.
pub fn fit_rect(content: LogicalSize, into: LogicalSize) -> Rectangle {
    if content.is_empty() || into.is_empty() {
        return Rectangle::new(0, 0, into.width.max(0), into.height.max(0));
    }

    let (cw, ch) = (content.width as i64, content.height as i64);
    let (iw, ih) = (into.width as i64, into.height as i64);
    let (width, height) = if cw * ih > ch * iw {
        (iw, (ch * iw / cw).max(1))
    } else {
        ((cw * ih / ch).max(1), ih)
    };

    Rectangle::new(
        ((iw - width) / 2) as i32,
        ((ih - height) / 2) as i32,
        width as i32,
        height as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MouseOptions;
    use screen_capture::{PointerShapeInfo, PointerShapeType};

    #[test]
    fn test_click_center_uses_hotspot() {
        let mut pointer = PointerState::new();
        pointer.position = Position::new(100, 50);
        assert_eq!(click_center(&pointer), Position::new(100, 50));

        let info = PointerShapeInfo {
            shape_type: PointerShapeType::Color,
            width: 1,
            height: 1,
            pitch: 4,
            hotspot: Position::new(3, 4),
        };
        pointer.set_shape(info, &[0, 0, 0, 0xFF]).unwrap();
        assert_eq!(click_center(&pointer), Position::new(103, 54));
    }

    #[test]
    fn test_fit_rect_letterboxes() {
        let into = LogicalSize::new(8, 6);
        assert_eq!(fit_rect(LogicalSize::new(8, 6), into), Rectangle::new(0, 0, 8, 6));
        assert_eq!(fit_rect(LogicalSize::new(16, 12), into), Rectangle::new(0, 0, 8, 6));
        assert_eq!(fit_rect(LogicalSize::new(6, 8), into), Rectangle::new(2, 0, 4, 6));
        assert_eq!(fit_rect(LogicalSize::new(16, 6), into), Rectangle::new(0, 2, 8, 3));
    }

    #[test]
    fn test_click_color_by_button() {
        let style = MouseOptions::default().style();
        let left = ActiveClick {
            button: MouseButton::Left,
            strength: 1.0,
        };
        let right = ActiveClick {
            button: MouseButton::Right,
            strength: 0.5,
        };
        assert_eq!(click_color(&style, &left), style.left_color);
        assert_eq!(click_color(&style, &right), style.right_color);
    }
}
