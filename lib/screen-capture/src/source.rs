use crate::{CaptureError, LogicalSize, PointerSnapshot, Position, Rectangle, union_rect};
use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    /// A monitor, identified by its device name (e.g. `\\.\DISPLAY1`).
    Display { device_name: String },
    /// A top-level window, identified by its handle value.
    Window { handle: isize },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureApi {
    #[default]
    DesktopDuplication,
    WindowsGraphicsCapture,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Setters)]
#[setters(prefix = "with_")]
pub struct RecordingSource {
    #[setters(skip)]
    pub kind: SourceKind,
    pub api: CaptureApi,
    pub capture_cursor: bool,
    /// Extra offset applied on top of the source's layout position.
    pub offset: Position,
    /// Part of the source to record, in source coordinates.
    #[setters(strip_option)]
    pub source_rect: Option<Rectangle>,
}

impl RecordingSource {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            api: CaptureApi::default(),
            capture_cursor: true,
            offset: Position::default(),
            source_rect: None,
        }
    }

    pub fn display(device_name: impl Into<String>) -> Self {
        Self::new(SourceKind::Display {
            device_name: device_name.into(),
        })
    }

    pub fn window(handle: isize) -> Self {
        Self::new(SourceKind::Window { handle }).with_api(CaptureApi::WindowsGraphicsCapture)
    }

    pub fn is_window(&self) -> bool {
        matches!(self.kind, SourceKind::Window { .. })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Anchor {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlayKind {
    Image { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Setters)]
#[setters(prefix = "with_")]
pub struct OverlaySource {
    #[setters(skip)]
    pub kind: OverlayKind,
    pub anchor: Anchor,
    pub offset: Position,
    /// Drawn size, `None` keeps the image size.
    #[setters(strip_option)]
    pub size: Option<LogicalSize>,
}

impl OverlaySource {
    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: OverlayKind::Image { path: path.into() },
            anchor: Anchor::default(),
            offset: Position::default(),
            size: None,
        }
    }

    /// Where the overlay lands inside a frame of `frame` size.
    pub fn placement(&self, image: LogicalSize, frame: LogicalSize) -> Rectangle {
        let size = self.size.unwrap_or(image);
        let (x, y) = match self.anchor {
            Anchor::TopLeft => (self.offset.x, self.offset.y),
            Anchor::TopRight => (frame.width - size.width - self.offset.x, self.offset.y),
            Anchor::BottomLeft => (self.offset.x, frame.height - size.height - self.offset.y),
            Anchor::BottomRight => (
                frame.width - size.width - self.offset.x,
                frame.height - size.height - self.offset.y,
            ),
            Anchor::Center => (
                (frame.width - size.width) / 2 + self.offset.x,
                (frame.height - size.height) / 2 + self.offset.y,
            ),
        };
        Rectangle::new(x, y, size.width, size.height)
    }
}

/// A composited frame handed to the consumer, which owns (and releases) the texture.
#[derive(Debug, Clone)]
pub struct CapturedFrame<T> {
    pub texture: T,
    /// Source updates merged into this frame since the previous fetch.
    pub update_count: u32,
    pub content_size: LogicalSize,
    pub pointer: PointerSnapshot,
}

#[derive(Debug)]
pub enum AcquireOutcome<T> {
    Frame(CapturedFrame<T>),
    Timeout,
}

impl<T> AcquireOutcome<T> {
    pub fn into_frame(self) -> Option<CapturedFrame<T>> {
        match self {
            Self::Frame(frame) => Some(frame),
            Self::Timeout => None,
        }
    }
}

/// The single dispatch point between the orchestrator and a capture implementation.
pub trait CaptureSession: Send {
    type Texture: Clone + Send + 'static;

    fn start_capture(
        &mut self,
        sources: &[RecordingSource],
        overlays: &[OverlaySource],
    ) -> Result<(), CaptureError>;

    fn acquire_next_frame(
        &mut self,
        timeout_ms: u32,
    ) -> Result<AcquireOutcome<Self::Texture>, CaptureError>;

    fn stop_capture(&mut self);

    /// Size of the composited output, known once capture started.
    fn native_size(&self) -> Option<LogicalSize>;
}

/// Resolved geometry of every source inside the shared surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLayout {
    pub union: Rectangle,
    /// Destination of each source in surface coordinates, same order as the input.
    pub destinations: Vec<Rectangle>,
}

impl SourceLayout {
    pub fn surface_size(&self) -> LogicalSize {
        self.union.size()
    }
}

/// Place sources into one surface.
///
/// Displays keep their desktop position. Windows are laid out side by side
/// to the right of everything placed before them. Each source's own offset
/// is added last and the union is moved to the origin.
pub fn layout_sources(
    sources: &[RecordingSource],
    native_rects: &[Rectangle],
) -> Result<SourceLayout, CaptureError> {
    if sources.is_empty() || sources.len() != native_rects.len() {
        return Err(CaptureError::InvalidSource(
            "no valid recording sources".to_string(),
        ));
    }

    let mut placed = Vec::with_capacity(sources.len());
    let mut window_x = native_rects
        .iter()
        .zip(sources)
        .filter(|(_, s)| !s.is_window())
        .map(|(r, _)| r.right())
        .max()
        .unwrap_or(0);

    for (source, native) in sources.iter().zip(native_rects) {
        let rect = match source.source_rect {
            Some(crop) => native
                .offset(-native.x, -native.y)
                .intersect(&crop)
                .ok_or_else(|| {
                    CaptureError::InvalidSource(format!(
                        "source rect {crop:?} is outside {native:?}"
                    ))
                })?
                .offset(native.x, native.y),
            None => *native,
        };

        if rect.is_empty() {
            return Err(CaptureError::InvalidSource(format!(
                "empty source {:?}",
                source.kind
            )));
        }

        let rect = if source.is_window() {
            let placed_rect = Rectangle::new(window_x, 0, rect.width, rect.height);
            window_x += rect.width;
            placed_rect
        } else {
            rect
        };

        placed.push(rect.offset(source.offset.x, source.offset.y));
    }

    let union = union_rect(placed.iter().copied())
        .ok_or_else(|| CaptureError::InvalidSource("no valid recording sources".to_string()))?;

    Ok(SourceLayout {
        union: Rectangle::from_size(union.size()),
        destinations: placed
            .into_iter()
            .map(|r| r.offset(-union.x, -union.y))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_two_monitors() {
        let sources = [
            RecordingSource::display("\\\\.\\DISPLAY1"),
            RecordingSource::display("\\\\.\\DISPLAY2"),
        ];
        let rects = [
            Rectangle::new(-1280, 0, 1280, 1024),
            Rectangle::new(0, 0, 1920, 1080),
        ];
        let layout = layout_sources(&sources, &rects).unwrap();

        assert_eq!(layout.union, Rectangle::new(0, 0, 3200, 1080));
        assert_eq!(layout.destinations[0], Rectangle::new(0, 0, 1280, 1024));
        assert_eq!(layout.destinations[1], Rectangle::new(1280, 0, 1920, 1080));
    }

    #[test]
    fn test_layout_windows_side_by_side() {
        let sources = [
            RecordingSource::window(1),
            RecordingSource::window(2).with_offset(Position::new(0, 20)),
        ];
        let rects = [
            Rectangle::new(300, 300, 800, 600),
            Rectangle::new(50, 50, 400, 300),
        ];
        let layout = layout_sources(&sources, &rects).unwrap();

        assert_eq!(layout.destinations[0], Rectangle::new(0, 0, 800, 600));
        assert_eq!(layout.destinations[1], Rectangle::new(800, 20, 400, 300));
        assert_eq!(layout.surface_size(), LogicalSize::new(1200, 600));
    }

    #[test]
    fn test_layout_crop() {
        let sources =
            [RecordingSource::display("d").with_source_rect(Rectangle::new(100, 100, 640, 480))];
        let rects = [Rectangle::new(1920, 0, 1920, 1080)];
        let layout = layout_sources(&sources, &rects).unwrap();

        assert_eq!(layout.union, Rectangle::new(0, 0, 640, 480));
        assert_eq!(layout.destinations[0], Rectangle::new(0, 0, 640, 480));
    }

    #[test]
    fn test_layout_rejects_empty() {
        assert!(layout_sources(&[], &[]).is_err());

        let sources =
            [RecordingSource::display("d").with_source_rect(Rectangle::new(5000, 0, 10, 10))];
        assert!(layout_sources(&sources, &[Rectangle::new(0, 0, 100, 100)]).is_err());
    }

    #[test]
    fn test_overlay_placement() {
        let frame = LogicalSize::new(1920, 1080);
        let overlay = OverlaySource::image("logo.png")
            .with_anchor(Anchor::BottomRight)
            .with_offset(Position::new(10, 10));
        assert_eq!(
            overlay.placement(LogicalSize::new(100, 50), frame),
            Rectangle::new(1810, 1020, 100, 50)
        );

        let overlay = OverlaySource::image("logo.png")
            .with_anchor(Anchor::Center)
            .with_size(LogicalSize::new(200, 200));
        assert_eq!(
            overlay.placement(LogicalSize::new(100, 50), frame),
            Rectangle::new(860, 440, 200, 200)
        );
    }
}
