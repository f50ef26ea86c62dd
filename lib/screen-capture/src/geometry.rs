use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalSize {
    pub width: i32,
    pub height: i32,
}

impl LogicalSize {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rectangle {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_ltrb(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self::new(left, top, right - left, bottom - top)
    }

    pub fn from_size(size: LogicalSize) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn size(&self) -> LogicalSize {
        LogicalSize::new(self.width, self.height)
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn offset(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    pub fn union(&self, other: &Rectangle) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }

        Self::from_ltrb(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    pub fn intersect(&self, other: &Rectangle) -> Option<Self> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        if right <= left || bottom <= top {
            return None;
        }

        Some(Self::from_ltrb(left, top, right, bottom))
    }

    pub fn contains(&self, other: &Rectangle) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

impl From<Rectangle> for LogicalSize {
    fn from(value: Rectangle) -> Self {
        value.size()
    }
}

/// Bounding rectangle of every non-empty input, `None` when there is none.
pub fn union_rect(rects: impl IntoIterator<Item = Rectangle>) -> Option<Rectangle> {
    rects
        .into_iter()
        .filter(|r| !r.is_empty())
        .reduce(|acc, r| acc.union(&r))
}

/// A region that moved without changing content, in source texture space.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MoveRect {
    pub source: Position,
    pub destination: Rectangle,
}

impl MoveRect {
    pub fn source_rect(&self) -> Rectangle {
        Rectangle::new(
            self.source.x,
            self.source.y,
            self.destination.width,
            self.destination.height,
        )
    }
}

/// Rotation of the captured texture relative to the logical desktop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
}

/// `x' = a*x + b*y + cw*W + ch*H`, `y' = d*x + e*y + fw*W + fh*H`
/// where `W`/`H` are the source texture dimensions.
#[derive(Debug, Clone, Copy)]
struct AffineRow {
    x: i32,
    y: i32,
    w: i32,
    h: i32,
}

const ROTATION_TABLE: [[AffineRow; 2]; 4] = [
    // Identity
    [
        AffineRow { x: 1, y: 0, w: 0, h: 0 },
        AffineRow { x: 0, y: 1, w: 0, h: 0 },
    ],
    // Rotate90
    [
        AffineRow { x: 0, y: -1, w: 0, h: 1 },
        AffineRow { x: 1, y: 0, w: 0, h: 0 },
    ],
    // Rotate180
    [
        AffineRow { x: -1, y: 0, w: 1, h: 0 },
        AffineRow { x: 0, y: -1, w: 0, h: 1 },
    ],
    // Rotate270
    [
        AffineRow { x: 0, y: 1, w: 0, h: 0 },
        AffineRow { x: -1, y: 0, w: 1, h: 0 },
    ],
];

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::Identity,
        Rotation::Rotate90,
        Rotation::Rotate180,
        Rotation::Rotate270,
    ];

    fn index(self) -> usize {
        match self {
            Rotation::Identity => 0,
            Rotation::Rotate90 => 1,
            Rotation::Rotate180 => 2,
            Rotation::Rotate270 => 3,
        }
    }

    pub fn degrees(self) -> u32 {
        self.index() as u32 * 90
    }

    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Rotation::Identity),
            90 => Some(Rotation::Rotate90),
            180 => Some(Rotation::Rotate180),
            270 => Some(Rotation::Rotate270),
            _ => None,
        }
    }

    pub fn inverse(self) -> Self {
        match self {
            Rotation::Identity => Rotation::Identity,
            Rotation::Rotate90 => Rotation::Rotate270,
            Rotation::Rotate180 => Rotation::Rotate180,
            Rotation::Rotate270 => Rotation::Rotate90,
        }
    }

    pub fn is_transposed(self) -> bool {
        matches!(self, Rotation::Rotate90 | Rotation::Rotate270)
    }

    /// Size of a source texture once rotated into desktop orientation.
    pub fn rotated_size(self, size: LogicalSize) -> LogicalSize {
        if self.is_transposed() {
            LogicalSize::new(size.height, size.width)
        } else {
            size
        }
    }

    fn map_point(self, x: i32, y: i32, source_size: LogicalSize) -> (i32, i32) {
        let [rx, ry] = ROTATION_TABLE[self.index()];
        let (w, h) = (source_size.width, source_size.height);
        (
            rx.x * x + rx.y * y + rx.w * w + rx.h * h,
            ry.x * x + ry.y * y + ry.w * w + ry.h * h,
        )
    }

    /// Transform a rectangle from source texture space into desktop space.
    pub fn to_desktop(self, rect: Rectangle, source_size: LogicalSize) -> Rectangle {
        let (x0, y0) = self.map_point(rect.x, rect.y, source_size);
        let (x1, y1) = self.map_point(rect.right(), rect.bottom(), source_size);
        Rectangle::from_ltrb(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// Transform a rectangle from desktop space back into source texture space.
    pub fn to_source(self, rect: Rectangle, source_size: LogicalSize) -> Rectangle {
        self.inverse().to_desktop(rect, self.rotated_size(source_size))
    }

    /// Source and destination of a move rectangle, both in desktop space.
    pub fn move_to_desktop(self, mv: &MoveRect, source_size: LogicalSize) -> (Rectangle, Rectangle) {
        (
            self.to_desktop(mv.source_rect(), source_size),
            self.to_desktop(mv.destination, source_size),
        )
    }
}
