use crate::{CaptureError, Position, Rectangle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerShapeType {
    Monochrome,
    Color,
    MaskedColor,
}

impl PointerShapeType {
    /// Values of `DXGI_OUTDUPL_POINTER_SHAPE_TYPE`.
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Monochrome),
            2 => Some(Self::Color),
            4 => Some(Self::MaskedColor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerShapeInfo {
    pub shape_type: PointerShapeType,
    pub width: u32,
    /// For monochrome shapes this covers both the AND and the XOR mask.
    pub height: u32,
    pub pitch: u32,
    pub hotspot: Position,
}

impl PointerShapeInfo {
    pub fn visible_height(&self) -> u32 {
        match self.shape_type {
            PointerShapeType::Monochrome => self.height / 2,
            _ => self.height,
        }
    }
}

/// One observation of the pointer made by a capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerUpdate {
    pub source_index: usize,
    /// Platform timestamp of the last mouse update, zero when none happened.
    pub timestamp: i64,
    pub visible: bool,
    /// Top-left of the shape in desktop coordinates.
    pub position: Position,
}

/// Cheap per-frame copy of the pointer fields the renderer and pacing need.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PointerSnapshot {
    pub visible: bool,
    pub position: Position,
    pub shape_generation: u64,
}

#[derive(Debug, Default)]
pub struct PointerState {
    pub visible: bool,
    pub position: Position,
    shape_buffer: Vec<u8>,
    shape_len: usize,
    shape_info: Option<PointerShapeInfo>,
    shape_generation: u64,
    last_timestamp: i64,
    last_updater: Option<usize>,
}

impl PointerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a position/visibility update.
    ///
    /// A source that did not update the position last may neither hide the
    /// pointer nor move a visible pointer with an older timestamp.
    pub fn apply_update(&mut self, update: PointerUpdate) -> bool {
        if update.timestamp == 0 {
            return false;
        }

        let other_source = self.last_updater != Some(update.source_index);

        if !update.visible && other_source {
            return false;
        }

        if update.visible && self.visible && other_source && self.last_timestamp > update.timestamp
        {
            return false;
        }

        self.position = update.position;
        self.visible = update.visible;
        self.last_timestamp = update.timestamp;
        self.last_updater = Some(update.source_index);
        true
    }

    pub fn last_updater(&self) -> Option<usize> {
        self.last_updater
    }

    /// Writable shape buffer of at least `required` bytes. Grows on demand, never shrinks.
    pub fn shape_buffer_mut(&mut self, required: usize) -> Result<&mut [u8], CaptureError> {
        if self.shape_buffer.len() < required {
            self.shape_buffer
                .try_reserve_exact(required - self.shape_buffer.len())
                .map_err(|e| CaptureError::OutOfMemory(format!("pointer shape buffer: {e}")))?;
            self.shape_buffer.resize(required, 0);
        }
        Ok(&mut self.shape_buffer[..required])
    }

    pub fn commit_shape(&mut self, info: PointerShapeInfo, len: usize) {
        self.shape_len = len.min(self.shape_buffer.len());
        self.shape_info = Some(info);
        self.shape_generation += 1;
    }

    pub fn set_shape(&mut self, info: PointerShapeInfo, data: &[u8]) -> Result<(), CaptureError> {
        self.shape_buffer_mut(data.len())?.copy_from_slice(data);
        self.commit_shape(info, data.len());
        Ok(())
    }

    pub fn shape(&self) -> Option<(&PointerShapeInfo, &[u8])> {
        self.shape_info
            .as_ref()
            .map(|info| (info, &self.shape_buffer[..self.shape_len]))
    }

    pub fn shape_capacity(&self) -> usize {
        self.shape_buffer.len()
    }

    pub fn snapshot(&self) -> PointerSnapshot {
        PointerSnapshot {
            visible: self.visible,
            position: self.position,
            shape_generation: self.shape_generation,
        }
    }
}

/// Pointer image ready to upload, pixels are straight-alpha `0xAARRGGBB`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPointer {
    pub rect: Rectangle,
    pub pixels: Vec<u32>,
}

impl DecodedPointer {
    /// Little-endian bytes of the pixels, which is B8G8R8A8 layout.
    pub fn to_bgra_bytes(&self) -> Vec<u8> {
        self.pixels.iter().flat_map(|p| p.to_le_bytes()).collect()
    }
}

/// Region of the desktop a shape at `position` covers once clipped to
/// `bounds`, plus how many shape pixels were skipped on the left and top.
pub fn clip_pointer_rect(
    info: &PointerShapeInfo,
    position: Position,
    bounds: Rectangle,
) -> Option<(Rectangle, u32, u32)> {
    let shape = Rectangle::new(
        position.x,
        position.y,
        info.width as i32,
        info.visible_height() as i32,
    );
    let clipped = shape.intersect(&bounds)?;
    Some((
        clipped,
        (clipped.x - shape.x) as u32,
        (clipped.y - shape.y) as u32,
    ))
}

/// Decode a pointer shape.
///
/// Color shapes are used as is. Monochrome and masked-color shapes are
/// combined with `background`, the desktop pixels under the clipped rect
/// returned by [`clip_pointer_rect`].
pub fn decode_pointer(
    info: &PointerShapeInfo,
    shape: &[u8],
    position: Position,
    bounds: Rectangle,
    background: &[u32],
) -> Result<DecodedPointer, CaptureError> {
    check_shape(info, shape)?;

    match info.shape_type {
        PointerShapeType::Color => decode_color(info, shape, position),
        PointerShapeType::Monochrome => {
            let Some((rect, skip_x, skip_y)) = clip_pointer_rect(info, position, bounds) else {
                return Ok(empty_pointer(position));
            };
            check_background(rect, background)?;
            decode_monochrome(info, shape, rect, skip_x, skip_y, background)
        }
        PointerShapeType::MaskedColor => {
            let Some((rect, skip_x, skip_y)) = clip_pointer_rect(info, position, bounds) else {
                return Ok(empty_pointer(position));
            };
            check_background(rect, background)?;
            decode_masked_color(info, shape, rect, skip_x, skip_y, background)
        }
    }
}

fn empty_pointer(position: Position) -> DecodedPointer {
    DecodedPointer {
        rect: Rectangle::new(position.x, position.y, 0, 0),
        pixels: vec![],
    }
}

fn check_background(rect: Rectangle, background: &[u32]) -> Result<(), CaptureError> {
    let required = (rect.width * rect.height) as usize;
    if background.len() < required {
        return Err(CaptureError::Other(format!(
            "pointer background has {} pixels, {required} required",
            background.len()
        )));
    }
    Ok(())
}

/// Every row the decoders read must lie inside `shape`.
fn check_shape(info: &PointerShapeInfo, shape: &[u8]) -> Result<(), CaptureError> {
    let row_len = match info.shape_type {
        PointerShapeType::Monochrome => (info.width as u64).div_ceil(8),
        PointerShapeType::Color | PointerShapeType::MaskedColor => info.width as u64 * 4,
    };
    if (info.pitch as u64) < row_len {
        return Err(CaptureError::Other(format!(
            "pointer shape pitch {} is below {row_len} bytes for width {}",
            info.pitch, info.width
        )));
    }

    let required = info.pitch as u64 * info.height as u64;
    if (shape.len() as u64) < required {
        return Err(CaptureError::Other(format!(
            "pointer shape has {} bytes, {required} required",
            shape.len()
        )));
    }
    Ok(())
}

fn read_u32(shape: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        shape[offset],
        shape[offset + 1],
        shape[offset + 2],
        shape[offset + 3],
    ])
}

fn decode_color(
    info: &PointerShapeInfo,
    shape: &[u8],
    position: Position,
) -> Result<DecodedPointer, CaptureError> {
    let mut pixels = Vec::with_capacity((info.width * info.height) as usize);
    for row in 0..info.height as usize {
        let start = row * info.pitch as usize;
        for col in 0..info.width as usize {
            pixels.push(read_u32(shape, start + col * 4));
        }
    }

    Ok(DecodedPointer {
        rect: Rectangle::new(
            position.x,
            position.y,
            info.width as i32,
            info.height as i32,
        ),
        pixels,
    })
}

fn decode_monochrome(
    info: &PointerShapeInfo,
    shape: &[u8],
    rect: Rectangle,
    skip_x: u32,
    skip_y: u32,
    background: &[u32],
) -> Result<DecodedPointer, CaptureError> {
    let (width, height) = (rect.width as usize, rect.height as usize);
    let pitch = info.pitch as usize;
    let xor_offset = info.visible_height() as usize;
    let mut pixels = vec![0u32; width * height];

    for row in 0..height {
        let mut mask = 0x80u8 >> (skip_x % 8);
        for col in 0..width {
            let byte = (col + skip_x as usize) / 8;
            let and_bit = shape[byte + (row + skip_y as usize) * pitch] & mask;
            let xor_bit = shape[byte + (row + skip_y as usize + xor_offset) * pitch] & mask;

            let and_mask = if and_bit != 0 { 0xFFFF_FFFF } else { 0xFF00_0000 };
            let xor_mask = if xor_bit != 0 { 0x00FF_FFFF } else { 0 };

            let index = row * width + col;
            pixels[index] = (background[index] & and_mask) ^ xor_mask;

            mask = if mask == 0x01 { 0x80 } else { mask >> 1 };
        }
    }

    Ok(DecodedPointer { rect, pixels })
}

fn decode_masked_color(
    info: &PointerShapeInfo,
    shape: &[u8],
    rect: Rectangle,
    skip_x: u32,
    skip_y: u32,
    background: &[u32],
) -> Result<DecodedPointer, CaptureError> {
    let (width, height) = (rect.width as usize, rect.height as usize);
    let pitch = info.pitch as usize;
    let mut pixels = vec![0u32; width * height];

    for row in 0..height {
        let start = (row + skip_y as usize) * pitch;
        for col in 0..width {
            let value = read_u32(shape, start + (col + skip_x as usize) * 4);
            let index = row * width + col;
            pixels[index] = if value & 0xFF00_0000 != 0 {
                (background[index] ^ value) | 0xFF00_0000
            } else {
                value | 0xFF00_0000
            };
        }
    }

    Ok(DecodedPointer { rect, pixels })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAY: u32 = 0xFF80_8080;

    fn update(source_index: usize, timestamp: i64, visible: bool, x: i32) -> PointerUpdate {
        PointerUpdate {
            source_index,
            timestamp,
            visible,
            position: Position::new(x, 0),
        }
    }

    /// Bit-pack AND/XOR masks, row-major, one bit per pixel.
    fn encode_monochrome(and: &[bool], xor: &[bool], width: usize, height: usize) -> Vec<u8> {
        let pitch = width.div_ceil(8);
        let mut shape = vec![0u8; pitch * height * 2];
        for row in 0..height {
            for col in 0..width {
                let bit = 0x80u8 >> (col % 8);
                if and[row * width + col] {
                    shape[row * pitch + col / 8] |= bit;
                }
                if xor[row * width + col] {
                    shape[(row + height) * pitch + col / 8] |= bit;
                }
            }
        }
        shape
    }

    /// Recover AND/XOR bits from pixels decoded over a gray background.
    fn reencode_from_gray(pixels: &[u32]) -> (Vec<bool>, Vec<bool>) {
        pixels
            .iter()
            .map(|&p| match p {
                0xFF00_0000 => (false, false),
                0xFFFF_FFFF => (false, true),
                GRAY => (true, false),
                0xFF7F_7F7F => (true, true),
                other => panic!("unexpected pixel {other:08X}"),
            })
            .unzip()
    }

    #[test]
    fn test_hidden_by_other_source_is_ignored() {
        let mut state = PointerState::new();
        assert!(state.apply_update(update(0, 10, true, 5)));
        assert!(!state.apply_update(update(1, 20, false, 0)));
        assert!(state.visible);
        assert_eq!(state.last_updater(), Some(0));

        assert!(state.apply_update(update(0, 30, false, 0)));
        assert!(!state.visible);
    }

    #[test]
    fn test_older_update_from_other_source_is_ignored() {
        let mut state = PointerState::new();
        assert!(state.apply_update(update(0, 100, true, 5)));
        assert!(!state.apply_update(update(1, 50, true, 9)));
        assert_eq!(state.position.x, 5);

        assert!(state.apply_update(update(1, 150, true, 9)));
        assert_eq!(state.position.x, 9);
        assert_eq!(state.last_updater(), Some(1));
    }

    #[test]
    fn test_zero_timestamp_is_no_update() {
        let mut state = PointerState::new();
        assert!(!state.apply_update(update(0, 0, true, 5)));
        assert_eq!(state.last_updater(), None);
    }

    #[test]
    fn test_shape_buffer_never_shrinks() {
        let info = PointerShapeInfo {
            shape_type: PointerShapeType::Color,
            width: 2,
            height: 2,
            pitch: 8,
            hotspot: Position::default(),
        };
        let mut state = PointerState::new();
        state.set_shape(info, &[1u8; 64]).unwrap();
        state.set_shape(info, &[2u8; 16]).unwrap();

        assert_eq!(state.shape_capacity(), 64);
        assert_eq!(state.shape().unwrap().1, &[2u8; 16]);
        assert_eq!(state.snapshot().shape_generation, 2);
    }

    #[test]
    fn test_decode_color_honours_pitch() {
        let info = PointerShapeInfo {
            shape_type: PointerShapeType::Color,
            width: 1,
            height: 2,
            pitch: 8,
            hotspot: Position::default(),
        };
        let shape = [1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8, 0, 0, 0, 0];
        let decoded = decode_pointer(
            &info,
            &shape,
            Position::new(3, 4),
            Rectangle::new(0, 0, 10, 10),
            &[],
        )
        .unwrap();

        assert_eq!(decoded.rect, Rectangle::new(3, 4, 1, 2));
        assert_eq!(decoded.pixels, vec![0x0403_0201, 0x0807_0605]);
    }

    #[test]
    fn test_short_shape_is_rejected() {
        let info = PointerShapeInfo {
            shape_type: PointerShapeType::MaskedColor,
            width: 2,
            height: 2,
            pitch: 8,
            hotspot: Position::default(),
        };
        let bounds = Rectangle::new(0, 0, 10, 10);
        let background = [GRAY; 4];

        let result = decode_pointer(&info, &[0; 12], Position::default(), bounds, &background);
        assert!(matches!(result, Err(CaptureError::Other(_))));
        assert!(decode_pointer(&info, &[0; 16], Position::default(), bounds, &background).is_ok());
    }

    #[test]
    fn test_narrow_pitch_is_rejected() {
        let color = PointerShapeInfo {
            shape_type: PointerShapeType::Color,
            width: 4,
            height: 1,
            pitch: 8,
            hotspot: Position::default(),
        };
        let bounds = Rectangle::new(0, 0, 10, 10);
        let result = decode_pointer(&color, &[0; 64], Position::default(), bounds, &[]);
        assert!(matches!(result, Err(CaptureError::Other(_))));

        let monochrome = PointerShapeInfo {
            shape_type: PointerShapeType::Monochrome,
            width: 9,
            height: 2,
            pitch: 1,
            hotspot: Position::default(),
        };
        let result = decode_pointer(&monochrome, &[0; 64], Position::default(), bounds, &[GRAY; 9]);
        assert!(matches!(result, Err(CaptureError::Other(_))));
    }

    #[test]
    fn test_monochrome_round_trip() {
        let (width, height) = (11, 3);
        let and: Vec<bool> = (0..width * height).map(|i| i % 3 == 0).collect();
        let xor: Vec<bool> = (0..width * height).map(|i| i % 5 < 2).collect();
        let shape = encode_monochrome(&and, &xor, width, height);
        let info = PointerShapeInfo {
            shape_type: PointerShapeType::Monochrome,
            width: width as u32,
            height: height as u32 * 2,
            pitch: width.div_ceil(8) as u32,
            hotspot: Position::default(),
        };

        let background = vec![GRAY; width * height];
        let decoded = decode_pointer(
            &info,
            &shape,
            Position::new(0, 0),
            Rectangle::new(0, 0, 100, 100),
            &background,
        )
        .unwrap();

        let (and2, xor2) = reencode_from_gray(&decoded.pixels);
        assert_eq!(and2, and);
        assert_eq!(xor2, xor);
        assert_eq!(encode_monochrome(&and2, &xor2, width, height), shape);
    }

    #[test]
    fn test_monochrome_clipped_at_desktop_edge() {
        let (width, height) = (16, 2);
        let and: Vec<bool> = (0..width * height).map(|i| i % 2 == 0).collect();
        let xor = vec![false; width * height];
        let shape = encode_monochrome(&and, &xor, width, height);
        let info = PointerShapeInfo {
            shape_type: PointerShapeType::Monochrome,
            width: width as u32,
            height: height as u32 * 2,
            pitch: 2,
            hotspot: Position::default(),
        };

        // 5 columns hang off the left edge
        let bounds = Rectangle::new(0, 0, 100, 100);
        let position = Position::new(-5, 0);
        let (rect, skip_x, _) = clip_pointer_rect(&info, position, bounds).unwrap();
        assert_eq!(rect, Rectangle::new(0, 0, 11, 2));
        assert_eq!(skip_x, 5);

        let background = vec![GRAY; 22];
        let decoded = decode_pointer(&info, &shape, position, bounds, &background).unwrap();
        let (and2, _) = reencode_from_gray(&decoded.pixels);
        for row in 0..height {
            for col in 0..11 {
                assert_eq!(and2[row * 11 + col], and[row * width + col + 5]);
            }
        }
    }

    #[test]
    fn test_masked_color_xors_with_background() {
        let info = PointerShapeInfo {
            shape_type: PointerShapeType::MaskedColor,
            width: 2,
            height: 1,
            pitch: 8,
            hotspot: Position::default(),
        };
        let mut shape = vec![];
        shape.extend_from_slice(&0xFF00_00FFu32.to_le_bytes());
        shape.extend_from_slice(&0x0012_3456u32.to_le_bytes());

        let decoded = decode_pointer(
            &info,
            &shape,
            Position::default(),
            Rectangle::new(0, 0, 10, 10),
            &[GRAY, GRAY],
        )
        .unwrap();

        assert_eq!(decoded.pixels, vec![0xFF80_807F, 0xFF12_3456]);
    }

    #[test]
    fn test_pointer_outside_desktop_is_empty() {
        let info = PointerShapeInfo {
            shape_type: PointerShapeType::Monochrome,
            width: 8,
            height: 16,
            pitch: 1,
            hotspot: Position::default(),
        };
        let decoded = decode_pointer(
            &info,
            &[0u8; 16],
            Position::new(200, 200),
            Rectangle::new(0, 0, 100, 100),
            &[],
        )
        .unwrap();
        assert!(decoded.pixels.is_empty());
    }
}
