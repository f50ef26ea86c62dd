/// A frame read back to system memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub width: u32,
    pub height: u32,

    /// Raw pixel data in RGBA format
    pub pixel_data: Vec<u8>,
}

impl Capture {
    /// Build from mapped B8G8R8A8 rows, `pitch` being the row stride in bytes.
    pub fn from_bgra(width: u32, height: u32, pitch: usize, data: &[u8]) -> Option<Self> {
        let row_bytes = width as usize * 4;
        if pitch < row_bytes || data.len() < pitch * (height as usize).saturating_sub(1) + row_bytes
        {
            return None;
        }

        let mut pixel_data = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let line = &data[row * pitch..row * pitch + row_bytes];
            for px in line.chunks_exact(4) {
                pixel_data.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
            }
        }

        Some(Self {
            width,
            height,
            pixel_data,
        })
    }

    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel_data: [0, 0, 0, 255].repeat(width as usize * height as usize),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bgra_with_padding() {
        let data = [
            1, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0, //
            9, 10, 11, 12, 13, 14, 15, 16,
        ];
        let capture = Capture::from_bgra(2, 2, 12, &data).unwrap();
        assert_eq!(
            capture.pixel_data,
            vec![3, 2, 1, 4, 7, 6, 5, 8, 11, 10, 9, 12, 15, 14, 13, 16]
        );
        assert!(Capture::from_bgra(2, 2, 12, &data[..19]).is_none());
    }

    #[test]
    fn test_blank_is_opaque_black() {
        let capture = Capture::blank(2, 1);
        assert_eq!(capture.pixel_data, vec![0, 0, 0, 255, 0, 0, 0, 255]);
    }
}
