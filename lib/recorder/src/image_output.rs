//! Still images written by the slideshow and snapshot modes.

use crate::{ImageFormat, RecorderError, Result};
use chrono::Local;
use image::{DynamicImage, RgbaImage};
use screen_capture::Capture;
use std::{
    io::Cursor,
    path::{Path, PathBuf},
    time::Duration,
};

fn to_dynamic(capture: &Capture, format: ImageFormat) -> Result<DynamicImage> {
    let image = RgbaImage::from_raw(capture.width, capture.height, capture.pixel_data.clone())
        .ok_or_else(|| {
            RecorderError::Other(format!(
                "frame buffer does not match {}x{}",
                capture.width, capture.height
            ))
        })?;

    // JPEG has no alpha channel.
    Ok(match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image).to_rgb8()),
        _ => DynamicImage::ImageRgba8(image),
    })
}

pub fn save_capture(capture: &Capture, path: &Path, format: ImageFormat) -> Result<()> {
    to_dynamic(capture, format)?.save_with_format(path, format.to_image_format())?;
    Ok(())
}

pub fn encode_capture(capture: &Capture, format: ImageFormat) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(vec![]);
    to_dynamic(capture, format)?.write_to(&mut buffer, format.to_image_format())?;
    Ok(buffer.into_inner())
}

/// `00000.png`, `00001.png`, ...
pub fn slideshow_filename(index: usize, format: ImageFormat) -> String {
    format!("{index:05}.{}", format.extension())
}

/// Timestamped path for a snapshot taken while recording video.
/// Names a video snapshot by wall-clock date and its offset into the recording.
pub fn snapshot_path(dir: &Path, media: Duration, format: ImageFormat) -> PathBuf {
    let date = Local::now().format("%Y-%m-%d_%H-%M-%S");
    dir.join(format!(
        "snapshot_{date}_{:08}.{}",
        media.as_millis(),
        format.extension()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slideshow_filename() {
        assert_eq!(slideshow_filename(0, ImageFormat::Png), "00000.png");
        assert_eq!(slideshow_filename(42, ImageFormat::Jpeg), "00042.jpg");
    }

    #[test]
    fn test_snapshot_path_carries_offset() {
        let path = snapshot_path(Path::new("shots"), Duration::from_millis(1500), ImageFormat::Jpeg);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("snapshot_"));
        assert!(name.ends_with("_00001500.jpg"), "{name}");
        assert_eq!(path.parent(), Some(Path::new("shots")));
    }

    #[test]
    fn test_encode_formats() {
        let capture = Capture::blank(4, 2);
        for format in [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Bmp] {
            let bytes = encode_capture(&capture, format).unwrap();
            let decoded = image::load_from_memory_with_format(&bytes, format.to_image_format())
                .unwrap();
            assert_eq!((decoded.width(), decoded.height()), (4, 2), "{format:?}");
        }
    }

    #[test]
    fn test_mismatched_buffer_is_rejected() {
        let mut capture = Capture::blank(4, 2);
        capture.pixel_data.truncate(4);
        assert!(encode_capture(&capture, ImageFormat::Png).is_err());
    }

    #[test]
    fn test_save_capture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.bmp");
        save_capture(&Capture::blank(3, 3), &path, ImageFormat::Bmp).unwrap();
        assert!(path.is_file());
    }
}
