use screen_capture::LogicalSize;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoded video resolution.
///
/// When a resolution other than `Original` is selected, the composited
/// frames are scaled by the encoder's video processor to fit inside the
/// target dimensions while keeping their aspect ratio.
///
/// # Examples
///
/// ```
/// use recorder::Resolution;
/// use screen_capture::LogicalSize;
///
/// let size = Resolution::P720.dimensions(LogicalSize::new(1920, 1080));
/// assert_eq!(size, LogicalSize::new(1280, 720));
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Keep the composited size, rounded down to even dimensions
    #[default]
    Original,
    /// 480p resolution (640x480 pixels)
    P480,
    /// 720p resolution (1280x720 pixels)
    P720,
    /// 1080p resolution (1920x1080 pixels)
    P1080,
    /// 2K resolution (2560x1440 pixels)
    P2K,
    /// 4K resolution (3840x2160 pixels)
    P4K,
}

impl Resolution {
    /// Calculate the encoder output size for a composited size.
    ///
    /// The result always has even, non-zero dimensions since the H.264
    /// encoder rejects odd frame sizes.
    ///
    /// # Examples
    ///
    /// ```
    /// use recorder::Resolution;
    /// use screen_capture::LogicalSize;
    ///
    /// let size = Resolution::P1080.dimensions(LogicalSize::new(2560, 1440));
    /// assert_eq!(size, LogicalSize::new(1920, 1080));
    ///
    /// let size = Resolution::Original.dimensions(LogicalSize::new(1921, 1081));
    /// assert_eq!(size, LogicalSize::new(1920, 1080));
    /// ```
    pub fn dimensions(&self, original: LogicalSize) -> LogicalSize {
        let size = match self.to_dimension() {
            None => original,
            Some(target) => Self::calculate_scaled_dimensions(original, target),
        };
        LogicalSize::new(even(size.width), even(size.height))
    }

    /// Calculate scaled dimensions while preserving aspect ratio.
    ///
    /// # Arguments
    ///
    /// * `original` - Composited size
    /// * `target` - Bounding size of the preset
    ///
    /// # Returns
    ///
    /// Scaled dimensions that fit within the target while preserving aspect ratio.
    fn calculate_scaled_dimensions(original: LogicalSize, target: LogicalSize) -> LogicalSize {
        if original.is_empty() {
            return target;
        }

        let original_ratio = original.width as f64 / original.height as f64;
        let target_ratio = target.width as f64 / target.height as f64;

        if original_ratio > target_ratio {
            // Original image is wider, scale based on width
            let height = (target.width as f64 / original_ratio).round() as i32;
            LogicalSize::new(target.width, height.max(2))
        } else {
            // Original image is taller, scale based on height
            let width = (target.height as f64 * original_ratio).round() as i32;
            LogicalSize::new(width.max(2), target.height)
        }
    }

    /// Check if the encoder has to scale frames of the given size.
    ///
    /// # Examples
    ///
    /// ```
    /// use recorder::Resolution;
    /// use screen_capture::LogicalSize;
    ///
    /// assert!(Resolution::P1080.needs_scaling(LogicalSize::new(2560, 1440)));
    /// assert!(!Resolution::P1080.needs_scaling(LogicalSize::new(1920, 1080)));
    /// assert!(!Resolution::Original.needs_scaling(LogicalSize::new(2560, 1440)));
    /// ```
    pub fn needs_scaling(&self, original: LogicalSize) -> bool {
        self.dimensions(original) != original
    }

    /// Standard dimensions of the preset, `None` for [`Resolution::Original`].
    pub fn to_dimension(&self) -> Option<LogicalSize> {
        let (width, height) = match self {
            Resolution::Original => return None,
            Resolution::P4K => (3840, 2160),
            Resolution::P2K => (2560, 1440),
            Resolution::P1080 => (1920, 1080),
            Resolution::P720 => (1280, 720),
            Resolution::P480 => (640, 480),
        };
        Some(LogicalSize::new(width, height))
    }
}

fn even(value: i32) -> i32 {
    (value - value % 2).max(2)
}

impl fmt::Display for Resolution {
    /// Format the resolution for display purposes.
    ///
    /// # Examples
    ///
    /// ```
    /// use recorder::Resolution;
    ///
    /// assert_eq!(Resolution::P1080.to_string(), "1080p (1920x1080)");
    /// assert_eq!(Resolution::Original.to_string(), "Original");
    /// ```
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Original => write!(f, "Original"),
            Resolution::P480 => write!(f, "480p (640x480)"),
            Resolution::P720 => write!(f, "720p (1280x720)"),
            Resolution::P1080 => write!(f, "1080p (1920x1080)"),
            Resolution::P2K => write!(f, "2K (2560x1440)"),
            Resolution::P4K => write!(f, "4K (3840x2160)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_dimensions() {
        let size = Resolution::P720.dimensions(LogicalSize::new(1920, 1080));
        assert_eq!(size, LogicalSize::new(1280, 720));

        let size = Resolution::P1080.dimensions(LogicalSize::new(2560, 1440));
        assert_eq!(size, LogicalSize::new(1920, 1080));
    }

    #[test]
    fn test_aspect_ratio_preservation() {
        // 16:9 original image
        let size = Resolution::P720.dimensions(LogicalSize::new(1920, 1080));
        let ratio = size.width as f64 / size.height as f64;
        assert!((ratio - 16.0 / 9.0).abs() < 0.01);

        // 4:3 original image
        let size = Resolution::P720.dimensions(LogicalSize::new(1024, 768));
        let ratio = size.width as f64 / size.height as f64;
        assert!((ratio - 4.0 / 3.0).abs() < 0.01);
    }

    #[test]
    fn test_dimensions_are_even() {
        // Two side-by-side windows of odd width.
        let size = Resolution::P1080.dimensions(LogicalSize::new(1601, 600));
        assert_eq!(size.width % 2, 0);
        assert_eq!(size.height % 2, 0);

        let size = Resolution::Original.dimensions(LogicalSize::new(3, 1));
        assert_eq!(size, LogicalSize::new(2, 2));
    }

    #[test]
    fn test_needs_scaling() {
        assert!(Resolution::P720.needs_scaling(LogicalSize::new(1920, 1080)));
        assert!(!Resolution::P720.needs_scaling(LogicalSize::new(1280, 720)));
        assert!(!Resolution::Original.needs_scaling(LogicalSize::new(1920, 1080)));
        assert!(Resolution::Original.needs_scaling(LogicalSize::new(1919, 1080)));
    }
}
