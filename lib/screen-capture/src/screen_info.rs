use crate::{LogicalSize, Rectangle, Rotation};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum ScreenInfoError {
    #[error("{0}")]
    Platform(String),

    #[error("{0}")]
    Unimplemented(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenInfo {
    /// Device name of the output (e.g. `\\.\DISPLAY1`)
    pub name: String,

    /// Human readable adapter name
    pub adapter_name: String,

    /// Position and size of the output in desktop coordinates
    pub rect: Rectangle,

    /// Rotation of the scan-out relative to the desktop
    pub rotation: Rotation,

    pub primary: bool,

    pub adapter_index: u32,
    pub output_index: u32,
}

impl ScreenInfo {
    pub fn logical_size(&self) -> LogicalSize {
        self.rect.size()
    }

    /// Size of the duplicated texture, which is not rotated.
    pub fn texture_size(&self) -> LogicalSize {
        self.rotation.rotated_size(self.rect.size())
    }
}

pub fn find_screen<'a>(screens: &'a [ScreenInfo], name: &str) -> Option<&'a ScreenInfo> {
    if name.is_empty() {
        return screens.iter().find(|s| s.primary).or_else(|| screens.first());
    }
    screens.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screens() -> Vec<ScreenInfo> {
        vec![
            ScreenInfo {
                name: "\\\\.\\DISPLAY1".to_string(),
                rect: Rectangle::new(0, 0, 1080, 1920),
                rotation: Rotation::Rotate90,
                ..Default::default()
            },
            ScreenInfo {
                name: "\\\\.\\DISPLAY2".to_string(),
                rect: Rectangle::new(1080, 0, 2560, 1440),
                primary: true,
                output_index: 1,
                ..Default::default()
            },
        ]
    }

    #[test]
    fn test_find_screen() {
        let screens = screens();
        assert_eq!(find_screen(&screens, "").unwrap().output_index, 1);
        assert_eq!(
            find_screen(&screens, "\\\\.\\display1").unwrap().rotation,
            Rotation::Rotate90
        );
        assert!(find_screen(&screens, "\\\\.\\DISPLAY9").is_none());
    }

    #[test]
    fn test_texture_size_is_unrotated() {
        let screens = screens();
        assert_eq!(screens[0].texture_size(), LogicalSize::new(1920, 1080));
        assert_eq!(screens[1].texture_size(), LogicalSize::new(2560, 1440));
    }
}
