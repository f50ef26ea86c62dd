use serde::{Deserialize, Serialize};
use std::{sync::Mutex, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClickDetectionMode {
    /// Sample the button state from a low-priority thread.
    #[default]
    Polling,
    /// Install a system-wide low-level mouse hook.
    Hook,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Parse `#RRGGBB` or `#AARRGGBB`.
    pub fn parse(text: &str) -> Option<Self> {
        let hex = text.trim().strip_prefix('#')?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }

        let channel = |i: usize| -> Option<f32> {
            u8::from_str_radix(hex.get(i..i + 2)?, 16)
                .ok()
                .map(|v| v as f32 / 255.0)
        };

        match hex.len() {
            6 => Some(Self::rgba(channel(0)?, channel(2)?, channel(4)?, 1.0)),
            8 => Some(Self::rgba(channel(2)?, channel(4)?, channel(6)?, channel(0)?)),
            _ => None,
        }
    }

    pub fn parse_or(text: &str, fallback: Color) -> Self {
        Self::parse(text).unwrap_or_else(|| {
            log::warn!("invalid click color `{text}`, using fallback");
            fallback
        })
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

pub const DEFAULT_LEFT_CLICK_COLOR: Color = Color::rgba(1.0, 1.0, 0.0, 1.0);
pub const DEFAULT_RIGHT_CLICK_COLOR: Color = Color::rgba(0.0, 106.0 / 255.0, 1.0, 1.0);

/// Edge detector turning sampled button states into mouse-down events.
#[derive(Debug, Default, Clone)]
pub struct ClickDetector {
    left_down: bool,
    right_down: bool,
}

impl ClickDetector {
    pub fn sample(&mut self, left_down: bool, right_down: bool) -> Option<MouseButton> {
        let left_pressed = left_down && !self.left_down;
        let right_pressed = right_down && !self.right_down;
        self.left_down = left_down;
        self.right_down = right_down;

        if left_pressed {
            Some(MouseButton::Left)
        } else if right_pressed {
            Some(MouseButton::Right)
        } else {
            None
        }
    }
}

/// The click indicator a frame should draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveClick {
    pub button: MouseButton,
    /// Remaining share of the display duration in `(0, 1]`.
    pub strength: f32,
}

#[derive(Debug, Default)]
struct ClickInner {
    button: Option<MouseButton>,
    remaining: Duration,
}

/// Click bookkeeping shared by the detection thread and the renderer.
#[derive(Debug)]
pub struct ClickState {
    duration: Duration,
    inner: Mutex<ClickInner>,
}

impl ClickState {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            inner: Mutex::new(ClickInner::default()),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn record_click(&self, button: MouseButton) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.button = Some(button);
            inner.remaining = self.duration;
        }
    }

    /// Consume `elapsed` wall-clock time and return what is left to draw.
    pub fn advance(&self, elapsed: Duration) -> Option<ActiveClick> {
        let mut inner = self.inner.lock().ok()?;
        let button = inner.button?;

        if inner.remaining.is_zero() {
            inner.button = None;
            return None;
        }

        let strength = inner.remaining.as_secs_f32() / self.duration.as_secs_f32().max(f32::EPSILON);
        inner.remaining = inner.remaining.saturating_sub(elapsed);

        Some(ActiveClick {
            button,
            strength: strength.clamp(0.0, 1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_color() {
        let c = Color::parse("#FF8000").unwrap();
        assert_eq!(c.r, 1.0);
        assert!((c.g - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(c.b, 0.0);
        assert_eq!(c.a, 1.0);

        let c = Color::parse("#80FFFFFF").unwrap();
        assert!((c.a - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_parse_color_fallback() {
        for text in ["FF8000", "#FF80", "#GG0000", "", "#ＦＦ0000"] {
            assert_eq!(Color::parse(text), None, "{text}");
            assert_eq!(
                Color::parse_or(text, DEFAULT_LEFT_CLICK_COLOR),
                DEFAULT_LEFT_CLICK_COLOR
            );
        }
    }

    #[test]
    fn test_click_detector_reports_edges_only() {
        let mut detector = ClickDetector::default();
        assert_eq!(detector.sample(true, false), Some(MouseButton::Left));
        assert_eq!(detector.sample(true, false), None);
        assert_eq!(detector.sample(false, true), Some(MouseButton::Right));
        assert_eq!(detector.sample(false, false), None);
    }

    #[test]
    fn test_click_decays_by_elapsed_time() {
        let state = ClickState::new(Duration::from_millis(100));
        assert_eq!(state.advance(Duration::from_millis(16)), None);

        state.record_click(MouseButton::Right);
        let first = state.advance(Duration::from_millis(60)).unwrap();
        assert_eq!(first.button, MouseButton::Right);
        assert_eq!(first.strength, 1.0);

        let second = state.advance(Duration::from_millis(60)).unwrap();
        assert!((second.strength - 0.4).abs() < 1e-4);

        assert_eq!(state.advance(Duration::from_millis(16)), None);
    }
}
