//! Per-session shared objects, handed to every component at construction.

use screen_capture::{ClickState, PointerState, SharedPointer};
use spin_sleep::SpinSleeper;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

/// Monotonic time source of a session.
pub trait Clock: Send + Sync {
    /// Time since the clock was created.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

pub struct SystemClock {
    epoch: Instant,
    sleeper: SpinSleeper,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            epoch: Instant::now(),
            sleeper: SpinSleeper::default(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeper.sleep(duration);
    }
}

/// A clock that only moves when slept on or advanced.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += duration;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.lock().map(|now| *now).unwrap_or_default()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Cooperative cancellation flag checked at every loop head.
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// The raw flag, for threads that take a stop signal.
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }
}

#[derive(Clone)]
pub struct SessionContext {
    /// Tags the log lines of one recording.
    pub session_id: String,
    pub cancel: CancelToken,
    pub clicks: Arc<ClickState>,
    pub pointer: SharedPointer,
    pub clock: Arc<dyn Clock>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, click_duration: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            session_id: session_id.into(),
            cancel: CancelToken::new(),
            clicks: Arc::new(ClickState::new(click_duration)),
            pointer: Arc::new(Mutex::new(PointerState::new())),
            clock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_moves_on_sleep() {
        let clock = ManualClock::default();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.sleep(Duration::from_millis(5));
        clock.advance(Duration::from_millis(10));
        assert_eq!(clock.now(), Duration::from_millis(15));
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let flag = token.flag();
        token.clone().cancel();
        assert!(token.is_cancelled());
        assert!(flag.load(Ordering::Relaxed));
    }
}
