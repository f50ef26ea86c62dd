use crossbeam::channel::{Receiver, Sender, bounded};
use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use video_encoder::EncodedOutput;

const EVENT_CHANNEL_SIZE: usize = 128;
const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderStatus {
    Idle,
    Recording,
    Paused,
    Finalizing,
}

/// One slideshow image and how long it was on screen before the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDelay {
    pub filename: String,
    /// Milliseconds since the previous image, 0 for the first one.
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    StatusChanged(RecorderStatus),
    Completed {
        output: EncodedOutput,
        /// Only filled in slideshow mode.
        frame_delays: Vec<FrameDelay>,
    },
    Failed {
        message: String,
        encoder_failure: bool,
    },
    /// An image written while recording video.
    SnapshotCreated {
        path: PathBuf,
    },
}

impl RecorderEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Sends session events, letting exactly one terminal event through per run.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: Sender<RecorderEvent>,
    terminal_sent: Arc<AtomicBool>,
}

impl EventEmitter {
    pub fn new() -> (Self, Receiver<RecorderEvent>) {
        let (sender, receiver) = bounded(EVENT_CHANNEL_SIZE);
        (
            Self {
                sender,
                terminal_sent: Arc::new(AtomicBool::new(false)),
            },
            receiver,
        )
    }

    /// An emitter on the same channel with a fresh terminal guard.
    pub fn for_run(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            terminal_sent: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn status(&self, status: RecorderStatus) {
        self.emit(RecorderEvent::StatusChanged(status));
    }

    /// Returns `false` when the event was dropped.
    pub fn emit(&self, event: RecorderEvent) -> bool {
        if event.is_terminal() {
            return self.terminal(event);
        }

        if let Err(e) = self.sender.try_send(event) {
            log::warn!("try send recorder event failed: {e}");
            return false;
        }
        true
    }

    fn terminal(&self, event: RecorderEvent) -> bool {
        if self.terminal_sent.swap(true, Ordering::AcqRel) {
            log::warn!("drop second terminal event: {event:?}");
            return false;
        }

        if let Err(e) = self.sender.send_timeout(event, TERMINAL_SEND_TIMEOUT) {
            log::warn!("send terminal recorder event failed: {e}");
            return false;
        }
        true
    }

    pub fn terminal_sent(&self) -> bool {
        self.terminal_sent.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_terminal_event() {
        let (emitter, receiver) = EventEmitter::new();
        emitter.status(RecorderStatus::Recording);
        assert!(emitter.emit(RecorderEvent::Failed {
            message: "boom".to_string(),
            encoder_failure: false,
        }));
        assert!(!emitter.emit(RecorderEvent::Completed {
            output: EncodedOutput::Memory(vec![]),
            frame_delays: vec![],
        }));
        assert!(emitter.terminal_sent());

        let events: Vec<_> = receiver.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], RecorderEvent::StatusChanged(RecorderStatus::Recording));
        assert!(matches!(events[1], RecorderEvent::Failed { .. }));
    }

    #[test]
    fn test_for_run_resets_guard() {
        let (emitter, receiver) = EventEmitter::new();
        let done = || RecorderEvent::Completed {
            output: EncodedOutput::Memory(vec![]),
            frame_delays: vec![],
        };
        assert!(emitter.emit(done()));

        let next = emitter.for_run();
        assert!(!next.terminal_sent());
        assert!(next.emit(done()));
        assert_eq!(receiver.try_iter().count(), 2);
    }
}
