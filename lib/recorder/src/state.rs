use crate::{RecorderError, RecorderStatus, Result};
use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    #[default]
    Idle,
    Recording,
    Paused,
    Finalizing,
    Failed,
}

impl RecorderState {
    pub fn can_transition(self, to: RecorderState) -> bool {
        use RecorderState::*;

        matches!(
            (self, to),
            (Idle, Recording)
                | (Recording, Paused)
                | (Paused, Recording)
                | (Recording | Paused, Finalizing)
                | (Finalizing, Idle)
                | (Recording | Paused | Finalizing, Failed)
                | (Failed, Idle)
        )
    }

    /// `None` for [`RecorderState::Failed`], which is reported by the failure event.
    pub fn status(self) -> Option<RecorderStatus> {
        match self {
            Self::Idle => Some(RecorderStatus::Idle),
            Self::Recording => Some(RecorderStatus::Recording),
            Self::Paused => Some(RecorderStatus::Paused),
            Self::Finalizing => Some(RecorderStatus::Finalizing),
            Self::Failed => None,
        }
    }
}

/// Session state shared between the caller and the orchestrator thread.
#[derive(Debug, Default)]
pub struct StateCell {
    inner: Mutex<RecorderState>,
}

impl StateCell {
    pub fn get(&self) -> RecorderState {
        self.inner.lock().map(|s| *s).unwrap_or(RecorderState::Failed)
    }

    pub fn transition(&self, to: RecorderState) -> Result<RecorderState> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| RecorderError::Other("recorder state lock poisoned".to_string()))?;

        if !state.can_transition(to) {
            return Err(RecorderError::InvalidState { from: *state, to });
        }

        log::debug!("recorder state {:?} -> {:?}", *state, to);
        let from = *state;
        *state = to;
        Ok(from)
    }
}
