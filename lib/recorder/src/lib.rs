//! # Recorder Library
//!
//! Records the Windows desktop, single windows or several of them side by
//! side, together with loopback and microphone audio.
//!
//! ## Features
//!
//! - **Video**: H.264/AAC MP4 files or in-memory streams through the Media Foundation sink writer
//! - **Slideshow**: one image per changed frame plus a filename/delay list
//! - **Snapshot**: a single image, written to a file or returned as bytes
//! - **Pointer**: the mouse pointer and fading click indicators drawn into every frame
//! - **Audio**: WASAPI loopback and input capture, resampled and mixed per frame interval
//! - **Recovery**: access-denied and mode-change interruptions restart capture without ending the file
//!
//! ## Quick Start
//!
//! ```no_run
//! # #[cfg(target_os = "windows")]
//! # fn main() -> recorder::Result<()> {
//! use recorder::{RecorderConfig, RecordingSession, Resolution, WindowsRecordingBackend};
//! use screen_capture::RecordingSource;
//! use video_encoder::OutputTarget;
//!
//! let mut config = RecorderConfig::new(
//!     vec![RecordingSource::display("\\\\.\\DISPLAY1")],
//!     OutputTarget::File(RecorderConfig::make_filename(".")),
//! )
//! .with_max_duration_ms(10_000);
//! config.video.resolution = Resolution::P1080;
//!
//! let mut session = RecordingSession::new(WindowsRecordingBackend, config)?;
//! let events = session.events();
//! session.begin_recording()?;
//!
//! for event in events.iter() {
//!     println!("{event:?}");
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! session.wait()?;
//! # Ok(())
//! # }
//! # #[cfg(not(target_os = "windows"))]
//! # fn main() {}
//! ```
//!
//! ## Architecture
//!
//! 1. **Capture threads**: one per source, compositing into a shared surface
//! 2. **Audio threads**: one per enabled device direction, draining into byte queues
//! 3. **Orchestrator thread**: paces frames, draws the pointer and writes samples
//! 4. **Helper threads**: click detection and snapshot file writes
//!
//! Everything is torn down by the session's cancel token. Each recording
//! ends with exactly one [`RecorderEvent::Completed`] or [`RecorderEvent::Failed`].

mod audio;
mod audio_level;
mod backend;
mod config;
mod context;
mod error;
mod event;
mod image_output;
mod pacing;
mod recorder;
mod resolution;
mod silence;
mod state;

pub use audio::{AudioCaptureDevice, AudioDirection, AudioManager};
#[cfg(target_os = "windows")]
pub use audio::{WasapiDevice, list_audio_devices};
pub use audio_level::*;
#[cfg(target_os = "windows")]
pub use backend::{WindowsRecordingBackend, WindowsSink};
pub use backend::{FrameRenderer, RecordingBackend, click_center, click_color};
pub use config::{
    AudioOptions, ImageFormat, MouseOptions, MouseStyle, RecorderConfig, RecorderMode,
    SnapshotOptions, VideoOptions,
};
pub use context::{CancelToken, Clock, ManualClock, SessionContext, SystemClock};
pub use crossbeam::channel::{Receiver, Sender, bounded};
pub use error::{AUDCLNT_E_DEVICE_INVALIDATED, AudioCaptureError, RecorderError, Result};
pub use event::{EventEmitter, FrameDelay, RecorderEvent, RecorderStatus};
pub use image_output::{encode_capture, save_capture, slideshow_filename};
pub use pacing::{PacingDecision, PacingState};
pub use recorder::{RecordingOutcome, RecordingSession};
pub use resolution::Resolution;
pub use silence::SilencePadder;
pub use state::{RecorderState, StateCell};
