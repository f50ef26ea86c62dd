pub mod audio;
pub mod byte_queue;
pub mod mixer;
pub mod pcm;
pub mod resample;

pub use byte_queue::{AudioByteQueue, drain_aligned, split_surplus};
pub use mixer::{MixStats, apply_gain_i16, mix_i16, mix_pcm_bytes};
pub use pcm::PcmFormat;
pub use resample::{LinearResampler, Resampler, create_resampler};

pub type Result<T> = std::result::Result<T, AudioProcessError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioProcessError {
    #[error("Audio processing error: {0}")]
    Audio(String),

    #[error("Unsupported audio format: {0}")]
    Format(String),
}
