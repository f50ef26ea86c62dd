//! Audio capture devices and the two-device manager feeding the encoder.

#[cfg(target_os = "windows")]
pub(crate) mod wasapi;

#[cfg(target_os = "windows")]
pub use wasapi::{WasapiDevice, list_audio_devices};

use crate::AudioCaptureError;
use audio_utils::{PcmFormat, apply_gain_i16, mix_pcm_bytes, pcm, split_surplus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioDirection {
    /// What an output device plays, captured as loopback.
    Output,
    /// A microphone or other input device.
    Input,
}

/// One audio endpoint captured on its own thread into a byte queue.
pub trait AudioCaptureDevice: Send {
    /// Start capturing, converting whatever the device delivers to `format`.
    fn start_capture(&mut self, format: PcmFormat) -> Result<(), AudioCaptureError>;

    /// Everything captured since the last call, in the started format.
    fn recorded_bytes(&self) -> Result<Vec<u8>, AudioCaptureError>;

    /// Hand back bytes the consumer could not use; they lead the next drain.
    fn return_bytes(&self, bytes: &[u8]);

    /// Drop everything captured so far.
    fn clear(&self);

    fn stop_capture(&mut self);
}

struct Track<D> {
    direction: AudioDirection,
    device: D,
    volume: f32,
}

/// Output and input device of a session, drained and mixed once per frame interval.
pub struct AudioManager<D: AudioCaptureDevice> {
    format: PcmFormat,
    output: Option<Track<D>>,
    input: Option<Track<D>>,
}

impl<D: AudioCaptureDevice> AudioManager<D> {
    pub fn new(format: PcmFormat) -> Self {
        Self {
            format,
            output: None,
            input: None,
        }
    }

    pub fn with_device(mut self, direction: AudioDirection, device: D, volume: f32) -> Self {
        let track = Some(Track {
            direction,
            device,
            volume,
        });
        match direction {
            AudioDirection::Output => self.output = track,
            AudioDirection::Input => self.input = track,
        }
        self
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_none() && self.input.is_none()
    }

    fn tracks_mut(&mut self) -> impl Iterator<Item = &mut Track<D>> {
        self.output.iter_mut().chain(self.input.iter_mut())
    }

    pub fn start(&mut self) -> Result<(), AudioCaptureError> {
        let format = self.format;
        let mut result = Ok(());
        for track in self.tracks_mut() {
            if let Err(e) = track.device.start_capture(format) {
                log::warn!("start {:?} audio capture failed: {e}", track.direction);
                result = Err(e);
                break;
            }
        }

        if result.is_err() {
            self.stop();
        }
        result
    }

    /// Audio captured since the last call, mixed and scaled by volume.
    ///
    /// When both devices delivered data, the longer stream is cut to the
    /// shorter one and the rest goes back to its device for the next call.
    pub fn take(&mut self) -> Result<Vec<u8>, AudioCaptureError> {
        match (&self.output, &self.input) {
            (Some(output), Some(input)) => {
                let mut first = output.device.recorded_bytes()?;
                let mut second = input.device.recorded_bytes()?;

                let (surplus_first, surplus_second) = split_surplus(&mut first, &mut second);
                output.device.return_bytes(&surplus_first);
                input.device.return_bytes(&surplus_second);

                if first.is_empty() && second.is_empty() {
                    return Ok(vec![]);
                }

                let (mixed, stats) =
                    mix_pcm_bytes(&first, &second, output.volume, input.volume);
                if stats.clipped_samples > 0 {
                    log::debug!("audio mix clipped {} samples", stats.clipped_samples);
                }
                Ok(mixed)
            }
            (Some(track), None) | (None, Some(track)) => {
                let bytes = track.device.recorded_bytes()?;
                if (track.volume - 1.0).abs() < f32::EPSILON || bytes.is_empty() {
                    return Ok(bytes);
                }

                let mut samples = pcm::bytes_to_i16(&bytes);
                apply_gain_i16(&mut samples, track.volume);
                Ok(pcm::i16_to_bytes(&samples))
            }
            (None, None) => Ok(vec![]),
        }
    }

    pub fn clear(&mut self) {
        for track in self.tracks_mut() {
            track.device.clear();
        }
    }

    pub fn stop(&mut self) {
        for track in self.tracks_mut() {
            track.device.stop_capture();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_utils::AudioByteQueue;
    use std::sync::Arc;

    struct QueueDevice {
        queue: Arc<AudioByteQueue>,
        started: bool,
    }

    impl QueueDevice {
        fn new() -> (Self, Arc<AudioByteQueue>) {
            let queue = Arc::new(AudioByteQueue::new(4));
            (
                Self {
                    queue: queue.clone(),
                    started: false,
                },
                queue,
            )
        }
    }

    impl AudioCaptureDevice for QueueDevice {
        fn start_capture(&mut self, _format: PcmFormat) -> Result<(), AudioCaptureError> {
            self.started = true;
            Ok(())
        }

        fn recorded_bytes(&self) -> Result<Vec<u8>, AudioCaptureError> {
            if !self.started {
                return Err(AudioCaptureError::NotRunning);
            }
            Ok(self.queue.drain_all())
        }

        fn return_bytes(&self, bytes: &[u8]) {
            self.queue.return_to_front(bytes);
        }

        fn clear(&self) {
            self.queue.clear();
        }

        fn stop_capture(&mut self) {
            self.started = false;
        }
    }

    fn samples(values: &[i16]) -> Vec<u8> {
        pcm::i16_to_bytes(values)
    }

    #[test]
    fn test_overflow_is_returned_to_longer_device() {
        let (output, output_queue) = QueueDevice::new();
        let (input, input_queue) = QueueDevice::new();
        let mut manager = AudioManager::new(PcmFormat::i16(48000, 2))
            .with_device(AudioDirection::Output, output, 1.0)
            .with_device(AudioDirection::Input, input, 1.0);
        manager.start().unwrap();

        output_queue.push(&samples(&[100, 100, 200, 200]));
        input_queue.push(&samples(&[1, 1]));

        assert_eq!(manager.take().unwrap(), samples(&[101, 101]));
        assert_eq!(output_queue.len(), 4);

        input_queue.push(&samples(&[2, 2]));
        assert_eq!(manager.take().unwrap(), samples(&[202, 202]));
        assert!(output_queue.is_empty());
    }

    #[test]
    fn test_single_device_volume() {
        let (output, queue) = QueueDevice::new();
        let mut manager = AudioManager::new(PcmFormat::i16(48000, 2)).with_device(
            AudioDirection::Output,
            output,
            0.5,
        );
        manager.start().unwrap();

        queue.push(&samples(&[1000, -1000]));
        assert_eq!(manager.take().unwrap(), samples(&[500, -500]));
        assert!(manager.take().unwrap().is_empty());
    }

    #[test]
    fn test_stopped_device_reports_error() {
        let (output, _queue) = QueueDevice::new();
        let mut manager = AudioManager::new(PcmFormat::i16(48000, 2)).with_device(
            AudioDirection::Output,
            output,
            1.0,
        );
        assert!(manager.take().is_err());
        manager.start().unwrap();
        manager.stop();
        assert!(manager.take().is_err());
    }
}
