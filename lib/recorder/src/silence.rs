use audio_utils::{PcmFormat, pcm};

/// Fills silent frame intervals so the sink never sees the audio stream stall.
///
/// Nothing is padded until the first captured audio arrived. From then on
/// every empty interval is replaced by silence of the interval's exact length,
/// padded intervals counting as intervals with audio.
#[derive(Debug, Clone)]
pub struct SilencePadder {
    format: PcmFormat,
    had_audio: bool,
}

impl SilencePadder {
    pub fn new(format: PcmFormat) -> Self {
        Self {
            format,
            had_audio: false,
        }
    }

    /// Audio to write for an interval of `duration` ticks that captured `captured`.
    ///
    /// A padded interval counts as one with audio, so a silent source keeps
    /// getting exact-length silence for every interval after the first audio.
    /// Padding never stops because the interval before was itself padded.
    pub fn fill(&mut self, captured: Vec<u8>, duration: i64) -> Option<Vec<u8>> {
        if !captured.is_empty() {
            self.had_audio = true;
            return Some(captured);
        }

        if !self.had_audio {
            return None;
        }

        let len = self.format.silence_len(duration);
        (len > 0).then(|| pcm::silence(len))
    }

    pub fn reset(&mut self) {
        self.had_audio = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_10MS: i64 = 100_000;

    #[test]
    fn test_no_padding_before_audio() {
        let mut padder = SilencePadder::new(PcmFormat::i16(48000, 2));
        assert_eq!(padder.fill(vec![], FRAME_10MS), None);
    }

    #[test]
    fn test_padding_after_audio() {
        let format = PcmFormat::i16(44100, 2);
        let mut padder = SilencePadder::new(format);
        assert_eq!(padder.fill(vec![1, 2, 3, 4], FRAME_10MS), Some(vec![1, 2, 3, 4]));

        // round(44100 * 10 / 1000) = 441 frames of 4 bytes.
        for _ in 0..3 {
            let padded = padder.fill(vec![], FRAME_10MS).unwrap();
            assert_eq!(padded.len(), 441 * 4);
            assert!(padded.iter().all(|&b| b == 0));
        }

        padder.reset();
        assert_eq!(padder.fill(vec![], FRAME_10MS), None);
    }
}
