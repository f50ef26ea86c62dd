//! Streaming sample-rate and channel conversion.

use crate::{
    PcmFormat, Result,
    audio::convert_channels,
    pcm::{f32_to_i16_sample, i16_to_f32_sample},
};

/// Converts a stream of interleaved 16-bit chunks from one format to another.
///
/// Implementations keep state between calls so chunk boundaries do not add
/// clicks or drift.
pub trait Resampler: Send {
    fn input_format(&self) -> PcmFormat;
    fn output_format(&self) -> PcmFormat;
    fn process(&mut self, input: &[i16]) -> Result<Vec<i16>>;
    fn reset(&mut self);
}

/// Returns `None` when both formats match and no conversion is needed.
pub fn create_resampler(input: PcmFormat, output: PcmFormat) -> Result<Option<Box<dyn Resampler>>> {
    input.validate()?;
    output.validate()?;

    if input == output {
        return Ok(None);
    }

    log::info!(
        "resampling audio {}Hz/{}ch -> {}Hz/{}ch",
        input.sample_rate,
        input.channels,
        output.sample_rate,
        output.channels
    );
    Ok(Some(Box::new(LinearResampler::new(input, output))))
}

/// Linear interpolation resampler.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    input: PcmFormat,
    output: PcmFormat,
    step: f64,
    position: f64,
    last_frame: Option<Vec<f32>>,
}

impl LinearResampler {
    pub fn new(input: PcmFormat, output: PcmFormat) -> Self {
        Self {
            input,
            output,
            step: input.sample_rate as f64 / output.sample_rate.max(1) as f64,
            position: 0.0,
            last_frame: None,
        }
    }
}

impl Resampler for LinearResampler {
    fn input_format(&self) -> PcmFormat {
        self.input
    }

    fn output_format(&self) -> PcmFormat {
        self.output
    }

    fn process(&mut self, input: &[i16]) -> Result<Vec<i16>> {
        let samples: Vec<f32> = input.iter().map(|&s| i16_to_f32_sample(s)).collect();
        let samples = convert_channels(&samples, self.input.channels, self.output.channels)?;

        if self.input.sample_rate == self.output.sample_rate {
            return Ok(samples.into_iter().map(f32_to_i16_sample).collect());
        }

        let channels = self.output.channels as usize;
        let mut frames: Vec<&[f32]> = Vec::with_capacity(samples.len() / channels + 1);
        if let Some(last) = self.last_frame.as_deref() {
            frames.push(last);
        }
        frames.extend(samples.chunks_exact(channels));

        if frames.len() < 2 {
            return Ok(vec![]);
        }

        let estimated = ((frames.len() as f64 / self.step) as usize + 1) * channels;
        let mut output = Vec::with_capacity(estimated);
        let mut t = self.position;

        while t + 1.0 < frames.len() as f64 {
            let index = t.floor() as usize;
            let frac = (t - index as f64) as f32;
            let (current, next) = (frames[index], frames[index + 1]);

            for ch in 0..channels {
                let value = current[ch] + (next[ch] - current[ch]) * frac;
                output.push(f32_to_i16_sample(value));
            }
            t += self.step;
        }

        self.position = t - (frames.len() - 1) as f64;
        self.last_frame = frames.last().map(|frame| frame.to_vec());

        Ok(output)
    }

    fn reset(&mut self) {
        self.position = 0.0;
        self.last_frame = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_resampler_for_matching_formats() {
        let format = PcmFormat::i16(48000, 2);
        assert!(create_resampler(format, format).unwrap().is_none());
        assert!(create_resampler(format, PcmFormat::i16(44100, 2)).unwrap().is_some());
        assert!(create_resampler(PcmFormat::i16(0, 2), format).is_err());
    }

    #[test]
    fn test_channel_only_conversion() {
        let mut resampler = LinearResampler::new(PcmFormat::i16(48000, 1), PcmFormat::i16(48000, 2));
        assert_eq!(resampler.process(&[100, -200]).unwrap(), vec![100, 100, -200, -200]);
    }

    #[test]
    fn test_streaming_output_length_does_not_drift() {
        let mut resampler = LinearResampler::new(PcmFormat::i16(48000, 2), PcmFormat::i16(44100, 2));
        let chunk = vec![0i16; 480 * 2];
        let mut total = 0;
        for _ in 0..100 {
            total += resampler.process(&chunk).unwrap().len() / 2;
        }

        let expected = 48000.0 * 44100.0 / 48000.0;
        assert!((total as f64 - expected).abs() <= 2.0, "{total}");
    }

    #[test]
    fn test_upsample_interpolates() {
        let mut resampler = LinearResampler::new(PcmFormat::i16(24000, 1), PcmFormat::i16(48000, 1));
        let output = resampler.process(&[0, 1000, 2000]).unwrap();
        assert_eq!(output, vec![0, 500, 1000, 1500]);

        let output = resampler.process(&[3000]).unwrap();
        assert_eq!(output, vec![2000, 2500]);
    }
}
