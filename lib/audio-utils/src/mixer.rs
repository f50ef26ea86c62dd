use crate::pcm::{bytes_to_i16, i16_to_bytes};

const SAMPLE_LIMIT: f32 = i16::MAX as f32;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MixStats {
    pub clipped_samples: usize,
}

/// Mix two interleaved streams of the same format. The shorter stream is
/// treated as silence past its end. Results are clamped to `±i16::MAX`.
pub fn mix_i16(first: &[i16], second: &[i16], gain_first: f32, gain_second: f32) -> (Vec<i16>, MixStats) {
    let len = first.len().max(second.len());
    let mut stats = MixStats::default();
    let mut output = Vec::with_capacity(len);

    for i in 0..len {
        let a = first.get(i).copied().unwrap_or(0) as f32 * gain_first;
        let b = second.get(i).copied().unwrap_or(0) as f32 * gain_second;
        let mixed = (a + b).round();

        if !(-SAMPLE_LIMIT..=SAMPLE_LIMIT).contains(&mixed) {
            stats.clipped_samples += 1;
        }
        output.push(mixed.clamp(-SAMPLE_LIMIT, SAMPLE_LIMIT) as i16);
    }

    if stats.clipped_samples > 0 {
        log::debug!("audio mix clipped {} samples", stats.clipped_samples);
    }

    (output, stats)
}

pub fn mix_pcm_bytes(first: &[u8], second: &[u8], gain_first: f32, gain_second: f32) -> (Vec<u8>, MixStats) {
    let (mixed, stats) = mix_i16(
        &bytes_to_i16(first),
        &bytes_to_i16(second),
        gain_first,
        gain_second,
    );
    (i16_to_bytes(&mixed), stats)
}

pub fn apply_gain_i16(samples: &mut [i16], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }

    for sample in samples.iter_mut() {
        *sample = (*sample as f32 * gain).round().clamp(-SAMPLE_LIMIT, SAMPLE_LIMIT) as i16;
    }
}
