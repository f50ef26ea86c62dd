use crate::{AudioProcessError, Result};

const CENTER: f32 = 0.707;
const SURROUND: f32 = 0.5;
const LFE: f32 = 0.1;

/// Left and right gain for each input channel of a known layout.
fn stereo_gains(channels: u16) -> Option<&'static [(f32, f32)]> {
    match channels {
        // L R C
        3 => Some(&[(1.0, 0.0), (0.0, 1.0), (CENTER, CENTER)]),
        // FL FR BL BR
        4 => Some(&[(1.0, 0.0), (0.0, 1.0), (0.7, 0.0), (0.0, 0.7)]),
        // L R C LFE SL SR
        6 => Some(&[
            (1.0, 0.0),
            (0.0, 1.0),
            (CENTER, CENTER),
            (LFE, LFE),
            (SURROUND, 0.0),
            (0.0, SURROUND),
        ]),
        _ => None,
    }
}

/// Spreads unknown layouts evenly from left to right with a square-root pan law.
fn panned_gains(channels: u16) -> Vec<(f32, f32)> {
    let last = (channels.max(2) - 1) as f32;
    let norm = (channels as f32 / 2.0).sqrt();
    (0..channels)
        .map(|i| {
            let pan = i as f32 / last;
            ((1.0 - pan).sqrt() / norm, pan.sqrt() / norm)
        })
        .collect()
}

fn downmix_stereo(samples: &[f32], channels: u16) -> Vec<f32> {
    let panned;
    let gains = match stereo_gains(channels) {
        Some(gains) => gains,
        None => {
            panned = panned_gains(channels);
            &panned[..]
        }
    };

    samples
        .chunks_exact(channels as usize)
        .flat_map(|frame| {
            let (left, right) = frame
                .iter()
                .zip(gains)
                .fold((0.0, 0.0), |(l, r), (s, (gl, gr))| (l + s * gl, r + s * gr));
            [left, right]
        })
        .collect()
}

fn average_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    samples
        .chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Convert interleaved samples between channel counts.
pub fn convert_channels(samples: &[f32], from: u16, to: u16) -> Result<Vec<f32>> {
    match (from, to) {
        _ if from == to => Ok(samples.to_vec()),
        (1, 2) => Ok(samples.iter().flat_map(|&s| [s, s]).collect()),
        (n, 1) if n >= 2 => Ok(average_mono(samples, n)),
        (n, 2) if n > 2 => Ok(downmix_stereo(samples, n)),
        _ => Err(AudioProcessError::Format(format!(
            "Unsupported channel conversion: {from} -> {to}"
        ))),
    }
}
