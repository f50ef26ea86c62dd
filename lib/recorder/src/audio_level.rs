/// Floor reported for digital silence.
pub const SILENCE_DB: f32 = -200.0;

/// Loudness of one frame interval of mixed audio, in dBFS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioLevel {
    pub rms_db: f32,
    pub peak_db: f32,
}

impl AudioLevel {
    pub fn from_pcm(samples: &[i16]) -> Option<Self> {
        Some(Self {
            rms_db: calc_rms_level(samples)?,
            peak_db: calc_peak_level(samples)?,
        })
    }

    /// RMS level mapped onto `0.0..=1.0` for a meter.
    pub fn normalized(&self) -> f32 {
        db_to_normalized(self.rms_db, -60.0, 0.0)
    }
}

fn normalize(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

pub fn calc_rms_level(samples: &[i16]) -> Option<f32> {
    if samples.is_empty() {
        return None;
    }

    let sum_squares: f32 = samples.iter().map(|&s| normalize(s).powi(2)).sum();

    let rms = (sum_squares / samples.len() as f32).sqrt();

    if rms <= 1e-10 {
        return Some(SILENCE_DB);
    }

    Some(20.0 * rms.log10())
}

pub fn calc_peak_level(samples: &[i16]) -> Option<f32> {
    if samples.is_empty() {
        return None;
    }

    let max_sample = samples
        .iter()
        .map(|&s| normalize(s).abs())
        .fold(0.0f32, |a, b| a.max(b));

    if max_sample <= 0.0 {
        return Some(SILENCE_DB);
    }

    Some(20.0 * max_sample.log10())
}

pub fn db_to_normalized(db: f32, min_db: f32, max_db: f32) -> f32 {
    let clamped = db.clamp(min_db, max_db);
    (clamped - min_db) / (max_db - min_db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_level() {
        assert_eq!(calc_rms_level(&[]), None);
        assert_eq!(calc_rms_level(&[0; 64]), Some(SILENCE_DB));
        assert_eq!(calc_peak_level(&[0; 64]), Some(SILENCE_DB));
    }

    #[test]
    fn test_full_scale_level() {
        let square = [i16::MAX, -i16::MAX].repeat(32);
        let level = AudioLevel::from_pcm(&square).unwrap();
        assert!(level.rms_db.abs() < 0.01);
        assert!(level.peak_db.abs() < 0.01);
        assert!((level.normalized() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_half_scale_level() {
        let half = [i16::MAX / 2; 16];
        let rms = calc_rms_level(&half).unwrap();
        assert!((rms + 6.02).abs() < 0.05, "{rms}");
        assert_eq!(db_to_normalized(-90.0, -60.0, 0.0), 0.0);
    }
}
