//! Frame-rate pacing shared by every recording mode.
//!
//! A frame arriving before the frame interval elapsed is cached, the
//! previous frame keeps being shown until the interval is reached and the
//! newest cached frame replaces it then. The first frame and frames with a
//! new pointer shape are never delayed.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingDecision {
    /// Close the displayed frame at this instant and show the newest one.
    Submit,
    /// Hold the new frame back until the interval elapsed.
    Cache,
    Wait,
}

#[derive(Debug, Clone)]
pub struct PacingState {
    interval: Duration,
    max_frame_length: Duration,
    fixed_framerate: bool,
    last_submit: Option<Duration>,
}

impl PacingState {
    pub fn new(interval: Duration, max_frame_length: Duration, fixed_framerate: bool) -> Self {
        Self {
            interval,
            max_frame_length: max_frame_length.max(interval),
            fixed_framerate,
            last_submit: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_submit(&self) -> Option<Duration> {
        self.last_submit
    }

    pub fn decide(
        &self,
        now: Duration,
        new_frame: bool,
        has_cached: bool,
        shape_changed: bool,
    ) -> PacingDecision {
        let Some(last) = self.last_submit else {
            return if new_frame || has_cached {
                PacingDecision::Submit
            } else {
                PacingDecision::Wait
            };
        };

        let elapsed = now.saturating_sub(last);
        let due = elapsed >= self.interval;

        if self.fixed_framerate {
            return match (due, new_frame) {
                (true, _) => PacingDecision::Submit,
                (false, true) => PacingDecision::Cache,
                (false, false) => PacingDecision::Wait,
            };
        }

        if new_frame {
            if due || shape_changed {
                PacingDecision::Submit
            } else {
                PacingDecision::Cache
            }
        } else if has_cached && due {
            PacingDecision::Submit
        } else if elapsed >= self.max_frame_length {
            // Repeat an unchanged frame so the encoder does not stall.
            PacingDecision::Submit
        } else {
            PacingDecision::Wait
        }
    }

    /// Record a submission at `now` and return the boundary it lands on.
    ///
    /// Fixed-framerate boundaries stay on the interval grid unless the loop
    /// fell more than one interval behind.
    pub fn submitted(&mut self, now: Duration) -> Duration {
        let boundary = match self.last_submit {
            Some(last) if self.fixed_framerate && now < last + self.interval * 2 => {
                (last + self.interval).min(now)
            }
            _ => now,
        };
        self.last_submit = Some(boundary);
        boundary
    }

    /// Earliest instant a submission can happen without a new frame.
    pub fn next_deadline(&self, has_cached: bool) -> Option<Duration> {
        let last = self.last_submit?;
        if self.fixed_framerate || has_cached {
            Some(last + self.interval)
        } else {
            Some(last + self.max_frame_length)
        }
    }

    pub fn reset(&mut self) {
        self.last_submit = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_first_frame_is_never_delayed() {
        let pacing = PacingState::new(100 * MS, 1000 * MS, false);
        assert_eq!(pacing.decide(MS, true, false, false), PacingDecision::Submit);
        assert_eq!(pacing.decide(MS, false, false, false), PacingDecision::Wait);
    }

    #[test]
    fn test_premature_frame_is_cached() {
        let mut pacing = PacingState::new(100 * MS, 1000 * MS, false);
        pacing.submitted(Duration::ZERO);

        assert_eq!(pacing.decide(40 * MS, true, false, false), PacingDecision::Cache);
        assert_eq!(pacing.decide(60 * MS, false, true, false), PacingDecision::Wait);
        assert_eq!(pacing.decide(100 * MS, false, true, false), PacingDecision::Submit);
        assert_eq!(pacing.next_deadline(true), Some(100 * MS));
    }

    #[test]
    fn test_shape_change_is_never_delayed() {
        let mut pacing = PacingState::new(100 * MS, 1000 * MS, false);
        pacing.submitted(Duration::ZERO);
        assert_eq!(pacing.decide(10 * MS, true, false, true), PacingDecision::Submit);
    }

    #[test]
    fn test_unchanged_frame_is_repeated() {
        let mut pacing = PacingState::new(100 * MS, 500 * MS, false);
        pacing.submitted(Duration::ZERO);
        assert_eq!(pacing.decide(499 * MS, false, false, false), PacingDecision::Wait);
        assert_eq!(pacing.decide(500 * MS, false, false, false), PacingDecision::Submit);
        assert_eq!(pacing.next_deadline(false), Some(500 * MS));
    }

    #[test]
    fn test_fixed_framerate_submits_every_interval() {
        let mut pacing = PacingState::new(100 * MS, 1000 * MS, true);
        pacing.submitted(Duration::ZERO);
        assert_eq!(pacing.decide(50 * MS, true, false, true), PacingDecision::Cache);
        assert_eq!(pacing.decide(100 * MS, false, false, false), PacingDecision::Submit);

        // Late loop iterations stay on the grid.
        assert_eq!(pacing.submitted(104 * MS), 100 * MS);
        // Falling far behind restarts the grid.
        assert_eq!(pacing.submitted(450 * MS), 450 * MS);
    }

    #[test]
    fn test_at_most_one_submission_per_interval() {
        let interval = 100 * MS;
        for fixed in [false, true] {
            let mut pacing = PacingState::new(interval, 1000 * MS, fixed);
            let mut submissions = vec![];
            let mut cached = false;

            // A capture clock ticking every half interval, each tick a new frame.
            for tick in 0..40u32 {
                let now = tick * interval / 2;
                match pacing.decide(now, true, cached, false) {
                    PacingDecision::Submit => {
                        submissions.push(pacing.submitted(now));
                        cached = false;
                    }
                    PacingDecision::Cache => cached = true,
                    PacingDecision::Wait => {}
                }
            }

            assert_eq!(submissions[0], Duration::ZERO);
            for pair in submissions[1..].windows(2) {
                assert!(pair[1] - pair[0] >= interval, "fixed={fixed} {pair:?}");
            }
            assert_eq!(submissions.len(), 20, "fixed={fixed}");
        }
    }
}
