//! Lap and checkpoint bookkeeping of one entrant.

/// Outcome of a start/finish crossing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LapEvent {
    /// Crossing ignored, not all checkpoints of the lap were visited (or already finished).
    Ignored,
    /// A new lap started.
    LapCompleted { lap: u32 },
    /// The last lap was completed.
    Finished { finish_time: f32 },
}

/// RaceCarState is what the race director knows about one entrant's race.
///
/// * `lap` - Current lap, starts at 1
/// * `last_checkpoint` - Ordinal of the last checkpoint crossed this lap, None if none yet
/// * `finished` - The car completed all laps
/// * `finish_time` - (s) Race time at which the car finished
/// * `rank` - Current position among the cars still racing (1 = leading), 0 before the first
///   ranking and after finishing
/// * `finish_position` - Position in the order of arrival, set when the car finishes
#[derive(Debug, Clone, PartialEq)]
pub struct RaceCarState {
    pub lap: u32,
    pub last_checkpoint: Option<usize>,
    pub finished: bool,
    pub finish_time: Option<f32>,
    pub rank: usize,
    pub finish_position: Option<usize>,
}

impl Default for RaceCarState {
    fn default() -> Self {
        RaceCarState {
            lap: 1,
            last_checkpoint: None,
            finished: false,
            finish_time: None,
            rank: 0,
            finish_position: None,
        }
    }
}

impl RaceCarState {
    /// on_checkpoint records a checkpoint crossing and returns true if the state changed. Any
    /// checkpoint other than the last crossed one replaces it; repeated triggers are ignored.
    /// Skipping is caught at the start/finish line, which needs the final checkpoint.
    pub fn on_checkpoint(&mut self, checkpoint: usize) -> bool {
        if self.finished || self.last_checkpoint == Some(checkpoint) {
            return false;
        }
        self.last_checkpoint = Some(checkpoint);
        true
    }

    /// all_checkpoints_visited is true if the last checkpoint of the lap was crossed. A track
    /// without checkpoints has nothing to visit.
    pub fn all_checkpoints_visited(&self, no_checkpoints: usize) -> bool {
        match no_checkpoints {
            0 => true,
            n => self.last_checkpoint == Some(n - 1),
        }
    }

    /// on_start_finish advances the lap if all checkpoints were visited. Passing the configured
    /// number of laps finishes the car at `race_time`.
    pub fn on_start_finish(&mut self, no_checkpoints: usize, tot_no_laps: u32, race_time: f32) -> LapEvent {
        if self.finished || !self.all_checkpoints_visited(no_checkpoints) {
            return LapEvent::Ignored;
        }

        self.lap += 1;
        self.last_checkpoint = None;

        if self.lap > tot_no_laps {
            self.finished = true;
            self.finish_time = Some(race_time);
            LapEvent::Finished {
                finish_time: race_time,
            }
        } else {
            LapEvent::LapCompleted { lap: self.lap }
        }
    }

    /// checkpoint_fraction is the share of the lap's checkpoints already visited.
    pub fn checkpoint_fraction(&self, no_checkpoints: usize) -> f32 {
        match (self.last_checkpoint, no_checkpoints) {
            (_, 0) | (None, _) => 0.0,
            (Some(c), n) => (c + 1) as f32 / n as f32,
        }
    }

    /// progress composes laps driven and the fraction of the current lap into one number.
    pub fn progress(&self, lap_fraction: f32) -> f32 {
        (self.lap - 1) as f32 + lap_fraction
    }

    pub fn completed_laps(&self) -> u32 {
        self.lap - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn full_lap_advances_counter() {
        let mut state = RaceCarState::default();
        for c in 0..5 {
            assert!(state.on_checkpoint(c));
        }
        assert_eq!(state.on_start_finish(5, 3, 40.0), LapEvent::LapCompleted { lap: 2 });
        assert_eq!(state.last_checkpoint, None);
        assert_eq!(state.completed_laps(), 1);
    }

    #[test]
    fn missing_final_checkpoint_blocks_lap() {
        let mut state = RaceCarState::default();
        for c in 0..4 {
            state.on_checkpoint(c);
        }
        assert_eq!(state.on_start_finish(5, 3, 40.0), LapEvent::Ignored);
        assert_eq!(state.lap, 1);
    }

    #[test]
    fn skipped_middle_checkpoint_still_completes_lap() {
        let mut state = RaceCarState::default();
        assert!(state.on_checkpoint(0));
        assert!(state.on_checkpoint(2));
        assert_eq!(state.last_checkpoint, Some(2));
        assert_eq!(state.on_start_finish(3, 3, 20.0), LapEvent::LapCompleted { lap: 2 });
    }

    #[test]
    fn repeated_crossings_are_ignored() {
        let mut state = RaceCarState::default();
        assert_eq!(state.on_start_finish(3, 2, 1.0), LapEvent::Ignored);
        assert!(state.on_checkpoint(0));
        assert!(!state.on_checkpoint(0));
        assert!(state.on_checkpoint(1));
        assert!(!state.on_checkpoint(1));
        assert_eq!(state.last_checkpoint, Some(1));
        assert_abs_diff_eq!(state.checkpoint_fraction(3), 2.0 / 3.0);
        assert_abs_diff_eq!(state.progress(0.5), 0.5);

        // driving back through an earlier checkpoint loses the later one
        assert!(state.on_checkpoint(0));
        assert_eq!(state.last_checkpoint, Some(0));
    }

    #[test]
    fn finishing_captures_time_once() {
        let mut state = RaceCarState::default();
        for lap in 1..=2 {
            for c in 0..2 {
                state.on_checkpoint(c);
            }
            let event = state.on_start_finish(2, 2, lap as f32 * 30.0);
            if lap == 2 {
                assert_eq!(event, LapEvent::Finished { finish_time: 60.0 });
            }
        }
        assert!(state.finished);
        assert_eq!(state.finish_time, Some(60.0));
        assert!(!state.on_checkpoint(0));
        assert_eq!(state.on_start_finish(2, 2, 90.0), LapEvent::Ignored);
        assert_eq!(state.finish_time, Some(60.0));
    }

    #[test]
    fn track_without_checkpoints_counts_every_crossing() {
        let mut state = RaceCarState::default();
        assert_eq!(state.on_start_finish(0, 5, 1.0), LapEvent::LapCompleted { lap: 2 });
        assert_abs_diff_eq!(state.checkpoint_fraction(0), 0.0);
    }
}
