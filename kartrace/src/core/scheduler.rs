/// PeriodicTask fires every `interval` seconds of simulation time. Time is only advanced by the
/// caller, so the task never depends on wall clock time.
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    interval: f32,
    elapsed: f32,
}

impl PeriodicTask {
    pub fn new(interval: f32) -> PeriodicTask {
        PeriodicTask {
            interval,
            elapsed: 0.0,
        }
    }

    /// due advances the task by dt and returns true if it fired. A non-positive interval fires on
    /// every call. Leftover time is carried over so the average rate matches the interval.
    pub fn due(&mut self, dt: f32) -> bool {
        if self.interval <= 0.0 {
            return true;
        }
        self.elapsed += dt;
        if self.elapsed >= self.interval {
            self.elapsed = (self.elapsed - self.interval).min(self.interval);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.elapsed = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_at_the_configured_rate() {
        let mut task = PeriodicTask::new(1.0);
        let fired = (0..100).filter(|_| task.due(0.1)).count();
        assert!((9..=10).contains(&fired));

        task.reset();
        assert!(!task.due(0.5));
        assert!(task.due(0.6));
    }

    #[test]
    fn zero_interval_always_fires() {
        let mut task = PeriodicTask::new(0.0);
        assert!(task.due(0.0));
        assert!(task.due(0.01));
    }
}
