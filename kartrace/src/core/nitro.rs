//! When to fire nitro.

use crate::core::driver::DriverPars;
use crate::core::vehicle::NitroGauge;
use rand::Rng;
use rand_distr::{Distribution, Uniform};

/// Both lookahead corner factors must stay below this value for nitro to count as safe.
pub const NITRO_SAFE_CORNER_FACTOR: f32 = 0.1;
/// Minimum stored nitro before the policy considers firing.
pub const MIN_NITRO_RESERVE: f32 = 10.0;
/// Chance of firing per eligible tick.
pub const NITRO_DRAW_PROBABILITY: f64 = 0.3;
/// Range of the cooldown drawn after each nitro use.
pub const NITRO_COOLDOWN_RANGE: (f32, f32) = (22.0, 30.0);

/// is_nitro_safe checks that neither the near nor the far lookahead shows a corner.
pub fn is_nitro_safe(near_corner_factor: f32, far_corner_factor: f32) -> bool {
    near_corner_factor < NITRO_SAFE_CORNER_FACTOR && far_corner_factor < NITRO_SAFE_CORNER_FACTOR
}

/// NitroPolicy decides once per tick whether to request nitro.
///
/// * `cooldown` - (s) Time until the policy may fire again on its own
/// * `start_window` - (s) Remaining time of the forced launch nitro
/// * `slowdown_window` - (s) Remaining time in which speed is capped after a nitro use
/// * `fired_at_start` - Nitro was requested during the launch window
#[derive(Debug, Clone, Default)]
pub struct NitroPolicy {
    cooldown: f32,
    start_window: f32,
    slowdown_window: f32,
    fired_at_start: bool,
}

impl NitroPolicy {
    pub fn new(initial_cooldown: f32) -> NitroPolicy {
        NitroPolicy {
            cooldown: initial_cooldown,
            ..NitroPolicy::default()
        }
    }

    /// start_race opens the launch window in which nitro is forced whenever it is safe.
    pub fn start_race(&mut self, pars: &DriverPars) {
        self.start_window = pars.start_nitro_duration;
        self.fired_at_start = false;
    }

    pub fn in_start_window(&self) -> bool {
        self.start_window > 0.0
    }

    pub fn in_slowdown(&self) -> bool {
        self.slowdown_window > 0.0
    }

    pub fn cooldown(&self) -> f32 {
        self.cooldown
    }

    /// can_use checks the timer and the vehicle's own gauge.
    fn can_use(&self, gauge: &NitroGauge) -> bool {
        self.cooldown <= 0.0 && gauge.current > MIN_NITRO_RESERVE && !gauge.active && !gauge.cooling_down
    }

    /// update advances the timers and returns true if nitro should be requested this tick.
    pub fn update<R: Rng>(
        &mut self,
        gauge: &NitroGauge,
        near_corner_factor: f32,
        far_corner_factor: f32,
        pars: &DriverPars,
        rng: &mut R,
        dt: f32,
    ) -> bool {
        if self.slowdown_window > 0.0 {
            self.slowdown_window = (self.slowdown_window - dt).max(0.0);
        }

        let safe = is_nitro_safe(near_corner_factor, far_corner_factor);

        if self.start_window > 0.0 {
            self.start_window = (self.start_window - dt).max(0.0);
            if safe {
                self.fired_at_start = true;
            } else {
                // the launch ends with the first corner ahead
                self.start_window = 0.0;
            }
            if self.start_window <= 0.0 && self.fired_at_start {
                self.slowdown_window = pars.nitro_slowdown_duration;
                self.cooldown = self.draw_cooldown(rng);
            }
            return safe;
        }

        if !pars.use_nitro_on_straights {
            return false;
        }

        self.cooldown = (self.cooldown - dt).max(0.0);

        if self.can_use(gauge) && safe && rng.gen_bool(NITRO_DRAW_PROBABILITY) {
            self.cooldown = self.draw_cooldown(rng);
            self.slowdown_window = pars.nitro_slowdown_duration;
            return true;
        }

        false
    }

    fn draw_cooldown<R: Rng>(&self, rng: &mut R) -> f32 {
        Uniform::new_inclusive(NITRO_COOLDOWN_RANGE.0, NITRO_COOLDOWN_RANGE.1).sample(rng)
    }

    pub fn reset(&mut self, initial_cooldown: f32) {
        *self = NitroPolicy::new(initial_cooldown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn full_gauge() -> NitroGauge {
        NitroGauge {
            current: 100.0,
            active: false,
            cooling_down: false,
        }
    }

    #[test]
    fn never_fires_with_a_corner_ahead() {
        let pars = DriverPars::default();
        let mut rng = StdRng::seed_from_u64(21);
        let factors = [(0.1, 0.0), (0.0, 0.1), (0.5, 0.5), (0.0, 0.99), (1.0, 0.0)];

        for (near, far) in factors {
            // expired cooldown, running launch window and many random draws
            let mut policy = NitroPolicy::new(0.0);
            for _ in 0..200 {
                assert!(!policy.update(&full_gauge(), near, far, &pars, &mut rng, 0.05));
            }
            let mut policy = NitroPolicy::new(0.0);
            policy.start_race(&pars);
            for _ in 0..200 {
                assert!(!policy.update(&full_gauge(), near, far, &pars, &mut rng, 0.05));
            }
        }
    }

    #[test]
    fn fires_on_straight_once_cooldown_expired() {
        let pars = DriverPars::default();
        let mut rng = StdRng::seed_from_u64(4);
        let mut policy = NitroPolicy::new(1.0);

        // still cooling down
        assert!(!policy.update(&full_gauge(), 0.0, 0.0, &pars, &mut rng, 0.5));

        let mut fired = false;
        for _ in 0..100 {
            if policy.update(&full_gauge(), 0.0, 0.0, &pars, &mut rng, 0.5) {
                fired = true;
                break;
            }
        }
        assert!(fired);
        assert!(policy.in_slowdown());
        assert!(policy.cooldown() >= NITRO_COOLDOWN_RANGE.0);

        // a fresh cooldown blocks the next use
        for _ in 0..10 {
            assert!(!policy.update(&full_gauge(), 0.0, 0.0, &pars, &mut rng, 0.5));
        }
    }

    #[test]
    fn respects_the_vehicle_gauge() {
        let pars = DriverPars::default();
        let mut rng = StdRng::seed_from_u64(8);
        let gauges = [
            NitroGauge {
                current: 5.0,
                ..full_gauge()
            },
            NitroGauge {
                active: true,
                ..full_gauge()
            },
            NitroGauge {
                cooling_down: true,
                ..full_gauge()
            },
        ];
        for gauge in gauges {
            let mut policy = NitroPolicy::new(0.0);
            for _ in 0..100 {
                assert!(!policy.update(&gauge, 0.0, 0.0, &pars, &mut rng, 0.1));
            }
        }
    }

    #[test]
    fn corner_ahead_closes_the_launch_window() {
        let pars = DriverPars::default();
        let mut rng = StdRng::seed_from_u64(2);

        let mut policy = NitroPolicy::new(25.0);
        policy.start_race(&pars);
        assert!(!policy.update(&full_gauge(), 0.5, 0.5, &pars, &mut rng, 0.05));
        assert!(!policy.in_start_window());
        assert!(!policy.in_slowdown());
        // the straight after the corner does not reopen it
        assert!(!policy.update(&full_gauge(), 0.0, 0.0, &pars, &mut rng, 0.05));

        // a launch that already fired slows down right away
        let mut policy = NitroPolicy::new(25.0);
        policy.start_race(&pars);
        assert!(policy.update(&full_gauge(), 0.0, 0.0, &pars, &mut rng, 0.05));
        assert!(!policy.update(&full_gauge(), 0.5, 0.5, &pars, &mut rng, 0.05));
        assert!(!policy.in_start_window());
        assert!(policy.in_slowdown());
        assert!(policy.cooldown() >= NITRO_COOLDOWN_RANGE.0);
    }

    #[test]
    fn launch_window_forces_nitro_then_slows_down() {
        let pars = DriverPars::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut policy = NitroPolicy::new(25.0);
        policy.start_race(&pars);

        let dt = 0.1;
        let steps = (pars.start_nitro_duration / dt).round() as usize;
        for _ in 0..steps - 1 {
            assert!(policy.update(&full_gauge(), 0.0, 0.0, &pars, &mut rng, dt));
            assert!(!policy.in_slowdown());
        }
        // the last launch tick closes the window and opens the slowdown
        for _ in 0..3 {
            policy.update(&full_gauge(), 0.0, 0.0, &pars, &mut rng, dt);
        }
        assert!(!policy.in_start_window());
        assert!(policy.in_slowdown());
    }
}
