use rand::Rng;
use serde::Deserialize;

/// Tuning of the autonomous driver. Every field has a default so that a parameter file only has
/// to name what it changes.
///
/// * `lookahead_points` - Racing line points between the car and its steering target (before
/// the skill adjustment)
/// * `max_steering_angle` - Steering command limit before the skill dependent precision factor
/// * `min_speed_multiplier` - Share of the recommended speed driven at skill 0
/// * `max_speed_multiplier` - Share of the recommended speed driven at skill 1
/// * `steering_speed` - (1/s) Low-pass rate of the steering command
/// * `acceleration_speed` - (1/s) Rate at which throttle and brake follow their targets
/// * `use_nitro_on_straights` - Allow the nitro policy to fire outside the race start
/// * `corner_detection_lookahead` - Racing line points scanned for upcoming corners
/// * `corner_speed_reduction_factor` - Share of the target speed kept in the sharpest corner
/// * `corner_detection_threshold` - Minimum curvature that counts as a corner
/// * `braking_distance` - (m) Distance scale for corner anticipation
/// * `braking_intensity_multiplier` - Gain from speed overshoot to brake command
/// * `path_randomness` - (m) Amplitude of the humanization wander
/// * `randomness_change_rate` - How fast the wander changes over time
/// * `overtake_trigger_time` - (s) Time stuck behind a slower car before overtaking
/// * `overtake_lane_offset` - (m) Lateral offset used while overtaking
/// * `max_overtake_corner_factor` - Overtakes only start below this corner factor
/// * `overtake_cooldown` - (s) Pause after an overtake before the next one may start
/// * `avoidance_commitment` - (s) Minimum time between two avoidance decisions
/// * `avoidance_radius` - (m) Peers further away are ignored by the avoidance
/// * `avoidance_awareness_angle` - (deg) Full opening angle of the avoidance cone
/// * `max_avoidance_offset` - (m) Limit of the avoidance offset
/// * `nitro_slowdown_duration` - (s) Window after a nitro burst that enforces a slowdown
/// * `start_nitro_duration` - (s) Window after the start in which nitro is forced
#[derive(Debug, Deserialize, Clone)]
pub struct DriverPars {
    #[serde(default = "default_lookahead_points")]
    pub lookahead_points: u32,
    #[serde(default = "default_max_steering_angle")]
    pub max_steering_angle: f32,
    #[serde(default = "default_min_speed_multiplier")]
    pub min_speed_multiplier: f32,
    #[serde(default = "default_max_speed_multiplier")]
    pub max_speed_multiplier: f32,
    #[serde(default = "default_steering_speed")]
    pub steering_speed: f32,
    #[serde(default = "default_acceleration_speed")]
    pub acceleration_speed: f32,
    #[serde(default = "default_true")]
    pub use_nitro_on_straights: bool,
    #[serde(default = "default_corner_detection_lookahead")]
    pub corner_detection_lookahead: u32,
    #[serde(default = "default_corner_speed_reduction_factor")]
    pub corner_speed_reduction_factor: f32,
    #[serde(default = "default_corner_detection_threshold")]
    pub corner_detection_threshold: f32,
    #[serde(default = "default_braking_distance")]
    pub braking_distance: f32,
    #[serde(default = "default_braking_intensity_multiplier")]
    pub braking_intensity_multiplier: f32,
    #[serde(default = "default_path_randomness")]
    pub path_randomness: f32,
    #[serde(default = "default_randomness_change_rate")]
    pub randomness_change_rate: f32,
    #[serde(default = "default_overtake_trigger_time")]
    pub overtake_trigger_time: f32,
    #[serde(default = "default_overtake_lane_offset")]
    pub overtake_lane_offset: f32,
    #[serde(default = "default_max_overtake_corner_factor")]
    pub max_overtake_corner_factor: f32,
    #[serde(default = "default_overtake_cooldown")]
    pub overtake_cooldown: f32,
    #[serde(default = "default_avoidance_commitment")]
    pub avoidance_commitment: f32,
    #[serde(default = "default_avoidance_radius")]
    pub avoidance_radius: f32,
    #[serde(default = "default_avoidance_awareness_angle")]
    pub avoidance_awareness_angle: f32,
    #[serde(default = "default_max_avoidance_offset")]
    pub max_avoidance_offset: f32,
    #[serde(default = "default_nitro_slowdown_duration")]
    pub nitro_slowdown_duration: f32,
    #[serde(default = "default_start_nitro_duration")]
    pub start_nitro_duration: f32,
}

fn default_lookahead_points() -> u32 {
    8
}
fn default_max_steering_angle() -> f32 {
    0.7
}
fn default_min_speed_multiplier() -> f32 {
    0.6
}
fn default_max_speed_multiplier() -> f32 {
    0.85
}
fn default_steering_speed() -> f32 {
    2.5
}
fn default_acceleration_speed() -> f32 {
    1.5
}
fn default_true() -> bool {
    true
}
fn default_corner_detection_lookahead() -> u32 {
    25
}
fn default_corner_speed_reduction_factor() -> f32 {
    0.5
}
fn default_corner_detection_threshold() -> f32 {
    0.12
}
fn default_braking_distance() -> f32 {
    15.0
}
fn default_braking_intensity_multiplier() -> f32 {
    1.8
}
fn default_path_randomness() -> f32 {
    3.5
}
fn default_randomness_change_rate() -> f32 {
    0.2
}
fn default_overtake_trigger_time() -> f32 {
    2.0
}
fn default_overtake_lane_offset() -> f32 {
    3.0
}
fn default_max_overtake_corner_factor() -> f32 {
    0.2
}
fn default_overtake_cooldown() -> f32 {
    3.0
}
fn default_avoidance_commitment() -> f32 {
    1.5
}
fn default_avoidance_radius() -> f32 {
    10.0
}
fn default_avoidance_awareness_angle() -> f32 {
    120.0
}
fn default_max_avoidance_offset() -> f32 {
    3.5
}
fn default_nitro_slowdown_duration() -> f32 {
    2.5
}
fn default_start_nitro_duration() -> f32 {
    2.0
}

impl Default for DriverPars {
    fn default() -> Self {
        DriverPars {
            lookahead_points: default_lookahead_points(),
            max_steering_angle: default_max_steering_angle(),
            min_speed_multiplier: default_min_speed_multiplier(),
            max_speed_multiplier: default_max_speed_multiplier(),
            steering_speed: default_steering_speed(),
            acceleration_speed: default_acceleration_speed(),
            use_nitro_on_straights: true,
            corner_detection_lookahead: default_corner_detection_lookahead(),
            corner_speed_reduction_factor: default_corner_speed_reduction_factor(),
            corner_detection_threshold: default_corner_detection_threshold(),
            braking_distance: default_braking_distance(),
            braking_intensity_multiplier: default_braking_intensity_multiplier(),
            path_randomness: default_path_randomness(),
            randomness_change_rate: default_randomness_change_rate(),
            overtake_trigger_time: default_overtake_trigger_time(),
            overtake_lane_offset: default_overtake_lane_offset(),
            max_overtake_corner_factor: default_max_overtake_corner_factor(),
            overtake_cooldown: default_overtake_cooldown(),
            avoidance_commitment: default_avoidance_commitment(),
            avoidance_radius: default_avoidance_radius(),
            avoidance_awareness_angle: default_avoidance_awareness_angle(),
            max_avoidance_offset: default_max_avoidance_offset(),
            nitro_slowdown_duration: default_nitro_slowdown_duration(),
            start_nitro_duration: default_start_nitro_duration(),
        }
    }
}

/// Difficulty of a single driver, both values in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Difficulty {
    pub skill: f32,
    pub aggressiveness: f32,
}

impl Default for Difficulty {
    fn default() -> Self {
        Difficulty {
            skill: 0.75,
            aggressiveness: 0.6,
        }
    }
}

impl Difficulty {
    pub fn new(skill: f32, aggressiveness: f32) -> Difficulty {
        Difficulty {
            skill: skill.clamp(0.0, 1.0),
            aggressiveness: aggressiveness.clamp(0.0, 1.0),
        }
    }
}

/// Personality holds the per-car random traits drawn once at spawn.
///
/// * `noise_seed` - Offset into the wander noise so that no two cars wander alike
/// * `handbrake_threshold` - Corner factor above which the car pulls the handbrake
/// * `nitro_cooldown` - (s) Initial nitro cooldown
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Personality {
    pub noise_seed: f32,
    pub handbrake_threshold: f32,
    pub nitro_cooldown: f32,
}

impl Personality {
    pub fn random<R: Rng>(rng: &mut R) -> Personality {
        Personality {
            noise_seed: rng.gen_range(0.0..1000.0),
            handbrake_threshold: rng.gen_range(0.12..0.19),
            nitro_cooldown: rng.gen_range(22.0..30.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let pars: DriverPars = serde_json::from_str("{}").unwrap();
        assert_eq!(pars.lookahead_points, 8);
        assert_eq!(pars.corner_detection_lookahead, 25);
        assert!(pars.use_nitro_on_straights);
        assert_eq!(pars.overtake_lane_offset, DriverPars::default().overtake_lane_offset);
    }

    #[test]
    fn difficulty_is_clamped() {
        let d = Difficulty::new(1.4, -0.2);
        assert_eq!(d.skill, 1.0);
        assert_eq!(d.aggressiveness, 0.0);
    }
}
