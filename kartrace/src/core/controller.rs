use crate::core::avoidance::{assess_threats, combine_threats, AvoidanceState};
use crate::core::corners::{detect_upcoming_corners, lookahead_corner_factor};
use crate::core::driver::{Difficulty, DriverPars, Personality};
use crate::core::nitro::NitroPolicy;
use crate::core::overtake::{DefenseState, OvertakeEvent, OvertakeState};
use crate::core::track::RaceTrack;
use crate::core::vehicle::{CarId, ControlOutput, PeerSnapshot, VehicleState};
use glam::Vec3;
use helpers::general::{clamp01, lerp};
use helpers::noise::perlin_noise;
use rand::rngs::StdRng;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Speed factor applied to the recommended speed while the post-nitro slowdown is enforced.
const NITRO_SLOWDOWN_SPEED_FACTOR: f32 = 0.9;
/// Handbrake values below this are snapped to zero once released.
const HANDBRAKE_RELEASE_EPS: f32 = 0.01;

/// Request from an attacker to its overtake target to consider defending.
///
/// * `target` - Car being overtaken
/// * `boost` - Acceleration multiplier of the attacker, the defender matches it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DefenseRequest {
    pub target: CarId,
    pub boost: f32,
}

/// Result of one controller tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutput {
    pub controls: ControlOutput,
    pub defense_request: Option<DefenseRequest>,
}

impl TickOutput {
    fn hold() -> TickOutput {
        TickOutput {
            controls: ControlOutput::hold(),
            defense_request: None,
        }
    }
}

/// Throttle/brake regime of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PedalRegime {
    Accelerate,
    ThrottleCut,
    ActiveBrake,
    Coast,
    NitroSlowdown,
}

/// Speed and corner thresholds separating the pedal regimes. They tighten while nitro burns.
struct RegimeThresholds {
    cut_corner: f32,
    cut_speed_ratio: f32,
    brake_corner: f32,
    brake_speed_ratio: f32,
}

impl RegimeThresholds {
    fn new(nitro_active: bool) -> RegimeThresholds {
        if nitro_active {
            RegimeThresholds {
                cut_corner: 0.03,
                cut_speed_ratio: 1.02,
                brake_corner: 0.2,
                brake_speed_ratio: 1.1,
            }
        } else {
            RegimeThresholds {
                cut_corner: 0.05,
                cut_speed_ratio: 1.05,
                brake_corner: 0.3,
                brake_speed_ratio: 1.15,
            }
        }
    }
}

/// DrivingController is the autonomous driver of a single car. Once per tick it turns the car's
/// state relative to the racing line (and the frozen snapshot of its peers) into control values.
///
/// * `id` - Registry id of the car
/// * `name` - Display name
/// * `track` - Shared track, None until the car is placed on one
/// * `pars` - Driver tuning
/// * `difficulty` - Skill and aggressiveness
/// * `personality` - Random traits drawn at spawn
/// * `rng` - Private random generator of this driver
/// * `is_racing` - Set by the race director once the countdown ends
/// * `stopped` - Set when the car finished, overrides everything with a hold
/// * `clock` - (s) Racing time seen by this controller
/// * `waypoint_idx` - Nearest racing line point
/// * `race_progress` - Fraction of the lap, (index + intra-segment fraction) / N
/// * `corner_factor` - Last corner factor
/// * `rubber_banding_factor` - Multiplier on the target speed set by the race director
/// * `regime` - Pedal regime of the last tick
#[derive(Debug)]
pub struct DrivingController {
    id: CarId,
    name: String,
    track: Option<Rc<RaceTrack>>,
    pars: DriverPars,
    difficulty: Difficulty,
    personality: Personality,
    rng: StdRng,
    is_racing: bool,
    stopped: bool,
    clock: f32,
    waypoint_idx: usize,
    race_progress: f32,
    corner_factor: f32,
    rubber_banding_factor: f32,
    regime: PedalRegime,
    steer: f32,
    throttle: f32,
    brake: f32,
    handbrake: f32,
    overtake: OvertakeState,
    defense: DefenseState,
    avoidance: AvoidanceState,
    nitro: NitroPolicy,
    warned_no_track: bool,
}

impl DrivingController {
    pub fn new(
        id: CarId,
        name: &str,
        pars: DriverPars,
        difficulty: Difficulty,
        mut rng: StdRng,
    ) -> DrivingController {
        let personality = Personality::random(&mut rng);

        DrivingController {
            id,
            name: name.to_owned(),
            track: None,
            pars,
            difficulty,
            personality,
            rng,
            is_racing: false,
            stopped: false,
            clock: 0.0,
            waypoint_idx: 0,
            race_progress: 0.0,
            corner_factor: 0.0,
            rubber_banding_factor: 1.0,
            regime: PedalRegime::Coast,
            steer: 0.0,
            throttle: 0.0,
            brake: 0.0,
            handbrake: 0.0,
            overtake: OvertakeState::default(),
            defense: DefenseState::default(),
            avoidance: AvoidanceState::default(),
            nitro: NitroPolicy::new(personality.nitro_cooldown),
            warned_no_track: false,
        }
    }

    // ---------------------------------------------------------------------------------------------
    // MAIN METHOD ---------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// tick runs the decision pipeline once. Until racing starts, after a stop and whenever there
    /// is no usable racing line, the car is held with full handbrake and no throttle.
    pub fn tick(&mut self, vehicle: &VehicleState, peers: &[PeerSnapshot], dt: f32) -> TickOutput {
        if !self.is_racing || self.stopped {
            return TickOutput::hold();
        }

        let track = match &self.track {
            Some(track) if !track.line.is_empty() => Rc::clone(track),
            _ => {
                if !self.warned_no_track {
                    warn!("{}: no usable racing line, holding the car", self.name);
                    self.warned_no_track = true;
                }
                return TickOutput::hold();
            }
        };
        let line = &track.line;
        let skill = self.difficulty.skill;
        let aggressiveness = self.difficulty.aggressiveness;

        self.clock += dt;

        // locate the car on the line
        let local_pos = track.to_local(vehicle.pose.position);
        let idx = match line.closest_point(local_pos) {
            Some((idx, _, _)) => idx,
            None => return TickOutput::hold(),
        };
        self.waypoint_idx = idx;
        self.race_progress = self.progress_on_line(&track, local_pos);

        // target point and speed
        let lookahead = (self.pars.lookahead_points as f32 * (1.0 + skill)).round() as i64;
        let target_idx = idx as i64 + lookahead;
        let (target_local, recommended_speed) = match line.next_target_point(idx as i64, lookahead) {
            Some(target) => target,
            None => return TickOutput::hold(),
        };

        self.corner_factor = detect_upcoming_corners(line, idx, &self.pars, skill);
        let corner_factor = self.corner_factor;
        let ideal_speed = self.ideal_speed(recommended_speed, corner_factor);
        let target_speed = ideal_speed * self.rubber_banding_factor;

        // overtaking and defending
        let event = self.overtake.update(
            self.id,
            vehicle,
            peers,
            ideal_speed * vehicle.max_speed,
            corner_factor,
            &self.pars,
            &mut self.rng,
            dt,
        );
        let defense_request = self.handle_overtake_event(event);
        if self.defense.update(dt) {
            debug!("{}: defence over", self.name);
        }

        // lateral composition
        let wander = self.wander_offset();
        let overtake_bias = if self.overtake.is_overtaking() {
            Some(self.overtake.target_offset())
        } else {
            None
        };
        let (own_id, pars) = (self.id, &self.pars);
        let avoidance_offset = self.avoidance.update(self.clock, pars.avoidance_commitment, || {
            let threats = assess_threats(own_id, vehicle, peers, pars, aggressiveness);
            combine_threats(&threats, overtake_bias, pars.max_avoidance_offset)
        });
        let lateral_offset = wander + self.overtake.current_offset() + avoidance_offset;

        let normal = line.tangent(target_idx).cross(Vec3::Y).normalize_or_zero();
        let target_world = track.to_world(target_local + normal * lateral_offset);

        // steering
        self.update_steering(vehicle, target_world, dt);

        // throttle and brake
        self.update_pedals(vehicle, target_speed, recommended_speed, corner_factor, dt);

        // handbrake
        let handbrake_goal = if corner_factor > self.personality.handbrake_threshold {
            1.0
        } else {
            0.0
        };
        self.handbrake = lerp(self.handbrake, handbrake_goal, dt * 2.0);
        if handbrake_goal == 0.0 && self.handbrake < HANDBRAKE_RELEASE_EPS {
            self.handbrake = 0.0;
        }

        // nitro
        let near = lookahead_corner_factor(line, idx, self.pars.lookahead_points, 1.0);
        let far = lookahead_corner_factor(line, idx, self.pars.lookahead_points, 2.0);
        let nitro = self
            .nitro
            .update(&vehicle.nitro, near, far, &self.pars, &mut self.rng, dt);
        if nitro && !self.nitro.in_start_window() {
            info!("{}: firing nitro", self.name);
        }

        TickOutput {
            controls: ControlOutput {
                steer: self.steer,
                throttle: self.throttle,
                brake: self.brake,
                handbrake: self.handbrake,
                nitro,
                acceleration_scale: self.acceleration_scale(),
            },
            defense_request,
        }
    }

    // ---------------------------------------------------------------------------------------------
    // PIPELINE STEPS ------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// progress_on_line returns (index + fraction of the segment to the next point) / N.
    fn progress_on_line(&self, track: &RaceTrack, local_pos: Vec3) -> f32 {
        let line = &track.line;
        let n = line.len();
        let idx = self.waypoint_idx as i64;
        let segment_length = line.segment_length(idx);
        let fraction = if segment_length > 0.0 {
            clamp01(1.0 - local_pos.distance(line.point(idx + 1)) / segment_length)
        } else {
            0.0
        };
        (self.waypoint_idx as f32 + fraction) / n as f32
    }

    /// ideal_speed is the normalized speed the driver aims for, before rubber-banding.
    fn ideal_speed(&self, recommended_speed: f32, corner_factor: f32) -> f32 {
        let corner_reduction = lerp(1.0, self.pars.corner_speed_reduction_factor, corner_factor.powf(0.7));
        let skill_multiplier = lerp(
            self.pars.min_speed_multiplier,
            self.pars.max_speed_multiplier,
            self.difficulty.skill,
        );
        recommended_speed * corner_reduction * skill_multiplier * (1.0 + self.difficulty.aggressiveness * 0.2)
    }

    /// wander_offset is the slowly varying humanization offset.
    fn wander_offset(&self) -> f32 {
        let noise = perlin_noise(self.clock * self.pars.randomness_change_rate, self.personality.noise_seed);
        (noise * 2.0 - 1.0) * self.pars.path_randomness
    }

    fn handle_overtake_event(&mut self, event: Option<OvertakeEvent>) -> Option<DefenseRequest> {
        match event {
            Some(OvertakeEvent::Started { target, boost }) => {
                info!(
                    "{}: overtaking car {} on the {} (boost {:.2})",
                    self.name,
                    target,
                    if self.overtake.target_offset() > 0.0 { "left" } else { "right" },
                    boost
                );
                Some(DefenseRequest { target, boost })
            }
            Some(OvertakeEvent::Finished { target }) => {
                info!("{}: overtake on car {} finished", self.name, target);
                None
            }
            None => None,
        }
    }

    fn update_steering(&mut self, vehicle: &VehicleState, target_world: Vec3, dt: f32) {
        let to_target = vehicle.pose.to_local_point(target_world);
        let magnitude = to_target.length();
        let raw_steer = if magnitude > f32::EPSILON {
            let max_steer = self.pars.max_steering_angle;
            // less skilled drivers oversteer
            (to_target.x / magnitude).clamp(-max_steer, max_steer) * lerp(1.5, 1.0, self.difficulty.skill)
        } else {
            0.0
        };

        let rate = dt * self.pars.steering_speed * (1.0 + self.difficulty.skill);
        self.steer = lerp(self.steer, raw_steer, rate).clamp(-1.0, 1.0);
    }

    /// update_pedals picks exactly one pedal regime and moves throttle and brake towards its
    /// targets. Speeds are normalized by the car's maximum speed.
    fn update_pedals(
        &mut self,
        vehicle: &VehicleState,
        target_speed: f32,
        recommended_speed: f32,
        corner_factor: f32,
        dt: f32,
    ) {
        let speed = vehicle.normalized_speed();
        let accel_rate = dt * self.pars.acceleration_speed;

        // after a nitro burst the car must not overshoot the line's speed
        let mut target_speed = target_speed;
        if self.nitro.in_slowdown() {
            let cap = recommended_speed * NITRO_SLOWDOWN_SPEED_FACTOR;
            if speed > cap {
                self.regime = PedalRegime::NitroSlowdown;
                self.throttle = lerp(self.throttle, 0.0, dt * 3.0);
                self.brake = lerp(self.brake, 1.0, dt * 2.0);
                return;
            }
            target_speed = target_speed.min(cap);
        }

        let thresholds = RegimeThresholds::new(vehicle.nitro.active);
        let overshoot = if target_speed > f32::EPSILON {
            speed / target_speed - 1.0
        } else {
            speed
        };
        let intensity = self.pars.braking_intensity_multiplier;

        self.regime = if speed < target_speed && corner_factor < 0.1 {
            PedalRegime::Accelerate
        } else if speed > target_speed * thresholds.brake_speed_ratio || corner_factor > thresholds.brake_corner {
            PedalRegime::ActiveBrake
        } else if corner_factor > thresholds.cut_corner || speed > target_speed * thresholds.cut_speed_ratio {
            PedalRegime::ThrottleCut
        } else {
            PedalRegime::Coast
        };

        match self.regime {
            PedalRegime::Accelerate => {
                let throttle_goal = (1.0 - corner_factor * 3.0).max(0.05);
                self.throttle = lerp(self.throttle, throttle_goal, accel_rate);
                self.brake = lerp(self.brake, 0.0, accel_rate * 2.0);
            }
            PedalRegime::ActiveBrake => {
                let mut braking = clamp01(overshoot * intensity * 0.8);
                if corner_factor > thresholds.brake_corner {
                    let mut corner_braking = corner_factor.powf(0.8) * 1.2;
                    if vehicle.nitro.active && corner_factor > 0.1 {
                        corner_braking *= 2.0;
                    }
                    if corner_factor > 0.25 {
                        corner_braking *= 1.5;
                    }
                    braking = braking.max(clamp01(corner_braking * 0.6));
                }
                self.throttle = lerp(self.throttle, 0.0, accel_rate * 2.0);
                self.brake = lerp(self.brake, braking, accel_rate * 1.5);
            }
            PedalRegime::ThrottleCut => {
                let light_brake = if overshoot > 0.1 {
                    clamp01(overshoot * intensity * 0.3)
                } else {
                    0.0
                };
                self.throttle = lerp(self.throttle, 0.0, accel_rate * 1.5);
                self.brake = lerp(self.brake, light_brake, accel_rate * 1.5);
            }
            PedalRegime::Coast | PedalRegime::NitroSlowdown => {
                self.throttle = lerp(self.throttle, 0.0, accel_rate);
                self.brake = lerp(self.brake, 0.0, accel_rate);
            }
        }
    }

    fn acceleration_scale(&self) -> f32 {
        self.overtake
            .acceleration_scale()
            .max(self.defense.acceleration_scale())
    }

    // ---------------------------------------------------------------------------------------------
    // CONTROL SURFACE -----------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// set_track places the controller on a (possibly regenerated) track and re-anchors its
    /// waypoint index at `position`.
    pub fn set_track(&mut self, track: Option<Rc<RaceTrack>>, position: Vec3) {
        self.track = track;
        self.warned_no_track = false;
        self.waypoint_idx = 0;
        self.race_progress = 0.0;

        if let Some(track) = &self.track {
            if let Some((idx, _, _)) = track.line.closest_point(track.to_local(position)) {
                self.waypoint_idx = idx;
                self.race_progress = idx as f32 / track.line.len() as f32;
            }
        }
    }

    /// set_racing flips the racing flag. The edge into racing opens the launch nitro window.
    pub fn set_racing(&mut self, racing: bool) {
        if racing && !self.is_racing {
            self.nitro.start_race(&self.pars);
            debug!("{}: racing", self.name);
        }
        self.is_racing = racing;
    }

    /// stop holds the car from now on (used when it finished).
    pub fn stop(&mut self) {
        self.stopped = true;
        self.throttle = 0.0;
        self.brake = 0.0;
    }

    /// force_overtake starts an overtake on `target` right away. Ignored when not racing, when
    /// already overtaking or when the target is the car itself.
    pub fn force_overtake(&mut self, target: CarId) -> Option<DefenseRequest> {
        if !self.is_racing || self.stopped || target == self.id {
            return None;
        }
        let event = self.overtake.force(target, &self.pars, &mut self.rng);
        self.handle_overtake_event(event)
    }

    /// try_start_defense is called when another car starts overtaking this one.
    pub fn try_start_defense(&mut self, attacker_boost: f32) -> bool {
        if !self.is_racing || self.stopped {
            return false;
        }
        let defending = self.defense.try_start(attacker_boost, &mut self.rng);
        if defending {
            info!("{}: defending (boost {:.2})", self.name, attacker_boost);
        }
        defending
    }

    /// reset discards all transient state and waits for the next start.
    pub fn reset(&mut self) {
        self.is_racing = false;
        self.stopped = false;
        self.clock = 0.0;
        self.race_progress = 0.0;
        self.corner_factor = 0.0;
        self.rubber_banding_factor = 1.0;
        self.regime = PedalRegime::Coast;
        self.steer = 0.0;
        self.throttle = 0.0;
        self.brake = 0.0;
        self.handbrake = 0.0;
        self.overtake.reset();
        self.defense.reset();
        self.avoidance.reset();
        self.nitro.reset(self.personality.nitro_cooldown);
    }

    pub fn set_rubber_banding_factor(&mut self, factor: f32) {
        self.rubber_banding_factor = factor;
    }

    pub fn set_difficulty(&mut self, difficulty: Difficulty) {
        self.difficulty = difficulty;
    }

    pub fn id(&self) -> CarId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn personality(&self) -> Personality {
        self.personality
    }

    pub fn is_racing(&self) -> bool {
        self.is_racing
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn race_progress(&self) -> f32 {
        self.race_progress
    }

    pub fn waypoint_index(&self) -> usize {
        self.waypoint_idx
    }

    pub fn corner_factor(&self) -> f32 {
        self.corner_factor
    }

    pub fn rubber_banding_factor(&self) -> f32 {
        self.rubber_banding_factor
    }

    pub fn regime(&self) -> PedalRegime {
        self.regime
    }

    pub fn is_overtaking(&self) -> bool {
        self.overtake.is_overtaking()
    }

    pub fn overtake_target(&self) -> Option<CarId> {
        self.overtake.target()
    }

    pub fn overtake_offset(&self) -> f32 {
        self.overtake.current_offset()
    }

    pub fn overtake_target_offset(&self) -> f32 {
        self.overtake.target_offset()
    }

    pub fn is_defending(&self) -> bool {
        self.defense.is_defending()
    }
}
