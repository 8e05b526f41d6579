//! Overtaking (attacker side) and defending (target side).

use crate::core::driver::DriverPars;
use crate::core::vehicle::{CarId, PeerSnapshot, VehicleState};
use helpers::general::lerp;
use rand::Rng;
use rand_distr::{Distribution, Uniform};

/// Peers further away than this are never considered for an overtake.
pub const OVERTAKE_DETECTION_RANGE: f32 = 15.0;
/// Minimum dot product between the car's forward axis and the direction to the peer.
pub const OVERTAKE_CONE_DOT: f32 = 0.6;
/// The car must intend to drive this much faster than the peer to count as stuck behind it.
pub const OVERTAKE_SPEED_MARGIN: f32 = 1.05;
/// Rate (1/s) at which the lateral overtake offset follows its target.
const OFFSET_FOLLOW_RATE: f32 = 2.0;

/// find_car_to_overtake returns the nearest active peer in front of the car (inside the forward
/// cone and the detection range).
pub fn find_car_to_overtake<'a>(
    own_id: CarId,
    own: &VehicleState,
    peers: &'a [PeerSnapshot],
) -> Option<&'a PeerSnapshot> {
    let own_pos = own.pose.position;
    let own_fwd = own.pose.forward();

    peers
        .iter()
        .filter(|peer| peer.id != own_id && peer.active)
        .filter_map(|peer| {
            let to_peer = peer.pose.position - own_pos;
            let distance = to_peer.length();
            if distance >= OVERTAKE_DETECTION_RANGE || distance <= f32::EPSILON {
                return None;
            }
            if own_fwd.dot(to_peer / distance) <= OVERTAKE_CONE_DOT {
                return None;
            }
            Some((peer, distance))
        })
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(peer, _)| peer)
}

/// Transitions reported by OvertakeState.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OvertakeEvent {
    /// An overtake started; the target should be asked to defend with the given boost.
    Started { target: CarId, boost: f32 },
    /// The overtake ended (target passed or gone), the cooldown is running.
    Finished { target: CarId },
}

/// OvertakeState is the attacker side of the overtake behaviour.
///
/// * `stuck_timer` - (s) Time spent behind a slower car
/// * `target` - Car being overtaken, only a reference by id that is re-validated every tick
/// * `current_offset` - (m) Lateral offset, low-pass filtered towards `target_offset`
/// * `target_offset` - (m) Lateral offset of the chosen overtaking side
/// * `cooldown` - (s) Time until the next overtake may start
/// * `boost` - Acceleration multiplier while overtaking
#[derive(Debug, Clone)]
pub struct OvertakeState {
    stuck_timer: f32,
    target: Option<CarId>,
    current_offset: f32,
    target_offset: f32,
    cooldown: f32,
    boost: f32,
}

impl Default for OvertakeState {
    fn default() -> Self {
        OvertakeState {
            stuck_timer: 0.0,
            target: None,
            current_offset: 0.0,
            target_offset: 0.0,
            cooldown: 0.0,
            boost: 1.0,
        }
    }
}

impl OvertakeState {
    pub fn is_overtaking(&self) -> bool {
        self.target.is_some()
    }

    pub fn target(&self) -> Option<CarId> {
        self.target
    }

    pub fn current_offset(&self) -> f32 {
        self.current_offset
    }

    pub fn target_offset(&self) -> f32 {
        self.target_offset
    }

    pub fn cooldown(&self) -> f32 {
        self.cooldown
    }

    pub fn stuck_timer(&self) -> f32 {
        self.stuck_timer
    }

    /// acceleration_scale is the boost while overtaking and 1.0 otherwise.
    pub fn acceleration_scale(&self) -> f32 {
        if self.is_overtaking() {
            self.boost
        } else {
            1.0
        }
    }

    /// update runs one tick of the overtake behaviour.
    ///
    /// * `desired_speed` - (m/s) Speed the car wants to drive at
    /// * `corner_factor` - Current corner factor, overtakes only start on straights
    #[allow(clippy::too_many_arguments)]
    pub fn update<R: Rng>(
        &mut self,
        own_id: CarId,
        own: &VehicleState,
        peers: &[PeerSnapshot],
        desired_speed: f32,
        corner_factor: f32,
        pars: &DriverPars,
        rng: &mut R,
        dt: f32,
    ) -> Option<OvertakeEvent> {
        if self.cooldown > 0.0 {
            self.cooldown = (self.cooldown - dt).max(0.0);
        }

        let event = match self.target {
            Some(target) => {
                let target_ahead = peers
                    .iter()
                    .find(|peer| peer.id == target && peer.active)
                    .map(|peer| own.pose.forward().dot(peer.pose.position - own.pose.position) >= 0.0)
                    .unwrap_or(false);

                if target_ahead {
                    None
                } else {
                    self.finish(pars);
                    Some(OvertakeEvent::Finished { target })
                }
            }
            None => {
                let slower_car = find_car_to_overtake(own_id, own, peers).filter(|peer| {
                    desired_speed > peer.speed() * OVERTAKE_SPEED_MARGIN
                        && corner_factor < pars.max_overtake_corner_factor
                });

                match slower_car {
                    // no stuck time is collected while cooling down
                    Some(_) if self.cooldown > 0.0 => None,
                    Some(peer) => {
                        self.stuck_timer += dt;
                        if self.stuck_timer > pars.overtake_trigger_time {
                            let boost = self.start(peer.id, pars, rng);
                            Some(OvertakeEvent::Started {
                                target: peer.id,
                                boost,
                            })
                        } else {
                            None
                        }
                    }
                    None => {
                        self.stuck_timer = 0.0;
                        None
                    }
                }
            }
        };

        let goal = if self.is_overtaking() { self.target_offset } else { 0.0 };
        self.current_offset = lerp(self.current_offset, goal, dt * OFFSET_FOLLOW_RATE);

        event
    }

    /// force starts an overtake on `target` right away, skipping the stuck timer. Ignored (None)
    /// when already overtaking or already targeting that car.
    pub fn force<R: Rng>(&mut self, target: CarId, pars: &DriverPars, rng: &mut R) -> Option<OvertakeEvent> {
        if self.is_overtaking() || self.target == Some(target) {
            return None;
        }
        let boost = self.start(target, pars, rng);
        self.cooldown = pars.overtake_cooldown;
        Some(OvertakeEvent::Started { target, boost })
    }

    fn start<R: Rng>(&mut self, target: CarId, pars: &DriverPars, rng: &mut R) -> f32 {
        let side = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        self.target = Some(target);
        self.target_offset = side * pars.overtake_lane_offset;
        self.boost = Uniform::new_inclusive(1.1, 1.3).sample(rng);
        self.stuck_timer = 0.0;
        self.boost
    }

    fn finish(&mut self, pars: &DriverPars) {
        self.target = None;
        self.target_offset = 0.0;
        self.boost = 1.0;
        self.stuck_timer = 0.0;
        self.cooldown = pars.overtake_cooldown;
    }

    pub fn reset(&mut self) {
        *self = OvertakeState::default();
    }
}

/// DefenseState is the target side of an overtake: with 50 % probability the car defends for a
/// random 5 - 10 s, matching the attacker's acceleration boost.
#[derive(Debug, Clone, Default)]
pub struct DefenseState {
    remaining: f32,
    acceleration_scale: f32,
}

impl DefenseState {
    pub fn is_defending(&self) -> bool {
        self.remaining > 0.0
    }

    pub fn acceleration_scale(&self) -> f32 {
        if self.is_defending() {
            self.acceleration_scale
        } else {
            1.0
        }
    }

    /// try_start returns true if the car decided to defend. A running defence is not extended.
    pub fn try_start<R: Rng>(&mut self, attacker_boost: f32, rng: &mut R) -> bool {
        if self.is_defending() || !rng.gen_bool(0.5) {
            return false;
        }
        self.remaining = Uniform::new_inclusive(5.0, 10.0).sample(rng);
        self.acceleration_scale = attacker_boost;
        true
    }

    /// update counts the defence down and returns true on the tick it expires.
    pub fn update(&mut self, dt: f32) -> bool {
        if !self.is_defending() {
            return false;
        }
        self.remaining -= dt;
        !self.is_defending()
    }

    pub fn reset(&mut self) {
        *self = DefenseState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vehicle::Pose;
    use approx::assert_abs_diff_eq;
    use glam::Vec3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn own_state() -> VehicleState {
        VehicleState {
            pose: Pose::looking_along(Vec3::ZERO, Vec3::Z),
            velocity: Vec3::Z * 12.0,
            max_speed: 30.0,
            ..VehicleState::default()
        }
    }

    fn peer(id: CarId, position: Vec3, speed: f32) -> PeerSnapshot {
        PeerSnapshot {
            id,
            pose: Pose::looking_along(position, Vec3::Z),
            velocity: Vec3::Z * speed,
            active: true,
        }
    }

    #[test]
    fn finds_nearest_car_in_front() {
        let peers = [
            peer(1, Vec3::new(0.0, 0.0, 12.0), 5.0),
            peer(2, Vec3::new(0.5, 0.0, 6.0), 5.0),
            peer(3, Vec3::new(6.0, 0.0, 2.0), 5.0),
            peer(4, Vec3::new(0.0, 0.0, -3.0), 5.0),
        ];
        let found = find_car_to_overtake(0, &own_state(), &peers).map(|p| p.id);
        assert_eq!(found, Some(2));
        assert!(find_car_to_overtake(0, &own_state(), &peers[2..]).is_none());
    }

    #[test]
    fn stuck_behind_slower_car_starts_overtake() {
        let pars = DriverPars::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut state = OvertakeState::default();
        let peers = [peer(1, Vec3::new(0.0, 0.0, 8.0), 8.0)];
        let dt = 0.1;

        let mut started = None;
        for step in 0..40 {
            if let Some(event) = state.update(0, &own_state(), &peers, 14.0, 0.0, &pars, &mut rng, dt) {
                started = Some((step, event));
                break;
            }
        }

        let (step, event) = started.expect("no overtake started");
        assert!(step as f32 * dt >= pars.overtake_trigger_time - dt);
        match event {
            OvertakeEvent::Started { target, boost } => {
                assert_eq!(target, 1);
                assert!((1.1..=1.3).contains(&boost));
            }
            _ => panic!("unexpected event {:?}", event),
        }
        assert!(state.is_overtaking());
        assert_abs_diff_eq!(state.target_offset().abs(), pars.overtake_lane_offset);
        assert!(state.current_offset() != 0.0);
        assert!(state.current_offset().abs() <= pars.overtake_lane_offset);
    }

    #[test]
    fn no_overtake_in_corners_or_behind_faster_cars() {
        let pars = DriverPars::default();
        let mut rng = StdRng::seed_from_u64(5);
        let peers = [peer(1, Vec3::new(0.0, 0.0, 8.0), 8.0)];

        let mut state = OvertakeState::default();
        for _ in 0..100 {
            assert!(state
                .update(0, &own_state(), &peers, 14.0, 0.5, &pars, &mut rng, 0.1)
                .is_none());
        }

        let mut state = OvertakeState::default();
        for _ in 0..100 {
            assert!(state
                .update(0, &own_state(), &peers, 8.2, 0.0, &pars, &mut rng, 0.1)
                .is_none());
        }
        assert_abs_diff_eq!(state.stuck_timer(), 0.0);
    }

    #[test]
    fn stuck_timer_waits_for_the_cooldown() {
        let pars = DriverPars::default();
        let mut rng = StdRng::seed_from_u64(13);
        let mut state = OvertakeState::default();
        state.force(1, &pars, &mut rng);
        let behind = [peer(1, Vec3::new(3.0, 0.0, -1.0), 8.0)];
        state.update(0, &own_state(), &behind, 14.0, 0.0, &pars, &mut rng, 0.1);
        assert!(!state.is_overtaking());

        let dt = 0.1;
        let slow_ahead = [peer(2, Vec3::new(0.0, 0.0, 8.0), 8.0)];
        let cooldown_steps = (pars.overtake_cooldown / dt).floor() as usize - 1;
        for _ in 0..cooldown_steps {
            assert!(state
                .update(0, &own_state(), &slow_ahead, 14.0, 0.0, &pars, &mut rng, dt)
                .is_none());
            assert_abs_diff_eq!(state.stuck_timer(), 0.0);
        }

        // the full trigger time is needed once the cooldown expired
        let mut steps = 0;
        while state
            .update(0, &own_state(), &slow_ahead, 14.0, 0.0, &pars, &mut rng, dt)
            .is_none()
        {
            steps += 1;
            assert!(steps < 1000);
        }
        assert!(steps as f32 * dt >= pars.overtake_trigger_time - dt);
    }

    #[test]
    fn overtake_ends_when_target_passed_or_gone() {
        let pars = DriverPars::default();
        let mut rng = StdRng::seed_from_u64(9);
        let mut state = OvertakeState::default();
        assert!(state.force(1, &pars, &mut rng).is_some());
        assert!(state.force(1, &pars, &mut rng).is_none());
        assert!(state.force(2, &pars, &mut rng).is_none());

        // still ahead
        let ahead = [peer(1, Vec3::new(3.0, 0.0, 2.0), 8.0)];
        assert!(state.update(0, &own_state(), &ahead, 14.0, 0.0, &pars, &mut rng, 0.1).is_none());
        assert!(state.acceleration_scale() > 1.0);

        // passed
        let behind = [peer(1, Vec3::new(3.0, 0.0, -1.0), 8.0)];
        let event = state.update(0, &own_state(), &behind, 14.0, 0.0, &pars, &mut rng, 0.1);
        assert_eq!(event, Some(OvertakeEvent::Finished { target: 1 }));
        assert!(!state.is_overtaking());
        assert_abs_diff_eq!(state.acceleration_scale(), 1.0);
        assert_abs_diff_eq!(state.cooldown(), pars.overtake_cooldown);

        // despawned target
        let mut state = OvertakeState::default();
        state.force(1, &pars, &mut rng);
        let event = state.update(0, &own_state(), &[], 14.0, 0.0, &pars, &mut rng, 0.1);
        assert_eq!(event, Some(OvertakeEvent::Finished { target: 1 }));
    }

    #[test]
    fn defense_runs_for_limited_time() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut defense = DefenseState::default();
        let mut attempts = 0;
        while !defense.try_start(1.2, &mut rng) {
            attempts += 1;
            assert!(attempts < 64);
        }
        assert!(defense.is_defending());
        assert_abs_diff_eq!(defense.acceleration_scale(), 1.2);
        assert!(!defense.try_start(1.3, &mut rng));

        let mut elapsed = 0.0;
        while !defense.update(0.5) {
            elapsed += 0.5;
            assert!(elapsed <= 10.0);
        }
        assert!(elapsed >= 4.5);
        assert_abs_diff_eq!(defense.acceleration_scale(), 1.0);
    }
}
