//! Threat field avoidance between AI cars.

use crate::core::driver::DriverPars;
use crate::core::vehicle::{CarId, PeerSnapshot, VehicleState};
use helpers::general::{clamp01, lerp, sign};

/// Threat posed by one peer, together with the lateral push it causes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threat {
    pub id: CarId,
    pub score: f32,
    pub push: f32,
}

/// assess_threats scores every active peer inside the detection radius and awareness cone.
/// Closer, more central and faster closing peers score higher; aggressive drivers discount the
/// threat. Positive pushes move the car to its left (away from a peer on its right).
pub fn assess_threats(
    own_id: CarId,
    own: &VehicleState,
    peers: &[PeerSnapshot],
    pars: &DriverPars,
    aggressiveness: f32,
) -> Vec<Threat> {
    let own_pos = own.pose.position;
    let own_fwd = own.pose.forward();
    let own_speed = own.speed();
    let half_angle = pars.avoidance_awareness_angle * 0.5;
    let aggression_factor = lerp(1.2, 0.7, aggressiveness);

    peers
        .iter()
        .filter(|peer| peer.id != own_id && peer.active)
        .filter_map(|peer| {
            let to_other = peer.pose.position - own_pos;
            let distance = to_other.length();
            if distance > pars.avoidance_radius || distance <= f32::EPSILON {
                return None;
            }
            let angle = own_fwd.angle_between(to_other).to_degrees();
            if !(angle <= half_angle) {
                return None;
            }

            let closing_speed = (own.velocity - peer.velocity).dot(own_fwd);

            let mut score = lerp(1.0, 0.1, distance / pars.avoidance_radius);
            score *= lerp(1.0, 0.2, angle / half_angle);
            score *= 1.0 + clamp01(closing_speed / own_speed.max(1.0));
            score *= aggression_factor;

            let side = sign(own.pose.to_local_point(peer.pose.position).x);
            let push = side * lerp(1.5, 3.0, score);

            Some(Threat {
                id: peer.id,
                score,
                push,
            })
        })
        .collect()
}

/// combine_threats returns the threat weighted average push, biased towards the overtaking side
/// (sign of `overtake_offset`) while overtaking and clamped to the configured range.
pub fn combine_threats(threats: &[Threat], overtake_offset: Option<f32>, max_offset: f32) -> f32 {
    let total_threat: f32 = threats.iter().map(|t| t.score).sum();
    let mut offset = if total_threat > 0.0 {
        threats.iter().map(|t| t.push * t.score).sum::<f32>() / total_threat
    } else {
        0.0
    };

    if let Some(overtake_offset) = overtake_offset {
        offset += sign(overtake_offset);
    }

    offset.clamp(-max_offset, max_offset)
}

/// AvoidanceState keeps the committed avoidance offset. A new decision is only taken once per
/// commitment window to avoid steering chatter.
#[derive(Debug, Clone, Default)]
pub struct AvoidanceState {
    committed_offset: f32,
    last_decision: Option<f32>,
}

impl AvoidanceState {
    /// update takes a new decision if the commitment window has passed and returns the committed
    /// offset. `decide` is only evaluated when a decision is due.
    pub fn update<F: FnOnce() -> f32>(&mut self, now: f32, commitment: f32, decide: F) -> f32 {
        let due = match self.last_decision {
            Some(t) => now - t > commitment,
            None => true,
        };
        if due {
            self.committed_offset = decide();
            self.last_decision = Some(now);
        }
        self.committed_offset
    }

    pub fn committed_offset(&self) -> f32 {
        self.committed_offset
    }

    pub fn reset(&mut self) {
        *self = AvoidanceState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vehicle::Pose;
    use approx::assert_abs_diff_eq;
    use glam::Vec3;

    fn own_state(speed: f32) -> VehicleState {
        VehicleState {
            pose: Pose::looking_along(Vec3::ZERO, Vec3::Z),
            velocity: Vec3::Z * speed,
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
    fn peer_on_the_right_pushes_left() {
        let pars = DriverPars::default();
        let peers = [peer(1, Vec3::new(1.5, 0.0, 5.0), 10.0)];
        let threats = assess_threats(0, &own_state(12.0), &peers, &pars, 0.5);
        assert_eq!(threats.len(), 1);
        assert!(threats[0].push > 0.0);

        let offset = combine_threats(&threats, None, pars.max_avoidance_offset);
        assert!(offset > 0.0 && offset <= pars.max_avoidance_offset);
    }

    #[test]
    fn ignores_self_far_behind_and_inactive_peers() {
        let pars = DriverPars::default();
        let mut inactive = peer(3, Vec3::new(0.5, 0.0, 3.0), 0.0);
        inactive.active = false;
        let peers = [
            peer(0, Vec3::ZERO, 0.0),
            peer(1, Vec3::new(0.0, 0.0, 25.0), 0.0),
            peer(2, Vec3::new(0.0, 0.0, -4.0), 0.0),
            inactive,
        ];
        let threats = assess_threats(0, &own_state(10.0), &peers, &pars, 0.5);
        assert!(threats.is_empty());
        assert_abs_diff_eq!(combine_threats(&threats, None, 3.5), 0.0);
    }

    #[test]
    fn closer_and_faster_closing_peers_score_higher() {
        let pars = DriverPars::default();
        let own = own_state(15.0);
        let near = assess_threats(0, &own, &[peer(1, Vec3::new(0.3, 0.0, 3.0), 15.0)], &pars, 0.5);
        let far = assess_threats(0, &own, &[peer(1, Vec3::new(0.3, 0.0, 8.0), 15.0)], &pars, 0.5);
        assert!(near[0].score > far[0].score);

        let slow = assess_threats(0, &own, &[peer(1, Vec3::new(0.3, 0.0, 5.0), 5.0)], &pars, 0.5);
        let same = assess_threats(0, &own, &[peer(1, Vec3::new(0.3, 0.0, 5.0), 15.0)], &pars, 0.5);
        assert!(slow[0].score > same[0].score);

        let cautious = assess_threats(0, &own, &[peer(1, Vec3::new(0.3, 0.0, 5.0), 15.0)], &pars, 0.0);
        let aggressive = assess_threats(0, &own, &[peer(1, Vec3::new(0.3, 0.0, 5.0), 15.0)], &pars, 1.0);
        assert!(cautious[0].score > aggressive[0].score);
    }

    #[test]
    fn overtake_bias_and_clamp() {
        let threats = [Threat {
            id: 1,
            score: 1.0,
            push: 3.0,
        }];
        assert_abs_diff_eq!(combine_threats(&threats, Some(3.0), 3.5), 3.5);
        assert_abs_diff_eq!(combine_threats(&threats, Some(-3.0), 3.5), 2.0);
        assert_abs_diff_eq!(combine_threats(&[], Some(-3.0), 3.5), -1.0);
    }

    #[test]
    fn commitment_window_holds_decision() {
        let mut state = AvoidanceState::default();
        assert_abs_diff_eq!(state.update(0.0, 1.5, || 2.0), 2.0);
        assert_abs_diff_eq!(state.update(1.0, 1.5, || -2.0), 2.0);
        assert_abs_diff_eq!(state.update(1.6, 1.5, || -2.0), -2.0);
        state.reset();
        assert_abs_diff_eq!(state.committed_offset(), 0.0);
    }
}
