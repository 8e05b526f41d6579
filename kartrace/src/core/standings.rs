//! Live standings and rubber-banding.

use helpers::general::{argsort, inverse_lerp, lerp, SortOrder};
use serde::Deserialize;

/// * `enabled` - Apply rubber-banding at all
/// * `strength` - Global strength knob (0 - 1)
/// * `max_boost` - Speed multiplier approached by cars far behind the leader (> 1)
/// * `leader_penalty` - Speed multiplier approached by a leader far ahead (< 1)
/// * `lead_threshold` - (laps) Lead over the second AI car below which the leader is not penalized
/// * `behind_range` - (laps) Gap to the leader at which the full boost is reached
#[derive(Debug, Deserialize, Clone)]
pub struct RubberBandPars {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_strength")]
    pub strength: f32,
    #[serde(default = "default_max_boost")]
    pub max_boost: f32,
    #[serde(default = "default_leader_penalty")]
    pub leader_penalty: f32,
    #[serde(default = "default_lead_threshold")]
    pub lead_threshold: f32,
    #[serde(default = "default_behind_range")]
    pub behind_range: f32,
}

fn default_true() -> bool {
    true
}
fn default_strength() -> f32 {
    0.8
}
fn default_max_boost() -> f32 {
    1.15
}
fn default_leader_penalty() -> f32 {
    0.9
}
fn default_lead_threshold() -> f32 {
    0.1
}
fn default_behind_range() -> f32 {
    0.2
}

impl Default for RubberBandPars {
    fn default() -> Self {
        RubberBandPars {
            enabled: true,
            strength: default_strength(),
            max_boost: default_max_boost(),
            leader_penalty: default_leader_penalty(),
            lead_threshold: default_lead_threshold(),
            behind_range: default_behind_range(),
        }
    }
}

/// rank_order returns entrant indices sorted by descending progress. Ties keep their input order.
pub fn rank_order(progress: &[f32]) -> Vec<usize> {
    argsort(progress, SortOrder::Descending)
}

/// ranks_from_order converts an order into 1-based positions per entrant.
pub fn ranks_from_order(order: &[usize]) -> Vec<usize> {
    let mut ranks = vec![0; order.len()];
    for (pos, &idx) in order.iter().enumerate() {
        ranks[idx] = pos + 1;
    }
    ranks
}

/// leader_penalty_factor maps the leader's lead over the second AI car into [0, 1]. Leads below
/// the threshold are not penalized, the full penalty is reached at twice the threshold.
pub fn leader_penalty_factor(lead: f32, lead_threshold: f32) -> f32 {
    if lead < lead_threshold {
        0.0
    } else {
        inverse_lerp(lead_threshold, 2.0 * lead_threshold, lead)
    }
}

/// rubber_band_multipliers computes the speed multiplier of every entrant from its composite
/// progress. Non-AI entrants always get 1.0, they may lead but are never adjusted.
pub fn rubber_band_multipliers(progress: &[f32], is_ai: &[bool], pars: &RubberBandPars) -> Vec<f32> {
    let mut multipliers = vec![1.0; progress.len()];
    if !pars.enabled || progress.is_empty() {
        return multipliers;
    }

    let strength = pars.strength.clamp(0.0, 1.0);
    let order = rank_order(progress);
    let leader = order[0];
    let leader_progress = progress[leader];

    if is_ai[leader] {
        let second_ai = order.iter().skip(1).find(|&&idx| is_ai[idx]);
        if let Some(&second) = second_ai {
            let lead = leader_progress - progress[second];
            let penalty = leader_penalty_factor(lead, pars.lead_threshold);
            multipliers[leader] = lerp(1.0, pars.leader_penalty.min(1.0), penalty * strength);
        }
    }

    for &idx in order.iter().skip(1).filter(|&&idx| is_ai[idx]) {
        let behind = leader_progress - progress[idx];
        let boost = inverse_lerp(0.0, pars.behind_range, behind);
        multipliers[idx] = lerp(1.0, pars.max_boost.max(1.0), boost * strength);
    }

    multipliers
}
