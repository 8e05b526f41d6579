//! Corner anticipation on the racing line.

use crate::core::driver::DriverPars;
use crate::core::racing_line::RacingLine;
use glam::Vec3;
use helpers::general::{clamp01, lerp};

/// Curvature in [0, 1] between the directions p1 -> p2 and p2 -> p3 (0 straight, 1 reversal).
pub fn window_curvature(p1: Vec3, p2: Vec3, p3: Vec3) -> f32 {
    let v1 = (p2 - p1).normalize_or_zero();
    let v2 = (p3 - p2).normalize_or_zero();
    1.0 - (v1.dot(v2) + 1.0) / 2.0
}

/// detect_upcoming_corners estimates how sharp the corners ahead of `idx` are, weighted by how
/// close they are and adjusted by skill (weaker drivers overestimate corners). Returns a value in
/// [0, 1], 0 meaning no corner worth reacting to.
pub fn detect_upcoming_corners(line: &RacingLine, idx: usize, pars: &DriverPars, skill: f32) -> f32 {
    if line.is_empty() {
        return 0.0;
    }

    let idx = idx as i64;
    let threshold = pars.corner_detection_threshold * 0.8;
    let max_distance = pars.braking_distance * 5.0;

    let mut max_curvature = 0.0;
    let mut distance_to_corner = f32::MAX;
    let mut distance = 0.0;

    for i in 1..=pars.corner_detection_lookahead as i64 {
        // path distance from the car's point to the middle point of this window
        distance += line.segment_length(idx + i - 1);

        let curvature = window_curvature(line.point(idx), line.point(idx + i), line.point(idx + 2 * i));
        if curvature <= threshold {
            continue;
        }

        // closer corners matter more
        let distance_weight = clamp01(1.0 - distance / max_distance);
        let weighted_curvature = curvature * distance_weight;

        if weighted_curvature > max_curvature {
            max_curvature = weighted_curvature;
            distance_to_corner = distance;
        }
    }

    let mut corner_factor =
        max_curvature * clamp01(pars.braking_distance * 2.5 / distance_to_corner.max(0.1));
    corner_factor *= lerp(1.5, 1.0, skill);

    clamp01(corner_factor)
}

/// lookahead_corner_factor is the cheap single-window variant used to judge whether nitro is
/// safe: curvature between the car's point, the point `lookahead_points * multiplier` ahead and
/// the one twice as far.
pub fn lookahead_corner_factor(line: &RacingLine, idx: usize, lookahead_points: u32, multiplier: f32) -> f32 {
    if line.is_empty() {
        return 0.0;
    }
    let idx = idx as i64;
    let lookahead = (lookahead_points as f32 * multiplier).round() as i64;
    clamp01(window_curvature(
        line.point(idx),
        line.point(idx + lookahead),
        line.point(idx + 2 * lookahead),
    ))
}
