use glam::Vec3;
use helpers::general::{inverse_lerp, lerp, sign, wrap_index};
use tracing::{debug, warn};

/// Maximum distance of a racing line point from its densified center point, as a fraction of
/// the track width.
pub const MAX_OFFSET_WIDTH_FRAC: f32 = 0.4;
/// Recommended speed in the sharpest possible corner.
pub const MIN_RECOMMENDED_SPEED: f32 = 0.3;
/// Maximum change of the recommended speed between two neighbouring points.
pub const MAX_SPEED_STEP: f32 = 0.1;

/// Below this value of the cross product's vertical component a point counts as straight, i.e.
/// it has no inside to cut towards.
const STRAIGHT_EPS: f32 = 1e-4;

/// RacingLine is the closed, smoothed, speed-annotated path the AI drivers follow. It lives in
/// track-local space and is immutable after generation.
///
/// * `points` - Racing line points, the line is closed (index N wraps to 0)
/// * `speeds` - Recommended speed at each point, normalized to [0.3, 1.0]
/// * `centers` - Densified track center point each racing line point was derived from
/// * `polygon_speeds` - Speed factors derived from the corner angles of the densified polygon
/// * `width` - Track width used for generation
#[derive(Debug, Clone, Default)]
pub struct RacingLine {
    points: Vec<Vec3>,
    speeds: Vec<f32>,
    centers: Vec<Vec3>,
    polygon_speeds: Vec<f32>,
    width: f32,
}

/// Unsigned angle between two vectors in degrees, 0.0 if one of them has no length.
fn angle_deg(a: Vec3, b: Vec3) -> f32 {
    let denom = (a.length_squared() * b.length_squared()).sqrt();
    if denom < 1e-15 {
        return 0.0;
    }
    (a.dot(b) / denom).clamp(-1.0, 1.0).acos().to_degrees()
}

fn catmull_rom_point(p0: Vec3, p1: Vec3, p2: Vec3, p3: Vec3, t: f32) -> Vec3 {
    let t2 = t * t;
    let t3 = t2 * t;

    let a = -0.5 * t3 + t2 - 0.5 * t;
    let b = 1.5 * t3 - 2.5 * t2 + 1.0;
    let c = -1.5 * t3 + 2.0 * t2 + 0.5 * t;
    let d = 0.5 * t3 - 0.5 * t2;

    p0 * a + p1 * b + p2 * c + p3 * d
}

/// densify inserts `resolution / n` samples per polygon edge (Catmull-Rom for n >= 4, linear
/// otherwise). The original vertices are kept.
fn densify(vertices: &[Vec3], resolution: usize) -> Vec<Vec3> {
    let n = vertices.len();
    let samples_per_edge = (resolution / n).max(1);
    let mut dense = Vec::with_capacity(n * samples_per_edge);

    for i in 0..n {
        let p1 = vertices[i];
        let p2 = vertices[(i + 1) % n];
        dense.push(p1);

        if n < 4 {
            for j in 1..samples_per_edge {
                let t = j as f32 / samples_per_edge as f32;
                dense.push(p1.lerp(p2, t));
            }
        } else {
            let p0 = vertices[(i + n - 1) % n];
            let p3 = vertices[(i + 2) % n];
            for j in 1..samples_per_edge {
                let t = j as f32 / samples_per_edge as f32;
                dense.push(catmull_rom_point(p0, p1, p2, p3, t));
            }
        }
    }

    dense
}

/// Pulls `point` back towards `center` so that it is at most `max_dist` away.
fn clamp_to_center(point: Vec3, center: Vec3, max_dist: f32) -> Vec3 {
    let center_to_point = point - center;
    let dist = center_to_point.length();
    if dist > max_dist && dist > 0.0 {
        center + center_to_point * (max_dist / dist)
    } else {
        point
    }
}

/// Curvature in [0, 1] of the path at point i from its incoming and outgoing directions (0 for a
/// straight, 1 for a full reversal).
fn curvature_at(points: &[Vec3], i: usize) -> f32 {
    let n = points.len();
    let prev = points[(i + n - 1) % n];
    let next = points[(i + 1) % n];
    let incoming = (points[i] - prev).normalize_or_zero();
    let outgoing = (next - points[i]).normalize_or_zero();
    1.0 - (incoming.dot(outgoing) + 1.0) / 2.0
}

/// Forward rate limiter around the closed loop: repeats until every neighbouring pair, including
/// the wrap-around pair, differs by at most `max_step`.
fn limit_speed_steps(speeds: &mut [f32], max_step: f32) {
    let n = speeds.len();
    for _ in 0..n.max(1) {
        let mut changed = false;
        for i in 0..n {
            let prev = speeds[(i + n - 1) % n];
            let limited = speeds[i].clamp(prev - max_step, prev + max_step);
            if limited != speeds[i] {
                speeds[i] = limited;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

fn smooth3<T>(values: &[T]) -> Vec<T>
where
    T: Copy + std::ops::Mul<f32, Output = T> + std::ops::Add<Output = T>,
{
    let n = values.len();
    (0..n)
        .map(|i| values[(i + n - 1) % n] * 0.25 + values[i] * 0.5 + values[(i + 1) % n] * 0.25)
        .collect()
}

impl RacingLine {
    /// generate builds the racing line from the track's boundary/center polygon.
    ///
    /// With fewer than three vertices nothing is generated and the returned line is empty, which
    /// callers must treat as "do not drive". The resulting number of points is `resolution`
    /// rounded down to a multiple of the vertex count (at least one point per vertex).
    pub fn generate(
        track_vertices: &[Vec3],
        track_width: f32,
        resolution: usize,
        corner_cutting_factor: f32,
    ) -> RacingLine {
        if track_vertices.len() < 3 {
            warn!(
                "Cannot generate a racing line from {} vertices, at least 3 are required",
                track_vertices.len()
            );
            return RacingLine::default();
        }

        let centers = densify(track_vertices, resolution);
        let n = centers.len();
        let max_offset = track_width * MAX_OFFSET_WIDTH_FRAC;

        // offset pass: move each point towards the inside of its turn
        let mut offset_points = Vec::with_capacity(n);
        let mut polygon_speeds = Vec::with_capacity(n);

        for i in 0..n {
            let cur = centers[i];
            let to_prev = (centers[(i + n - 1) % n] - cur).normalize_or_zero();
            let to_next = (centers[(i + 1) % n] - cur).normalize_or_zero();

            // 180 deg means straight, 0 deg a full hairpin
            let angle = angle_deg(to_prev, to_next);
            let turn_y = to_prev.cross(to_next).y;

            let offset = if turn_y.abs() > STRAIGHT_EPS {
                let offset_factor = lerp(
                    0.1,
                    corner_cutting_factor * 0.5,
                    inverse_lerp(0.0, 90.0, angle),
                );
                let offset_dir = (to_next - to_prev).cross(Vec3::Y).normalize_or_zero() * sign(turn_y);
                offset_dir * (track_width * offset_factor).min(max_offset)
            } else {
                Vec3::ZERO
            };

            offset_points.push(cur + offset);
            polygon_speeds.push(lerp(MIN_RECOMMENDED_SPEED, 1.0, inverse_lerp(0.0, 180.0, angle)));
        }

        // boundary-safe smoothing: 5 point weighted average, then pull back towards the center
        let mut smoothed = Vec::with_capacity(n);
        for i in 0..n {
            let p = offset_points[(i + n - 2) % n] * 0.1
                + offset_points[(i + n - 1) % n] * 0.2
                + offset_points[i] * 0.4
                + offset_points[(i + 1) % n] * 0.2
                + offset_points[(i + 2) % n] * 0.1;

            let center_to_point = p - centers[i];
            let dist = center_to_point.length();
            let p = if dist > max_offset {
                // blend 80 % towards the clamp target to avoid discontinuities
                let clamp_factor = lerp(1.0, max_offset / dist, 0.8);
                centers[i] + center_to_point * clamp_factor
            } else {
                p
            };
            smoothed.push(p);
        }

        // final light smoothing; the hard clamp afterwards keeps every point on the drivable part
        let points: Vec<Vec3> = smooth3(&smoothed)
            .into_iter()
            .zip(centers.iter())
            .map(|(p, &c)| clamp_to_center(p, c, max_offset))
            .collect();

        // speed profile from the final geometry
        let mut speeds: Vec<f32> = (0..n)
            .map(|i| {
                let curvature = curvature_at(&points, i);
                MIN_RECOMMENDED_SPEED + (1.0 - MIN_RECOMMENDED_SPEED) * (1.0 - curvature).powf(0.7)
            })
            .collect();
        limit_speed_steps(&mut speeds, MAX_SPEED_STEP);
        let speeds = smooth3(&speeds);

        debug!(
            "Generated racing line with {} points from {} vertices (width {:.1}m)",
            n,
            track_vertices.len(),
            track_width
        );

        RacingLine {
            points,
            speeds,
            centers,
            polygon_speeds,
            width: track_width,
        }
    }

    // ---------------------------------------------------------------------------------------------
    // QUERIES -------------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// closest_point returns index, position and recommended speed of the racing line point
    /// nearest to `position` (brute force over all points). None for an empty line.
    pub fn closest_point(&self, position: Vec3) -> Option<(usize, Vec3, f32)> {
        let (idx, point) = self
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| (i, p.distance_squared(position)))
            .fold(None, |best: Option<(usize, f32)>, (i, d)| match best {
                Some((_, d_best)) if d_best <= d => best,
                _ => Some((i, d)),
            })
            .map(|(i, _)| (i, self.points[i]))?;

        Some((idx, point, self.speeds[idx]))
    }

    /// next_target_point returns the point and recommended speed `lookahead` points after `idx`.
    /// Both arguments may be any integer, the index wraps around the closed line.
    pub fn next_target_point(&self, idx: i64, lookahead: i64) -> Option<(Vec3, f32)> {
        if self.points.is_empty() {
            return None;
        }
        let target_idx = wrap_index(idx + lookahead, self.points.len());
        Some((self.points[target_idx], self.speeds[target_idx]))
    }

    /// point returns the racing line point at the wrapped index. Panics on an empty line.
    pub fn point(&self, idx: i64) -> Vec3 {
        self.points[wrap_index(idx, self.points.len())]
    }

    pub fn speed(&self, idx: i64) -> f32 {
        self.speeds[wrap_index(idx, self.speeds.len())]
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn speeds(&self) -> &[f32] {
        &self.speeds
    }

    /// centers returns the densified track center points, parallel to `points`.
    pub fn centers(&self) -> &[Vec3] {
        &self.centers
    }

    /// polygon_speeds returns the speed factors derived from the densified polygon's corner
    /// angles (before offsetting and smoothing), parallel to `points`.
    pub fn polygon_speeds(&self) -> &[f32] {
        &self.polygon_speeds
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    /// segment_length returns the distance between point idx and its successor.
    pub fn segment_length(&self, idx: i64) -> f32 {
        self.point(idx).distance(self.point(idx + 1))
    }

    /// path_distance sums the segment lengths of the `steps` segments following idx.
    pub fn path_distance(&self, idx: i64, steps: usize) -> f32 {
        (0..steps as i64).map(|j| self.segment_length(idx + j)).sum()
    }

    /// tangent returns the normalized direction from point idx to its successor.
    pub fn tangent(&self, idx: i64) -> Vec3 {
        (self.point(idx + 1) - self.point(idx)).normalize_or_zero()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f32::consts::TAU;

    /// Regular polygon approximating a circle in the XZ plane, counter-clockwise seen from above.
    pub(crate) fn circle(radius: f32, n: usize) -> Vec<Vec3> {
        (0..n)
            .map(|i| {
                let a = i as f32 / n as f32 * TAU;
                Vec3::new(radius * a.cos(), 0.0, radius * a.sin())
            })
            .collect()
    }

    /// Stadium shaped oval: two straights joined by half circles, starting mid straight.
    pub(crate) fn oval(half_straight: f32, radius: f32) -> Vec<Vec3> {
        let mut v = Vec::new();
        for i in 0..5 {
            v.push(Vec3::new(radius, 0.0, -half_straight + i as f32 * half_straight / 2.0));
        }
        for i in 1..8 {
            let a = i as f32 / 8.0 * std::f32::consts::PI;
            v.push(Vec3::new(radius * a.cos(), 0.0, half_straight + radius * a.sin()));
        }
        for i in 0..5 {
            v.push(Vec3::new(-radius, 0.0, half_straight - i as f32 * half_straight / 2.0));
        }
        for i in 1..8 {
            let a = i as f32 / 8.0 * std::f32::consts::PI;
            v.push(Vec3::new(-radius * a.cos(), 0.0, -half_straight - radius * a.sin()));
        }
        // start in the middle of the first straight
        v.rotate_left(2);
        v
    }

    /// Random star shaped (generally non-convex) polygon.
    fn random_polygon(rng: &mut StdRng) -> Vec<Vec3> {
        let n = rng.gen_range(3..24);
        (0..n)
            .map(|i| {
                let a = i as f32 / n as f32 * TAU;
                let r = rng.gen_range(40.0..120.0);
                Vec3::new(r * a.cos(), rng.gen_range(-2.0..2.0), r * a.sin())
            })
            .collect()
    }

    #[test]
    fn too_few_vertices_gives_empty_line() {
        let line = RacingLine::generate(&[Vec3::ZERO, Vec3::X], 10.0, 100, 0.7);
        assert!(line.is_empty());
        assert!(line.closest_point(Vec3::ZERO).is_none());
        assert!(line.next_target_point(0, 5).is_none());
    }

    #[test]
    fn point_count_follows_resolution_granularity() {
        let line = RacingLine::generate(&circle(50.0, 7), 10.0, 100, 0.7);
        assert_eq!(line.len(), 7 * (100 / 7));
        assert_eq!(line.speeds().len(), line.len());

        // triangle uses linear interpolation
        let tri = [Vec3::ZERO, Vec3::new(100.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 100.0)];
        let line = RacingLine::generate(&tri, 10.0, 60, 0.7);
        assert_eq!(line.len(), 60);

        // resolution below vertex count still keeps every vertex
        let line = RacingLine::generate(&circle(50.0, 12), 10.0, 5, 0.7);
        assert_eq!(line.len(), 12);
    }

    #[test]
    fn closure_and_index_arithmetic() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..25 {
            let verts = random_polygon(&mut rng);
            let line = RacingLine::generate(&verts, rng.gen_range(4.0..20.0), 200, 0.7);
            let n = line.len() as i64;
            assert!(n > 0);
            assert_eq!(line.points().len(), line.speeds().len());
            assert_eq!(line.centers().len(), line.points().len());

            for offset in [-3 * n - 1, -n, -1, 0, 1, n, 2 * n + 5] {
                let (p, s) = line.next_target_point(3, offset).unwrap();
                assert_eq!(p, line.point(3 + offset));
                assert_eq!(s, line.speed(3 + offset));
            }
        }
    }

    #[test]
    fn line_stays_within_track_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..40 {
            let verts = random_polygon(&mut rng);
            let width = rng.gen_range(4.0..25.0);
            let cutting = rng.gen_range(0.0..1.0);
            let line = RacingLine::generate(&verts, width, rng.gen_range(50..400), cutting);

            for (p, c) in line.points().iter().zip(line.centers()) {
                assert!(p.distance(*c) <= width * MAX_OFFSET_WIDTH_FRAC + 1e-3);
            }
        }

        // convex case with aggressive corner cutting
        let line = RacingLine::generate(&circle(30.0, 5), 20.0, 100, 1.0);
        for (p, c) in line.points().iter().zip(line.centers()) {
            assert!(p.distance(*c) <= 20.0 * MAX_OFFSET_WIDTH_FRAC + 1e-3);
        }
    }

    #[test]
    fn speed_profile_is_smooth_and_bounded() {
        let mut rng = StdRng::seed_from_u64(1234);
        for _ in 0..40 {
            let verts = random_polygon(&mut rng);
            let line = RacingLine::generate(&verts, 12.0, rng.gen_range(30..300), 0.7);
            let speeds = line.speeds();
            let n = speeds.len();

            for i in 0..n {
                let diff = (speeds[(i + 1) % n] - speeds[i]).abs();
                assert!(diff <= MAX_SPEED_STEP + 1e-4, "speed step {} at {}", diff, i);
                assert!((MIN_RECOMMENDED_SPEED - 1e-4..=1.0 + 1e-4).contains(&speeds[i]));
            }
            for s in line.polygon_speeds() {
                assert!((MIN_RECOMMENDED_SPEED..=1.0).contains(s));
            }
        }
    }

    #[test]
    fn sharp_corner_is_slower_than_straight() {
        // triangle track: linear interpolation keeps hard corners at the vertices
        let triangle = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(200.0, 0.0, 0.0),
            Vec3::new(100.0, 0.0, 170.0),
        ];
        let line = RacingLine::generate(&triangle, 10.0, 200, 0.7);
        let per_edge = line.len() / 3;
        let straight_speed = line.speed((per_edge / 2) as i64);
        let corner_speed = line.speed(per_edge as i64);
        assert!(corner_speed < straight_speed);
    }

    #[test]
    fn closest_point_finds_nearest() {
        let line = RacingLine::generate(&circle(100.0, 16), 10.0, 160, 0.7);
        let target = line.point(37);
        let (idx, p, s) = line.closest_point(target + Vec3::Y * 0.5).unwrap();
        assert_eq!(idx, 37);
        assert_eq!(p, target);
        assert_abs_diff_eq!(s, line.speed(37));
    }

    #[test]
    fn oval_cuts_inside_of_turns() {
        let verts = oval(60.0, 40.0);
        let line = RacingLine::generate(&verts, 12.0, 240, 0.7);
        // a point on the first half circle lies inside the center line
        let per_edge = line.len() / verts.len();
        let idx = per_edge * 6;
        assert!(line.points()[idx].length() < line.centers()[idx].length());
    }
}
