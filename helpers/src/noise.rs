//! Smooth 2D gradient noise, used to give AI drivers a slowly wandering lateral offset.

/// Integer hash of a lattice point (a variant of the "lowbias32" mixer).
fn hash(ix: i32, iy: i32) -> u32 {
    let mut h = (ix as u32).wrapping_mul(0x8da6_b343) ^ (iy as u32).wrapping_mul(0xd816_3841);
    h ^= h >> 16;
    h = h.wrapping_mul(0x7feb_352d);
    h ^= h >> 15;
    h = h.wrapping_mul(0x846c_a68b);
    h ^= h >> 16;
    h
}

/// Dot product of the pseudo-random lattice gradient with the offset (dx, dy).
fn grad(ix: i32, iy: i32, dx: f32, dy: f32) -> f32 {
    match hash(ix, iy) & 7 {
        0 => dx + dy,
        1 => dx - dy,
        2 => -dx + dy,
        3 => -dx - dy,
        4 => dx,
        5 => -dx,
        6 => dy,
        _ => -dy,
    }
}

fn fade(t: f32) -> f32 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

/// perlin_noise returns continuous gradient noise in [0.0, 1.0] for the point (x, y). Nearby
/// inputs give nearby outputs, and the value is exactly 0.5 on lattice points.
pub fn perlin_noise(x: f32, y: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let (ix, iy) = (x0 as i32, y0 as i32);
    let (fx, fy) = (x - x0, y - y0);

    let n00 = grad(ix, iy, fx, fy);
    let n10 = grad(ix + 1, iy, fx - 1.0, fy);
    let n01 = grad(ix, iy + 1, fx, fy - 1.0);
    let n11 = grad(ix + 1, iy + 1, fx - 1.0, fy - 1.0);

    let u = fade(fx);
    let v = fade(fy);
    let nx0 = n00 + u * (n10 - n00);
    let nx1 = n01 + u * (n11 - n01);
    let n = nx0 + v * (nx1 - nx0);

    // the raw value lies in [-1, 1]
    ((n + 1.0) * 0.5).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn noise_stays_in_unit_range() {
        for i in 0..2000 {
            let x = i as f32 * 0.037 - 20.0;
            let n = perlin_noise(x, 417.3);
            assert!((0.0..=1.0).contains(&n), "noise {} out of range at {}", n, x);
        }
    }

    #[test]
    fn noise_is_continuous() {
        let mut prev = perlin_noise(0.0, 12.5);
        for i in 1..1000 {
            let cur = perlin_noise(i as f32 * 0.001, 12.5);
            assert!((cur - prev).abs() < 0.05);
            prev = cur;
        }
    }

    #[test]
    fn noise_is_half_on_lattice_points() {
        assert_abs_diff_eq!(perlin_noise(3.0, 7.0), 0.5);
    }
}
