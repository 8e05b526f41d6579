use std::cmp::Ordering;

#[derive(Debug, Clone, Copy)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// argsort returns the indices that would sort an array. The sort is stable, i.e. equal values
/// keep their original order. Incomparable values (NaN) are treated as equal.
pub fn argsort<T: std::cmp::PartialOrd>(x: &[T], order: SortOrder) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..x.len()).collect();
    match order {
        SortOrder::Ascending => {
            indices.sort_by(|&a, &b| x[a].partial_cmp(&x[b]).unwrap_or(Ordering::Equal))
        }
        SortOrder::Descending => {
            indices.sort_by(|&a, &b| x[b].partial_cmp(&x[a]).unwrap_or(Ordering::Equal))
        }
    }
    indices
}

/// clamp01 limits x to [0.0, 1.0].
pub fn clamp01(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

/// lerp interpolates linearly between a and b. t is clamped to [0.0, 1.0], so calling it with
/// `dt * rate` moves a value towards its target without ever overshooting.
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * clamp01(t)
}

/// inverse_lerp returns where x lies between a and b as a fraction in [0.0, 1.0]. Returns 0.0
/// for a degenerate range.
pub fn inverse_lerp(a: f32, b: f32, x: f32) -> f32 {
    if (b - a).abs() < f32::EPSILON {
        return 0.0;
    }
    clamp01((x - a) / (b - a))
}

/// sign returns 1.0 for x >= 0.0 and -1.0 otherwise.
pub fn sign(x: f32) -> f32 {
    if x >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// wrap_index maps any (possibly negative) offset from idx onto [0, len[.
pub fn wrap_index(idx: i64, len: usize) -> usize {
    debug_assert!(len > 0, "wrap_index requires a non-empty sequence");
    idx.rem_euclid(len as i64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn argsort_is_stable_for_ties() {
        let x = [0.5, 0.9, 0.5, 0.9];
        assert_eq!(argsort(&x, SortOrder::Descending), vec![1, 3, 0, 2]);
        assert_eq!(argsort(&x, SortOrder::Ascending), vec![0, 2, 1, 3]);
    }

    #[test]
    fn lerp_clamps_t() {
        assert_abs_diff_eq!(lerp(0.0, 10.0, 0.25), 2.5);
        assert_abs_diff_eq!(lerp(0.0, 10.0, 4.0), 10.0);
        assert_abs_diff_eq!(lerp(0.0, 10.0, -1.0), 0.0);
    }

    #[test]
    fn inverse_lerp_handles_degenerate_range() {
        assert_abs_diff_eq!(inverse_lerp(0.0, 0.1, 0.05), 0.5);
        assert_abs_diff_eq!(inverse_lerp(0.0, 0.1, 0.3), 1.0);
        assert_abs_diff_eq!(inverse_lerp(1.0, 1.0, 3.0), 0.0);
    }

    #[test]
    fn wrap_index_handles_negative_offsets() {
        assert_eq!(wrap_index(-1, 10), 9);
        assert_eq!(wrap_index(-21, 10), 9);
        assert_eq!(wrap_index(23, 10), 3);
        assert_eq!(sign(0.0), 1.0);
    }
}
