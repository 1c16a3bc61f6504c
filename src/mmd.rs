/*!
Unbiased estimate of the squared maximum mean discrepancy between two sample sets.

For samples `X = {x_1..x_m}` and `Y = {y_1..y_n}` and a Gaussian kernel
`k(a, b) = exp(-‖a - b‖² / (2h²))` the estimate is

```text
MMD²(X, Y) = 1/(m(m-1)) Σ_{i≠j} k(x_i, x_j) + 1/(n(n-1)) Σ_{i≠j} k(y_i, y_j) − 2/(mn) Σ_{i,j} k(x_i, y_j)
```

When `m == n` the cross term is taken over `i ≠ j` as well, normalized by `m(m-1)`
(the paired U-statistic of Gretton et al., 2012). Both forms are unbiased; the paired one
makes a sample set compared with itself come out as exactly `0.0`.

The bandwidth `h` defaults to the median of all pairwise distances (within `X`, within `Y`,
and across), matching the usual median heuristic.

The estimate can be slightly negative for finite samples.

# Examples

```rust
use sbi::mmd::unbiased_mmd_squared;
use ndarray::arr2;

let x = arr2(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
let y = arr2(&[[3.0, 3.0], [4.0, 3.0], [3.0, 4.0], [4.0, 4.0]]);
let mmd = unbiased_mmd_squared(&x, &y).unwrap();
assert!(mmd > 0.0);
assert_eq!(unbiased_mmd_squared(&x, &x).unwrap(), 0.0);
```
*/

use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use std::cmp::Ordering;

use crate::error::{Result, SbiError};

/// Bandwidth of the Gaussian kernel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Bandwidth {
    /// Median of all pairwise distances between the pooled samples.
    #[default]
    Median,
    /// A fixed, strictly positive bandwidth.
    Fixed(f64),
}

/// Unbiased MMD² with a median-heuristic Gaussian kernel.
pub fn unbiased_mmd_squared(x: &Array2<f64>, y: &Array2<f64>) -> Result<f64> {
    unbiased_mmd_squared_with(x.view(), y.view(), Bandwidth::Median)
}

/// Unbiased MMD² with an explicit kernel bandwidth.
pub fn unbiased_mmd_squared_with<'a>(
    x: ArrayView2<'a, f64>,
    y: ArrayView2<'a, f64>,
    bandwidth: Bandwidth,
) -> Result<f64> {
    let (m, n) = (x.nrows(), y.nrows());
    if m < 2 || n < 2 {
        return Err(SbiError::InsufficientSamples { m, n });
    }
    if x.ncols() != y.ncols() {
        return Err(SbiError::Configuration(format!(
            "sample sets differ in dimension: {} vs {}",
            x.ncols(),
            y.ncols()
        )));
    }
    if let Bandwidth::Fixed(h) = bandwidth {
        if !(h > 0.0 && h.is_finite()) {
            return Err(SbiError::Configuration(format!(
                "kernel bandwidth must be positive and finite, got {h}"
            )));
        }
    }

    // Summation order depends on which set comes first; fix it so the result is symmetric.
    let (x, y) = if canonical_order(&x, &y) == Ordering::Greater {
        (y, x)
    } else {
        (x, y)
    };
    let (m, n) = (x.nrows(), y.nrows());

    let h = match bandwidth {
        Bandwidth::Fixed(h) => h,
        Bandwidth::Median => median_distance(&x, &y),
    };
    let gamma = -0.5 / (h * h);
    let kernel = |a: ArrayView1<f64>, b: ArrayView1<f64>| (gamma * sq_dist(a, b)).exp();

    let within_x = lower_triangle_sum(m, |i, j| kernel(x.row(i), x.row(j)));
    let within_y = lower_triangle_sum(n, |i, j| kernel(y.row(i), y.row(j)));

    let mmd = if m == n {
        let cross = lower_triangle_sum(m, |i, j| {
            kernel(x.row(i), y.row(j)) + kernel(x.row(j), y.row(i))
        });
        2.0 * (within_x + within_y - cross) / (m * (m - 1)) as f64
    } else {
        let cross: f64 = (0..m)
            .into_par_iter()
            .map(|i| (0..n).map(|j| kernel(x.row(i), y.row(j))).sum::<f64>())
            .collect::<Vec<f64>>()
            .into_iter()
            .sum();
        2.0 * within_x / (m * (m - 1)) as f64 + 2.0 * within_y / (n * (n - 1)) as f64
            - 2.0 * cross / (m * n) as f64
    };
    Ok(mmd)
}

/// `Σ_{i>j} f(i, j)` for `i < rows`, reduced row by row in a fixed order.
fn lower_triangle_sum<F>(rows: usize, f: F) -> f64
where
    F: Fn(usize, usize) -> f64 + Sync,
{
    (0..rows)
        .into_par_iter()
        .map(|i| (0..i).map(|j| f(i, j)).sum::<f64>())
        .collect::<Vec<f64>>()
        .into_iter()
        .sum()
}

fn sq_dist(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(u, v)| (u - v) * (u - v)).sum()
}

/// Median of the pooled pairwise distances. Falls back to 1.0 when every point coincides.
fn median_distance(x: &ArrayView2<f64>, y: &ArrayView2<f64>) -> f64 {
    let (m, n) = (x.nrows(), y.nrows());
    let mut dists: Vec<f64> = Vec::with_capacity(m * (m - 1) / 2 + n * (n - 1) / 2 + m * n);
    for i in 0..m {
        for j in 0..i {
            dists.push(sq_dist(x.row(i), x.row(j)));
        }
    }
    for i in 0..n {
        for j in 0..i {
            dists.push(sq_dist(y.row(i), y.row(j)));
        }
    }
    for i in 0..m {
        for j in 0..n {
            dists.push(sq_dist(x.row(i), y.row(j)));
        }
    }
    // Lower median, the way torch.median picks it for an even count.
    let k = (dists.len() - 1) / 2;
    let (_, median, _) = dists.select_nth_unstable_by(k, f64::total_cmp);
    let h = median.sqrt();
    if h > 0.0 && h.is_finite() {
        h
    } else {
        1.0
    }
}

/// Orders two sample sets by row count, then lexicographically by value.
fn canonical_order(x: &ArrayView2<f64>, y: &ArrayView2<f64>) -> Ordering {
    x.nrows().cmp(&y.nrows()).then_with(|| {
        x.iter()
            .zip(y.iter())
            .map(|(a, b)| a.total_cmp(b))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn gaussian_samples(n: usize, dim: usize, shift: f64, seed: u64) -> Array2<f64> {
        let mut rng = SmallRng::seed_from_u64(seed);
        Array2::from_shape_fn((n, dim), |_| shift + rng.sample::<f64, _>(StandardNormal))
    }

    #[test]
    fn identical_arrays_give_exact_zero() {
        let x = gaussian_samples(200, 3, 0.0, 1);
        assert_eq!(unbiased_mmd_squared(&x, &x).unwrap(), 0.0);
    }

    #[test]
    fn symmetric_in_its_arguments() {
        let x = gaussian_samples(120, 2, 0.0, 1);
        let y = gaussian_samples(80, 2, 0.5, 2);
        let xy = unbiased_mmd_squared(&x, &y).unwrap();
        let yx = unbiased_mmd_squared(&y, &x).unwrap();
        assert_eq!(xy, yx);

        let z = gaussian_samples(120, 2, 0.5, 3);
        assert_eq!(
            unbiased_mmd_squared(&x, &z).unwrap(),
            unbiased_mmd_squared(&z, &x).unwrap()
        );
    }

    #[test]
    fn fewer_than_two_samples_is_an_error() {
        let x = gaussian_samples(1, 2, 0.0, 1);
        let y = gaussian_samples(10, 2, 0.0, 2);
        assert!(matches!(
            unbiased_mmd_squared(&x, &y),
            Err(SbiError::InsufficientSamples { m: 1, n: 10 })
        ));
        assert!(matches!(
            unbiased_mmd_squared(&y, &x),
            Err(SbiError::InsufficientSamples { m: 10, n: 1 })
        ));
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let x = gaussian_samples(5, 2, 0.0, 1);
        let y = gaussian_samples(5, 3, 0.0, 2);
        assert!(matches!(
            unbiased_mmd_squared(&x, &y),
            Err(SbiError::Configuration(_))
        ));
    }

    #[test]
    fn same_distribution_concentrates_near_zero() {
        let x = gaussian_samples(1000, 2, 0.0, 11);
        let y = gaussian_samples(1000, 2, 0.0, 12);
        let mmd = unbiased_mmd_squared(&x, &y).unwrap();
        assert!(mmd.abs() < 0.01, "MMD between equal distributions too large: {mmd}");
    }

    #[test]
    fn shifted_distribution_is_detected() {
        let x = gaussian_samples(500, 2, 0.0, 11);
        let y = gaussian_samples(400, 2, 1.5, 12);
        let mmd = unbiased_mmd_squared(&x, &y).unwrap();
        assert!(mmd > 0.1, "Expected a clear discrepancy, got {mmd}");
    }

    #[test]
    fn matches_hand_computed_value() {
        // Fixed bandwidth, m != n: every kernel value can be written down directly.
        let x = arr2(&[[0.0], [1.0]]);
        let y = arr2(&[[0.0], [2.0], [4.0]]);
        let k = |d: f64| (-0.5 * d * d).exp();
        let kxx = 2.0 * k(1.0) / 2.0;
        let kyy = 2.0 * (k(2.0) + k(4.0) + k(2.0)) / 6.0;
        let kxy = 2.0 * (k(0.0) + k(2.0) + k(4.0) + k(1.0) + k(1.0) + k(3.0)) / 6.0;
        let expected = kxx + kyy - kxy;
        let mmd =
            unbiased_mmd_squared_with(x.view(), y.view(), Bandwidth::Fixed(1.0)).unwrap();
        assert_abs_diff_eq!(mmd, expected, epsilon = 1e-12);
    }

    #[test]
    fn median_bandwidth_of_unit_square() {
        let x = arr2(&[[0.0, 0.0], [1.0, 0.0]]);
        let y = arr2(&[[0.0, 1.0], [1.0, 1.0]]);
        // Pooled distances: 1, 1, 1, sqrt(2), sqrt(2), 1 -> lower median 1.
        assert_abs_diff_eq!(median_distance(&x.view(), &y.view()), 1.0);
    }

    #[test]
    fn rejects_non_positive_bandwidth() {
        let x = gaussian_samples(5, 1, 0.0, 1);
        assert!(unbiased_mmd_squared_with(x.view(), x.view(), Bandwidth::Fixed(0.0)).is_err());
    }
}
