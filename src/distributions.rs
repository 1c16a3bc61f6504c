/*!
Priors over simulator parameters, random-walk proposals for Metropolis–Hastings, and the
[`Target`] trait implemented by everything an MCMC chain can sample from.

All densities work on `f64` rows; batches of parameters are `ndarray::Array2<f64>` with one
sample per row.

# Examples

```rust
use sbi::distributions::{BoxUniform, MultivariateNormal, Prior};
use ndarray::{arr1, arr2};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let mut rng = SmallRng::seed_from_u64(0);

let gauss = MultivariateNormal::new(arr1(&[0.0, 1.0]), arr2(&[[2.0, 0.5], [0.5, 1.0]])).unwrap();
let theta = gauss.sample(10, &mut rng);
assert_eq!(theta.shape(), &[10, 2]);

let uniform = BoxUniform::new(arr1(&[-1.0, -1.0]), arr1(&[1.0, 1.0])).unwrap();
assert!(uniform.log_prob(arr1(&[2.0, 0.0]).view()).is_infinite());
```
*/

use nalgebra::{self as na, DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use std::f64::consts::PI;

use crate::error::{Result, SbiError};

/// A prior distribution over the parameters of a simulator.
///
/// `log_prob` returns `f64::NEG_INFINITY` outside the support, which is how samplers detect
/// leakage of a posterior estimate out of the prior's support.
pub trait Prior: Send + Sync {
    /// Dimensionality of the parameter space.
    fn dim(&self) -> usize;

    /// Draws `n` independent samples, one per row.
    fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Array2<f64>;

    /// Normalized log-density of a single parameter vector.
    fn log_prob(&self, theta: ArrayView1<f64>) -> f64;

    /// Returns `true` if `theta` has non-zero prior density.
    fn in_support(&self, theta: ArrayView1<f64>) -> bool {
        self.log_prob(theta).is_finite()
    }

    /// Log-density of every row of `theta`.
    fn log_prob_batch(&self, theta: &Array2<f64>) -> Array1<f64> {
        theta.axis_iter(Axis(0)).map(|row| self.log_prob(row)).collect()
    }
}

/// A continuous distribution an MCMC chain can target.
pub trait Target {
    /// Returns the log of the unnormalized density for state `theta`.
    fn unnorm_log_prob(&self, theta: &[f64]) -> f64;
}

/// A trait for generating proposals in Metropolis–Hastings.
pub trait Proposal {
    /// Samples a new point from q(x' | x).
    fn sample(&mut self, current: &[f64]) -> Vec<f64>;

    /// Evaluates log q(x' | x).
    fn log_prob(&self, from: &[f64], to: &[f64]) -> f64;

    /// Returns a new instance of this proposal distribution seeded with `seed`.
    fn set_seed(self, seed: u64) -> Self;
}

/**
A multivariate normal distribution parameterized by a mean vector and a full covariance matrix.

The covariance is factorized once at construction; both sampling and density evaluation go
through the lower Cholesky factor.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct MultivariateNormal {
    pub mean: Array1<f64>,
    pub covariance: Array2<f64>,
    scale_tril: DMatrix<f64>,
    log_det: f64,
}

impl MultivariateNormal {
    /// Creates a new multivariate normal.
    ///
    /// Fails with [`SbiError::Configuration`] if the shapes disagree or the covariance is not
    /// positive definite.
    pub fn new(mean: Array1<f64>, covariance: Array2<f64>) -> Result<Self> {
        let d = mean.len();
        if d == 0 {
            return Err(SbiError::Configuration(
                "multivariate normal needs at least one dimension".into(),
            ));
        }
        if covariance.shape() != [d, d] {
            return Err(SbiError::Configuration(format!(
                "covariance shape {:?} does not match mean of length {d}",
                covariance.shape()
            )));
        }
        let cov = DMatrix::from_fn(d, d, |i, j| covariance[(i, j)]);
        let scale_tril = na::Cholesky::new(cov)
            .map(|chol| chol.l())
            .filter(|l| l.diagonal().iter().all(|v| v.is_finite() && *v > 0.0))
            .ok_or_else(|| {
                SbiError::Configuration("covariance matrix is not positive definite".into())
            })?;
        let log_det = 2.0 * scale_tril.diagonal().iter().map(|x| x.ln()).sum::<f64>();
        Ok(Self {
            mean,
            covariance,
            scale_tril,
            log_det,
        })
    }

    /// The standard normal `N(0, I)` in `dim` dimensions.
    pub fn standard(dim: usize) -> Result<Self> {
        Self::new(Array1::zeros(dim), Array2::eye(dim))
    }

    /// Lower Cholesky factor `L` of the covariance, `L Lᵀ = Σ`.
    pub fn scale_tril(&self) -> &DMatrix<f64> {
        &self.scale_tril
    }

    /// Solves `L z = theta - mean`; `None` if the factor is singular.
    fn whiten(&self, theta: ArrayView1<f64>) -> Option<DVector<f64>> {
        let diff = DVector::from_iterator(theta.len(), theta.iter().zip(&self.mean).map(|(t, m)| t - m));
        self.scale_tril.solve_lower_triangular(&diff)
    }
}

impl Prior for MultivariateNormal {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Array2<f64> {
        let d = self.dim();
        let mut out = Array2::<f64>::zeros((n, d));
        for mut row in out.axis_iter_mut(Axis(0)) {
            let eps = DVector::<f64>::from_fn(d, |_, _| rng.sample(StandardNormal));
            let x = &self.scale_tril * eps;
            row.assign(&(ArrayView1::from(x.as_slice()).to_owned() + &self.mean));
        }
        out
    }

    fn log_prob(&self, theta: ArrayView1<f64>) -> f64 {
        let d = self.dim() as f64;
        let Some(z) = self.whiten(theta) else {
            return f64::NEG_INFINITY;
        };
        -0.5 * z.norm_squared() - 0.5 * self.log_det - 0.5 * d * (2.0 * PI).ln()
    }
}

/// A uniform distribution on the axis-aligned box `[low, high)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxUniform {
    pub low: Array1<f64>,
    pub high: Array1<f64>,
    log_volume: f64,
}

impl BoxUniform {
    /// Creates a new box; every `high[i]` must exceed `low[i]`.
    pub fn new(low: Array1<f64>, high: Array1<f64>) -> Result<Self> {
        if low.len() != high.len() || low.is_empty() {
            return Err(SbiError::Configuration(format!(
                "box bounds must be non-empty and of equal length, got {} and {}",
                low.len(),
                high.len()
            )));
        }
        if low.iter().zip(high.iter()).any(|(l, h)| !(h > l)) {
            return Err(SbiError::Configuration(
                "every upper bound must exceed its lower bound".into(),
            ));
        }
        let log_volume = low
            .iter()
            .zip(high.iter())
            .map(|(l, h)| (h - l).ln())
            .sum();
        Ok(Self {
            low,
            high,
            log_volume,
        })
    }
}

impl Prior for BoxUniform {
    fn dim(&self) -> usize {
        self.low.len()
    }

    fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Array2<f64> {
        let d = self.dim();
        Array2::from_shape_fn((n, d), |(_, j)| rng.gen_range(self.low[j]..self.high[j]))
    }

    fn log_prob(&self, theta: ArrayView1<f64>) -> f64 {
        let inside = theta
            .iter()
            .zip(self.low.iter().zip(self.high.iter()))
            .all(|(x, (l, h))| x >= l && x < h);
        if inside {
            -self.log_volume
        } else {
            f64::NEG_INFINITY
        }
    }
}

/**
An isotropic Gaussian random-walk proposal.

Adds independent Gaussian noise with standard deviation `std` to each coordinate of the
current state.

# Examples

```rust
use sbi::distributions::{IsotropicGaussian, Proposal};

let mut proposal = IsotropicGaussian::new(1.0).set_seed(7);
let candidate = proposal.sample(&[0.0, 0.0]);
assert_eq!(candidate.len(), 2);
```
*/
#[derive(Debug, Clone)]
pub struct IsotropicGaussian {
    pub std: f64,
    rng: SmallRng,
}

impl IsotropicGaussian {
    /// Creates a new isotropic Gaussian proposal distribution with the specified standard deviation.
    pub fn new(std: f64) -> Self {
        Self {
            std,
            rng: SmallRng::from_entropy(),
        }
    }
}

impl Proposal for IsotropicGaussian {
    fn sample(&mut self, current: &[f64]) -> Vec<f64> {
        let std = self.std;
        current
            .iter()
            .map(|x| {
                let eps: f64 = StandardNormal.sample(&mut self.rng);
                x + std * eps
            })
            .collect()
    }

    fn log_prob(&self, from: &[f64], to: &[f64]) -> f64 {
        let var = self.std * self.std;
        let d = from.len() as f64;
        let sq: f64 = from.iter().zip(to).map(|(f, t)| (t - f) * (t - f)).sum();
        -sq / (2.0 * var) - 0.5 * d * (2.0 * PI * var).ln()
    }

    fn set_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }
}

impl Target for MultivariateNormal {
    fn unnorm_log_prob(&self, theta: &[f64]) -> f64 {
        self.log_prob(ArrayView1::from(theta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};
    use ndarray_stats::CorrelationExt;

    #[test]
    fn standard_normal_log_prob() {
        let gauss = MultivariateNormal::standard(1).unwrap();
        let lp = gauss.log_prob(arr1(&[1.0]).view());
        assert_abs_diff_eq!(lp.exp(), 0.24197072451914337, epsilon = 1e-12);
    }

    #[test]
    fn full_covariance_log_prob() {
        // Reference value from the closed-form bivariate normal density.
        let gauss =
            MultivariateNormal::new(arr1(&[0.0, 1.0]), arr2(&[[4.0, 2.0], [2.0, 3.0]])).unwrap();
        let theta = arr1(&[0.5, -0.5]);
        let det: f64 = 4.0 * 3.0 - 2.0 * 2.0;
        let (dx, dy) = (0.5, -1.5);
        let quad = (3.0 * dx * dx - 4.0 * dx * dy + 4.0 * dy * dy) / det;
        let expected = -0.5 * quad - 0.5 * det.ln() - (2.0 * PI).ln();
        assert_abs_diff_eq!(gauss.log_prob(theta.view()), expected, epsilon = 1e-12);
    }

    #[test]
    fn rejects_non_positive_definite_covariance() {
        let res = MultivariateNormal::new(arr1(&[0.0, 0.0]), arr2(&[[1.0, 2.0], [2.0, 1.0]]));
        assert!(matches!(res, Err(SbiError::Configuration(_))));
    }

    #[test]
    fn cholesky_factor_reproduces_covariance() {
        let gauss =
            MultivariateNormal::new(arr1(&[0.0, 1.0]), arr2(&[[4.0, 2.0], [2.0, 3.0]])).unwrap();
        let l = gauss.scale_tril();
        assert_abs_diff_eq!(l[(0, 1)], 0.0);
        let reconstructed = l * l.transpose();
        for i in 0..2 {
            for j in 0..2 {
                assert_abs_diff_eq!(reconstructed[(i, j)], gauss.covariance[(i, j)], epsilon = 1e-12);
            }
        }
        assert_abs_diff_eq!(l[(0, 0)], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(l[(1, 0)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn sample_moments_match() {
        let mut rng = SmallRng::seed_from_u64(42);
        let gauss =
            MultivariateNormal::new(arr1(&[0.0, 1.0]), arr2(&[[4.0, 2.0], [2.0, 3.0]])).unwrap();
        let samples = gauss.sample(50_000, &mut rng);
        let mean = samples.mean_axis(Axis(0)).unwrap();
        let cov = samples.t().cov(1.0).unwrap();
        assert_abs_diff_eq!(mean, gauss.mean, epsilon = 0.05);
        assert_abs_diff_eq!(cov, gauss.covariance, epsilon = 0.1);
    }

    #[test]
    fn box_uniform_support() {
        let prior = BoxUniform::new(arr1(&[-1.0, 0.0]), arr1(&[1.0, 4.0])).unwrap();
        assert_abs_diff_eq!(
            prior.log_prob(arr1(&[0.0, 1.0]).view()),
            -(8.0_f64).ln(),
            epsilon = 1e-12
        );
        assert!(!prior.in_support(arr1(&[0.0, 4.0]).view()));
        let mut rng = SmallRng::seed_from_u64(1);
        let samples = prior.sample(1_000, &mut rng);
        assert!(samples.axis_iter(Axis(0)).all(|row| prior.in_support(row)));
    }

    #[test]
    fn box_uniform_rejects_inverted_bounds() {
        assert!(BoxUniform::new(arr1(&[1.0]), arr1(&[0.0])).is_err());
    }

    #[test]
    fn iso_gauss_proposal_is_symmetric() {
        let proposal = IsotropicGaussian::new(2.0);
        let a = [0.42, 9.6];
        let b = [1.0, 2.0];
        assert_abs_diff_eq!(proposal.log_prob(&a, &b), proposal.log_prob(&b, &a));
        let p = proposal.log_prob(&[0.0], &[0.0]).exp();
        assert_abs_diff_eq!(p, 1.0 / (2.0 * (2.0 * PI).sqrt()), epsilon = 1e-12);
    }
}
