//! Simulators mapping parameters to observations.
//!
//! A simulator only has to produce one observation per parameter vector; the inference engine
//! takes care of batching and of running independent simulations in parallel.

use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::SmallRng;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{Result, SbiError};

/// A stochastic simulator `x ~ p(x | θ)`.
pub trait Simulator: Sync {
    /// Dimensionality of the parameter space.
    fn parameter_dim(&self) -> usize;

    /// Dimensionality of a single observation.
    fn observation_dim(&self) -> usize;

    /// Runs the simulator once for `theta`, using `rng` as the only source of randomness.
    fn simulate(&self, theta: ArrayView1<f64>, rng: &mut SmallRng) -> Result<Array1<f64>>;
}

/// Simulators whose posterior under a known prior has a closed form.
pub trait GroundTruthPosterior {
    /// Draws `n` samples from the exact posterior given `observation`.
    fn ground_truth_posterior_samples(
        &self,
        observation: ArrayView1<f64>,
        n: usize,
        rng: &mut SmallRng,
    ) -> Result<Array2<f64>>;
}

/**
The linear-Gaussian model `x = θ + std · ε` with `ε ~ N(0, I)`.

Under the standard normal prior `θ ~ N(0, I)` the posterior is Gaussian with mean
`x_o / (1 + std²)` and isotropic variance `std² / (1 + std²)`.

# Examples

```rust
use sbi::simulators::{LinearGaussian, Simulator};
use ndarray::arr1;
use rand::rngs::SmallRng;
use rand::SeedableRng;

let simulator = LinearGaussian::new(3, 1.0);
let mut rng = SmallRng::seed_from_u64(0);
let x = simulator.simulate(arr1(&[0.0, 1.0, 2.0]).view(), &mut rng).unwrap();
assert_eq!(x.len(), 3);
```
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearGaussian {
    pub dim: usize,
    pub std: f64,
}

impl LinearGaussian {
    pub fn new(dim: usize, std: f64) -> Self {
        Self { dim, std }
    }

    /// Mean and per-dimension variance of the exact posterior under a standard normal prior.
    pub fn posterior_moments(&self, observation: ArrayView1<f64>) -> (Array1<f64>, f64) {
        let var_noise = self.std * self.std;
        let mean = observation.mapv(|x| x / (1.0 + var_noise));
        (mean, var_noise / (1.0 + var_noise))
    }
}

impl Simulator for LinearGaussian {
    fn parameter_dim(&self) -> usize {
        self.dim
    }

    fn observation_dim(&self) -> usize {
        self.dim
    }

    fn simulate(&self, theta: ArrayView1<f64>, rng: &mut SmallRng) -> Result<Array1<f64>> {
        if theta.len() != self.dim {
            return Err(SbiError::Simulator(format!(
                "expected a parameter of length {}, got {}",
                self.dim,
                theta.len()
            )));
        }
        Ok(theta.mapv(|t| t + self.std * rng.sample::<f64, _>(StandardNormal)))
    }
}

impl GroundTruthPosterior for LinearGaussian {
    fn ground_truth_posterior_samples(
        &self,
        observation: ArrayView1<f64>,
        n: usize,
        rng: &mut SmallRng,
    ) -> Result<Array2<f64>> {
        if observation.len() != self.dim {
            return Err(SbiError::Configuration(format!(
                "expected an observation of length {}, got {}",
                self.dim,
                observation.len()
            )));
        }
        let (mean, var) = self.posterior_moments(observation);
        let std = var.sqrt();
        Ok(Array2::from_shape_fn((n, self.dim), |(_, j)| {
            mean[j] + std * rng.sample::<f64, _>(StandardNormal)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, Axis};
    use rand::SeedableRng;

    #[test]
    fn posterior_moments_for_unit_noise() {
        let sim = LinearGaussian::new(2, 1.0);
        let (mean, var) = sim.posterior_moments(arr1(&[1.0, -2.0]).view());
        assert_abs_diff_eq!(mean, arr1(&[0.5, -1.0]));
        assert_abs_diff_eq!(var, 0.5);
    }

    #[test]
    fn ground_truth_samples_match_moments() {
        let sim = LinearGaussian::new(3, 1.0);
        let mut rng = SmallRng::seed_from_u64(0);
        let samples = sim
            .ground_truth_posterior_samples(arr1(&[0.0, 0.0, 2.0]).view(), 40_000, &mut rng)
            .unwrap();
        let mean = samples.mean_axis(Axis(0)).unwrap();
        let var = samples.var_axis(Axis(0), 1.0);
        assert_abs_diff_eq!(mean, arr1(&[0.0, 0.0, 1.0]), epsilon = 0.02);
        assert_abs_diff_eq!(var, arr1(&[0.5, 0.5, 0.5]), epsilon = 0.02);
    }

    #[test]
    fn simulate_rejects_wrong_dimension() {
        let sim = LinearGaussian::new(2, 1.0);
        let mut rng = SmallRng::seed_from_u64(0);
        let res = sim.simulate(arr1(&[0.0]).view(), &mut rng);
        assert!(matches!(res, Err(SbiError::Simulator(_))));
    }

    #[test]
    fn zero_noise_is_identity() {
        let sim = LinearGaussian::new(2, 0.0);
        let mut rng = SmallRng::seed_from_u64(0);
        let theta = arr1(&[0.3, -0.7]);
        let x = sim.simulate(theta.view(), &mut rng).unwrap();
        assert_abs_diff_eq!(x, theta);
    }
}
