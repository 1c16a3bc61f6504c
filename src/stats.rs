//! Convergence statistics for multi-chain MCMC output.

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;

use crate::error::{Result, SbiError};

/// Potential scale reduction factor per parameter.
///
/// `samples` has shape `[n_chains, n_steps, n_params]`; the result has one entry per parameter.
/// Follows the definition in the [Stan Reference Manual][1]:
///
/// ```text
/// B = n / (C - 1) Σ_c (mean_c - mean)²
/// W = 1/C Σ_c s²_c
/// R = sqrt(((n - 1) / n · W + B / n) / W)
/// ```
///
/// [1]: https://mc-stan.org/docs/2_18/reference-manual/notation-for-samples-chains-and-draws.html
pub fn rhat(samples: ArrayView3<f64>) -> Result<Array1<f64>> {
    let (n_chains, n_steps, _) = samples.dim();
    if n_chains < 2 || n_steps < 2 {
        return Err(SbiError::Configuration(format!(
            "R-hat needs at least 2 chains of 2 steps, got {n_chains} chains of {n_steps}"
        )));
    }
    let n = n_steps as f64;

    let chain_means = samples
        .mean_axis(Axis(1))
        .ok_or_else(|| SbiError::Configuration("mean over steps failed".into()))?;
    let global_means = chain_means
        .mean_axis(Axis(0))
        .ok_or_else(|| SbiError::Configuration("mean over chains failed".into()))?;
    let between = (&chain_means - &global_means.insert_axis(Axis(0)))
        .pow2()
        .sum_axis(Axis(0))
        * (n / (n_chains as f64 - 1.0));

    let chain_vars = samples.var_axis(Axis(1), 1.0);
    let within = chain_vars
        .mean_axis(Axis(0))
        .ok_or_else(|| SbiError::Configuration("mean of chain variances failed".into()))?;

    let var = &within * ((n - 1.0) / n) + between * (1.0 / n);
    Ok((var / within).sqrt())
}

/// Largest R-hat over all parameters; NaN entries (constant chains) are ignored.
pub fn max_rhat(samples: ArrayView3<f64>) -> Result<f64> {
    let all = rhat(samples)?.mapv(|r| if r.is_nan() { 1.0 } else { r });
    Ok(*all
        .max()
        .map_err(|e| SbiError::Configuration(format!("R-hat reduction failed: {e}")))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64;

    /// Builds `[chains, steps, params]` from per-step `[chains, params]` slices.
    fn stack_steps(steps: &[Array2<f64>]) -> Array3<f64> {
        let views: Vec<ArrayView2<f64>> = steps.iter().map(|s| s.view()).collect();
        ndarray::stack(Axis(1), &views).unwrap()
    }

    fn run_rhat_test(data0: Array2<f64>, data1: Array2<f64>, expected: Array1<f64>, tol: f64) {
        let samples = stack_steps(&[data0, data1]);
        let rhat = rhat(samples.view()).unwrap();
        let diff = *(rhat.clone() - expected.clone()).abs().max().unwrap();
        assert!(
            diff < tol,
            "Mismatch in Rhat. Got {:?}, expected {:?}, diff = {:?}",
            rhat,
            expected,
            diff
        );
    }

    #[test]
    fn test_rhat_1() {
        let data_step_0 = arr2(&[
            [0.0, 1.0, 0.0, 1.0], // chain 0
            [1.0, 2.0, 0.0, 2.0], // chain 1
            [0.0, 0.0, 0.0, 2.0], // chain 2
        ]);
        let data_step_1 = arr2(&[
            [1.0, 2.0, 2.0, 0.0], // chain 0
            [1.0, 1.0, 1.0, 1.0], // chain 1
            [0.0, 1.0, 0.0, 0.0], // chain 2
        ]);
        let expected = array![f64::consts::SQRT_2, 1.08012345, 0.89442719, 0.8660254];
        run_rhat_test(data_step_0, data_step_1, expected, 1e-7);
    }

    #[test]
    fn test_rhat_2() {
        let data_step_0 = arr2(&[
            [1.0, 0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0, 1.0],
            [0.0, 1.0, 0.0, 2.0],
        ]);
        let data_step_1 = arr2(&[
            [1.0, 2.0, 0.0, 2.0],
            [1.0, 2.0, 0.0, 0.0],
            [2.0, 0.0, 1.0, 2.0],
        ]);
        let expected = array![f64::consts::FRAC_1_SQRT_2, 0.74535599, 1.0, 1.5];
        run_rhat_test(data_step_0, data_step_1, expected, 1e-7);
    }

    #[test]
    fn max_rhat_ignores_constant_parameters() {
        let samples = Array3::<f64>::zeros((2, 5, 2));
        assert_eq!(max_rhat(samples.view()).unwrap(), 1.0);
    }

    #[test]
    fn single_chain_is_rejected() {
        let samples = Array3::<f64>::zeros((1, 5, 2));
        assert!(rhat(samples.view()).is_err());
    }
}
