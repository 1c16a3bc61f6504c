//! End-to-end check of SRE on the linear-Gaussian model: a ratio classifier trained on one round
//! of simulations, sampled with slice MCMC, must match the exact posterior to MMD² < 0.02.

use ndarray::Array1;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use sbi::config::InferenceConfig;
use sbi::distributions::MultivariateNormal;
use sbi::inference::Sre;
use sbi::mmd::unbiased_mmd_squared;
use sbi::simulators::{GroundTruthPosterior, LinearGaussian};

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_MMD: f64 = 0.02;
    const SEED: u64 = 0;

    fn run_sre_on_linear_gaussian(num_dim: usize) {
        let simulator = LinearGaussian::new(num_dim, 1.0);
        let prior = MultivariateNormal::standard(num_dim).unwrap();
        let observation = Array1::zeros(num_dim);

        let config = InferenceConfig::sre()
            .with_classifier("resnet")
            .with_mcmc_method("slice-np")
            .set_seed(SEED);
        let mut sre = Sre::new(simulator, prior, observation.clone(), config).unwrap();

        sre.run_inference(1, 1000).unwrap();
        let samples = sre.sample_posterior(1000).unwrap();
        assert_eq!(samples.shape(), &[1000, num_dim]);

        let mut rng = SmallRng::seed_from_u64(SEED);
        let target = simulator
            .ground_truth_posterior_samples(observation.view(), 1000, &mut rng)
            .unwrap();
        let mmd = unbiased_mmd_squared(&target, &samples).unwrap();
        assert!(mmd < MAX_MMD, "MMD² = {mmd} exceeds {MAX_MMD} for {num_dim} dimensions");
    }

    #[test]
    fn sre_matches_ground_truth_1d() {
        run_sre_on_linear_gaussian(1);
    }

    #[test]
    fn sre_matches_ground_truth_3d() {
        run_sre_on_linear_gaussian(3);
    }
}
