/*!
# Automatic posterior transformation (APT, SNPE-C)

A conditional flow `q(θ | x)` is trained directly as the posterior.

- While every training parameter comes from the prior, the loss is maximum likelihood
  `-log q(θ_i | x_i)`.
- Once proposal samples are present, the atomic loss compares each `θ_i` against other
  parameters from the batch:

  ```text
  -log [ (q(θ_i|x_i) / p(θ_i)) / Σ_j (q(θ_j|x_i) / p(θ_j)) ]
  ```

  which yields the posterior for any proposal without importance weights. With
  `use_combined_loss` the maximum-likelihood term on prior samples is added.

```rust,no_run
use ndarray::arr1;
use sbi::config::InferenceConfig;
use sbi::distributions::MultivariateNormal;
use sbi::inference::Apt;
use sbi::simulators::LinearGaussian;

let simulator = LinearGaussian::new(2, 0.1);
let prior = MultivariateNormal::standard(2).unwrap();
let config = InferenceConfig::default().set_seed(0);
let mut apt = Apt::new(simulator, prior, arr1(&[0.5, -0.5]), config).unwrap();
apt.run_inference(2, 500).unwrap();
let samples = apt.sample_posterior(1_000).unwrap();
assert_eq!(samples.shape(), &[1_000, 2]);
```
*/

use std::iter;

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use ndarray::Array1;
use rand::rngs::SmallRng;

use super::{atom_positions, contrastive_loss, DefaultBackend, Estimator, FitData, SequentialInference};
use crate::config::{Atoms, InferenceConfig, TrainingConfig};
use crate::distributions::Prior;
use crate::error::Result;
use crate::nn::{gather_to_tensor, rows_to_tensor, Maf, MafConfig};
use crate::posterior::PosteriorModel;
use crate::registry;
use crate::simulators::Simulator;
use crate::training;

/// APT on the default backend: `Apt::new(simulator, prior, observation, config)`.
pub type Apt<S, P, B = DefaultBackend> = SequentialInference<S, P, AptEstimator<B>>;

#[derive(Debug, Clone)]
pub struct AptEstimator<B: AutodiffBackend> {
    pub flow: MafConfig,
    pub num_atoms: Atoms,
    pub use_combined_loss: bool,
    device: B::Device,
}

impl<B: AutodiffBackend> AptEstimator<B> {
    pub fn new(config: &InferenceConfig, device: B::Device) -> Result<Self> {
        Ok(Self {
            flow: registry::density_estimators().get(&config.density_estimator)?,
            num_atoms: config.num_atoms,
            use_combined_loss: config.use_combined_loss,
            device,
        })
    }

    fn maximum_likelihood_loss(&self, flow: &Maf<B>, data: &FitData, batch: &[usize]) -> Tensor<B, 1> {
        flow.log_prob(
            rows_to_tensor(&data.theta, batch, &self.device),
            rows_to_tensor(&data.context, batch, &self.device),
        )
        .neg()
        .mean()
    }

    fn atomic_loss(
        &self,
        flow: &Maf<B>,
        data: &FitData,
        batch: &[usize],
        rng: &mut SmallRng,
    ) -> Tensor<B, 1> {
        let b = batch.len();
        let atoms = self.num_atoms.resolve(b);
        if atoms < 2 {
            return self.maximum_likelihood_loss(flow, data, batch);
        }
        let theta_rows: Vec<usize> = atom_positions(b, atoms, rng)
            .into_iter()
            .map(|p| batch[p])
            .collect();
        let context_rows: Vec<usize> = batch
            .iter()
            .flat_map(|&i| iter::repeat(i).take(atoms))
            .collect();

        let log_q = flow
            .log_prob(
                rows_to_tensor(&data.theta, &theta_rows, &self.device),
                rows_to_tensor(&data.context, &context_rows, &self.device),
            )
            .reshape([b, atoms]);
        let log_prior = gather_to_tensor::<B>(&data.prior_log_prob, &theta_rows, [b, atoms], &self.device);
        contrastive_loss(log_q - log_prior)
    }
}

impl<B: AutodiffBackend> Estimator for AptEstimator<B> {
    type Backend = B;
    type Net = Maf<B>;

    fn device(&self) -> B::Device {
        self.device.clone()
    }

    fn build(&self, theta_dim: usize, context_dim: usize, rng: &mut SmallRng) -> Maf<B> {
        self.flow.init(theta_dim, context_dim, rng, &self.device)
    }

    fn fit(
        &self,
        net: Maf<B>,
        data: &FitData,
        training: &TrainingConfig,
        show_progress: bool,
        rng: &mut SmallRng,
    ) -> Result<Maf<B>> {
        let atomic = data.from_prior.iter().any(|from_prior| !from_prior);
        let (flow, summary) = training::fit(net, data.len(), training, show_progress, rng, |flow, batch, rng| {
            if !atomic {
                return self.maximum_likelihood_loss(flow, data, batch);
            }
            let loss = self.atomic_loss(flow, data, batch, rng);
            if !self.use_combined_loss {
                return loss;
            }
            let prior_batch: Vec<usize> = batch.iter().copied().filter(|&i| data.from_prior[i]).collect();
            if prior_batch.is_empty() {
                return loss;
            }
            let weight = prior_batch.len() as f64 / batch.len() as f64;
            loss + self
                .maximum_likelihood_loss(flow, data, &prior_batch)
                .mul_scalar(weight)
        })?;
        log::info!(
            "APT ({} loss): {} epochs, best validation loss {:.4}",
            if atomic { "atomic" } else { "maximum-likelihood" },
            summary.epochs,
            summary.best_validation_loss
        );
        Ok(flow)
    }

    fn posterior_model(&self, net: &Maf<B>) -> PosteriorModel<B::InnerBackend> {
        PosteriorModel::Flow(net.valid())
    }

    fn samples_directly(&self) -> bool {
        true
    }
}

impl<S, P> SequentialInference<S, P, AptEstimator<DefaultBackend>>
where
    S: Simulator,
    P: Prior + 'static,
{
    pub fn new(simulator: S, prior: P, observation: Array1<f64>, config: InferenceConfig) -> Result<Self> {
        let estimator = AptEstimator::new(&config, Default::default())?;
        Self::with_estimator(simulator, prior, observation, config, estimator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::MultivariateNormal;
    use crate::error::SbiError;
    use crate::simulators::LinearGaussian;
    use ndarray::arr1;

    fn quick_config() -> InferenceConfig {
        InferenceConfig::default()
            .with_density_estimator("made")
            .with_training(TrainingConfig::default().with_max_num_epochs(5))
            .set_seed(0)
    }

    fn engine(config: InferenceConfig) -> Apt<LinearGaussian, MultivariateNormal> {
        Apt::new(
            LinearGaussian::new(2, 0.5),
            MultivariateNormal::standard(2).unwrap(),
            arr1(&[0.2, -0.1]),
            config,
        )
        .unwrap()
    }

    #[test]
    fn sampling_before_fitting_fails() {
        let mut apt = engine(quick_config());
        assert!(!apt.is_fitted());
        assert!(matches!(apt.sample_posterior(10), Err(SbiError::NotFitted)));
        assert!(matches!(apt.log_prob(arr1(&[0.0, 0.0]).view()), Err(SbiError::NotFitted)));
    }

    #[test]
    fn zero_rounds_or_simulations_are_rejected() {
        let mut apt = engine(quick_config());
        assert!(matches!(apt.run_inference(0, 10), Err(SbiError::Configuration(_))));
        assert!(matches!(apt.run_inference(1, 0), Err(SbiError::Configuration(_))));
        assert_eq!(apt.num_rounds_completed(), 0);
    }

    #[test]
    fn mismatched_observation_is_rejected() {
        let result = Apt::new(
            LinearGaussian::new(2, 0.5),
            MultivariateNormal::standard(2).unwrap(),
            arr1(&[0.2]),
            quick_config(),
        );
        assert!(matches!(result, Err(SbiError::Configuration(_))));
    }

    #[test]
    fn unknown_density_estimator_is_rejected() {
        let result = Apt::new(
            LinearGaussian::new(2, 0.5),
            MultivariateNormal::standard(2).unwrap(),
            arr1(&[0.2, -0.1]),
            quick_config().with_density_estimator("nsf"),
        );
        assert!(matches!(result, Err(SbiError::Configuration(_))));
    }

    #[test]
    fn training_set_grows_per_round() {
        let mut apt = engine(quick_config());
        apt.run_inference(2, 50).unwrap();
        assert_eq!(apt.num_rounds_completed(), 2);
        assert_eq!(apt.training_set().len(), 100);
        assert_eq!(apt.fitting_set_size(), 100);
        assert!(apt.training_set().rounds()[0].from_prior);
        assert!(!apt.training_set().rounds()[1].from_prior);
        assert!(apt.log_prob(arr1(&[0.0, 0.0]).view()).unwrap().is_finite());
    }

    #[test]
    fn discarding_prior_samples_shrinks_the_fitting_view() {
        let mut apt = engine(
            quick_config()
                .with_discard_prior_samples(true)
                .with_num_atoms(Atoms::Count(5))
                .with_use_combined_loss(true),
        );
        apt.run_inference(1, 40).unwrap();
        assert_eq!(apt.fitting_set_size(), 40);
        apt.run_inference(2, 40).unwrap();
        assert_eq!(apt.training_set().len(), 120);
        assert_eq!(apt.fitting_set_size(), 80);
    }

    #[test]
    fn same_seed_same_samples() {
        let run = || {
            let mut apt = engine(quick_config());
            apt.run_inference(1, 50).unwrap();
            apt.sample_posterior(20).unwrap()
        };
        assert_eq!(run(), run());
    }
}
