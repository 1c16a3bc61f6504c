/*!
# Sequential ratio estimation (SRE)

A classifier `f(θ, x)` is trained to tell parameters that generated an observation apart from
parameters that did not. Its logit estimates the likelihood-to-evidence ratio up to a function of
`x`, so the posterior is `p(θ | x_o) ∝ p(θ) exp(f(θ, x_o))` and is always sampled with MCMC.

- `Atoms::Count(2)`: binary cross-entropy of joint pairs `(θ_i, x_i)` against pairs whose
  parameters were shuffled within the batch.
- More atoms: each `x_i` scores its own `θ_i` against `atoms - 1` other parameters from the batch
  with a softmax cross-entropy.
*/

use std::iter;

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use ndarray::Array1;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;

use super::{atom_positions, contrastive_loss, DefaultBackend, Estimator, FitData, SequentialInference};
use crate::config::{Atoms, InferenceConfig, TrainingConfig};
use crate::distributions::Prior;
use crate::error::Result;
use crate::nn::{rows_to_tensor, softplus, Classifier, ClassifierConfig};
use crate::posterior::PosteriorModel;
use crate::registry;
use crate::simulators::Simulator;
use crate::training;

/// SRE on the default backend: `Sre::new(simulator, prior, observation, config)`.
pub type Sre<S, P, B = DefaultBackend> = SequentialInference<S, P, SreEstimator<B>>;

#[derive(Debug, Clone)]
pub struct SreEstimator<B: AutodiffBackend> {
    pub classifier: ClassifierConfig,
    pub num_atoms: Atoms,
    device: B::Device,
}

impl<B: AutodiffBackend> SreEstimator<B> {
    pub fn new(config: &InferenceConfig, device: B::Device) -> Result<Self> {
        Ok(Self {
            classifier: registry::classifiers().get(&config.classifier)?,
            num_atoms: config.num_atoms,
            device,
        })
    }

    /// Mean binary cross-entropy with joint pairs labelled 1 and shuffled pairs labelled 0.
    fn binary_loss(
        &self,
        classifier: &Classifier<B>,
        data: &FitData,
        batch: &[usize],
        rng: &mut SmallRng,
    ) -> Tensor<B, 1> {
        let mut shuffled = batch.to_vec();
        shuffled.shuffle(rng);
        let context = rows_to_tensor(&data.context, batch, &self.device);
        let joint = classifier.forward(rows_to_tensor(&data.theta, batch, &self.device), context.clone());
        let marginal = classifier.forward(rows_to_tensor(&data.theta, &shuffled, &self.device), context);
        (softplus(joint.neg()).mean() + softplus(marginal).mean()).div_scalar(2.0)
    }

    fn multiclass_loss(
        &self,
        classifier: &Classifier<B>,
        data: &FitData,
        batch: &[usize],
        atoms: usize,
        rng: &mut SmallRng,
    ) -> Tensor<B, 1> {
        let b = batch.len();
        let theta_rows: Vec<usize> = atom_positions(b, atoms, rng)
            .into_iter()
            .map(|p| batch[p])
            .collect();
        let context_rows: Vec<usize> = batch
            .iter()
            .flat_map(|&i| iter::repeat(i).take(atoms))
            .collect();
        let logits = classifier
            .forward(
                rows_to_tensor(&data.theta, &theta_rows, &self.device),
                rows_to_tensor(&data.context, &context_rows, &self.device),
            )
            .reshape([b, atoms]);
        contrastive_loss(logits)
    }
}

impl<B: AutodiffBackend> Estimator for SreEstimator<B> {
    type Backend = B;
    type Net = Classifier<B>;

    fn device(&self) -> B::Device {
        self.device.clone()
    }

    fn build(&self, theta_dim: usize, context_dim: usize, rng: &mut SmallRng) -> Classifier<B> {
        self.classifier.init(theta_dim, context_dim, rng, &self.device)
    }

    fn fit(
        &self,
        net: Classifier<B>,
        data: &FitData,
        training: &TrainingConfig,
        show_progress: bool,
        rng: &mut SmallRng,
    ) -> Result<Classifier<B>> {
        let (classifier, summary) =
            training::fit(net, data.len(), training, show_progress, rng, |classifier, batch, rng| {
                match self.num_atoms.resolve(batch.len()) {
                    atoms if atoms > 2 => self.multiclass_loss(classifier, data, batch, atoms, rng),
                    _ => self.binary_loss(classifier, data, batch, rng),
                }
            })?;
        log::info!(
            "SRE: {} epochs, best validation loss {:.4}",
            summary.epochs,
            summary.best_validation_loss
        );
        Ok(classifier)
    }

    fn posterior_model(&self, net: &Classifier<B>) -> PosteriorModel<B::InnerBackend> {
        PosteriorModel::Ratio(net.valid())
    }

    fn samples_directly(&self) -> bool {
        false
    }
}

impl<S, P> SequentialInference<S, P, SreEstimator<DefaultBackend>>
where
    S: Simulator,
    P: Prior + 'static,
{
    pub fn new(simulator: S, prior: P, observation: Array1<f64>, config: InferenceConfig) -> Result<Self> {
        let estimator = SreEstimator::new(&config, Default::default())?;
        Self::with_estimator(simulator, prior, observation, config, estimator)
    }
}
