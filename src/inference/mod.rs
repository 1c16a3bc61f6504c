/*!
# Sequential inference

The round loop shared by APT and SRE. A round

1. draws parameters from the current proposal (the prior before the first fit, the fitted
   posterior afterwards),
2. simulates every parameter set in parallel, each with its own RNG seeded from the engine RNG,
3. appends the round to the training set and fits the estimator on the fitting view,
4. conditions the fitted estimator on the target observation to form the next proposal.

A round that fails leaves the training set, network and posterior exactly as they were; only the
engine RNG has advanced.

The method-specific part (network, loss, how the posterior is sampled) is an [`Estimator`].
*/

pub mod apt;
pub mod sre;

use std::sync::Arc;

use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::{InferenceConfig, TrainingConfig};
use crate::data::{Standardizer, TrainingSet};
use crate::distributions::Prior;
use crate::error::{Result, SbiError};
use crate::nn::logsumexp;
use crate::posterior::{Posterior, PosteriorModel};
use crate::registry;
use crate::simulators::Simulator;

pub use apt::{Apt, AptEstimator};
pub use sre::{Sre, SreEstimator};

/// Backend used for training unless another is chosen through [`SequentialInference::with_estimator`].
pub type DefaultBackend = Autodiff<NdArray>;

type InnerBackend<E> = <<E as Estimator>::Backend as AutodiffBackend>::InnerBackend;

/// Examples an estimator is fitted on.
#[derive(Debug, Clone)]
pub struct FitData {
    pub theta: Array2<f64>,
    /// Embedded and standardized observations.
    pub context: Array2<f64>,
    /// Prior log-density of every row of `theta`.
    pub prior_log_prob: Array1<f64>,
    /// Whether each row was drawn from the prior.
    pub from_prior: Vec<bool>,
}

impl FitData {
    pub fn len(&self) -> usize {
        self.theta.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Network, loss and sampling strategy of one inference method.
pub trait Estimator: Clone {
    type Backend: AutodiffBackend;
    type Net: AutodiffModule<Self::Backend>;

    fn device(&self) -> <Self::Backend as Backend>::Device;

    /// Fresh network for `theta_dim` parameters and `context_dim` observation features.
    fn build(&self, theta_dim: usize, context_dim: usize, rng: &mut SmallRng) -> Self::Net;

    fn fit(
        &self,
        net: Self::Net,
        data: &FitData,
        training: &TrainingConfig,
        show_progress: bool,
        rng: &mut SmallRng,
    ) -> Result<Self::Net>;

    fn posterior_model(&self, net: &Self::Net) -> PosteriorModel<InnerBackend<Self>>;

    /// Whether the posterior can be sampled without MCMC.
    fn samples_directly(&self) -> bool;
}

/// For each of `batch` examples, `atoms` positions into the batch with the example's own
/// position first. Row-major `[batch, atoms]`.
pub(crate) fn atom_positions(batch: usize, atoms: usize, rng: &mut SmallRng) -> Vec<usize> {
    let mut positions = Vec::with_capacity(batch * atoms);
    for i in 0..batch {
        positions.push(i);
        if atoms == batch {
            positions.extend((0..batch).filter(|&j| j != i));
        } else {
            positions.extend(
                rand::seq::index::sample(rng, batch - 1, atoms - 1)
                    .into_iter()
                    .map(|j| if j >= i { j + 1 } else { j }),
            );
        }
    }
    positions
}

/// Mean of `logsumexp(row) - row[0]` over the rows of `logits`.
pub(crate) fn contrastive_loss<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 1> {
    let own = logits.clone().narrow(1, 0, 1).squeeze::<1>(1);
    (logsumexp(logits) - own).mean()
}

/// Round loop over simulator `S`, prior `P` and estimator `E`.
pub struct SequentialInference<S, P: Prior, E: Estimator> {
    simulator: S,
    prior: Arc<P>,
    observation: Array1<f64>,
    config: InferenceConfig,
    estimator: E,
    training: TrainingSet,
    net: Option<E::Net>,
    standardizer: Option<Standardizer>,
    posterior: Option<Posterior<InnerBackend<E>, P>>,
    rng: SmallRng,
    rounds_completed: usize,
}

impl<S, P, E> SequentialInference<S, P, E>
where
    S: Simulator,
    P: Prior + 'static,
    E: Estimator,
{
    /// Validates `config` and the dimensions of prior, simulator and observation.
    pub fn with_estimator(
        simulator: S,
        prior: P,
        observation: Array1<f64>,
        config: InferenceConfig,
        estimator: E,
    ) -> Result<Self> {
        config.validate()?;
        if prior.dim() != simulator.parameter_dim() {
            return Err(SbiError::Configuration(format!(
                "prior has {} dimensions, simulator expects {}",
                prior.dim(),
                simulator.parameter_dim()
            )));
        }
        if observation.len() != simulator.observation_dim() {
            return Err(SbiError::Configuration(format!(
                "observation has {} entries, simulator produces {}",
                observation.len(),
                simulator.observation_dim()
            )));
        }
        if let Some(net) = &config.summary_net {
            net.apply(observation.view())?;
        }
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Ok(Self {
            simulator,
            prior: Arc::new(prior),
            observation,
            config,
            estimator,
            training: TrainingSet::new(),
            net: None,
            standardizer: None,
            posterior: None,
            rng,
            rounds_completed: 0,
        })
    }

    /// Runs `num_rounds` rounds of `num_simulations_per_round` simulations each.
    ///
    /// Rounds run one after another and stop at the first error; completed rounds are kept.
    /// A round needs at least two simulations, one to train on and one to validate against.
    pub fn run_inference(&mut self, num_rounds: usize, num_simulations_per_round: usize) -> Result<()> {
        if num_rounds < 1 {
            return Err(SbiError::Configuration("num_rounds must be at least 1".into()));
        }
        if num_simulations_per_round < 2 {
            return Err(SbiError::Configuration(format!(
                "num_simulations_per_round must be at least 2, got {num_simulations_per_round}"
            )));
        }
        for _ in 0..num_rounds {
            self.run_round(num_simulations_per_round)?;
        }
        Ok(())
    }

    /// Draws `num_samples` parameter vectors from the current posterior.
    pub fn sample_posterior(&mut self, num_samples: usize) -> Result<Array2<f64>> {
        let posterior = self.posterior.as_ref().ok_or(SbiError::NotFitted)?;
        posterior.sample(num_samples, &mut self.rng)
    }

    /// Posterior log-density at `theta` (unnormalised for ratio estimators).
    pub fn log_prob(&self, theta: ArrayView1<f64>) -> Result<f64> {
        self.posterior()?.log_prob(theta)
    }

    pub fn posterior(&self) -> Result<&Posterior<InnerBackend<E>, P>> {
        self.posterior.as_ref().ok_or(SbiError::NotFitted)
    }

    pub fn is_fitted(&self) -> bool {
        self.posterior.is_some()
    }

    pub fn num_rounds_completed(&self) -> usize {
        self.rounds_completed
    }

    pub fn training_set(&self) -> &TrainingSet {
        &self.training
    }

    /// Number of pairs the estimator was last fitted on.
    pub fn fitting_set_size(&self) -> usize {
        self.training.fitting_len(self.config.discard_prior_samples)
    }

    /// Observation statistics used for the last fit.
    pub fn standardizer(&self) -> Option<&Standardizer> {
        self.standardizer.as_ref()
    }

    pub fn observation(&self) -> ArrayView1<'_, f64> {
        self.observation.view()
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    fn run_round(&mut self, num_simulations: usize) -> Result<()> {
        let round = self.rounds_completed + 1;
        let from_prior = self.posterior.is_none();
        let theta = match &self.posterior {
            None => self.prior.sample(num_simulations, &mut self.rng),
            Some(posterior) => posterior.sample(num_simulations, &mut self.rng)?,
        };
        let x = self.simulate(&theta)?;

        let mut training = self.training.clone();
        training.push_round(theta, x, from_prior);
        let (theta, x, from_prior) = training.fitting_view(self.config.discard_prior_samples)?;
        log::info!(
            "round {round}: simulated {num_simulations} parameter sets, fitting on {} pairs",
            theta.nrows()
        );

        let embedded = self.embed(&x)?;
        let reset = self.net.is_none() || self.config.retrain_from_scratch_each_round;
        let standardizer = match (&self.standardizer, reset, self.config.z_score_obs) {
            (_, _, false) => Standardizer::identity(embedded.ncols()),
            (Some(existing), false, true) => existing.clone(),
            _ => Standardizer::fit(&embedded),
        };
        let data = FitData {
            prior_log_prob: self.prior.log_prob_batch(&theta),
            context: standardizer.transform(&embedded),
            theta,
            from_prior,
        };

        let net = match (&self.net, reset) {
            (Some(net), false) => net.clone(),
            _ => self
                .estimator
                .build(self.prior.dim(), data.context.ncols(), &mut self.rng),
        };
        let net = self.estimator.fit(
            net,
            &data,
            &self.config.training,
            self.config.show_progress,
            &mut self.rng,
        )?;

        let observation = self.embed(&self.observation.view().insert_axis(Axis(0)).to_owned())?;
        let context = standardizer.transform_row(observation.row(0));
        let posterior = Posterior::new(
            self.estimator.posterior_model(&net),
            Arc::clone(&self.prior),
            context,
            self.config.train_with_mcmc || !self.estimator.samples_directly(),
            registry::mcmc_methods().get(&self.config.mcmc_method)?,
            self.config.mcmc.clone(),
            self.config.show_progress,
            self.estimator.device(),
        );

        self.training = training;
        self.net = Some(net);
        self.standardizer = Some(standardizer);
        self.posterior = Some(posterior);
        self.rounds_completed = round;
        Ok(())
    }

    /// Simulates every row of `theta` in parallel.
    fn simulate(&mut self, theta: &Array2<f64>) -> Result<Array2<f64>> {
        let n = theta.nrows();
        let dim = self.simulator.observation_dim();
        let seeds: Vec<u64> = (0..n).map(|_| self.rng.gen()).collect();
        let simulator = &self.simulator;
        let rows = seeds
            .par_iter()
            .enumerate()
            .map(|(i, &seed)| {
                let mut rng = SmallRng::seed_from_u64(seed);
                simulator.simulate(theta.row(i), &mut rng)
            })
            .collect::<Result<Vec<Array1<f64>>>>()?;

        let mut x = Array2::<f64>::zeros((n, dim));
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(SbiError::Simulator(format!(
                    "simulation {i} returned {} values, expected {dim}",
                    row.len()
                )));
            }
            x.row_mut(i).assign(row);
        }
        Ok(x)
    }

    /// Applies the summary net, if any, to every row.
    fn embed(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let Some(net) = &self.config.summary_net else {
            return Ok(x.clone());
        };
        let mut out = Array2::<f64>::zeros((x.nrows(), net.output_dim()));
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            out.row_mut(i).assign(&net.apply(row)?);
        }
        Ok(out)
    }
}
