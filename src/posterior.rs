/*!
# Fitted posterior

A [`Posterior`] pairs a trained network (moved off the autodiff backend) with the prior and the
embedded, standardized target observation.

- Flow posteriors are sampled directly: draws outside the prior support are rejected and
  replaced. If too few draws survive, sampling falls back to MCMC.
- Ratio posteriors, and flow posteriors configured with `train_with_mcmc`, are sampled with MCMC
  on `log p(θ) + f(θ, x_o)` (ratio) or the flow log-density restricted to the prior support.
*/

use std::sync::Arc;

use burn::prelude::*;
use burn::tensor::cast::ToElement;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::SmallRng;
use rand::Rng;

use crate::config::McmcConfig;
use crate::distributions::{Prior, Target};
use crate::error::Result;
use crate::mcmc::{self, McmcMethod};
use crate::nn::{repeat_row, rows_to_tensor, tensor_to_array, tensor_to_vec, Classifier, Maf};

/// Direct sampling draws at most this many times the requested number of samples.
const MAX_REJECTION_FACTOR: usize = 100;
const MIN_DIRECT_BATCH: usize = 100;

/// Network behind a posterior.
#[derive(Debug, Clone)]
pub enum PosteriorModel<B: Backend> {
    /// Conditional density `q(θ | x)`.
    Flow(Maf<B>),
    /// Classifier whose logit estimates `log r(θ, x)`.
    Ratio(Classifier<B>),
}

pub struct Posterior<B: Backend, P: Prior> {
    model: PosteriorModel<B>,
    prior: Arc<P>,
    context: Array1<f64>,
    sample_with_mcmc: bool,
    mcmc_method: McmcMethod,
    mcmc: McmcConfig,
    show_progress: bool,
    device: B::Device,
}

impl<B: Backend, P: Prior> Clone for Posterior<B, P> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            prior: Arc::clone(&self.prior),
            context: self.context.clone(),
            sample_with_mcmc: self.sample_with_mcmc,
            mcmc_method: self.mcmc_method,
            mcmc: self.mcmc.clone(),
            show_progress: self.show_progress,
            device: self.device.clone(),
        }
    }
}

impl<B: Backend, P: Prior + 'static> Posterior<B, P> {
    /// `context` is the target observation after the summary net and standardization.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: PosteriorModel<B>,
        prior: Arc<P>,
        context: Array1<f64>,
        sample_with_mcmc: bool,
        mcmc_method: McmcMethod,
        mcmc: McmcConfig,
        show_progress: bool,
        device: B::Device,
    ) -> Self {
        Self {
            model,
            prior,
            context,
            sample_with_mcmc,
            mcmc_method,
            mcmc,
            show_progress,
            device,
        }
    }

    pub fn model(&self) -> &PosteriorModel<B> {
        &self.model
    }

    /// Whether [`Posterior::sample`] runs MCMC instead of sampling the flow directly.
    pub fn samples_with_mcmc(&self) -> bool {
        self.sample_with_mcmc || matches!(self.model, PosteriorModel::Ratio(_))
    }

    /// Draws `n` samples, one per row.
    pub fn sample(&self, n: usize, rng: &mut SmallRng) -> Result<Array2<f64>> {
        if let (PosteriorModel::Flow(flow), false) = (&self.model, self.sample_with_mcmc) {
            if let Some(samples) = self.sample_direct(flow, n, rng)? {
                return Ok(samples);
            }
        }
        self.sample_mcmc(n, rng)
    }

    /// Flow: log-density at `x_o`. Ratio: unnormalised log posterior. `-∞` outside the prior
    /// support.
    pub fn log_prob(&self, theta: ArrayView1<f64>) -> Result<f64> {
        Ok(self.log_prob_batch(&theta.insert_axis(Axis(0)).to_owned())?[0])
    }

    /// [`Posterior::log_prob`] for every row of `theta`.
    pub fn log_prob_batch(&self, theta: &Array2<f64>) -> Result<Array1<f64>> {
        let prior_lp = self.prior.log_prob_batch(theta);
        let rows: Vec<usize> = (0..theta.nrows()).collect();
        let theta_t = rows_to_tensor::<B>(theta, &rows, &self.device);
        let context = repeat_row::<B>(self.context.view(), theta.nrows(), &self.device);
        let scores = match &self.model {
            PosteriorModel::Flow(flow) => tensor_to_vec(flow.log_prob(theta_t, context))?,
            PosteriorModel::Ratio(classifier) => tensor_to_vec(classifier.forward(theta_t, context))?,
        };
        Ok(prior_lp
            .iter()
            .zip(scores)
            .map(|(&lp, score)| {
                if !lp.is_finite() {
                    f64::NEG_INFINITY
                } else {
                    match self.model {
                        PosteriorModel::Flow(_) => score,
                        PosteriorModel::Ratio(_) => lp + score,
                    }
                }
            })
            .collect())
    }

    /// Samples the flow and keeps draws inside the prior support; `None` when the acceptance
    /// rate is too low to collect `n` draws.
    fn sample_direct(&self, flow: &Maf<B>, n: usize, rng: &mut SmallRng) -> Result<Option<Array2<f64>>> {
        let dim = flow.features();
        let mut accepted = Array2::<f64>::zeros((n, dim));
        let mut count = 0;
        let mut drawn = 0;
        while count < n && drawn < MAX_REJECTION_FACTOR * n.max(1) {
            let batch = (n - count).max(MIN_DIRECT_BATCH);
            let draws = tensor_to_array(flow.sample(batch, self.context.view(), rng, &self.device))?;
            drawn += batch;
            for row in draws.axis_iter(Axis(0)) {
                if count == n {
                    break;
                }
                if row.iter().all(|v| v.is_finite()) && self.prior.in_support(row) {
                    accepted.row_mut(count).assign(&row);
                    count += 1;
                }
            }
        }
        if count < n {
            log::warn!(
                "only {count} of {drawn} posterior draws fell inside the prior support; \
                 falling back to MCMC"
            );
            return Ok(None);
        }
        log::debug!("direct sampling accepted {n} of {drawn} draws");
        Ok(Some(accepted))
    }

    fn sample_mcmc(&self, n: usize, rng: &mut SmallRng) -> Result<Array2<f64>> {
        let initial_states: Vec<Vec<f64>> = self
            .prior
            .sample(self.mcmc.num_chains, rng)
            .axis_iter(Axis(0))
            .map(|row| row.to_vec())
            .collect();
        let target = PosteriorPotential {
            model: self.model.clone(),
            prior: Arc::clone(&self.prior),
            context: repeat_row::<B>(self.context.view(), 1, &self.device),
            device: self.device.clone(),
        };
        mcmc::sample(
            target,
            &initial_states,
            n,
            self.mcmc_method,
            &self.mcmc,
            rng.gen(),
            self.show_progress,
        )
    }
}

/// Unnormalised log posterior evaluated one state at a time for MCMC.
struct PosteriorPotential<B: Backend, P> {
    model: PosteriorModel<B>,
    prior: Arc<P>,
    context: Tensor<B, 2>,
    device: B::Device,
}

impl<B: Backend, P> Clone for PosteriorPotential<B, P> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            prior: Arc::clone(&self.prior),
            context: self.context.clone(),
            device: self.device.clone(),
        }
    }
}

impl<B: Backend, P: Prior> Target for PosteriorPotential<B, P> {
    fn unnorm_log_prob(&self, theta: &[f64]) -> f64 {
        let prior_lp = self.prior.log_prob(ArrayView1::from(theta));
        if !prior_lp.is_finite() {
            return f64::NEG_INFINITY;
        }
        let data: Vec<f32> = theta.iter().map(|&v| v as f32).collect();
        let theta = Tensor::<B, 2>::from_data(TensorData::new(data, [1, theta.len()]), &self.device);
        let score = match &self.model {
            PosteriorModel::Flow(flow) => flow.log_prob(theta, self.context.clone()),
            PosteriorModel::Ratio(classifier) => classifier.forward(theta, self.context.clone()),
        }
        .into_scalar()
        .to_f64();
        let lp = match self.model {
            PosteriorModel::Flow(_) => score,
            PosteriorModel::Ratio(_) => prior_lp + score,
        };
        if lp.is_nan() {
            f64::NEG_INFINITY
        } else {
            lp
        }
    }
}
