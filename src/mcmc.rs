//! Runs the configured sampler on an unnormalised target and flattens the chains.

use ndarray::{s, Array2, Array3};

use crate::config::McmcConfig;
use crate::core::ChainRunner;
use crate::distributions::{IsotropicGaussian, Target};
use crate::error::{Result, SbiError};
use crate::metropolis_hastings::MetropolisHastings;
use crate::slice::SliceSampler;
use crate::stats;

/// R-hat above this value triggers a warning.
const RHAT_WARNING: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McmcMethod {
    Slice,
    MetropolisHastings,
}

/// Draws `num_samples` states from `target`, one chain per initial state.
///
/// Each chain collects `ceil(num_samples / chains)` thinned states after `warmup_steps`; the
/// result interleaves chains step by step and keeps the first `num_samples` rows.
pub fn sample<T>(
    target: T,
    initial_states: &[Vec<f64>],
    num_samples: usize,
    method: McmcMethod,
    config: &McmcConfig,
    seed: u64,
    show_progress: bool,
) -> Result<Array2<f64>>
where
    T: Target + Clone + Send,
{
    let n_chains = initial_states.len();
    if n_chains == 0 {
        return Err(SbiError::Configuration(
            "MCMC needs at least one initial state".into(),
        ));
    }
    let per_chain = num_samples.div_ceil(n_chains);
    let draws = match method {
        McmcMethod::Slice => {
            let mut sampler =
                SliceSampler::new(target, initial_states, config.init_width, config.warmup_steps)
                    .set_seed(seed);
            run(&mut sampler, per_chain, config, show_progress)?
        }
        McmcMethod::MetropolisHastings => {
            let proposal = IsotropicGaussian::new(config.init_width);
            let mut sampler =
                MetropolisHastings::new(target, proposal, initial_states).set_seed(seed);
            run(&mut sampler, per_chain, config, show_progress)?
        }
    };

    if n_chains >= 2 && per_chain >= 2 {
        let rhat = stats::max_rhat(draws.view())?;
        if rhat > RHAT_WARNING {
            log::warn!("MCMC chains may not have converged: max R-hat {rhat:.3} over {n_chains} chains");
        } else {
            log::debug!("max R-hat {rhat:.3}");
        }
    }

    let dim = draws.shape()[2];
    let flat = draws
        .permuted_axes([1, 0, 2])
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((per_chain * n_chains, dim))?;
    Ok(flat.slice(s![..num_samples, ..]).to_owned())
}

fn run<R: ChainRunner>(
    sampler: &mut R,
    per_chain: usize,
    config: &McmcConfig,
    show_progress: bool,
) -> Result<Array3<f64>> {
    if show_progress {
        sampler.run_progress(per_chain, config.warmup_steps, config.thin)
    } else {
        sampler.run(per_chain, config.warmup_steps, config.thin)
    }
}
