/*!
# Metropolis–Hastings Sampler

A Metropolis–Hastings sampler for any target `D` implementing [`Target`] and proposal `Q`
implementing [`Proposal`]. The sampler runs multiple independent chains in parallel; each chain
owns a clone of the target and the proposal. A global seed makes runs reproducible, and each
chain gets a unique seed by adding its index to the global seed.

## Example Usage

```rust
use sbi::core::ChainRunner;
use sbi::distributions::{IsotropicGaussian, MultivariateNormal};
use sbi::metropolis_hastings::MetropolisHastings;

let target = MultivariateNormal::standard(2).unwrap();
let proposal = IsotropicGaussian::new(1.0);
let mut mh = MetropolisHastings::new(target, proposal, &[vec![0.0, 0.0]]).set_seed(42);
let samples = mh.run(100, 10, 1).unwrap();
assert_eq!(samples.shape(), &[1, 100, 2]);
```
*/

use rand::prelude::*;
use std::marker::Send;

use crate::core::{HasChains, MarkovChain};
use crate::distributions::{Proposal, Target};

/// The Metropolis–Hastings sampler.
///
/// # Type Parameters
/// - `D`: The target distribution type. Must implement [`Target`].
/// - `Q`: The proposal distribution type. Must implement [`Proposal`].
#[derive(Debug, Clone)]
pub struct MetropolisHastings<D: Clone, Q: Clone> {
    /// The vector of independent Markov chains.
    pub chains: Vec<MHMarkovChain<D, Q>>,
    /// The global random seed.
    pub seed: u64,
}

/// A single Markov chain for the Metropolis–Hastings algorithm.
///
/// Each chain stores its own copy of the target and proposal distributions,
/// maintains its current state, and uses a chain-specific random number generator.
#[derive(Debug, Clone)]
pub struct MHMarkovChain<D, Q> {
    /// The target distribution to sample from.
    pub target: D,
    /// The proposal distribution used to generate candidate states.
    pub proposal: Q,
    /// The current state of the chain.
    pub current_state: Vec<f64>,
    current_lp: f64,
    /// The chain-specific random seed.
    pub seed: u64,
    /// The random number generator for this chain.
    pub rng: SmallRng,
}

impl<D, Q> MetropolisHastings<D, Q>
where
    D: Target + Clone + Send,
    Q: Proposal + Clone + Send,
{
    /// Constructs a sampler with one chain per entry of `initial_states`.
    pub fn new(target: D, proposal: Q, initial_states: &[Vec<f64>]) -> Self {
        let chains = initial_states
            .iter()
            .map(|init| MHMarkovChain::new(target.clone(), proposal.clone(), init))
            .collect();
        let seed = thread_rng().gen::<u64>();
        Self { chains, seed }
    }

    /// Sets a new global seed; chain `i` (and its proposal) is reseeded with `seed + i`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        for (i, chain) in self.chains.iter_mut().enumerate() {
            let chain_seed = seed.wrapping_add(i as u64);
            chain.seed = chain_seed;
            chain.rng = SmallRng::seed_from_u64(chain_seed);
            chain.proposal = chain.proposal.clone().set_seed(chain_seed.wrapping_mul(31));
        }
        self
    }
}

impl<D, Q> HasChains for MetropolisHastings<D, Q>
where
    D: Target + Clone + Send,
    Q: Proposal + Clone + Send,
{
    type Chain = MHMarkovChain<D, Q>;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain> {
        &mut self.chains
    }
}

impl<D, Q> MHMarkovChain<D, Q>
where
    D: Target + Clone,
    Q: Proposal + Clone,
{
    /// Creates a new Metropolis–Hastings chain.
    pub fn new(target: D, proposal: Q, initial_state: &[f64]) -> Self {
        let seed = thread_rng().gen::<u64>();
        let current_lp = target.unnorm_log_prob(initial_state);
        Self {
            target,
            proposal,
            current_state: initial_state.to_vec(),
            current_lp,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl<D, Q> MarkovChain for MHMarkovChain<D, Q>
where
    D: Target + Clone,
    Q: Proposal + Clone,
{
    /**
    Performs one Metropolis–Hastings update step.

    The acceptance ratio in log-space is

    \[
    \log \alpha = \left[\log p(\text{proposed}) + \log q(\text{current} \mid \text{proposed})\right]
                  - \left[\log p(\text{current}) + \log q(\text{proposed} \mid \text{current})\right]
    \]

    A proposal with non-finite log-density is always rejected.
    */
    fn step(&mut self) -> &[f64] {
        let proposed = self.proposal.sample(&self.current_state);
        let proposed_lp = self.target.unnorm_log_prob(&proposed);
        if proposed_lp.is_finite() {
            let log_q_forward = self.proposal.log_prob(&self.current_state, &proposed);
            let log_q_backward = self.proposal.log_prob(&proposed, &self.current_state);
            let log_accept_ratio =
                (proposed_lp + log_q_backward) - (self.current_lp + log_q_forward);
            let u: f64 = self.rng.gen();
            if log_accept_ratio > u.ln() {
                self.current_state = proposed;
                self.current_lp = proposed_lp;
            }
        }
        &self.current_state
    }

    fn current_state(&self) -> &[f64] {
        &self.current_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ChainRunner;
    use crate::distributions::{IsotropicGaussian, MultivariateNormal};
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2, Axis};
    use ndarray_stats::CorrelationExt;

    fn run_gaussian_2d_test(sample_size: usize, n_chains: usize, use_progress: bool) {
        const BURNIN: usize = 2_000;
        const SEED: u64 = 42;

        let target =
            MultivariateNormal::new(arr1(&[0.0, 1.0]), arr2(&[[4.0, 2.0], [2.0, 3.0]])).unwrap();
        let initial_states = vec![vec![0.0, 0.0]; n_chains];
        let proposal = IsotropicGaussian::new(1.0);
        let mut mh = MetropolisHastings::new(target.clone(), proposal, &initial_states)
            .set_seed(SEED);

        let samples = if use_progress {
            mh.run_progress(sample_size / n_chains, BURNIN, 1).unwrap()
        } else {
            mh.run(sample_size / n_chains, BURNIN, 1).unwrap()
        };

        let stacked = samples
            .into_shape_with_order((sample_size, 2))
            .expect("Failed to reshape samples");

        let mean = stacked.mean_axis(Axis(0)).unwrap();
        let cov = stacked.t().cov(1.0).unwrap();
        assert_abs_diff_eq!(mean, target.mean, epsilon = 0.3);
        assert_abs_diff_eq!(cov, target.covariance, epsilon = 0.5);
    }

    #[test]
    fn test_single_1_chain() {
        run_gaussian_2d_test(10_000, 1, false);
    }

    #[test]
    fn test_4_chains() {
        run_gaussian_2d_test(40_000, 4, false);
    }

    #[test]
    fn test_progress_4_chains() {
        run_gaussian_2d_test(40_000, 4, true);
    }

    #[test]
    fn seeding_is_reproducible() {
        let target = MultivariateNormal::standard(2).unwrap();
        let init = vec![vec![0.0, 0.0]; 2];
        let mut a = MetropolisHastings::new(target.clone(), IsotropicGaussian::new(1.0), &init)
            .set_seed(7);
        let mut b =
            MetropolisHastings::new(target, IsotropicGaussian::new(1.0), &init).set_seed(7);
        assert_eq!(a.chains[1].seed, 8);
        assert_eq!(a.run(50, 0, 1).unwrap(), b.run(50, 0, 1).unwrap());
    }

    #[test]
    fn chain_seeds_wrap_at_the_top_of_the_range() {
        let target = MultivariateNormal::standard(1).unwrap();
        let init = vec![vec![0.0]; 2];
        let mh = MetropolisHastings::new(target, IsotropicGaussian::new(1.0), &init)
            .set_seed(u64::MAX - 1);
        assert_eq!(mh.chains[1].seed, u64::MAX);
        let mh = mh.set_seed(u64::MAX);
        assert_eq!(mh.chains[1].seed, 0);
    }
}
