/*!
# Slice Sampler

Coordinate-wise slice sampling with stepping-out and shrinkage (Neal, 2003). Every step sweeps
all coordinates in a fresh random order. During the first `n_tune` steps each coordinate's
bracket width is adapted to the running mean of the brackets it actually found, so later steps
start from a well-sized interval.

Like [`MetropolisHastings`](crate::metropolis_hastings::MetropolisHastings), the sampler owns
several chains, each with its own clone of the target, and runs them in parallel through
[`ChainRunner`](crate::core::ChainRunner).

```rust
use sbi::core::ChainRunner;
use sbi::distributions::MultivariateNormal;
use sbi::slice::SliceSampler;

let target = MultivariateNormal::standard(2).unwrap();
let mut sampler = SliceSampler::new(target, &vec![vec![0.0, 0.0]; 2], 1.0, 50).set_seed(0);
let samples = sampler.run(100, 50, 1).unwrap();
assert_eq!(samples.shape(), &[2, 100, 2]);
```
*/

use rand::prelude::*;

use crate::core::{HasChains, MarkovChain};
use crate::distributions::Target;

const MAX_STEP_OUT: usize = 50;
const MAX_SHRINK: usize = 100;

/// Several independent slice-sampling chains.
#[derive(Debug, Clone)]
pub struct SliceSampler<D: Clone> {
    pub chains: Vec<SliceChain<D>>,
    pub seed: u64,
}

/// A single coordinate-wise slice-sampling chain.
#[derive(Debug, Clone)]
pub struct SliceChain<D> {
    pub target: D,
    pub current_state: Vec<f64>,
    current_lp: f64,
    /// Per-coordinate bracket widths.
    pub widths: Vec<f64>,
    n_tune: usize,
    n_steps: usize,
    order: Vec<usize>,
    pub seed: u64,
    pub rng: SmallRng,
}

impl<D> SliceSampler<D>
where
    D: Target + Clone + Send,
{
    /// One chain per entry of `initial_states`, all starting with bracket width `init_width` and
    /// adapting it during the first `n_tune` steps.
    pub fn new(target: D, initial_states: &[Vec<f64>], init_width: f64, n_tune: usize) -> Self {
        let chains = initial_states
            .iter()
            .map(|init| SliceChain::new(target.clone(), init, init_width, n_tune))
            .collect();
        Self {
            chains,
            seed: thread_rng().gen::<u64>(),
        }
    }

    /// Chain `i` is reseeded with `seed + i`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        for (i, chain) in self.chains.iter_mut().enumerate() {
            chain.seed = seed.wrapping_add(i as u64);
            chain.rng = SmallRng::seed_from_u64(chain.seed);
        }
        self
    }
}

impl<D> HasChains for SliceSampler<D>
where
    D: Target + Clone + Send,
{
    type Chain = SliceChain<D>;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain> {
        &mut self.chains
    }
}

impl<D: Target> SliceChain<D> {
    pub fn new(target: D, initial_state: &[f64], init_width: f64, n_tune: usize) -> Self {
        let seed = thread_rng().gen::<u64>();
        let current_lp = target.unnorm_log_prob(initial_state);
        let dim = initial_state.len();
        Self {
            target,
            current_state: initial_state.to_vec(),
            current_lp,
            widths: vec![init_width; dim],
            n_tune,
            n_steps: 0,
            order: (0..dim).collect(),
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    fn log_prob_at(&self, state: &mut [f64], i: usize, value: f64) -> f64 {
        state[i] = value;
        self.target.unnorm_log_prob(state)
    }

    /// Samples coordinate `i` from its full conditional; returns the bracket width found.
    fn update_coordinate(&mut self, i: usize) -> f64 {
        let mut state = self.current_state.clone();
        let x0 = state[i];
        let w = self.widths[i];
        let log_y = self.current_lp + self.rng.gen::<f64>().ln();

        let mut lower = x0 - w * self.rng.gen::<f64>();
        let mut upper = lower + w;
        for _ in 0..MAX_STEP_OUT {
            if self.log_prob_at(&mut state, i, lower) <= log_y {
                break;
            }
            lower -= w;
        }
        for _ in 0..MAX_STEP_OUT {
            if self.log_prob_at(&mut state, i, upper) <= log_y {
                break;
            }
            upper += w;
        }
        let bracket = upper - lower;

        for _ in 0..MAX_SHRINK {
            let candidate = self.rng.gen_range(lower..upper);
            let lp = self.log_prob_at(&mut state, i, candidate);
            if lp > log_y {
                self.current_state[i] = candidate;
                self.current_lp = lp;
                return bracket;
            }
            if candidate < x0 {
                lower = candidate;
            } else {
                upper = candidate;
            }
            if !(upper > lower) {
                break;
            }
        }
        bracket
    }
}

impl<D: Target> MarkovChain for SliceChain<D> {
    fn step(&mut self) -> &[f64] {
        let mut order = std::mem::take(&mut self.order);
        order.shuffle(&mut self.rng);
        let tuning = self.n_steps < self.n_tune;
        for &i in &order {
            let bracket = self.update_coordinate(i);
            if tuning && bracket.is_finite() && bracket > 0.0 {
                self.widths[i] += (bracket - self.widths[i]) / (self.n_steps + 1) as f64;
            }
        }
        self.order = order;
        self.n_steps += 1;
        &self.current_state
    }

    fn current_state(&self) -> &[f64] {
        &self.current_state
    }
}
