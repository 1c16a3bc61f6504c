/*!
# Core Markov chain utilities.

- The [`MarkovChain`] trait abstracts a single MCMC chain over `f64` states.
- [`run_chain`] and [`run_chain_progress`] execute one chain and collect its (thinned) states.
- [`HasChains`] is implemented by samplers that own several chains.
- [`ChainRunner`] runs all chains of a [`HasChains`] type in parallel (using Rayon), discarding
  burn-in and optionally displaying one progress bar per chain.

Any type implementing [`HasChains`] automatically implements [`ChainRunner`].
*/

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ndarray::{stack, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use std::marker::Send;

use crate::error::Result;

/// A trait that abstracts a single MCMC chain.
pub trait MarkovChain {
    /// Performs one iteration of the chain and returns a reference to the new state.
    fn step(&mut self) -> &[f64];

    /// Returns a reference to the current state of the chain without advancing it.
    fn current_state(&self) -> &[f64];
}

/// Runs a single chain for `n_discard + n_collect * thin` steps and keeps every `thin`-th state
/// after burn-in, giving an array of shape `[n_collect, dim]`.
pub fn run_chain<M>(chain: &mut M, n_collect: usize, n_discard: usize, thin: usize) -> Array2<f64>
where
    M: MarkovChain,
{
    let thin = thin.max(1);
    let dim = chain.current_state().len();
    let mut out = Array2::<f64>::zeros((n_collect, dim));

    (0..n_discard).for_each(|_| {
        chain.step();
    });
    for i in 0..n_collect {
        for _ in 0..thin - 1 {
            chain.step();
        }
        let state = chain.step();
        out.row_mut(i).assign(&ArrayView1::from(state));
    }
    out
}

/// Same as [`run_chain`], advancing `pb` once per collected state.
pub fn run_chain_progress<M>(
    chain: &mut M,
    n_collect: usize,
    n_discard: usize,
    thin: usize,
    pb: &ProgressBar,
) -> Array2<f64>
where
    M: MarkovChain,
{
    let thin = thin.max(1);
    let dim = chain.current_state().len();
    let mut out = Array2::<f64>::zeros((n_collect, dim));

    pb.set_length((n_discard + n_collect) as u64);
    for _ in 0..n_discard {
        chain.step();
        pb.inc(1);
    }
    for i in 0..n_collect {
        for _ in 0..thin - 1 {
            chain.step();
        }
        let state = chain.step();
        out.row_mut(i).assign(&ArrayView1::from(state));
        pb.inc(1);
    }
    out
}

/// A trait for types that own multiple MCMC chains.
pub trait HasChains {
    type Chain: MarkovChain + Send;

    /// Returns a mutable reference to the vector of chains.
    fn chains_mut(&mut self) -> &mut Vec<Self::Chain>;
}

/// An extension trait for types that own multiple MCMC chains.
///
/// The returned array has shape `[n_chains, n_collect, dim]`.
pub trait ChainRunner: HasChains {
    /// Runs all chains in parallel, discarding the first `n_discard` iterations (burn-in).
    fn run(&mut self, n_collect: usize, n_discard: usize, thin: usize) -> Result<Array3<f64>> {
        let results: Vec<Array2<f64>> = self
            .chains_mut()
            .par_iter_mut()
            .map(|chain| run_chain(chain, n_collect, n_discard, thin))
            .collect();
        stack_chains(&results)
    }

    /// Runs all chains in parallel with one progress bar per chain.
    fn run_progress(
        &mut self,
        n_collect: usize,
        n_discard: usize,
        thin: usize,
    ) -> Result<Array3<f64>> {
        let multi = MultiProgress::new();
        let pb_style = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        let results: Vec<Array2<f64>> = self
            .chains_mut()
            .par_iter_mut()
            .enumerate()
            .map(|(i, chain)| {
                let pb = multi.add(ProgressBar::new((n_discard + n_collect) as u64));
                pb.set_prefix(format!("Chain {i}"));
                pb.set_style(pb_style.clone());
                let samples = run_chain_progress(chain, n_collect, n_discard, thin, &pb);
                pb.finish_with_message("Done!");
                samples
            })
            .collect();
        stack_chains(&results)
    }
}

impl<T: HasChains> ChainRunner for T {}

fn stack_chains(results: &[Array2<f64>]) -> Result<Array3<f64>> {
    let views: Vec<ArrayView2<f64>> = results.iter().map(|x| x.view()).collect();
    Ok(stack(Axis(0), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic chain that counts its steps.
    struct Counter {
        state: Vec<f64>,
    }

    impl MarkovChain for Counter {
        fn step(&mut self) -> &[f64] {
            self.state[0] += 1.0;
            &self.state
        }

        fn current_state(&self) -> &[f64] {
            &self.state
        }
    }

    struct Counters {
        chains: Vec<Counter>,
    }

    impl HasChains for Counters {
        type Chain = Counter;

        fn chains_mut(&mut self) -> &mut Vec<Counter> {
            &mut self.chains
        }
    }

    #[test]
    fn burn_in_and_thinning() {
        let mut chain = Counter { state: vec![0.0] };
        let out = run_chain(&mut chain, 3, 5, 2);
        assert_eq!(out.column(0).to_vec(), vec![7.0, 9.0, 11.0]);
    }

    #[test]
    fn runner_stacks_chains() {
        let mut counters = Counters {
            chains: (0..3).map(|_| Counter { state: vec![0.0] }).collect(),
        };
        let out = counters.run(4, 1, 1).unwrap();
        assert_eq!(out.shape(), &[3, 4, 1]);
        assert_eq!(out[[2, 0, 0]], 2.0);
        assert_eq!(out[[1, 3, 0]], 5.0);
    }
}
