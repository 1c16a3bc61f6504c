//! Sequential simulation-based inference.
//!
//! Given a stochastic simulator, a prior over its parameters and one observed data set, the
//! engines in [`inference`] learn the posterior over the parameters round by round:
//! [`inference::Apt`] trains a conditional normalizing flow as the posterior, and
//! [`inference::Sre`] trains a classifier that estimates the likelihood-to-evidence ratio.
//! [`mmd::unbiased_mmd_squared`] compares posterior samples against a reference sample.

pub mod config;
pub mod core;
pub mod data;
pub mod distributions;
pub mod error;
pub mod inference;
pub mod io;
pub mod mcmc;
pub mod metropolis_hastings;
pub mod mmd;
pub mod nn;
pub mod posterior;
pub mod registry;
pub mod simulators;
pub mod slice;
pub mod stats;
pub mod training;

pub use error::{Result, SbiError};
