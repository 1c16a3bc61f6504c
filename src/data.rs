//! Training data accumulated across rounds, and observation standardization.

use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::Result;

/// Parameters and observations simulated in one round.
#[derive(Debug, Clone, PartialEq)]
pub struct Round {
    pub theta: Array2<f64>,
    pub x: Array2<f64>,
    /// `true` when the parameters were drawn from the prior rather than a fitted posterior.
    pub from_prior: bool,
}

/// Ordered (parameter, observation) pairs, grouped by the round that produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSet {
    rounds: Vec<Round>,
}

impl TrainingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one round; `theta` and `x` must have the same number of rows.
    pub fn push_round(&mut self, theta: Array2<f64>, x: Array2<f64>, from_prior: bool) {
        debug_assert_eq!(theta.nrows(), x.nrows());
        self.rounds.push(Round {
            theta,
            x,
            from_prior,
        });
    }

    /// Number of stored pairs.
    pub fn len(&self) -> usize {
        self.rounds.iter().map(|r| r.theta.nrows()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored rounds.
    pub fn num_rounds(&self) -> usize {
        self.rounds.len()
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    /// Rounds used for fitting. With `discard_prior_samples` the prior round is skipped once a
    /// later round exists; only the first round of a run samples from the prior.
    fn fitting_rounds(&self, discard_prior_samples: bool) -> impl Iterator<Item = &Round> {
        let skip_prior = discard_prior_samples && self.rounds.len() > 1;
        self.rounds
            .iter()
            .filter(move |round| !(skip_prior && round.from_prior))
    }

    /// Number of pairs in the fitting view.
    pub fn fitting_len(&self, discard_prior_samples: bool) -> usize {
        self.fitting_rounds(discard_prior_samples)
            .map(|r| r.theta.nrows())
            .sum()
    }

    /// Fitting view stacked in round order, with a per-row prior flag.
    pub fn fitting_view(
        &self,
        discard_prior_samples: bool,
    ) -> Result<(Array2<f64>, Array2<f64>, Vec<bool>)> {
        let rounds: Vec<&Round> = self.fitting_rounds(discard_prior_samples).collect();
        let thetas: Vec<ArrayView2<f64>> = rounds.iter().map(|r| r.theta.view()).collect();
        let xs: Vec<ArrayView2<f64>> = rounds.iter().map(|r| r.x.view()).collect();
        let theta = concatenate(Axis(0), &thetas)?;
        let x = concatenate(Axis(0), &xs)?;
        let from_prior = rounds
            .iter()
            .flat_map(|r| std::iter::repeat(r.from_prior).take(r.theta.nrows()))
            .collect();
        Ok((theta, x, from_prior))
    }
}

/// Per-feature affine map `(x - mean) / std`.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardizer {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl Standardizer {
    /// Leaves data unchanged.
    pub fn identity(dim: usize) -> Self {
        Self {
            mean: Array1::zeros(dim),
            std: Array1::ones(dim),
        }
    }

    /// Estimates mean and (unbiased) standard deviation per column. Columns without spread
    /// keep a unit scale.
    pub fn fit(x: &Array2<f64>) -> Self {
        let dim = x.ncols();
        if x.nrows() < 2 {
            return Self::identity(dim);
        }
        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(dim));
        let std = x
            .std_axis(Axis(0), 1.0)
            .mapv(|s| if s > 1e-14 && s.is_finite() { s } else { 1.0 });
        Self { mean, std }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean) / &self.std
    }

    pub fn transform_row(&self, x: ArrayView1<f64>) -> Array1<f64> {
        (&x - &self.mean) / &self.std
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    fn round(n: usize, value: f64) -> (Array2<f64>, Array2<f64>) {
        (Array2::from_elem((n, 2), value), Array2::from_elem((n, 3), value))
    }

    #[test]
    fn grows_by_round_size() {
        let mut set = TrainingSet::new();
        for r in 0..3 {
            let (theta, x) = round(10, r as f64);
            set.push_round(theta, x, r == 0);
        }
        assert_eq!(set.len(), 30);
        assert_eq!(set.num_rounds(), 3);

        let (theta, x, from_prior) = set.fitting_view(false).unwrap();
        assert_eq!(theta.shape(), &[30, 2]);
        assert_eq!(x.shape(), &[30, 3]);
        assert_eq!(from_prior.iter().filter(|p| **p).count(), 10);
        assert_eq!(theta[[25, 0]], 2.0);
    }

    #[test]
    fn discarding_skips_only_the_prior_round() {
        let mut set = TrainingSet::new();
        let (theta, x) = round(10, 0.0);
        set.push_round(theta, x, true);
        assert_eq!(set.fitting_len(true), 10);

        for r in 1..3 {
            let (theta, x) = round(10, r as f64);
            set.push_round(theta, x, false);
        }
        assert_eq!(set.len(), 30);
        assert_eq!(set.fitting_len(true), 20);
        let (theta, _, from_prior) = set.fitting_view(true).unwrap();
        assert_eq!(theta.nrows(), 20);
        assert!(from_prior.iter().all(|p| !p));
        assert_eq!(theta[[0, 0]], 1.0);
    }

    #[test]
    fn standardizer_centers_and_scales() {
        let x = arr2(&[[1.0, 5.0], [3.0, 5.0], [5.0, 5.0]]);
        let s = Standardizer::fit(&x);
        assert_abs_diff_eq!(s.mean, arr1(&[3.0, 5.0]));
        assert_abs_diff_eq!(s.std, arr1(&[2.0, 1.0]));
        let z = s.transform(&x);
        assert_abs_diff_eq!(z.column(0).to_owned(), arr1(&[-1.0, 0.0, 1.0]));
        assert_abs_diff_eq!(s.transform_row(arr1(&[3.0, 6.0]).view()), arr1(&[0.0, 1.0]));
    }
}
