/*!
# Training loop

Mini-batch Adam with a held-out validation split and early stopping, shared by every estimator.
The caller supplies the loss as a closure over the model and the indices of a batch, so the same
loop trains flows by maximum likelihood, flows with the atomic loss, and ratio classifiers.

The weights with the lowest validation loss are returned, not the last ones.
*/

use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::cast::ToElement;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;

use crate::config::TrainingConfig;
use crate::error::{Result, SbiError};

/// Outcome of [`fit`] besides the trained model.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub epochs: usize,
    pub best_validation_loss: f64,
}

/// Trains `model` on `num_examples` examples addressed by index.
///
/// `loss_fn(model, batch, rng)` returns the mean loss over `batch` as a one-element tensor.
pub fn fit<B, M, F>(
    model: M,
    num_examples: usize,
    config: &TrainingConfig,
    show_progress: bool,
    rng: &mut SmallRng,
    mut loss_fn: F,
) -> Result<(M, TrainingSummary)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    F: FnMut(&M, &[usize], &mut SmallRng) -> Tensor<B, 1>,
{
    if num_examples < 2 {
        return Err(SbiError::EstimatorFit(format!(
            "need at least 2 training examples, got {num_examples}"
        )));
    }
    let num_validation = ((num_examples as f64 * config.validation_fraction).round() as usize)
        .clamp(1, num_examples - 1);
    let mut indices: Vec<usize> = (0..num_examples).collect();
    indices.shuffle(rng);
    let (validation, train) = indices.split_at(num_validation);
    let validation = validation.to_vec();
    let mut train = train.to_vec();

    let mut optim = AdamConfig::new()
        .with_grad_clipping(config.clip_max_norm.map(GradientClippingConfig::Norm))
        .init::<B, M>();

    let pb = if show_progress {
        let pb = ProgressBar::new(config.max_num_epochs as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:8} {bar:40.cyan/blue} {pos}/{len} epochs {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.set_prefix("Training");
        pb
    } else {
        ProgressBar::hidden()
    };

    let mut model = model;
    let mut best_model = model.clone();
    let mut best_loss = f64::INFINITY;
    let mut epochs_since_improvement = 0;
    let mut epochs = 0;

    while epochs < config.max_num_epochs && epochs_since_improvement < config.stop_after_epochs {
        train.shuffle(rng);
        let mut train_loss = 0.0;
        for batch in train.chunks(config.batch_size) {
            let loss = loss_fn(&model, batch, rng);
            let value = loss.clone().into_scalar().to_f64();
            if !value.is_finite() {
                return Err(SbiError::EstimatorFit(format!(
                    "training loss became {value} in epoch {epochs}"
                )));
            }
            train_loss += value * batch.len() as f64;
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(config.learning_rate, model, grads);
        }
        train_loss /= train.len() as f64;

        let mut validation_loss = 0.0;
        for batch in validation.chunks(config.batch_size) {
            let value = loss_fn(&model, batch, rng).into_scalar().to_f64();
            validation_loss += value * batch.len() as f64;
        }
        validation_loss /= validation.len() as f64;
        epochs += 1;

        if validation_loss < best_loss {
            best_loss = validation_loss;
            best_model = model.clone();
            epochs_since_improvement = 0;
        } else {
            epochs_since_improvement += 1;
        }
        log::debug!("epoch {epochs}: train loss {train_loss:.4}, validation loss {validation_loss:.4}");
        pb.set_message(format!("validation loss {validation_loss:.4}"));
        pb.inc(1);
    }
    pb.finish_and_clear();

    if !best_loss.is_finite() {
        return Err(SbiError::EstimatorFit(
            "validation loss never became finite".into(),
        ));
    }
    log::debug!("training stopped after {epochs} epochs, best validation loss {best_loss:.4}");
    Ok((
        best_model,
        TrainingSummary {
            epochs,
            best_validation_loss: best_loss,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{rows_to_tensor, MaskedLinear};
    use approx::assert_abs_diff_eq;
    use burn::backend::{Autodiff, NdArray};
    use ndarray::Array2;
    use rand::{Rng, SeedableRng};

    type B = Autodiff<NdArray>;

    #[test]
    fn fits_a_linear_regression() {
        let device = Default::default();
        let mut rng = SmallRng::seed_from_u64(0);
        let x = Array2::from_shape_fn((200, 1), |_| rng.gen_range(-1.0..1.0));
        let y = x.mapv(|v| 3.0 * v - 1.0);

        let model = MaskedLinear::<B>::dense(1, 1, &mut rng, &device);
        let config = TrainingConfig::default()
            .with_learning_rate(0.02)
            .with_batch_size(20)
            .with_max_num_epochs(300);
        let (model, summary) = fit(model, 200, &config, false, &mut rng, |m, batch, _| {
            let pred = m.forward(rows_to_tensor(&x, batch, &device));
            let target = rows_to_tensor(&y, batch, &device);
            (pred - target).powf_scalar(2.0).mean()
        })
        .unwrap();

        assert!(summary.epochs <= 300);
        assert!(summary.best_validation_loss < 1e-2, "{summary:?}");
        let probe = Tensor::<B, 2>::from_floats([[0.5]], &device);
        let out = model.forward(probe).into_scalar().to_f64();
        assert_abs_diff_eq!(out, 0.5, epsilon = 0.1);
    }

    #[test]
    fn too_few_examples() {
        let device = Default::default();
        let mut rng = SmallRng::seed_from_u64(0);
        let model = MaskedLinear::<B>::dense(1, 1, &mut rng, &device);
        let result = fit(model, 1, &TrainingConfig::default(), false, &mut rng, |m, _, _| {
            m.forward(Tensor::<B, 2>::zeros([1, 1], &device)).mean()
        });
        assert!(matches!(result, Err(SbiError::EstimatorFit(_))));
    }

    #[test]
    fn non_finite_loss_is_an_error() {
        let device = Default::default();
        let mut rng = SmallRng::seed_from_u64(0);
        let model = MaskedLinear::<B>::dense(1, 1, &mut rng, &device);
        let result = fit(model, 10, &TrainingConfig::default(), false, &mut rng, |m, _, _| {
            m.forward(Tensor::<B, 2>::zeros([1, 1], &device)).mean().div_scalar(0.0)
        });
        assert!(matches!(result, Err(SbiError::EstimatorFit(_))));
    }
}
