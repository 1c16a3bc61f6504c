//! Conditional masked autoregressive flow.
//!
//! Each transform is a MADE block mapping `u` to `u * scale(u_<i, c) + shift(u_<i, c)`, where the
//! shift and scale of dimension `i` depend only on earlier dimensions and the context `c`. Blocks
//! are separated by a reversal of the feature order and the base distribution is a standard
//! normal.

use std::f64::consts::PI;

use burn::module::Ignored;
use burn::prelude::*;
use burn::tensor::activation::relu;
use ndarray::ArrayView1;
use rand::rngs::SmallRng;
use rand::Rng;
use rand_distr::StandardNormal;

use super::layers::MaskedLinear;
use super::{repeat_row, softplus};

/// `softplus(SOFTPLUS_SHIFT) == 1`, so a zero network output is an identity transform.
const SOFTPLUS_SHIFT: f64 = 0.541_324_854_612_918_1;
const MIN_SCALE: f64 = 1e-3;
const OUTPUT_GAIN: f64 = 1e-2;

#[derive(Debug, Clone, PartialEq)]
pub struct MafConfig {
    pub num_transforms: usize,
    pub hidden_features: usize,
}

impl MafConfig {
    pub fn new(num_transforms: usize) -> Self {
        Self {
            num_transforms,
            hidden_features: 50,
        }
    }

    pub fn with_hidden_features(mut self, hidden_features: usize) -> Self {
        self.hidden_features = hidden_features;
        self
    }

    pub fn init<B: Backend>(
        &self,
        features: usize,
        context_features: usize,
        rng: &mut SmallRng,
        device: &B::Device,
    ) -> Maf<B> {
        let blocks = (0..self.num_transforms.max(1))
            .map(|_| MadeBlock::new(features, context_features, self.hidden_features, rng, device))
            .collect();
        Maf {
            blocks,
            features: Ignored(features),
        }
    }
}

/// Autoregressive masks for a MADE with one hidden degree assignment shared by both hidden
/// layers. Returned as row-major `[d_in, d_out]` weight masks.
fn made_masks(features: usize, hidden: usize) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
    let input_degrees: Vec<usize> = (1..=features).collect();
    let max_degree = features.saturating_sub(1).max(1);
    let min_degree = features.saturating_sub(1).min(1);
    let hidden_degrees: Vec<usize> = (0..hidden).map(|k| k % max_degree + min_degree).collect();
    let output_degrees: Vec<usize> = (0..2 * features).map(|o| input_degrees[o % features]).collect();

    let mask = |from: &[usize], to: &[usize], keep: fn(usize, usize) -> bool| -> Vec<f32> {
        from.iter()
            .flat_map(|&f| to.iter().map(move |&t| if keep(f, t) { 1.0 } else { 0.0 }))
            .collect()
    };
    (
        mask(&input_degrees, &hidden_degrees, |f, t| t >= f),
        mask(&hidden_degrees, &hidden_degrees, |f, t| t >= f),
        mask(&hidden_degrees, &output_degrees, |f, t| t > f),
    )
}

#[derive(Module, Debug)]
pub struct MadeBlock<B: Backend> {
    input: MaskedLinear<B>,
    context: MaskedLinear<B>,
    hidden: MaskedLinear<B>,
    output: MaskedLinear<B>,
    features: Ignored<usize>,
}

impl<B: Backend> MadeBlock<B> {
    fn new(
        features: usize,
        context_features: usize,
        hidden_features: usize,
        rng: &mut SmallRng,
        device: &B::Device,
    ) -> Self {
        let (m_in, m_hidden, m_out) = made_masks(features, hidden_features);
        Self {
            input: MaskedLinear::new(features, hidden_features, Some(m_in), 1.0, rng, device),
            context: MaskedLinear::dense(context_features, hidden_features, rng, device),
            hidden: MaskedLinear::new(hidden_features, hidden_features, Some(m_hidden), 1.0, rng, device),
            output: MaskedLinear::new(
                hidden_features,
                2 * features,
                Some(m_out),
                OUTPUT_GAIN,
                rng,
                device,
            ),
            features: Ignored(features),
        }
    }

    /// Returns `(shift, scale)`, both `[n, features]`.
    fn forward(&self, u: Tensor<B, 2>, context: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let d = self.features.0;
        let h = relu(self.input.forward(u) + self.context.forward(context));
        let h = relu(self.hidden.forward(h));
        let out = self.output.forward(h);
        let shift = out.clone().narrow(1, 0, d);
        let scale = softplus(out.narrow(1, d, d).add_scalar(SOFTPLUS_SHIFT)).add_scalar(MIN_SCALE);
        (shift, scale)
    }

    /// Solves `y = u * scale(u) + shift(u)` for `u`, one dimension per pass.
    fn inverse(&self, y: Tensor<B, 2>, context: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut u = y.zeros_like();
        for _ in 0..self.features.0 {
            let (shift, scale) = self.forward(u, context.clone());
            u = (y.clone() - shift) / scale;
        }
        u
    }
}

#[derive(Module, Debug)]
pub struct Maf<B: Backend> {
    blocks: Vec<MadeBlock<B>>,
    features: Ignored<usize>,
}

impl<B: Backend> Maf<B> {
    pub fn features(&self) -> usize {
        self.features.0
    }

    /// Log-density of each row of `theta` given the matching row of `context`; shape `[n]`.
    pub fn log_prob(&self, theta: Tensor<B, 2>, context: Tensor<B, 2>) -> Tensor<B, 1> {
        let [n, d] = theta.dims();
        let device = theta.device();
        let last = self.blocks.len() - 1;

        let mut u = theta;
        let mut log_det = Tensor::<B, 1>::zeros([n], &device);
        for (i, block) in self.blocks.iter().enumerate() {
            let (shift, scale) = block.forward(u.clone(), context.clone());
            log_det = log_det + scale.clone().log().sum_dim(1).squeeze(1);
            u = u * scale + shift;
            if i < last {
                u = u.flip([1]);
            }
        }
        let base = u
            .powf_scalar(2.0)
            .sum_dim(1)
            .squeeze::<1>(1)
            .mul_scalar(-0.5)
            .sub_scalar(0.5 * d as f64 * (2.0 * PI).ln());
        base + log_det
    }

    /// Draws `n` samples conditioned on a single context vector; shape `[n, features]`.
    pub fn sample(
        &self,
        n: usize,
        context: ArrayView1<f64>,
        rng: &mut SmallRng,
        device: &B::Device,
    ) -> Tensor<B, 2> {
        let d = self.features.0;
        let noise: Vec<f32> = (0..n * d).map(|_| rng.sample(StandardNormal)).collect();
        let context = repeat_row::<B>(context, n, device);

        let mut x = Tensor::<B, 2>::from_data(TensorData::new(noise, [n, d]), device);
        for (i, block) in self.blocks.iter().enumerate().rev() {
            x = block.inverse(x, context.clone());
            if i > 0 {
                x = x.flip([1]);
            }
        }
        x
    }
}
