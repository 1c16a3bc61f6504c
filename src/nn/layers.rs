use burn::module::{Ignored, Param};
use burn::prelude::*;
use rand::rngs::SmallRng;
use rand::Rng;

/// Fully connected layer `x W + b` whose weight matrix may be multiplied by a fixed binary mask.
///
/// Weights are stored as `[d_in, d_out]`; an empty mask means the layer is dense.
/// Dense layers use this type instead of `burn::nn::Linear` so that initialisation draws from the
/// caller's `SmallRng` and not the backend's global RNG.
#[derive(Module, Debug)]
pub struct MaskedLinear<B: Backend> {
    weight: Param<Tensor<B, 2>>,
    bias: Param<Tensor<B, 1>>,
    mask: Ignored<Vec<f32>>,
}

impl<B: Backend> MaskedLinear<B> {
    /// Initialises weights and biases uniformly in `±gain / sqrt(d_in)` from `rng`.
    pub fn new(
        d_in: usize,
        d_out: usize,
        mask: Option<Vec<f32>>,
        gain: f64,
        rng: &mut SmallRng,
        device: &B::Device,
    ) -> Self {
        let bound = gain / (d_in.max(1) as f64).sqrt();
        let mut uniform = |n: usize| -> Vec<f32> {
            (0..n)
                .map(|_| rng.gen_range(-bound..bound) as f32)
                .collect()
        };
        let weight = Tensor::<B, 2>::from_data(TensorData::new(uniform(d_in * d_out), [d_in, d_out]), device);
        let bias = Tensor::<B, 1>::from_data(TensorData::new(uniform(d_out), [d_out]), device);
        if let Some(mask) = &mask {
            debug_assert_eq!(mask.len(), d_in * d_out);
        }
        Self {
            weight: Param::from_tensor(weight),
            bias: Param::from_tensor(bias),
            mask: Ignored(mask.unwrap_or_default()),
        }
    }

    /// Dense layer.
    pub fn dense(d_in: usize, d_out: usize, rng: &mut SmallRng, device: &B::Device) -> Self {
        Self::new(d_in, d_out, None, 1.0, rng, device)
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut weight = self.weight.val();
        if !self.mask.0.is_empty() {
            let mask = Tensor::<B, 2>::from_data(
                TensorData::new(self.mask.0.clone(), weight.dims()),
                &weight.device(),
            );
            weight = weight * mask;
        }
        x.matmul(weight) + self.bias.val().unsqueeze::<2>()
    }
}
