use burn::module::Ignored;
use burn::prelude::*;
use burn::tensor::activation::relu;
use rand::rngs::SmallRng;

use super::layers::MaskedLinear;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    pub hidden_features: usize,
    pub num_blocks: usize,
    /// Adds a skip connection around each block.
    pub residual: bool,
}

impl ClassifierConfig {
    pub fn resnet() -> Self {
        Self {
            hidden_features: 50,
            num_blocks: 2,
            residual: true,
        }
    }

    pub fn mlp() -> Self {
        Self {
            residual: false,
            ..Self::resnet()
        }
    }

    pub fn with_hidden_features(mut self, hidden_features: usize) -> Self {
        self.hidden_features = hidden_features;
        self
    }

    pub fn init<B: Backend>(
        &self,
        theta_features: usize,
        context_features: usize,
        rng: &mut SmallRng,
        device: &B::Device,
    ) -> Classifier<B> {
        let h = self.hidden_features;
        Classifier {
            input: MaskedLinear::dense(theta_features + context_features, h, rng, device),
            blocks: (0..self.num_blocks)
                .map(|_| Block {
                    first: MaskedLinear::dense(h, h, rng, device),
                    second: MaskedLinear::dense(h, h, rng, device),
                })
                .collect(),
            output: MaskedLinear::new(h, 1, None, 0.1, rng, device),
            residual: Ignored(self.residual),
        }
    }
}

#[derive(Module, Debug)]
pub struct Block<B: Backend> {
    first: MaskedLinear<B>,
    second: MaskedLinear<B>,
}

impl<B: Backend> Block<B> {
    fn forward(&self, h: Tensor<B, 2>, residual: bool) -> Tensor<B, 2> {
        let y = self.second.forward(relu(self.first.forward(relu(h.clone()))));
        if residual {
            h + y
        } else {
            y
        }
    }
}

/// Scores `(θ, x)` pairs; the logit approximates `log p(θ, x) / (p(θ) p(x))` up to a function of
/// `x`.
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    input: MaskedLinear<B>,
    blocks: Vec<Block<B>>,
    output: MaskedLinear<B>,
    residual: Ignored<bool>,
}

impl<B: Backend> Classifier<B> {
    /// Logits for each row pair; shape `[n]`.
    pub fn forward(&self, theta: Tensor<B, 2>, context: Tensor<B, 2>) -> Tensor<B, 1> {
        let mut h = self.input.forward(Tensor::cat(vec![theta, context], 1));
        for block in &self.blocks {
            h = block.forward(h, self.residual.0);
        }
        self.output.forward(relu(h)).squeeze(1)
    }
}
