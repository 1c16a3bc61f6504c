/*!
# Inference configuration

[`InferenceConfig`] collects every knob of the APT and SRE engines. It is a plain struct with
defaults and consuming builder methods; selector strings are resolved through the closed
registries in [`crate::registry`] when the engine is constructed.

```rust
use sbi::config::{Atoms, InferenceConfig};

let config = InferenceConfig::default()
    .with_num_atoms(Atoms::Count(10))
    .with_density_estimator("made")
    .set_seed(42);
assert!(config.validate().is_ok());
```
*/

use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, ArrayView1};

use crate::error::{Result, SbiError};
use crate::registry;

/// Number of contrastive atoms per example.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Atoms {
    /// Every parameter in the mini-batch.
    All,
    /// A fixed number of atoms, clamped to the batch size.
    Count(usize),
}

impl Atoms {
    /// Maps the numeric convention where `-1` means the whole batch.
    pub fn from_count(n: i64) -> Result<Self> {
        match n {
            -1 => Ok(Atoms::All),
            n if n >= 2 => Ok(Atoms::Count(n as usize)),
            n => Err(SbiError::Configuration(format!(
                "num_atoms must be -1 or at least 2, got {n}"
            ))),
        }
    }

    /// Atoms used for a batch of `batch_size` examples.
    pub fn resolve(&self, batch_size: usize) -> usize {
        match self {
            Atoms::All => batch_size,
            Atoms::Count(n) => (*n).min(batch_size),
        }
    }
}

/// Fixed feature map applied to every observation before it reaches the estimator.
#[derive(Clone)]
pub struct SummaryNet {
    output_dim: usize,
    map: Arc<dyn Fn(ArrayView1<f64>) -> Array1<f64> + Send + Sync>,
}

impl SummaryNet {
    pub fn new<F>(output_dim: usize, map: F) -> Self
    where
        F: Fn(ArrayView1<f64>) -> Array1<f64> + Send + Sync + 'static,
    {
        Self {
            output_dim,
            map: Arc::new(map),
        }
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn apply(&self, x: ArrayView1<f64>) -> Result<Array1<f64>> {
        let y = (self.map)(x);
        if y.len() != self.output_dim {
            return Err(SbiError::Configuration(format!(
                "summary net produced {} features, expected {}",
                y.len(),
                self.output_dim
            )));
        }
        Ok(y)
    }
}

impl fmt::Debug for SummaryNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummaryNet")
            .field("output_dim", &self.output_dim)
            .finish_non_exhaustive()
    }
}

/// Mini-batch optimisation settings shared by all estimators.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub learning_rate: f64,
    pub validation_fraction: f64,
    /// Stop after this many epochs without a better validation loss.
    pub stop_after_epochs: usize,
    pub max_num_epochs: usize,
    /// Clip the global gradient norm to this value.
    pub clip_max_norm: Option<f32>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            learning_rate: 5e-4,
            validation_fraction: 0.1,
            stop_after_epochs: 20,
            max_num_epochs: 1000,
            clip_max_norm: None,
        }
    }
}

impl TrainingConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_stop_after_epochs(mut self, epochs: usize) -> Self {
        self.stop_after_epochs = epochs;
        self
    }

    pub fn with_max_num_epochs(mut self, epochs: usize) -> Self {
        self.max_num_epochs = epochs;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SbiError::Configuration("batch_size must be positive".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(SbiError::Configuration(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(SbiError::Configuration(format!(
                "validation_fraction must lie in (0, 1), got {}",
                self.validation_fraction
            )));
        }
        if self.max_num_epochs == 0 {
            return Err(SbiError::Configuration("max_num_epochs must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct McmcConfig {
    pub num_chains: usize,
    pub warmup_steps: usize,
    pub thin: usize,
    /// Initial slice bracket width, or the random-walk step size for Metropolis–Hastings.
    pub init_width: f64,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            num_chains: 4,
            warmup_steps: 100,
            thin: 1,
            init_width: 1.0,
        }
    }
}

impl McmcConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_chains == 0 || self.thin == 0 {
            return Err(SbiError::Configuration(
                "num_chains and thin must be positive".into(),
            ));
        }
        if !(self.init_width > 0.0 && self.init_width.is_finite()) {
            return Err(SbiError::Configuration(format!(
                "init_width must be positive, got {}",
                self.init_width
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub num_atoms: Atoms,
    /// `"maf"` or `"made"`.
    pub density_estimator: String,
    /// `"resnet"` or `"mlp"`.
    pub classifier: String,
    /// Standardize (embedded) observations with statistics of the training set.
    pub z_score_obs: bool,
    /// Add the maximum-likelihood loss on prior samples to the atomic loss.
    pub use_combined_loss: bool,
    /// Sample the flow posterior with MCMC instead of directly.
    pub train_with_mcmc: bool,
    /// `"slice-np"`, `"slice"` or `"mh"`.
    pub mcmc_method: String,
    pub summary_net: Option<SummaryNet>,
    /// Re-initialise network weights every round; the training set is always kept.
    pub retrain_from_scratch_each_round: bool,
    /// Exclude the first round (the only one drawn from the prior) from fitting once a later
    /// round exists. The rows stay in the training set.
    pub discard_prior_samples: bool,
    pub seed: Option<u64>,
    pub training: TrainingConfig,
    pub mcmc: McmcConfig,
    pub show_progress: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            num_atoms: Atoms::All,
            density_estimator: "maf".into(),
            classifier: "resnet".into(),
            z_score_obs: true,
            use_combined_loss: false,
            train_with_mcmc: false,
            mcmc_method: "slice-np".into(),
            summary_net: None,
            retrain_from_scratch_each_round: false,
            discard_prior_samples: false,
            seed: None,
            training: TrainingConfig::default(),
            mcmc: McmcConfig::default(),
            show_progress: false,
        }
    }
}

impl InferenceConfig {
    /// Defaults for ratio estimation: binary classification of joint against shuffled pairs.
    pub fn sre() -> Self {
        Self {
            num_atoms: Atoms::Count(2),
            ..Self::default()
        }
    }

    pub fn with_num_atoms(mut self, num_atoms: Atoms) -> Self {
        self.num_atoms = num_atoms;
        self
    }

    pub fn with_density_estimator(mut self, name: &str) -> Self {
        self.density_estimator = name.to_string();
        self
    }

    pub fn with_classifier(mut self, name: &str) -> Self {
        self.classifier = name.to_string();
        self
    }

    pub fn with_z_score_obs(mut self, z_score_obs: bool) -> Self {
        self.z_score_obs = z_score_obs;
        self
    }

    pub fn with_use_combined_loss(mut self, use_combined_loss: bool) -> Self {
        self.use_combined_loss = use_combined_loss;
        self
    }

    pub fn with_train_with_mcmc(mut self, train_with_mcmc: bool) -> Self {
        self.train_with_mcmc = train_with_mcmc;
        self
    }

    pub fn with_mcmc_method(mut self, name: &str) -> Self {
        self.mcmc_method = name.to_string();
        self
    }

    pub fn with_summary_net(mut self, summary_net: SummaryNet) -> Self {
        self.summary_net = Some(summary_net);
        self
    }

    pub fn with_retrain_from_scratch_each_round(mut self, retrain: bool) -> Self {
        self.retrain_from_scratch_each_round = retrain;
        self
    }

    pub fn with_discard_prior_samples(mut self, discard: bool) -> Self {
        self.discard_prior_samples = discard;
        self
    }

    pub fn with_training(mut self, training: TrainingConfig) -> Self {
        self.training = training;
        self
    }

    pub fn with_mcmc(mut self, mcmc: McmcConfig) -> Self {
        self.mcmc = mcmc;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Checks selector strings against the registries and numeric settings for range.
    pub fn validate(&self) -> Result<()> {
        if let Atoms::Count(n) = self.num_atoms {
            if n < 2 {
                return Err(SbiError::Configuration(format!(
                    "num_atoms must be at least 2, got {n}"
                )));
            }
        }
        registry::density_estimators().get(&self.density_estimator)?;
        registry::classifiers().get(&self.classifier)?;
        registry::mcmc_methods().get(&self.mcmc_method)?;
        if let Some(net) = &self.summary_net {
            if net.output_dim() == 0 {
                return Err(SbiError::Configuration(
                    "summary net must produce at least one feature".into(),
                ));
            }
        }
        self.training.validate()?;
        self.mcmc.validate()
    }
}
