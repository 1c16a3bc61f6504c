//! Closed sets of named components selectable from [`InferenceConfig`](crate::config::InferenceConfig).

use crate::error::{Result, SbiError};
use crate::mcmc::McmcMethod;
use crate::nn::{ClassifierConfig, MafConfig};

/// Maps selector tokens to component factories.
#[derive(Debug, Clone)]
pub struct Registry<T> {
    kind: &'static str,
    entries: Vec<(&'static str, T)>,
}

impl<T: Clone> Registry<T> {
    pub fn new(kind: &'static str, entries: Vec<(&'static str, T)>) -> Self {
        Self { kind, entries }
    }

    /// Looks up `token`; unknown tokens are a configuration error listing the valid ones.
    pub fn get(&self, token: &str) -> Result<T> {
        self.entries
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| {
                SbiError::Configuration(format!(
                    "unknown {} '{}', expected one of: {}",
                    self.kind,
                    token,
                    self.tokens().join(", ")
                ))
            })
    }

    pub fn tokens(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }
}

pub fn density_estimators() -> Registry<MafConfig> {
    Registry::new(
        "density estimator",
        vec![("maf", MafConfig::new(5)), ("made", MafConfig::new(1))],
    )
}

pub fn classifiers() -> Registry<ClassifierConfig> {
    Registry::new(
        "classifier",
        vec![
            ("resnet", ClassifierConfig::resnet()),
            ("mlp", ClassifierConfig::mlp()),
        ],
    )
}

pub fn mcmc_methods() -> Registry<McmcMethod> {
    Registry::new(
        "MCMC method",
        vec![
            ("slice-np", McmcMethod::Slice),
            ("slice", McmcMethod::Slice),
            ("mh", McmcMethod::MetropolisHastings),
        ],
    )
}
