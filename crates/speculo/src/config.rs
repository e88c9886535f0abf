use std::{fmt::Display, path::PathBuf};

use burn::{
    config::Config,
    optim::{AdaGradConfig, AdamConfig, RmsPropConfig, SgdConfig},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::speculo::autoencoder::SpeculoAutoencoderConfig;

#[derive(Serialize, Deserialize, Clone)]
pub enum OptimizerConfig {
    Adam(AdamConfig),
    AdaGrad(AdaGradConfig),
    RmsProp(RmsPropConfig),
    Sgd(SgdConfig),
}

impl Display for OptimizerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OptimizerConfig::Adam(_) => "adam",
            OptimizerConfig::AdaGrad(_) => "adagrad",
            OptimizerConfig::RmsProp(_) => "rmsprop",
            OptimizerConfig::Sgd(_) => "sgd",
        };
        f.write_str(name)
    }
}

impl std::fmt::Debug for OptimizerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OptimizerConfig({self})")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossFunction {
    /// mean squared error
    Mse,
    /// mean absolute error
    Mae,
}

impl Display for LossFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LossFunction::Mse => f.write_str("mse"),
            LossFunction::Mae => f.write_str("mae"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum TrainDataConfig {
    /// Split directory laid out as `Front/` plus one directory per identity, loaded eagerly
    Directory { path: PathBuf },
    /// Prebuilt pair index streamed from disk
    Index { index_file: PathBuf },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ModelProvider {
    Config(SpeculoAutoencoderConfig),
    Checkpoint {
        config_path: PathBuf,
        checkpoint_path: PathBuf,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct EarlyStoppingConfig {
    /// epochs without improvement of the validation loss before stopping
    pub patience: usize,
    pub min_delta: f64,
}

#[derive(Config, Debug)]
pub struct SpeculoConfig {
    #[config(default = "OptimizerConfig::Adam(AdamConfig::new())")]
    pub optimizer: OptimizerConfig,
    #[config(default = "LossFunction::Mse")]
    pub loss_function: LossFunction,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = "ModelProvider::Config(SpeculoAutoencoderConfig::new())")]
    pub model: ModelProvider,
    #[config(default = "TrainDataConfig::Index { index_file: PathBuf::from(\"dataset/face_index.ron\") }")]
    pub train_data: TrainDataConfig,
    #[config(default = "PathBuf::from(\"dataset/test\")")]
    pub validation_dir: PathBuf,
    #[config(default = "PathBuf::from(\"dataset/evaluate\")")]
    pub evaluate_dir: PathBuf,
    #[config(default = "PathBuf::from(\"models\")")]
    pub models_dir: PathBuf,
    #[config(default = "PathBuf::from(\".stop_training\")")]
    pub stop_file: PathBuf,
    #[config(default = 64)]
    pub batch_size: usize,
    #[config(default = 1)]
    pub batches_per_step: usize,
    /// Overrides the epoch count derived from the dataset size.
    pub epochs: Option<usize>,
    #[config(default = 64)]
    pub validation_steps: usize,
    #[config(default = 1)]
    pub snapshot_every: usize,
    pub early_stopping: Option<EarlyStoppingConfig>,
    #[config(default = "true")]
    pub visualize: bool,
    #[config(default = 10)]
    pub preview_samples: usize,
    #[config(default = 42)]
    pub seed: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingError {
    #[error("{0} must be at least 1")]
    NotPositive(&'static str),
}

impl SpeculoConfig {
    /// Rejects settings the training loop cannot run with.
    pub fn check(&self) -> Result<(), SettingError> {
        let counts = [
            ("batch_size", self.batch_size),
            ("batches_per_step", self.batches_per_step),
            ("validation_steps", self.validation_steps),
            ("snapshot_every", self.snapshot_every),
            ("epochs", self.epochs.unwrap_or(1)),
        ];
        match counts.into_iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(SettingError::NotPositive(name)),
            None => Ok(()),
        }
    }

    /// Optimization steps run per epoch over the repeating training stream.
    pub fn steps_per_epoch(&self) -> usize {
        self.batches_per_step * self.batch_size
    }

    /// Epoch count for a training stream of `total_pairs`, never below one.
    pub fn epochs_for(&self, total_pairs: usize) -> usize {
        self.epochs
            .unwrap_or_else(|| total_pairs.checked_div(self.steps_per_epoch()).unwrap_or(0))
            .max(1)
    }
}
