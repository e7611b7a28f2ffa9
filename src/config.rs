//! Resolved configuration for loading, training and sweeping.
//!
//! Defaults reproduce the reference experiment: a 25% held-out split with
//! seed 9, all descriptors computed at each file's native sample rate, and a
//! single 300-unit hidden layer.

use crate::error::{ConfigError, Result};
use crate::feature_extractor::DescriptorSet;
use crate::metrics::LabelOrder;
use crate::mlp::MlpConfig;
use crate::sweep::ParamGrid;
use serde::Serialize;
use std::path::PathBuf;

pub const DEFAULT_TEST_SIZE: f64 = 0.25;
pub const DEFAULT_SEED: u64 = 9;
pub const DEFAULT_FOLDS: usize = 3;

/// What the loader does when a file cannot be labeled or decoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Abort the whole load on the first bad file
    #[default]
    Fail,
    /// Log the file and continue without it
    Skip,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoaderConfig {
    pub root: PathBuf,
    pub test_size: f64,
    pub seed: u64,
    /// Resample target; `None` analyzes each file at its own rate
    pub sample_rate: Option<u32>,
    pub descriptors: DescriptorSet,
    pub on_error: OnError,
    /// Append augmented copies of training files to the training partition
    pub augment: bool,
}

impl LoaderConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            test_size: DEFAULT_TEST_SIZE,
            seed: DEFAULT_SEED,
            sample_rate: None,
            descriptors: DescriptorSet::all(),
            on_error: OnError::Fail,
            augment: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(ConfigError::InvalidTestSize(self.test_size).into());
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ExperimentConfig {
    pub loader: LoaderConfig,
    pub model: MlpConfig,
    pub labels: LabelOrder,
}

impl ExperimentConfig {
    pub fn new(loader: LoaderConfig) -> Self {
        Self {
            loader,
            model: MlpConfig::default(),
            labels: LabelOrder::Fixed,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SweepConfig {
    pub loader: LoaderConfig,
    /// Settings shared by every candidate; grid values override them
    pub base: MlpConfig,
    pub grid: ParamGrid,
    pub folds: usize,
    /// Worker threads; defaults to the number of CPUs
    pub jobs: Option<usize>,
}

impl SweepConfig {
    pub fn new(loader: LoaderConfig) -> Self {
        Self {
            loader,
            base: MlpConfig::sweep_base(),
            grid: ParamGrid::default(),
            folds: DEFAULT_FOLDS,
            jobs: None,
        }
    }
}
