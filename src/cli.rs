//! CLI argument definitions using clap.

use crate::config::{
    ExperimentConfig, LoaderConfig, OnError, SweepConfig, DEFAULT_FOLDS, DEFAULT_SEED,
    DEFAULT_TEST_SIZE,
};
use crate::error::{ConfigError, Error};
use crate::feature_extractor::{self, DescriptorSet, FeatureExtractor};
use crate::metrics::{Evaluation, LabelOrder};
use crate::mlp::LearningRate;
use crate::speaker::SpeakerId;
use crate::sweep::SweepResult;
use clap::{Parser, Subcommand};
use color_eyre::Section;
use eyre::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "speaker-id")]
#[command(about = "Speaker identification from labeled speech recordings")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Train on a split of the dataset and report test accuracy
    Train(TrainArgs),

    /// Cross-validate a hyperparameter grid on the training split
    Sweep(SweepArgs),

    /// Print the feature vector of a single audio file
    Features(FeaturesArgs),
}

/// Options shared by every command that loads a dataset.
#[derive(clap::Args, Debug)]
pub struct DatasetArgs {
    /// Directory containing Actor_NN folders of WAV recordings
    pub data_dir: PathBuf,

    /// Fraction of files held out for testing
    #[arg(long, default_value_t = DEFAULT_TEST_SIZE)]
    pub test_size: f64,

    /// Seed for the train/test shuffle
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Resample every file to this rate in Hz (0 keeps each file's own rate)
    #[arg(long, default_value_t = 0)]
    pub sample_rate: u32,

    /// What to do with files that cannot be labeled or decoded
    #[arg(long, value_enum, default_value_t = OnError::Fail)]
    pub on_error: OnError,

    /// Add time-stretched, pitch-shifted and noisy copies of training files
    #[arg(long)]
    pub augment: bool,
}

impl TryFrom<DatasetArgs> for LoaderConfig {
    type Error = eyre::Error;

    fn try_from(args: DatasetArgs) -> Result<Self> {
        let config = Self {
            test_size: args.test_size,
            seed: args.seed,
            sample_rate: (args.sample_rate > 0).then_some(args.sample_rate),
            on_error: args.on_error,
            augment: args.augment,
            ..Self::new(args.data_dir)
        };
        config.validate()?;
        Ok(config)
    }
}

/// CLI arguments for a single train/evaluate run.
#[derive(clap::Args, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Confusion matrix axes: every speaker, or only those observed
    #[arg(long, value_enum, default_value_t = LabelOrder::Fixed)]
    pub labels: LabelOrder,

    /// Hidden layer widths, comma separated
    #[arg(long, value_delimiter = ',')]
    pub hidden: Option<Vec<usize>>,

    /// L2 penalty strength
    #[arg(long)]
    pub alpha: Option<f64>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub max_iter: Option<usize>,

    #[arg(long, value_enum)]
    pub learning_rate: Option<LearningRate>,

    /// Print the evaluation as JSON
    #[arg(long)]
    pub json: bool,
}

impl TryFrom<TrainArgs> for ExperimentConfig {
    type Error = eyre::Error;

    fn try_from(args: TrainArgs) -> Result<Self> {
        let mut config = Self::new(args.dataset.try_into()?);
        config.labels = args.labels;

        let model = &mut config.model;
        if let Some(hidden) = args.hidden {
            model.hidden_layer_sizes = hidden;
        }
        if let Some(alpha) = args.alpha {
            model.alpha = alpha;
        }
        if let Some(batch_size) = args.batch_size {
            model.batch_size = batch_size;
        }
        if let Some(max_iter) = args.max_iter {
            model.max_iter = max_iter;
        }
        if let Some(learning_rate) = args.learning_rate {
            model.learning_rate = learning_rate;
        }
        model.validate()?;

        Ok(config)
    }
}

/// CLI arguments for the hyperparameter sweep.
#[derive(clap::Args, Debug)]
pub struct SweepArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// Cross-validation folds
    #[arg(long, default_value_t = DEFAULT_FOLDS)]
    pub folds: usize,

    /// Worker threads (default: number of CPUs)
    #[arg(long)]
    pub jobs: Option<usize>,

    /// Print every candidate's scores as JSON
    #[arg(long)]
    pub json: bool,
}

impl TryFrom<SweepArgs> for SweepConfig {
    type Error = eyre::Error;

    fn try_from(args: SweepArgs) -> Result<Self> {
        if args.folds < 2 {
            return Err(ConfigError::InvalidFolds {
                folds: args.folds,
                samples: 0,
            }
            .into());
        }
        let mut config = Self::new(args.dataset.try_into()?);
        config.folds = args.folds;
        config.jobs = args.jobs.filter(|&jobs| jobs > 0);
        config.grid.validate()?;
        Ok(config)
    }
}

/// CLI arguments for printing one file's features.
#[derive(clap::Args, Debug)]
pub struct FeaturesArgs {
    /// Path to a WAV file
    pub file: PathBuf,

    /// Descriptors to compute, comma separated, or "all"
    #[arg(long, default_value = "all")]
    pub descriptors: DescriptorSet,

    /// Resample to this rate in Hz (0 keeps the file's own rate)
    #[arg(long, default_value_t = 0)]
    pub sample_rate: u32,
}

#[derive(Serialize)]
struct TrainReport<'a> {
    config: &'a ExperimentConfig,
    evaluation: &'a Evaluation<SpeakerId>,
}

#[derive(Serialize)]
struct SweepReport<'a> {
    config: &'a SweepConfig,
    result: &'a SweepResult,
}

/// Execute CLI command - separated for testing.
pub fn run_cli(cli: Cli) -> Result<()> {
    tracing::debug!(?cli, "parsed arguments");

    match cli.command {
        Commands::Train(args) => {
            let json = args.json;
            train(args.try_into()?, json)
        }
        Commands::Sweep(args) => {
            let json = args.json;
            sweep(args.try_into()?, json)
        }
        Commands::Features(args) => features(args),
    }
}

fn train(config: ExperimentConfig, json: bool) -> Result<()> {
    let evaluation = crate::run_experiment(&config).map_err(with_suggestion)?;

    if json {
        let report = TrainReport {
            config: &config,
            evaluation: &evaluation,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Accuracy: {:.5}%", evaluation.accuracy * 100.0);
    println!();
    println!("{}", evaluation.confusion);
    println!("{}", evaluation.report);
    Ok(())
}

fn sweep(config: SweepConfig, json: bool) -> Result<()> {
    let result = crate::run_sweep(&config).map_err(with_suggestion)?;

    if json {
        let report = SweepReport {
            config: &config,
            result: &result,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Best: {} using {}", result.best_score, result.best);
    Ok(())
}

fn features(args: FeaturesArgs) -> Result<()> {
    let extractor = FeatureExtractor::new((args.sample_rate > 0).then_some(args.sample_rate));
    let vector = extractor
        .extract_file(&args.file, &args.descriptors)
        .wrap_err_with(|| format!("failed to extract features: {}", args.file.display()))?;

    for (descriptor, mean) in feature_extractor::summarize(&vector, &args.descriptors) {
        tracing::info!(%descriptor, mean, "descriptor summary");
    }

    let values: Vec<String> = vector.as_slice().iter().map(|v| v.to_string()).collect();
    println!("{}", values.join(" "));
    Ok(())
}

fn with_suggestion(e: Error) -> eyre::Report {
    let suggestion = match &e {
        Error::Config(ConfigError::NoAudioFiles(_)) => {
            Some("point DATA_DIR at the folder containing the Actor_NN directories")
        }
        Error::Label(_) | Error::Audio(_) => Some("pass --on-error skip to leave bad files out"),
        Error::Config(ConfigError::EmptyPartition { .. }) => {
            Some("add more recordings or adjust --test-size")
        }
        _ => None,
    };
    let report = eyre::Report::new(e);
    match suggestion {
        Some(suggestion) => report.suggestion(suggestion),
        None => report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_train_defaults() {
        let cli = Cli::parse_from(["speaker-id", "train", "data"]);

        match cli.command {
            Commands::Train(args) => {
                assert!(!args.json);
                let config = ExperimentConfig::try_from(args).unwrap();
                assert_eq!(config.loader.root, PathBuf::from("data"));
                assert_eq!(config.loader.test_size, 0.25);
                assert_eq!(config.loader.seed, 9);
                assert_eq!(config.loader.sample_rate, None);
                assert_eq!(config.labels, LabelOrder::Fixed);
                assert_eq!(config.model.hidden_layer_sizes, vec![300]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_model_overrides() {
        let cli = Cli::parse_from([
            "speaker-id",
            "train",
            "data",
            "--hidden",
            "64,32",
            "--alpha",
            "0.5",
            "--learning-rate",
            "constant",
            "--labels",
            "observed",
            "--on-error",
            "skip",
            "--sample-rate",
            "16000",
        ]);

        let Commands::Train(args) = cli.command else {
            panic!("expected train command");
        };
        let config = ExperimentConfig::try_from(args).unwrap();
        assert_eq!(config.model.hidden_layer_sizes, vec![64, 32]);
        assert_eq!(config.model.alpha, 0.5);
        assert_eq!(config.model.learning_rate, LearningRate::Constant);
        assert_eq!(config.labels, LabelOrder::Observed);
        assert_eq!(config.loader.on_error, OnError::Skip);
        assert_eq!(config.loader.sample_rate, Some(16000));
    }

    #[test]
    fn rejects_invalid_values() {
        let cli = Cli::parse_from(["speaker-id", "train", "data", "--test-size", "1.5"]);
        let Commands::Train(args) = cli.command else {
            panic!("expected train command");
        };
        assert!(ExperimentConfig::try_from(args).is_err());

        let cli = Cli::parse_from(["speaker-id", "sweep", "data", "--folds", "1"]);
        let Commands::Sweep(args) = cli.command else {
            panic!("expected sweep command");
        };
        assert!(SweepConfig::try_from(args).is_err());
    }

    #[test]
    fn parses_sweep() {
        let cli = Cli::parse_from(["speaker-id", "sweep", "data", "--jobs", "2", "--json"]);
        let Commands::Sweep(args) = cli.command else {
            panic!("expected sweep command");
        };
        assert!(args.json);
        let config = SweepConfig::try_from(args).unwrap();
        assert_eq!(config.folds, 3);
        assert_eq!(config.jobs, Some(2));
        assert_eq!(config.grid.candidates().len(), 54);
    }

    #[test]
    fn parses_descriptor_list() {
        let cli = Cli::parse_from(["speaker-id", "features", "a.wav", "--descriptors", "mfcc,zcr"]);
        let Commands::Features(args) = cli.command else {
            panic!("expected features command");
        };
        assert_eq!(args.descriptors.dimensions(), 41);
    }
}
