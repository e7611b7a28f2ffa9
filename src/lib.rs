//! Speaker identification from short speech recordings.
//!
//! Audio files are labeled from their names, summarized into fixed-length
//! acoustic feature vectors, and used to train a multi-layer perceptron that
//! is evaluated on a held-out split.

pub mod audio;
pub mod augment;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod feature;
pub mod feature_extractor;
pub mod metrics;
pub mod mlp;
pub mod speaker;
pub mod spectral;
pub mod sweep;

pub use config::{ExperimentConfig, LoaderConfig, SweepConfig};
pub use dataset::{load_dataset, Dataset};
pub use error::{Error, Result};
pub use metrics::{Evaluation, LabelOrder};
pub use mlp::{MlpClassifier, MlpConfig};
pub use speaker::SpeakerId;
pub use sweep::{GridSearch, SweepResult};

use std::time::Instant;

/// Loads the dataset, trains on the training partition and evaluates on the test partition.
pub fn run_experiment(config: &ExperimentConfig) -> Result<Evaluation<SpeakerId>> {
    let start_time = Instant::now();
    let dataset = load_dataset(&config.loader, log_progress)?;
    tracing::info!(elapsed = ?start_time.elapsed(), "extracted features");

    train_and_evaluate(&dataset, &config.model, config.labels)
}

/// Fits a classifier on `dataset.train` and scores its predictions on `dataset.test`.
pub fn train_and_evaluate(
    dataset: &Dataset,
    model_config: &MlpConfig,
    labels: LabelOrder,
) -> Result<Evaluation<SpeakerId>> {
    let x_train = dataset.x_train()?;
    let y_train = dataset.y_train();
    let x_test = dataset.x_test()?;
    let y_test = dataset.y_test();

    let start_time = Instant::now();
    let model = MlpClassifier::fit(model_config.clone(), x_train.view(), &y_train)?;
    tracing::info!(
        elapsed = ?start_time.elapsed(),
        epochs = model.n_iter(),
        converged = model.converged(),
        "trained classifier"
    );

    let y_pred = model.predict(x_test.view())?;
    let labels = labels.resolve(&SpeakerId::ALL, &y_test, &y_pred);
    Ok(Evaluation::new(&y_test, &y_pred, &labels, y_train.len()))
}

/// Loads the dataset and searches the grid on the training partition only.
pub fn run_sweep(config: &SweepConfig) -> Result<SweepResult> {
    let dataset = load_dataset(&config.loader, log_progress)?;
    let x_train = dataset.x_train()?;
    let search = GridSearch::new(
        config.base.clone(),
        config.grid.clone(),
        config.folds,
        config.jobs,
    );
    search.run(x_train.view(), &dataset.y_train())
}

fn log_progress(progress: f32) {
    tracing::trace!(progress, "loading dataset");
}
