//! Error types organized by pipeline stage.

use std::path::PathBuf;
use thiserror::Error;

/// Pipeline error variants organized by processing stage.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (split ratio, grid, loader options)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Audio loading stage error
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Speaker label parsing error
    #[error(transparent)]
    Label(#[from] LabelError),

    /// Feature extraction stage error
    #[error(transparent)]
    Feature(#[from] FeatureError),

    /// Classifier training or prediction error
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Configuration errors. All of these abort the run before any work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid test size: {0} (must be in the open interval (0, 1))")]
    InvalidTestSize(f64),

    #[error("test size {test_size} of {samples} samples leaves an empty partition")]
    EmptyPartition { test_size: f64, samples: usize },

    #[error("no audio files found in {0}")]
    NoAudioFiles(PathBuf),

    #[error("parameter grid axis `{0}` is empty")]
    EmptyGridAxis(&'static str),

    #[error("invalid alpha: {0} (must be finite and non-negative)")]
    InvalidAlpha(f64),

    #[error("hidden layer width must be positive")]
    InvalidHiddenLayer,

    #[error("max_iter must be positive")]
    InvalidMaxIter,

    #[error("batch size must be positive")]
    InvalidBatchSize,

    #[error("invalid learning rate: {0}")]
    InvalidLearningRate(f64),

    #[error("cannot run {folds}-fold cross-validation on {samples} samples")]
    InvalidFolds { folds: usize, samples: usize },

    #[error("unknown descriptor: {0}")]
    UnknownDescriptor(String),
}

/// Audio loading and validation errors.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("invalid channel count: {0}")]
    InvalidChannels(u16),

    #[error("audio contains no samples: {0}")]
    Empty(PathBuf),

    #[error(transparent)]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),

    #[error(transparent)]
    Resample(#[from] rubato::ResampleError),
}

/// Filename label parsing errors.
#[derive(Debug, Error)]
pub enum LabelError {
    #[error("no speaker field in file name: {0}")]
    MissingField(PathBuf),

    #[error("speaker field `{field}` is not numeric in {path}")]
    InvalidField { path: PathBuf, field: String },

    #[error("speaker {id} is outside the known speaker range in {path}")]
    UnknownSpeaker { path: PathBuf, id: u32 },

    #[error("unrecognized speaker label: {0}")]
    Unrecognized(String),
}

/// Feature extraction errors.
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("frequency band starting at {band_hz}Hz exceeds Nyquist ({nyquist_hz}Hz)")]
    BandExceedsNyquist { band_hz: f32, nyquist_hz: f32 },

    #[error("cannot extract features from an empty signal")]
    EmptySignal,
}

/// Classifier errors.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("got {samples} feature rows but {labels} labels")]
    LengthMismatch { samples: usize, labels: usize },

    #[error("expected {expected} features per sample, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("training data needs at least two classes, found {0}")]
    TooFewClasses(usize),

    #[error("feature vectors have inconsistent lengths")]
    RaggedFeatures,

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

/// Result type alias for speaker-id operations.
pub type Result<T> = std::result::Result<T, Error>;

// Nested From implementations for automatic error conversion chains

// rubato errors → AudioError → Error
impl From<rubato::ResamplerConstructionError> for Error {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        Error::Audio(AudioError::ResamplerConstruction(e))
    }
}

impl From<rubato::ResampleError> for Error {
    fn from(e: rubato::ResampleError) -> Self {
        Error::Audio(AudioError::Resample(e))
    }
}

// ShapeError → ModelError → Error
impl From<ndarray::ShapeError> for Error {
    fn from(e: ndarray::ShapeError) -> Self {
        Error::Model(ModelError::Shape(e))
    }
}
