//! Labeled dataset loading and the train/test split.

use crate::audio::{load_audio, DEFAULT_SAMPLE_RATE};
use crate::augment::Augmentor;
use crate::config::{LoaderConfig, OnError};
use crate::error::{ConfigError, Error, ModelError, Result};
use crate::feature::LabeledExample;
use crate::feature_extractor::{DescriptorSet, FeatureExtractor};
use crate::speaker::{SpeakerId, ACTOR_DIR_PREFIX};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SUPPORTED_EXTENSIONS: [&str; 1] = ["wav"];

/// Audio files directly inside the `Actor_*` directories of `root`, sorted by path.
pub fn discover_audio_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|d| d.ok())
        .filter(|d| d.file_type().is_file())
        .map(|d| d.into_path())
        .filter(|path| {
            path.parent()
                .and_then(|dir| dir.file_name())
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(ACTOR_DIR_PREFIX))
        })
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| {
                    SUPPORTED_EXTENSIONS
                        .iter()
                        .any(|supported| ext.eq_ignore_ascii_case(supported))
                })
                .unwrap_or(false)
        })
        .collect();

    if files.is_empty() {
        return Err(ConfigError::NoAudioFiles(root.to_path_buf()).into());
    }
    files.sort();

    tracing::info!(root = %root.display(), count = files.len(), "discovered audio files");
    Ok(files)
}

/// Result of loading one file.
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: Result<LabeledExample>,
}

#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct LoadSummary {
    pub loaded: usize,
    pub skipped: usize,
    pub augmented: usize,
}

/// Labels and extracts a single file.
pub fn load_file(
    path: &Path,
    extractor: &FeatureExtractor,
    descriptors: &DescriptorSet,
) -> Result<LabeledExample> {
    let speaker = SpeakerId::from_path(path)?;
    if let Some(actor) = SpeakerId::from_actor_dir(path) {
        if actor != speaker {
            tracing::warn!(
                path = %path.display(),
                %actor,
                %speaker,
                "speaker field disagrees with actor directory"
            );
        }
    }

    let features = extractor.extract_file(path, descriptors)?;
    tracing::debug!(path = %path.display(), %speaker, dims = features.len(), "extracted features");
    Ok(LabeledExample::new(features, speaker, path.to_path_buf()))
}

/// Lazily labels and extracts each file, yielding one outcome per file.
pub fn file_outcomes<'a>(
    files: &'a [PathBuf],
    extractor: &'a FeatureExtractor,
    descriptors: &'a DescriptorSet,
) -> impl Iterator<Item = FileOutcome> + 'a {
    files.iter().map(move |path| FileOutcome {
        path: path.clone(),
        result: load_file(path, extractor, descriptors),
    })
}

/// Loads every file, reporting a fraction in `[0, 1]` to `progress_callback` after each.
pub fn load_examples(
    files: &[PathBuf],
    extractor: &FeatureExtractor,
    descriptors: &DescriptorSet,
    on_error: OnError,
    progress_callback: impl Fn(f32),
) -> Result<(Vec<LabeledExample>, LoadSummary)> {
    let mut examples = Vec::with_capacity(files.len());
    let mut summary = LoadSummary::default();

    let progress_increment = 1.0 / files.len().max(1) as f32;
    let mut progress = 0.0;

    for FileOutcome { path, result } in file_outcomes(files, extractor, descriptors) {
        match result {
            Ok(example) => {
                examples.push(example);
                summary.loaded += 1;
            }
            Err(e) if on_error == OnError::Skip => {
                tracing::warn!(path = %path.display(), error = %e, "skipping file");
                summary.skipped += 1;
            }
            Err(e) => return Err(e),
        }
        progress += progress_increment;
        progress_callback(progress.min(1.0));
    }

    Ok((examples, summary))
}

/// Shuffles with a fixed seed and splits off `ceil(test_size * n)` items for testing.
///
/// Returns `(train, test)`.
pub fn train_test_split<T>(items: Vec<T>, test_size: f64, seed: u64) -> Result<(Vec<T>, Vec<T>)> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(ConfigError::InvalidTestSize(test_size).into());
    }
    let n = items.len();
    let n_test = (test_size * n as f64).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(ConfigError::EmptyPartition {
            test_size,
            samples: n,
        }
        .into());
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let take = |slots: &mut Vec<Option<T>>, indices: &[usize]| -> Vec<T> {
        indices.iter().filter_map(|&i| slots[i].take()).collect()
    };
    let test = take(&mut slots, &order[..n_test]);
    let train = take(&mut slots, &order[n_test..]);

    Ok((train, test))
}

/// Train and test partitions of labeled feature vectors.
#[derive(Clone, Debug)]
pub struct Dataset {
    pub train: Vec<LabeledExample>,
    pub test: Vec<LabeledExample>,
    pub summary: LoadSummary,
}

impl Dataset {
    pub fn x_train(&self) -> Result<Array2<f64>> {
        to_matrix(&self.train)
    }

    pub fn x_test(&self) -> Result<Array2<f64>> {
        to_matrix(&self.test)
    }

    pub fn y_train(&self) -> Vec<SpeakerId> {
        self.train.iter().map(LabeledExample::speaker).collect()
    }

    pub fn y_test(&self) -> Vec<SpeakerId> {
        self.test.iter().map(LabeledExample::speaker).collect()
    }
}

/// Stacks feature vectors into a `(samples, features)` matrix.
pub fn to_matrix(examples: &[LabeledExample]) -> Result<Array2<f64>> {
    let dims = examples.first().map(|e| e.features().len()).unwrap_or(0);
    if examples.iter().any(|e| e.features().len() != dims) {
        return Err(ModelError::RaggedFeatures.into());
    }
    let flat: Vec<f64> = examples
        .iter()
        .flat_map(|e| e.features().as_slice().iter().map(|&v| v as f64))
        .collect();
    Ok(Array2::from_shape_vec((examples.len(), dims), flat)?)
}

/// Extracts three perturbed copies of every training file.
///
/// Files are loaded at the extractor's target rate, or at
/// [`DEFAULT_SAMPLE_RATE`] when the extractor keeps native rates.
pub fn augment_examples(
    train: &[LabeledExample],
    extractor: &FeatureExtractor,
    descriptors: &DescriptorSet,
    augmentor: &Augmentor,
    seed: u64,
) -> Result<Vec<LabeledExample>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut augmented = Vec::with_capacity(train.len() * 3);

    for example in train {
        let path = example.source_file();
        let rate = extractor.sample_rate().unwrap_or(DEFAULT_SAMPLE_RATE);
        let audio = load_audio(path, Some(rate))?;
        for copy in augmentor.augment(&audio, &mut rng)? {
            let features = extractor.extract(&copy, descriptors)?;
            augmented.push(LabeledExample::new(features, example.speaker(), path.to_path_buf()));
        }
    }

    Ok(augmented)
}

/// Discovers, labels, extracts and splits the dataset under `config.root`.
pub fn load_dataset(config: &LoaderConfig, progress_callback: impl Fn(f32)) -> Result<Dataset> {
    config.validate()?;

    let files = discover_audio_files(&config.root)?;
    let extractor = FeatureExtractor::new(config.sample_rate);
    let (examples, mut summary) = load_examples(
        &files,
        &extractor,
        &config.descriptors,
        config.on_error,
        progress_callback,
    )?;
    if examples.is_empty() {
        return Err(Error::Config(ConfigError::NoAudioFiles(config.root.clone())));
    }

    let (mut train, test) = train_test_split(examples, config.test_size, config.seed)?;
    tracing::info!(train = train.len(), test = test.len(), skipped = summary.skipped, "split dataset");

    if config.augment {
        let augmented = augment_examples(
            &train,
            &extractor,
            &config.descriptors,
            &Augmentor::default(),
            config.seed,
        )?;
        summary.augmented = augmented.len();
        tracing::info!(count = augmented.len(), "added augmented training examples");
        train.extend(augmented);
    }

    Ok(Dataset {
        train,
        test,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureVector;
    use std::collections::HashSet;

    #[test]
    fn split_sizes_follow_ceil_of_test_size() {
        let (train, test) = train_test_split((0..100).collect(), 0.25, 9).unwrap();
        assert_eq!(test.len(), 25);
        assert_eq!(train.len(), 75);

        let (train, test) = train_test_split((0..10).collect(), 0.25, 9).unwrap();
        assert_eq!(test.len(), 3);
        assert_eq!(train.len(), 7);
    }

    #[test]
    fn split_is_disjoint_and_covering() {
        for test_size in [0.1, 0.25, 0.5, 0.9] {
            let (train, test) = train_test_split((0..57).collect::<Vec<u32>>(), test_size, 3).unwrap();
            let train_set: HashSet<u32> = train.iter().copied().collect();
            let test_set: HashSet<u32> = test.iter().copied().collect();
            assert!(train_set.is_disjoint(&test_set));
            assert_eq!(train_set.len() + test_set.len(), 57);
        }
    }

    #[test]
    fn split_is_reproducible() {
        let a = train_test_split((0..40).collect::<Vec<u32>>(), 0.25, 9).unwrap();
        let b = train_test_split((0..40).collect::<Vec<u32>>(), 0.25, 9).unwrap();
        assert_eq!(a, b);

        let c = train_test_split((0..40).collect::<Vec<u32>>(), 0.25, 10).unwrap();
        assert_ne!(a.1, c.1);
    }

    #[test]
    fn split_rejects_degenerate_partitions() {
        assert!(train_test_split(vec![1], 0.25, 9).is_err());
        assert!(train_test_split(Vec::<u8>::new(), 0.25, 9).is_err());
        assert!(train_test_split((0..10).collect::<Vec<u8>>(), 0.0, 9).is_err());
        assert!(train_test_split((0..10).collect::<Vec<u8>>(), 1.0, 9).is_err());
    }

    #[test]
    fn matrix_rejects_ragged_vectors() {
        let speaker = SpeakerId::new(1).unwrap();
        let examples = vec![
            LabeledExample::new(FeatureVector::new(vec![1.0, 2.0]), speaker, "a.wav".into()),
            LabeledExample::new(FeatureVector::new(vec![1.0]), speaker, "b.wav".into()),
        ];
        assert!(matches!(
            to_matrix(&examples),
            Err(Error::Model(ModelError::RaggedFeatures))
        ));
    }

    #[test]
    fn matrix_stacks_rows() {
        let speaker = SpeakerId::new(2).unwrap();
        let examples = vec![
            LabeledExample::new(FeatureVector::new(vec![1.0, 2.0]), speaker, "a.wav".into()),
            LabeledExample::new(FeatureVector::new(vec![3.0, 4.0]), speaker, "b.wav".into()),
        ];
        let x = to_matrix(&examples).unwrap();
        assert_eq!(x.dim(), (2, 2));
        assert_eq!(x[[1, 0]], 3.0);
    }

    #[test]
    fn discover_only_reads_actor_directories() {
        let dir = std::env::temp_dir().join("speaker-id-discover-actors");
        std::fs::remove_dir_all(&dir).ok();
        let actor = dir.join("Actor_03");
        let nested = actor.join("extra");
        let other = dir.join("notes");
        for d in [&nested, &other] {
            std::fs::create_dir_all(d).unwrap();
        }
        for path in [
            actor.join("03-01-01-01-01-01-03.WAV"),
            actor.join("readme.txt"),
            nested.join("03-01-01-01-01-01-03.wav"),
            other.join("stray.wav"),
            dir.join("stray.wav"),
        ] {
            std::fs::write(path, b"").unwrap();
        }

        let files = discover_audio_files(&dir).unwrap();
        assert_eq!(files, vec![actor.join("03-01-01-01-01-01-03.WAV")]);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn discover_reports_empty_directory() {
        let dir = std::env::temp_dir().join("speaker-id-empty-discover");
        std::fs::create_dir_all(&dir).unwrap();
        assert!(matches!(
            discover_audio_files(&dir),
            Err(Error::Config(ConfigError::NoAudioFiles(_)))
        ));
        std::fs::remove_dir_all(dir).ok();
    }
}
