use crate::speaker::SpeakerId;
use std::path::{Path, PathBuf};

/// Fixed-length summary of one recording, descriptors concatenated in canonical order.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

/// A feature vector paired with the speaker it was recorded from.
#[derive(Clone, Debug)]
pub struct LabeledExample {
    features: FeatureVector,
    speaker: SpeakerId,
    source_file: PathBuf,
}

impl LabeledExample {
    pub fn new(features: FeatureVector, speaker: SpeakerId, source_file: PathBuf) -> Self {
        Self {
            features,
            speaker,
            source_file,
        }
    }

    pub fn features(&self) -> &FeatureVector {
        &self.features
    }

    pub fn speaker(&self) -> SpeakerId {
        self.speaker
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }
}
