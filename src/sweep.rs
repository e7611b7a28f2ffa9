//! Exhaustive hyperparameter search with stratified k-fold cross-validation.

use crate::error::{ConfigError, Error, Result};
use crate::mlp::{LearningRate, MlpClassifier, MlpConfig};
use ndarray::{Array2, ArrayView2, Axis};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use threadpool::ThreadPool;

/// Values to try for each hyperparameter.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParamGrid {
    pub alpha: Vec<f64>,
    pub hidden_layer_sizes: Vec<usize>,
    pub learning_rate: Vec<LearningRate>,
    pub max_iter: Vec<usize>,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            alpha: vec![1e-4, 1e-3, 1e-2],
            hidden_layer_sizes: vec![100, 200, 300],
            learning_rate: vec![LearningRate::Constant, LearningRate::Adaptive],
            max_iter: vec![200, 300, 500],
        }
    }
}

impl ParamGrid {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.alpha.is_empty() {
            return Err(ConfigError::EmptyGridAxis("alpha"));
        }
        if self.hidden_layer_sizes.is_empty() {
            return Err(ConfigError::EmptyGridAxis("hidden_layer_sizes"));
        }
        if self.learning_rate.is_empty() {
            return Err(ConfigError::EmptyGridAxis("learning_rate"));
        }
        if self.max_iter.is_empty() {
            return Err(ConfigError::EmptyGridAxis("max_iter"));
        }
        if let Some(&alpha) = self.alpha.iter().find(|a| !(a.is_finite() && **a >= 0.0)) {
            return Err(ConfigError::InvalidAlpha(alpha));
        }
        if self.hidden_layer_sizes.contains(&0) {
            return Err(ConfigError::InvalidHiddenLayer);
        }
        if self.max_iter.contains(&0) {
            return Err(ConfigError::InvalidMaxIter);
        }
        Ok(())
    }

    /// Cartesian product of all axes; `max_iter` varies fastest.
    pub fn candidates(&self) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for &alpha in &self.alpha {
            for &hidden_layer_size in &self.hidden_layer_sizes {
                for &learning_rate in &self.learning_rate {
                    for &max_iter in &self.max_iter {
                        candidates.push(Candidate {
                            alpha,
                            hidden_layer_size,
                            learning_rate,
                            max_iter,
                        });
                    }
                }
            }
        }
        candidates
    }
}

/// One point of the grid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Candidate {
    pub alpha: f64,
    pub hidden_layer_size: usize,
    pub learning_rate: LearningRate,
    pub max_iter: usize,
}

impl Candidate {
    /// `base` with this candidate's values substituted.
    pub fn apply(&self, base: &MlpConfig) -> MlpConfig {
        MlpConfig {
            alpha: self.alpha,
            hidden_layer_sizes: vec![self.hidden_layer_size],
            learning_rate: self.learning_rate,
            max_iter: self.max_iter,
            ..base.clone()
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{alpha: {}, hidden_layer_sizes: ({},), learning_rate: {}, max_iter: {}}}",
            self.alpha, self.hidden_layer_size, self.learning_rate, self.max_iter
        )
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CandidateScore {
    pub candidate: Candidate,
    pub mean_score: f64,
    pub fold_scores: Vec<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SweepResult {
    pub best: Candidate,
    pub best_score: f64,
    /// In grid order
    pub scores: Vec<CandidateScore>,
}

/// Splits sample indices into `k` folds, keeping class proportions.
///
/// Samples of each class are dealt round-robin across folds in input order,
/// continuing from the fold where the previous class stopped. Returns the
/// held-out indices of each fold.
pub fn stratified_k_fold<L: Ord>(y: &[L], k: usize) -> std::result::Result<Vec<Vec<usize>>, ConfigError> {
    if k < 2 || k > y.len() {
        return Err(ConfigError::InvalidFolds {
            folds: k,
            samples: y.len(),
        });
    }

    let mut by_class: BTreeMap<&L, Vec<usize>> = BTreeMap::new();
    for (i, label) in y.iter().enumerate() {
        by_class.entry(label).or_default().push(i);
    }

    let mut folds = vec![Vec::new(); k];
    let mut next = 0;
    for indices in by_class.values() {
        for &i in indices {
            folds[next].push(i);
            next = (next + 1) % k;
        }
    }
    for fold in &mut folds {
        fold.sort_unstable();
    }
    Ok(folds)
}

/// Runs every (candidate, fold) fit on a thread pool.
#[derive(Clone, Debug)]
pub struct GridSearch {
    base: MlpConfig,
    grid: ParamGrid,
    folds: usize,
    jobs: usize,
}

impl GridSearch {
    pub fn new(base: MlpConfig, grid: ParamGrid, folds: usize, jobs: Option<usize>) -> Self {
        Self {
            base,
            grid,
            folds,
            jobs: jobs.unwrap_or_else(num_cpus::get).max(1),
        }
    }

    pub fn run<L>(&self, x: ArrayView2<f64>, y: &[L]) -> Result<SweepResult>
    where
        L: Copy + Ord + Send + Sync + 'static,
    {
        self.grid.validate()?;
        let folds = stratified_k_fold(y, self.folds)?;
        let candidates = self.grid.candidates();
        let total_jobs = candidates.len() * folds.len();
        tracing::info!(
            candidates = candidates.len(),
            folds = folds.len(),
            threads = self.jobs,
            "starting hyperparameter sweep"
        );

        let x = Arc::new(x.to_owned());
        let y = Arc::new(y.to_vec());
        let folds = Arc::new(folds);
        let cancelled = Arc::new(AtomicBool::new(false));
        let thread_pool = ThreadPool::new(self.jobs);
        let (sender, receiver) = mpsc::channel::<(usize, usize, Result<f64>)>();

        for (c, candidate) in candidates.iter().enumerate() {
            for f in 0..folds.len() {
                let config = candidate.apply(&self.base);
                let (x, y, folds) = (Arc::clone(&x), Arc::clone(&y), Arc::clone(&folds));
                let sender = sender.clone();
                let cancelled = Arc::clone(&cancelled);
                thread_pool.execute(move || {
                    if cancelled.load(Ordering::Relaxed) {
                        return;
                    }
                    let score = fit_fold(config, &x, &y, &folds[f]);
                    let _ = sender.send((c, f, score));
                });
            }
        }
        drop(sender);

        // Ends once every job has finished or been skipped
        let mut fold_scores = vec![vec![0.0; folds.len()]; candidates.len()];
        let mut first_error = None;
        for (done, (c, f, score)) in receiver.iter().enumerate() {
            let score = match score {
                Ok(score) => score,
                Err(e) => {
                    cancelled.store(true, Ordering::Relaxed);
                    tracing::warn!(
                        candidate = %candidates[c],
                        fold = f,
                        error = %e,
                        "fit failed, cancelling sweep"
                    );
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            tracing::debug!(
                candidate = %candidates[c],
                fold = f,
                score,
                done = done + 1,
                total = total_jobs,
                "finished fit"
            );
            fold_scores[c][f] = score;
        }
        thread_pool.join();
        if let Some(e) = first_error {
            return Err(e);
        }

        let scores: Vec<CandidateScore> = candidates
            .iter()
            .zip(fold_scores)
            .map(|(&candidate, fold_scores)| CandidateScore {
                candidate,
                mean_score: fold_scores.iter().sum::<f64>() / fold_scores.len() as f64,
                fold_scores,
            })
            .collect();

        let best = scores
            .iter()
            .fold(None::<&CandidateScore>, |best, s| match best {
                Some(b) if b.mean_score >= s.mean_score => Some(b),
                _ => Some(s),
            })
            .ok_or(Error::Config(ConfigError::EmptyGridAxis("candidates")))?;

        tracing::info!(best = %best.candidate, score = best.mean_score, "sweep finished");
        Ok(SweepResult {
            best: best.candidate,
            best_score: best.mean_score,
            scores,
        })
    }
}

fn fit_fold<L: Copy + Ord>(config: MlpConfig, x: &Array2<f64>, y: &[L], held_out: &[usize]) -> Result<f64> {
    let mut is_held_out = vec![false; y.len()];
    for &i in held_out {
        is_held_out[i] = true;
    }
    let train: Vec<usize> = (0..y.len()).filter(|&i| !is_held_out[i]).collect();

    let x_train = x.select(Axis(0), &train);
    let y_train: Vec<L> = train.iter().map(|&i| y[i]).collect();
    let x_test = x.select(Axis(0), held_out);
    let y_test: Vec<L> = held_out.iter().map(|&i| y[i]).collect();

    let model = MlpClassifier::fit(config, x_train.view(), &y_train)?;
    model.score(x_test.view(), &y_test)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grid_has_54_candidates() {
        let grid = ParamGrid::default();
        let candidates = grid.candidates();
        assert_eq!(candidates.len(), 54);
        assert_eq!(candidates[0].max_iter, 200);
        assert_eq!(candidates[1].max_iter, 300);
        assert_eq!(candidates[3].learning_rate, LearningRate::Adaptive);
        assert_eq!(candidates[53].alpha, 1e-2);
    }

    #[test]
    fn rejects_empty_axis() {
        let grid = ParamGrid {
            max_iter: vec![],
            ..ParamGrid::default()
        };
        assert!(matches!(grid.validate(), Err(ConfigError::EmptyGridAxis("max_iter"))));

        let grid = ParamGrid {
            alpha: vec![-1.0],
            ..ParamGrid::default()
        };
        assert!(grid.validate().is_err());
    }

    #[test]
    fn folds_are_stratified_and_disjoint() {
        let y = [0, 0, 0, 1, 1, 1, 2, 2, 2];
        let folds = stratified_k_fold(&y, 3).unwrap();
        assert_eq!(folds.len(), 3);
        for fold in &folds {
            let mut labels: Vec<i32> = fold.iter().map(|&i| y[i]).collect();
            labels.sort();
            assert_eq!(labels, vec![0, 1, 2]);
        }
        let mut all: Vec<usize> = folds.concat();
        all.sort();
        assert_eq!(all, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn folds_reject_bad_k() {
        assert!(stratified_k_fold(&[0, 1, 0], 1).is_err());
        assert!(stratified_k_fold(&[0, 1, 0], 4).is_err());
    }

    #[test]
    fn candidate_overrides_base() {
        let candidate = Candidate {
            alpha: 0.5,
            hidden_layer_size: 7,
            learning_rate: LearningRate::Adaptive,
            max_iter: 3,
        };
        let config = candidate.apply(&MlpConfig::sweep_base());
        assert_eq!(config.hidden_layer_sizes, vec![7]);
        assert_eq!(config.alpha, 0.5);
        assert_eq!(config.batch_size, 200);
    }

    #[test]
    fn failed_fit_cancels_remaining_jobs() {
        // A single class cannot be fitted, so every job fails
        let x = Array2::from_shape_fn((9, 2), |(i, j)| (i + j) as f64);
        let y = vec![1u8; 9];
        let grid = ParamGrid {
            alpha: vec![1e-4, 1e-3, 1e-2, 1e-1],
            hidden_layer_sizes: vec![4, 8],
            learning_rate: vec![LearningRate::Constant],
            max_iter: vec![5],
        };
        let search = GridSearch::new(MlpConfig::sweep_base(), grid, 3, Some(1));

        assert!(matches!(
            search.run(x.view(), &y),
            Err(Error::Model(crate::error::ModelError::TooFewClasses(1)))
        ));
    }

    #[test]
    fn search_returns_grid_member() {
        let n = 30;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| (i % 2) as f64 * 4.0 + j as f64 * 0.1 + i as f64 * 0.01);
        let y: Vec<u8> = (0..n).map(|i| (i % 2) as u8).collect();
        let grid = ParamGrid {
            alpha: vec![1e-4, 1e-2],
            hidden_layer_sizes: vec![4],
            learning_rate: vec![LearningRate::Constant],
            max_iter: vec![20],
        };
        let search = GridSearch::new(MlpConfig::sweep_base(), grid.clone(), 3, Some(2));
        let result = search.run(x.view(), &y).unwrap();

        assert!(grid.candidates().contains(&result.best));
        assert!((0.0..=1.0).contains(&result.best_score));
        assert_eq!(result.scores.len(), 2);
        assert!(result.scores.iter().all(|s| s.fold_scores.len() == 3));
    }
}
