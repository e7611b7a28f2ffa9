//! Multi-layer perceptron classifier trained with Adam.
//!
//! Hidden layers use ReLU and the output layer is a softmax over the classes
//! seen during training. The loss is cross-entropy plus an L2 penalty of
//! `alpha / 2 * sum(W^2)`, both averaged over the mini-batch.

use crate::error::{ConfigError, ModelError, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt;

/// Learning rates below this end adaptive training.
const MIN_ADAPTIVE_LEARNING_RATE: f64 = 1e-6;
/// Probabilities are clipped away from zero before taking the log.
const PROB_EPSILON: f64 = 1e-15;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LearningRate {
    /// Keep the initial rate; stop once the loss plateaus
    Constant,
    /// Divide the rate by 5 each time the loss plateaus, stopping once it falls
    /// to 1e-6. Unlike scikit-learn, this schedule also applies to Adam.
    Adaptive,
}

impl fmt::Display for LearningRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearningRate::Constant => f.write_str("constant"),
            LearningRate::Adaptive => f.write_str("adaptive"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MlpConfig {
    pub hidden_layer_sizes: Vec<usize>,
    /// L2 penalty strength
    pub alpha: f64,
    pub batch_size: usize,
    pub learning_rate: LearningRate,
    pub learning_rate_init: f64,
    pub max_iter: usize,
    /// Minimum loss improvement that resets the plateau counter
    pub tol: f64,
    pub n_iter_no_change: usize,
    pub beta_1: f64,
    pub beta_2: f64,
    /// Adam denominator term
    pub epsilon: f64,
    pub seed: u64,
    /// Scale inputs to zero mean and unit variance using training statistics
    pub standardize: bool,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_layer_sizes: vec![300],
            alpha: 0.01,
            batch_size: 256,
            learning_rate: LearningRate::Adaptive,
            learning_rate_init: 1e-3,
            max_iter: 500,
            tol: 1e-4,
            n_iter_no_change: 10,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-8,
            seed: 0,
            standardize: true,
        }
    }
}

impl MlpConfig {
    /// Settings the sweep starts from before grid values are applied.
    pub fn sweep_base() -> Self {
        Self {
            hidden_layer_sizes: vec![100],
            alpha: 1e-4,
            batch_size: 200,
            learning_rate: LearningRate::Constant,
            max_iter: 200,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(ConfigError::InvalidAlpha(self.alpha));
        }
        if self.hidden_layer_sizes.iter().any(|&w| w == 0) {
            return Err(ConfigError::InvalidHiddenLayer);
        }
        if self.max_iter == 0 {
            return Err(ConfigError::InvalidMaxIter);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if !(self.learning_rate_init.is_finite() && self.learning_rate_init > 0.0) {
            return Err(ConfigError::InvalidLearningRate(self.learning_rate_init));
        }
        Ok(())
    }
}

/// Per-feature mean and standard deviation fitted on training data.
#[derive(Clone, Debug)]
struct Standardizer {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl Standardizer {
    fn fit(x: ArrayView2<f64>) -> Self {
        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        Self { mean, scale }
    }

    fn transform(&self, x: ArrayView2<f64>) -> Array2<f64> {
        (&x - &self.mean) / &self.scale
    }
}

/// First and second moment estimates for every parameter.
struct Adam {
    m_weights: Vec<Array2<f64>>,
    v_weights: Vec<Array2<f64>>,
    m_biases: Vec<Array1<f64>>,
    v_biases: Vec<Array1<f64>>,
    t: i32,
}

impl Adam {
    fn new(weights: &[Array2<f64>], biases: &[Array1<f64>]) -> Self {
        Self {
            m_weights: weights.iter().map(|w| Array2::zeros(w.raw_dim())).collect(),
            v_weights: weights.iter().map(|w| Array2::zeros(w.raw_dim())).collect(),
            m_biases: biases.iter().map(|b| Array1::zeros(b.raw_dim())).collect(),
            v_biases: biases.iter().map(|b| Array1::zeros(b.raw_dim())).collect(),
            t: 0,
        }
    }

    fn step(
        &mut self,
        weights: &mut [Array2<f64>],
        biases: &mut [Array1<f64>],
        gradients: &Gradients,
        learning_rate: f64,
        config: &MlpConfig,
    ) {
        self.t += 1;
        let (b1, b2, eps) = (config.beta_1, config.beta_2, config.epsilon);
        let lr = learning_rate * (1.0 - b2.powi(self.t)).sqrt() / (1.0 - b1.powi(self.t));

        for i in 0..weights.len() {
            Zip::from(&mut weights[i])
                .and(&mut self.m_weights[i])
                .and(&mut self.v_weights[i])
                .and(&gradients.weights[i])
                .for_each(|p, m, v, &g| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    *p -= lr * *m / (v.sqrt() + eps);
                });
            Zip::from(&mut biases[i])
                .and(&mut self.m_biases[i])
                .and(&mut self.v_biases[i])
                .and(&gradients.biases[i])
                .for_each(|p, m, v, &g| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    *p -= lr * *m / (v.sqrt() + eps);
                });
        }
    }
}

struct Gradients {
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
}

/// A trained feed-forward classifier over labels of type `L`.
#[derive(Clone, Debug)]
pub struct MlpClassifier<L> {
    config: MlpConfig,
    classes: Vec<L>,
    /// `weights[i]` has shape `(fan_in, fan_out)`
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
    scaler: Option<Standardizer>,
    loss_curve: Vec<f64>,
    n_iter: usize,
    converged: bool,
}

impl<L: Copy + Ord> MlpClassifier<L> {
    /// Trains a classifier on `x` (one row per sample) and labels `y`.
    ///
    /// Stopping at `max_iter` is not an error; check [`converged`](Self::converged).
    pub fn fit(config: MlpConfig, x: ArrayView2<f64>, y: &[L]) -> Result<Self> {
        config.validate()?;
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 {
            return Err(ModelError::EmptyTrainingSet.into());
        }
        if n_samples != y.len() {
            return Err(ModelError::LengthMismatch {
                samples: n_samples,
                labels: y.len(),
            }
            .into());
        }

        let mut classes: Vec<L> = y.to_vec();
        classes.sort();
        classes.dedup();
        if classes.len() < 2 {
            return Err(ModelError::TooFewClasses(classes.len()).into());
        }

        let scaler = config.standardize.then(|| Standardizer::fit(x));
        let x = match &scaler {
            Some(scaler) => scaler.transform(x),
            None => x.to_owned(),
        };

        let targets = one_hot(y, &classes);
        let mut rng = StdRng::seed_from_u64(config.seed);

        let mut layer_sizes = vec![n_features];
        layer_sizes.extend(&config.hidden_layer_sizes);
        layer_sizes.push(classes.len());

        let mut weights = Vec::with_capacity(layer_sizes.len() - 1);
        let mut biases = Vec::with_capacity(layer_sizes.len() - 1);
        for pair in layer_sizes.windows(2) {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            // Glorot uniform
            let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
            weights.push(Array2::from_shape_fn((fan_in, fan_out), |_| {
                rng.gen_range(-bound..bound)
            }));
            biases.push(Array1::from_shape_fn(fan_out, |_| rng.gen_range(-bound..bound)));
        }

        let mut model = Self {
            classes,
            weights,
            biases,
            scaler,
            loss_curve: Vec::new(),
            n_iter: 0,
            converged: false,
            config,
        };
        model.train(x.view(), targets.view(), &mut rng);
        Ok(model)
    }

    fn train(&mut self, x: ArrayView2<f64>, targets: ArrayView2<f64>, rng: &mut StdRng) {
        let n_samples = x.nrows();
        let batch_size = self.config.batch_size.clamp(1, n_samples);
        let mut adam = Adam::new(&self.weights, &self.biases);
        let mut learning_rate = self.config.learning_rate_init;
        let mut best_loss = f64::INFINITY;
        let mut no_improvement = 0;
        let mut order: Vec<usize> = (0..n_samples).collect();

        for epoch in 0..self.config.max_iter {
            order.shuffle(rng);
            let mut accumulated = 0.0;

            for batch in order.chunks(batch_size) {
                let xb = x.select(Axis(0), batch);
                let yb = targets.select(Axis(0), batch);
                let (loss, gradients) = self.backprop(xb.view(), yb.view());
                accumulated += loss * batch.len() as f64;
                adam.step(
                    &mut self.weights,
                    &mut self.biases,
                    &gradients,
                    learning_rate,
                    &self.config,
                );
            }

            let loss = accumulated / n_samples as f64;
            self.loss_curve.push(loss);
            self.n_iter = epoch + 1;
            tracing::debug!(epoch = self.n_iter, loss, learning_rate, "training epoch");

            if loss > best_loss - self.config.tol {
                no_improvement += 1;
            } else {
                no_improvement = 0;
            }
            best_loss = best_loss.min(loss);

            if no_improvement > self.config.n_iter_no_change {
                match self.config.learning_rate {
                    LearningRate::Adaptive if learning_rate > MIN_ADAPTIVE_LEARNING_RATE => {
                        learning_rate /= 5.0;
                        no_improvement = 0;
                        tracing::debug!(learning_rate, "loss plateaued, reducing learning rate");
                    }
                    _ => {
                        self.converged = true;
                        tracing::info!(epochs = self.n_iter, loss, "training converged");
                        return;
                    }
                }
            }
        }

        tracing::warn!(
            max_iter = self.config.max_iter,
            loss = self.loss_curve.last().copied().unwrap_or(f64::NAN),
            "reached max_iter before the loss converged"
        );
    }

    /// Forward pass returning the activations of every layer, input included.
    fn forward(&self, x: ArrayView2<f64>) -> Vec<Array2<f64>> {
        let mut activations = vec![x.to_owned()];
        let last = self.weights.len() - 1;
        for (i, (w, b)) in self.weights.iter().zip(&self.biases).enumerate() {
            let z = activations[i].dot(w) + b;
            let a = if i == last {
                softmax(z)
            } else {
                z.mapv(|v| v.max(0.0))
            };
            activations.push(a);
        }
        activations
    }

    fn backprop(&self, x: ArrayView2<f64>, targets: ArrayView2<f64>) -> (f64, Gradients) {
        let n = x.nrows() as f64;
        let alpha = self.config.alpha;
        let activations = self.forward(x);
        let probs = &activations[activations.len() - 1];

        let data_loss = -Zip::from(probs)
            .and(&targets)
            .fold(0.0, |acc, &p, &t| acc + t * p.clamp(PROB_EPSILON, 1.0).ln())
            / n;
        let penalty: f64 = self.weights.iter().map(|w| w.iter().map(|v| v * v).sum::<f64>()).sum();
        let loss = data_loss + 0.5 * alpha * penalty / n;

        let layers = self.weights.len();
        let mut grad_weights = Vec::with_capacity(layers);
        let mut grad_biases = Vec::with_capacity(layers);
        let mut delta = probs - &targets;

        for i in (0..layers).rev() {
            let input = &activations[i];
            grad_weights.push((input.t().dot(&delta) + &self.weights[i] * alpha) / n);
            grad_biases.push(delta.sum_axis(Axis(0)) / n);
            if i > 0 {
                let mut back = delta.dot(&self.weights[i].t());
                Zip::from(&mut back).and(input).for_each(|d, &a| {
                    if a <= 0.0 {
                        *d = 0.0;
                    }
                });
                delta = back;
            }
        }
        grad_weights.reverse();
        grad_biases.reverse();

        (
            loss,
            Gradients {
                weights: grad_weights,
                biases: grad_biases,
            },
        )
    }

    /// Class probabilities, one row per sample, columns ordered as [`classes`](Self::classes).
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let expected = self.weights[0].nrows();
        if x.ncols() != expected {
            return Err(ModelError::DimensionMismatch {
                expected,
                got: x.ncols(),
            }
            .into());
        }
        let x = match &self.scaler {
            Some(scaler) => scaler.transform(x),
            None => x.to_owned(),
        };
        let mut activations = self.forward(x.view());
        Ok(activations.pop().unwrap_or_else(|| Array2::zeros((0, 0))))
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<L>> {
        let probs = self.predict_proba(x)?;
        Ok(probs
            .rows()
            .into_iter()
            .map(|row| {
                let best = row
                    .iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
                    .0;
                self.classes[best]
            })
            .collect())
    }

    /// Fraction of rows of `x` predicted as the matching label in `y`.
    pub fn score(&self, x: ArrayView2<f64>, y: &[L]) -> Result<f64> {
        if x.nrows() != y.len() {
            return Err(ModelError::LengthMismatch {
                samples: x.nrows(),
                labels: y.len(),
            }
            .into());
        }
        let predicted = self.predict(x)?;
        Ok(crate::metrics::accuracy(y, &predicted))
    }

    pub fn classes(&self) -> &[L] {
        &self.classes
    }

    pub fn config(&self) -> &MlpConfig {
        &self.config
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn loss_curve(&self) -> &[f64] {
        &self.loss_curve
    }

    pub fn converged(&self) -> bool {
        self.converged
    }
}

fn softmax(mut z: Array2<f64>) -> Array2<f64> {
    for mut row in z.rows_mut() {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    z
}

fn one_hot<L: Ord>(y: &[L], classes: &[L]) -> Array2<f64> {
    let mut targets = Array2::zeros((y.len(), classes.len()));
    for (row, label) in y.iter().enumerate() {
        if let Ok(col) = classes.binary_search(label) {
            targets[[row, col]] = 1.0;
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::Uniform;

    /// Two well separated clusters in `dims` dimensions.
    fn clusters(n_per_class: usize, dims: usize, seed: u64) -> (Array2<f64>, Vec<u8>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let low = Uniform::new(0.0, 1.0);
        let high = Uniform::new(5.0, 6.0);
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..2 * n_per_class {
            let class = (i % 2) as u8;
            let dist = if class == 0 { low } else { high };
            rows.extend((0..dims).map(|_| rng.sample(dist)));
            labels.push(class);
        }
        (Array2::from_shape_vec((2 * n_per_class, dims), rows).unwrap(), labels)
    }

    fn small_config() -> MlpConfig {
        MlpConfig {
            hidden_layer_sizes: vec![16],
            learning_rate_init: 0.01,
            max_iter: 200,
            ..MlpConfig::default()
        }
    }

    #[test]
    fn separates_two_clusters() {
        let (x_train, y_train) = clusters(40, 4, 1);
        let (x_test, y_test) = clusters(10, 4, 2);

        let model = MlpClassifier::fit(small_config(), x_train.view(), &y_train).unwrap();

        assert_eq!(model.score(x_test.view(), &y_test).unwrap(), 1.0);
        assert_eq!(model.classes(), &[0, 1]);
    }

    #[test]
    fn loss_decreases() {
        let (x, y) = clusters(30, 3, 3);
        let model = MlpClassifier::fit(small_config(), x.view(), &y).unwrap();
        let curve = model.loss_curve();
        assert!(curve.len() >= 2);
        assert!(curve.last().unwrap() < curve.first().unwrap());
        assert_eq!(curve.len(), model.n_iter());
    }

    #[test]
    fn probabilities_sum_to_one() {
        let (x, y) = clusters(20, 3, 4);
        let model = MlpClassifier::fit(small_config(), x.view(), &y).unwrap();
        let probs = model.predict_proba(x.view()).unwrap();
        for row in probs.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn training_is_reproducible_for_a_seed() {
        let (x, y) = clusters(20, 3, 5);
        let a = MlpClassifier::fit(small_config(), x.view(), &y).unwrap();
        let b = MlpClassifier::fit(small_config(), x.view(), &y).unwrap();
        assert_eq!(a.loss_curve(), b.loss_curve());
    }

    #[test]
    fn max_iter_is_not_an_error() {
        let (x, y) = clusters(20, 3, 6);
        let config = MlpConfig {
            max_iter: 2,
            ..small_config()
        };
        let model = MlpClassifier::fit(config, x.view(), &y).unwrap();
        assert_eq!(model.n_iter(), 2);
        assert!(!model.converged());
    }

    #[test]
    fn constant_schedule_stops_on_plateau() {
        let (x, y) = clusters(20, 3, 7);
        let config = MlpConfig {
            learning_rate: LearningRate::Constant,
            tol: 10.0,
            n_iter_no_change: 2,
            ..small_config()
        };
        let model = MlpClassifier::fit(config, x.view(), &y).unwrap();
        assert!(model.converged());
        // First epoch improves on infinity, the next three do not beat it by `tol`
        assert_eq!(model.n_iter(), 4);
    }

    #[test]
    fn adaptive_schedule_decays_before_stopping() {
        let (x, y) = clusters(20, 3, 7);
        let config = MlpConfig {
            learning_rate: LearningRate::Adaptive,
            learning_rate_init: 0.01,
            tol: 10.0,
            n_iter_no_change: 2,
            ..small_config()
        };
        let model = MlpClassifier::fit(config, x.view(), &y).unwrap();
        assert!(model.converged());
        // Six divisions by 5 take 0.01 below 1e-6, each after three flat epochs
        assert_eq!(model.n_iter(), 4 + 6 * 3);
    }

    #[test]
    fn rejects_bad_inputs() {
        let (x, y) = clusters(5, 2, 8);
        assert!(MlpClassifier::fit(small_config(), x.view(), &y[..3]).is_err());
        assert!(MlpClassifier::fit(small_config(), x.view(), &vec![0u8; 10]).is_err());

        let model = MlpClassifier::fit(small_config(), x.view(), &y).unwrap();
        let wrong_width = Array2::<f64>::zeros((2, 3));
        assert!(model.predict(wrong_width.view()).is_err());
    }

    #[test]
    fn validates_config() {
        let bad = [
            MlpConfig { alpha: -1.0, ..MlpConfig::default() },
            MlpConfig { hidden_layer_sizes: vec![0], ..MlpConfig::default() },
            MlpConfig { max_iter: 0, ..MlpConfig::default() },
            MlpConfig { batch_size: 0, ..MlpConfig::default() },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?}");
        }
        assert!(MlpConfig::default().validate().is_ok());
        assert!(MlpConfig::sweep_base().validate().is_ok());
    }
}
