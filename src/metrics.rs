//! Evaluation metrics for predicted labels.

use serde::Serialize;
use std::fmt;

/// Which labels appear on the confusion matrix axes and report rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LabelOrder {
    /// Every speaker in the dataset alphabet, even those absent from the test set
    #[default]
    Fixed,
    /// Only labels that occur in the true or predicted values, sorted
    Observed,
}

impl LabelOrder {
    /// Resolves the axis labels given the full alphabet and the observed pairs.
    pub fn resolve<L: Copy + Ord>(self, alphabet: &[L], y_true: &[L], y_pred: &[L]) -> Vec<L> {
        match self {
            LabelOrder::Fixed => alphabet.to_vec(),
            LabelOrder::Observed => {
                let mut labels: Vec<L> = y_true.iter().chain(y_pred).copied().collect();
                labels.sort();
                labels.dedup();
                labels
            }
        }
    }
}

/// Fraction of positions where `y_pred` equals `y_true`. Empty input scores 0.
pub fn accuracy<L: PartialEq>(y_true: &[L], y_pred: &[L]) -> f64 {
    let total = y_true.len().min(y_pred.len());
    if total == 0 {
        return 0.0;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    correct as f64 / total as f64
}

/// Counts of (true, predicted) pairs. Rows are true labels, columns predicted.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConfusionMatrix<L> {
    labels: Vec<L>,
    counts: Vec<Vec<usize>>,
}

impl<L: Copy + Ord> ConfusionMatrix<L> {
    /// Pairs whose true or predicted label is not in `labels` are not counted.
    pub fn new(y_true: &[L], y_pred: &[L], labels: &[L]) -> Self {
        let n = labels.len();
        let mut counts = vec![vec![0; n]; n];
        let index = |label: &L| labels.iter().position(|l| l == label);
        for (t, p) in y_true.iter().zip(y_pred) {
            if let (Some(row), Some(col)) = (index(t), index(p)) {
                counts[row][col] += 1;
            }
        }
        Self {
            labels: labels.to_vec(),
            counts,
        }
    }

    pub fn labels(&self) -> &[L] {
        &self.labels
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.counts[actual][predicted]
    }

    pub fn rows(&self) -> &[Vec<usize>] {
        &self.counts
    }

    /// Correct predictions.
    pub fn trace(&self) -> usize {
        (0..self.labels.len()).map(|i| self.counts[i][i]).sum()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }
}

impl<L: fmt::Display> fmt::Display for ConfusionMatrix<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.labels.iter().map(ToString::to_string).collect();
        let label_width = names.iter().map(String::len).max().unwrap_or(0).max(4);
        let cell_width = self
            .counts
            .iter()
            .flatten()
            .map(|c| c.to_string().len())
            .chain(names.iter().map(|n| n.len()))
            .max()
            .unwrap_or(1);

        write!(f, "{:>label_width$}", "")?;
        for name in &names {
            write!(f, " {name:>cell_width$}")?;
        }
        writeln!(f)?;
        for (name, row) in names.iter().zip(&self.counts) {
            write!(f, "{name:>label_width$}")?;
            for count in row {
                write!(f, " {count:>cell_width$}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-label precision, recall and F1 with overall averages.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassificationReport<L> {
    pub classes: Vec<(L, ClassScores)>,
    pub accuracy: f64,
    pub macro_avg: ClassScores,
    pub weighted_avg: ClassScores,
}

impl<L: Copy + Ord> ClassificationReport<L> {
    pub fn new(y_true: &[L], y_pred: &[L], labels: &[L]) -> Self {
        Self::from_confusion(&ConfusionMatrix::new(y_true, y_pred, labels), accuracy(y_true, y_pred))
    }

    fn from_confusion(confusion: &ConfusionMatrix<L>, accuracy: f64) -> Self {
        let n = confusion.labels.len();
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };

        let classes: Vec<(L, ClassScores)> = confusion
            .labels
            .iter()
            .enumerate()
            .map(|(i, &label)| {
                let tp = confusion.counts[i][i];
                let support: usize = confusion.counts[i].iter().sum();
                let predicted: usize = (0..n).map(|r| confusion.counts[r][i]).sum();
                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                (
                    label,
                    ClassScores {
                        precision,
                        recall,
                        f1,
                        support,
                    },
                )
            })
            .collect();

        let total_support: usize = classes.iter().map(|(_, s)| s.support).sum();
        let uniform = vec![1.0; n];
        let by_support: Vec<f64> = classes.iter().map(|(_, s)| s.support as f64).collect();
        let macro_avg = weighted_average(&classes, &uniform, total_support);
        let weighted_avg = weighted_average(&classes, &by_support, total_support);

        Self {
            classes,
            accuracy,
            macro_avg,
            weighted_avg,
        }
    }
}

impl<L: fmt::Display> fmt::Display for ClassificationReport<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.classes.iter().map(|(l, _)| l.to_string()).collect();
        let width = names
            .iter()
            .map(String::len)
            .max()
            .unwrap_or(0)
            .max("weighted avg".len());
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for (name, (_, scores)) in names.iter().zip(&self.classes) {
            write_scores(f, name, scores, width)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        write_scores(f, "macro avg", &self.macro_avg, width)?;
        write_scores(f, "weighted avg", &self.weighted_avg, width)
    }
}

fn weighted_average<L>(classes: &[(L, ClassScores)], weights: &[f64], support: usize) -> ClassScores {
    let mut avg = ClassScores {
        support,
        ..ClassScores::default()
    };
    let norm: f64 = weights.iter().sum();
    if norm > 0.0 {
        for ((_, s), w) in classes.iter().zip(weights) {
            avg.precision += w * s.precision / norm;
            avg.recall += w * s.recall / norm;
            avg.f1 += w * s.f1 / norm;
        }
    }
    avg
}

fn write_scores(f: &mut fmt::Formatter<'_>, name: &str, s: &ClassScores, width: usize) -> fmt::Result {
    writeln!(
        f,
        "{name:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
        s.precision, s.recall, s.f1, s.support
    )
}

/// Everything reported after a train/evaluate run.
#[derive(Clone, Debug, Serialize)]
pub struct Evaluation<L> {
    pub accuracy: f64,
    pub confusion: ConfusionMatrix<L>,
    pub report: ClassificationReport<L>,
    pub n_train: usize,
    pub n_test: usize,
}

impl<L: Copy + Ord> Evaluation<L> {
    pub fn new(y_true: &[L], y_pred: &[L], labels: &[L], n_train: usize) -> Self {
        let accuracy = accuracy(y_true, y_pred);
        let confusion = ConfusionMatrix::new(y_true, y_pred, labels);
        let report = ClassificationReport::from_confusion(&confusion, accuracy);
        Self {
            accuracy,
            confusion,
            report,
            n_train,
            n_test: y_true.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_counts_matches() {
        assert_eq!(accuracy(&[1, 2, 3, 4], &[1, 2, 0, 0]), 0.5);
        assert_eq!(accuracy::<u8>(&[], &[]), 0.0);
    }

    #[test]
    fn confusion_rows_are_true_labels() {
        let m = ConfusionMatrix::new(&[1, 1, 2, 3], &[1, 2, 2, 9], &[1, 2, 3]);
        assert_eq!(m.get(0, 0), 1);
        assert_eq!(m.get(0, 1), 1);
        assert_eq!(m.get(1, 1), 1);
        // (3, 9) has a predicted label outside the axis
        assert_eq!(m.total(), 3);
        assert_eq!(m.trace(), 2);
    }

    #[test]
    fn report_scores() {
        let y_true = [0, 0, 1, 1];
        let y_pred = [0, 1, 1, 1];
        let report = ClassificationReport::new(&y_true, &y_pred, &[0, 1, 2]);

        let (_, zero) = report.classes[0];
        assert_eq!(zero.precision, 1.0);
        assert_eq!(zero.recall, 0.5);
        assert!((zero.f1 - 2.0 / 3.0).abs() < 1e-12);

        let (_, one) = report.classes[1];
        assert!((one.precision - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(one.recall, 1.0);

        // Absent label divides by zero and scores 0
        let (_, two) = report.classes[2];
        assert_eq!(two, ClassScores::default());

        assert_eq!(report.accuracy, 0.75);
        assert_eq!(report.weighted_avg.support, 4);
        assert!((report.weighted_avg.recall - 0.75).abs() < 1e-12);
    }

    #[test]
    fn observed_order_is_sorted_union() {
        let labels = LabelOrder::Observed.resolve(&[1, 2, 3, 4], &[3, 1], &[4, 1]);
        assert_eq!(labels, vec![1, 3, 4]);
        assert_eq!(LabelOrder::Fixed.resolve(&[1, 2], &[2], &[2]), vec![1, 2]);
    }

    #[test]
    fn renders_labels_on_both_axes() {
        let m = ConfusionMatrix::new(&["a", "b"], &["a", "a"], &["a", "b"]);
        let text = m.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains('a') && lines[0].contains('b'));
        assert!(lines[2].trim_start().starts_with('b'));

        let report = ClassificationReport::new(&["a", "b"], &["a", "a"], &["a", "b"]).to_string();
        assert!(report.contains("precision"));
        assert!(report.contains("weighted avg"));
    }

    #[test]
    fn evaluation_trace_matches_accuracy() {
        let y_true = [1, 2, 3, 1, 2];
        let y_pred = [1, 2, 1, 1, 3];
        let eval = Evaluation::new(&y_true, &y_pred, &[1, 2, 3], 20);
        let expected = (eval.accuracy * eval.n_test as f64).round() as usize;
        assert_eq!(eval.confusion.trace(), expected);
        assert_eq!(eval.n_train, 20);
    }
}
