//! Statistical outlier model behind the "ML Anomaly" detector.
//!
//! The engine only depends on the [`RiskModel`] contract: a feature vector in,
//! a continuous score and an anomaly flag out. The shipped implementation is an
//! isolation forest fitted at startup on seeded synthetic data, with inputs
//! standardized by a scaler fitted on the same data.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::ModelConfig;

use super::features::{FeatureVector, FEATURE_COUNT};

type Row = [f64; FEATURE_COUNT];

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Output of a model evaluation. Lower scores are more anomalous; anything
/// below zero is flagged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelScore {
    pub score: f64,
    pub is_anomaly: bool,
}

pub trait RiskModel: Send + Sync {
    fn score(&self, features: &FeatureVector) -> eyre::Result<ModelScore>;
}

// ============================================================
// Scaling
// ============================================================

/// Per-feature standardization with fixed, pre-computed mean and deviation.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    mean: Row,
    std: Row,
}

impl StandardScaler {
    pub fn fit(rows: &[Row]) -> eyre::Result<Self> {
        if rows.is_empty() {
            return Err(eyre::eyre!("Cannot fit scaler on empty data"));
        }
        let n = rows.len() as f64;
        let mut mean = [0.0; FEATURE_COUNT];
        let mut std = [0.0; FEATURE_COUNT];

        for j in 0..FEATURE_COUNT {
            mean[j] = rows.iter().map(|r| r[j]).sum::<f64>() / n;
            let var = rows.iter().map(|r| (r[j] - mean[j]).powi(2)).sum::<f64>() / n;
            // Constant columns pass through centered but unscaled
            std[j] = if var > 0.0 { var.sqrt() } else { 1.0 };
        }

        Ok(Self { mean, std })
    }

    pub fn transform(&self, row: &Row) -> Row {
        let mut out = [0.0; FEATURE_COUNT];
        for j in 0..FEATURE_COUNT {
            out[j] = (row[j] - self.mean[j]) / self.std[j];
        }
        out
    }
}

// ============================================================
// Isolation forest
// ============================================================

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn build(rows: &[&Row], depth: usize, height_limit: usize, rng: &mut StdRng) -> Self {
        if depth >= height_limit || rows.len() <= 1 {
            return Node::Leaf { size: rows.len() };
        }

        // Only features that still vary within this partition can split it
        let candidates: Vec<(usize, f64, f64)> = (0..FEATURE_COUNT)
            .filter_map(|j| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
                    (lo.min(r[j]), hi.max(r[j]))
                });
                (hi > lo).then_some((j, lo, hi))
            })
            .collect();

        if candidates.is_empty() {
            return Node::Leaf { size: rows.len() };
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left, right): (Vec<&Row>, Vec<&Row>) =
            rows.iter().copied().partition(|r| r[feature] < threshold);

        Node::Split {
            feature,
            threshold,
            left: Box::new(Node::build(&left, depth + 1, height_limit, rng)),
            right: Box::new(Node::build(&right, depth + 1, height_limit, rng)),
        }
    }

    fn path_length(&self, row: &Row) -> f64 {
        let mut node = self;
        let mut depth = 0.0;
        loop {
            match node {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] < *threshold { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
    /// Training-score percentile at the contamination rate; the decision boundary.
    offset: f64,
}

impl IsolationForest {
    pub fn fit(
        rows: &[Row],
        trees: usize,
        sample_size: usize,
        contamination: f64,
        rng: &mut StdRng,
    ) -> eyre::Result<Self> {
        if rows.len() < 2 {
            return Err(eyre::eyre!(
                "Isolation forest needs at least 2 training rows, got {}",
                rows.len()
            ));
        }
        let sample_size = sample_size.min(rows.len());
        let height_limit = (sample_size as f64).log2().ceil() as usize;

        let trees = (0..trees)
            .map(|_| {
                let sample: Vec<&Row> = rand::seq::index::sample(rng, rows.len(), sample_size)
                    .into_iter()
                    .map(|i| &rows[i])
                    .collect();
                Node::build(&sample, 0, height_limit, rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            offset: 0.0,
        };

        let mut training_scores: Vec<f64> = rows.iter().map(|r| forest.score_sample(r)).collect();
        training_scores.sort_by(|a, b| a.total_cmp(b));
        forest.offset = percentile(&training_scores, contamination);

        Ok(forest)
    }

    /// `-2^(-E[h(x)] / c(psi))`: close to -1 for outliers, near -0.5 for inliers.
    pub fn score_sample(&self, row: &Row) -> f64 {
        let mean_path = self.trees.iter().map(|t| t.path_length(row)).sum::<f64>()
            / self.trees.len() as f64;
        -(2f64.powf(-mean_path / average_path_length(self.sample_size)))
    }

    /// Positive for inliers, negative for outliers.
    pub fn decision(&self, row: &Row) -> f64 {
        self.score_sample(row) - self.offset
    }
}

/// Linear-interpolated quantile `q` (0..=1) of ascending `sorted`.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

// ============================================================
// Fitted model
// ============================================================

pub struct IsolationForestModel {
    scaler: StandardScaler,
    forest: IsolationForest,
}

impl IsolationForestModel {
    pub fn fit(rows: &[Row], config: &ModelConfig, rng: &mut StdRng) -> eyre::Result<Self> {
        let scaler = StandardScaler::fit(rows)?;
        let scaled: Vec<Row> = rows.iter().map(|r| scaler.transform(r)).collect();
        let forest = IsolationForest::fit(
            &scaled,
            config.trees,
            config.sample_size,
            config.contamination,
            rng,
        )?;
        Ok(Self { scaler, forest })
    }

    /// Fit on seeded synthetic data: 90% ordinary activity, 10% shaped like
    /// structuring (amounts near 10k, night hours, weekends, high velocity).
    pub fn fit_synthetic(config: &ModelConfig) -> eyre::Result<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let normal_count = config.training_samples * 9 / 10;
        let suspicious_count = config.training_samples / 10;

        let mut rows = Vec::with_capacity(normal_count + suspicious_count);
        for _ in 0..normal_count {
            rows.push(sample_diagonal_normal(
                &mut rng,
                &[5000.0, 12.0, 3.0, 0.0, 2.0],
                &[1_000_000.0, 36.0, 4.0, 1.0, 1.0],
            ));
        }
        for _ in 0..suspicious_count {
            rows.push(sample_diagonal_normal(
                &mut rng,
                &[9500.0, 2.0, 6.0, 1.0, 8.0],
                &[500_000.0, 9.0, 1.0, 1.0, 4.0],
            ));
        }

        let model = Self::fit(&rows, config, &mut rng)?;
        tracing::info!(
            rows = rows.len(),
            trees = config.trees,
            offset = model.forest.offset,
            "Isolation forest fitted"
        );
        Ok(model)
    }
}

impl RiskModel for IsolationForestModel {
    fn score(&self, features: &FeatureVector) -> eyre::Result<ModelScore> {
        let scaled = self.scaler.transform(features.values());
        if scaled.iter().any(|v| !v.is_finite()) {
            return Err(eyre::eyre!("Non-finite scaled features: {:?}", scaled));
        }
        let score = self.forest.decision(&scaled);
        Ok(ModelScore {
            score,
            is_anomaly: score < 0.0,
        })
    }
}

/// One draw from N(mean, diag(variance)) via Box-Muller.
fn sample_diagonal_normal(rng: &mut StdRng, mean: &Row, variance: &Row) -> Row {
    let mut row = [0.0; FEATURE_COUNT];
    for j in 0..FEATURE_COUNT {
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = rng.gen::<f64>();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        row[j] = mean[j] + z * variance[j].sqrt();
    }
    row
}
