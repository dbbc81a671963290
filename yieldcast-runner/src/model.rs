//! Ensemble yield model.
//!
//! The regression target is a closed-form function of the model's own
//! inputs (historical mean plus NDVI terms), so training reproduces a
//! known surface rather than learning from ground truth. That is the
//! contract: a placeholder for a future pipeline with held-out truth,
//! kept exactly reproducible. Fit on the full feature set, predict on
//! the same rows, fixed master seed.

use crate::features::{build_features, FeatureRow};
use crate::store::{Store, StoreError};
use rand::Rng;
use yieldcast_core::seed::SeedHierarchy;

pub const ENSEMBLE_TREES: usize = 100;
pub const ENSEMBLE_SEED: u64 = 42;

/// Reference NDVI subtracted in the target formula.
const TARGET_NDVI_BASE: f64 = 0.7;
const TARGET_NDVI_GAIN: f64 = 100.0;
const TARGET_TREND_GAIN: f64 = 1000.0;

/// Hard depth cap; with per-field training rows the trees stay tiny.
const MAX_TREE_DEPTH: usize = 16;

/// One field's rounded prediction.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct YieldForecast {
    pub field_id: String,
    pub yield_pred: f64,
}

/// Forecast table plus the historical baseline it was built around.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Forecast {
    pub predictions: Vec<YieldForecast>,
    pub historical_mean_yield: f64,
}

/// Fit the ensemble on the store's feature rows and predict them back.
pub fn train_and_predict(store: &Store) -> Result<Forecast, StoreError> {
    let features = build_features(store)?;
    let yields = store.yield_values()?;
    let historical_mean_yield = if yields.is_empty() {
        0.0
    } else {
        yields.iter().sum::<f64>() / yields.len() as f64
    };

    if features.is_empty() {
        return Ok(Forecast {
            predictions: Vec::new(),
            historical_mean_yield,
        });
    }

    let xs: Vec<[f64; 3]> = features
        .iter()
        .map(|f| [f.ndvi_latest, f.ndvi_trend, f.gdd_total])
        .collect();
    let ys: Vec<f64> = features
        .iter()
        .map(|f| synthetic_target(f, historical_mean_yield))
        .collect();

    let forest = RandomForest::fit(&xs, &ys, ENSEMBLE_TREES, &SeedHierarchy::new(ENSEMBLE_SEED));

    let predictions = features
        .iter()
        .zip(&xs)
        .map(|(f, x)| YieldForecast {
            field_id: f.field_id.clone(),
            yield_pred: round1(forest.predict(x)),
        })
        .collect();

    Ok(Forecast {
        predictions,
        historical_mean_yield,
    })
}

fn synthetic_target(f: &FeatureRow, historical_mean: f64) -> f64 {
    historical_mean
        + (f.ndvi_latest - TARGET_NDVI_BASE) * TARGET_NDVI_GAIN
        + f.ndvi_trend * TARGET_TREND_GAIN
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

// ─── Random forest ───────────────────────────────────────────────────

#[derive(Debug)]
enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn predict(&self, x: &[f64; 3]) -> f64 {
        match self {
            TreeNode::Leaf { value } => *value,
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if x[*feature] <= *threshold {
                    left.predict(x)
                } else {
                    right.predict(x)
                }
            }
        }
    }
}

/// Bagged ensemble of CART regression trees over the three features.
/// Per-tree seeds come from the hash hierarchy, so fitting is fully
/// deterministic for a given master seed and input order.
pub struct RandomForest {
    trees: Vec<TreeNode>,
}

impl RandomForest {
    pub fn fit(xs: &[[f64; 3]], ys: &[f64], n_trees: usize, seeds: &SeedHierarchy) -> Self {
        let n = xs.len();
        let trees = (0..n_trees)
            .map(|i| {
                let mut rng = seeds.rng_for("tree", i as u64);
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                build_tree(xs, ys, &sample, 0)
            })
            .collect();
        Self { trees }
    }

    pub fn predict(&self, x: &[f64; 3]) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.predict(x)).sum();
        sum / self.trees.len() as f64
    }
}

fn mean_of(ys: &[f64], indices: &[usize]) -> f64 {
    indices.iter().map(|&i| ys[i]).sum::<f64>() / indices.len() as f64
}

fn sse_of(ys: &[f64], indices: &[usize]) -> f64 {
    let mean = mean_of(ys, indices);
    indices.iter().map(|&i| (ys[i] - mean).powi(2)).sum()
}

fn build_tree(xs: &[[f64; 3]], ys: &[f64], indices: &[usize], depth: usize) -> TreeNode {
    let mean = mean_of(ys, indices);
    if depth >= MAX_TREE_DEPTH || indices.len() < 2 {
        return TreeNode::Leaf { value: mean };
    }
    if indices.iter().all(|&i| ys[i] == ys[indices[0]]) {
        return TreeNode::Leaf { value: mean };
    }

    let Some((feature, threshold)) = best_split(xs, ys, indices) else {
        return TreeNode::Leaf { value: mean };
    };

    let (left, right): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .copied()
        .partition(|&i| xs[i][feature] <= threshold);

    TreeNode::Split {
        feature,
        threshold,
        left: Box::new(build_tree(xs, ys, &left, depth + 1)),
        right: Box::new(build_tree(xs, ys, &right, depth + 1)),
    }
}

/// Exhaustive split search: every feature, midpoints between adjacent
/// distinct values, minimum summed SSE. Ties resolve to the first
/// candidate in (feature, threshold) order, keeping trees deterministic.
fn best_split(xs: &[[f64; 3]], ys: &[f64], indices: &[usize]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64, f64)> = None;

    for feature in 0..3 {
        let mut values: Vec<f64> = indices.iter().map(|&i| xs[i][feature]).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup();

        for pair in values.windows(2) {
            let threshold = (pair[0] + pair[1]) / 2.0;
            let (left, right): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .copied()
                .partition(|&i| xs[i][feature] <= threshold);
            if left.is_empty() || right.is_empty() {
                continue;
            }
            let score = sse_of(ys, &left) + sse_of(ys, &right);
            if best.map_or(true, |(_, _, s)| score < s) {
                best = Some((feature, threshold, score));
            }
        }
    }

    best.map(|(feature, threshold, _)| (feature, threshold))
}
