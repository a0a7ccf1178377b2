//! Pluggable regression model used by GLCache to predict segment utility.
//!
//! [`Regressor`] is the seam: GLCache owns a `Box<dyn Regressor>`, fills a
//! [`TrainingData`] with one row per sampled segment, calls [`Regressor::fit`]
//! once per retraining interval and [`Regressor::predict`] once per segment
//! per ranking.
//!
//! The bundled model, [`GradientBoostedTrees`], is a small squared-error
//! gradient-boosting regressor:
//!
//! ```text
//!   f0(x)   = mean(y)
//!   round r:
//!     residual_i = y_i - f(x_i)
//!     tree_r     = greedy regression tree on (x, residual), depth ≤ max_depth
//!     f(x)      += learning_rate * tree_r(x)
//!     stop when validation RMSE changes < 1% for 3 consecutive rounds
//! ```
//!
//! Leaf weights use an L2 penalty: `w = Σ residual / (n + lambda)`; a split
//! is kept only if it lowers `Σ G² / (n + lambda)` loss.

use crate::error::RegressorError;

/// Row-major feature matrices plus labels, split into training and
/// validation parts.
#[derive(Debug, Clone, Default)]
pub struct TrainingData {
    n_feature: usize,
    pub train_x: Vec<f32>,
    pub train_y: Vec<f32>,
    pub valid_x: Vec<f32>,
    pub valid_y: Vec<f32>,
}

impl TrainingData {
    pub fn new(n_feature: usize) -> Self {
        Self {
            n_feature,
            ..Self::default()
        }
    }

    #[inline]
    pub fn n_feature(&self) -> usize {
        self.n_feature
    }

    pub fn n_train(&self) -> usize {
        self.train_y.len()
    }

    pub fn n_valid(&self) -> usize {
        self.valid_y.len()
    }

    pub fn push_train(&mut self, row: &[f32], y: f32) {
        debug_assert_eq!(row.len(), self.n_feature);
        self.train_x.extend_from_slice(row);
        self.train_y.push(y);
    }

    pub fn push_valid(&mut self, row: &[f32], y: f32) {
        debug_assert_eq!(row.len(), self.n_feature);
        self.valid_x.extend_from_slice(row);
        self.valid_y.push(y);
    }

    pub fn train_row(&self, i: usize) -> &[f32] {
        &self.train_x[i * self.n_feature..(i + 1) * self.n_feature]
    }

    pub fn valid_row(&self, i: usize) -> &[f32] {
        &self.valid_x[i * self.n_feature..(i + 1) * self.n_feature]
    }

    pub fn clear(&mut self) {
        self.train_x.clear();
        self.train_y.clear();
        self.valid_x.clear();
        self.valid_y.clear();
    }

    fn validate(&self) -> Result<(), RegressorError> {
        if self.n_feature == 0 {
            return Err(RegressorError::new("training data has no features"));
        }
        if self.train_y.is_empty() {
            return Err(RegressorError::new("no training rows"));
        }
        if self.train_x.len() != self.train_y.len() * self.n_feature
            || self.valid_x.len() != self.valid_y.len() * self.n_feature
        {
            return Err(RegressorError::new(format!(
                "feature matrix does not match {} features per row",
                self.n_feature
            )));
        }
        let finite = |v: &[f32]| v.iter().all(|x| x.is_finite());
        if !finite(&self.train_y) || !finite(&self.valid_y) {
            return Err(RegressorError::new("labels must be finite"));
        }
        if !finite(&self.train_x) || !finite(&self.valid_x) {
            return Err(RegressorError::new("features must be finite"));
        }
        Ok(())
    }
}

/// A model that can be refit on demand and queried per feature row.
pub trait Regressor: Send {
    fn name(&self) -> &str;

    /// Replaces the current model with one fit on `data`.
    fn fit(&mut self, data: &TrainingData) -> Result<(), RegressorError>;

    /// Predicts the label of one row. Unfitted models return 0.
    fn predict(&self, features: &[f32]) -> f32;

    fn is_fitted(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GbtParams {
    pub max_rounds: usize,
    pub max_depth: usize,
    pub learning_rate: f32,
    pub lambda: f32,
    pub min_rows_per_leaf: usize,
    /// Relative change in validation RMSE treated as "no progress".
    pub stable_tolerance: f64,
    /// Consecutive stable rounds before stopping.
    pub stable_rounds: usize,
    /// Validation rows needed before early stopping is considered.
    pub min_valid_rows: usize,
}

impl Default for GbtParams {
    fn default() -> Self {
        Self {
            max_rounds: 20,
            max_depth: 6,
            learning_rate: 0.3,
            lambda: 1.0,
            min_rows_per_leaf: 1,
            stable_tolerance: 0.01,
            stable_rounds: 3,
            min_valid_rows: 10,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Node {
    Leaf(f32),
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Default)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, x: &[f32]) -> f32 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf(w)) => return *w,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let v = x.get(*feature).copied().unwrap_or(0.0);
                    idx = if v < *threshold { *left } else { *right };
                },
                None => return 0.0,
            }
        }
    }
}

struct BestSplit {
    feature: usize,
    threshold: f32,
    n_left: usize,
}

/// Squared-error gradient-boosted regression trees.
#[derive(Debug, Clone, Default)]
pub struct GradientBoostedTrees {
    params: GbtParams,
    base_score: f32,
    trees: Vec<Tree>,
    fitted: bool,
}

impl GradientBoostedTrees {
    pub fn new() -> Self {
        Self::with_params(GbtParams::default())
    }

    pub fn with_params(params: GbtParams) -> Self {
        Self {
            params,
            base_score: 0.0,
            trees: Vec::new(),
            fitted: false,
        }
    }

    pub fn params(&self) -> &GbtParams {
        &self.params
    }

    /// Boosting rounds kept by the last fit.
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn build_node(
        &self,
        nodes: &mut Vec<Node>,
        data: &TrainingData,
        rows: &mut [usize],
        residual: &[f32],
        depth: usize,
    ) -> usize {
        let lambda = self.params.lambda;
        let sum: f32 = rows.iter().map(|&i| residual[i]).sum();
        let leaf = Node::Leaf(self.params.learning_rate * sum / (rows.len() as f32 + lambda));

        let split = if depth < self.params.max_depth
            && rows.len() >= 2 * self.params.min_rows_per_leaf
        {
            self.find_split(data, rows, residual, sum)
        } else {
            None
        };
        let Some(split) = split else {
            nodes.push(leaf);
            return nodes.len() - 1;
        };

        rows.sort_unstable_by(|&a, &b| {
            data.train_row(a)[split.feature].total_cmp(&data.train_row(b)[split.feature])
        });
        let me = nodes.len();
        nodes.push(leaf);
        let (lo, hi) = rows.split_at_mut(split.n_left);
        let left = self.build_node(nodes, data, lo, residual, depth + 1);
        let right = self.build_node(nodes, data, hi, residual, depth + 1);
        nodes[me] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        me
    }

    fn find_split(
        &self,
        data: &TrainingData,
        rows: &[usize],
        residual: &[f32],
        sum: f32,
    ) -> Option<BestSplit> {
        let lambda = f64::from(self.params.lambda);
        let n = rows.len();
        let min_leaf = self.params.min_rows_per_leaf.max(1);
        let parent_score = f64::from(sum).powi(2) / (n as f64 + lambda);

        let mut best: Option<(f64, BestSplit)> = None;
        let mut sorted = rows.to_vec();
        for feature in 0..data.n_feature() {
            let value = |i: usize| data.train_row(i)[feature];
            sorted.sort_unstable_by(|&a, &b| value(a).total_cmp(&value(b)));

            let mut left_sum = 0.0f64;
            for k in 0..n - 1 {
                left_sum += f64::from(residual[sorted[k]]);
                let n_left = k + 1;
                let (v, next) = (value(sorted[k]), value(sorted[k + 1]));
                if v == next || n_left < min_leaf || n - n_left < min_leaf {
                    continue;
                }
                let right_sum = f64::from(sum) - left_sum;
                let gain = left_sum.powi(2) / (n_left as f64 + lambda)
                    + right_sum.powi(2) / ((n - n_left) as f64 + lambda)
                    - parent_score;
                if gain > 1e-12 && best.as_ref().is_none_or(|(g, _)| gain > *g) {
                    let threshold = v + (next - v) / 2.0;
                    // midpoint can round onto `v` for adjacent floats
                    let threshold = if threshold > v { threshold } else { next };
                    best = Some((
                        gain,
                        BestSplit {
                            feature,
                            threshold,
                            n_left,
                        },
                    ));
                }
            }
        }
        best.map(|(_, split)| split)
    }

    fn predict_rows(&self, x: &[f32], n_feature: usize, out: &mut [f32]) {
        for (i, p) in out.iter_mut().enumerate() {
            *p = self.predict(&x[i * n_feature..(i + 1) * n_feature]);
        }
    }
}

fn rmse(pred: &[f32], y: &[f32]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let sse: f64 = pred
        .iter()
        .zip(y)
        .map(|(p, t)| (f64::from(*p) - f64::from(*t)).powi(2))
        .sum();
    (sse / y.len() as f64).sqrt()
}

impl Regressor for GradientBoostedTrees {
    fn name(&self) -> &str {
        "gbt"
    }

    fn fit(&mut self, data: &TrainingData) -> Result<(), RegressorError> {
        data.validate()?;
        let n = data.n_train();
        let n_feature = data.n_feature();

        self.trees.clear();
        self.fitted = false;
        self.base_score = data.train_y.iter().sum::<f32>() / n as f32;

        let mut train_pred = vec![self.base_score; n];
        let mut valid_pred = vec![self.base_score; data.n_valid()];
        let mut residual = vec![0.0f32; n];
        let mut last_valid_loss = 0.0f64;
        let mut n_stable = 0usize;

        for _ in 0..self.params.max_rounds {
            for i in 0..n {
                residual[i] = data.train_y[i] - train_pred[i];
            }
            let mut nodes = Vec::new();
            let mut rows: Vec<usize> = (0..n).collect();
            self.build_node(&mut nodes, data, &mut rows, &residual, 0);
            let tree = Tree { nodes };

            for (i, p) in train_pred.iter_mut().enumerate() {
                *p += tree.predict(data.train_row(i));
            }
            for (i, p) in valid_pred.iter_mut().enumerate() {
                *p += tree.predict(data.valid_row(i));
            }
            self.trees.push(tree);

            if data.n_valid() < self.params.min_valid_rows {
                continue;
            }
            let valid_loss = rmse(&valid_pred, &data.valid_y);
            let stable = valid_loss == 0.0
                || (last_valid_loss - valid_loss).abs() / valid_loss < self.params.stable_tolerance;
            if stable {
                n_stable += 1;
                if n_stable >= self.params.stable_rounds {
                    break;
                }
            } else {
                n_stable = 0;
            }
            last_valid_loss = valid_loss;
        }

        let mut check = vec![0.0f32; n];
        self.fitted = true;
        self.predict_rows(&data.train_x, n_feature, &mut check);
        if check.iter().any(|p| !p.is_finite()) {
            self.fitted = false;
            self.trees.clear();
            return Err(RegressorError::new("model produced non-finite predictions"));
        }
        Ok(())
    }

    fn predict(&self, features: &[f32]) -> f32 {
        if !self.fitted {
            return 0.0;
        }
        self.base_score + self.trees.iter().map(|t| t.predict(features)).sum::<f32>()
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data(n: usize) -> TrainingData {
        let mut data = TrainingData::new(2);
        for i in 0..n {
            let x0 = i as f32;
            let x1 = (i % 7) as f32;
            let y = if x0 < n as f32 / 2.0 { 1.0 } else { 5.0 };
            if i % 10 == 0 {
                data.push_valid(&[x0, x1], y);
            } else {
                data.push_train(&[x0, x1], y);
            }
        }
        data
    }

    #[test]
    fn test_unfitted_predicts_zero() {
        let model = GradientBoostedTrees::new();
        assert!(!model.is_fitted());
        assert_eq!(model.predict(&[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_learns_a_step() {
        let data = step_data(200);
        let mut model = GradientBoostedTrees::new();
        model.fit(&data).unwrap();
        assert!(model.is_fitted());
        assert!(model.n_trees() >= 1 && model.n_trees() <= 20);
        assert!((model.predict(&[10.0, 3.0]) - 1.0).abs() < 0.5);
        assert!((model.predict(&[190.0, 3.0]) - 5.0).abs() < 0.5);
        assert!(model.predict(&[10.0, 0.0]) < model.predict(&[150.0, 0.0]));
    }

    #[test]
    fn test_early_stop_on_stable_validation() {
        // constant labels: the first round is already exact
        let mut data = TrainingData::new(1);
        for i in 0..100 {
            if i % 10 == 0 {
                data.push_valid(&[i as f32], 3.0);
            } else {
                data.push_train(&[i as f32], 3.0);
            }
        }
        let mut model = GradientBoostedTrees::new();
        model.fit(&data).unwrap();
        assert_eq!(model.n_trees(), 3);
        assert!((model.predict(&[42.0]) - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_refit_replaces_model() {
        let mut model = GradientBoostedTrees::new();
        model.fit(&step_data(100)).unwrap();
        let mut flipped = TrainingData::new(2);
        for i in 0..50 {
            flipped.push_train(&[i as f32, 0.0], -2.0);
        }
        model.fit(&flipped).unwrap();
        assert!((model.predict(&[10.0, 0.0]) + 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_rejects_bad_data() {
        let mut model = GradientBoostedTrees::new();
        let err = model.fit(&TrainingData::new(3)).unwrap_err();
        assert!(err.message().contains("no training rows"));

        let mut nan = TrainingData::new(1);
        nan.push_train(&[1.0], f32::NAN);
        assert!(model.fit(&nan).is_err());
        assert!(!model.is_fitted());

        let mut ragged = TrainingData::new(2);
        ragged.train_x.push(1.0);
        ragged.train_y.push(1.0);
        assert!(model.fit(&ragged).is_err());
    }
}
