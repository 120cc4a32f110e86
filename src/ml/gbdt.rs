//! Gradient-boosted decision trees for binary classification
//!
//! Logistic loss, second-order leaf weights with L1/L2 regularisation,
//! trees grown leaf-wise (best gain first) on histogram-binned features.
//! Parameter names follow the usual boosting vocabulary so stored
//! hyperparameters read the same as in any GBDT library.

use crate::error::{PipelineError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const MAX_BINS: usize = 64;
const MIN_CHILD_WEIGHT: f64 = 1e-3;

/// Boosting hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    /// Maximum leaves per tree
    pub num_leaves: usize,
    /// Depth limit; `None` means only `num_leaves` bounds the tree
    #[serde(default)]
    pub max_depth: Option<usize>,
    pub min_child_samples: usize,
    /// Row sampling fraction per tree
    pub subsample: f64,
    pub reg_alpha: f64,
    pub reg_lambda: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            num_leaves: 31,
            max_depth: None,
            min_child_samples: 20,
            subsample: 1.0,
            reg_alpha: 0.0,
            reg_lambda: 0.0,
        }
    }
}

impl BoostingParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(PipelineError::Config("n_estimators must be > 0".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(PipelineError::Config("learning_rate must be > 0".into()));
        }
        if self.num_leaves < 2 {
            return Err(PipelineError::Config("num_leaves must be >= 2".into()));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(PipelineError::Config("subsample must be in (0, 1]".into()));
        }
        if self.reg_alpha < 0.0 || self.reg_lambda < 0.0 {
            return Err(PipelineError::Config(
                "regularisation terms must be >= 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

/// Fitted boosted-tree classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostedClassifier {
    params: BoostingParams,
    scale_pos_weight: f64,
    n_features: usize,
    base_score: f64,
    trees: Vec<Tree>,
    importances: Vec<f64>,
}

/// Pre-binned training matrix, column-major
struct BinnedData {
    bins: Vec<Vec<u8>>,
    thresholds: Vec<Vec<f64>>,
}

impl BinnedData {
    fn new(x: &[Vec<f64>], n_features: usize) -> Self {
        let mut bins = Vec::with_capacity(n_features);
        let mut thresholds = Vec::with_capacity(n_features);
        for f in 0..n_features {
            let column: Vec<f64> = x.iter().map(|r| r[f]).collect();
            let cuts = bin_thresholds(&column);
            bins.push(
                column
                    .iter()
                    .map(|v| cuts.partition_point(|t| t < v) as u8)
                    .collect(),
            );
            thresholds.push(cuts);
        }
        Self { bins, thresholds }
    }
}

/// Cut points such that bin `b` holds values `<= cuts[b]`
fn bin_thresholds(column: &[f64]) -> Vec<f64> {
    let mut sorted = column.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut unique = sorted.clone();
    unique.dedup();
    if unique.len() <= 1 {
        return Vec::new();
    }
    if unique.len() <= MAX_BINS {
        return unique.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
    }
    let n = sorted.len();
    let mut cuts: Vec<f64> = (1..MAX_BINS)
        .map(|q| sorted[(q * n / MAX_BINS).min(n - 1)])
        .collect();
    cuts.dedup();
    let max = unique[unique.len() - 1];
    cuts.retain(|c| *c < max);
    cuts
}

#[derive(Debug, Clone, Copy, Default)]
struct Stats {
    grad: f64,
    hess: f64,
    count: usize,
}

impl Stats {
    fn add(&mut self, g: f64, h: f64) {
        self.grad += g;
        self.hess += h;
        self.count += 1;
    }

    fn minus(&self, other: &Stats) -> Stats {
        Stats {
            grad: self.grad - other.grad,
            hess: self.hess - other.hess,
            count: self.count - other.count,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

struct OpenLeaf {
    node: usize,
    rows: Vec<usize>,
    depth: usize,
    stats: Stats,
    split: Option<SplitCandidate>,
}

fn soft_threshold(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

struct Grower<'a> {
    params: &'a BoostingParams,
    data: &'a BinnedData,
    grad: &'a [f64],
    hess: &'a [f64],
}

impl Grower<'_> {
    fn score(&self, s: &Stats) -> f64 {
        let g = soft_threshold(s.grad, self.params.reg_alpha);
        g * g / (s.hess + self.params.reg_lambda)
    }

    fn leaf_value(&self, s: &Stats) -> f64 {
        let denom = s.hess + self.params.reg_lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        -soft_threshold(s.grad, self.params.reg_alpha) / denom * self.params.learning_rate
    }

    fn stats(&self, rows: &[usize]) -> Stats {
        let mut s = Stats::default();
        for &r in rows {
            s.add(self.grad[r], self.hess[r]);
        }
        s
    }

    fn best_split(&self, rows: &[usize], total: &Stats, depth: usize) -> Option<SplitCandidate> {
        if let Some(max_depth) = self.params.max_depth {
            if depth >= max_depth {
                return None;
            }
        }
        let min_child = self.params.min_child_samples.max(1);
        if total.count < 2 * min_child {
            return None;
        }
        let parent = self.score(total);
        let mut best: Option<SplitCandidate> = None;

        for (feature, cuts) in self.data.thresholds.iter().enumerate() {
            if cuts.is_empty() {
                continue;
            }
            let column = &self.data.bins[feature];
            let mut hist = vec![Stats::default(); cuts.len() + 1];
            for &r in rows {
                hist[column[r] as usize].add(self.grad[r], self.hess[r]);
            }
            let mut left = Stats::default();
            for (bin, h) in hist.iter().enumerate().take(cuts.len()) {
                left.grad += h.grad;
                left.hess += h.hess;
                left.count += h.count;
                let right = total.minus(&left);
                if left.count < min_child || right.count < min_child {
                    continue;
                }
                if left.hess < MIN_CHILD_WEIGHT || right.hess < MIN_CHILD_WEIGHT {
                    continue;
                }
                let gain = self.score(&left) + self.score(&right) - parent;
                if gain > 0.0 && best.map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate { feature, bin, gain });
                }
            }
        }
        best
    }

    fn grow(&self, rows: Vec<usize>, importances: &mut [f64]) -> Tree {
        let root_stats = self.stats(&rows);
        let mut nodes = vec![Node::Leaf {
            value: self.leaf_value(&root_stats),
        }];
        let mut open = vec![OpenLeaf {
            node: 0,
            split: self.best_split(&rows, &root_stats, 0),
            rows,
            depth: 0,
            stats: root_stats,
        }];
        let mut leaves = 1;

        while leaves < self.params.num_leaves {
            let pick = open
                .iter()
                .enumerate()
                .filter_map(|(i, l)| l.split.map(|s| (i, s.gain)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i);
            let Some(pick) = pick else {
                break;
            };
            let leaf = open.swap_remove(pick);
            let Some(split) = leaf.split else {
                break;
            };

            let column = &self.data.bins[split.feature];
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = leaf
                .rows
                .iter()
                .partition(|&&r| (column[r] as usize) <= split.bin);
            let left_stats = self.stats(&left_rows);
            let right_stats = leaf.stats.minus(&left_stats);

            let left_idx = nodes.len();
            nodes.push(Node::Leaf {
                value: self.leaf_value(&left_stats),
            });
            let right_idx = nodes.len();
            nodes.push(Node::Leaf {
                value: self.leaf_value(&right_stats),
            });
            nodes[leaf.node] = Node::Split {
                feature: split.feature,
                threshold: self.data.thresholds[split.feature][split.bin],
                left: left_idx,
                right: right_idx,
            };
            importances[split.feature] += split.gain;
            leaves += 1;

            let depth = leaf.depth + 1;
            open.push(OpenLeaf {
                node: left_idx,
                split: self.best_split(&left_rows, &left_stats, depth),
                rows: left_rows,
                depth,
                stats: left_stats,
            });
            open.push(OpenLeaf {
                node: right_idx,
                split: self.best_split(&right_rows, &right_stats, depth),
                rows: right_rows,
                depth,
                stats: right_stats,
            });
        }

        Tree { nodes }
    }
}

impl GradientBoostedClassifier {
    /// Fit on dense rows `x` with 0/1 labels `y`.
    ///
    /// Positive rows are weighted by `scale_pos_weight`.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        params: &BoostingParams,
        scale_pos_weight: f64,
        seed: u64,
    ) -> Result<Self> {
        params.validate()?;
        if x.is_empty() {
            return Err(PipelineError::Data("cannot fit on zero rows".into()));
        }
        if x.len() != y.len() {
            return Err(PipelineError::Data(format!(
                "{} rows but {} labels",
                x.len(),
                y.len()
            )));
        }
        let n_features = x[0].len();
        if x.iter().any(|r| r.len() != n_features) {
            return Err(PipelineError::Data("ragged feature rows".into()));
        }
        if y.iter().any(|v| *v != 0.0 && *v != 1.0) {
            return Err(PipelineError::Data("labels must be 0 or 1".into()));
        }
        if !(scale_pos_weight > 0.0 && scale_pos_weight.is_finite()) {
            return Err(PipelineError::Config(format!(
                "scale_pos_weight must be > 0, got {}",
                scale_pos_weight
            )));
        }

        let weights: Vec<f64> = y
            .iter()
            .map(|v| if *v == 1.0 { scale_pos_weight } else { 1.0 })
            .collect();
        let total_w: f64 = weights.iter().sum();
        let pos_w: f64 = weights.iter().zip(y).map(|(w, v)| w * v).sum();
        let p = (pos_w / total_w).clamp(1e-6, 1.0 - 1e-6);
        let base_score = (p / (1.0 - p)).ln();

        let data = BinnedData::new(x, n_features);
        let mut raw = vec![base_score; x.len()];
        let mut grad = vec![0.0; x.len()];
        let mut hess = vec![0.0; x.len()];
        let mut importances = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut rng = StdRng::seed_from_u64(seed);

        for _ in 0..params.n_estimators {
            for i in 0..x.len() {
                let p = sigmoid(raw[i]);
                grad[i] = weights[i] * (p - y[i]);
                hess[i] = (weights[i] * p * (1.0 - p)).max(1e-16);
            }

            let rows: Vec<usize> = if params.subsample < 1.0 {
                let sampled: Vec<usize> = (0..x.len())
                    .filter(|_| rng.random::<f64>() < params.subsample)
                    .collect();
                if sampled.is_empty() {
                    vec![rng.random_range(0..x.len())]
                } else {
                    sampled
                }
            } else {
                (0..x.len()).collect()
            };

            let grower = Grower {
                params,
                data: &data,
                grad: &grad,
                hess: &hess,
            };
            let tree = grower.grow(rows, &mut importances);
            for (r, row) in raw.iter_mut().zip(x) {
                *r += tree.predict(row);
            }
            trees.push(tree);
        }

        Ok(Self {
            params: params.clone(),
            scale_pos_weight,
            n_features,
            base_score,
            trees,
            importances,
        })
    }

    /// Probability of the positive class per row
    pub fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        rows.iter().map(|r| self.predict_one(r)).collect()
    }

    pub fn predict_one(&self, row: &[f64]) -> Result<f64> {
        if row.len() != self.n_features {
            return Err(PipelineError::Data(format!(
                "model expects {} features, got {}",
                self.n_features,
                row.len()
            )));
        }
        let raw = self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>();
        Ok(sigmoid(raw))
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    pub fn scale_pos_weight(&self) -> f64 {
        self.scale_pos_weight
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Total split gain per feature, in training column order
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    /// Feature names paired with importances, highest first
    pub fn ranked_importances(&self, names: &[String]) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = names
            .iter()
            .cloned()
            .zip(self.importances.iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
