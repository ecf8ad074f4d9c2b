//! Isolation forest over fixed-width feature vectors
//!
//! Each tree isolates a random subsample by splitting on a random feature at a
//! random value inside the node's range. Records that separate from the rest
//! in few splits get short average paths and high scores.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::Rng;

/// Euler-Mascheroni constant, used in the harmonic number approximation
const EULER_GAMMA: f64 = 0.577_215_664_9;

/// Average path length of an unsuccessful binary search tree lookup among `n` points.
///
/// Normalises isolation depths and completes the path of records that end
/// in a leaf holding more than one point.
pub fn average_path_length(n: usize) -> f64 {
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
enum Node {
    Internal {
        feature: usize,
        split: f64,
        left: usize,
        right: usize,
    },
    External {
        size: usize,
    },
}

/// One randomized partition tree, stored as an arena with the root at index 0
#[derive(Debug, Clone)]
pub struct IsolationTree {
    nodes: Vec<Node>,
    height_limit: usize,
}

impl IsolationTree {
    /// Grow a tree over `indices` into `points`.
    pub fn grow<const N: usize>(
        points: &[[f64; N]],
        indices: Vec<usize>,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            height_limit,
        };
        tree.grow_node(points, indices, 0, rng);
        tree
    }

    fn grow_node<const N: usize>(
        &mut self,
        points: &[[f64; N]],
        indices: Vec<usize>,
        depth: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();

        if depth >= self.height_limit || indices.len() <= 1 {
            self.nodes.push(Node::External {
                size: indices.len(),
            });
            return id;
        }

        let Some((feature, lo, hi)) = pick_split_feature(points, &indices, rng) else {
            // Every feature is constant: nothing left to separate
            self.nodes.push(Node::External {
                size: indices.len(),
            });
            return id;
        };

        // lo <= split < hi, so both sides are non-empty
        let split = rng.gen_range(lo..hi);
        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| points[i][feature] <= split);

        self.nodes.push(Node::External { size: 0 });
        let left_id = self.grow_node(points, left, depth + 1, rng);
        let right_id = self.grow_node(points, right, depth + 1, rng);
        self.nodes[id] = Node::Internal {
            feature,
            split,
            left: left_id,
            right: right_id,
        };

        id
    }

    /// Isolation depth of `point`, including the leaf size adjustment
    pub fn path_length<const N: usize>(&self, point: &[f64; N]) -> f64 {
        let mut node = 0;
        let mut depth = 0usize;

        loop {
            match &self.nodes[node] {
                Node::Internal {
                    feature,
                    split,
                    left,
                    right,
                } => {
                    node = if point[*feature] <= *split { *left } else { *right };
                    depth += 1;
                }
                Node::External { size } => {
                    return depth as f64 + average_path_length(*size);
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn height_limit(&self) -> usize {
        self.height_limit
    }
}

/// Choose uniformly among features that vary within the node.
fn pick_split_feature<const N: usize>(
    points: &[[f64; N]],
    indices: &[usize],
    rng: &mut StdRng,
) -> Option<(usize, f64, f64)> {
    let candidates: Vec<(usize, f64, f64)> = (0..N)
        .filter_map(|feature| {
            let (lo, hi) = indices.iter().fold(
                (f64::INFINITY, f64::NEG_INFINITY),
                |(lo, hi), &i| (lo.min(points[i][feature]), hi.max(points[i][feature])),
            );
            (hi > lo).then_some((feature, lo, hi))
        })
        .collect();

    if candidates.is_empty() {
        return None;
    }
    Some(candidates[rng.gen_range(0..candidates.len())])
}

/// Ensemble of isolation trees fitted on one batch
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
}

impl IsolationForest {
    /// Fit `n_trees` trees, each on `min(max_samples, points.len())` records
    /// drawn without replacement.
    ///
    /// Trees are grown in order from the single `rng`, so a fixed seed gives
    /// a fixed forest.
    pub fn fit<const N: usize>(
        points: &[[f64; N]],
        n_trees: usize,
        max_samples: usize,
        rng: &mut StdRng,
    ) -> Self {
        let sample_size = max_samples.min(points.len());
        let height_limit = (sample_size.max(2) as f64).log2().ceil() as usize;

        let trees = (0..n_trees)
            .map(|_| {
                let sample = index::sample(rng, points.len(), sample_size).into_vec();
                IsolationTree::grow(points, sample, height_limit, rng)
            })
            .collect();

        Self { trees, sample_size }
    }

    /// Mean path length across the ensemble
    pub fn mean_path_length<const N: usize>(&self, point: &[f64; N]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self.trees.iter().map(|t| t.path_length(point)).sum();
        total / self.trees.len() as f64
    }

    /// Anomaly score `2^(-E[h] / c(sample_size))`, higher is more anomalous
    pub fn score<const N: usize>(&self, point: &[f64; N]) -> f64 {
        let normaliser = average_path_length(self.sample_size);
        if normaliser <= 0.0 {
            return 0.5;
        }
        2f64.powf(-self.mean_path_length(point) / normaliser)
    }

    pub fn score_all<const N: usize>(&self, points: &[[f64; N]]) -> Vec<f64> {
        points.iter().map(|p| self.score(p)).collect()
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }
}
