//! Regression trees and the exact greedy depth-wise grower.
//!
//! Features are dense `f32` columns. A row goes left when its value is
//! strictly below the split threshold; NaN compares false and goes right.

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::gain::GainParams;

// =============================================================================
// Tree
// =============================================================================

/// One node of a [`Tree`]. Children are indices into the tree's node vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: u32,
        threshold: f32,
        left: u32,
        right: u32,
    },
    Leaf {
        value: f32,
    },
}

/// A binary regression tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// A tree with a single leaf.
    pub fn leaf(value: f32) -> Self {
        Self {
            nodes: vec![Node::Leaf { value }],
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }

    /// Depth of the deepest leaf; a single leaf has depth 0.
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => {
                    1 + walk(nodes, *left as usize).max(walk(nodes, *right as usize))
                }
            }
        }
        if self.nodes.is_empty() { 0 } else { walk(&self.nodes, 0) }
    }

    /// Leaf value reached by `row`.
    #[inline]
    pub fn predict_row(&self, row: ArrayView1<f32>) -> f32 {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature as usize] < *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
            }
        }
    }

    /// Check that every split feature is below `n_features` and every child
    /// index is in range and after its parent, so traversal terminates.
    pub(crate) fn is_well_formed(&self, n_features: usize) -> bool {
        let n_nodes = self.nodes.len();
        let child_ok = |idx: usize, child: u32| (child as usize) > idx && (child as usize) < n_nodes;
        n_nodes > 0
            && self.nodes.iter().enumerate().all(|(idx, node)| match node {
                Node::Leaf { .. } => true,
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => (*feature as usize) < n_features && child_ok(idx, *left) && child_ok(idx, *right),
            })
    }
}

// =============================================================================
// Grower
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f32,
    gain: f64,
}

/// Grows one tree from per-row gradients by exhaustive split enumeration.
pub(crate) struct TreeGrower<'a> {
    pub features: ArrayView2<'a, f32>,
    pub params: &'a GainParams,
    pub max_depth: u32,
    pub learning_rate: f32,
}

impl TreeGrower<'_> {
    pub fn grow(&self, gradients: &[f32], hessians: &[f32]) -> Tree {
        let rows: Vec<usize> = (0..self.features.nrows()).collect();
        let mut nodes = Vec::new();
        self.build_node(rows, 0, gradients, hessians, &mut nodes);
        Tree { nodes }
    }

    fn build_node(
        &self,
        rows: Vec<usize>,
        depth: u32,
        gradients: &[f32],
        hessians: &[f32],
        nodes: &mut Vec<Node>,
    ) -> u32 {
        let (grad_sum, hess_sum) = sums(&rows, gradients, hessians);
        let idx = nodes.len();
        nodes.push(Node::Leaf {
            value: self.learning_rate * self.params.compute_leaf_weight(grad_sum, hess_sum),
        });

        if depth >= self.max_depth || rows.len() < 2 {
            return idx as u32;
        }
        let Some(split) = self.find_best_split(&rows, gradients, hessians, grad_sum, hess_sum) else {
            return idx as u32;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.features[[r, split.feature]] < split.threshold);

        let left = self.build_node(left_rows, depth + 1, gradients, hessians, nodes);
        let right = self.build_node(right_rows, depth + 1, gradients, hessians, nodes);
        nodes[idx] = Node::Split {
            feature: split.feature as u32,
            threshold: split.threshold,
            left,
            right,
        };
        idx as u32
    }

    fn find_best_split(
        &self,
        rows: &[usize],
        gradients: &[f32],
        hessians: &[f32],
        grad_sum: f64,
        hess_sum: f64,
    ) -> Option<SplitCandidate> {
        let mut best: Option<SplitCandidate> = None;
        let mut order = rows.to_vec();

        for feature in 0..self.features.ncols() {
            let column = self.features.column(feature);
            order.sort_by(|&a, &b| column[a].total_cmp(&column[b]));

            let mut grad_left = 0.0f64;
            let mut hess_left = 0.0f64;
            for pair in order.windows(2) {
                let (cur, next) = (pair[0], pair[1]);
                grad_left += f64::from(gradients[cur]);
                hess_left += f64::from(hessians[cur]);

                // Split only between distinct, comparable values.
                let (v, v_next) = (column[cur], column[next]);
                if !(v < v_next) {
                    continue;
                }
                let grad_right = grad_sum - grad_left;
                let hess_right = hess_sum - hess_left;
                if !self.params.is_valid_split(hess_left, hess_right) {
                    continue;
                }
                let gain = self
                    .params
                    .compute_gain(grad_left, hess_left, grad_right, hess_right, grad_sum, hess_sum);
                if gain > 0.0 && best.is_none_or(|b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: v_next,
                        gain,
                    });
                }
            }
        }
        best
    }
}

fn sums(rows: &[usize], gradients: &[f32], hessians: &[f32]) -> (f64, f64) {
    rows.iter().fold((0.0, 0.0), |(g, h), &r| {
        (g + f64::from(gradients[r]), h + f64::from(hessians[r]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn separable_feature_is_split() {
        let features = array![[0.1f32, 5.0], [0.2, 5.0], [0.8, 5.0], [0.9, 5.0]];
        // Negative gradient pushes the leaf up, positive pushes it down.
        let gradients = [2.0f32, 2.0, -2.0, -2.0];
        let hessians = [1.0f32; 4];
        let params = GainParams::default();
        let grower = TreeGrower {
            features: features.view(),
            params: &params,
            max_depth: 3,
            learning_rate: 1.0,
        };
        let tree = grower.grow(&gradients, &hessians);

        assert!(matches!(
            tree.nodes()[0],
            Node::Split { feature: 0, threshold, .. } if threshold == 0.8
        ));
        let low = tree.predict_row(features.row(0));
        let high = tree.predict_row(features.row(3));
        assert!(low < 0.0 && high > 0.0);
        assert!(tree.is_well_formed(2));
    }

    #[test]
    fn backward_children_rejected() {
        let split = |left, right| Node::Split {
            feature: 0,
            threshold: 0.5,
            left,
            right,
        };
        let leaf = || Node::Leaf { value: 1.0 };
        let ok = Tree {
            nodes: vec![split(1, 2), leaf(), leaf()],
        };
        assert!(ok.is_well_formed(1));
        let looping = Tree {
            nodes: vec![split(0, 1), leaf()],
        };
        assert!(!looping.is_well_formed(1));
        let cycle = Tree {
            nodes: vec![split(1, 2), split(0, 2), leaf()],
        };
        assert!(!cycle.is_well_formed(1));
        let out_of_range = Tree {
            nodes: vec![split(1, 5), leaf()],
        };
        assert!(!out_of_range.is_well_formed(1));
    }

    #[test]
    fn depth_limit_respected() {
        let features = array![[0.0f32], [1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0]];
        let gradients = [3.0f32, -3.0, 3.0, -3.0, 3.0, -3.0, 3.0, -3.0];
        let hessians = [1.0f32; 8];
        let params = GainParams {
            min_child_weight: 0.0,
            ..Default::default()
        };
        let grower = TreeGrower {
            features: features.view(),
            params: &params,
            max_depth: 2,
            learning_rate: 0.3,
        };
        let tree = grower.grow(&gradients, &hessians);
        assert!(tree.depth() <= 2);
    }

    #[test]
    fn constant_feature_yields_leaf() {
        let features = array![[1.0f32], [1.0], [1.0]];
        let params = GainParams::default();
        let grower = TreeGrower {
            features: features.view(),
            params: &params,
            max_depth: 6,
            learning_rate: 0.5,
        };
        let tree = grower.grow(&[1.0, -1.0, 1.0], &[1.0, 1.0, 1.0]);
        assert_eq!(tree.n_leaves(), 1);
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn tree_serde_round_trip() {
        let tree = Tree {
            nodes: vec![
                Node::Split {
                    feature: 0,
                    threshold: 0.3,
                    left: 1,
                    right: 2,
                },
                Node::Leaf { value: -0.1 },
                Node::Leaf { value: 0.2 },
            ],
        };
        let json = serde_json::to_string(&tree).unwrap();
        let back: Tree = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
    }
}
