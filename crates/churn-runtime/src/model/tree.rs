//! Regression tree used by the boosted specialists
//!
//! Nodes live in a flat vector with the root at index 0. Every node records
//! its hessian cover and the cover-weighted expected output of its subtree,
//! which is what path attributions are computed from.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Node {
    Split {
        /// Column index within the specialist's feature subset
        feature: usize,
        /// `value < threshold` goes left
        threshold: f64,
        /// Direction taken by missing values
        default_left: bool,
        left: usize,
        right: usize,
        cover: f64,
        /// Expected margin contribution of this subtree
        value: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl Node {
    pub fn value(&self) -> f64 {
        match self {
            Node::Split { value, .. } | Node::Leaf { value, .. } => *value,
        }
    }

    pub fn cover(&self) -> f64 {
        match self {
            Node::Split { cover, .. } | Node::Leaf { cover, .. } => *cover,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Leaf output for one row
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Split {
                    feature,
                    threshold,
                    default_left,
                    left,
                    right,
                    ..
                }) => {
                    idx = if go_left(row[*feature], *threshold, *default_left) {
                        *left
                    } else {
                        *right
                    };
                }
                Some(Node::Leaf { value, .. }) => return *value,
                None => return 0.0,
            }
        }
    }

    /// Path attributions for one row.
    ///
    /// Each split on the decision path credits its feature with the change in
    /// expected value from the node to the chosen child. Returns the root's
    /// expected value; `bias + sum(out)` equals `predict(row)`.
    pub fn contributions(&self, row: &[f64], out: &mut [f64]) -> f64 {
        let Some(root) = self.nodes.first() else {
            return 0.0;
        };
        let bias = root.value();
        let mut idx = 0;
        while let Some(Node::Split {
            feature,
            threshold,
            default_left,
            left,
            right,
            value,
            ..
        }) = self.nodes.get(idx)
        {
            let next = if go_left(row[*feature], *threshold, *default_left) {
                *left
            } else {
                *right
            };
            let child_value = self.nodes.get(next).map(Node::value).unwrap_or(*value);
            out[*feature] += child_value - value;
            idx = next;
        }
        bias
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(Node::Split { left, right, .. }) => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

#[inline]
fn go_left(v: f64, threshold: f64, default_left: bool) -> bool {
    if v.is_nan() {
        default_left
    } else {
        v < threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // x0 < 5 ? (x1 missing -> left: 1.0 | x1 < 2 ? 1.0 : -1.0) : 3.0
    fn sample_tree() -> Tree {
        Tree::new(vec![
            Node::Split {
                feature: 0,
                threshold: 5.0,
                default_left: false,
                left: 1,
                right: 2,
                cover: 4.0,
                value: 1.5,
            },
            Node::Split {
                feature: 1,
                threshold: 2.0,
                default_left: true,
                left: 3,
                right: 4,
                cover: 2.0,
                value: 0.0,
            },
            Node::Leaf { value: 3.0, cover: 2.0 },
            Node::Leaf { value: 1.0, cover: 1.0 },
            Node::Leaf { value: -1.0, cover: 1.0 },
        ])
    }

    #[test]
    fn test_predict_follows_thresholds_and_defaults() {
        let tree = sample_tree();
        assert_eq!(tree.predict(&[1.0, 1.0]), 1.0);
        assert_eq!(tree.predict(&[1.0, 2.0]), -1.0);
        assert_eq!(tree.predict(&[5.0, 0.0]), 3.0);
        assert_eq!(tree.predict(&[1.0, f64::NAN]), 1.0);
        assert_eq!(tree.predict(&[f64::NAN, 0.0]), 3.0);
    }

    #[test]
    fn test_contributions_are_additive() {
        let tree = sample_tree();
        for row in [[1.0, 1.0], [1.0, 3.0], [9.0, 0.0], [1.0, f64::NAN]] {
            let mut out = [0.0; 2];
            let bias = tree.contributions(&row, &mut out);
            let total = bias + out.iter().sum::<f64>();
            assert!((total - tree.predict(&row)).abs() < 1e-12);
        }

        let mut out = [0.0; 2];
        tree.contributions(&[1.0, 3.0], &mut out);
        assert_eq!(out, [-1.5, -1.0]);
    }

    #[test]
    fn test_depth() {
        assert_eq!(sample_tree().depth(), 2);
        assert_eq!(Tree::new(vec![Node::Leaf { value: 0.0, cover: 1.0 }]).depth(), 0);
    }
}
