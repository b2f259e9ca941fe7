// LogSieve - GPL-3.0-or-later
// This file is part of LogSieve.
//
// Copyright (C) 2025 Daniel Freiermuth
//
// LogSieve is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// LogSieve is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with LogSieve.  If not, see <https://www.gnu.org/licenses/>.

//! A single isolation tree stored as a flat node arena.

use crate::data::FeatureFrame;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Euler–Mascheroni constant
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful binary search tree lookup over `n`
/// points, `c(n) = 2H(n-1) - 2(n-1)/n` with `H(i) ≈ ln(i) + γ`.
///
/// `c(0) = c(1) = 0` and `c(2) = 1`.
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

/// Depth limit for trees grown on `sample_size` rows: `ceil(log2(sample_size))`
pub fn depth_limit(sample_size: usize) -> usize {
    if sample_size <= 1 {
        0
    } else {
        (sample_size as f64).log2().ceil() as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// Rows with `x[feature] < value` go left, the rest go right
    Split {
        feature: usize,
        value: f64,
        left: usize,
        right: usize,
    },
    /// Terminal node; `size` rows of the training sample ended here
    Leaf { depth: usize, size: usize },
}

/// Partition still waiting to be expanded during construction
struct Pending {
    node: usize,
    rows: Vec<usize>,
    depth: usize,
    /// Features not yet known to be constant on `rows`
    candidates: Vec<usize>,
}

/// Immutable isolation tree; `nodes[0]` is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    /// Grow a tree over the given training rows.
    ///
    /// Uses an explicit stack of pending partitions so deep trees never
    /// recurse on the call stack.
    pub fn build<R: Rng>(data: &FeatureFrame, sample: Vec<usize>, max_depth: usize, rng: &mut R) -> Self {
        profiling::scope!("IsolationTree::build");
        let mut nodes = vec![Node::Leaf { depth: 0, size: 0 }];
        let mut stack = vec![Pending {
            node: 0,
            rows: sample,
            depth: 0,
            candidates: (0..data.n_features()).collect(),
        }];

        while let Some(Pending {
            node,
            rows,
            depth,
            mut candidates,
        }) = stack.pop()
        {
            if rows.len() <= 1 || depth >= max_depth {
                nodes[node] = Node::Leaf {
                    depth,
                    size: rows.len(),
                };
                continue;
            }

            let Some((feature, min, max)) = pick_split_feature(data, &rows, &mut candidates, rng) else {
                // Every remaining row is a duplicate of the others
                nodes[node] = Node::Leaf {
                    depth,
                    size: rows.len(),
                };
                continue;
            };

            let value = rng.random_range(min..max);
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
                rows.into_iter().partition(|&r| data.row(r)[feature] < value);

            let left = nodes.len();
            let right = left + 1;
            nodes.push(Node::Leaf { depth: 0, size: 0 });
            nodes.push(Node::Leaf { depth: 0, size: 0 });
            nodes[node] = Node::Split {
                feature,
                value,
                left,
                right,
            };

            stack.push(Pending {
                node: right,
                rows: right_rows,
                depth: depth + 1,
                candidates: candidates.clone(),
            });
            stack.push(Pending {
                node: left,
                rows: left_rows,
                depth: depth + 1,
                candidates,
            });
        }

        Self { nodes }
    }

    /// Depth of the leaf `x` falls into, plus `c(size)` for the rows that
    /// leaf still held when growth stopped
    pub fn path_length(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Split {
                    feature,
                    value,
                    left,
                    right,
                } => idx = if x[feature] < value { left } else { right },
                Node::Leaf { depth, size } => {
                    return depth as f64 + average_path_length(size);
                }
            }
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Features used by the split nodes, in arena order
    pub fn split_features(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes.iter().filter_map(|node| match node {
            Node::Split { feature, .. } => Some(*feature),
            Node::Leaf { .. } => None,
        })
    }

    pub fn max_depth(&self) -> usize {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                Node::Leaf { depth, .. } => Some(*depth),
                Node::Split { .. } => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Structural check for trees read back from disk.
    ///
    /// Children must live after their parent in the arena, which also rules
    /// out cycles.
    pub(crate) fn validate(&self, n_features: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                value,
                left,
                right,
            } = *node
            {
                if feature >= n_features {
                    return Err(format!("node {idx} splits on feature {feature} of {n_features}"));
                }
                if !value.is_finite() {
                    return Err(format!("node {idx} has a non-finite split value"));
                }
                if left <= idx || right <= idx || left >= self.nodes.len() || right >= self.nodes.len() {
                    return Err(format!("node {idx} has out-of-range children"));
                }
            }
        }
        Ok(())
    }
}

/// Draw a split feature uniformly among those that vary on `rows`.
///
/// Features found constant, or whose range is too wide to represent, are
/// removed from `candidates`, so descendants never test them again. Returns
/// the feature and its range on `rows`.
fn pick_split_feature<R: Rng>(
    data: &FeatureFrame,
    rows: &[usize],
    candidates: &mut Vec<usize>,
    rng: &mut R,
) -> Option<(usize, f64, f64)> {
    while !candidates.is_empty() {
        let slot = rng.random_range(0..candidates.len());
        let feature = candidates[slot];
        let (min, max) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
            let x = data.row(r)[feature];
            (lo.min(x), hi.max(x))
        });
        if min < max && (max - min).is_finite() {
            return Some((feature, min, max));
        }
        candidates.swap_remove(slot);
    }
    None
}
