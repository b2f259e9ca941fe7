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

//! Isolation forest: an ensemble of randomized partitioning trees.
//!
//! Anomalies are separated from the rest of the data in fewer random splits,
//! so their mean path length across the ensemble is short. Scores follow the
//! standard transform `s(x) = 2^(-E[h(x)] / c(sample_size))`: values near 1
//! are strong anomalies, values around 0.5 and below are normal.

use crate::data::FeatureFrame;
use crate::error::{Result, SieveError};
use crate::forest::tree::{average_path_length, depth_limit, IsolationTree};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const DEFAULT_N_TREES: usize = 200;
pub const DEFAULT_MAX_SAMPLE_SIZE: usize = 50_000;
pub const DEFAULT_CONTAMINATION: f64 = 0.01;
pub const DEFAULT_SEED: u64 = 42;

/// Outcome of applying the decision threshold to a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Label {
    Normal,
    Anomaly,
}

/// State that only exists once the forest has been trained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Fitted {
    n_features: usize,
    sample_size: usize,
    threshold: f64,
    trees: Vec<IsolationTree>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    n_trees: usize,
    max_sample_size: usize,
    /// Expected share of anomalies in the training data
    contamination: f64,
    seed: u64,
    fitted: Option<Fitted>,
}

impl IsolationForest {
    pub const fn new() -> Self {
        Self {
            n_trees: DEFAULT_N_TREES,
            max_sample_size: DEFAULT_MAX_SAMPLE_SIZE,
            contamination: DEFAULT_CONTAMINATION,
            seed: DEFAULT_SEED,
            fitted: None,
        }
    }

    #[must_use]
    pub fn with_n_trees(mut self, n: usize) -> Self {
        self.n_trees = n.max(1);
        self
    }

    #[must_use]
    pub fn with_max_sample_size(mut self, n: usize) -> Self {
        self.max_sample_size = n.max(2);
        self
    }

    /// Contamination must lie strictly between 0 and 1; it is checked by [`Self::fit`]
    #[must_use]
    pub fn with_contamination(mut self, contamination: f64) -> Self {
        self.contamination = contamination;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Build the ensemble and derive the decision threshold from the
    /// training scores.
    ///
    /// Each tree gets its own seed drawn from the master seed before the
    /// parallel build, so the result does not depend on thread scheduling.
    pub fn fit(&mut self, data: &FeatureFrame) -> Result<()> {
        profiling::scope!("IsolationForest::fit");
        let n = data.n_rows();
        if n < 2 {
            return Err(SieveError::Data(format!(
                "isolation forest needs at least 2 training rows, got {n}"
            )));
        }
        if !(self.contamination > 0.0 && self.contamination < 1.0) {
            return Err(SieveError::InvalidConfig(format!(
                "contamination must be in (0, 1), got {}",
                self.contamination
            )));
        }

        let sample_size = n.min(self.max_sample_size);
        let max_depth = depth_limit(sample_size);
        tracing::info!(
            "Building {} isolation trees over {} of {n} rows (depth limit {max_depth})",
            self.n_trees,
            sample_size
        );

        let mut master = ChaCha8Rng::seed_from_u64(self.seed);
        let tree_seeds: Vec<u64> = (0..self.n_trees).map(|_| master.random()).collect();
        let trees: Vec<IsolationTree> = tree_seeds
            .into_par_iter()
            .map(|seed| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let sample = if n > sample_size {
                    rand::seq::index::sample(&mut rng, n, sample_size).into_vec()
                } else {
                    (0..n).collect()
                };
                IsolationTree::build(data, sample, max_depth, &mut rng)
            })
            .collect();

        let mut fitted = Fitted {
            n_features: data.n_features(),
            sample_size,
            threshold: f64::INFINITY,
            trees,
        };
        let mut scores = fitted.score_all(data);
        scores.sort_by(f64::total_cmp);
        fitted.threshold = quantile(&scores, 1.0 - self.contamination);

        tracing::debug!("Decision threshold set to {:.6}", fitted.threshold);
        self.fitted = Some(fitted);
        Ok(())
    }

    /// Anomaly score of every row, in row order
    pub fn score(&self, data: &FeatureFrame) -> Result<Vec<f64>> {
        profiling::scope!("IsolationForest::score");
        let fitted = self.fitted()?;
        if data.n_features() != fitted.n_features {
            return Err(SieveError::SchemaMismatch(format!(
                "forest was trained on {} dimensions, input has {}",
                fitted.n_features,
                data.n_features()
            )));
        }
        Ok(fitted.score_all(data))
    }

    /// Label every row with the threshold fixed at training time
    pub fn predict(&self, data: &FeatureFrame) -> Result<Vec<Label>> {
        let threshold = self.threshold()?;
        Ok(self
            .score(data)?
            .into_iter()
            .map(|score| classify(score, threshold))
            .collect())
    }

    pub fn threshold(&self) -> Result<f64> {
        Ok(self.fitted()?.threshold)
    }

    pub const fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub const fn contamination(&self) -> f64 {
        self.contamination
    }

    pub const fn n_trees(&self) -> usize {
        self.n_trees
    }

    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Rows drawn per tree, known once fitted
    pub fn sample_size(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.sample_size)
    }

    /// Input dimensionality, known once fitted
    pub fn n_features(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.n_features)
    }

    pub fn trees(&self) -> &[IsolationTree] {
        match &self.fitted {
            Some(fitted) => fitted.trees.as_slice(),
            None => &[],
        }
    }

    fn fitted(&self) -> Result<&Fitted> {
        self.fitted.as_ref().ok_or(SieveError::NotFitted("isolation forest"))
    }

    pub(crate) fn validate(&self, n_features: usize) -> std::result::Result<(), String> {
        let Some(fitted) = &self.fitted else {
            return Err("forest holds no trained trees".to_string());
        };
        if fitted.trees.is_empty() {
            return Err("forest holds no trained trees".to_string());
        }
        if fitted.n_features != n_features {
            return Err(format!(
                "forest expects {} dimensions, model produces {n_features}",
                fitted.n_features
            ));
        }
        if fitted.sample_size < 2 {
            return Err(format!("invalid per-tree sample size {}", fitted.sample_size));
        }
        if !fitted.threshold.is_finite() {
            return Err("decision threshold is not finite".to_string());
        }
        if !(self.contamination > 0.0 && self.contamination < 1.0) {
            return Err(format!("contamination {} outside (0, 1)", self.contamination));
        }
        for (idx, tree) in fitted.trees.iter().enumerate() {
            tree.validate(n_features).map_err(|e| format!("tree {idx}: {e}"))?;
        }
        Ok(())
    }
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new()
    }
}

impl Fitted {
    fn score_all(&self, data: &FeatureFrame) -> Vec<f64> {
        let norm = average_path_length(self.sample_size);
        let n_trees = self.trees.len() as f64;
        (0..data.n_rows())
            .into_par_iter()
            .map(|row| {
                let x = data.row(row);
                let mean_path = self.trees.iter().map(|tree| tree.path_length(x)).sum::<f64>() / n_trees;
                2.0_f64.powf(-mean_path / norm)
            })
            .collect()
    }
}

/// Anomaly iff the score lies strictly above the threshold
pub fn classify(score: f64, threshold: f64) -> Label {
    if score > threshold {
        Label::Anomaly
    } else {
        Label::Normal
    }
}

/// Linearly interpolated quantile of ascending `sorted` values
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FeatureSchema;

    fn random_frame(n_rows: usize, width: usize, seed: u64) -> FeatureFrame {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let schema = FeatureSchema::new((0..width).map(|i| format!("E{i}"))).unwrap();
        let values = (0..n_rows * width).map(|_| rng.random_range(0.0..5.0)).collect();
        FeatureFrame::from_flat(schema, n_rows, values).unwrap()
    }

    #[test]
    fn test_score_before_fit_fails() {
        let forest = IsolationForest::new();
        let err = forest.score(&random_frame(3, 2, 1)).unwrap_err();
        assert!(matches!(err, SieveError::NotFitted(_)));
        assert!(matches!(forest.predict(&random_frame(3, 2, 1)), Err(SieveError::NotFitted(_))));
    }

    #[test]
    fn test_single_row_rejected() {
        let mut forest = IsolationForest::new();
        let err = forest.fit(&random_frame(1, 3, 1)).unwrap_err();
        assert!(matches!(err, SieveError::Data(_)));
    }

    #[test]
    fn test_contamination_out_of_range_rejected() {
        let mut forest = IsolationForest::new().with_contamination(1.0);
        let err = forest.fit(&random_frame(10, 2, 1)).unwrap_err();
        assert!(matches!(err, SieveError::InvalidConfig(_)));
    }

    #[test]
    fn test_same_seed_same_scores() {
        let data = random_frame(300, 4, 11);
        let mut a = IsolationForest::new().with_n_trees(40).with_seed(7);
        let mut b = IsolationForest::new().with_n_trees(40).with_seed(7);
        a.fit(&data).unwrap();
        b.fit(&data).unwrap();

        assert_eq!(a.score(&data).unwrap(), b.score(&data).unwrap());
        assert_eq!(a.threshold().unwrap(), b.threshold().unwrap());

        let mut c = IsolationForest::new().with_n_trees(40).with_seed(8);
        c.fit(&data).unwrap();
        assert_ne!(a.score(&data).unwrap(), c.score(&data).unwrap());
    }

    #[test]
    fn test_training_flag_rate_matches_contamination() {
        let data = random_frame(2_000, 5, 3);
        let mut forest = IsolationForest::new()
            .with_n_trees(50)
            .with_contamination(0.05);
        forest.fit(&data).unwrap();

        let flagged = forest
            .predict(&data)
            .unwrap()
            .into_iter()
            .filter(|&l| l == Label::Anomaly)
            .count();
        assert!((99..=101).contains(&flagged), "flagged {flagged}");
    }

    #[test]
    fn test_scores_are_in_unit_interval() {
        let data = random_frame(200, 3, 5);
        let mut forest = IsolationForest::new().with_n_trees(20);
        forest.fit(&data).unwrap();
        assert!(forest.score(&data).unwrap().iter().all(|&s| s > 0.0 && s < 1.0));
    }

    #[test]
    fn test_sample_cap_applies() {
        let data = random_frame(500, 2, 9);
        let mut forest = IsolationForest::new().with_n_trees(10).with_max_sample_size(64);
        forest.fit(&data).unwrap();

        assert_eq!(forest.sample_size(), Some(64));
        assert!(forest.trees().iter().all(|t| t.max_depth() <= depth_limit(64)));
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let mut forest = IsolationForest::new().with_n_trees(5);
        forest.fit(&random_frame(20, 3, 2)).unwrap();
        let err = forest.score(&random_frame(2, 4, 2)).unwrap_err();
        assert!(matches!(err, SieveError::SchemaMismatch(_)));
    }

    #[test]
    fn test_unscaled_extreme_values_still_fit() {
        let schema = FeatureSchema::new(["E1", "E2"]).unwrap();
        let data = FeatureFrame::new(
            schema,
            vec![vec![1.7e308, 1.0], vec![-1.7e308, 2.0], vec![0.0, 3.0], vec![5.0, 4.0]],
        )
        .unwrap();
        let mut forest = IsolationForest::new().with_n_trees(10);
        forest.fit(&data).unwrap();

        let scores = forest.score(&data).unwrap();
        assert_eq!(scores.len(), 4);
        assert!(scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_quantile_interpolates() {
        let sorted = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&sorted, 0.5), 2.0);
        assert!((quantile(&sorted, 0.9) - 3.6).abs() < 1e-12);
        assert_eq!(quantile(&sorted, 1.0), 4.0);
    }
}
