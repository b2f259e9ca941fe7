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

//! Turning raw scores into an ordered, explained anomaly list.

use crate::data::FeatureFrame;
use crate::forest::{classify, Label};
use serde::{Deserialize, Serialize};

/// One feature value that stands out in an anomalous record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub value: f64,
}

/// Per-record outcome of an inference run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    /// Position of the record in the scored input (0-based)
    pub index: usize,
    /// Identifier column value, when the input had one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub is_anomaly: bool,
    pub score: f64,
    /// 1-based severity rank among flagged records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
    /// Largest non-zero feature values, flagged records only
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub top_features: Vec<FeatureContribution>,
}

/// All records plus the severity order of the flagged ones
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    records: Vec<AnomalyResult>,
    severity: Vec<usize>,
}

impl Ranking {
    /// Every record, in input order
    pub fn records(&self) -> &[AnomalyResult] {
        &self.records
    }

    /// Flagged records, most anomalous first
    pub fn anomalies(&self) -> impl Iterator<Item = &AnomalyResult> {
        self.severity.iter().map(|&idx| &self.records[idx])
    }

    /// The `n` most anomalous records
    pub fn top(&self, n: usize) -> impl Iterator<Item = &AnomalyResult> {
        self.anomalies().take(n)
    }

    pub fn anomaly_count(&self) -> usize {
        self.severity.len()
    }

    pub fn labels(&self) -> impl Iterator<Item = Label> + '_ {
        self.records.iter().map(|r| {
            if r.is_anomaly {
                Label::Anomaly
            } else {
                Label::Normal
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnomalyRanker {
    top_k_attribution: usize,
}

impl AnomalyRanker {
    pub const fn new(top_k_attribution: usize) -> Self {
        Self { top_k_attribution }
    }

    /// Classify, order and explain.
    ///
    /// `frame` holds the unscaled values the scores were computed from, in
    /// training column order. Ties in score are broken by record index.
    pub fn rank(&self, frame: &FeatureFrame, scores: &[f64], threshold: f64) -> Ranking {
        profiling::scope!("AnomalyRanker::rank");
        debug_assert_eq!(frame.n_rows(), scores.len());

        let mut severity: Vec<usize> = scores
            .iter()
            .enumerate()
            .filter(|(_, &score)| classify(score, threshold) == Label::Anomaly)
            .map(|(idx, _)| idx)
            .collect();
        severity.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

        let mut records: Vec<AnomalyResult> = scores
            .iter()
            .enumerate()
            .map(|(index, &score)| AnomalyResult {
                index,
                id: frame.id(index).map(str::to_string),
                is_anomaly: false,
                score,
                rank: None,
                top_features: Vec::new(),
            })
            .collect();

        for (position, &idx) in severity.iter().enumerate() {
            let record = &mut records[idx];
            record.is_anomaly = true;
            record.rank = Some(position + 1);
            record.top_features = self.attribute(frame, idx);
        }

        Ranking { records, severity }
    }

    /// Non-zero features of `row`, largest value first, schema order on ties
    pub fn attribute(&self, frame: &FeatureFrame, row: usize) -> Vec<FeatureContribution> {
        let mut active: Vec<(usize, f64)> = frame
            .row(row)
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, value)| value != 0.0)
            .collect();
        active.sort_by(|a, b| b.1.total_cmp(&a.1));
        active
            .into_iter()
            .take(self.top_k_attribution)
            .filter_map(|(col, value)| {
                frame.schema().name(col).map(|name| FeatureContribution {
                    feature: name.to_string(),
                    value,
                })
            })
            .collect()
    }
}
