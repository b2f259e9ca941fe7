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

//! Per-feature standardization: `(x - mean) / std`.

use crate::data::{FeatureFrame, FeatureSchema};
use crate::error::{Result, SieveError};
use serde::{Deserialize, Serialize};

/// Standard deviations below this are treated as a constant column
const MIN_SCALE: f64 = 10.0 * f64::EPSILON;

/// Fitted standardization parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    schema: FeatureSchema,
    mean: Vec<f64>,
    /// Population standard deviation, with zeros replaced by 1
    scale: Vec<f64>,
}

impl Scaler {
    /// Compute mean and standard deviation of every column
    pub fn fit(frame: &FeatureFrame) -> Result<Self> {
        profiling::scope!("Scaler::fit");
        if frame.is_empty() {
            return Err(SieveError::Data("cannot fit scaler on zero rows".to_string()));
        }

        let n = frame.n_rows() as f64;
        let width = frame.n_features();
        let mut mean = vec![0.0; width];
        for row in frame.rows() {
            for (acc, &x) in mean.iter_mut().zip(row) {
                *acc += x;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        // Second pass keeps the variance numerically stable for large counts
        let mut variance = vec![0.0; width];
        for row in frame.rows() {
            for ((acc, &x), &m) in variance.iter_mut().zip(row).zip(&mean) {
                let d = x - m;
                *acc += d * d;
            }
        }
        if let Some(col) = variance.iter().position(|v| !v.is_finite()) {
            return Err(SieveError::Data(format!(
                "feature '{}' has values too large to standardize",
                frame.schema().name(col).unwrap_or("?")
            )));
        }
        let scale = variance
            .into_iter()
            .map(|v| {
                let std = (v / n).sqrt();
                if std >= MIN_SCALE {
                    std
                } else {
                    1.0
                }
            })
            .collect();

        Ok(Self {
            schema: frame.schema().clone(),
            mean,
            scale,
        })
    }

    /// Standardize `frame` with the fitted parameters
    pub fn transform(&self, frame: &FeatureFrame) -> Result<FeatureFrame> {
        profiling::scope!("Scaler::transform");
        if frame.schema() != &self.schema {
            return Err(SieveError::SchemaMismatch(format!(
                "scaler was fitted on {} features, input has {} (or a different column order)",
                self.schema.len(),
                frame.n_features()
            )));
        }

        let values = frame
            .rows()
            .flat_map(|row| {
                row.iter()
                    .zip(&self.mean)
                    .zip(&self.scale)
                    .map(|((&x, &m), &s)| (x - m) / s)
            })
            .collect();

        let scaled = FeatureFrame::from_flat(self.schema.clone(), frame.n_rows(), values)?;
        match frame.ids() {
            Some(ids) => scaled.with_ids(ids.to_vec()),
            None => Ok(scaled),
        }
    }

    pub const fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    /// Check that the parameter vectors line up with the schema
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        if self.mean.len() != self.schema.len() || self.scale.len() != self.schema.len() {
            return Err(format!(
                "scaler holds {} means and {} scales for {} features",
                self.mean.len(),
                self.scale.len(),
                self.schema.len()
            ));
        }
        if self.scale.iter().any(|&s| !s.is_finite() || s <= 0.0) {
            return Err("scaler holds a non-positive standard deviation".to_string());
        }
        Ok(())
    }
}
