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

//! Aligning inference data with the schema a model was trained on.

use crate::data::{FeatureFrame, FeatureSchema};
use crate::error::{Result, SieveError};
use serde::{Deserialize, Serialize};

/// What had to change to make new data fit the training schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Training features missing from the input, filled with 0
    pub added: Vec<String>,
    /// Input features unknown to the model, discarded
    pub dropped: Vec<String>,
}

impl Reconciliation {
    pub fn is_exact(&self) -> bool {
        self.added.is_empty() && self.dropped.is_empty()
    }
}

/// Reorder, zero-fill and drop columns so `frame` matches `training`.
///
/// Fails with [`SieveError::SchemaMismatch`] when the input shares no feature
/// at all with the training schema.
pub fn reconcile(frame: &FeatureFrame, training: &FeatureSchema) -> Result<(FeatureFrame, Reconciliation)> {
    profiling::scope!("reconcile");
    if frame.schema() == training {
        return Ok((frame.clone(), Reconciliation::default()));
    }

    let sources: Vec<Option<usize>> = training.names().map(|name| frame.schema().position(name)).collect();
    if sources.iter().all(Option::is_none) {
        return Err(SieveError::SchemaMismatch(format!(
            "none of the {} training features are present in the input",
            training.len()
        )));
    }

    let report = Reconciliation {
        added: training
            .names()
            .zip(&sources)
            .filter(|(_, src)| src.is_none())
            .map(|(name, _)| name.to_string())
            .collect(),
        dropped: frame
            .schema()
            .names()
            .filter(|name| !training.contains(name))
            .map(str::to_string)
            .collect(),
    };
    if !report.added.is_empty() {
        tracing::warn!(
            "Adding {} missing training columns filled with 0",
            report.added.len()
        );
    }
    if !report.dropped.is_empty() {
        tracing::info!(
            "Dropping {} columns unknown to the model",
            report.dropped.len()
        );
    }

    let values = frame
        .rows()
        .flat_map(|row| sources.iter().map(move |src| src.map_or(0.0, |col| row[col])))
        .collect();
    let aligned = FeatureFrame::from_flat(training.clone(), frame.n_rows(), values)?;
    let aligned = match frame.ids() {
        Some(ids) => aligned.with_ids(ids.to_vec())?,
        None => aligned,
    };
    Ok((aligned, report))
}
