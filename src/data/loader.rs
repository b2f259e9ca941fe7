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

//! CSV loading for vectorized event-count tables.
//!
//! One header row, an optional identifier column, and numeric event columns.
//! Cells that do not parse as a finite number are read as zero.

use crate::context::PipelineContext;
use crate::data::frame::{FeatureFrame, FeatureSchema};
use crate::error::{Result, SieveError};
use std::path::Path;
use std::time::Instant;

/// Exact header name that marks the identifier column
pub const ID_COLUMN_NAME: &str = "TaskID";

/// Prefix (case-insensitive) that marks a leading identifier column
const ID_COLUMN_PREFIX: &str = "task";

/// Load a CSV file into a [`FeatureFrame`]
pub fn load_csv(path: &Path, ctx: &PipelineContext) -> Result<FeatureFrame> {
    ctx.in_scope(|| {
        let start = Instant::now();
        let buffer = std::fs::read(path)?;
        tracing::debug!("Read {} bytes from {} in {:?}", buffer.len(), path.display(), start.elapsed());

        // Invalid UTF-8 is replaced rather than rejected
        let content = String::from_utf8_lossy(&buffer);
        let frame = parse_rows(&content)?;

        tracing::info!(
            "Loaded {}: {} rows, {} feature columns in {:?}",
            path.display(),
            frame.n_rows(),
            frame.n_features(),
            start.elapsed()
        );
        Ok(frame)
    })
}

/// Parse CSV text into a [`FeatureFrame`]
pub fn parse_table(content: &str, ctx: &PipelineContext) -> Result<FeatureFrame> {
    ctx.in_scope(|| parse_rows(content))
}

fn parse_rows(content: &str) -> Result<FeatureFrame> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.iter().all(String::is_empty) {
        return Err(SieveError::Data("input has no header row".to_string()));
    }

    let id_column = detect_id_column(&headers);
    match id_column {
        Some(col) => tracing::info!("Identifier column detected: {}", headers[col]),
        None => tracing::info!("No identifier column detected, every column is a feature"),
    }

    let feature_columns: Vec<usize> = (0..headers.len())
        .filter(|&col| Some(col) != id_column)
        .collect();
    let schema = FeatureSchema::new(feature_columns.iter().map(|&col| headers[col].clone()))?;
    if schema.is_empty() {
        return Err(SieveError::Data("input has no feature columns".to_string()));
    }

    let mut values = Vec::new();
    let mut ids = Vec::new();
    let mut n_rows = 0;
    let mut coerced = 0usize;
    for record in reader.records() {
        let record = record?;
        for &col in &feature_columns {
            let cell = record.get(col).unwrap_or("");
            let value = parse_cell(cell);
            if value.is_none() && !cell.trim().is_empty() {
                coerced += 1;
            }
            values.push(value.unwrap_or(0.0));
        }
        if let Some(col) = id_column {
            ids.push(record.get(col).unwrap_or("").trim().to_string());
        }
        n_rows += 1;
    }

    if coerced > 0 {
        tracing::warn!("{coerced} non-numeric cells were read as 0");
    }

    let sample: Vec<&str> = schema.names().take(3).collect();
    tracing::debug!("First feature columns: {}", sample.join(", "));

    let frame = FeatureFrame::from_flat(schema, n_rows, values)?;
    if id_column.is_some() {
        frame.with_ids(ids)
    } else {
        Ok(frame)
    }
}

/// Column holding record identifiers, if any.
///
/// A column named exactly `TaskID` wins; otherwise the first column counts
/// when its name starts with `task`.
fn detect_id_column(headers: &[String]) -> Option<usize> {
    headers
        .iter()
        .position(|h| h == ID_COLUMN_NAME)
        .or_else(|| {
            headers
                .first()
                .filter(|h| h.to_lowercase().starts_with(ID_COLUMN_PREFIX))
                .map(|_| 0)
        })
}

fn parse_cell(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
