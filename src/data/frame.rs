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

//! In-memory table of numeric feature vectors.

use crate::error::{Result, SieveError};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Ordered, unique feature names defining column order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSchema {
    names: IndexSet<String>,
}

impl FeatureSchema {
    /// Build a schema, rejecting duplicate names
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = IndexSet::new();
        for name in names {
            let name = name.into();
            if !set.insert(name.clone()) {
                return Err(SieveError::Data(format!("duplicate feature name '{name}'")));
            }
        }
        Ok(Self { names: set })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get_index(index).map(String::as_str)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.get_index_of(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

// Column order matters, so this is not set equality.
impl PartialEq for FeatureSchema {
    fn eq(&self, other: &Self) -> bool {
        self.names.len() == other.names.len() && self.names.iter().eq(other.names.iter())
    }
}

impl Eq for FeatureSchema {}

/// Row-major table of feature vectors aligned to a [`FeatureSchema`]
///
/// Every value is finite: NaN and infinities are replaced by zero on
/// construction, matching how unreadable cells are treated at load time.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    schema: FeatureSchema,
    values: Vec<f64>,
    n_rows: usize,
    ids: Option<Vec<String>>,
}

impl FeatureFrame {
    /// Build a frame from row vectors. Every row must match the schema width.
    pub fn new(schema: FeatureSchema, rows: Vec<Vec<f64>>) -> Result<Self> {
        if schema.is_empty() {
            return Err(SieveError::Data("feature schema has no columns".to_string()));
        }
        let width = schema.len();
        let n_rows = rows.len();
        let mut values = Vec::with_capacity(n_rows * width);
        for (idx, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(SieveError::SchemaMismatch(format!(
                    "row {idx} has {} values, schema has {width} features",
                    row.len()
                )));
            }
            values.extend(row.into_iter().map(sanitize));
        }
        Ok(Self {
            schema,
            values,
            n_rows,
            ids: None,
        })
    }

    /// Build a frame from a flat row-major buffer
    pub fn from_flat(schema: FeatureSchema, n_rows: usize, values: Vec<f64>) -> Result<Self> {
        if schema.is_empty() {
            return Err(SieveError::Data("feature schema has no columns".to_string()));
        }
        if values.len() != n_rows * schema.len() {
            return Err(SieveError::SchemaMismatch(format!(
                "buffer holds {} values, expected {n_rows} rows x {} features",
                values.len(),
                schema.len()
            )));
        }
        Ok(Self {
            schema,
            values: values.into_iter().map(sanitize).collect(),
            n_rows,
            ids: None,
        })
    }

    /// Attach one identifier per row
    pub fn with_ids(mut self, ids: Vec<String>) -> Result<Self> {
        if ids.len() != self.n_rows {
            return Err(SieveError::SchemaMismatch(format!(
                "{} identifiers for {} rows",
                ids.len(),
                self.n_rows
            )));
        }
        self.ids = Some(ids);
        Ok(self)
    }

    pub const fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub const fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_features(&self) -> usize {
        self.schema.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn row(&self, index: usize) -> &[f64] {
        let width = self.n_features();
        &self.values[index * width..(index + 1) * width]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.values.chunks_exact(self.n_features())
    }

    pub fn column(&self, index: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows().map(move |row| row[index])
    }

    pub fn value(&self, row: usize, feature: &str) -> Option<f64> {
        let col = self.schema.position(feature)?;
        (row < self.n_rows).then(|| self.row(row)[col])
    }

    pub fn ids(&self) -> Option<&[String]> {
        self.ids.as_deref()
    }

    pub fn id(&self, row: usize) -> Option<&str> {
        self.ids.as_ref()?.get(row).map(String::as_str)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// New frame holding only `indices`, in the given order
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut values = Vec::with_capacity(indices.len() * self.n_features());
        for &idx in indices {
            values.extend_from_slice(self.row(idx));
        }
        Self {
            schema: self.schema.clone(),
            values,
            n_rows: indices.len(),
            ids: self
                .ids
                .as_ref()
                .map(|ids| indices.iter().map(|&idx| ids[idx].clone()).collect()),
        }
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
