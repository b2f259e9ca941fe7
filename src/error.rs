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

//! Error taxonomy shared by every pipeline stage.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SieveError {
    /// Input cannot support the requested operation (empty frame, too few rows).
    #[error("data error: {0}")]
    Data(String),

    /// Feature shape differs from what a fitted stage expects.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("{0} has not been fitted or loaded")]
    NotFitted(&'static str),

    #[error("corrupt model bundle {}: {reason}", path.display())]
    CorruptModel { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl SieveError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptModel {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SieveError>;
