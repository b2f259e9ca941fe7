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

//! LogSieve learns what normal log event-count vectors look like and ranks
//! the ones that deviate from it.
//!
//! The pipeline is standardization, optional PCA for wide inputs, and an
//! isolation forest. [`anomaly::IsolationForestDetector`] bundles the stages
//! behind the [`anomaly::AnomalyDetector`] lifecycle; the stages are also
//! usable on their own.

pub mod anomaly;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod forest;
pub mod model;
pub mod preprocess;

pub use anomaly::{AnomalyDetector, AnomalyResult, DetectionReport, IsolationForestDetector};
pub use config::DetectorConfig;
pub use context::{LogSink, PipelineContext};
pub use data::{load_csv, FeatureFrame, FeatureSchema};
pub use error::{Result, SieveError};
pub use model::{ModelBundle, TrainingSummary};
