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

//! The persisted model: scaler, optional reducer, forest and schema as one unit.

use crate::config::DetectorConfig;
use crate::context::PipelineContext;
use crate::data::{FeatureFrame, FeatureSchema};
use crate::error::{Result, SieveError};
use crate::forest::{IsolationForest, Label};
use crate::model::reconcile::{reconcile, Reconciliation};
use crate::preprocess::{Reducer, Scaler};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

/// Bumped whenever the on-disk layout changes incompatibly
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Facts about a finished training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub rows: usize,
    pub input_features: usize,
    /// Width seen by the forest (after PCA when it was applied)
    pub model_dims: usize,
    pub reduced: bool,
    pub anomalies_flagged: usize,
    /// Percentage of training rows above the threshold
    pub anomaly_rate: f64,
    pub threshold: f64,
}

/// Output of scoring a frame against a bundle
#[derive(Debug, Clone)]
pub struct Scored {
    /// Input after reconciliation, in training column order, unscaled
    pub aligned: FeatureFrame,
    pub scores: Vec<f64>,
    pub reconciliation: Reconciliation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelBundle {
    format_version: u32,
    created_at: DateTime<Utc>,
    crate_version: String,
    config: DetectorConfig,
    schema: FeatureSchema,
    scaler: Scaler,
    reducer: Option<Reducer>,
    forest: IsolationForest,
}

impl ModelBundle {
    /// Fit every stage on `data` and bundle the result
    pub fn train(
        data: &FeatureFrame,
        config: &DetectorConfig,
        ctx: &PipelineContext,
    ) -> Result<(Self, TrainingSummary)> {
        config.validate()?;
        ctx.in_scope(|| {
            let start = Instant::now();
            if data.n_rows() < 2 {
                return Err(SieveError::Data(format!(
                    "training needs at least 2 rows, got {}",
                    data.n_rows()
                )));
            }
            tracing::info!(
                "Training on {} rows x {} features",
                data.n_rows(),
                data.n_features()
            );

            let scaler = Scaler::fit(data)?;
            let constant = scaler.scale().iter().filter(|&&s| s == 1.0).count();
            tracing::debug!("Scaler fitted ({constant} columns with unit scale)");
            let scaled = scaler.transform(data)?;

            let reducer = if scaled.n_features() > config.reduction_threshold {
                tracing::info!(
                    "Reducing dimensionality: {} -> {} dimensions",
                    scaled.n_features(),
                    config.reduced_dims.min(scaled.n_features())
                );
                Some(Reducer::fit(&scaled, config.reduced_dims, config.seed)?)
            } else {
                None
            };
            let model_input = match &reducer {
                Some(reducer) => reducer.transform(&scaled)?,
                None => scaled,
            };

            let mut forest = config.forest();
            forest.fit(&model_input)?;

            let anomalies_flagged = forest
                .predict(&model_input)?
                .into_iter()
                .filter(|&label| label == Label::Anomaly)
                .count();
            let summary = TrainingSummary {
                rows: data.n_rows(),
                input_features: data.n_features(),
                model_dims: model_input.n_features(),
                reduced: reducer.is_some(),
                anomalies_flagged,
                anomaly_rate: anomalies_flagged as f64 / data.n_rows() as f64 * 100.0,
                threshold: forest.threshold()?,
            };
            tracing::info!(
                "Training finished in {:?}: {}/{} training rows flagged ({:.2}%)",
                start.elapsed(),
                summary.anomalies_flagged,
                summary.rows,
                summary.anomaly_rate
            );

            let bundle = Self {
                format_version: BUNDLE_FORMAT_VERSION,
                created_at: Utc::now(),
                crate_version: env!("CARGO_PKG_VERSION").to_string(),
                config: config.clone(),
                schema: data.schema().clone(),
                scaler,
                reducer,
                forest,
            };
            Ok((bundle, summary))
        })
    }

    /// Reconcile `data` with the training schema and score every row
    pub fn score(&self, data: &FeatureFrame, ctx: &PipelineContext) -> Result<Scored> {
        ctx.in_scope(|| {
            let (aligned, reconciliation) = reconcile(data, &self.schema)?;
            let scores = self.score_aligned(&aligned)?;
            tracing::debug!("Scored {} rows", aligned.n_rows());
            Ok(Scored {
                aligned,
                scores,
                reconciliation,
            })
        })
    }

    /// Label every row of `data` with the persisted threshold
    pub fn predict(&self, data: &FeatureFrame, ctx: &PipelineContext) -> Result<Vec<Label>> {
        let threshold = self.forest.threshold()?;
        Ok(self
            .score(data, ctx)?
            .scores
            .into_iter()
            .map(|score| crate::forest::classify(score, threshold))
            .collect())
    }

    /// Scores for data already in training column order
    fn score_aligned(&self, aligned: &FeatureFrame) -> Result<Vec<f64>> {
        let scaled = self.scaler.transform(aligned)?;
        match &self.reducer {
            Some(reducer) => self.forest.score(&reducer.transform(&scaled)?),
            None => self.forest.score(&scaled),
        }
    }

    /// Write the bundle so readers never observe a partial file.
    ///
    /// The JSON goes to a temporary file in the destination directory which
    /// is then renamed over `path`.
    pub fn save(&self, path: &Path, ctx: &PipelineContext) -> Result<()> {
        ctx.in_scope(|| {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;

            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            {
                let mut writer = BufWriter::new(tmp.as_file_mut());
                serde_json::to_writer(&mut writer, self).map_err(std::io::Error::from)?;
                writer.flush()?;
            }
            tmp.as_file().sync_all()?;
            tmp.persist(path).map_err(|e| e.error)?;

            tracing::info!("Model saved to {}", path.display());
            Ok(())
        })
    }

    /// Read a bundle back and check it is structurally complete
    pub fn load(path: &Path, ctx: &PipelineContext) -> Result<Self> {
        ctx.in_scope(|| {
            let bytes = std::fs::read(path)?;
            let bundle: Self = serde_json::from_slice(&bytes)
                .map_err(|e| SieveError::corrupt(path, e.to_string()))?;
            bundle
                .validate()
                .map_err(|reason| SieveError::corrupt(path, reason))?;
            tracing::info!(
                "Model loaded from {} ({} features, {} trees)",
                path.display(),
                bundle.schema.len(),
                bundle.forest.trees().len()
            );
            Ok(bundle)
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.format_version != BUNDLE_FORMAT_VERSION {
            return Err(format!(
                "unsupported format version {} (expected {BUNDLE_FORMAT_VERSION})",
                self.format_version
            ));
        }
        if self.schema.is_empty() {
            return Err("feature schema is empty".to_string());
        }
        if self.scaler.schema() != &self.schema {
            return Err("scaler schema differs from the model schema".to_string());
        }
        self.scaler.validate()?;

        let dims = match &self.reducer {
            Some(reducer) => {
                reducer.validate()?;
                if reducer.input_width() != self.schema.len() {
                    return Err(format!(
                        "reducer expects {} inputs, schema has {}",
                        reducer.input_width(),
                        self.schema.len()
                    ));
                }
                reducer.n_components()
            }
            None => self.schema.len(),
        };
        self.forest.validate(dims)
    }

    pub const fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub const fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    pub const fn reducer(&self) -> Option<&Reducer> {
        self.reducer.as_ref()
    }

    pub const fn forest(&self) -> &IsolationForest {
        &self.forest
    }

    /// Settings the bundle was trained with
    pub const fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn crate_version(&self) -> &str {
        &self.crate_version
    }

    pub fn threshold(&self) -> Result<f64> {
        self.forest.threshold()
    }

    /// Width of the vectors the forest scores
    pub fn model_dims(&self) -> usize {
        self.reducer
            .as_ref()
            .map_or(self.schema.len(), Reducer::n_components)
    }
}
