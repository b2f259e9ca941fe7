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

use crate::anomaly::ranker::{AnomalyRanker, AnomalyResult};
use crate::config::DetectorConfig;
use crate::context::PipelineContext;
use crate::data::FeatureFrame;
use crate::error::{Result, SieveError};
use crate::forest::Label;
use crate::model::{ModelBundle, Reconciliation, TrainingSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Trait for anomaly detectors with a train / persist / infer lifecycle
pub trait AnomalyDetector: Send {
    /// Learn what normal looks like from unlabeled data
    fn train(&mut self, data: &FeatureFrame, ctx: &PipelineContext) -> Result<TrainingSummary>;

    /// Anomaly score per row, higher = more anomalous
    fn score(&self, data: &FeatureFrame, ctx: &PipelineContext) -> Result<Vec<f64>>;

    fn predict(&self, data: &FeatureFrame, ctx: &PipelineContext) -> Result<Vec<Label>>;

    /// Score, classify, rank and explain
    fn detect(&self, data: &FeatureFrame, ctx: &PipelineContext) -> Result<DetectionReport>;

    fn save(&self, path: &Path, ctx: &PipelineContext) -> Result<()>;

    fn load(&mut self, path: &Path, ctx: &PipelineContext) -> Result<()>;

    fn is_trained(&self) -> bool;
}

/// Model facts echoed in every report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub contamination: f64,
    pub uses_reduction: bool,
    pub n_features: usize,
    pub n_trees: usize,
    pub threshold: f64,
}

/// Everything an inference run produced, ready for a report writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    /// Where the records came from, when they were read from a file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzed_file: Option<String>,
    pub analyzed_at: DateTime<Utc>,
    pub total_records: usize,
    pub anomalies_count: usize,
    /// Percentage of records flagged
    pub anomaly_rate: f64,
    pub model_info: ModelInfo,
    /// The most severe anomalies, most severe first
    pub top_anomalies: Vec<AnomalyResult>,
    /// Every flagged record, most severe first
    pub anomalies: Vec<AnomalyResult>,
    pub reconciliation: Reconciliation,
}

impl DetectionReport {
    #[must_use]
    pub fn with_analyzed_file(mut self, path: &Path) -> Self {
        self.analyzed_file = Some(path.display().to_string());
        self
    }
}

/// Scaler + optional PCA + isolation forest pipeline
#[derive(Debug, Clone, Default)]
pub struct IsolationForestDetector {
    config: DetectorConfig,
    bundle: Option<ModelBundle>,
}

impl IsolationForestDetector {
    pub const fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            bundle: None,
        }
    }

    /// Wrap an already trained bundle
    pub const fn from_bundle(config: DetectorConfig, bundle: ModelBundle) -> Self {
        Self {
            config,
            bundle: Some(bundle),
        }
    }

    pub const fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub const fn bundle(&self) -> Option<&ModelBundle> {
        self.bundle.as_ref()
    }

    fn trained(&self) -> Result<&ModelBundle> {
        self.bundle.as_ref().ok_or(SieveError::NotFitted("detector"))
    }

    /// Like [`AnomalyDetector::detect`], also returning the input aligned to
    /// the training schema (unscaled, one row per input record) for exporting
    /// flagged records.
    pub fn analyze(
        &self,
        data: &FeatureFrame,
        ctx: &PipelineContext,
    ) -> Result<(DetectionReport, FeatureFrame)> {
        let bundle = self.trained()?;
        let scored = bundle.score(data, ctx)?;
        let threshold = bundle.threshold()?;
        let ranking = AnomalyRanker::new(self.config.top_k_attribution).rank(
            &scored.aligned,
            &scored.scores,
            threshold,
        );

        let total_records = scored.scores.len();
        let anomalies: Vec<AnomalyResult> = ranking.anomalies().cloned().collect();
        let report = DetectionReport {
            analyzed_file: None,
            analyzed_at: Utc::now(),
            total_records,
            anomalies_count: anomalies.len(),
            anomaly_rate: if total_records == 0 {
                0.0
            } else {
                anomalies.len() as f64 / total_records as f64 * 100.0
            },
            model_info: ModelInfo {
                contamination: bundle.forest().contamination(),
                uses_reduction: bundle.reducer().is_some(),
                n_features: bundle.schema().len(),
                n_trees: bundle.forest().trees().len(),
                threshold,
            },
            top_anomalies: anomalies.iter().take(self.config.top_k_report).cloned().collect(),
            anomalies,
            reconciliation: scored.reconciliation,
        };

        ctx.in_scope(|| {
            tracing::info!(
                "Analyzed {} records: {} anomalies ({:.2}%)",
                report.total_records,
                report.anomalies_count,
                report.anomaly_rate
            );
        });
        Ok((report, scored.aligned))
    }
}

impl AnomalyDetector for IsolationForestDetector {
    fn train(&mut self, data: &FeatureFrame, ctx: &PipelineContext) -> Result<TrainingSummary> {
        let (bundle, summary) = ModelBundle::train(data, &self.config, ctx)?;
        self.bundle = Some(bundle);
        Ok(summary)
    }

    fn score(&self, data: &FeatureFrame, ctx: &PipelineContext) -> Result<Vec<f64>> {
        Ok(self.trained()?.score(data, ctx)?.scores)
    }

    fn predict(&self, data: &FeatureFrame, ctx: &PipelineContext) -> Result<Vec<Label>> {
        self.trained()?.predict(data, ctx)
    }

    fn detect(&self, data: &FeatureFrame, ctx: &PipelineContext) -> Result<DetectionReport> {
        self.analyze(data, ctx).map(|(report, _)| report)
    }

    fn save(&self, path: &Path, ctx: &PipelineContext) -> Result<()> {
        self.trained()?.save(path, ctx)
    }

    fn load(&mut self, path: &Path, ctx: &PipelineContext) -> Result<()> {
        self.bundle = Some(ModelBundle::load(path, ctx)?);
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.bundle.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FeatureSchema;

    fn frame(rows: Vec<Vec<f64>>) -> FeatureFrame {
        let schema = FeatureSchema::new(["E1", "E2", "E3"]).unwrap();
        FeatureFrame::new(schema, rows).unwrap()
    }

    fn training_rows() -> Vec<Vec<f64>> {
        let mut rows: Vec<Vec<f64>> = (0..200)
            .map(|i| vec![f64::from(i % 4), f64::from(i % 3), 1.0])
            .collect();
        rows.push(vec![90.0, 0.0, 40.0]);
        rows.push(vec![0.0, 80.0, 1.0]);
        rows
    }

    fn config() -> DetectorConfig {
        DetectorConfig {
            n_trees: 60,
            contamination: 0.01,
            ..DetectorConfig::default()
        }
    }

    #[test]
    fn test_untrained_detector_reports_not_fitted() {
        let detector = IsolationForestDetector::new(config());
        let ctx = PipelineContext::silent();
        let data = frame(vec![vec![1.0, 2.0, 3.0]]);

        assert!(!detector.is_trained());
        assert!(matches!(detector.score(&data, &ctx), Err(SieveError::NotFitted(_))));
        assert!(matches!(detector.detect(&data, &ctx), Err(SieveError::NotFitted(_))));
        assert!(matches!(
            detector.save(Path::new("unused.json"), &ctx),
            Err(SieveError::NotFitted(_))
        ));
    }

    #[test]
    fn test_detect_ranks_planted_outliers_first() {
        let mut detector = IsolationForestDetector::new(config());
        let ctx = PipelineContext::silent();
        detector.train(&frame(training_rows()), &ctx).unwrap();

        let probe = frame(vec![
            vec![1.0, 1.0, 1.0],
            vec![95.0, 0.0, 45.0],
            vec![2.0, 2.0, 1.0],
        ]);
        let report = detector.detect(&probe, &ctx).unwrap();

        assert_eq!(report.total_records, 3);
        assert_eq!(report.anomalies_count, 1);
        let top = &report.top_anomalies[0];
        assert_eq!(top.index, 1);
        assert_eq!(top.rank, Some(1));
        assert_eq!(top.top_features[0].feature, "E1");
        assert_eq!(top.top_features[1].feature, "E3");
        assert!(report.reconciliation.is_exact());
    }

    #[test]
    fn test_load_into_fresh_detector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let ctx = PipelineContext::silent();
        let data = frame(training_rows());

        let mut trained = IsolationForestDetector::new(config());
        trained.train(&data, &ctx).unwrap();
        trained.save(&path, &ctx).unwrap();

        let mut fresh = IsolationForestDetector::new(config());
        fresh.load(&path, &ctx).unwrap();
        assert!(fresh.is_trained());
        assert_eq!(fresh.score(&data, &ctx).unwrap(), trained.score(&data, &ctx).unwrap());
        assert_eq!(fresh.predict(&data, &ctx).unwrap(), trained.predict(&data, &ctx).unwrap());
    }
}
