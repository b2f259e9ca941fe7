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

//! End-to-end runs of the train / persist / detect lifecycle.

use logsieve::anomaly::save_anomalies_csv;
use logsieve::{
    load_csv, AnomalyDetector, DetectorConfig, FeatureFrame, FeatureSchema,
    IsolationForestDetector, PipelineContext, SieveError,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt::Write as _;

const N_ROWS: usize = 1000;
const N_FEATURES: usize = 20;
const N_OUTLIERS: usize = 10;

fn schema(width: usize) -> FeatureSchema {
    FeatureSchema::new((1..=width).map(|i| format!("E{i}"))).unwrap()
}

/// 990 uniform rows in [0, 5) followed by 10 rows with two huge counts each
fn scenario_rows() -> Vec<Vec<f64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut rows: Vec<Vec<f64>> = (0..N_ROWS - N_OUTLIERS)
        .map(|_| (0..N_FEATURES).map(|_| rng.random_range(0.0..5.0)).collect())
        .collect();
    for i in 0..N_OUTLIERS {
        let mut row: Vec<f64> = (0..N_FEATURES).map(|_| rng.random_range(0.0..5.0)).collect();
        row[2 * i] = 500.0 + 10.0 * i as f64;
        row[2 * i + 1] = 505.0 + 10.0 * i as f64;
        rows.push(row);
    }
    rows
}

fn scenario_frame() -> FeatureFrame {
    FeatureFrame::new(schema(N_FEATURES), scenario_rows()).unwrap()
}

fn config() -> DetectorConfig {
    DetectorConfig {
        n_trees: 100,
        ..DetectorConfig::default()
    }
}

fn trained(data: &FeatureFrame) -> IsolationForestDetector {
    let mut detector = IsolationForestDetector::new(config());
    detector.train(data, &PipelineContext::silent()).unwrap();
    detector
}

#[test]
fn test_planted_outliers_are_exactly_the_flagged_records() {
    let data = scenario_frame();
    let ctx = PipelineContext::silent();
    let mut detector = IsolationForestDetector::new(config());

    let summary = detector.train(&data, &ctx).unwrap();
    assert_eq!(summary.rows, N_ROWS);
    assert_eq!(summary.model_dims, N_FEATURES);
    assert!(!summary.reduced);
    assert_eq!(summary.anomalies_flagged, N_OUTLIERS);

    let report = detector.detect(&data, &ctx).unwrap();
    assert_eq!(report.total_records, N_ROWS);
    assert_eq!(report.anomalies_count, N_OUTLIERS);
    assert!((report.anomaly_rate - 1.0).abs() < 1e-9);
    assert_eq!(report.top_anomalies.len(), 5);
    assert!(!report.model_info.uses_reduction);
    assert_eq!(report.model_info.n_features, N_FEATURES);
    assert_eq!(report.model_info.n_trees, 100);

    let mut flagged: Vec<usize> = report.anomalies.iter().map(|a| a.index).collect();
    flagged.sort_unstable();
    let expected: Vec<usize> = (N_ROWS - N_OUTLIERS..N_ROWS).collect();
    assert_eq!(flagged, expected);

    for (position, anomaly) in report.anomalies.iter().enumerate() {
        assert_eq!(anomaly.rank, Some(position + 1));
        assert!(anomaly.score > report.model_info.threshold);
        let i = anomaly.index - (N_ROWS - N_OUTLIERS);
        let top: Vec<&str> = anomaly.top_features.iter().map(|c| c.feature.as_str()).collect();
        assert_eq!(top.len(), 3);
        assert_eq!(top[0], format!("E{}", 2 * i + 2));
        assert_eq!(top[1], format!("E{}", 2 * i + 1));
    }
    assert!(report
        .anomalies
        .windows(2)
        .all(|pair| pair[0].score >= pair[1].score));
}

#[test]
fn test_scores_stay_in_unit_interval() {
    let data = scenario_frame();
    let scores = trained(&data)
        .score(&data, &PipelineContext::silent())
        .unwrap();
    assert_eq!(scores.len(), N_ROWS);
    assert!(scores.iter().all(|&s| s > 0.0 && s < 1.0));
}

#[test]
fn test_saved_model_scores_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("models").join("hdfs.json");
    let ctx = PipelineContext::silent();
    let data = scenario_frame();

    let detector = trained(&data);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    detector.save(&path, &ctx).unwrap();

    let mut restored = IsolationForestDetector::new(config());
    restored.load(&path, &ctx).unwrap();

    assert_eq!(
        restored.score(&data, &ctx).unwrap(),
        detector.score(&data, &ctx).unwrap()
    );
    let (before, after) = (
        detector.detect(&data, &ctx).unwrap(),
        restored.detect(&data, &ctx).unwrap(),
    );
    assert_eq!(after.anomalies, before.anomalies);
    assert_eq!(after.model_info, before.model_info);
}

#[test]
fn test_missing_column_scores_like_explicit_zero() {
    let ctx = PipelineContext::silent();
    let data = scenario_frame();
    let detector = trained(&data);

    let probe_rows: Vec<Vec<f64>> = scenario_rows().into_iter().step_by(50).collect();
    let zeroed: Vec<Vec<f64>> = probe_rows
        .iter()
        .map(|row| {
            let mut row = row.clone();
            row[4] = 0.0;
            row
        })
        .collect();
    let zeroed = FeatureFrame::new(schema(N_FEATURES), zeroed).unwrap();

    let without: Vec<Vec<f64>> = probe_rows
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .filter(|&(j, _)| j != 4)
                .map(|(_, &v)| v)
                .collect()
        })
        .collect();
    let without_schema =
        FeatureSchema::new((1..=N_FEATURES).filter(|&i| i != 5).map(|i| format!("E{i}"))).unwrap();
    let without = FeatureFrame::new(without_schema, without).unwrap();

    assert_eq!(
        detector.score(&without, &ctx).unwrap(),
        detector.score(&zeroed, &ctx).unwrap()
    );
    let report = detector.detect(&without, &ctx).unwrap();
    assert_eq!(report.reconciliation.added, vec!["E5".to_string()]);
    assert!(report.reconciliation.dropped.is_empty());
}

#[test]
fn test_column_order_and_extra_columns_do_not_change_scores() {
    let ctx = PipelineContext::silent();
    let data = scenario_frame();
    let detector = trained(&data);
    let rows = scenario_rows();

    let mut names: Vec<String> = (1..=N_FEATURES).rev().map(|i| format!("E{i}")).collect();
    names.push("E999".to_string());
    let shuffled: Vec<Vec<f64>> = rows
        .iter()
        .map(|row| {
            let mut out: Vec<f64> = row.iter().rev().copied().collect();
            out.push(1234.0);
            out
        })
        .collect();
    let shuffled = FeatureFrame::new(FeatureSchema::new(names).unwrap(), shuffled).unwrap();

    assert_eq!(
        detector.score(&shuffled, &ctx).unwrap(),
        detector.score(&data, &ctx).unwrap()
    );
    let report = detector.detect(&shuffled, &ctx).unwrap();
    assert_eq!(report.reconciliation.dropped, vec!["E999".to_string()]);
}

#[test]
fn test_disjoint_schema_is_rejected() {
    let ctx = PipelineContext::silent();
    let detector = trained(&scenario_frame());
    let other = FeatureFrame::new(
        FeatureSchema::new(["X1", "X2"]).unwrap(),
        vec![vec![1.0, 2.0]],
    )
    .unwrap();

    assert!(matches!(
        detector.detect(&other, &ctx),
        Err(SieveError::SchemaMismatch(_))
    ));
}

#[test]
fn test_wide_input_is_reduced() {
    let ctx = PipelineContext::silent();
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let width = 110;
    let rows: Vec<Vec<f64>> = (0..160)
        .map(|_| (0..width).map(|_| f64::from(rng.random_range(0..4_u8))).collect())
        .collect();
    let data = FeatureFrame::new(schema(width), rows).unwrap();

    let mut detector = IsolationForestDetector::new(DetectorConfig {
        n_trees: 30,
        ..DetectorConfig::default()
    });
    let summary = detector.train(&data, &ctx).unwrap();
    assert!(summary.reduced);
    assert_eq!(summary.model_dims, 100);

    let report = detector.detect(&data, &ctx).unwrap();
    assert!(report.model_info.uses_reduction);
    assert_eq!(report.model_info.n_features, width);
}

#[test]
fn test_single_row_training_fails() {
    let data = FeatureFrame::new(schema(3), vec![vec![1.0, 2.0, 3.0]]).unwrap();
    let mut detector = IsolationForestDetector::new(config());
    let err = detector.train(&data, &PipelineContext::silent()).unwrap_err();
    assert!(matches!(err, SieveError::Data(_)));
    assert!(!detector.is_trained());
}

#[test]
fn test_csv_with_task_ids_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Event_occurrence_matrix.csv");
    let ctx = PipelineContext::silent();

    let mut csv = String::from("TaskID");
    for i in 1..=N_FEATURES {
        let _ = write!(csv, ",E{i}");
    }
    csv.push('\n');
    for (row_idx, row) in scenario_rows().iter().enumerate() {
        let _ = write!(csv, "blk_{row_idx}");
        for value in row {
            let _ = write!(csv, ",{value}");
        }
        csv.push('\n');
    }
    std::fs::write(&path, csv).unwrap();

    let data = load_csv(&path, &ctx).unwrap();
    assert_eq!(data.n_rows(), N_ROWS);
    assert_eq!(data.n_features(), N_FEATURES);

    let report = trained(&data).detect(&data, &ctx).unwrap();
    assert_eq!(report.anomalies_count, N_OUTLIERS);
    for anomaly in &report.anomalies {
        assert_eq!(anomaly.id, Some(format!("blk_{}", anomaly.index)));
    }
}

#[test]
fn test_flagged_records_export_with_unscaled_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results").join("anomalies_scenario.csv");
    let ctx = PipelineContext::silent();
    let data = scenario_frame();

    let (report, aligned) = trained(&data).analyze(&data, &ctx).unwrap();
    let report = report.with_analyzed_file(std::path::Path::new("scenario.csv"));
    assert_eq!(report.analyzed_file.as_deref(), Some("scenario.csv"));
    save_anomalies_csv(&path, &aligned, &report.anomalies, &ctx).unwrap();

    let exported = load_csv(&path, &ctx).unwrap();
    assert_eq!(exported.n_rows(), N_OUTLIERS);
    assert_eq!(exported.n_features(), N_FEATURES + 3);
    for (row, anomaly) in report.anomalies.iter().enumerate() {
        assert_eq!(exported.value(row, "index"), Some(anomaly.index as f64));
        assert_eq!(exported.value(row, "anomaly_score"), Some(anomaly.score));
        let i = anomaly.index - (N_ROWS - N_OUTLIERS);
        assert_eq!(
            exported.value(row, &format!("E{}", 2 * i + 1)),
            Some(500.0 + 10.0 * i as f64)
        );
    }
}
