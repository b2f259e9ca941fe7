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


//! CSV export of flagged records for downstream plotting and reporting.

use crate::anomaly::ranker::AnomalyResult;
use crate::context::PipelineContext;
use crate::data::loader::ID_COLUMN_NAME;
use crate::data::FeatureFrame;
use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write one CSV line per anomaly, most severe first.
///
/// Columns are the identifier (only when `aligned` has ids), the record
/// index, its rank, `anomaly_score`, then every feature of `aligned` with
/// its unscaled value.
pub fn write_anomalies_csv<W: Write>(
    writer: W,
    aligned: &FeatureFrame,
    anomalies: &[AnomalyResult],
) -> Result<()> {
    let with_ids = aligned.ids().is_some();
    let mut csv = csv::Writer::from_writer(writer);

    let mut header: Vec<&str> = Vec::with_capacity(aligned.n_features() + 4);
    if with_ids {
        header.push(ID_COLUMN_NAME);
    }
    header.extend(["index", "rank", "anomaly_score"]);
    header.extend(aligned.schema().names());
    csv.write_record(&header)?;

    for anomaly in anomalies {
        let mut record: Vec<String> = Vec::with_capacity(header.len());
        if with_ids {
            record.push(aligned.id(anomaly.index).unwrap_or_default().to_string());
        }
        record.push(anomaly.index.to_string());
        record.push(anomaly.rank.map(|r| r.to_string()).unwrap_or_default());
        record.push(anomaly.score.to_string());
        record.extend(aligned.row(anomaly.index).iter().map(f64::to_string));
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(())
}

/// Write the anomaly CSV to `path`, creating its directory
pub fn save_anomalies_csv(
    path: &Path,
    aligned: &FeatureFrame,
    anomalies: &[AnomalyResult],
    ctx: &PipelineContext,
) -> Result<()> {
    ctx.in_scope(|| {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        write_anomalies_csv(BufWriter::new(file), aligned, anomalies)?;
        tracing::info!("Saved {} anomalies to {}", anomalies.len(), path.display());
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::AnomalyRanker;
    use crate::data::FeatureSchema;

    fn aligned(with_ids: bool) -> FeatureFrame {
        let frame = FeatureFrame::new(
            FeatureSchema::new(["E1", "E2"]).unwrap(),
            vec![vec![1.0, 0.0], vec![40.0, 2.5], vec![0.0, 90.0]],
        )
        .unwrap();
        if with_ids {
            frame
                .with_ids(vec!["blk_a".into(), "blk_b".into(), "blk_c".into()])
                .unwrap()
        } else {
            frame
        }
    }

    fn flagged(frame: &FeatureFrame) -> Vec<AnomalyResult> {
        AnomalyRanker::new(3)
            .rank(frame, &[0.3, 0.7, 0.9], 0.5)
            .anomalies()
            .cloned()
            .collect()
    }

    #[test]
    fn test_rows_in_severity_order_with_ids() {
        let frame = aligned(true);
        let mut out = Vec::new();
        write_anomalies_csv(&mut out, &frame, &flagged(&frame)).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "TaskID,index,rank,anomaly_score,E1,E2",
                "blk_c,2,1,0.9,0,90",
                "blk_b,1,2,0.7,40,2.5",
            ]
        );
    }

    #[test]
    fn test_no_identifier_column_without_ids() {
        let frame = aligned(false);
        let mut out = Vec::new();
        write_anomalies_csv(&mut out, &frame, &flagged(&frame)).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("index,rank,anomaly_score,E1,E2\n"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_save_creates_directory_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results").join("anomalies_trace.csv");
        let ctx = PipelineContext::silent();
        let frame = aligned(true);

        save_anomalies_csv(&path, &frame, &flagged(&frame), &ctx).unwrap();

        let reloaded = crate::data::load_csv(&path, &ctx).unwrap();
        assert_eq!(reloaded.n_rows(), 2);
        assert_eq!(reloaded.id(0), Some("blk_c"));
        assert_eq!(reloaded.value(1, "E1"), Some(40.0));
        assert_eq!(reloaded.value(0, "anomaly_score"), Some(0.9));
    }

    #[test]
    fn test_empty_anomaly_list_writes_header_only() {
        let frame = aligned(false);
        let mut out = Vec::new();
        write_anomalies_csv(&mut out, &frame, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "index,rank,anomaly_score,E1,E2\n");
    }
}
