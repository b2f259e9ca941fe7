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

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use logsieve::anomaly::save_anomalies_csv;
use logsieve::{
    load_csv, AnomalyDetector, DetectionReport, DetectorConfig, IsolationForestDetector, LogSink,
    ModelBundle, PipelineContext,
};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

#[cfg(feature = "ram-profiling")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

#[derive(Parser, Debug)]
#[command(name = "logsieve")]
#[command(author = "LogSieve Team")]
#[command(version)]
#[command(about = "Isolation-forest anomaly detection for vectorized log sequences", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Append diagnostics to this file instead of stderr
    #[arg(long, value_name = "LOG_FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Suppress diagnostics entirely
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Detector config file (defaults to the user config directory)
    #[arg(long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Path for the DHAT heap profiling output (only used when built with --features ram-profiling)
    #[cfg(feature = "ram-profiling")]
    #[arg(
        long = "profile-output",
        value_name = "PROFILE_FILE",
        default_value = "dhat-heap.json",
        global = true
    )]
    profile_output: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit a model on an event-count matrix and save it
    Train {
        /// CSV file, one row per sequence, one column per event type
        #[arg(long, value_name = "CSV")]
        data: PathBuf,

        /// Where to write the model
        #[arg(long, value_name = "MODEL")]
        model: PathBuf,

        /// Expected share of anomalies in the training data
        #[arg(long)]
        contamination: Option<f64>,

        /// Number of isolation trees
        #[arg(long)]
        trees: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// Store the effective settings as the user config
        #[arg(long)]
        save_config: bool,
    },
    /// Score a CSV against a saved model and report the anomalies
    Detect {
        #[arg(long, value_name = "CSV")]
        data: PathBuf,

        #[arg(long, value_name = "MODEL")]
        model: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Number of anomalies listed in the report
        #[arg(long)]
        top: Option<usize>,

        /// Write the report here instead of stdout
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Also write the flagged records with their feature values as CSV
        #[arg(long, value_name = "CSV")]
        anomalies_csv: Option<PathBuf>,
    },
    /// Print metadata of a saved model
    Inspect {
        #[arg(long, value_name = "MODEL")]
        model: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    let args = Args::parse();

    #[cfg(feature = "ram-profiling")]
    let _profiler = dhat::Profiler::builder()
        .file_name(args.profile_output.clone())
        .build();

    let sink = if args.quiet {
        LogSink::None
    } else if let Some(path) = &args.log_file {
        LogSink::File(path.clone())
    } else {
        LogSink::Console
    };
    let ctx = PipelineContext::new(sink).context("Failed to set up logging")?;

    ctx.in_scope(|| {
        tracing::info!("LogSieve starting up (version {})", env!("CARGO_PKG_VERSION"));
        #[cfg(feature = "cpu-profiling")]
        tracing::info!("CPU profiling enabled with Tracy - run Tracy profiler to connect");
    });

    let config = ctx.in_scope(|| load_config(args.config.as_deref()))?;

    match args.command {
        Command::Train {
            data,
            model,
            contamination,
            trees,
            seed,
            save_config,
        } => {
            let mut config = config;
            if let Some(contamination) = contamination {
                config.contamination = contamination;
            }
            if let Some(trees) = trees {
                config.n_trees = trees;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            config.validate().context("Invalid detector settings")?;
            if save_config {
                store_config(&config, args.config.as_deref(), &ctx)?;
            }
            train(config, &data, &model, &ctx)
        }
        Command::Detect {
            data,
            model,
            format,
            top,
            output,
            anomalies_csv,
        } => {
            let mut config = config;
            if let Some(top) = top {
                config.top_k_report = top;
            }
            let outputs = DetectOutputs {
                format,
                report: output.as_deref(),
                anomalies_csv: anomalies_csv.as_deref(),
            };
            detect(config, &data, &model, &outputs, &ctx)
        }
        Command::Inspect { model } => inspect(&model, &ctx),
    }
}

fn load_config(path: Option<&Path>) -> Result<DetectorConfig> {
    match path {
        Some(path) => DetectorConfig::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(DetectorConfig::load()),
    }
}

fn store_config(config: &DetectorConfig, path: Option<&Path>, ctx: &PipelineContext) -> Result<()> {
    ctx.in_scope(|| match path {
        Some(path) => config
            .save_to(path)
            .with_context(|| format!("Failed to save config {}", path.display())),
        None => config
            .save()
            .map(|_| ())
            .context("Failed to save user config"),
    })
}

fn train(config: DetectorConfig, data: &Path, model: &Path, ctx: &PipelineContext) -> Result<()> {
    let frame = load_csv(data, ctx).with_context(|| format!("Failed to load {}", data.display()))?;

    let mut detector = IsolationForestDetector::new(config);
    let summary = detector.train(&frame, ctx).context("Training failed")?;
    detector
        .save(model, ctx)
        .with_context(|| format!("Failed to save model to {}", model.display()))?;

    println!(
        "Trained on {} records with {} features ({} model dimensions{})",
        summary.rows,
        summary.input_features,
        summary.model_dims,
        if summary.reduced { ", PCA" } else { "" }
    );
    println!(
        "Training anomalies: {} ({:.2}%), threshold {:.6}",
        summary.anomalies_flagged, summary.anomaly_rate, summary.threshold
    );
    println!("Model saved to {}", model.display());
    Ok(())
}

/// Where and how `detect` writes its results
struct DetectOutputs<'a> {
    format: OutputFormat,
    report: Option<&'a Path>,
    anomalies_csv: Option<&'a Path>,
}

fn detect(
    config: DetectorConfig,
    data: &Path,
    model: &Path,
    outputs: &DetectOutputs<'_>,
    ctx: &PipelineContext,
) -> Result<()> {
    let mut detector = IsolationForestDetector::new(config);
    detector
        .load(model, ctx)
        .with_context(|| format!("Failed to load model {}", model.display()))?;
    let frame = load_csv(data, ctx).with_context(|| format!("Failed to load {}", data.display()))?;
    let (report, aligned) = detector.analyze(&frame, ctx).context("Detection failed")?;
    let report = report.with_analyzed_file(data);

    if let Some(path) = outputs.anomalies_csv {
        save_anomalies_csv(path, &aligned, &report.anomalies, ctx)
            .with_context(|| format!("Failed to write anomalies to {}", path.display()))?;
    }

    let rendered = match outputs.format {
        OutputFormat::Text => render_text(&report),
        OutputFormat::Json => {
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        }
    };

    match outputs.report {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            ctx.in_scope(|| tracing::info!("Report written to {}", path.display()));
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

fn inspect(model: &Path, ctx: &PipelineContext) -> Result<()> {
    let bundle = ModelBundle::load(model, ctx)
        .with_context(|| format!("Failed to load model {}", model.display()))?;
    let forest = bundle.forest();

    println!("Model:          {}", model.display());
    println!("Created:        {}", bundle.created_at().to_rfc3339());
    println!("Written by:     logsieve {}", bundle.crate_version());
    println!("Features:       {}", bundle.schema().len());
    match bundle.reducer() {
        Some(reducer) => println!(
            "Reduction:      PCA to {} dims ({:.1}% variance kept)",
            reducer.n_components(),
            reducer.explained_variance_ratio().iter().sum::<f64>() * 100.0
        ),
        None => println!("Reduction:      none"),
    }
    println!("Trees:          {}", forest.trees().len());
    println!("Sample size:    {}", forest.sample_size().unwrap_or(0));
    println!("Contamination:  {}", forest.contamination());
    println!("Threshold:      {:.6}", bundle.threshold()?);
    Ok(())
}

fn render_text(report: &DetectionReport) -> String {
    let info = &report.model_info;
    let mut out = String::new();

    if let Some(file) = &report.analyzed_file {
        let _ = writeln!(out, "File analyzed:    {file}");
    }
    let _ = writeln!(
        out,
        "Analyzed at:      {}",
        report.analyzed_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out, "Records analyzed: {}", report.total_records);
    let _ = writeln!(
        out,
        "Anomalies:        {} ({:.2}%)",
        report.anomalies_count, report.anomaly_rate
    );
    let _ = writeln!(
        out,
        "Model:            {} features, {} trees, contamination {}, PCA {}, threshold {:.6}",
        info.n_features,
        info.n_trees,
        info.contamination,
        if info.uses_reduction { "yes" } else { "no" },
        info.threshold
    );

    let reconciliation = &report.reconciliation;
    if !reconciliation.is_exact() {
        let _ = writeln!(
            out,
            "Schema:           {} missing features zero-filled, {} unknown features dropped",
            reconciliation.added.len(),
            reconciliation.dropped.len()
        );
    }

    if report.top_anomalies.is_empty() {
        let _ = writeln!(out, "\nNo anomalies found.");
        return out;
    }

    let _ = writeln!(out, "\nTop anomalies:");
    for anomaly in &report.top_anomalies {
        let rank = anomaly.rank.unwrap_or_default();
        let _ = write!(out, "  #{rank} record {}", anomaly.index);
        if let Some(id) = &anomaly.id {
            let _ = write!(out, " ({id})");
        }
        let _ = writeln!(out, " score {:.6}", anomaly.score);
        if !anomaly.top_features.is_empty() {
            let features: Vec<String> = anomaly
                .top_features
                .iter()
                .map(|c| format!("{}={}", c.feature, c.value))
                .collect();
            let _ = writeln!(out, "      {}", features.join(", "));
        }
    }
    out
}
