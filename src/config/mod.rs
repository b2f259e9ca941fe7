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

use crate::error::{Result, SieveError};
use crate::forest::isolation::{
    IsolationForest, DEFAULT_CONTAMINATION, DEFAULT_MAX_SAMPLE_SIZE, DEFAULT_N_TREES, DEFAULT_SEED,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Feature count above which the scaled data is projected with PCA
pub const DEFAULT_REDUCTION_THRESHOLD: usize = 100;
/// Output width of the PCA projection
pub const DEFAULT_REDUCED_DIMS: usize = 100;
pub const DEFAULT_TOP_K_REPORT: usize = 5;
pub const DEFAULT_TOP_K_ATTRIBUTION: usize = 3;

/// Detector settings, stored in the user config directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Expected share of anomalies in the training data, in (0, 1)
    pub contamination: f64,
    pub n_trees: usize,
    /// Rows drawn (without replacement) for each tree
    pub max_sample_size: usize,
    pub reduction_threshold: usize,
    pub reduced_dims: usize,
    /// Anomalies listed in the report
    pub top_k_report: usize,
    /// Features listed per reported anomaly
    pub top_k_attribution: usize,
    pub seed: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            contamination: DEFAULT_CONTAMINATION,
            n_trees: DEFAULT_N_TREES,
            max_sample_size: DEFAULT_MAX_SAMPLE_SIZE,
            reduction_threshold: DEFAULT_REDUCTION_THRESHOLD,
            reduced_dims: DEFAULT_REDUCED_DIMS,
            top_k_report: DEFAULT_TOP_K_REPORT,
            top_k_attribution: DEFAULT_TOP_K_ATTRIBUTION,
            seed: DEFAULT_SEED,
        }
    }
}

impl DetectorConfig {
    /// Get the path to the user config file
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("logsieve").join("config.json"))
    }

    /// Load the user config, returning defaults if not found or unreadable
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            tracing::info!("No detector config found, using defaults");
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Load and validate a config file at an explicit location
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| SieveError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        tracing::info!("Loaded detector config from {}", path.display());
        Ok(config)
    }

    /// Save to the user config directory, returning the path written
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path().ok_or_else(|| {
            SieveError::InvalidConfig("could not determine config directory".to_string())
        })?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SieveError::InvalidConfig(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, json)?;
        tracing::info!("Saved detector config to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.contamination > 0.0 && self.contamination < 1.0) {
            return Err(SieveError::InvalidConfig(format!(
                "contamination must be in (0, 1), got {}",
                self.contamination
            )));
        }
        if self.n_trees == 0 {
            return Err(SieveError::InvalidConfig("n_trees must be at least 1".to_string()));
        }
        if self.max_sample_size < 2 {
            return Err(SieveError::InvalidConfig(
                "max_sample_size must be at least 2".to_string(),
            ));
        }
        if self.reduced_dims == 0 || self.reduced_dims > self.reduction_threshold {
            return Err(SieveError::InvalidConfig(format!(
                "reduced_dims must be in 1..={}, got {}",
                self.reduction_threshold, self.reduced_dims
            )));
        }
        Ok(())
    }

    /// Unfitted forest carrying these settings
    pub fn forest(&self) -> IsolationForest {
        IsolationForest::new()
            .with_n_trees(self.n_trees)
            .with_max_sample_size(self.max_sample_size)
            .with_contamination(self.contamination)
            .with_seed(self.seed)
    }
}
