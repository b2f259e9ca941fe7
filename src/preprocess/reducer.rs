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

//! Linear dimensionality reduction (PCA) for wide event tables.
//!
//! Components are the leading eigenvectors of the covariance matrix of the
//! training data, extracted by power iteration with deflation. Initial
//! vectors come from a seeded `ChaCha8Rng`, so a fixed seed gives a fixed
//! projection.

use crate::data::{FeatureFrame, FeatureSchema};
use crate::error::{Result, SieveError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const MAX_ITERATIONS: usize = 500;
const TOLERANCE: f64 = 1e-10;

/// Fitted projection onto the leading principal components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reducer {
    input_width: usize,
    mean: Vec<f64>,
    /// Row-major `n_components x input_width`
    components: Vec<f64>,
    explained_variance: Vec<f64>,
    total_variance: f64,
    output_schema: FeatureSchema,
}

impl Reducer {
    /// Learn `target_dims` components from `frame`.
    ///
    /// The component count is capped at the input width.
    pub fn fit(frame: &FeatureFrame, target_dims: usize, seed: u64) -> Result<Self> {
        profiling::scope!("Reducer::fit");
        if frame.n_rows() < 2 {
            return Err(SieveError::Data(
                "dimensionality reduction needs at least 2 rows".to_string(),
            ));
        }
        if target_dims == 0 {
            return Err(SieveError::InvalidConfig(
                "reduced dimensionality must be at least 1".to_string(),
            ));
        }

        let d = frame.n_features();
        let k = target_dims.min(d);
        let mean: Vec<f64> = (0..d)
            .map(|j| frame.column(j).sum::<f64>() / frame.n_rows() as f64)
            .collect();

        let cov = covariance(frame, &mean);
        let total_variance = (0..d).map(|i| cov[i * d + i]).sum::<f64>();
        let (explained_variance, vectors) = leading_eigenvectors(&cov, d, k, seed);

        let output_schema = FeatureSchema::new((1..=k).map(|i| format!("pc_{i}")))?;
        Ok(Self {
            input_width: d,
            mean,
            components: vectors.into_iter().flatten().collect(),
            explained_variance,
            total_variance,
            output_schema,
        })
    }

    /// Project `frame` onto the fitted components
    pub fn transform(&self, frame: &FeatureFrame) -> Result<FeatureFrame> {
        profiling::scope!("Reducer::transform");
        if frame.n_features() != self.input_width {
            return Err(SieveError::SchemaMismatch(format!(
                "reducer expects {} features, input has {}",
                self.input_width,
                frame.n_features()
            )));
        }

        let values: Vec<f64> = frame
            .rows()
            .flat_map(|row| {
                self.components
                    .chunks_exact(self.input_width)
                    .map(move |component| {
                        row.iter()
                            .zip(&self.mean)
                            .zip(component)
                            .map(|((&x, &m), &w)| (x - m) * w)
                            .sum::<f64>()
                    })
            })
            .collect();

        FeatureFrame::from_flat(self.output_schema.clone(), frame.n_rows(), values)
    }

    pub const fn input_width(&self) -> usize {
        self.input_width
    }

    pub fn n_components(&self) -> usize {
        self.explained_variance.len()
    }

    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }

    /// Share of the total training variance captured by each component
    pub fn explained_variance_ratio(&self) -> Vec<f64> {
        let total = self.total_variance.max(1e-12);
        self.explained_variance.iter().map(|v| v / total).collect()
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        let k = self.explained_variance.len();
        if k == 0 || self.output_schema.len() != k {
            return Err("reducer has no components".to_string());
        }
        if self.mean.len() != self.input_width || self.components.len() != k * self.input_width {
            return Err(format!(
                "reducer matrix is not {k} x {} as declared",
                self.input_width
            ));
        }
        Ok(())
    }
}

/// Sample covariance matrix, row-major `d x d`
fn covariance(frame: &FeatureFrame, mean: &[f64]) -> Vec<f64> {
    let d = mean.len();
    let denom = (frame.n_rows() as f64 - 1.0).max(1.0);
    let columns: Vec<Vec<f64>> = (0..d)
        .map(|j| frame.column(j).map(|x| x - mean[j]).collect())
        .collect();

    let upper: Vec<Vec<f64>> = (0..d)
        .into_par_iter()
        .map(|i| {
            (i..d)
                .map(|j| dot(&columns[i], &columns[j]) / denom)
                .collect()
        })
        .collect();

    let mut cov = vec![0.0; d * d];
    for (i, row) in upper.into_iter().enumerate() {
        for (offset, value) in row.into_iter().enumerate() {
            let j = i + offset;
            cov[i * d + j] = value;
            cov[j * d + i] = value;
        }
    }
    cov
}

/// Top-`k` eigenpairs of a symmetric matrix, largest eigenvalue first.
///
/// Deflation can leave nearly degenerate pairs slightly out of order when
/// iteration stops early, so eigenvalues are re-measured as Rayleigh
/// quotients on `cov` and the pairs sorted at the end.
fn leading_eigenvectors(cov: &[f64], d: usize, k: usize, seed: u64) -> (Vec<f64>, Vec<Vec<f64>>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut work = cov.to_vec();
    let mut eigenvectors: Vec<Vec<f64>> = Vec::with_capacity(k);

    for _ in 0..k {
        let mut v: Vec<f64> = (0..d).map(|_| rng.random_range(-1.0..1.0)).collect();
        orthogonalize(&mut v, &eigenvectors);
        normalize(&mut v);

        let mut eigenvalue = 0.0;
        for _ in 0..MAX_ITERATIONS {
            let mut w = mat_vec(&work, &v);
            let previous = eigenvalue;
            eigenvalue = dot(&v, &w);
            orthogonalize(&mut w, &eigenvectors);
            if normalize(&mut w) < 1e-12 {
                // Remaining spectrum is zero; keep the orthogonal start vector
                break;
            }
            let diff = v
                .iter()
                .zip(&w)
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
                .sqrt();
            v = w;
            let settled = (eigenvalue - previous).abs() <= TOLERANCE * eigenvalue.abs().max(1.0);
            if diff < TOLERANCE || (settled && diff < TOLERANCE.sqrt()) {
                break;
            }
        }

        // Deterministic sign: largest magnitude entry is positive
        let pivot = v
            .iter()
            .copied()
            .fold(0.0_f64, |best, x| if x.abs() > best.abs() { x } else { best });
        if pivot < 0.0 {
            v.iter_mut().for_each(|x| *x = -*x);
        }

        let eigenvalue = eigenvalue.max(0.0);
        for i in 0..d {
            for j in 0..d {
                work[i * d + j] -= eigenvalue * v[i] * v[j];
            }
        }
        eigenvectors.push(v);
    }

    let mut pairs: Vec<(f64, Vec<f64>)> = eigenvectors
        .into_iter()
        .map(|v| (dot(&v, &mat_vec(cov, &v)).max(0.0), v))
        .collect();
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));
    pairs.into_iter().unzip()
}

fn mat_vec(matrix: &[f64], v: &[f64]) -> Vec<f64> {
    matrix.chunks_exact(v.len()).map(|row| dot(row, v)).collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale to unit length, returning the original norm
fn normalize(v: &mut [f64]) -> f64 {
    let norm = dot(v, v).sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    norm
}

fn orthogonalize(v: &mut [f64], basis: &[Vec<f64>]) {
    for b in basis {
        let proj = dot(v, b);
        v.iter_mut().zip(b).for_each(|(x, y)| *x -= proj * y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(rows: Vec<Vec<f64>>) -> FeatureFrame {
        let width = rows[0].len();
        let schema = FeatureSchema::new((0..width).map(|i| format!("E{i}"))).unwrap();
        FeatureFrame::new(schema, rows).unwrap()
    }

    #[test]
    fn test_first_component_follows_dominant_axis() {
        let data = frame(vec![
            vec![1.0, 2.0, 0.1],
            vec![2.0, 4.0, -0.1],
            vec![3.0, 6.0, 0.1],
            vec![4.0, 8.0, -0.1],
            vec![5.0, 10.0, 0.0],
        ]);
        let reducer = Reducer::fit(&data, 2, 42).unwrap();
        let ratio = reducer.explained_variance_ratio();

        assert_eq!(reducer.n_components(), 2);
        assert!(ratio[0] > 0.99, "first component explains {}", ratio[0]);
        assert!(reducer.explained_variance()[0] >= reducer.explained_variance()[1]);
    }

    #[test]
    fn test_components_are_orthonormal() {
        let data = frame(vec![
            vec![1.0, 0.0, 3.0, 2.0],
            vec![0.0, 2.0, 1.0, 5.0],
            vec![4.0, 1.0, 0.0, 1.0],
            vec![2.0, 3.0, 2.0, 0.0],
            vec![1.0, 1.0, 5.0, 3.0],
        ]);
        let reducer = Reducer::fit(&data, 3, 7).unwrap();
        let comps: Vec<&[f64]> = reducer.components.chunks_exact(4).collect();

        for (i, a) in comps.iter().enumerate() {
            for (j, b) in comps.iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((dot(a, b) - expected).abs() < 1e-6, "<c{i}, c{j}> = {}", dot(a, b));
            }
        }
    }

    #[test]
    fn test_same_seed_same_projection() {
        let data = frame(vec![
            vec![1.0, 5.0, 2.0],
            vec![3.0, 1.0, 4.0],
            vec![2.0, 2.0, 2.0],
            vec![0.0, 4.0, 1.0],
        ]);
        let a = Reducer::fit(&data, 2, 42).unwrap();
        let b = Reducer::fit(&data, 2, 42).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.transform(&data).unwrap(), b.transform(&data).unwrap());
    }

    #[test]
    fn test_output_width_and_schema() {
        let data = frame(vec![vec![1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0], vec![0.0, 0.0, 1.0]]);
        let reducer = Reducer::fit(&data, 2, 42).unwrap();
        let projected = reducer.transform(&data).unwrap();

        assert_eq!(projected.n_features(), 2);
        assert_eq!(projected.schema().names().collect::<Vec<_>>(), vec!["pc_1", "pc_2"]);
    }

    #[test]
    fn test_wide_random_data_variance_is_non_increasing() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let rows: Vec<Vec<f64>> = (0..160)
            .map(|_| (0..110).map(|_| f64::from(rng.random_range(0..4_u8))).collect())
            .collect();
        let reducer = Reducer::fit(&frame(rows), 100, 42).unwrap();
        let variance = reducer.explained_variance();

        assert_eq!(variance.len(), 100);
        for (i, pair) in variance.windows(2).enumerate() {
            assert!(pair[0] >= pair[1], "component {i}: {} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let reducer = Reducer::fit(&frame(vec![vec![1.0, 2.0], vec![2.0, 1.0]]), 1, 42).unwrap();
        let err = reducer.transform(&frame(vec![vec![1.0, 2.0, 3.0]])).unwrap_err();
        assert!(matches!(err, SieveError::SchemaMismatch(_)));
    }
}
