use linfa::prelude::*;
use linfa::DatasetBase;
use linfa_clustering::{KMeans, KMeansError};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

pub const RANDOM_SEED: u64 = 42;
const N_RUNS: usize = 10;
const MAX_ITERATIONS: u64 = 300;
const TOLERANCE: f64 = 1e-4;

#[derive(Debug, thiserror::Error)]
pub enum ClusteringError {
    #[error("No complete students available for clustering")]
    NoSamples,
    #[error("k must be at least 2 (got {0})")]
    InvalidK(usize),
    #[error("k cannot be greater than number of students (k={k}, students={samples})")]
    TooFewSamples { k: usize, samples: usize },
    #[error("k={k} exceeds the number of distinct data points ({distinct})")]
    TooFewDistinct { k: usize, distinct: usize },
    #[error("k-means failed: {0}")]
    KMeans(#[from] KMeansError),
    #[error("invalid feature matrix: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl ClusteringError {
    /// Errors caused by the request or the data rather than the service.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ClusteringError::NoSamples
                | ClusteringError::InvalidK(_)
                | ClusteringError::TooFewSamples { .. }
                | ClusteringError::TooFewDistinct { .. }
        )
    }
}

/// Zero-mean, unit-variance scaling per column (population variance).
#[derive(Debug, Clone)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(x: &Array2<f64>) -> Self {
        let mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x.ncols()));
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        StandardScaler { mean, scale }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean) / &self.scale
    }

    pub fn inverse_transform(&self, x: &Array2<f64>) -> Array2<f64> {
        x * &self.scale + &self.mean
    }
}

#[derive(Debug, Clone)]
pub struct ClusterFit {
    pub k: usize,
    pub labels: Vec<usize>,
    /// Cluster centers in the original feature units.
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
    /// The standardized matrix the model was fitted on.
    pub scaled: Array2<f64>,
}

/// Build an `n x d` matrix from row vectors.
pub fn feature_matrix(rows: &[Vec<f64>]) -> Result<Array2<f64>, ClusteringError> {
    let ncols = rows.first().map(Vec::len).unwrap_or(0);
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Ok(Array2::from_shape_vec((rows.len(), ncols), flat)?)
}

pub fn distinct_rows(x: &Array2<f64>) -> usize {
    x.outer_iter()
        .map(|row| row.iter().map(|v| v.to_bits()).collect::<Vec<u64>>())
        .collect::<HashSet<_>>()
        .len()
}

fn validate_k(k: usize, x: &Array2<f64>) -> Result<(), ClusteringError> {
    if x.nrows() == 0 {
        return Err(ClusteringError::NoSamples);
    }
    if k < 2 {
        return Err(ClusteringError::InvalidK(k));
    }
    if k > x.nrows() {
        return Err(ClusteringError::TooFewSamples {
            k,
            samples: x.nrows(),
        });
    }
    let distinct = distinct_rows(x);
    if k > distinct {
        return Err(ClusteringError::TooFewDistinct { k, distinct });
    }
    Ok(())
}

/// k-means on an already standardized matrix: labels, centroids (scaled units), inertia.
pub fn kmeans_scaled(
    scaled: &Array2<f64>,
    k: usize,
) -> Result<(Vec<usize>, Array2<f64>, f64), ClusteringError> {
    validate_k(k, scaled)?;

    let rng = StdRng::seed_from_u64(RANDOM_SEED);
    let dataset = DatasetBase::from(scaled.clone());
    let model = KMeans::params_with_rng(k, rng)
        .n_runs(N_RUNS)
        .max_n_iterations(MAX_ITERATIONS)
        .tolerance(TOLERANCE)
        .fit(&dataset)?;

    let labels: Array1<usize> = model.predict(scaled);
    Ok((labels.to_vec(), model.centroids().clone(), model.inertia()))
}

/// Standardize `features`, cluster them into `k` groups and map centers back.
pub fn fit_kmeans(features: &Array2<f64>, k: usize) -> Result<ClusterFit, ClusteringError> {
    if features.nrows() == 0 {
        return Err(ClusteringError::NoSamples);
    }
    let scaler = StandardScaler::fit(features);
    let scaled = scaler.transform(features);
    let (labels, centers, inertia) = kmeans_scaled(&scaled, k)?;

    let centroids = scaler
        .inverse_transform(&centers)
        .outer_iter()
        .map(|row| row.to_vec())
        .collect();

    tracing::debug!(k, samples = features.nrows(), inertia, "k-means fitted");

    Ok(ClusterFit {
        k,
        labels,
        centroids,
        inertia,
        scaled,
    })
}
