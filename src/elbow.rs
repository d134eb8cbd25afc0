use ndarray::Array2;
use serde::Serialize;

use crate::metrics::QualityMetrics;
use crate::model::{distinct_rows, kmeans_scaled, ClusteringError, StandardScaler};

pub const K_MIN: usize = 2;
pub const K_MAX: usize = 10;
const SENSITIVITY: f64 = 1.0;

#[derive(Debug, Clone, Serialize)]
pub struct ElbowReport {
    pub wcss: Vec<f64>,
    pub recommended_k: usize,
    pub quality_metrics: QualityMetrics,
}

/// Within-cluster sum of squares for each k in `k_min..=k_max`, capped at the
/// number of distinct points.
pub fn compute_wcss(
    scaled: &Array2<f64>,
    k_min: usize,
    k_max: usize,
) -> Result<Vec<f64>, ClusteringError> {
    let k_max = k_max.min(distinct_rows(scaled));
    (k_min..=k_max)
        .map(|k| kmeans_scaled(scaled, k).map(|(_, _, inertia)| inertia))
        .collect()
}

/// Knee of a convex, decreasing WCSS curve (Kneedle), with a mid-range fallback.
pub fn recommend_k(wcss: &[f64], k_min: usize) -> usize {
    match knee_index(wcss) {
        Some(idx) => k_min + idx,
        None => (wcss.len() / 2).clamp(2, 5),
    }
}

fn knee_index(y: &[f64]) -> Option<usize> {
    let n = y.len();
    if n < 3 {
        return None;
    }

    let y_max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let y_min = y.iter().copied().fold(f64::INFINITY, f64::min);
    let range = y_max - y_min;
    if !range.is_finite() || range <= f64::EPSILON {
        return None;
    }

    let step = 1.0 / (n - 1) as f64;
    // Flipping the normalized curve turns the convex drop into a concave rise.
    let difference: Vec<f64> = y
        .iter()
        .enumerate()
        .map(|(i, v)| (y_max - v) / range - i as f64 * step)
        .collect();

    let mut threshold: Option<(usize, f64)> = None;
    for i in 0..n {
        let rises = i == 0 || difference[i] >= difference[i - 1];
        let falls = i == n - 1 || difference[i] >= difference[i + 1];
        if rises && falls {
            threshold = Some((i, difference[i] - SENSITIVITY * step));
        }
        if let Some((knee, limit)) = threshold {
            if i + 1 < n && difference[i + 1] < limit {
                return Some(knee);
            }
        }
    }
    None
}

/// WCSS curve, recommended k and the quality of clustering at that k.
pub fn elbow_preview(features: &Array2<f64>) -> Result<ElbowReport, ClusteringError> {
    if features.nrows() < K_MIN {
        return Err(ClusteringError::TooFewSamples {
            k: K_MIN,
            samples: features.nrows(),
        });
    }

    let scaled = StandardScaler::fit(features).transform(features);
    let wcss = compute_wcss(&scaled, K_MIN, K_MAX)?;
    let recommended_k = recommend_k(&wcss, K_MIN).min(distinct_rows(&scaled));

    let quality_metrics = match kmeans_scaled(&scaled, recommended_k) {
        Ok((labels, _, _)) => QualityMetrics::compute(&scaled, &labels),
        Err(err) => {
            tracing::warn!(error = %err, "could not score recommended k");
            QualityMetrics::default()
        }
    };

    Ok(ElbowReport {
        wcss,
        recommended_k,
        quality_metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_knee_of_typical_curve() {
        let wcss = [100.0, 40.0, 20.0, 15.0, 12.0, 10.0, 9.0, 8.0, 7.0];
        assert_eq!(recommend_k(&wcss, 2), 4);
    }

    #[test]
    fn test_fallback_when_no_knee() {
        assert_eq!(recommend_k(&[5.0, 5.0, 5.0, 5.0], 2), 2);
        assert_eq!(recommend_k(&[], 2), 2);
        assert_eq!(recommend_k(&[9.0; 12], 2), 5);
    }

    #[test]
    fn test_wcss_is_non_increasing() {
        let x = array![
            [70.0, 8_000.0],
            [72.0, 9_000.0],
            [85.0, 40_000.0],
            [86.0, 42_000.0],
            [97.0, 150_000.0],
            [98.0, 160_000.0],
        ];
        let scaled = StandardScaler::fit(&x).transform(&x);
        let wcss = compute_wcss(&scaled, K_MIN, K_MAX).unwrap();
        assert_eq!(wcss.len(), 5);
        assert!(wcss.windows(2).all(|w| w[1] <= w[0] + 1e-9));
    }

    #[test]
    fn test_preview_needs_two_rows() {
        let x = array![[90.0, 10_000.0]];
        assert!(elbow_preview(&x).is_err());
    }

    #[test]
    fn test_preview_on_three_groups() {
        let x = array![
            [70.0, 8_000.0],
            [71.0, 8_500.0],
            [72.0, 9_000.0],
            [85.0, 40_000.0],
            [86.0, 41_000.0],
            [87.0, 42_000.0],
            [97.0, 150_000.0],
            [98.0, 155_000.0],
            [99.0, 160_000.0],
        ];
        let report = elbow_preview(&x).unwrap();
        assert_eq!(report.wcss.len(), 8);
        assert!((2..=5).contains(&report.recommended_k));
        assert!(report.quality_metrics.silhouette > 0.0);
    }
}
