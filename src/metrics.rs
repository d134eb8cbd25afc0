use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Internal validation scores for one clustering of a standardized matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub silhouette: f64,
    pub davies_bouldin: f64,
    pub calinski_harabasz: f64,
}

impl QualityMetrics {
    /// All three scores, or zeros when the labelling is degenerate
    /// (one cluster, or as many clusters as points).
    pub fn compute(x: &Array2<f64>, labels: &[usize]) -> Self {
        let groups = group_indices(labels);
        if groups.len() < 2 || groups.len() >= labels.len() || x.nrows() != labels.len() {
            return QualityMetrics::default();
        }

        QualityMetrics {
            silhouette: silhouette(x, labels, &groups),
            davies_bouldin: davies_bouldin(x, &groups),
            calinski_harabasz: calinski_harabasz(x, &groups),
        }
    }
}

fn group_indices(labels: &[usize]) -> BTreeMap<usize, Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        groups.entry(*label).or_default().push(i);
    }
    groups
}

fn distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn centroid(x: &Array2<f64>, members: &[usize]) -> Array1<f64> {
    x.select(Axis(0), members)
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()))
}

fn silhouette(x: &Array2<f64>, labels: &[usize], groups: &BTreeMap<usize, Vec<usize>>) -> f64 {
    let n = labels.len();
    let mut total = 0.0;

    for i in 0..n {
        let own = &groups[&labels[i]];
        if own.len() < 2 {
            continue;
        }
        let mean_dist = |members: &[usize]| {
            let sum: f64 = members
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| distance(x.row(i), x.row(j)))
                .sum();
            let count = members.iter().filter(|&&j| j != i).count();
            sum / count as f64
        };

        let a = mean_dist(own.as_slice());
        let b = groups
            .iter()
            .filter(|(label, _)| **label != labels[i])
            .map(|(_, members)| mean_dist(members.as_slice()))
            .fold(f64::INFINITY, f64::min);

        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }

    total / n as f64
}

fn davies_bouldin(x: &Array2<f64>, groups: &BTreeMap<usize, Vec<usize>>) -> f64 {
    let centers: Vec<Array1<f64>> = groups.values().map(|m| centroid(x, m)).collect();
    let spreads: Vec<f64> = groups
        .values()
        .zip(&centers)
        .map(|(members, c)| {
            members
                .iter()
                .map(|&i| distance(x.row(i), c.view()))
                .sum::<f64>()
                / members.len() as f64
        })
        .collect();

    let k = centers.len();
    let worst: f64 = (0..k)
        .map(|i| {
            (0..k)
                .filter(|&j| j != i)
                .map(|j| {
                    let separation = distance(centers[i].view(), centers[j].view());
                    if separation > 0.0 {
                        (spreads[i] + spreads[j]) / separation
                    } else {
                        0.0
                    }
                })
                .fold(0.0, f64::max)
        })
        .sum();

    worst / k as f64
}

fn calinski_harabasz(x: &Array2<f64>, groups: &BTreeMap<usize, Vec<usize>>) -> f64 {
    let n = x.nrows() as f64;
    let k = groups.len() as f64;
    let overall = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()));

    let mut between = 0.0;
    let mut within = 0.0;
    for members in groups.values() {
        let c = centroid(x, members);
        between += members.len() as f64 * distance(c.view(), overall.view()).powi(2);
        within += members
            .iter()
            .map(|&i| distance(x.row(i), c.view()).powi(2))
            .sum::<f64>();
    }

    if within == 0.0 {
        1.0
    } else {
        (between / (k - 1.0)) / (within / (n - k))
    }
}
