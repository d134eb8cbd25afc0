use actix_web::web;
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::data::label_encode;
use crate::database::{Database, StudentRecord};
use crate::error::ApiError;
use crate::model::{feature_matrix, fit_kmeans, ClusterFit, ClusteringError};

pub const DEFAULT_K: usize = 3;

/// Student attributes that can be used as a clustering axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Gwa,
    Income,
    Sex,
    Program,
    Municipality,
    ShsType,
    ShsOrigin,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::Gwa,
        Feature::Income,
        Feature::Sex,
        Feature::Program,
        Feature::Municipality,
        Feature::ShsType,
        Feature::ShsOrigin,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Feature::Gwa => "gwa",
            Feature::Income => "income",
            Feature::Sex => "sex",
            Feature::Program => "program",
            Feature::Municipality => "municipality",
            Feature::ShsType => "shs_type",
            Feature::ShsOrigin => "shs_origin",
        }
    }

    pub fn is_categorical(&self) -> bool {
        !matches!(self, Feature::Gwa | Feature::Income)
    }

    fn text<'a>(&self, s: &'a StudentRecord) -> &'a str {
        match self {
            Feature::Sex => &s.sex,
            Feature::Program => &s.program,
            Feature::Municipality => &s.municipality,
            Feature::ShsType => &s.shs_type,
            Feature::ShsOrigin => &s.shs_origin,
            Feature::Gwa | Feature::Income => "",
        }
    }

    fn number(&self, s: &StudentRecord) -> f64 {
        match self {
            Feature::Gwa => s.gwa,
            Feature::Income => s.income,
            _ => 0.0,
        }
    }
}

impl FromStr for Feature {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Feature::ALL
            .into_iter()
            .find(|f| f.name() == wanted)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Feature::ALL.iter().map(Feature::name).collect();
                ApiError::bad_request(format!("Allowed features: {allowed:?}"))
            })
    }
}

/// One axis of a scatter plot over every student of a dataset.
struct Axis {
    values: Vec<f64>,
    labels: Vec<String>,
    categories: Option<Vec<String>>,
}

impl Axis {
    fn build(feature: Feature, students: &[StudentRecord]) -> Self {
        if feature.is_categorical() {
            let texts: Vec<&str> = students.iter().map(|s| feature.text(s)).collect();
            let (values, categories) = label_encode(&texts);
            Axis {
                values,
                labels: texts.iter().map(|t| t.to_string()).collect(),
                categories: Some(categories),
            }
        } else {
            let values: Vec<f64> = students.iter().map(|s| feature.number(s)).collect();
            Axis {
                labels: values.iter().map(|v| v.to_string()).collect(),
                values,
                categories: None,
            }
        }
    }
}

/// A clustered student in the shape the explorer views plot.
#[derive(Debug, Clone, Serialize)]
pub struct PlotStudent {
    #[serde(flatten)]
    pub student: StudentRecord,
    #[serde(rename = "Cluster")]
    pub cluster: usize,
    pub pair_x: f64,
    pub pair_y: f64,
    pub pair_x_label: String,
    pub pair_y_label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairwiseResult {
    pub students: Vec<PlotStudent>,
    pub centroids: Vec<Vec<f64>>,
    pub x_name: &'static str,
    pub y_name: &'static str,
    pub k: usize,
    pub x_categories: Option<Vec<String>>,
    pub y_categories: Option<Vec<String>>,
}

/// Cluster the complete students of a dataset on two features.
pub fn pairwise(
    students: &[StudentRecord],
    x: Feature,
    y: Feature,
    k: usize,
) -> Result<PairwiseResult, ClusteringError> {
    let complete: Vec<usize> = students
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_complete())
        .map(|(i, _)| i)
        .collect();
    if complete.is_empty() {
        return Err(ClusteringError::NoSamples);
    }

    let x_axis = Axis::build(x, students);
    let y_axis = Axis::build(y, students);
    let rows: Vec<Vec<f64>> = complete
        .iter()
        .map(|&i| vec![x_axis.values[i], y_axis.values[i]])
        .collect();
    let fit = fit_kmeans(&feature_matrix(&rows)?, k)?;

    let plotted = complete
        .iter()
        .zip(&fit.labels)
        .map(|(&i, &cluster)| PlotStudent {
            student: students[i].clone(),
            cluster,
            pair_x: x_axis.values[i],
            pair_y: y_axis.values[i],
            pair_x_label: x_axis.labels[i].clone(),
            pair_y_label: y_axis.labels[i].clone(),
        })
        .collect();

    Ok(PairwiseResult {
        students: plotted,
        centroids: fit.centroids,
        x_name: x.name(),
        y_name: y.name(),
        k,
        x_categories: x_axis.categories,
        y_categories: y_axis.categories,
    })
}

/// The official clustering: complete students on GWA and income.
pub fn official_fit(students: &[StudentRecord], k: usize) -> Result<PairwiseResult, ClusteringError> {
    pairwise(students, Feature::Gwa, Feature::Income, k)
}

pub fn cluster_counts(labels: impl IntoIterator<Item = usize>) -> BTreeMap<usize, usize> {
    let mut counts = BTreeMap::new();
    for label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
}

/// Run a k-means job on the blocking pool instead of the request executor.
pub async fn run_blocking<F>(job: F) -> Result<PairwiseResult, ApiError>
where
    F: FnOnce() -> Result<PairwiseResult, ClusteringError> + Send + 'static,
{
    Ok(web::block(job).await??)
}

/// Refit the official clusters of a dataset and replace its stored run.
pub async fn recluster_dataset(
    db: &Database,
    dataset_id: i64,
    k: usize,
) -> Result<PairwiseResult, ApiError> {
    let students = db.students_for_dataset(dataset_id, None).await?;
    if students.is_empty() {
        return Err(ApiError::not_found("No students found for latest dataset"));
    }

    let result = run_blocking(move || official_fit(&students, k)).await?;
    let assignments: Vec<(i64, usize)> = result
        .students
        .iter()
        .map(|p| (p.student.id, p.cluster))
        .collect();
    db.replace_cluster_run(dataset_id, k, &result.centroids, &assignments)
        .await?;

    tracing::info!(dataset_id, k, clustered = assignments.len(), "dataset re-clustered");
    Ok(result)
}

/// Labels for every uploaded row: `Some(cluster)` for complete rows, `None` otherwise.
pub fn spread_labels(complete: &[usize], fit: &ClusterFit, total: usize) -> Vec<Option<usize>> {
    let mut labels = vec![None; total];
    for (&row, &label) in complete.iter().zip(&fit.labels) {
        labels[row] = Some(label);
    }
    labels
}
