use actix_multipart::Multipart;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;

use super::log_activity;
use crate::analytics::students_csv;
use crate::auth::CurrentUser;
use crate::clustering::{spread_labels, DEFAULT_K};
use crate::data::{is_supported_filename, parse_upload, IngestError, StudentRow};
use crate::database::NewDataset;
use crate::elbow::{elbow_preview, K_MIN};
use crate::error::{ApiError, ApiResult};
use crate::metrics::QualityMetrics;
use crate::model::{feature_matrix, fit_kmeans, ClusteringError};
use crate::AppState;

const PREVIEW_ROWS: i64 = 15;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/datasets", web::get().to(list_datasets))
        .route("/datasets/upload", web::post().to(upload_dataset))
        .route("/datasets/elbow", web::post().to(elbow))
        .route("/datasets/{id}/preview", web::get().to(preview_dataset))
        .route("/datasets/{id}/download", web::get().to(download_dataset))
        .route("/datasets/{id}/activate", web::post().to(activate_dataset))
        .route("/datasets/{id}", web::delete().to(delete_dataset));
}

/// Filename and contents of the first file part of a multipart body.
async fn read_upload(mut payload: Multipart, max_bytes: usize) -> ApiResult<(String, Vec<u8>)> {
    while let Some(mut field) = payload.try_next().await? {
        let Some(filename) = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string)
        else {
            continue;
        };
        if !is_supported_filename(&filename) {
            return Err(IngestError::UnsupportedFormat.into());
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            if bytes.len() + chunk.len() > max_bytes {
                return Err(ApiError::bad_request(format!(
                    "File exceeds the {max_bytes} byte upload limit"
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        return Ok((filename, bytes));
    }
    Err(ApiError::bad_request("No file uploaded"))
}

/// Indices of the complete rows and their `[gwa, income]` features.
fn complete_features(rows: &[StudentRow]) -> (Vec<usize>, Vec<Vec<f64>>) {
    rows.iter()
        .enumerate()
        .filter(|(_, row)| row.is_complete())
        .filter_map(|(i, row)| Some((i, vec![row.gwa?, row.income?])))
        .unzip()
}

struct UploadFit {
    k: usize,
    centroids: Vec<Vec<f64>>,
    labels: Vec<Option<usize>>,
    quality_metrics: QualityMetrics,
}

/// Cluster the complete rows of an upload. With too few of them the dataset is
/// stored with an empty run.
fn cluster_upload(
    complete: &[usize],
    features: &[Vec<f64>],
    total: usize,
    requested: Option<usize>,
) -> Result<UploadFit, ClusteringError> {
    if features.is_empty() || (features.len() < K_MIN && requested.is_none()) {
        tracing::warn!(complete = features.len(), "too few complete rows to cluster");
        return Ok(UploadFit {
            k: requested.unwrap_or(DEFAULT_K),
            centroids: Vec::new(),
            labels: vec![None; total],
            quality_metrics: QualityMetrics::default(),
        });
    }

    let x = feature_matrix(features)?;
    let k = match requested {
        Some(k) => k,
        None => elbow_preview(&x)?.recommended_k,
    };
    let fit = fit_kmeans(&x, k)?;
    Ok(UploadFit {
        k,
        quality_metrics: QualityMetrics::compute(&fit.scaled, &fit.labels),
        labels: spread_labels(complete, &fit, total),
        centroids: fit.centroids,
    })
}

async fn elbow(
    state: web::Data<AppState>,
    user: CurrentUser,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    user.require_admin("Only Admins can run the elbow analysis")?;
    let (filename, bytes) = read_upload(payload, state.settings.upload.max_bytes).await?;
    let rows = parse_upload(&filename, &bytes)?;

    let (_, features) = complete_features(&rows);
    if features.len() < K_MIN {
        return Err(ApiError::bad_request(
            "At least 2 complete student records are required for the elbow analysis",
        ));
    }
    let report = web::block(move || elbow_preview(&feature_matrix(&features)?)).await??;
    tracing::info!(%filename, recommended_k = report.recommended_k, "elbow preview computed");
    Ok(HttpResponse::Ok().json(report))
}

#[derive(Deserialize)]
struct UploadQuery {
    k: Option<usize>,
}

async fn upload_dataset(
    state: web::Data<AppState>,
    user: CurrentUser,
    query: web::Query<UploadQuery>,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    user.require_admin("Only Admins can upload datasets")?;
    let (filename, bytes) = read_upload(payload, state.settings.upload.max_bytes).await?;
    let rows = parse_upload(&filename, &bytes)?;

    let (complete, features) = complete_features(&rows);
    let clustered = complete.len();
    let UploadFit {
        k,
        centroids,
        labels,
        quality_metrics,
    } = web::block({
        let total = rows.len();
        let requested = query.k;
        move || cluster_upload(&complete, &features, total, requested)
    })
    .await??;

    let dataset_id = state
        .db
        .insert_dataset(NewDataset {
            filename: &filename,
            uploaded_by: user.id,
            rows: &rows,
            k: Some(k),
            centroids: &centroids,
            labels: &labels,
        })
        .await?;

    log_activity(
        &state,
        user.id,
        "upload_dataset",
        &format!("Uploaded {filename} ({} students, k={k})", rows.len()),
    )
    .await;
    tracing::info!(dataset_id, %filename, students = rows.len(), clustered, k, "dataset uploaded");

    Ok(HttpResponse::Ok().json(json!({
        "message": "Dataset uploaded and clustered successfully",
        "dataset_id": dataset_id,
        "total_students": rows.len(),
        "clusters": k,
        "quality_metrics": quality_metrics,
    })))
}

async fn list_datasets(state: web::Data<AppState>, user: CurrentUser) -> ApiResult<HttpResponse> {
    user.require_admin("Only Admins can view dataset history")?;
    Ok(HttpResponse::Ok().json(state.db.list_datasets().await?))
}

async fn dataset_name(state: &AppState, id: i64) -> ApiResult<String> {
    state
        .db
        .dataset_filename(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Dataset not found"))
}

async fn preview_dataset(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> ApiResult<HttpResponse> {
    user.require_admin("Only Admins can preview datasets")?;
    let id = path.into_inner();
    let filename = dataset_name(&state, id).await?;
    let students = state.db.students_for_dataset(id, Some(PREVIEW_ROWS)).await?;
    Ok(HttpResponse::Ok().json(json!({
        "dataset_id": id,
        "filename": filename,
        "rows": students,
    })))
}

fn export_filename(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("dataset");
    format!("{stem}_export.csv")
}

pub(super) fn attachment(filename: String) -> ContentDisposition {
    ContentDisposition {
        disposition: DispositionType::Attachment,
        parameters: vec![DispositionParam::Filename(filename)],
    }
}

async fn download_dataset(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> ApiResult<HttpResponse> {
    user.require_admin("Only Admins can download datasets")?;
    let id = path.into_inner();
    let filename = dataset_name(&state, id).await?;
    let students = state.db.students_for_dataset(id, None).await?;
    if students.is_empty() {
        return Err(ApiError::not_found("No students found for this dataset"));
    }

    let body = students_csv(&students)?;
    log_activity(&state, user.id, "download_dataset", &format!("Downloaded {filename}")).await;
    Ok(HttpResponse::Ok()
        .content_type("text/csv")
        .insert_header(attachment(export_filename(&filename)))
        .body(body))
}

async fn delete_dataset(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> ApiResult<HttpResponse> {
    user.require_admin("Only Admins can delete datasets")?;
    let id = path.into_inner();
    let filename = dataset_name(&state, id).await?;

    state.db.delete_dataset(id).await?;
    log_activity(&state, user.id, "delete_dataset", &format!("Deleted {filename}")).await;
    tracing::info!(dataset_id = id, "dataset deleted");
    Ok(HttpResponse::Ok().json(json!({ "message": "Dataset deleted successfully" })))
}

async fn activate_dataset(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> ApiResult<HttpResponse> {
    user.require_admin("Only Admins can activate datasets")?;
    let id = path.into_inner();
    let filename = dataset_name(&state, id).await?;

    state.db.activate_dataset(id).await?;
    log_activity(&state, user.id, "activate_dataset", &format!("Activated {filename}")).await;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Dataset activated",
        "dataset_id": id,
    })))
}
