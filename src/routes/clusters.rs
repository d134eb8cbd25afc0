use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use super::{current_dataset, log_activity};
use crate::auth::CurrentUser;
use crate::clustering::{official_fit, pairwise, recluster_dataset, run_blocking, Feature, DEFAULT_K};
use crate::database::{ClusteredStudent, StudentRecord};
use crate::elbow::{K_MAX, K_MIN};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/clusters", web::get().to(official_clusters))
        .route("/clusters/recluster", web::post().to(recluster))
        .route("/clusters/playground", web::get().to(playground))
        .route("/clusters/pairwise", web::get().to(pairwise_clusters));
}

#[derive(Debug, Default, Serialize)]
struct PlotData {
    x: Vec<f64>,
    y: Vec<f64>,
    colors: Vec<i64>,
    text: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
struct OfficialClusters {
    clusters: BTreeMap<i64, Vec<ClusteredStudent>>,
    plot_data: PlotData,
    centroids: Vec<Vec<f64>>,
    k: Option<i64>,
}

impl OfficialClusters {
    fn from_assignments(students: Vec<ClusteredStudent>, centroids: Vec<Vec<f64>>, k: Option<i64>) -> Self {
        let mut out = OfficialClusters {
            centroids,
            k,
            ..Default::default()
        };
        for member in students {
            let Some(cluster) = member.cluster_number else {
                continue;
            };
            out.plot_data.x.push(member.student.gwa);
            out.plot_data.y.push(member.student.income);
            out.plot_data.colors.push(cluster);
            out.plot_data.text.push(hover_text(&member.student));
            out.clusters.entry(cluster).or_default().push(member);
        }
        out
    }
}

fn hover_text(s: &StudentRecord) -> String {
    format!(
        "{}<br>Program: {}<br>Municipality: {}<br>Income: {}<br>Honors: {}<br>SHS: {}<br>SHS Origin: {}",
        s.full_name(),
        s.program,
        s.municipality,
        s.income_category,
        s.honors,
        s.shs_type,
        s.shs_origin,
    )
}

async fn official_clusters(state: web::Data<AppState>, _user: CurrentUser) -> ApiResult<HttpResponse> {
    let Some(dataset_id) = state.db.current_dataset_id().await? else {
        return Ok(HttpResponse::Ok().json(OfficialClusters::default()));
    };
    let Some(run) = state.db.latest_cluster_run(dataset_id).await? else {
        return Ok(HttpResponse::Ok().json(OfficialClusters::default()));
    };

    let students = state.db.clustered_students(dataset_id, Some(run.id)).await?;
    Ok(HttpResponse::Ok().json(OfficialClusters::from_assignments(
        students,
        run.centroids(),
        run.k,
    )))
}

async fn current_students(state: &AppState) -> ApiResult<(i64, Vec<StudentRecord>)> {
    let dataset_id = current_dataset(state).await?;
    let students = state.db.students_for_dataset(dataset_id, None).await?;
    if students.is_empty() {
        return Err(ApiError::not_found("No students found for latest dataset"));
    }
    Ok((dataset_id, students))
}

#[derive(Deserialize)]
struct ReclusterQuery {
    k: usize,
}

async fn recluster(
    state: web::Data<AppState>,
    user: CurrentUser,
    query: web::Query<ReclusterQuery>,
) -> ApiResult<HttpResponse> {
    let k = query.k;
    if k < K_MIN {
        return Err(ApiError::bad_request("k must be at least 2"));
    }

    if user.is_admin() {
        let dataset_id = current_dataset(&state).await?;
        let result = recluster_dataset(&state.db, dataset_id, k).await?;
        log_activity(
            &state,
            user.id,
            "recluster",
            &format!("Re-clustered dataset {dataset_id} with k={k}"),
        )
        .await;
        return Ok(HttpResponse::Ok().json(json!({
            "message": format!("Re-clustered {} students into {k} clusters", result.students.len()),
            "k": k,
        })));
    }

    let (_, students) = current_students(&state).await?;
    let result = run_blocking(move || official_fit(&students, k)).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Preview only; Viewers cannot save clusters",
        "students": result.students,
        "centroids": result.centroids,
    })))
}

#[derive(Deserialize)]
struct PlaygroundQuery {
    k: Option<usize>,
}

async fn playground(
    state: web::Data<AppState>,
    _user: CurrentUser,
    query: web::Query<PlaygroundQuery>,
) -> ApiResult<HttpResponse> {
    let k = query.k.unwrap_or(DEFAULT_K);
    if !(K_MIN..=K_MAX).contains(&k) {
        return Err(ApiError::bad_request(format!("k must be between {K_MIN} and {K_MAX}")));
    }

    let (_, students) = current_students(&state).await?;
    let result = run_blocking(move || official_fit(&students, k)).await?;
    Ok(HttpResponse::Ok().json(json!({
        "students": result.students,
        "centroids": result.centroids,
    })))
}

#[derive(Deserialize)]
struct PairwiseQuery {
    x: String,
    y: String,
    k: Option<usize>,
}

async fn pairwise_clusters(
    state: web::Data<AppState>,
    _user: CurrentUser,
    query: web::Query<PairwiseQuery>,
) -> ApiResult<HttpResponse> {
    let x: Feature = query.x.parse()?;
    let y: Feature = query.y.parse()?;
    let k = query.k.unwrap_or(DEFAULT_K);

    let (_, students) = current_students(&state).await?;
    let result = run_blocking(move || pairwise(&students, x, y, k)).await?;
    Ok(HttpResponse::Ok().json(result))
}
