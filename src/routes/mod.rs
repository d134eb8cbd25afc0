//! HTTP surface. Everything except the health check lives under `/api`.

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

mod auth;
mod clusters;
mod dashboard;
mod datasets;
mod reports;
mod students;
mod users;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _| ApiError::bad_request(format!("Invalid JSON body: {err}")).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| ApiError::bad_request(format!("Invalid query: {err}")).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _| ApiError::bad_request(format!("Invalid path: {err}")).into()),
    )
    .route("/", web::get().to(health_check))
    .service(
        web::scope("/api")
            .configure(auth::configure)
            .configure(users::configure)
            .configure(datasets::configure)
            .configure(clusters::configure)
            .configure(students::configure)
            .configure(dashboard::configure)
            .configure(reports::configure),
    );
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": "FreshGroup API",
    }))
}

/// The dataset every read endpoint works on, 404 when nothing was uploaded yet.
pub(crate) async fn current_dataset(state: &AppState) -> ApiResult<i64> {
    state
        .db
        .current_dataset_id()
        .await?
        .ok_or_else(|| ApiError::not_found("No dataset uploaded"))
}

/// Record an activity without failing the request that caused it.
pub(crate) async fn log_activity(state: &AppState, user_id: i64, action: &str, details: &str) {
    if let Err(err) = state.db.log_activity(user_id, action, details).await {
        tracing::warn!(error = %err, action, "failed to write activity log");
    }
}
