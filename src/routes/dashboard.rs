use actix_web::{web, HttpResponse};

use crate::analytics::DashboardStats;
use crate::auth::CurrentUser;
use crate::error::ApiResult;
use crate::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/dashboard/stats", web::get().to(stats));
}

async fn stats(state: web::Data<AppState>, _user: CurrentUser) -> ApiResult<HttpResponse> {
    let students = match state.db.current_dataset_id().await? {
        Some(dataset_id) => state.db.students_for_dataset(dataset_id, None).await?,
        None => Vec::new(),
    };
    Ok(HttpResponse::Ok().json(DashboardStats::from_students(&students)))
}
