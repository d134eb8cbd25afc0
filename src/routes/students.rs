use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use super::log_activity;
use crate::auth::CurrentUser;
use crate::clustering::{recluster_dataset, DEFAULT_K};
use crate::data::{area_type, clean_text, INCOMPLETE, MISSING_NUMBER};
use crate::database::{Database, StudentFilter, StudentRecord};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/students", web::get().to(list_students))
        .route("/students/{id}", web::put().to(update_student));
}

#[derive(Debug, Serialize)]
struct StudentView {
    #[serde(flatten)]
    student: StudentRecord,
    #[serde(rename = "areaType")]
    area_type: &'static str,
}

impl StudentView {
    fn new(student: StudentRecord, urban: &[String]) -> Self {
        let area_type = area_type(&student.municipality, urban);
        StudentView { student, area_type }
    }
}

async fn list_students(
    state: web::Data<AppState>,
    _user: CurrentUser,
    filter: web::Query<StudentFilter>,
) -> ApiResult<HttpResponse> {
    let Some(dataset_id) = state.db.current_dataset_id().await? else {
        return Ok(HttpResponse::Ok().json(Vec::<StudentView>::new()));
    };

    let urban = &state.settings.students.urban_municipalities;
    let students: Vec<StudentView> = state
        .db
        .filter_students(dataset_id, &filter)
        .await?
        .into_iter()
        .map(|s| StudentView::new(s, urban))
        .collect();
    Ok(HttpResponse::Ok().json(students))
}

/// Editable fields. `Honors` and `IncomeCategory` are always recomputed.
#[derive(Debug, Default, Deserialize)]
struct StudentUpdate {
    firstname: Option<String>,
    lastname: Option<String>,
    sex: Option<String>,
    program: Option<String>,
    municipality: Option<String>,
    #[serde(rename = "SHS_type", alias = "shs_type")]
    shs_type: Option<String>,
    #[serde(rename = "SHS_origin", alias = "shs_origin")]
    shs_origin: Option<String>,
    #[serde(rename = "GWA", alias = "gwa")]
    gwa: Option<f64>,
    income: Option<f64>,
}

impl StudentUpdate {
    fn apply(self, student: &mut StudentRecord) {
        let text = |value: String| clean_text(&value).unwrap_or_else(|| INCOMPLETE.to_string());
        let fields = [
            (&mut student.firstname, self.firstname),
            (&mut student.lastname, self.lastname),
            (&mut student.sex, self.sex),
            (&mut student.program, self.program),
            (&mut student.municipality, self.municipality),
            (&mut student.shs_type, self.shs_type),
            (&mut student.shs_origin, self.shs_origin),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                *field = text(value);
            }
        }
        if let Some(gwa) = self.gwa {
            student.gwa = if gwa > 0.0 { gwa } else { MISSING_NUMBER };
        }
        if let Some(income) = self.income {
            student.income = if income >= 0.0 { income } else { MISSING_NUMBER };
        }
        student.refresh_derived();
    }
}

async fn update_student(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<StudentUpdate>,
) -> ApiResult<HttpResponse> {
    let mut student = state
        .db
        .find_student(path.into_inner())
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))?;

    let was_complete = student.is_complete();
    body.into_inner().apply(&mut student);
    state.db.update_student(&student).await?;
    log_activity(
        &state,
        user.id,
        "update_student",
        &format!("Updated student {} ({})", student.id, student.full_name()),
    )
    .await;

    if !was_complete && student.is_complete() {
        spawn_recluster(state.db.clone(), student.dataset_id);
    }

    let view = StudentView::new(student, &state.settings.students.urban_municipalities);
    Ok(HttpResponse::Ok().json(view))
}

/// Refit the dataset's official clusters off the request path, reusing its last k.
fn spawn_recluster(db: Database, dataset_id: i64) {
    actix_web::rt::spawn(async move {
        let k = match db.latest_cluster_run(dataset_id).await {
            Ok(run) => run
                .and_then(|r| r.k)
                .and_then(|k| usize::try_from(k).ok())
                .unwrap_or(DEFAULT_K),
            Err(err) => {
                tracing::warn!(dataset_id, error = %err, "could not read last cluster run");
                DEFAULT_K
            }
        };
        if let Err(err) = recluster_dataset(&db, dataset_id, k).await {
            tracing::warn!(dataset_id, k, error = %err, "background re-clustering failed");
        }
    });
}
