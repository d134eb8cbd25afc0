use actix_web::{web, HttpResponse};
use serde::Deserialize;

use super::current_dataset;
use super::datasets::attachment;
use crate::analytics::{build_report, playground_csv, playground_report, Report, ReportKind};
use crate::auth::CurrentUser;
use crate::clustering::{official_fit, run_blocking, DEFAULT_K};
use crate::database::ClusteredStudent;
use crate::elbow::{K_MAX, K_MIN};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/reports/cluster_playground", web::get().to(cluster_playground))
        .route("/reports/{kind}/preview", web::get().to(preview_report))
        .route("/reports/{kind}", web::get().to(export_report));
}

#[derive(Deserialize)]
struct ExportQuery {
    format: Option<String>,
    k: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportFormat {
    Pdf,
    Csv,
}

impl ExportFormat {
    fn extension(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Csv => "csv",
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Csv => "text/csv",
        }
    }
}

impl ExportQuery {
    /// PDF unless `format=csv` is asked for.
    fn export_format(&self) -> ApiResult<ExportFormat> {
        match self.format.as_deref().map(str::to_lowercase).as_deref() {
            None | Some("pdf") => Ok(ExportFormat::Pdf),
            Some("csv") => Ok(ExportFormat::Csv),
            Some(other) => Err(ApiError::bad_request(format!("Unsupported format: {other}"))),
        }
    }
}

fn download(format: ExportFormat, body: Vec<u8>, stem: &str) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(format.content_type())
        .insert_header(attachment(format!("{stem}.{}", format.extension())))
        .body(body)
}

async fn render_pdf(report: Report) -> ApiResult<Vec<u8>> {
    Ok(web::block(move || report.to_pdf()).await??)
}

/// Current dataset students joined with their latest official cluster.
async fn report_students(state: &AppState) -> ApiResult<Vec<ClusteredStudent>> {
    let dataset_id = current_dataset(state).await?;
    let run_id = state.db.latest_cluster_run(dataset_id).await?.map(|run| run.id);
    let students = state.db.clustered_students(dataset_id, run_id).await?;
    if students.is_empty() {
        return Err(ApiError::not_found("No students found"));
    }
    Ok(students)
}

async fn load_report(state: &AppState, kind: &str) -> ApiResult<(ReportKind, Report)> {
    let kind: ReportKind = kind.parse()?;
    let students = report_students(state).await?;
    Ok((kind, build_report(kind, &students)))
}

async fn export_report(
    state: web::Data<AppState>,
    _user: CurrentUser,
    path: web::Path<String>,
    query: web::Query<ExportQuery>,
) -> ApiResult<HttpResponse> {
    let format = query.export_format()?;
    let (kind, report) = load_report(&state, &path).await?;
    tracing::info!(
        report = kind.slug(),
        format = format.extension(),
        rows = report.rows.len(),
        "report exported"
    );
    let body = match format {
        ExportFormat::Csv => report.to_csv()?,
        ExportFormat::Pdf => render_pdf(report).await?,
    };
    Ok(download(format, body, kind.slug()))
}

async fn preview_report(
    state: web::Data<AppState>,
    _user: CurrentUser,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let (_, report) = load_report(&state, &path).await?;
    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(report.to_html_preview()))
}

async fn cluster_playground(
    state: web::Data<AppState>,
    _user: CurrentUser,
    query: web::Query<ExportQuery>,
) -> ApiResult<HttpResponse> {
    let format = query.export_format()?;
    let k = query.k.unwrap_or(DEFAULT_K);
    if !(K_MIN..=K_MAX).contains(&k) {
        return Err(ApiError::bad_request(format!("k must be between {K_MIN} and {K_MAX}")));
    }

    let dataset_id = current_dataset(&state).await?;
    let students = state.db.students_for_dataset(dataset_id, None).await?;
    if students.is_empty() {
        return Err(ApiError::not_found("No students found"));
    }
    let result = run_blocking(move || official_fit(&students, k)).await?;
    let body = match format {
        ExportFormat::Csv => playground_csv(&result)?,
        ExportFormat::Pdf => render_pdf(playground_report(&result)).await?,
    };
    Ok(download(format, body, "cluster_playground"))
}
