use actix_web::http::{header, StatusCode};
use actix_web::rt::time::sleep;
use actix_web::{test, web, App};
use serde_json::{json, Value};
use std::time::Duration;

use freshgroup::settings::Settings;
use freshgroup::{configure, AppState};

const BOUNDARY: &str = "----freshgroup-test-boundary";

const STUDENTS_CSV: &str = "\
First Name,Last Name,Gender,Course,City,Family Income,SHS Type,School,GWA
Ana,Cruz,F,BSIT,Calamba,8000,Public,Calamba NHS,82
Ben,Reyes,M,BSIT,Calamba,9000,Public,Calamba NHS,84
Cara,Santos,F,BSIT,Cabuyao,9500,Public,Cabuyao NHS,83
Dan,Lim,M,BSCS,Santa Rosa,150000,Private,Santa Rosa Science HS,97
Eve,Tan,F,BSCS,Santa Rosa,160000,Private,Santa Rosa Science HS,98
Fay,Go,F,BSCS,Binan,155000,Private,Binan Academy,96
Gus,Uy,M,BSIT,Calamba,12000,Public,,
Hal,Ong,M,BSCS,Cabuyao,140000,Private,Cabuyao Academy,95
";

async fn test_state() -> web::Data<AppState> {
    let state = AppState::new(Settings::in_memory()).await.unwrap();
    state.ensure_bootstrap_admin().await.unwrap();
    web::Data::new(state)
}

fn multipart_body(filename: &str, content_type: &str, contents: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
         Content-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(uri: &str, token: &str, body: Vec<u8>) -> test::TestRequest {
    test::TestRequest::post()
        .uri(uri)
        .insert_header((header::AUTHORIZATION, format!("Bearer {token}")))
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(body)
}

fn upload_request(uri: &str, token: &str, filename: &str, contents: &str) -> test::TestRequest {
    multipart_request(
        uri,
        token,
        multipart_body(filename, "text/csv", contents.as_bytes()),
    )
}

/// The CSV fixture rewritten as a workbook, numbers stored as numeric cells.
fn students_xlsx(csv: &str) -> Vec<u8> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    for (row, line) in csv.lines().enumerate() {
        for (col, cell) in line.split(',').enumerate() {
            let (row, col) = (row as u32, col as u16);
            if cell.is_empty() {
                continue;
            }
            match cell.parse::<f64>() {
                Ok(number) => sheet.write_number(row, col, number).unwrap(),
                Err(_) => sheet.write_string(row, col, cell).unwrap(),
            };
        }
    }
    workbook.save_to_buffer().unwrap()
}

fn authed(req: test::TestRequest, token: &str) -> test::TestRequest {
    req.insert_header((header::AUTHORIZATION, format!("Bearer {token}")))
}

macro_rules! init_app {
    ($state:expr) => {
        test::init_service(App::new().app_data($state.clone()).configure(configure)).await
    };
}

macro_rules! login {
    ($app:expr, $email:expr, $password:expr) => {{
        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "email": $email, "password": $password }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&$app, req).await;
        body["access_token"].as_str().unwrap().to_string()
    }};
}

#[actix_web::test]
async fn test_health_check_is_public() {
    let state = test_state().await;
    let app = init_app!(state);

    let req = test::TestRequest::get().uri("/").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "FreshGroup API");
}

#[actix_web::test]
async fn test_protected_routes_need_a_session() {
    let state = test_state().await;
    let app = init_app!(state);

    let req = test::TestRequest::get().uri("/api/students").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = authed(test::TestRequest::get().uri("/api/students"), "bogus").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["detail"].is_string());
}

#[actix_web::test]
async fn test_login_rejects_bad_password() {
    let state = test_state().await;
    let app = init_app!(state);

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "email": "admin@freshgroup.local", "password": "nope" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_upload_dashboard_students_and_clusters() {
    let state = test_state().await;
    let app = init_app!(state);
    let token = login!(app, "admin@freshgroup.local", "changeme");

    let req = upload_request("/api/datasets/upload?k=2", &token, "freshmen.csv", STUDENTS_CSV).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["total_students"], 8);
    assert_eq!(body["clusters"], 2);
    assert!(body["quality_metrics"]["silhouette"].as_f64().unwrap() > 0.5);

    let req = authed(test::TestRequest::get().uri("/api/dashboard/stats"), &token).to_request();
    let stats: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats["total_students"], 8);
    assert_eq!(stats["program_distribution"]["BSCS"], 4);
    assert_eq!(stats["most_common_program"], "BSCS");

    let req = authed(test::TestRequest::get().uri("/api/students?program=BSCS"), &token).to_request();
    let students: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(students.as_array().unwrap().len(), 4);
    assert_eq!(students[0]["areaType"], "Rural");

    let req = authed(test::TestRequest::get().uri("/api/clusters"), &token).to_request();
    let clusters: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(clusters["k"], 2);
    assert_eq!(clusters["centroids"].as_array().unwrap().len(), 2);
    assert_eq!(clusters["plot_data"]["x"].as_array().unwrap().len(), 7);
    let groups = clusters["clusters"].as_object().unwrap();
    let sizes: Vec<usize> = groups.values().map(|g| g.as_array().unwrap().len()).collect();
    assert_eq!(sizes.iter().sum::<usize>(), 7);
    assert!(sizes.contains(&3) && sizes.contains(&4));

    let req = authed(test::TestRequest::get().uri("/api/datasets"), &token).to_request();
    let datasets: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(datasets[0]["student_count"], 8);
    assert_eq!(datasets[0]["is_active"], true);
    assert_eq!(datasets[0]["uploaded_by_email"], "admin@freshgroup.local");
}

#[actix_web::test]
async fn test_upload_rejects_unsupported_files() {
    let state = test_state().await;
    let app = init_app!(state);
    let token = login!(app, "admin@freshgroup.local", "changeme");

    let req = upload_request("/api/datasets/upload", &token, "notes.txt", "hello").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["detail"], "Only CSV and Excel files are supported");
}

#[actix_web::test]
async fn test_elbow_preview_persists_nothing() {
    let state = test_state().await;
    let app = init_app!(state);
    let token = login!(app, "admin@freshgroup.local", "changeme");

    let req = upload_request("/api/datasets/elbow", &token, "freshmen.csv", STUDENTS_CSV).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert!(!body["wcss"].as_array().unwrap().is_empty());
    assert!(body["recommended_k"].as_u64().unwrap() >= 2);

    let req = authed(test::TestRequest::get().uri("/api/datasets"), &token).to_request();
    let datasets: Value = test::call_and_read_body_json(&app, req).await;
    assert!(datasets.as_array().unwrap().is_empty());
}

#[actix_web::test]
async fn test_student_edit_recomputes_derived_fields() {
    let state = test_state().await;
    let app = init_app!(state);
    let token = login!(app, "admin@freshgroup.local", "changeme");

    let req = upload_request("/api/datasets/upload?k=2", &token, "freshmen.csv", STUDENTS_CSV).to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    let req = authed(test::TestRequest::get().uri("/api/students?search=GUS"), &token).to_request();
    let found: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(found[0]["Honors"], "Incomplete");
    let id = found[0]["id"].as_i64().unwrap();

    let req = authed(test::TestRequest::put().uri(&format!("/api/students/{id}")), &token)
        .set_json(json!({ "GWA": 91, "SHS_origin": "Calamba NHS" }))
        .to_request();
    let updated: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(updated["GWA"], 91.0);
    assert_eq!(updated["Honors"], "With Honors");
    assert_eq!(updated["IncomeCategory"], "Low Income");

    let req = authed(test::TestRequest::put().uri("/api/students/99999"), &token)
        .set_json(json!({ "GWA": 91 }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    // Completing Gus triggers a background refit that brings him into the plot.
    let mut plotted = 0;
    for _ in 0..100 {
        let req = authed(test::TestRequest::get().uri("/api/clusters"), &token).to_request();
        let clusters: Value = test::call_and_read_body_json(&app, req).await;
        plotted = clusters["plot_data"]["x"].as_array().unwrap().len();
        if plotted == 8 {
            assert_eq!(clusters["k"], 2);
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(plotted, 8);
}

#[actix_web::test]
async fn test_search_is_unicode_aware_and_literal() {
    let state = test_state().await;
    let app = init_app!(state);
    let token = login!(app, "admin@freshgroup.local", "changeme");

    let csv = "\
Firstname,Lastname,Sex,Program,Municipality,Income,SHS Type,SHS Origin,GWA
Ñora,Peña,F,BSIT,Calamba,8000,Public,Calamba NHS,90
Ana,Cruz,F,BSIT,Calamba,9000,Public,Calamba NHS,85
Ben,Dela_Cruz,M,BSCS,Cabuyao,150000,Private,Cabuyao Academy,97
";
    let req = upload_request("/api/datasets/upload?k=2", &token, "names.csv", csv).to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    for (term, expected) in [
        ("%C3%B1ora", vec!["Ñora"]),
        ("%C3%91ORA", vec!["Ñora"]),
        ("PE%C3%91A", vec!["Ñora"]),
        ("cruz", vec!["Ana", "Ben"]),
        ("_", vec!["Ben"]),
        ("%25", vec![]),
    ] {
        let uri = format!("/api/students?search={term}");
        let req = authed(test::TestRequest::get().uri(&uri), &token).to_request();
        let found: Value = test::call_and_read_body_json(&app, req).await;
        let names: Vec<&str> = found
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["firstname"].as_str().unwrap())
            .collect();
        assert_eq!(names, expected, "{term}");
    }
}

#[actix_web::test]
async fn test_xlsx_upload() {
    let state = test_state().await;
    let app = init_app!(state);
    let token = login!(app, "admin@freshgroup.local", "changeme");

    let body = multipart_body(
        "freshmen.xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        &students_xlsx(STUDENTS_CSV),
    );
    let req = multipart_request("/api/datasets/upload?k=2", &token, body).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let uploaded: Value = test::read_body_json(resp).await;
    assert_eq!(uploaded["total_students"], 8);
    assert_eq!(uploaded["clusters"], 2);

    let req = authed(test::TestRequest::get().uri("/api/students?search=gus"), &token).to_request();
    let gus: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(gus[0]["Honors"], "Incomplete");
    assert_eq!(gus[0]["income"], 12000.0);

    let req = authed(test::TestRequest::get().uri("/api/clusters"), &token).to_request();
    let clusters: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(clusters["plot_data"]["x"].as_array().unwrap().len(), 7);
}

#[actix_web::test]
async fn test_upload_without_complete_rows_stores_empty_run() {
    let state = test_state().await;
    let app = init_app!(state);
    let token = login!(app, "admin@freshgroup.local", "changeme");

    let csv = "\
First Name,Last Name,Course,Family Income,GWA
Ana,Cruz,BSIT,8000,
Ben,Reyes,BSCS,,91
";
    let req = upload_request("/api/datasets/upload", &token, "partial.csv", csv).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let uploaded: Value = test::read_body_json(resp).await;
    assert_eq!(uploaded["total_students"], 2);
    assert_eq!(uploaded["clusters"], 3);

    let req = authed(test::TestRequest::get().uri("/api/clusters"), &token).to_request();
    let clusters: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(clusters["k"], 3);
    assert_eq!(clusters["clusters"], json!({}));
    assert_eq!(clusters["centroids"], json!([]));
    assert_eq!(clusters["plot_data"]["x"], json!([]));
}

#[actix_web::test]
async fn test_pairwise_and_playground() {
    let state = test_state().await;
    let app = init_app!(state);
    let token = login!(app, "admin@freshgroup.local", "changeme");

    let req = upload_request("/api/datasets/upload?k=2", &token, "freshmen.csv", STUDENTS_CSV).to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    let req = authed(
        test::TestRequest::get().uri("/api/clusters/pairwise?x=program&y=gwa&k=2"),
        &token,
    )
    .to_request();
    let pair: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(pair["x_name"], "program");
    assert_eq!(pair["x_categories"], json!(["BSCS", "BSIT"]));
    assert!(pair["y_categories"].is_null());
    assert_eq!(pair["students"].as_array().unwrap().len(), 7);
    assert_eq!(pair["centroids"].as_array().unwrap().len(), 2);

    let req = authed(
        test::TestRequest::get().uri("/api/clusters/pairwise?x=height&y=gwa"),
        &token,
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["detail"].as_str().unwrap().starts_with("Allowed features"));

    let req = authed(test::TestRequest::get().uri("/api/clusters/playground?k=2"), &token).to_request();
    let playground: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(playground["students"].as_array().unwrap().len(), 7);
    assert_eq!(playground["centroids"].as_array().unwrap().len(), 2);

    for uri in ["/api/clusters/playground?k=11", "/api/clusters/playground?k=1"] {
        let req = authed(test::TestRequest::get().uri(uri), &token).to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST,
            "{uri}"
        );
    }
}

#[actix_web::test]
async fn test_viewer_permissions() {
    let state = test_state().await;
    let app = init_app!(state);
    let admin = login!(app, "admin@freshgroup.local", "changeme");

    let req = upload_request("/api/datasets/upload?k=2", &admin, "freshmen.csv", STUDENTS_CSV).to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    let req = authed(test::TestRequest::post().uri("/api/users"), &admin)
        .set_json(json!({
            "email": "viewer@freshgroup.local",
            "password": "viewer1",
            "profile": { "name": "Vera" }
        }))
        .to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    let viewer = login!(app, "viewer@freshgroup.local", "viewer1");

    let req = authed(test::TestRequest::get().uri("/api/users/me"), &viewer).to_request();
    let me: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(me["role"], "Viewer");
    assert_eq!(me["profile"]["name"], "Vera");

    let req = upload_request("/api/datasets/upload", &viewer, "freshmen.csv", STUDENTS_CSV).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = authed(test::TestRequest::get().uri("/api/users"), &viewer).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = authed(test::TestRequest::post().uri("/api/clusters/recluster?k=3"), &viewer).to_request();
    let preview: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(preview["students"].as_array().unwrap().len(), 7);
    assert_eq!(preview["centroids"].as_array().unwrap().len(), 3);

    // The stored run is untouched by a Viewer preview.
    let req = authed(test::TestRequest::get().uri("/api/clusters"), &viewer).to_request();
    let clusters: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(clusters["k"], 2);

    let req = authed(test::TestRequest::get().uri("/api/activity-logs"), &viewer).to_request();
    let logs: Value = test::call_and_read_body_json(&app, req).await;
    let logs = logs.as_array().unwrap();
    assert!(logs.iter().all(|entry| entry.get("user_email").is_none()));
    assert!(logs.iter().any(|entry| entry["action"] == "login"));
}

#[actix_web::test]
async fn test_deactivated_user_cannot_log_in() {
    let state = test_state().await;
    let app = init_app!(state);
    let admin = login!(app, "admin@freshgroup.local", "changeme");

    let req = authed(test::TestRequest::post().uri("/api/users"), &admin)
        .set_json(json!({ "email": "temp@freshgroup.local", "password": "temp123", "role": "Viewer" }))
        .to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let id = created["id"].as_i64().unwrap();

    let req = authed(
        test::TestRequest::put().uri(&format!("/api/users/{id}/toggle-active")),
        &admin,
    )
    .set_json(json!({ "active": false }))
    .to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "email": "temp@freshgroup.local", "password": "temp123" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn test_change_password_checks_current_password() {
    let state = test_state().await;
    let app = init_app!(state);
    let token = login!(app, "admin@freshgroup.local", "changeme");

    let req = authed(test::TestRequest::post().uri("/api/users/change-password"), &token)
        .set_json(json!({
            "current_password": "wrong",
            "new_password": "brandnew",
            "confirm_password": "brandnew"
        }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

    let req = authed(test::TestRequest::post().uri("/api/users/change-password"), &token)
        .set_json(json!({
            "current_password": "changeme",
            "new_password": "brandnew",
            "confirm_password": "brandnew"
        }))
        .to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    let fresh = login!(app, "admin@freshgroup.local", "brandnew");
    assert!(!fresh.is_empty());
}

#[actix_web::test]
async fn test_reports() {
    let state = test_state().await;
    let app = init_app!(state);
    let token = login!(app, "admin@freshgroup.local", "changeme");

    let req = authed(test::TestRequest::get().uri("/api/reports/honors_report"), &token).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = upload_request("/api/datasets/upload?k=2", &token, "freshmen.csv", STUDENTS_CSV).to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    let req = authed(
        test::TestRequest::get().uri("/api/reports/honors_report?format=csv"),
        &token,
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let disposition = resp
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("honors_report.csv"));
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.starts_with("Summary,Count"));
    assert!(body.contains("Firstname,Lastname,GWA,Honors"));

    let req = authed(
        test::TestRequest::get().uri("/api/reports/cluster_analysis/preview"),
        &token,
    )
    .to_request();
    let html = String::from_utf8(test::call_and_read_body(&app, req).await.to_vec()).unwrap();
    assert!(html.contains("Cluster Analysis Report (Preview)"));

    let req = authed(
        test::TestRequest::get().uri("/api/reports/cluster_playground?k=2&format=csv"),
        &token,
    )
    .to_request();
    let csv = String::from_utf8(test::call_and_read_body(&app, req).await.to_vec()).unwrap();
    assert!(csv.starts_with("Cluster,Count"));

    for (uri, filename) in [
        ("/api/reports/honors_report", "honors_report.pdf"),
        ("/api/reports/dashboard_summary?format=pdf", "dashboard_summary.pdf"),
        ("/api/reports/cluster_playground?k=2", "cluster_playground.pdf"),
    ] {
        let req = authed(test::TestRequest::get().uri(uri), &token).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK, "{uri}");
        let headers = resp.headers();
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/pdf");
        let disposition = headers.get(header::CONTENT_DISPOSITION).unwrap().to_str().unwrap();
        assert!(disposition.contains(filename), "{uri}");
        let body = test::read_body(resp).await;
        assert!(body.starts_with(b"%PDF"), "{uri}");
    }

    for uri in [
        "/api/reports/honors_report?format=xml",
        "/api/reports/salary_report",
        "/api/reports/cluster_playground?k=11",
    ] {
        let req = authed(test::TestRequest::get().uri(uri), &token).to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST,
            "{uri}"
        );
    }
}

#[actix_web::test]
async fn test_dataset_lifecycle() {
    let state = test_state().await;
    let app = init_app!(state);
    let token = login!(app, "admin@freshgroup.local", "changeme");

    for name in ["first.csv", "second.csv"] {
        let req = upload_request("/api/datasets/upload?k=2", &token, name, STUDENTS_CSV).to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
    }

    let req = authed(test::TestRequest::get().uri("/api/datasets"), &token).to_request();
    let datasets: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(datasets[0]["filename"], "second.csv");
    let first_id = datasets[1]["id"].as_i64().unwrap();

    let req = authed(
        test::TestRequest::post().uri(&format!("/api/datasets/{first_id}/activate")),
        &token,
    )
    .to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    let req = authed(
        test::TestRequest::get().uri(&format!("/api/datasets/{first_id}/download")),
        &token,
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let disposition = resp.headers().get(header::CONTENT_DISPOSITION).unwrap();
    assert!(disposition.to_str().unwrap().contains("first_export.csv"));

    let req = authed(
        test::TestRequest::get().uri(&format!("/api/datasets/{first_id}/preview")),
        &token,
    )
    .to_request();
    let preview: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(preview["rows"].as_array().unwrap().len(), 8);
    assert_eq!(preview["rows"][0]["firstname"], "Ana");

    let req = authed(
        test::TestRequest::delete().uri(&format!("/api/datasets/{first_id}")),
        &token,
    )
    .to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    let req = authed(
        test::TestRequest::get().uri(&format!("/api/datasets/{first_id}/download")),
        &token,
    )
    .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = authed(test::TestRequest::get().uri("/api/activity-logs"), &token).to_request();
    let logs: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(logs[0]["action"], "delete_dataset");
    assert_eq!(logs[0]["user_email"], "admin@freshgroup.local");
}
