use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use super::log_activity;
use crate::auth::{new_session_token, session_expiry, verify_password_async, CurrentUser, UserView};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/auth/login", web::post().to(login))
        .route("/auth/logout", web::post().to(logout));
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> ApiResult<HttpResponse> {
    let LoginRequest { email, password } = body.into_inner();
    let email = email.trim();

    let rejected = || {
        tracing::info!(%email, "rejected login");
        ApiError::Unauthorized("Invalid email or password".into())
    };
    let user = state.db.find_user_by_email(email).await?.ok_or_else(rejected)?;
    if !verify_password_async(password, user.password_hash.clone()).await? {
        return Err(rejected());
    }
    if !user.active {
        return Err(ApiError::forbidden("Account is deactivated"));
    }

    let token = new_session_token();
    state
        .db
        .create_session(&token, user.id, session_expiry(state.settings.auth.session_ttl_hours))
        .await?;
    log_activity(&state, user.id, "login", &format!("{} logged in", user.email)).await;
    tracing::info!(user_id = user.id, "user logged in");

    Ok(HttpResponse::Ok().json(json!({
        "access_token": token,
        "token_type": "bearer",
        "user": UserView::from(&user),
    })))
}

async fn logout(state: web::Data<AppState>, user: CurrentUser) -> ApiResult<HttpResponse> {
    state.db.delete_session(&user.token).await?;
    log_activity(&state, user.id, "logout", &format!("{} logged out", user.email)).await;
    Ok(HttpResponse::Ok().json(json!({ "message": "Logged out" })))
}
