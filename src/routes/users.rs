use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use super::log_activity;
use crate::auth::{
    hash_password_async, validate_new_password, validate_password_length, verify_password_async,
    CurrentUser, Role, UserProfile, UserView,
};
use crate::database::UserRow;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/users", web::get().to(list_users))
        .route("/users", web::post().to(create_user))
        .route("/users/me", web::get().to(me))
        .route("/users/me", web::put().to(update_me))
        .route("/users/change-password", web::post().to(change_password))
        .route("/users/{id}", web::put().to(update_user))
        .route("/users/{id}", web::delete().to(delete_user))
        .route("/users/{id}/reset-password", web::post().to(reset_password))
        .route("/users/{id}/toggle-active", web::put().to(toggle_active))
        .route("/activity-logs", web::get().to(activity_logs));
}

/// Partial profile edit; blank fields leave the stored value alone.
#[derive(Debug, Default, Deserialize)]
struct ProfileUpdate {
    name: Option<String>,
    department: Option<String>,
    position: Option<String>,
}

impl ProfileUpdate {
    fn apply(&self, profile: &mut UserProfile) -> bool {
        let mut changed = false;
        for (field, value) in [
            (&mut profile.name, &self.name),
            (&mut profile.department, &self.department),
            (&mut profile.position, &self.position),
        ] {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                *field = value.to_string();
                changed = true;
            }
        }
        changed
    }
}

fn required<'a>(value: &'a Option<String>, message: &str) -> ApiResult<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(message))
}

async fn load_user(state: &AppState, id: i64) -> ApiResult<UserRow> {
    state
        .db
        .find_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

async fn list_users(state: web::Data<AppState>, user: CurrentUser) -> ApiResult<HttpResponse> {
    user.require_admin("Only Admins can view users")?;
    let users: Vec<UserView> = state.db.list_users().await?.iter().map(UserView::from).collect();
    Ok(HttpResponse::Ok().json(users))
}

#[derive(Deserialize)]
struct CreateUserRequest {
    email: Option<String>,
    password: Option<String>,
    role: Option<String>,
    #[serde(default)]
    profile: ProfileUpdate,
}

async fn create_user(
    state: web::Data<AppState>,
    user: CurrentUser,
    body: web::Json<CreateUserRequest>,
) -> ApiResult<HttpResponse> {
    user.require_admin("Only Admins can create users")?;

    let email = required(&body.email, "Email and password are required")?.trim();
    let password = required(&body.password, "Email and password are required")?;
    validate_password_length(password)?;
    let role = match body.role.as_deref().filter(|r| !r.trim().is_empty()) {
        Some(role) => role.parse::<Role>()?,
        None => Role::Viewer,
    };
    if state.db.find_user_by_email(email).await?.is_some() {
        return Err(ApiError::bad_request("User with this email already exists"));
    }

    let mut profile = UserProfile::default();
    body.profile.apply(&mut profile);
    let id = state
        .db
        .create_user(
            email,
            &hash_password_async(password.to_string()).await?,
            role.as_str(),
            &profile.to_json(),
        )
        .await?;

    log_activity(&state, user.id, "create_user", &format!("Created {role} account {email}")).await;
    tracing::info!(user_id = id, %role, "user created");
    Ok(HttpResponse::Ok().json(json!({ "message": "User created successfully", "id": id })))
}

async fn me(user: CurrentUser) -> HttpResponse {
    HttpResponse::Ok().json(UserView::from(&user.row))
}

async fn update_me(
    state: web::Data<AppState>,
    user: CurrentUser,
    body: web::Json<ProfileUpdate>,
) -> ApiResult<HttpResponse> {
    let mut profile = UserProfile::from_json(user.row.profile.as_deref());
    if !body.apply(&mut profile) {
        return Err(ApiError::bad_request("No changes provided"));
    }
    state.db.update_profile(user.id, &profile.to_json()).await?;
    log_activity(&state, user.id, "update_profile", "Updated own profile").await;

    let updated = load_user(&state, user.id).await?;
    Ok(HttpResponse::Ok().json(UserView::from(&updated)))
}

#[derive(Deserialize)]
struct ChangePasswordRequest {
    current_password: Option<String>,
    new_password: Option<String>,
    confirm_password: Option<String>,
}

async fn change_password(
    state: web::Data<AppState>,
    user: CurrentUser,
    body: web::Json<ChangePasswordRequest>,
) -> ApiResult<HttpResponse> {
    const MISSING: &str = "Current password, new password and confirmation are required";
    let current = required(&body.current_password, MISSING)?;
    let new_password = required(&body.new_password, MISSING)?;
    let confirm = required(&body.confirm_password, MISSING)?;

    validate_new_password(new_password, confirm)?;
    if !verify_password_async(current.to_string(), user.row.password_hash.clone()).await? {
        return Err(ApiError::Unauthorized("Current password is incorrect".into()));
    }

    let hash = hash_password_async(new_password.to_string()).await?;
    state.db.set_password(user.id, &hash).await?;
    log_activity(&state, user.id, "change_password", "Changed own password").await;
    Ok(HttpResponse::Ok().json(json!({ "message": "Password changed successfully" })))
}

#[derive(Deserialize)]
struct UpdateUserRequest {
    role: Option<String>,
    #[serde(default)]
    profile: ProfileUpdate,
}

async fn update_user(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<UpdateUserRequest>,
) -> ApiResult<HttpResponse> {
    user.require_admin("Only Admins can edit users")?;
    let target = load_user(&state, path.into_inner()).await?;

    let role = match body.role.as_deref().filter(|r| !r.trim().is_empty()) {
        Some(role) => role.parse::<Role>()?.as_str().to_string(),
        None => target.role.clone(),
    };
    let mut profile = UserProfile::from_json(target.profile.as_deref());
    body.profile.apply(&mut profile);

    state.db.update_user(target.id, &role, &profile.to_json()).await?;
    log_activity(
        &state,
        user.id,
        "update_user",
        &format!("Updated {} (role {role})", target.email),
    )
    .await;

    let updated = load_user(&state, target.id).await?;
    Ok(HttpResponse::Ok().json(UserView::from(&updated)))
}

async fn delete_user(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> ApiResult<HttpResponse> {
    user.require_admin("Only Admins can delete users")?;
    let target = load_user(&state, path.into_inner()).await?;
    if target.id == user.id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    state.db.delete_user(target.id).await?;
    log_activity(&state, user.id, "delete_user", &format!("Deleted {}", target.email)).await;
    tracing::info!(user_id = target.id, "user deleted");
    Ok(HttpResponse::Ok().json(json!({ "message": "User deleted successfully" })))
}

#[derive(Deserialize)]
struct ResetPasswordRequest {
    new_password: Option<String>,
    confirm_password: Option<String>,
}

async fn reset_password(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<ResetPasswordRequest>,
) -> ApiResult<HttpResponse> {
    user.require_admin("Only Admins can reset passwords")?;
    const MISSING: &str = "New password and confirmation are required";
    let new_password = required(&body.new_password, MISSING)?;
    let confirm = required(&body.confirm_password, MISSING)?;
    validate_new_password(new_password, confirm)?;

    let target = load_user(&state, path.into_inner()).await?;
    let hash = hash_password_async(new_password.to_string()).await?;
    state.db.set_password(target.id, &hash).await?;
    log_activity(
        &state,
        user.id,
        "reset_password",
        &format!("Reset password for {}", target.email),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "message": "Password reset successfully" })))
}

#[derive(Deserialize)]
struct ToggleActiveRequest {
    active: Option<bool>,
}

async fn toggle_active(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<ToggleActiveRequest>,
) -> ApiResult<HttpResponse> {
    user.require_admin("Only Admins can activate or deactivate users")?;
    let active = body
        .active
        .ok_or_else(|| ApiError::bad_request("Field 'active' is required"))?;

    let target = load_user(&state, path.into_inner()).await?;
    state.db.set_active(target.id, active).await?;
    let verb = if active { "Activated" } else { "Deactivated" };
    log_activity(&state, user.id, "toggle_active", &format!("{verb} {}", target.email)).await;
    Ok(HttpResponse::Ok().json(json!({
        "message": format!("User {}", verb.to_lowercase()),
        "active": active,
    })))
}

async fn activity_logs(state: web::Data<AppState>, user: CurrentUser) -> ApiResult<HttpResponse> {
    let entries = if user.is_admin() {
        state.db.all_activity().await?
    } else {
        state.db.activity_for_user(user.id).await?
    };
    Ok(HttpResponse::Ok().json(entries))
}
