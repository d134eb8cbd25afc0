//! Password hashing, bearer sessions and the `CurrentUser` extractor.
//!
//! Passwords are stored as Argon2id PHC strings. A successful login creates a
//! random session token in the `sessions` table; every protected handler takes
//! a [`CurrentUser`] argument, which resolves the `Authorization: Bearer`
//! header back to an active account.

use actix_web::dev::Payload;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, FromRequest, HttpRequest};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use futures_util::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::database::UserRow;
use crate::error::ApiError;
use crate::AppState;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Viewer => "Viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            r if r.eq_ignore_ascii_case("admin") => Ok(Role::Admin),
            r if r.eq_ignore_ascii_case("viewer") => Ok(Role::Viewer),
            other => Err(ApiError::bad_request(format!("Unknown role: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub position: String,
}

impl UserProfile {
    pub fn from_json(raw: Option<&str>) -> Self {
        raw.and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
    }
}

/// A user as returned to clients; never carries the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: i64,
    pub email: String,
    pub role: String,
    pub active: bool,
    pub profile: UserProfile,
    pub created_at: DateTime<Utc>,
}

impl From<&UserRow> for UserView {
    fn from(row: &UserRow) -> Self {
        UserView {
            id: row.id,
            email: row.email.clone(),
            role: row.role.clone(),
            active: row.active,
            profile: UserProfile::from_json(row.profile.as_deref()),
            created_at: row.created_at,
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("Failed to hash password: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            tracing::warn!(error = %err, "stored password hash is malformed");
            false
        }
    }
}

/// [`hash_password`] on the blocking pool; Argon2 is deliberately slow.
pub async fn hash_password_async(password: String) -> Result<String, ApiError> {
    web::block(move || hash_password(&password)).await?
}

/// [`verify_password`] on the blocking pool.
pub async fn verify_password_async(password: String, hash: String) -> Result<bool, ApiError> {
    Ok(web::block(move || verify_password(&password, &hash)).await?)
}

pub fn validate_new_password(password: &str, confirm: &str) -> Result<(), ApiError> {
    if password != confirm {
        return Err(ApiError::bad_request("Passwords do not match"));
    }
    validate_password_length(password)
}

pub fn validate_password_length(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }
    Ok(())
}

pub fn new_session_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn session_expiry(ttl_hours: i64) -> DateTime<Utc> {
    Utc::now() + Duration::hours(ttl_hours.max(1))
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer ")))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i64,
    pub email: String,
    pub role: Role,
    pub token: String,
    pub row: UserRow,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Fails with 403 and `message` unless the caller is an Admin.
    pub fn require_admin(&self, message: &str) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden(message))
        }
    }
}

impl FromRequest for CurrentUser {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().cloned();
        let token = bearer_token(req);

        Box::pin(async move {
            let state = state.ok_or_else(|| ApiError::Internal("application state missing".into()))?;
            let token = token.ok_or_else(|| ApiError::Unauthorized("Not authenticated".into()))?;

            let row = state
                .db
                .session_user(&token)
                .await?
                .ok_or_else(|| ApiError::Unauthorized("Invalid or expired session".into()))?;
            let role = row.role.parse::<Role>().unwrap_or(Role::Viewer);

            Ok(CurrentUser {
                id: row.id,
                email: row.email.clone(),
                role,
                token,
                row,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("secret123").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("secret123", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("secret123", "not-a-hash"));
    }

    #[actix_web::test]
    async fn test_async_hashing_matches_sync() {
        let hash = hash_password_async("secret123".into()).await.unwrap();
        assert!(verify_password("secret123", &hash));
        assert!(verify_password_async("secret123".into(), hash.clone()).await.unwrap());
        assert!(!verify_password_async("nope".into(), hash).await.unwrap());
    }

    #[test]
    fn test_password_rules() {
        assert!(validate_new_password("abcdef", "abcdef").is_ok());
        assert!(validate_new_password("abcdef", "abcdeg").is_err());
        assert!(validate_new_password("abc", "abc").is_err());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("viewer".parse::<Role>().unwrap(), Role::Viewer);
        assert!("Owner".parse::<Role>().is_err());
    }

    #[test]
    fn test_profile_defaults() {
        assert_eq!(UserProfile::from_json(None), UserProfile::default());
        let profile = UserProfile::from_json(Some(r#"{"name":"Ana"}"#));
        assert_eq!(profile.name, "Ana");
        assert_eq!(profile.department, "");
    }

    #[test]
    fn test_bearer_token() {
        let req = TestRequest::default()
            .insert_header((AUTHORIZATION, "Bearer abc-123"))
            .to_http_request();
        assert_eq!(bearer_token(&req).as_deref(), Some("abc-123"));

        let req = TestRequest::default()
            .insert_header((AUTHORIZATION, "Basic abc"))
            .to_http_request();
        assert_eq!(bearer_token(&req), None);
    }
}
