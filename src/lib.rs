//! FreshGroup: student profiling and k-means clustering service.
//!
//! Admins upload student datasets (CSV or XLSX). The service normalizes them,
//! stores every record, clusters the complete ones on GWA and family income,
//! and serves dashboards, filtered student lists, cluster explorers, user
//! management, activity logs and exportable reports over a JSON API.

pub mod analytics;
pub mod auth;
pub mod clustering;
pub mod data;
pub mod database;
pub mod elbow;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pdf;
pub mod routes;
pub mod settings;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::sync::Arc;

use database::Database;
use settings::Settings;

/// Shared state handed to every handler through `web::Data`.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub async fn new(settings: Settings) -> Result<Self, sqlx::Error> {
        let db = Database::connect(&settings.database).await?;
        Ok(AppState {
            db,
            settings: Arc::new(settings),
        })
    }

    /// Seed the configured Admin account when no users exist yet.
    pub async fn ensure_bootstrap_admin(&self) -> Result<(), error::ApiError> {
        if self.db.count_users().await? > 0 {
            return Ok(());
        }
        let auth = &self.settings.auth;
        let password = match &auth.bootstrap_password {
            Some(password) => password.clone(),
            None => {
                let generated = generate_password();
                tracing::warn!(
                    email = %auth.bootstrap_email,
                    password = %generated,
                    "no auth.bootstrap_password configured; generated one for the bootstrap admin"
                );
                generated
            }
        };
        let hash = auth::hash_password_async(password).await?;
        let profile = auth::UserProfile {
            name: "Administrator".into(),
            ..Default::default()
        };
        self.db
            .create_user(
                &auth.bootstrap_email,
                &hash,
                auth::Role::Admin.as_str(),
                &profile.to_json(),
            )
            .await?;
        tracing::warn!(email = %auth.bootstrap_email, "created bootstrap admin account; change its password");
        Ok(())
    }
}

fn generate_password() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

pub use routes::configure;
