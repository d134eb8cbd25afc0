use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use std::error::Error;
use tracing_subscriber::EnvFilter;

use freshgroup::settings::Settings;
use freshgroup::{configure, AppState};

#[actix_web::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::new()?;
    let bind = (settings.server.host.clone(), settings.server.port);

    let state = AppState::new(settings).await?;
    state.ensure_bootstrap_admin().await?;
    let state = web::Data::new(state);

    tracing::info!(host = %bind.0, port = bind.1, "starting FreshGroup API");

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
