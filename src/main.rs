mod config;
mod db;
mod error;
mod handlers;
mod i18n;
mod models;
mod services;
mod state;
mod util;

use actix_cors::Cors;
use actix_web::middleware::{Logger, NormalizePath};
use actix_web::{web, App, HttpServer};
use tracing_subscriber::EnvFilter;

use config::Config;
use state::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()));
        }
    };

    let pool = match db::init_pool(&config.database_url, config.max_connections).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, database_url = %config.database_url, "failed to initialize SQLite pool");
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        }
    };

    let port = config.port;
    tracing::info!(port, database_url = %config.database_url, "starting shipping back-office");
    let app_state = web::Data::new(AppState::new(pool, config));

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(NormalizePath::trim())
            .wrap(Cors::permissive())
            .app_data(app_state.clone())
            .configure(handlers::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
