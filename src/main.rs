use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, put},
    Router,
};
use sqlx::SqlitePool;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

mod config;
mod db;
mod error;
mod handlers;
mod models;
#[cfg(test)]
mod testing;
mod uploads;

use crate::config::Config;
use crate::uploads::UploadStore;

/// Shared application state, built once at start-up. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub uploads: Arc<UploadStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,resale_inventory=debug,tower_http=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();

    let config = Config::from_env()?;

    info!(url = %config.database_url, "Opening SQLite database...");
    let pool = db::connect(&config.database_url, config.db_max_connections).await?;

    info!("Running migrations...");
    db::migrate(&pool).await?;
    info!("Migrations complete.");

    let uploads = UploadStore::open(&config.static_dir).await?;
    info!(dir = %uploads.dir().display(), "Upload directory ready");

    let state = AppState {
        db: pool,
        uploads: Arc::new(uploads),
    };

    let app = build_router(state, &config);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState, config: &Config) -> Router {
    Router::new()
        // ── Pages ───────────────────────────────────────────────────────────
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))

        // ── Products ────────────────────────────────────────────────────────
        .route(
            "/products",
            get(handlers::products::list_products).post(handlers::products::create_product),
        )
        .route("/products/:id", put(handlers::products::update_product))

        // ── Static assets and uploads ───────────────────────────────────────
        .nest_service("/static", ServeDir::new(&config.static_dir))

        // ── Middleware ──────────────────────────────────────────────────────
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
