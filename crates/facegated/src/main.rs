use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod engine;
mod error;
mod store;

use api::AppState;
use config::Config;
use store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = Config::from_env();

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data dir {}", parent.display()))?;
    }

    let store = Store::open(&config.db_path)
        .await
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    tracing::info!(path = %config.db_path.display(), "database opened");

    let engine = engine::spawn_engine(&config.scrfd_model_path(), &config.arcface_model_path())
        .context("loading ONNX models")?;

    let state = AppState {
        engine,
        store,
        similarity_threshold: config.similarity_threshold,
    };

    let app = api::build_router(state)
        .layer(cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(config.max_upload_bytes));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(
        addr = %config.bind_addr,
        threshold = config.similarity_threshold,
        "facegated ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facegated shutting down");
    Ok(())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(parse_origins(allowed_origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Parse configured CORS origins, warning on (and skipping) invalid entries.
fn parse_origins(allowed_origins: &[String]) -> Vec<HeaderValue> {
    allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(origin = %origin, error = %err, "skipping unparsable CORS origin");
                None
            }
        })
        .collect()
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install ctrl-c handler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origins_keeps_valid_entries() {
        let origins = vec![
            "http://localhost:3000".to_string(),
            "https://attendance.example.com".to_string(),
        ];
        let parsed = parse_origins(&origins);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], "http://localhost:3000");
    }

    #[test]
    fn test_parse_origins_skips_unparsable_entries() {
        let origins = vec![
            "http://localhost:3000".to_string(),
            "not a header\u{0000}value".to_string(),
        ];
        let parsed = parse_origins(&origins);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0], "http://localhost:3000");
    }
}
