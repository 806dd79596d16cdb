use std::path::PathBuf;

use anyhow::Context;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{extract::FromRef, routing::get, Router};
use prometheus::{Encoder, TextEncoder};
use routes::{auth_router, courses_router, reviews_router};
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tower_sessions::{MemoryStore, SessionManagerLayer};

use super::error::{ApiError, ApiResponse};
use super::routes;
use crate::configuration::ApplicationSettings;

pub const SESSION_COOKIE: &str = "session";

#[derive(FromRef, Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub static_dir: PathBuf,
}

pub fn build_app(state: AppState, secure_cookies: bool) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_name(SESSION_COOKIE)
        .with_secure(secure_cookies);

    Router::new()
        .route("/metrics", get(metrics))
        .nest_service("/static", ServeDir::new(&state.static_dir))
        .merge(auth_router(state.clone()))
        .merge(courses_router(state.clone()))
        .merge(reviews_router(state))
        .fallback(|| async {
            tracing::info!("Fallback");
            ApiError::NotFound
        })
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_server(
    pool: SqlitePool,
    settings: &ApplicationSettings,
) -> anyhow::Result<()> {
    let addr = settings.address();
    let state = AppState {
        pool,
        static_dir: settings.static_dir.clone(),
    };
    let app = build_app(state, settings.secure_cookies);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!("Serving on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics() -> ApiResponse<Response> {
    let encoder = TextEncoder::new();
    let metrics = prometheus::gather();
    let mut buf = vec![];
    encoder
        .encode(&metrics, &mut buf)
        .context("Failed to encode metrics")?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_owned())],
        buf,
    )
        .into_response())
}
