// src/server.rs

use crate::config::ServerSection;
use crate::dashboard;
use crate::pipeline::{BatchReport, Pipeline, Upload};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/process", post(process_page))
        .route("/api/process", post(process_json))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

pub async fn serve(cfg: &ServerSection, pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let app = router(AppState { pipeline }, cfg.max_upload_bytes);

    let addr = format!("{}:{}", cfg.host, cfg.port);
    info!("Dashboard listening on http://{}", addr);
    info!("  GET  /             - upload form");
    info!("  POST /process      - process invoices (HTML)");
    info!("  POST /api/process  - process invoices (JSON)");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn index() -> Html<String> {
    Html(dashboard::render_index())
}

/// Every part carrying a non-empty file name is one upload, in form order.
async fn read_uploads(mut multipart: Multipart) -> Result<Vec<Upload>, MultipartError> {
    let mut uploads = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        if filename.is_empty() {
            // browsers send an empty part when no file was picked
            continue;
        }
        let bytes = field.bytes().await?;
        info!(filename = %filename, bytes = bytes.len(), "Upload received");
        uploads.push(Upload::from_bytes(filename, bytes.to_vec()));
    }
    Ok(uploads)
}

async fn run_batch(state: &AppState, multipart: Multipart) -> Result<BatchReport, Response> {
    let uploads = read_uploads(multipart).await.map_err(|e| {
        warn!(error = %e, "Rejected malformed upload");
        (e.status(), format!("Upload failed: {}", e.body_text())).into_response()
    })?;
    Ok(state.pipeline.process_batch(uploads).await)
}

async fn process_page(State(state): State<AppState>, multipart: Multipart) -> Response {
    match run_batch(&state, multipart).await {
        Ok(report) => (StatusCode::OK, Html(dashboard::render_report(&report))).into_response(),
        Err(response) => response,
    }
}

async fn process_json(State(state): State<AppState>, multipart: Multipart) -> Response {
    match run_batch(&state, multipart).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(response) => response,
    }
}
