//! HTTP surface: routes, upload handling and error responses

use std::net::SocketAddr;

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::pipeline::{self, ClusterReport, PipelineConfig};

/// Multipart field carrying the CSV file
pub const FILE_FIELD: &str = "file";

/// Listener and request limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub max_upload_bytes: usize,
}

/// State shared by the handlers; read-only for the server's lifetime
#[derive(Debug, Clone, Copy, Default)]
pub struct AppState {
    pub pipeline: PipelineConfig,
}

/// JSON body of every failed request
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Pipeline error mapped to an HTTP status
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            warn!(error = %self.0, "Rejected upload");
            StatusCode::BAD_REQUEST
        } else {
            error!(error = %self.0, "Upload processing failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };

        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the router with all endpoints
pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/upload_csv/", post(upload_csv))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(config: ServerConfig, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, build_router(state, config.max_upload_bytes)).await
}

/// `GET /`: liveness check
pub async fn home() -> &'static str {
    "Customer Segmentation Backend Running"
}

/// `POST /upload_csv/`: cluster the uploaded file and return the report
pub async fn upload_csv(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ClusterReport>, ApiError> {
    let mut multipart = multipart.map_err(|e| Error::InvalidUpload(e.body_text()))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidUpload(e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload.csv").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::InvalidUpload(e.body_text()))?;
        info!("Received file: {} ({} bytes)", file_name, bytes.len());
        upload = Some(bytes);
        break;
    }

    let bytes = upload.ok_or(Error::NoFile)?;
    let config = state.pipeline;

    // CPU-bound; keep it off the async workers
    let report = tokio::task::spawn_blocking(move || pipeline::run(&bytes, &config))
        .await
        .map_err(|e| Error::Worker(e.to_string()))??;

    Ok(Json(report))
}
