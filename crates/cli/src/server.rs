//! HTTP surface for the input directory: `POST /upload` and `GET /files`.

use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::{InputStore, ListedFile, StorageError};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("upload too large: {0}")]
    TooLarge(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Storage(StorageError::InvalidName(_) | StorageError::OutsideRoot(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Storage(StorageError::Io(_)) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            warn!(error = %self, "rejected request");
        }
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    store: Arc<InputStore>,
}

#[derive(Debug, Deserialize)]
struct JsonUpload {
    filename: String,
    /// Base64, optionally as a `data:` URL.
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub filename: String,
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct FilesResponse {
    pub files: Vec<ListedFile>,
}

pub fn router(store: InputStore, max_upload_bytes: usize) -> Router {
    let state = AppState {
        store: Arc::new(store),
    };
    Router::new()
        .route("/upload", post(upload))
        .route("/files", get(list_files))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(bind: &str, store: InputStore, max_upload_bytes: usize) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, root = ?store.root(), "upload service listening");
    axum::serve(listener, router(store, max_upload_bytes)).await?;
    Ok(())
}

async fn upload(State(state): State<AppState>, req: Request) -> Result<Json<UploadResponse>, ApiError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let (filename, data) = if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| rejected(e.status(), e.body_text()))?;
        read_multipart(multipart).await?
    } else if content_type.starts_with("application/json") {
        let Json(body) = Json::<JsonUpload>::from_request(req, &state)
            .await
            .map_err(|e| rejected(e.status(), e.body_text()))?;
        let data = decode_base64(&body.data)?;
        (body.filename, Bytes::from(data))
    } else {
        return Err(ApiError::BadRequest(
            "expected multipart/form-data or application/json".into(),
        ));
    };

    let store = state.store.clone();
    let stored = tokio::task::spawn_blocking(move || store.save_unique(&filename, &data))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    info!(filename = %stored.filename, size = stored.size, "file uploaded");
    Ok(Json(UploadResponse {
        success: true,
        filename: stored.filename,
        path: stored.path.to_string_lossy().into_owned(),
        size: stored.size,
    }))
}

async fn read_multipart(mut multipart: Multipart) -> Result<(String, Bytes), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| rejected(e.status(), e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .filter(|n| !n.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("file field has no filename".into()))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| rejected(e.status(), e.body_text()))?;
        return Ok((filename, data));
    }
    Err(ApiError::BadRequest("no file field in form".into()))
}

/// Extractor rejections keep their 413 when the body limit tripped.
fn rejected(status: StatusCode, text: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::TooLarge(text)
    } else {
        ApiError::BadRequest(text)
    }
}

fn decode_base64(data: &str) -> Result<Vec<u8>, ApiError> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| ApiError::BadRequest(format!("invalid base64: {}", e)))
}

async fn list_files(State(state): State<AppState>) -> Result<Json<FilesResponse>, ApiError> {
    let store = state.store.clone();
    let files = tokio::task::spawn_blocking(move || store.list())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(FilesResponse { files }))
}
