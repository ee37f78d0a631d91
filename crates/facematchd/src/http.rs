use crate::engine::{DatasetInfo, EngineError, EngineHandle, StatusReport};
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use facematch_core::types::ErrorKind;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

const ALLOWED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];
const MATCHED_URL_PREFIX: &str = "/static/matched";

/// Shared state behind every handler.
pub struct AppState {
    pub engine: EngineHandle,
    pub upload_dir: PathBuf,
    pub match_dir: PathBuf,
}

pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    let matched = ServeDir::new(&state.match_dir);
    Router::new()
        .route("/auto-train", post(auto_train))
        .route("/recognize", post(recognize))
        .route("/status", get(status))
        .route("/dataset-info", get(dataset_info))
        .nest_service(MATCHED_URL_PREFIX, matched)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `{"error": message}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn too_large() -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: "File too large".into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn from_multipart(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::too_large()
        } else {
            Self::bad_request(err.body_text())
        }
    }

    fn from_recognition(err: EngineError) -> Self {
        match err.kind() {
            Some(ErrorKind::ModelNotTrained) => Self::bad_request("Model not trained. Train first"),
            Some(ErrorKind::InvalidImage) => Self::bad_request("Could not read image"),
            _ => Self::internal(format!("Recognition error: {err}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct TrainResponse {
    message: String,
    status: &'static str,
}

async fn auto_train(State(state): State<Arc<AppState>>) -> (StatusCode, Json<TrainResponse>) {
    tracing::info!("training requested");
    match state.engine.train().await {
        Ok(report) => (
            StatusCode::OK,
            Json(TrainResponse {
                message: report.message(),
                status: "success",
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "training failed");
            (
                StatusCode::BAD_REQUEST,
                Json(TrainResponse {
                    message: e.to_string(),
                    status: "error",
                }),
            )
        }
    }
}

#[derive(Debug, Serialize)]
struct FaceResult {
    name: String,
    confidence: u8,
    matched: bool,
}

#[derive(Debug, Serialize)]
struct RecognizeResponse {
    results: Vec<FaceResult>,
    matched_image: String,
    total_faces: usize,
}

async fn recognize(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let Ok(mut multipart) = multipart else {
        return Err(ApiError::bad_request("No file uploaded"));
    };

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await.map_err(ApiError::from_multipart)? {
        if field.name() != Some("image") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(ApiError::from_multipart)?;
        upload = Some((filename, bytes.to_vec()));
        break;
    }

    let Some((filename, bytes)) = upload else {
        return Err(ApiError::bad_request("No file uploaded"));
    };
    if filename.is_empty() {
        return Err(ApiError::bad_request("No file selected"));
    }
    let filename = sanitize_filename(&filename);
    if !allowed_file(&filename) {
        return Err(ApiError::bad_request("Invalid file type"));
    }

    let loaded = state
        .engine
        .ensure_loaded()
        .await
        .map_err(|e| ApiError::internal(format!("Recognition error: {e}")))?;
    if !loaded {
        return Err(ApiError::bad_request("Model not trained. Train first"));
    }

    tokio::fs::create_dir_all(&state.upload_dir)
        .await
        .map_err(|e| ApiError::internal(format!("Recognition error: {e}")))?;
    tokio::fs::write(state.upload_dir.join(&filename), &bytes)
        .await
        .map_err(|e| ApiError::internal(format!("Recognition error: {e}")))?;

    let recognition = state
        .engine
        .recognize(bytes)
        .await
        .map_err(ApiError::from_recognition)?;

    let output_name = format!("matched_{filename}");
    let match_dir = state.match_dir.clone();
    let (recognition, _) = tokio::task::spawn_blocking({
        let output_name = output_name.clone();
        move || {
            let path = recognition.write_annotated(&match_dir, &output_name)?;
            Ok::<_, facematch_core::pipeline::PipelineError>((recognition, path))
        }
    })
    .await
    .map_err(|e| ApiError::internal(format!("Recognition error: {e}")))?
    .map_err(|e| ApiError::internal(format!("Recognition error: {e}")))?;

    tracing::info!(
        file = %filename,
        faces = recognition.total_faces,
        matched = recognition.results.iter().filter(|r| r.matched).count(),
        "recognition complete"
    );

    Ok(Json(RecognizeResponse {
        results: recognition
            .results
            .into_iter()
            .map(|r| FaceResult {
                name: r.predicted_name,
                confidence: r.confidence_percent,
                matched: r.matched,
            })
            .collect(),
        matched_image: format!("{MATCHED_URL_PREFIX}/{output_name}"),
        total_faces: recognition.total_faces,
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> Result<Json<StatusReport>, ApiError> {
    state
        .engine
        .status()
        .await
        .map(Json)
        .map_err(|e| ApiError::internal(e.to_string()))
}

async fn dataset_info(State(state): State<Arc<AppState>>) -> Result<Json<DatasetInfo>, ApiError> {
    state
        .engine
        .dataset_info()
        .await
        .map(Json)
        .map_err(|e| ApiError::internal(e.to_string()))
}

/// Reduce an uploaded filename to a safe single path component.
///
/// Keeps ASCII alphanumerics, `.`, `-` and `_`. Path separators and
/// whitespace become `_`, anything else is dropped, and leading dots are
/// stripped so the result can never name a parent or hidden file.
pub fn sanitize_filename(name: &str) -> String {
    let mapped: String = name
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            '/' | '\\' => Some('_'),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    mapped.trim_start_matches('.').to_string()
}

fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
