// HTTP server with the detection and recognition API routes

use crate::metrics::{metrics_handler, track_metrics, ExceptionType, Metrics};
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, FromRef, Multipart, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use barscan_eye::processing::{CocoBox, RecognitionPipeline, RecognizedBarcode};
use barscan_eye::{Recognizer, Segmenter, VisionError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

/// Name of the multipart field carrying the uploaded image
pub const IMAGE_FIELD: &str = "image";

// API state
#[derive(Clone)]
pub struct ApiState {
    pub segmenter: Arc<Segmenter>,
    pub recognizer: Arc<Recognizer>,
    pub pipeline: Arc<RecognitionPipeline>,
    pub metrics: Metrics,
}

impl ApiState {
    pub fn new(segmenter: Arc<Segmenter>, recognizer: Arc<Recognizer>, metrics: Metrics) -> Self {
        let pipeline = Arc::new(RecognitionPipeline::new(segmenter.clone(), recognizer.clone()));
        Self {
            segmenter,
            recognizer,
            pipeline,
            metrics,
        }
    }
}

impl FromRef<ApiState> for Metrics {
    fn from_ref(state: &ApiState) -> Self {
        state.metrics.clone()
    }
}

// Response types
#[derive(Debug, Serialize, Deserialize)]
pub struct MaskResponse {
    /// Base64 of the `H x W` mask as little-endian f32, row-major
    pub base64_encoded_mask: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BarcodesResponse {
    pub barcodes: Vec<CocoBox>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecognizedBarcodesResponse {
    pub barcodes: Vec<RecognizedBarcode>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Request failures mapped onto HTTP responses
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Multipart field `image` is missing")]
    MissingImage,

    #[error("Invalid multipart body: {0}")]
    InvalidMultipart(String),

    #[error("Request payload too large")]
    PayloadTooLarge,

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error(transparent)]
    Vision(#[from] VisionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::MissingImage => (StatusCode::UNPROCESSABLE_ENTITY, "MISSING_IMAGE"),
            ApiError::InvalidMultipart(_) => (StatusCode::BAD_REQUEST, "INVALID_MULTIPART"),
            ApiError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
            ApiError::InvalidImage(_) | ApiError::Vision(VisionError::Decode(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_IMAGE")
            }
            ApiError::Vision(VisionError::Processing(_)) | ApiError::Vision(VisionError::Shape(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "PROCESSING_ERROR")
            }
            ApiError::Vision(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INFERENCE_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

/// User-facing message per error code; details stay in the logs
fn sanitize_error_message(error_code: &str) -> &'static str {
    match error_code {
        "MISSING_IMAGE" => "Multipart field `image` is required",
        "INVALID_MULTIPART" => "Request body is not valid multipart/form-data",
        "PAYLOAD_TOO_LARGE" => "Request payload too large",
        "INVALID_IMAGE" => "Uploaded file is not a supported image",
        "PROCESSING_ERROR" => "Image could not be processed",
        "INFERENCE_ERROR" => "Model inference failed",
        _ => "An error occurred",
    }
}

fn error_response(status: StatusCode, code: &'static str) -> Response {
    let body = Json(ErrorResponse {
        error: sanitize_error_message(code).to_string(),
        code: code.to_string(),
    });
    let mut response = (status, body).into_response();
    response.extensions_mut().insert(ExceptionType(code.to_string()));
    response
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!("{} ({}): {}", status, code, self);
        } else {
            warn!("{} ({}): {}", status, code, self);
        }
        error_response(status, code)
    }
}

/// Converts a panic inside a handler into a 500 response
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Handler panicked: {}", detail);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
}

/// Create HTTP router with all API routes
pub fn create_router(state: ApiState, max_upload_bytes: usize) -> Router {
    let health_routes = Router::new().route("/health_checker", get(health_handler));

    let detector_routes = Router::new()
        .route("/predict_mask", post(predict_mask_handler))
        .route("/predict_barcodes", post(predict_barcodes_handler));

    let recognizer_routes = Router::new()
        .route("/recognize_barcode", post(recognize_barcode_handler))
        .route("/recognize_image", post(recognize_image_handler));

    Router::new()
        .nest("/health", health_routes)
        .nest("/detector", detector_routes)
        .nest("/recognizer", recognizer_routes)
        // Metrics (Prometheus format)
        .route("/metrics", get(metrics_handler))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn_with_state(state.metrics.clone(), track_metrics))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_handler() -> StatusCode {
    StatusCode::OK
}

/// Segmentation logits mapped back onto the uploaded image
async fn predict_mask_handler(
    State(state): State<ApiState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<MaskResponse>, ApiError> {
    let bytes = read_image_field(multipart).await?;
    let segmenter = state.segmenter.clone();

    let mask = run_blocking(move || {
        let image = decode_image(&bytes)?;
        Ok(segmenter.predict_mask(&image)?)
    })
    .await?;

    let raw: Vec<u8> = mask.iter().flat_map(|v| v.to_le_bytes()).collect();
    Ok(Json(MaskResponse {
        base64_encoded_mask: STANDARD.encode(raw),
    }))
}

/// Bounding boxes of every barcode in the uploaded image
async fn predict_barcodes_handler(
    State(state): State<ApiState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<BarcodesResponse>, ApiError> {
    let bytes = read_image_field(multipart).await?;
    let segmenter = state.segmenter.clone();

    let barcodes = run_blocking(move || {
        let image = decode_image(&bytes)?;
        Ok(segmenter.predict(&image)?)
    })
    .await?;

    Ok(Json(BarcodesResponse { barcodes }))
}

/// Value of a single, already cropped barcode
async fn recognize_barcode_handler(
    State(state): State<ApiState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<String>, ApiError> {
    let bytes = read_image_field(multipart).await?;
    let recognizer = state.recognizer.clone();

    let value = run_blocking(move || {
        let image = decode_image(&bytes)?;
        Ok(recognizer.predict(&image)?)
    })
    .await?;

    Ok(Json(value))
}

/// Detect and read every barcode in the uploaded image
async fn recognize_image_handler(
    State(state): State<ApiState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<RecognizedBarcodesResponse>, ApiError> {
    let bytes = read_image_field(multipart).await?;
    let pipeline = state.pipeline.clone();

    let barcodes = run_blocking(move || {
        let image = decode_image(&bytes)?;
        Ok(pipeline.recognize_image(&image)?)
    })
    .await?;

    Ok(Json(RecognizedBarcodesResponse { barcodes }))
}

/// Pull the bytes of the `image` field out of a multipart body
async fn read_image_field(multipart: Result<Multipart, MultipartRejection>) -> Result<Bytes, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::InvalidMultipart(e.body_text()))?;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some(IMAGE_FIELD) {
            let data = field.bytes().await.map_err(multipart_error)?;
            debug!("Received image upload of {} bytes", data.len());
            return Ok(data);
        }
    }

    Err(ApiError::MissingImage)
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::InvalidMultipart(e.body_text())
    }
}

fn decode_image(bytes: &[u8]) -> Result<RgbImage, ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::InvalidImage("empty upload".to_string()));
    }
    let image = image::load_from_memory(bytes).map_err(|e| ApiError::InvalidImage(e.to_string()))?;
    Ok(image.to_rgb8())
}

/// Run CPU-bound work on the blocking pool
async fn run_blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("Inference task failed: {}", e)))?
}
