use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::generation::{GenerationRequest, GenerationService};
use crate::jobs::{JobSnapshot, JobStatus};
use crate::store::VideoRecord;
use crate::templates::Template;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    service: Arc<GenerationService>,
}

impl AppState {
    pub fn new(service: Arc<GenerationService>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { service }),
        }
    }

    pub fn service(&self) -> &Arc<GenerationService> {
        &self.inner.service
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct GenerateResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Caller identity, as forwarded by the authenticating gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| UserId(value.to_string()))
            .ok_or_else(|| AppError::Unauthorized("missing user identity".to_string()))
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/templates", get(list_templates))
        .route("/api/videos", get(list_videos))
        .route("/api/videos/generate", post(generate_video))
        .route("/api/videos/status/{job_id}", get(get_status))
        .route("/api/videos/status/{job_id}/cancel", post(cancel_generation))
        .route("/api/{*path}", any(api_route_not_found))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn api_route_not_found(Path(path): Path<String>) -> AppError {
    AppError::NotFound(format!("api endpoint not found: /api/{path}"))
}

async fn list_templates(State(state): State<AppState>) -> Json<Vec<Template>> {
    Json(state.service().get_available_templates().to_vec())
}

async fn generate_video(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<GenerateResponse>), AppError> {
    let Json(mut request) =
        payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    request.template_id = request.template_id.trim().to_string();
    validate_generation_request(&state, &request)?;

    let job_id = state
        .service()
        .start_video_generation(request, &user_id)
        .await
        .map_err(|err| {
            error!(user_id = %user_id, error = %err, "Failed to start video generation");
            AppError::from(err)
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateResponse {
            job_id,
            status: JobStatus::Processing,
        }),
    ))
}

fn validate_generation_request(
    state: &AppState,
    request: &GenerationRequest,
) -> Result<(), AppError> {
    let template_id = request.template_id.trim();
    if template_id.is_empty() {
        return Err(AppError::BadRequest("template_id is required".to_string()));
    }
    if state.service().templates().find(template_id).is_none() {
        return Err(AppError::BadRequest(format!(
            "unknown template: {template_id}"
        )));
    }

    let product = &request.product;
    if product.name.trim().is_empty() {
        return Err(AppError::BadRequest("product name is required".to_string()));
    }
    if !product.price.is_finite() || product.price <= 0.0 {
        return Err(AppError::BadRequest(
            "product price must be a positive number".to_string(),
        ));
    }
    if product.images.iter().all(|image| image.trim().is_empty()) {
        return Err(AppError::BadRequest(
            "at least one product image is required".to_string(),
        ));
    }

    Ok(())
}

async fn get_status(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, AppError> {
    state
        .service()
        .get_generation_status(&job_id, &user_id)
        .await?
        .map(Json)
        .ok_or_else(|| job_not_found(&job_id))
}

async fn cancel_generation(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, AppError> {
    state
        .service()
        .cancel_generation(&job_id, &user_id)
        .await?
        .map(Json)
        .ok_or_else(|| job_not_found(&job_id))
}

async fn list_videos(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Vec<VideoRecord>>, AppError> {
    Ok(Json(state.service().list_videos(&user_id).await?))
}

fn job_not_found(job_id: &str) -> AppError {
    AppError::NotFound(format!("job not found: {job_id}"))
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{err:#}"))
    }
}
