use axum::{
    Json,
    extract::{FromRequestParts, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, request::Parts},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use super::AppState;
use super::error::{ApiError, ApiResult};
use crate::auth::{Identity, parse_bearer};
use crate::client::PRIORITY_HEADER;
use crate::error::QueueError;
use crate::queue::{EnqueuedJob, JobResult, JobSnapshot, LeasedJob};

const DEFAULT_FETCH_LIMIT: usize = 10;

/// The identity behind the request's bearer credential.
///
/// Extraction fails with 401 before any handler body or job store work runs.
pub struct Caller(pub Identity);

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let credential = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer)
            .map(str::to_string);

        let broker = state.broker.clone();
        let identity = blocking(move || broker.authenticate(credential.as_deref())).await?;
        Ok(Caller(identity))
    }
}

#[derive(Debug, Deserialize)]
pub struct PollRequest {
    #[serde(default)]
    pub ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub jobs: Vec<JobSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    #[serde(default = "default_fetch_limit")]
    pub limit: usize,
}

fn default_fetch_limit() -> usize {
    DEFAULT_FETCH_LIMIT
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub status: &'static str,
    pub updated: usize,
}

/// Run broker work on the blocking pool.
async fn blocking<T, F>(op: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, QueueError> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| ApiError::Internal(format!("Task join error: {}", e)))?
        .map_err(ApiError::from)
}

/// Job priority for an enqueue request.
///
/// The `X-Priority` header wins. Without it, a top-level integer `priority`
/// in the body is read but left in place; the stored payload is always the
/// body exactly as sent.
fn request_priority(headers: &HeaderMap, payload: &Value) -> ApiResult<i64> {
    if let Some(raw) = headers.get(PRIORITY_HEADER) {
        return raw
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or_else(|| ApiError::BadRequest(format!("{PRIORITY_HEADER} must be an integer")));
    }
    Ok(payload
        .get("priority")
        .and_then(Value::as_i64)
        .unwrap_or(0))
}

/// Health check endpoint
#[instrument]
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "healthy")
}

/// Accept a chat completion request as a queued job.
#[instrument(skip_all, fields(caller = %identity.name))]
pub async fn enqueue(
    State(state): State<AppState>,
    Caller(identity): Caller,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<EnqueuedJob>)> {
    let Json(payload) = body?;
    let priority = request_priority(&headers, &payload)?;

    let broker = state.broker.clone();
    let job = blocking(move || broker.enqueue(&identity, payload, priority)).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

#[instrument(skip_all, fields(caller = %identity.name))]
pub async fn poll_results(
    State(state): State<AppState>,
    Caller(identity): Caller,
    body: Result<Json<PollRequest>, JsonRejection>,
) -> ApiResult<Json<PollResponse>> {
    let Json(req) = body?;

    let broker = state.broker.clone();
    let jobs = blocking(move || broker.query(&identity, req.ids.as_deref())).await?;
    Ok(Json(PollResponse { jobs }))
}

#[instrument(skip_all, fields(caller = %identity.name))]
pub async fn fetch_jobs(
    State(state): State<AppState>,
    Caller(identity): Caller,
    body: Result<Json<FetchRequest>, JsonRejection>,
) -> ApiResult<Json<Vec<LeasedJob>>> {
    let Json(req) = body?;

    let broker = state.broker.clone();
    let jobs = blocking(move || broker.lease(&identity, req.limit)).await?;
    Ok(Json(jobs))
}

#[instrument(skip_all, fields(caller = %identity.name))]
pub async fn submit_results(
    State(state): State<AppState>,
    Caller(identity): Caller,
    body: Result<Json<Vec<JobResult>>, JsonRejection>,
) -> ApiResult<Json<SubmitResponse>> {
    let Json(results) = body?;

    let broker = state.broker.clone();
    let updated = blocking(move || broker.submit_results(&identity, results)).await?;
    Ok(Json(SubmitResponse {
        status: "ok",
        updated,
    }))
}
