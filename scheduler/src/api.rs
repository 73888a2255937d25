//! REST API implementation for the task scheduler (§6.2)
//!
//! This module provides the HTTP endpoints clients use to submit tasks and
//! poll their status, the administrative endpoints (`block`,
//! `register_imports`), the status-callback ingress the executor calls
//! (§4.5), and a diagnostic dump of the bounded execution log (§4.8).
// This module uses the `axum` web framework to build the API. Each public
// function corresponds to an API endpoint and is responsible for handling
// incoming requests, invoking the scheduler core, and returning an
// appropriate response.

use std::str::FromStr;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use shared::api::{
    endpoints, headers, BlockErrorResponse, BlockRequest, BlockResponse, ExecutionLogEntryResponse,
    ExecutionLogResponse, RegisterImportsRequest, StatusCallbackRequest, SubmitTasksRequest,
    SubmitTasksResponse, TaskStatusResponse, TranslateTaskIdResponse,
};
use shared::ids::{ClientTaskId, EndpointId, FunctionId, RealTaskId};
use shared::utils::decode_base64;
use shared::SchedulerError;

use crate::pipeline::{StatusReport, SubmitItem};
use crate::state::SchedulerCore;

/// Application state shared across all API handlers: the scheduler core
/// plus the pre-shared API key every route but `/health` is gated on.
#[derive(Clone)]
pub struct AppState {
    pub core: SchedulerCore,
    pub api_key: String,
    pub http_request_max_size_mb: usize,
}

/// Creates the main API router and defines all the application's routes.
/// Called once at server startup to build the routing tree.
pub fn create_router(state: AppState) -> Router {
    let max_request_size = state.http_request_max_size_mb * 1024 * 1024;

    Router::new()
        // A simple, unauthenticated health check endpoint. This is useful for
        // load balancers, container orchestrators (like Kubernetes), or
        // monitoring systems to verify that the server process is running.
        .route(endpoints::HEALTH, get(health_check))
        .route(endpoints::TASKS, post(submit_tasks))
        .route(endpoints::TASK_STATUS, get(get_task_status))
        .route(endpoints::TASK_REAL_IDS, get(get_task_real_ids))
        .route(endpoints::BLOCK, post(block_endpoint))
        .route(endpoints::IMPORTS, post(register_imports))
        .route(endpoints::STATUS_CALLBACK, post(status_callback))
        .route(endpoints::EXECUTION_LOG, get(get_execution_log))
        .layer(DefaultBodyLimit::max(max_request_size))
        .with_state(state)
}

/// Validates the `X-API-Key` header in constant time, to prevent timing
/// attacks that could let an attacker deduce the key character-by-character.
fn validate_api_key(header_map: &HeaderMap, expected_key: &str) -> Result<(), ApiError> {
    use subtle::ConstantTimeEq;

    let provided_key = header_map
        .get(headers::API_KEY)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    if provided_key.is_empty() {
        return Err(ApiError::Unauthorized);
    }

    let provided_bytes = provided_key.as_bytes();
    let expected_bytes = expected_key.as_bytes();
    let keys_match =
        provided_bytes.len() == expected_bytes.len() && bool::from(provided_bytes.ct_eq(expected_bytes));

    if !keys_match {
        return Err(ApiError::Unauthorized);
    }

    Ok(())
}

fn parse_client_task_id(raw: &str) -> Result<ClientTaskId, ApiError> {
    ClientTaskId::from_str(raw).map_err(|e| ApiError::BadRequest(format!("invalid task id: {e}")))
}

/// The handler for the `/health` endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "scheduler",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// `POST /api/v1/tasks` → `batch_submit` (§4.1, §6.2).
async fn submit_tasks(
    State(state): State<AppState>,
    request_headers: HeaderMap,
    Json(request): Json<SubmitTasksRequest>,
) -> Result<Json<SubmitTasksResponse>, ApiError> {
    validate_api_key(&request_headers, &state.api_key)?;

    let mut items = Vec::with_capacity(request.tasks.len());
    for task in request.tasks {
        let payload = decode_base64(&task.payload_base64)
            .map_err(|e| ApiError::BadRequest(format!("invalid payload_base64: {e}")))?;
        items.push(SubmitItem {
            function_id: FunctionId::new(task.function_id),
            payload,
        });
    }

    let submitted = items.len();
    let (task_ids, chosen_endpoints) = state.core.batch_submit(items, request.headers).await?;

    tracing::info!(submitted, "batch submitted");

    Ok(Json(SubmitTasksResponse {
        task_ids: task_ids.iter().map(ToString::to_string).collect(),
        endpoints: chosen_endpoints.iter().map(|e| e.as_str().to_string()).collect(),
    }))
}

/// `GET /api/v1/tasks/{task_id}/status` → `get_status` (§6).
async fn get_task_status(
    State(state): State<AppState>,
    request_headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    validate_api_key(&request_headers, &state.api_key)?;
    let task_id = parse_client_task_id(&task_id)?;

    let status = state
        .core
        .get_status(&task_id)
        .await
        .ok_or_else(|| ApiError::Core(SchedulerError::UnknownClientTask(task_id.to_string()).into()))?;

    Ok(Json(status.into()))
}

/// `GET /api/v1/tasks/{task_id}/real-ids` → `translate_task_id` (§6).
async fn get_task_real_ids(
    State(state): State<AppState>,
    request_headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Json<TranslateTaskIdResponse>, ApiError> {
    validate_api_key(&request_headers, &state.api_key)?;
    let task_id = parse_client_task_id(&task_id)?;

    let real_ids = state
        .core
        .translate_task_id(&task_id)
        .await
        .ok_or_else(|| ApiError::Core(SchedulerError::UnknownClientTask(task_id.to_string()).into()))?;

    Ok(Json(TranslateTaskIdResponse {
        real_ids: real_ids.iter().map(|id| id.as_str().to_string()).collect(),
    }))
}

/// `POST /api/v1/block` → `block(func, endpoint)` (§4.7). Errors (unknown
/// endpoint, or blocking would leave the function with zero viable
/// endpoints) come back as a `{status: Failed, reason}` body, per §7.
async fn block_endpoint(
    State(state): State<AppState>,
    request_headers: HeaderMap,
    Json(request): Json<BlockRequest>,
) -> Result<Json<BlockResponse>, (StatusCode, Json<BlockErrorResponse>)> {
    validate_api_key(&request_headers, &state.api_key).map_err(|_| {
        (
            StatusCode::UNAUTHORIZED,
            Json(BlockErrorResponse {
                status: "Failed".to_string(),
                reason: "Unauthorized".to_string(),
            }),
        )
    })?;

    let func = FunctionId::new(request.function_id);
    let endpoint = EndpointId::new(request.endpoint_id);

    match state.core.block(&func, &endpoint).await {
        Ok(()) => Ok(Json(BlockResponse {
            status: "success".to_string(),
        })),
        Err(e) => Err((
            StatusCode::BAD_REQUEST,
            Json(BlockErrorResponse {
                status: "Failed".to_string(),
                reason: e.to_string(),
            }),
        )),
    }
}

/// `POST /api/v1/imports` → `register_imports(func, imports)` (§4.7).
async fn register_imports(
    State(state): State<AppState>,
    request_headers: HeaderMap,
    Json(request): Json<RegisterImportsRequest>,
) -> Result<StatusCode, ApiError> {
    validate_api_key(&request_headers, &state.api_key)?;

    let func = FunctionId::new(request.function_id);
    state.core.register_imports(&func, request.imports).await;
    Ok(StatusCode::ACCEPTED)
}

/// `POST /api/v1/callbacks/status/{real_task_id}` → `log_status` (§4.5),
/// invoked by (or polled from) the executor.
async fn status_callback(
    State(state): State<AppState>,
    request_headers: HeaderMap,
    Path(real_task_id): Path<String>,
    Json(request): Json<StatusCallbackRequest>,
) -> Result<StatusCode, ApiError> {
    validate_api_key(&request_headers, &state.api_key)?;

    let real_id = RealTaskId::new(real_task_id);
    let report = match request {
        StatusCallbackRequest::Pending => StatusReport::Pending,
        StatusCallbackRequest::Result { payload_base64 } => {
            let payload = decode_base64(&payload_base64)
                .map_err(|e| ApiError::BadRequest(format!("invalid payload_base64: {e}")))?;
            StatusReport::Result(payload)
        }
        StatusCallbackRequest::Exception { payload_base64 } => {
            let payload = decode_base64(&payload_base64)
                .map_err(|e| ApiError::BadRequest(format!("invalid payload_base64: {e}")))?;
            StatusReport::Exception(payload)
        }
    };

    state.core.log_status(&real_id, report).await;
    Ok(StatusCode::ACCEPTED)
}

/// `GET /api/v1/execution-log` — a bounded diagnostic dump (§4.8). Read-only
/// and never consulted by scheduling decisions.
async fn get_execution_log(
    State(state): State<AppState>,
    request_headers: HeaderMap,
) -> Result<Json<ExecutionLogResponse>, ApiError> {
    validate_api_key(&request_headers, &state.api_key)?;

    let state_guard = state.core.state.lock().await;
    let entries = state_guard
        .execution_log
        .iter()
        .map(|entry| ExecutionLogEntryResponse {
            task_id: entry.task_id.to_string(),
            endpoint: entry.endpoint.as_str().to_string(),
            function_id: entry.function_id.as_str().to_string(),
            eta: entry.eta,
            time_sent: entry.time_sent,
            ata: entry.ata,
            transfer_time: entry.transfer_time,
        })
        .collect();

    Ok(Json(ExecutionLogResponse { entries }))
}

/// Error type the API handlers return; maps onto an HTTP response via
/// [`IntoResponse`] (§7.1).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Core(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Core(err) => status_for_core_error(err),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

/// Maps a [`SchedulerError`] onto an HTTP status code (§7.1): unknown task
/// ids are a client-visible 404, endpoint/blocking misuse a 400, executor
/// connectivity problems a 502, anything else a 500.
fn status_for_core_error(err: &anyhow::Error) -> (StatusCode, String) {
    match err.downcast_ref::<SchedulerError>() {
        Some(scheduler_err @ SchedulerError::UnknownClientTask(_)) => {
            (StatusCode::NOT_FOUND, scheduler_err.to_string())
        }
        Some(scheduler_err @ (SchedulerError::AllEndpointsBlocked(_) | SchedulerError::UnknownEndpoint(_))) => {
            (StatusCode::BAD_REQUEST, scheduler_err.to_string())
        }
        Some(scheduler_err @ (SchedulerError::Serializer(_) | SchedulerError::Validation(_))) => {
            (StatusCode::BAD_REQUEST, scheduler_err.to_string())
        }
        Some(scheduler_err @ (SchedulerError::ExecutorUnavailable(_) | SchedulerError::ExecutorProtocol(_))) => {
            (StatusCode::BAD_GATEWAY, scheduler_err.to_string())
        }
        Some(scheduler_err) => (StatusCode::INTERNAL_SERVER_ERROR, scheduler_err.to_string()),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use shared::clock::FakeClock;
    use shared::model::EndpointDescriptor;
    use shared::predictors::{
        build_runtime_predictor, build_strategy, ConstantImportPredictor, ConstantTransferPredictor,
        NoopTransferCoordinator,
    };
    use shared::serializer::JsonPayloadSerializer;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_app_state() -> AppState {
        let endpoint_ids = vec![EndpointId::new("a")];
        let clock: Arc<dyn shared::Clock> = Arc::new(FakeClock::new(1_000.0));
        let runtime_predictor = build_runtime_predictor("rolling-average", 20, 5.0);
        let transfer_predictor = Arc::new(ConstantTransferPredictor::new(0.0));
        let strategy = build_strategy(
            "round-robin",
            endpoint_ids.clone(),
            clock.clone(),
            runtime_predictor.clone(),
            transfer_predictor.clone(),
        );
        let mut endpoint_map = HashMap::new();
        for id in &endpoint_ids {
            endpoint_map.insert(id.clone(), EndpointDescriptor::new(id.clone()));
        }
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let core = SchedulerCore {
            state: Arc::new(tokio::sync::Mutex::new(crate::state::SchedulerState::new(endpoint_map))),
            strategy,
            runtime_predictor,
            transfer_predictor,
            import_predictor: Arc::new(ConstantImportPredictor::new(0.0)),
            transfer_coordinator: Arc::new(NoopTransferCoordinator),
            payload_serializer: Arc::new(JsonPayloadSerializer),
            executor_client: Arc::new(crate::executor_client::FakeExecutorClient::default()),
            clock,
            scheduled_tx: tx,
            max_backups: 0,
            backup_delay_threshold: 2.0,
            heartbeat_threshold_seconds: 75.0,
            execution_log_capacity: 10_000,
        };

        AppState {
            core,
            api_key: "test-key".to_string(),
            http_request_max_size_mb: 10,
        }
    }

    #[tokio::test]
    async fn test_health_check_requires_no_api_key() {
        let app = create_router(test_app_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_submit_tasks_rejects_missing_api_key() {
        let app = create_router(test_app_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"tasks": []}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_submit_tasks_succeeds_with_valid_api_key() {
        let app = create_router(test_app_state());
        let body = serde_json::json!({
            "tasks": [{"function_id": "f", "payload_base64": ""}]
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/tasks")
                    .header("content-type", "application/json")
                    .header(headers::API_KEY, "test-key")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_task_status_unknown_task_returns_404() {
        let app = create_router(test_app_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!(
                        "/api/v1/tasks/{}/status",
                        shared::ids::ClientTaskId::new()
                    ))
                    .header(headers::API_KEY, "test-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_block_last_endpoint_returns_failed_body() {
        let app = create_router(test_app_state());
        let body = serde_json::json!({"function_id": "f", "endpoint_id": "a"});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/block")
                    .header("content-type", "application/json")
                    .header(headers::API_KEY, "test-key")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
