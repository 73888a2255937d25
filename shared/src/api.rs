//! Wire types for the scheduler's client-facing REST API (§6.2)
//!
//! These are the JSON request/response bodies `scheduler::api` deserializes
//! and serializes; they carry opaque payloads as base64 (the scheduler core
//! itself never looks inside a payload except through
//! [`crate::ports::PayloadSerializer`]).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Header name the client-facing API checks on every route but `/health`.
pub mod headers {
    pub const API_KEY: &str = "X-API-Key";
}

/// Path constants for the client-facing and status-callback routes (§6.2).
/// Kept alongside the wire types so route registration and client code
/// can't drift.
pub mod endpoints {
    pub const HEALTH: &str = "/health";
    pub const TASKS: &str = "/api/v1/tasks";
    pub const TASK_STATUS: &str = "/api/v1/tasks/{task_id}/status";
    pub const TASK_REAL_IDS: &str = "/api/v1/tasks/{task_id}/real-ids";
    pub const BLOCK: &str = "/api/v1/block";
    pub const IMPORTS: &str = "/api/v1/imports";
    pub const STATUS_CALLBACK: &str = "/api/v1/callbacks/status/{real_task_id}";
    pub const EXECUTION_LOG: &str = "/api/v1/execution-log";
}

/// One item of a `POST /api/v1/tasks` request body: a function to run plus
/// its opaque, base64-encoded payload (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskItem {
    pub function_id: String,
    pub payload_base64: String,
}

/// Request body for `POST /api/v1/tasks` → `batch_submit` (§6.2). `headers`
/// are the client's own auth headers for the downstream executor, opaque to
/// the scheduler beyond round-tripping them into the `/submit` request
/// (§3's "Task info", `headers` field).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitTasksRequest {
    pub tasks: Vec<SubmitTaskItem>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Response body for `POST /api/v1/tasks`: client task ids aligned by order
/// with the chosen endpoint for each (§4.1's `batch_submit` return value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTasksResponse {
    pub task_ids: Vec<String>,
    pub endpoints: Vec<String>,
}

/// Response body for `GET /api/v1/tasks/{task_id}/status` → `get_status`
/// (§6). Mirrors [`crate::model::TaskStatus`]'s tagged shape directly so a
/// client sees the same `status` discriminant the executor uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatusResponse {
    Pending,
    Result(crate::ports::TaskResult),
    Exception(crate::ports::TaskException),
}

impl From<crate::model::TaskStatus> for TaskStatusResponse {
    fn from(status: crate::model::TaskStatus) -> Self {
        match status {
            crate::model::TaskStatus::Pending => TaskStatusResponse::Pending,
            crate::model::TaskStatus::Result(r) => TaskStatusResponse::Result(r),
            crate::model::TaskStatus::Exception(e) => TaskStatusResponse::Exception(e),
        }
    }
}

/// Response body for `GET /api/v1/tasks/{task_id}/real-ids` →
/// `translate_task_id` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateTaskIdResponse {
    pub real_ids: Vec<String>,
}

/// Request body for `POST /api/v1/block` → `block(func, endpoint)` (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRequest {
    pub function_id: String,
    pub endpoint_id: String,
}

/// Response body for a successful `POST /api/v1/block`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockResponse {
    pub status: String,
}

/// Response body for a failed `POST /api/v1/block` (§7's "Blocking-last-
/// endpoint attempt" / "Unknown endpoint" error cases).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockErrorResponse {
    pub status: String,
    pub reason: String,
}

/// Request body for `POST /api/v1/imports` → `register_imports(func,
/// imports)` (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterImportsRequest {
    pub function_id: String,
    pub imports: Vec<String>,
}

/// Request body for `POST /api/v1/callbacks/status/{real_task_id}` →
/// `log_status` (§4.5). `payload_base64` is absent for `pending` and
/// present (opaque) for `result`/`exception`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusCallbackRequest {
    Pending,
    Result { payload_base64: String },
    Exception { payload_base64: String },
}

/// One row of `GET /api/v1/execution-log`'s bounded diagnostic dump (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntryResponse {
    pub task_id: String,
    pub endpoint: String,
    pub function_id: String,
    pub eta: f64,
    pub time_sent: f64,
    pub ata: f64,
    pub transfer_time: f64,
}

/// Response body for `GET /api/v1/execution-log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogResponse {
    pub entries: Vec<ExecutionLogEntryResponse>,
}
