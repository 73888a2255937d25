//! The scheduler's core data model (§3 of the design)
//!
//! Every quantity described as an "instant" below is an absolute Unix
//! timestamp in seconds (`f64`), read through the injected [`crate::Clock`]
//! so tests can control it. A value of `0.0` means "no outstanding work" for
//! the per-endpoint timing fields.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{ClientTaskId, EndpointId, FunctionId, RealTaskId};
use crate::ports::{TaskException, TaskResult};

/// Opaque handle to an in-flight file transfer, minted by the injected
/// [`crate::ports::TransferCoordinator`]. The scheduler never interprets
/// its contents; it is only ever round-tripped back to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferHandle(pub String);

impl fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Endpoint warmth, as tracked by the endpoint watchdog (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temperature {
    Cold,
    Warming,
    Warm,
}

impl Default for Temperature {
    fn default() -> Self {
        Temperature::Warm
    }
}

/// Immutable facts about an endpoint, fixed at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub id: EndpointId,
    /// Seconds to go from a cold process to ready-to-run; `None` means the
    /// endpoint never needs a cold-launch allowance.
    pub launch_time: Option<f64>,
    /// Opaque configuration forwarded to the strategy/predictors; never
    /// interpreted by the scheduler core itself.
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl EndpointDescriptor {
    pub fn new(id: impl Into<EndpointId>) -> Self {
        Self {
            id: id.into(),
            launch_time: None,
            config: HashMap::new(),
        }
    }
}

/// Mutable runtime state tracked per endpoint (§3, "Endpoint runtime state").
#[derive(Debug, Clone)]
pub struct EndpointState {
    pub temperature: Temperature,
    pub is_dead: bool,
    pub last_result_time: f64,
    pub last_task_eta: f64,
    /// Signed bias of our ETA predictions on this endpoint; updated on each
    /// completed task (§4.5's `_record_completed`).
    pub queue_error: f64,
    pub transfer_etas: HashMap<TransferHandle, f64>,
    pub imports_present: HashSet<String>,
    pub pending_real_ids: HashSet<RealTaskId>,
}

impl Default for EndpointState {
    fn default() -> Self {
        Self {
            temperature: Temperature::Warm,
            is_dead: false,
            last_result_time: 0.0,
            last_task_eta: 0.0,
            queue_error: 0.0,
            transfer_etas: HashMap::new(),
            imports_present: HashSet::new(),
            pending_real_ids: HashSet::new(),
        }
    }
}

impl EndpointState {
    /// Invariant I5: an endpoint with nothing pending carries no queueing
    /// debt.
    pub fn has_no_outstanding_work(&self) -> bool {
        self.pending_real_ids.is_empty()
    }
}

/// Per-client-task-id bookkeeping, alive from the first `schedule_task`
/// call until the task fully completes (§3, "Task info").
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub function_id: FunctionId,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub files: Vec<crate::ports::FileReference>,
    pub time_requested: f64,
    /// Every endpoint this virtual task has been dispatched to, in order
    /// (seed dispatch first, backups after). Append-only (I4).
    pub endpoints_sent_to: Vec<EndpointId>,
}

impl TaskInfo {
    pub fn new(
        function_id: FunctionId,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
        files: Vec<crate::ports::FileReference>,
        time_requested: f64,
    ) -> Self {
        Self {
            function_id,
            payload,
            headers,
            files,
            time_requested,
            endpoints_sent_to: Vec::new(),
        }
    }
}

/// One dispatch attempt, from the moment the strategy picks an endpoint
/// until a real id is assigned (or the attempt is discarded). Lives in the
/// submission worker's staging map (§4.1, §4.2).
#[derive(Debug, Clone)]
pub struct ScheduledRecord {
    pub task_id: ClientTaskId,
    pub endpoint: EndpointId,
    pub transfer_handle: Option<TransferHandle>,
    pub function_id: FunctionId,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub files: Vec<crate::ports::FileReference>,
}

/// A task that has been submitted to the executor and is awaiting a
/// terminal status, keyed by real task id (§3, "Pending record").
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub task_id: ClientTaskId,
    pub function_id: FunctionId,
    pub endpoint: EndpointId,
    pub payload: Vec<u8>,
    /// Absolute predicted finish time.
    pub eta: f64,
    pub time_sent: f64,
    pub transfer_time: f64,
    /// Whether `eta` came from a predictor that `has_learned` for this
    /// (function, endpoint) pair; gates delayed-backup eligibility (§4.4).
    pub is_eta_reliable: bool,
}

/// Classifies the underlying cause of a reported task exception (§6.1).
/// `ModuleMissing` and `OutOfMemory` are the "blocking" kinds that cause the
/// (function, endpoint) pair to be blocked automatically (§4.5, §4.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    ModuleMissing,
    OutOfMemory,
    Other(String),
}

impl ExceptionKind {
    /// Whether this exception kind should cause its (function, endpoint)
    /// pair to be blocked for future scheduling.
    pub fn is_blocking(&self) -> bool {
        matches!(self, ExceptionKind::ModuleMissing | ExceptionKind::OutOfMemory)
    }
}

/// The most recently observed status for a client task id, following the
/// sticky rule of §3 ("the most recent non-PENDING status wins and is
/// sticky").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Result(TaskResult),
    Exception(TaskException),
}

impl TaskStatus {
    /// Non-PENDING statuses are terminal and, once observed, must never be
    /// overwritten by a later PENDING observation (§8, property 6).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}
