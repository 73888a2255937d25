//! Trait boundaries between the scheduler core and its pluggable
//! collaborators (§6 of the design)
//!
//! Everything the orchestration core needs from the outside world — which
//! endpoint to pick, how long a task will take, how to stage files, how to
//! talk to the execution service, how to peek inside an opaque payload — is
//! expressed as a trait here. `shared::predictors`/`shared::serializer` ship
//! default implementations; a deployment may inject its own.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::{ClientTaskId, EndpointId, FunctionId};
use crate::model::{ExceptionKind, PendingRecord, TransferHandle};

/// A remote file the executor must stage onto the chosen endpoint before a
/// task can run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    pub source_url: String,
    pub destination_path: String,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// Decoded payload of a successful task completion (§6.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub runtime: f64,
    #[serde(default)]
    pub imports: Vec<String>,
}

/// Decoded payload of a failed task completion (§6.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskException {
    pub kind: ExceptionKind,
    pub message: String,
}

/// What the [`Strategy`] port hands back from `choose_endpoint`. `eta` is
/// filled in by a separate `predict_eta` call (§4.1 step 3); it starts at
/// `0.0` here.
#[derive(Debug, Clone)]
pub struct EndpointChoice {
    pub endpoint: EndpointId,
    pub eta: f64,
}

impl EndpointChoice {
    pub fn new(endpoint: EndpointId) -> Self {
        Self { endpoint, eta: 0.0 }
    }
}

/// Chooses which endpoint a task should run on and predicts when it will
/// finish. Implementations receive the `cold_start`/`queue_delay` oracles
/// (§4.6) at construction time, not as method arguments — the scheduler
/// core only ever calls the two methods below.
pub trait Strategy: Send + Sync {
    /// Picks an endpoint for `func`, honoring `exclude` (blocked endpoints
    /// plus endpoints this virtual task has already been dispatched to).
    fn choose_endpoint(
        &self,
        func: &FunctionId,
        payload: &[u8],
        files: &[FileReference],
        exclude: &HashSet<EndpointId>,
        transfer_etas: &HashMap<EndpointId, HashMap<TransferHandle, f64>>,
    ) -> crate::Result<EndpointChoice>;

    /// Predicts an absolute finish time: `now + runtime + queue_delay +
    /// cold_start + transfer_time`, per §6.
    ///
    /// `cold_start`/`queue_delay` are the scheduler core's oracle values for
    /// `endpoint` (§4.6), computed fresh from its state for this call and
    /// passed in rather than captured as closures at construction time —
    /// the state they read lives behind an async lock, which a plain `Fn`
    /// cannot await into without risking blocking the executor.
    fn predict_eta(
        &self,
        func: &FunctionId,
        endpoint: &EndpointId,
        payload: &[u8],
        files: &[FileReference],
        cold_start: f64,
        queue_delay: f64,
    ) -> f64;
}

/// Learns per-(function, endpoint) runtime and reports whether it has seen
/// enough samples to be trusted for delayed-backup decisions (§4.4, §6).
pub trait RuntimePredictor: Send + Sync {
    fn update(&self, record: &PendingRecord, runtime_seconds: f64);
    fn has_learned(&self, func: &FunctionId, endpoint: &EndpointId) -> bool;
    /// Best current estimate of runtime in seconds; used by `Strategy` to
    /// build an absolute ETA. Implementations fall back to a conservative
    /// default before `has_learned` is true.
    fn predict(&self, func: &FunctionId, endpoint: &EndpointId) -> f64;
}

/// Predicts how long staging a set of files to an endpoint will take
/// (§4.1, §6).
pub trait TransferPredictor: Send + Sync {
    fn transfer_time(&self, files: &[FileReference], endpoint: &EndpointId) -> f64;
}

/// Predicts how long importing a package will take on a cold endpoint
/// (§4.6, §6).
pub trait ImportPredictor: Send + Sync {
    fn import_time(&self, package: &str, endpoint: &EndpointId) -> f64;
}

/// Stages files onto an endpoint ahead of dispatch (§4.1 step 4, §6).
/// Network-bound, hence async.
#[async_trait]
pub trait TransferCoordinator: Send + Sync {
    /// Begins staging `files` onto `endpoint` for `task_id`; returns `None`
    /// if there is nothing to stage.
    async fn transfer(
        &self,
        files: &[FileReference],
        endpoint: &EndpointId,
        task_id: &ClientTaskId,
    ) -> crate::Result<Option<TransferHandle>>;

    async fn is_complete(&self, handle: &TransferHandle) -> crate::Result<bool>;

    async fn get_transfer_time(&self, handle: &TransferHandle) -> crate::Result<f64>;
}

/// The only seam through which the scheduler ever looks inside an opaque
/// payload (§3.1, §6.1).
pub trait PayloadSerializer: Send + Sync {
    fn extract_files(&self, payload: &[u8]) -> crate::Result<Vec<FileReference>>;
    fn decode_result(&self, payload: &[u8]) -> crate::Result<TaskResult>;
    fn decode_exception(&self, payload: &[u8]) -> crate::Result<TaskException>;
}

/// Response to a batched submission (§6, Executor HTTP API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub task_uuids: Vec<String>,
}

/// A single element of the endpoint status list (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointStatusSample {
    pub timestamp: f64,
    pub active_managers: u32,
}

/// One item of a batched submission request (§4.2 step 4).
#[derive(Debug, Clone)]
pub struct SubmissionItem {
    pub function_id: FunctionId,
    pub endpoint: EndpointId,
    pub payload: Vec<u8>,
}

/// The scheduler's view of the downstream execution service (the wire
/// protocol of §6, "Executor HTTP API"). Same injection philosophy as the
/// other ports: the submission worker and endpoint watchdog depend on this
/// trait, never on `reqwest` directly, which is what makes their tick logic
/// unit-testable without a live executor.
#[async_trait]
pub trait ExecutorClient: Send + Sync {
    /// Submits a batch of tasks, using the headers of the batch's first
    /// item for the whole request (§4.2 step 4's single-tenant-batching
    /// caveat).
    async fn submit(
        &self,
        items: &[SubmissionItem],
        headers: &HashMap<String, String>,
    ) -> crate::Result<SubmitOutcome>;

    /// Fetches the status list for an endpoint; element 0 is most recent.
    async fn endpoint_status(
        &self,
        endpoint: &EndpointId,
    ) -> crate::Result<Vec<EndpointStatusSample>>;
}
