//! The scheduler's mutable state and the single coarse lock around it (§5)
//!
//! `SchedulerCore` bundles the endpoint registry, the task-id translation
//! registry, and the bounded execution log behind one `tokio::sync::Mutex`,
//! alongside `Arc`-shared handles to every injected port: one coarse lock
//! per logically-related bundle of mutable state, rather than field-level
//! locking.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use shared::ids::{ClientTaskId, EndpointId, FunctionId, RealTaskId};
use shared::model::{EndpointDescriptor, EndpointState, PendingRecord, TaskInfo, TaskStatus};
use shared::ports::{
    ExecutorClient, ImportPredictor, PayloadSerializer, RuntimePredictor, Strategy,
    TransferCoordinator, TransferPredictor,
};
use shared::Clock;
use tokio::sync::{mpsc, Mutex};

/// One row of the bounded execution log (§4.8), appended on every completed
/// dispatch.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionLogEntry {
    pub task_id: ClientTaskId,
    pub endpoint: EndpointId,
    pub function_id: FunctionId,
    pub eta: f64,
    pub time_sent: f64,
    /// Actual time of arrival (completion).
    pub ata: f64,
    pub transfer_time: f64,
}

pub use shared::model::ScheduledRecord;

/// All mutable scheduler state, guarded by one coarse mutex (§5).
#[derive(Default)]
pub struct SchedulerState {
    pub endpoints: HashMap<EndpointId, EndpointDescriptor>,
    pub endpoint_state: HashMap<EndpointId, EndpointState>,
    pub task_info: HashMap<ClientTaskId, TaskInfo>,
    pub pending: HashMap<RealTaskId, PendingRecord>,
    pub blocked: HashMap<FunctionId, HashSet<EndpointId>>,
    pub latest_status: HashMap<ClientTaskId, TaskStatus>,
    /// Every real id the executor has ever returned for a client task id.
    /// Kept separate from `task_info` and never removed by
    /// `Pipeline::record_completed`, so `translate_task_id` stays defined
    /// for the lifetime of the client task id (§3, "Task id translation";
    /// testable property 1).
    pub task_real_ids: HashMap<ClientTaskId, HashSet<RealTaskId>>,
    pub imports_required: HashMap<FunctionId, HashSet<String>>,
    pub execution_log: VecDeque<ExecutionLogEntry>,
}

impl SchedulerState {
    pub fn new(endpoints: HashMap<EndpointId, EndpointDescriptor>) -> Self {
        let endpoint_state = endpoints
            .keys()
            .map(|id| (id.clone(), EndpointState::default()))
            .collect();
        Self {
            endpoints,
            endpoint_state,
            ..Default::default()
        }
    }

    /// Appends to the bounded execution log (§4.8), evicting the oldest
    /// entry once `capacity` is reached.
    pub fn push_execution_log(&mut self, entry: ExecutionLogEntry, capacity: usize) {
        if self.execution_log.len() >= capacity {
            self.execution_log.pop_front();
        }
        self.execution_log.push_back(entry);
    }
}

/// The scheduler's shared, cloneable handle: the coarse-locked state plus
/// every injected port and tunable. Cheaply `Clone`d (all fields are `Arc`s
/// or plain copies) so every axum handler and background worker can hold
/// its own copy.
#[derive(Clone)]
pub struct SchedulerCore {
    pub state: Arc<Mutex<SchedulerState>>,
    pub strategy: Arc<dyn Strategy>,
    pub runtime_predictor: Arc<dyn RuntimePredictor>,
    pub transfer_predictor: Arc<dyn TransferPredictor>,
    pub import_predictor: Arc<dyn ImportPredictor>,
    pub transfer_coordinator: Arc<dyn TransferCoordinator>,
    pub payload_serializer: Arc<dyn PayloadSerializer>,
    pub executor_client: Arc<dyn ExecutorClient>,
    pub clock: Arc<dyn Clock>,
    pub scheduled_tx: mpsc::UnboundedSender<ScheduledRecord>,
    pub max_backups: u32,
    pub backup_delay_threshold: f64,
    pub heartbeat_threshold_seconds: f64,
    pub execution_log_capacity: usize,
}
