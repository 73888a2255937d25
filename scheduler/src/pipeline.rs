//! The scheduling pipeline (§4.1): `batch_submit`/`schedule_task`, plus the
//! client-facing read operations `get_status`/`translate_task_id` and the
//! administrative operations `block`/`register_imports` (§4.7).

use std::collections::{HashMap, HashSet};

use shared::ids::{ClientTaskId, EndpointId, FunctionId, RealTaskId};
use shared::model::{ScheduledRecord, TaskInfo, TaskStatus};
use shared::ports::FileReference;
use shared::SchedulerError;

use crate::state::{ExecutionLogEntry, SchedulerCore, SchedulerState};

/// What a status callback/poll reported for a real task id (§4.5). The HTTP
/// layer decodes the wire JSON into this before calling `log_status`; the
/// opaque `result`/`exception` payload bytes are decoded further here via
/// the injected `PayloadSerializer`, never by the HTTP layer itself (§6.1).
pub enum StatusReport {
    Pending,
    Result(Vec<u8>),
    Exception(Vec<u8>),
}

/// One item of a `batch_submit` call: a function to run plus its opaque
/// payload (§4.1).
pub struct SubmitItem {
    pub function_id: FunctionId,
    pub payload: Vec<u8>,
}

impl SchedulerCore {
    /// `batch_submit(tasks, headers) -> (client_ids, endpoints)` (§4.1).
    pub async fn batch_submit(
        &self,
        tasks: Vec<SubmitItem>,
        headers: HashMap<String, String>,
    ) -> shared::Result<(Vec<ClientTaskId>, Vec<EndpointId>)> {
        let mut client_ids = Vec::with_capacity(tasks.len());
        let mut endpoints = Vec::with_capacity(tasks.len());
        for item in tasks {
            let files = self.payload_serializer.extract_files(&item.payload)?;
            let (task_id, endpoint) = self
                .schedule_task(item.function_id, item.payload, headers.clone(), files, None)
                .await?;
            client_ids.push(task_id);
            endpoints.push(endpoint);
        }
        Ok((client_ids, endpoints))
    }

    /// `schedule_task(func, payload, headers, files, task_id?)` (§4.1).
    ///
    /// When `task_id` is `Some`, this is a backup dispatch (§4.4): the
    /// virtual task already exists and must not be re-initialized.
    pub async fn schedule_task(
        &self,
        func: FunctionId,
        payload: Vec<u8>,
        headers: HashMap<String, String>,
        files: Vec<FileReference>,
        task_id: Option<ClientTaskId>,
    ) -> shared::Result<(ClientTaskId, EndpointId)> {
        let now = self.clock.now();

        let (task_id, exclude, imports_required) = {
            let mut state = self.state.lock().await;
            let task_id = match task_id {
                Some(id) => id,
                None => {
                    let id = ClientTaskId::new();
                    state.task_info.insert(
                        id,
                        TaskInfo::new(func.clone(), payload.clone(), headers.clone(), files.clone(), now),
                    );
                    state.latest_status.insert(id, TaskStatus::Pending);
                    state.task_real_ids.insert(id, HashSet::new());
                    id
                }
            };

            let blocked = state.blocked.get(&func).cloned().unwrap_or_default();
            let sent_to: HashSet<EndpointId> = state
                .task_info
                .get(&task_id)
                .map(|info| info.endpoints_sent_to.iter().cloned().collect())
                .unwrap_or_default();
            let exclude: HashSet<EndpointId> = blocked.union(&sent_to).cloned().collect();

            let imports_required = state.imports_required.get(&func).cloned().unwrap_or_default();

            (task_id, exclude, imports_required)
        };

        // Oracle snapshot: computed once, outside the strategy call, from a
        // point-in-time read of endpoint state. This keeps `Strategy` free
        // of lock re-entrancy concerns (§5's ordering discipline).
        let transfer_etas = self.snapshot_transfer_etas().await;
        let mut choice = self.strategy.choose_endpoint(&func, &payload, &files, &exclude, &transfer_etas)?;
        let cold_start = self.snapshot_cold_start(&choice.endpoint, &func, &imports_required).await;
        let queue_delay = self.snapshot_queue_delay(&choice.endpoint).await;
        choice.eta = self
            .strategy
            .predict_eta(&func, &choice.endpoint, &payload, &files, cold_start, queue_delay);

        let transfer_handle = if files.is_empty() {
            None
        } else {
            self.transfer_coordinator
                .transfer(&files, &choice.endpoint, &task_id)
                .await?
        };

        {
            let mut state = self.state.lock().await;
            if let Some(handle) = &transfer_handle {
                let transfer_time = self.transfer_predictor.transfer_time(&files, &choice.endpoint);
                state
                    .endpoint_state
                    .entry(choice.endpoint.clone())
                    .or_default()
                    .transfer_etas
                    .insert(handle.clone(), now + transfer_time);
            } else if files.is_empty() {
                // Immediately ready: eagerly reflect this decision in the
                // endpoint's queueing delay for subsequent choices (§4.1
                // step 4).
                state
                    .endpoint_state
                    .entry(choice.endpoint.clone())
                    .or_default()
                    .last_task_eta = choice.eta;
            }

            let endpoint_state = state.endpoint_state.entry(choice.endpoint.clone()).or_default();
            if endpoint_state.temperature == shared::model::Temperature::Cold {
                endpoint_state.temperature = shared::model::Temperature::Warming;
            }

            if let Some(info) = state.task_info.get_mut(&task_id) {
                info.endpoints_sent_to.push(choice.endpoint.clone());
            }
        }

        let record = ScheduledRecord {
            task_id,
            endpoint: choice.endpoint.clone(),
            transfer_handle,
            function_id: func,
            payload,
            headers,
            files,
        };
        self.scheduled_tx
            .send(record)
            .map_err(|_| anyhow::anyhow!("submission worker channel closed"))?;

        Ok((task_id, choice.endpoint))
    }

    pub(crate) async fn snapshot_transfer_etas(
        &self,
    ) -> HashMap<EndpointId, HashMap<shared::model::TransferHandle, f64>> {
        let state = self.state.lock().await;
        state
            .endpoint_state
            .iter()
            .map(|(id, st)| (id.clone(), st.transfer_etas.clone()))
            .collect()
    }

    /// `cold_start(endpoint, func)` (§4.6). `pub(crate)` so the submission
    /// worker can recompute it after a transfer completes, without files
    /// (§4.2 step 6).
    pub(crate) async fn snapshot_cold_start(
        &self,
        endpoint: &EndpointId,
        func: &FunctionId,
        imports_required: &HashSet<String>,
    ) -> f64 {
        let state = self.state.lock().await;
        let Some(endpoint_state) = state.endpoint_state.get(endpoint) else {
            return 0.0;
        };
        if endpoint_state.temperature != shared::model::Temperature::Cold {
            return 0.0;
        }
        let launch_time = state
            .endpoints
            .get(endpoint)
            .and_then(|d| d.launch_time)
            .unwrap_or(0.0);
        let missing: f64 = imports_required
            .difference(&endpoint_state.imports_present)
            .map(|pkg| self.import_predictor.import_time(pkg, endpoint))
            .sum();
        let _ = func;
        launch_time + missing
    }

    /// `queue_delay(endpoint)` (§4.6).
    pub(crate) async fn snapshot_queue_delay(&self, endpoint: &EndpointId) -> f64 {
        let now = self.clock.now();
        let state = self.state.lock().await;
        match state.endpoint_state.get(endpoint) {
            Some(st) => (st.last_task_eta + st.queue_error).max(now),
            None => now,
        }
    }

    /// Packages a function needs, for `cold_start`'s missing-import sum.
    pub(crate) async fn imports_required_for(&self, func: &FunctionId) -> HashSet<String> {
        let state = self.state.lock().await;
        state.imports_required.get(func).cloned().unwrap_or_default()
    }

    /// `get_status(task_id)` (§6). Returns `Pending` when the task has no
    /// assigned real id yet or no status has arrived; otherwise the latest
    /// sticky non-PENDING status (§3).
    pub async fn get_status(&self, task_id: &ClientTaskId) -> Option<TaskStatus> {
        let state = self.state.lock().await;
        state.latest_status.get(task_id).cloned()
    }

    /// `translate_task_id(task_id)` (§6): every real id assigned so far.
    /// Reads from `task_real_ids`, which is never removed by
    /// `record_completed`, so this stays defined for the task id's whole
    /// lifetime (§8, testable property 1).
    pub async fn translate_task_id(
        &self,
        task_id: &ClientTaskId,
    ) -> Option<HashSet<shared::ids::RealTaskId>> {
        let state = self.state.lock().await;
        state.task_real_ids.get(task_id).cloned()
    }

    /// `block(func, endpoint)` (§4.7): fails if the endpoint is unknown or
    /// blocking it would leave `func` with zero viable endpoints (I3).
    pub async fn block(&self, func: &FunctionId, endpoint: &EndpointId) -> shared::Result<()> {
        let mut state = self.state.lock().await;
        if !state.endpoints.contains_key(endpoint) {
            return Err(SchedulerError::UnknownEndpoint(endpoint.to_string()).into());
        }
        let already_blocked = state.blocked.entry(func.clone()).or_default();
        if already_blocked.contains(endpoint) {
            return Ok(());
        }
        if already_blocked.len() + 1 >= state.endpoints.len() {
            return Err(SchedulerError::AllEndpointsBlocked(func.to_string()).into());
        }
        already_blocked.insert(endpoint.clone());
        Ok(())
    }

    /// `register_imports(func, imports)` (§4.7): records packages a
    /// function needs, used only by `cold_start`.
    pub async fn register_imports(&self, func: &FunctionId, imports: Vec<String>) {
        let mut state = self.state.lock().await;
        state
            .imports_required
            .entry(func.clone())
            .or_default()
            .extend(imports);
    }

    /// `log_status(real_task_id, data)` (§4.5), the status-callback ingress.
    /// Tolerates a real id it has never heard of (a race with completion)
    /// by dropping with a warning, per §7's error-handling posture.
    pub async fn log_status(&self, real_task_id: &RealTaskId, report: StatusReport) {
        let endpoint = {
            let state = self.state.lock().await;
            match state.pending.get(real_task_id) {
                Some(record) => record.endpoint.clone(),
                None => {
                    tracing::warn!(real_task_id = %real_task_id, "status for unknown real task id, dropping");
                    return;
                }
            }
        };

        match report {
            StatusReport::Pending => {}
            StatusReport::Result(payload) => {
                let result = match self.payload_serializer.decode_result(&payload) {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!(real_task_id = %real_task_id, error = %e, "failed to decode task result");
                        return;
                    }
                };

                let record = {
                    let mut state = self.state.lock().await;
                    let task_id = state.pending.get(real_task_id).map(|r| r.task_id);
                    if let Some(task_id) = task_id {
                        Self::set_status_if_not_terminal(
                            &mut state,
                            task_id,
                            TaskStatus::Result(result.clone()),
                        );
                    }
                    let endpoint_state = state.endpoint_state.entry(endpoint.clone()).or_default();
                    endpoint_state.imports_present = result.imports.iter().cloned().collect();
                    endpoint_state.last_result_time = self.clock.now();
                    state.pending.get(real_task_id).cloned()
                };

                if let Some(record) = record {
                    self.runtime_predictor.update(&record, result.runtime);
                }

                self.record_completed(real_task_id).await;
            }
            StatusReport::Exception(payload) => {
                let exception = match self.payload_serializer.decode_exception(&payload) {
                    Ok(exception) => exception,
                    Err(e) => {
                        tracing::error!(real_task_id = %real_task_id, error = %e, "failed to decode task exception");
                        return;
                    }
                };

                let func = {
                    let mut state = self.state.lock().await;
                    let task_id = state.pending.get(real_task_id).map(|r| r.task_id);
                    if let Some(task_id) = task_id {
                        Self::set_status_if_not_terminal(
                            &mut state,
                            task_id,
                            TaskStatus::Exception(exception.clone()),
                        );
                    }
                    state.endpoint_state.entry(endpoint.clone()).or_default().last_result_time =
                        self.clock.now();
                    state.pending.get(real_task_id).map(|r| r.function_id.clone())
                };

                if exception.kind.is_blocking() {
                    if let Some(func) = func {
                        if let Err(e) = self.block(&func, &endpoint).await {
                            tracing::warn!(
                                function_id = %func,
                                endpoint = %endpoint,
                                error = %e,
                                "failed to block endpoint after blocking exception"
                            );
                        }
                    }
                }

                self.record_completed(real_task_id).await;
            }
        }
    }

    /// Sticky-status write: overwrite unless the current status is already
    /// terminal (§3, §9's "write-if-absent or write-if-current-is-PENDING").
    fn set_status_if_not_terminal(state: &mut SchedulerState, task_id: ClientTaskId, status: TaskStatus) {
        let should_write = match state.latest_status.get(&task_id) {
            Some(existing) => !existing.is_terminal(),
            None => true,
        };
        if should_write {
            state.latest_status.insert(task_id, status);
        }
    }

    /// `_record_completed(real_task_id)` (§4.5): removes bookkeeping for a
    /// real id that just reached a terminal status and appends an
    /// `execution_log` entry (§4.8).
    async fn record_completed(&self, real_task_id: &RealTaskId) {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(record) = state.pending.remove(real_task_id) else {
            return;
        };

        if let Some(endpoint_state) = state.endpoint_state.get_mut(&record.endpoint) {
            endpoint_state.pending_real_ids.remove(real_task_id);
            if endpoint_state.pending_real_ids.is_empty() {
                // I5: no outstanding work means no queueing debt.
                endpoint_state.last_task_eta = 0.0;
                endpoint_state.queue_error = 0.0;
            } else {
                endpoint_state.queue_error = now - record.eta;
            }
        }

        let capacity = self.execution_log_capacity;
        state.push_execution_log(
            ExecutionLogEntry {
                task_id: record.task_id,
                endpoint: record.endpoint,
                function_id: record.function_id,
                eta: record.eta,
                time_sent: record.time_sent,
                ata: now,
                transfer_time: record.transfer_time,
            },
            capacity,
        );

        // Removing task_info makes later status messages for sibling
        // backups of this virtual task harmless (§9): they won't fire
        // further backups once the first real id completes.
        state.task_info.remove(&record.task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor_client::FakeExecutorClient;
    use shared::clock::FakeClock;
    use shared::predictors::{
        build_runtime_predictor, ConstantImportPredictor, ConstantTransferPredictor,
    };
    use shared::serializer::JsonPayloadSerializer;
    use std::sync::Arc;

    struct NoopTransferCoordinator;

    #[async_trait::async_trait]
    impl shared::ports::TransferCoordinator for NoopTransferCoordinator {
        async fn transfer(
            &self,
            _files: &[FileReference],
            _endpoint: &EndpointId,
            _task_id: &ClientTaskId,
        ) -> shared::Result<Option<shared::model::TransferHandle>> {
            Ok(None)
        }

        async fn is_complete(&self, _handle: &shared::model::TransferHandle) -> shared::Result<bool> {
            Ok(true)
        }

        async fn get_transfer_time(&self, _handle: &shared::model::TransferHandle) -> shared::Result<f64> {
            Ok(0.0)
        }
    }

    fn test_core(endpoints: Vec<&str>) -> SchedulerCore {
        let endpoint_ids: Vec<EndpointId> = endpoints.iter().map(|e| EndpointId::new(*e)).collect();
        let clock: Arc<dyn shared::Clock> = Arc::new(FakeClock::new(1_000.0));
        let runtime_predictor = build_runtime_predictor("rolling-average", 20, 5.0);
        let transfer_predictor = Arc::new(ConstantTransferPredictor::new(0.0));
        let import_predictor = Arc::new(ConstantImportPredictor::new(0.0));
        let strategy = shared::predictors::build_strategy(
            "round-robin",
            endpoint_ids.clone(),
            clock.clone(),
            runtime_predictor.clone(),
            transfer_predictor.clone(),
        );

        let mut endpoint_map = HashMap::new();
        for id in &endpoint_ids {
            endpoint_map.insert(id.clone(), shared::model::EndpointDescriptor::new(id.clone()));
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        // Drain the channel in the background so `send` never blocks the test.
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        SchedulerCore {
            state: Arc::new(tokio::sync::Mutex::new(crate::state::SchedulerState::new(endpoint_map))),
            strategy,
            runtime_predictor,
            transfer_predictor,
            import_predictor,
            transfer_coordinator: Arc::new(NoopTransferCoordinator),
            payload_serializer: Arc::new(JsonPayloadSerializer),
            executor_client: Arc::new(FakeExecutorClient::default()),
            clock,
            scheduled_tx: tx,
            max_backups: 0,
            backup_delay_threshold: 2.0,
            heartbeat_threshold_seconds: 75.0,
            execution_log_capacity: 10_000,
        }
    }

    #[tokio::test]
    async fn test_schedule_task_mints_fresh_id_and_records_dispatch() {
        let core = test_core(vec!["a", "b"]);
        let (task_id, endpoint) = core
            .schedule_task(FunctionId::new("f"), vec![], HashMap::new(), vec![], None)
            .await
            .unwrap();

        let state = core.state.lock().await;
        let info = state.task_info.get(&task_id).unwrap();
        assert_eq!(info.endpoints_sent_to, vec![endpoint]);
    }

    #[tokio::test]
    async fn test_backup_dispatch_excludes_prior_endpoints() {
        let core = test_core(vec!["a", "b"]);
        let (task_id, first_endpoint) = core
            .schedule_task(FunctionId::new("f"), vec![], HashMap::new(), vec![], None)
            .await
            .unwrap();

        let (_, second_endpoint) = core
            .schedule_task(
                FunctionId::new("f"),
                vec![],
                HashMap::new(),
                vec![],
                Some(task_id),
            )
            .await
            .unwrap();

        assert_ne!(first_endpoint, second_endpoint);
    }

    #[tokio::test]
    async fn test_block_refuses_last_endpoint() {
        let core = test_core(vec!["a"]);
        let result = core.block(&FunctionId::new("f"), &EndpointId::new("a")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_block_unknown_endpoint_fails() {
        let core = test_core(vec!["a", "b"]);
        let result = core.block(&FunctionId::new("f"), &EndpointId::new("z")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_get_status_starts_pending() {
        let core = test_core(vec!["a"]);
        let (task_id, _) = core
            .schedule_task(FunctionId::new("f"), vec![], HashMap::new(), vec![], None)
            .await
            .unwrap();
        let status = core.get_status(&task_id).await.unwrap();
        assert!(matches!(status, TaskStatus::Pending));
    }

    #[tokio::test]
    async fn test_translate_task_id_starts_empty() {
        let core = test_core(vec!["a"]);
        let (task_id, _) = core
            .schedule_task(FunctionId::new("f"), vec![], HashMap::new(), vec![], None)
            .await
            .unwrap();
        let ids = core.translate_task_id(&task_id).await.unwrap();
        assert!(ids.is_empty());
    }

    /// S3: once one of a virtual task's real ids completes,
    /// `translate_task_id` must still report every real id ever assigned —
    /// `record_completed` only drops `task_info`, never `task_real_ids`.
    #[tokio::test]
    async fn test_translate_task_id_survives_completion_of_a_sibling_real_id() {
        let core = test_core(vec!["a", "b"]);
        let (task_id, first_endpoint) = core
            .schedule_task(FunctionId::new("f"), vec![], HashMap::new(), vec![], None)
            .await
            .unwrap();
        let (_, second_endpoint) = core
            .schedule_task(
                FunctionId::new("f"),
                vec![],
                HashMap::new(),
                vec![],
                Some(task_id),
            )
            .await
            .unwrap();

        let real_a = RealTaskId::new("real-a");
        let real_b = RealTaskId::new("real-b");
        {
            let mut state = core.state.lock().await;
            for (real_id, endpoint) in [(&real_a, &first_endpoint), (&real_b, &second_endpoint)] {
                state.pending.insert(
                    real_id.clone(),
                    shared::model::PendingRecord {
                        task_id,
                        function_id: FunctionId::new("f"),
                        endpoint: endpoint.clone(),
                        payload: vec![],
                        eta: 1_000.0,
                        time_sent: 1_000.0,
                        transfer_time: 0.0,
                        is_eta_reliable: false,
                    },
                );
                state
                    .task_real_ids
                    .entry(task_id)
                    .or_default()
                    .insert(real_id.clone());
            }
        }

        core.log_status(&real_a, StatusReport::Result(br#"{"runtime": 1.0}"#.to_vec()))
            .await;

        // task_info is gone (sibling backups can no longer fire)...
        assert!(core.state.lock().await.task_info.get(&task_id).is_none());
        // ...but both real ids are still reachable through translation.
        let ids = core.translate_task_id(&task_id).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&real_a));
        assert!(ids.contains(&real_b));
    }
}
