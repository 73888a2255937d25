//! The endpoint watchdog (§4.3) and backup dispatch evaluator (§4.4).
//!
//! Grounded on the same `TaskScheduler` tick-loop idiom as the submission
//! worker (`agent/src/scheduler.rs`): a dedicated tokio task on a fixed
//! `tokio::time::interval`, selected against a shutdown broadcast.

use std::time::Duration;

use shared::ids::{ClientTaskId, EndpointId, FunctionId};
use shared::model::Temperature;
use tokio::sync::broadcast;

use crate::state::SchedulerCore;

pub struct EndpointWatchdog {
    core: SchedulerCore,
    interval: Duration,
}

impl EndpointWatchdog {
    pub fn new(core: SchedulerCore, interval: Duration) -> Self {
        Self { core, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("endpoint watchdog received shutdown signal");
                    break;
                }
            }
        }
    }

    /// §4.3: scans every endpoint's status, then invokes the backup
    /// evaluator.
    async fn tick_once(&self) {
        let endpoint_ids: Vec<EndpointId> = {
            let state = self.core.state.lock().await;
            state.endpoints.keys().cloned().collect()
        };

        for endpoint in &endpoint_ids {
            self.poll_endpoint(endpoint).await;
        }

        self.evaluate_backups().await;
    }

    async fn poll_endpoint(&self, endpoint: &EndpointId) {
        let samples = match self.core.executor_client.endpoint_status(endpoint).await {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!(endpoint = %endpoint, error = %e, "failed to poll endpoint status");
                return;
            }
        };
        let Some(latest) = samples.first() else {
            return;
        };

        let now = self.core.clock.now();
        let mut state = self.core.state.lock().await;
        let endpoint_state = state.endpoint_state.entry(endpoint.clone()).or_default();

        let age = now - latest.timestamp.max(endpoint_state.last_result_time);

        if !endpoint_state.is_dead && age > self.core.heartbeat_threshold_seconds {
            tracing::warn!(endpoint = %endpoint, age, "endpoint missed heartbeat threshold, marking dead");
            endpoint_state.is_dead = true;
        } else if endpoint_state.is_dead && age <= self.core.heartbeat_threshold_seconds {
            tracing::info!(endpoint = %endpoint, "endpoint heartbeat recovered, marking alive");
            endpoint_state.is_dead = false;
        }

        if latest.active_managers == 0 && endpoint_state.temperature == Temperature::Warm {
            endpoint_state.temperature = Temperature::Cold;
        } else if latest.active_managers > 0 && endpoint_state.temperature != Temperature::Warm {
            endpoint_state.temperature = Temperature::Warm;
        }
    }

    /// §4.4: finds every virtual task eligible for a backup dispatch and
    /// re-invokes `schedule_task` for each, honoring `max_backups`.
    async fn evaluate_backups(&self) {
        let now = self.core.clock.now();
        let candidates = {
            let state = self.core.state.lock().await;
            let mut found: Vec<(ClientTaskId, FunctionId, Vec<u8>, std::collections::HashMap<String, String>, Vec<shared::ports::FileReference>)> =
                Vec::new();
            // A virtual task can have more than one pending real id (an
            // earlier backup still running); it's eligible if *any* of them
            // is dead/delayed (§4.4), but must be queued for at most one
            // backup dispatch per tick regardless of how many qualify.
            let mut eligible_task_ids = std::collections::HashSet::new();
            for record in state.pending.values() {
                if eligible_task_ids.contains(&record.task_id) {
                    continue;
                }
                let dead = state
                    .endpoint_state
                    .get(&record.endpoint)
                    .map(|es| es.is_dead)
                    .unwrap_or(false);
                let delayed = record.is_eta_reliable && {
                    let expected = record.eta - record.time_sent;
                    let elapsed = now - record.time_sent;
                    expected > 0.0 && (elapsed / expected) > self.core.backup_delay_threshold
                };
                if dead || delayed {
                    eligible_task_ids.insert(record.task_id);
                }
            }

            for task_id in eligible_task_ids {
                let Some(task_info) = state.task_info.get(&task_id) else {
                    continue;
                };
                if task_info.endpoints_sent_to.len() > self.core.max_backups as usize {
                    continue;
                }
                found.push((
                    task_id,
                    task_info.function_id.clone(),
                    task_info.payload.clone(),
                    task_info.headers.clone(),
                    task_info.files.clone(),
                ));
            }

            found
        };

        for (task_id, func, payload, headers, files) in candidates {
            match self
                .core
                .schedule_task(func.clone(), payload, headers, files, Some(task_id))
                .await
            {
                Ok((_, endpoint)) => {
                    tracing::info!(task_id = %task_id, function_id = %func, endpoint = %endpoint, "dispatched backup");
                }
                Err(e) => {
                    tracing::warn!(task_id = %task_id, function_id = %func, error = %e, "backup dispatch failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor_client::FakeExecutorClient;
    use shared::clock::FakeClock;
    use shared::model::{EndpointDescriptor, PendingRecord, TaskInfo};
    use shared::ports::EndpointStatusSample;
    use shared::predictors::{
        build_runtime_predictor, build_strategy, ConstantImportPredictor, ConstantTransferPredictor,
    };
    use shared::serializer::JsonPayloadSerializer;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct NoopTransferCoordinator;

    #[async_trait::async_trait]
    impl shared::ports::TransferCoordinator for NoopTransferCoordinator {
        async fn transfer(
            &self,
            _files: &[shared::ports::FileReference],
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

    fn test_core(
        endpoints: Vec<&str>,
        max_backups: u32,
        backup_delay_threshold: f64,
        now: f64,
        executor: Arc<FakeExecutorClient>,
    ) -> SchedulerCore {
        let endpoint_ids: Vec<EndpointId> = endpoints.iter().map(|e| EndpointId::new(*e)).collect();
        let clock: Arc<dyn shared::Clock> = Arc::new(FakeClock::new(now));
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

        SchedulerCore {
            state: Arc::new(tokio::sync::Mutex::new(crate::state::SchedulerState::new(endpoint_map))),
            strategy,
            runtime_predictor,
            transfer_predictor,
            import_predictor: Arc::new(ConstantImportPredictor::new(0.0)),
            transfer_coordinator: Arc::new(NoopTransferCoordinator),
            payload_serializer: Arc::new(JsonPayloadSerializer),
            executor_client: executor,
            clock,
            scheduled_tx: tx,
            max_backups,
            backup_delay_threshold,
            heartbeat_threshold_seconds: 75.0,
            execution_log_capacity: 10_000,
        }
    }

    #[tokio::test]
    async fn test_poll_endpoint_marks_dead_after_heartbeat_threshold() {
        let executor = Arc::new(FakeExecutorClient::default());
        executor
            .set_status(
                EndpointId::new("a"),
                vec![EndpointStatusSample { timestamp: 900.0, active_managers: 1 }],
            )
            .await;
        let core = test_core(vec!["a"], 0, 2.0, 1_000.0, executor);
        let watchdog = EndpointWatchdog::new(core.clone(), Duration::from_secs(5));
        watchdog.poll_endpoint(&EndpointId::new("a")).await;

        let state = core.state.lock().await;
        assert!(state.endpoint_state[&EndpointId::new("a")].is_dead);
    }

    #[tokio::test]
    async fn test_poll_endpoint_marks_cold_when_no_active_managers() {
        let executor = Arc::new(FakeExecutorClient::default());
        executor
            .set_status(
                EndpointId::new("a"),
                vec![EndpointStatusSample { timestamp: 1_000.0, active_managers: 0 }],
            )
            .await;
        let core = test_core(vec!["a"], 0, 2.0, 1_000.0, executor);
        let watchdog = EndpointWatchdog::new(core.clone(), Duration::from_secs(5));
        watchdog.poll_endpoint(&EndpointId::new("a")).await;

        let state = core.state.lock().await;
        assert_eq!(
            state.endpoint_state[&EndpointId::new("a")].temperature,
            Temperature::Cold
        );
    }

    #[tokio::test]
    async fn test_evaluate_backups_dispatches_for_dead_endpoint() {
        let core = test_core(vec!["a", "b"], 1, 2.0, 1_000.0, Arc::new(FakeExecutorClient::default()));
        let task_id = ClientTaskId::new();
        let func = FunctionId::new("f");
        let endpoint_a = EndpointId::new("a");

        {
            let mut state = core.state.lock().await;
            let mut info = TaskInfo::new(func.clone(), vec![], HashMap::new(), vec![], 900.0);
            info.endpoints_sent_to.push(endpoint_a.clone());
            state.task_info.insert(task_id, info);
            state.pending.insert(
                shared::ids::RealTaskId::new("r1"),
                PendingRecord {
                    task_id,
                    function_id: func.clone(),
                    endpoint: endpoint_a.clone(),
                    payload: vec![],
                    eta: 950.0,
                    time_sent: 900.0,
                    transfer_time: 0.0,
                    is_eta_reliable: false,
                },
            );
            state.endpoint_state.entry(endpoint_a.clone()).or_default().is_dead = true;
        }

        let watchdog = EndpointWatchdog::new(core.clone(), Duration::from_secs(5));
        watchdog.evaluate_backups().await;

        let state = core.state.lock().await;
        let info = state.task_info.get(&task_id).unwrap();
        assert_eq!(info.endpoints_sent_to.len(), 2);
        assert_eq!(info.endpoints_sent_to[1], EndpointId::new("b"));
    }

    #[tokio::test]
    async fn test_evaluate_backups_skips_unreliable_delayed_task() {
        let core = test_core(vec!["a", "b"], 1, 2.0, 1_021.0, Arc::new(FakeExecutorClient::default()));
        let task_id = ClientTaskId::new();
        let func = FunctionId::new("f");
        let endpoint_a = EndpointId::new("a");

        {
            let mut state = core.state.lock().await;
            let mut info = TaskInfo::new(func.clone(), vec![], HashMap::new(), vec![], 1_000.0);
            info.endpoints_sent_to.push(endpoint_a.clone());
            state.task_info.insert(task_id, info);
            state.pending.insert(
                shared::ids::RealTaskId::new("r1"),
                PendingRecord {
                    task_id,
                    function_id: func.clone(),
                    endpoint: endpoint_a.clone(),
                    payload: vec![],
                    eta: 1_010.0,
                    time_sent: 1_000.0,
                    transfer_time: 0.0,
                    is_eta_reliable: false,
                },
            );
        }

        let watchdog = EndpointWatchdog::new(core.clone(), Duration::from_secs(5));
        watchdog.evaluate_backups().await;

        let state = core.state.lock().await;
        let info = state.task_info.get(&task_id).unwrap();
        assert_eq!(info.endpoints_sent_to.len(), 1);
    }

    /// A task with two pending real ids (seed + one earlier backup) where
    /// only the second is dead must still queue exactly one further backup
    /// dispatch, not zero (missed) and not two (one per eligible real id).
    #[tokio::test]
    async fn test_evaluate_backups_dedupes_task_with_multiple_pending_real_ids() {
        let core = test_core(
            vec!["a", "b", "c"],
            2,
            2.0,
            1_000.0,
            Arc::new(FakeExecutorClient::default()),
        );
        let task_id = ClientTaskId::new();
        let func = FunctionId::new("f");
        let endpoint_a = EndpointId::new("a");
        let endpoint_b = EndpointId::new("b");

        {
            let mut state = core.state.lock().await;
            let mut info = TaskInfo::new(func.clone(), vec![], HashMap::new(), vec![], 900.0);
            info.endpoints_sent_to.push(endpoint_a.clone());
            info.endpoints_sent_to.push(endpoint_b.clone());
            state.task_info.insert(task_id, info);
            state.pending.insert(
                shared::ids::RealTaskId::new("r1"),
                PendingRecord {
                    task_id,
                    function_id: func.clone(),
                    endpoint: endpoint_a.clone(),
                    payload: vec![],
                    eta: 950.0,
                    time_sent: 900.0,
                    transfer_time: 0.0,
                    is_eta_reliable: false,
                },
            );
            state.pending.insert(
                shared::ids::RealTaskId::new("r2"),
                PendingRecord {
                    task_id,
                    function_id: func.clone(),
                    endpoint: endpoint_b.clone(),
                    payload: vec![],
                    eta: 950.0,
                    time_sent: 900.0,
                    transfer_time: 0.0,
                    is_eta_reliable: false,
                },
            );
            // Only the second dispatch's endpoint is dead; the first is fine.
            state.endpoint_state.entry(endpoint_b.clone()).or_default().is_dead = true;
        }

        let watchdog = EndpointWatchdog::new(core.clone(), Duration::from_secs(5));
        watchdog.evaluate_backups().await;

        let state = core.state.lock().await;
        let info = state.task_info.get(&task_id).unwrap();
        // Exactly one more dispatch (to "c"), not two.
        assert_eq!(info.endpoints_sent_to.len(), 3);
        assert_eq!(info.endpoints_sent_to[2], EndpointId::new("c"));
    }
}
