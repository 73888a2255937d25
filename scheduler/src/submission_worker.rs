//! The submission worker (§4.2): drains the scheduled-tasks queue, gates
//! each dispatch on transfer completion, and batches ready tasks into a
//! single `/submit` POST per tick.
//!
//! A `tokio::time::interval`-driven loop selected against a `broadcast`
//! shutdown signal, logging and continuing on transient failure rather
//! than propagating it.

use std::collections::HashMap;
use std::time::Duration;

use shared::ids::RealTaskId;
use shared::model::{ScheduledRecord, Temperature};
use shared::ports::SubmissionItem;
use tokio::sync::{broadcast, mpsc};

use crate::state::SchedulerCore;

/// One scheduled dispatch still staged locally, plus the transfer time
/// observed once its transfer (if any) completes.
struct Staged {
    record: ScheduledRecord,
    transfer_time: f64,
}

pub struct SubmissionWorker {
    core: SchedulerCore,
    receiver: mpsc::UnboundedReceiver<ScheduledRecord>,
    tick: Duration,
}

impl SubmissionWorker {
    pub fn new(core: SchedulerCore, receiver: mpsc::UnboundedReceiver<ScheduledRecord>, tick: Duration) -> Self {
        Self { core, receiver, tick }
    }

    /// Runs until `shutdown` fires, then returns, finishing the in-flight
    /// tick rather than aborting mid-batch.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut scheduled: Vec<ScheduledRecord> = Vec::new();
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.drain_into(&mut scheduled);
                    self.tick_once(&mut scheduled).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("submission worker received shutdown signal");
                    break;
                }
            }
        }
    }

    /// Step 1 of §4.2: non-blocking drain of everything `schedule_task` has
    /// enqueued since the last tick.
    fn drain_into(&mut self, scheduled: &mut Vec<ScheduledRecord>) {
        while let Ok(record) = self.receiver.try_recv() {
            scheduled.push(record);
        }
    }

    /// Steps 2-6 of §4.2.
    async fn tick_once(&self, scheduled: &mut Vec<ScheduledRecord>) {
        let mut ready = Vec::new();
        let mut still_waiting = Vec::new();

        for record in scheduled.drain(..) {
            match &record.transfer_handle {
                None => ready.push(Staged { record, transfer_time: 0.0 }),
                Some(handle) => match self.core.transfer_coordinator.is_complete(handle).await {
                    Ok(true) => {
                        let transfer_time = match self.core.transfer_coordinator.get_transfer_time(handle).await {
                            Ok(t) => t,
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to read completed transfer time, assuming 0");
                                0.0
                            }
                        };
                        {
                            let mut state = self.core.state.lock().await;
                            if let Some(endpoint_state) = state.endpoint_state.get_mut(&record.endpoint) {
                                endpoint_state.transfer_etas.remove(handle);
                            }
                        }
                        ready.push(Staged { record, transfer_time });
                    }
                    Ok(false) => still_waiting.push(record),
                    Err(e) => {
                        tracing::warn!(endpoint = %record.endpoint, error = %e, "transfer status check failed, retrying next tick");
                        still_waiting.push(record);
                    }
                },
            }
        }

        *scheduled = still_waiting;
        if ready.is_empty() {
            return;
        }

        // Single-tenant batching (§4.2 step 4, §9): the first ready task's
        // headers are used for the whole batch.
        let headers = ready[0].record.headers.clone();
        let items: Vec<SubmissionItem> = ready
            .iter()
            .map(|staged| SubmissionItem {
                function_id: staged.record.function_id.clone(),
                endpoint: staged.record.endpoint.clone(),
                payload: staged.record.payload.clone(),
            })
            .collect();

        match self.core.executor_client.submit(&items, &headers).await {
            Ok(outcome) if outcome.task_uuids.len() == ready.len() => {
                for (staged, real_id) in ready.into_iter().zip(outcome.task_uuids) {
                    self.commit_dispatch(staged, RealTaskId::new(real_id)).await;
                }
            }
            Ok(outcome) => {
                tracing::error!(
                    expected = ready.len(),
                    got = outcome.task_uuids.len(),
                    "executor returned a task_uuids list of the wrong length, retrying batch next tick"
                );
                scheduled.extend(ready.into_iter().map(|staged| staged.record));
            }
            Err(e) => {
                tracing::warn!(error = %e, batch_size = ready.len(), "submit failed, retrying next tick");
                scheduled.extend(ready.into_iter().map(|staged| staged.record));
            }
        }
    }

    /// §4.2 step 6: registers a newly-assigned real id and updates tracking
    /// state for one dispatch.
    async fn commit_dispatch(&self, staged: Staged, real_id: RealTaskId) {
        let Staged { record, transfer_time } = staged;
        let now = self.core.clock.now();

        let imports_required = self.core.imports_required_for(&record.function_id).await;
        let cold_start = self
            .core
            .snapshot_cold_start(&record.endpoint, &record.function_id, &imports_required)
            .await;
        let queue_delay = self.core.snapshot_queue_delay(&record.endpoint).await;
        // No files: transfer is already done by the time a record reaches
        // here (§4.2 step 6).
        let eta = self.core.strategy.predict_eta(
            &record.function_id,
            &record.endpoint,
            &record.payload,
            &[],
            cold_start,
            queue_delay,
        );
        let is_eta_reliable = self
            .core
            .runtime_predictor
            .has_learned(&record.function_id, &record.endpoint);

        let pending_record = shared::model::PendingRecord {
            task_id: record.task_id,
            function_id: record.function_id.clone(),
            endpoint: record.endpoint.clone(),
            payload: record.payload,
            eta,
            time_sent: now,
            transfer_time,
            is_eta_reliable,
        };

        let mut state = self.core.state.lock().await;
        state.pending.insert(real_id.clone(), pending_record);
        let endpoint_state = state.endpoint_state.entry(record.endpoint.clone()).or_default();
        endpoint_state.pending_real_ids.insert(real_id.clone());
        endpoint_state.last_task_eta = eta;
        if endpoint_state.temperature == Temperature::Cold {
            endpoint_state.temperature = Temperature::Warming;
        }

        state
            .task_real_ids
            .entry(record.task_id)
            .or_default()
            .insert(real_id);

        if !state.task_info.contains_key(&record.task_id) {
            // Raced with `_record_completed` for a sibling backup (§9): the
            // task already finished. Harmless; `task_real_ids` still grows
            // so `translate_task_id` reflects this dispatch.
            tracing::debug!(task_id = %record.task_id, "dispatch committed for a task with no task_info left");
        }
    }
}
