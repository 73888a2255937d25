//! Built-in `Strategy` and predictor implementations, and the
//! registry-of-constructors factory described in §9's "Design Notes" port
//! injection section.
//!
//! These are reference implementations for standalone operation and for
//! tests; a production deployment is free to inject its own by implementing
//! the traits in [`crate::ports`] directly instead of going through
//! [`build_strategy`]/[`build_runtime_predictor`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::ids::{ClientTaskId, EndpointId, FunctionId};
use crate::model::{PendingRecord, TransferHandle};
use crate::ports::{
    EndpointChoice, FileReference, ImportPredictor, RuntimePredictor, Strategy, TransferCoordinator,
    TransferPredictor,
};
use crate::{Result, SchedulerError};

/// Picks endpoints in a fixed round-robin order, ignoring load. The
/// default strategy (`"round-robin"`, per §6's configuration options).
pub struct RoundRobinStrategy {
    endpoints: Vec<EndpointId>,
    next: AtomicUsize,
    clock: Arc<dyn Clock>,
    runtime_predictor: Arc<dyn RuntimePredictor>,
    transfer_predictor: Arc<dyn TransferPredictor>,
}

impl RoundRobinStrategy {
    pub fn new(
        endpoints: Vec<EndpointId>,
        clock: Arc<dyn Clock>,
        runtime_predictor: Arc<dyn RuntimePredictor>,
        transfer_predictor: Arc<dyn TransferPredictor>,
    ) -> Self {
        Self {
            endpoints,
            next: AtomicUsize::new(0),
            clock,
            runtime_predictor,
            transfer_predictor,
        }
    }
}

impl Strategy for RoundRobinStrategy {
    fn choose_endpoint(
        &self,
        func: &FunctionId,
        _payload: &[u8],
        _files: &[FileReference],
        exclude: &HashSet<EndpointId>,
        _transfer_etas: &HashMap<EndpointId, HashMap<TransferHandle, f64>>,
    ) -> Result<EndpointChoice> {
        let candidates: Vec<&EndpointId> =
            self.endpoints.iter().filter(|e| !exclude.contains(e)).collect();
        if candidates.is_empty() {
            return Err(SchedulerError::AllEndpointsBlocked(func.to_string()).into());
        }
        // Fixed-size modulo over the *full* endpoint list keeps rotation
        // order stable even as individual calls exclude different subsets.
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for offset in 0..self.endpoints.len() {
            let idx = (start + offset) % self.endpoints.len();
            let candidate = &self.endpoints[idx];
            if !exclude.contains(candidate) {
                return Ok(EndpointChoice::new(candidate.clone()));
            }
        }
        Err(SchedulerError::AllEndpointsBlocked(func.to_string()).into())
    }

    fn predict_eta(
        &self,
        func: &FunctionId,
        endpoint: &EndpointId,
        _payload: &[u8],
        files: &[FileReference],
        cold_start: f64,
        queue_delay: f64,
    ) -> f64 {
        let now = self.clock.now();
        let runtime = self.runtime_predictor.predict(func, endpoint);
        let transfer_time = if files.is_empty() {
            0.0
        } else {
            self.transfer_predictor.transfer_time(files, endpoint)
        };
        (queue_delay.max(now)) + runtime + cold_start + transfer_time
    }
}

/// Tracks a rolling window of the last `last_n` observed runtimes per
/// (function, endpoint) pair and predicts their mean. `has_learned` becomes
/// true once at least one sample has landed: any data beats the prior.
pub struct RollingAverageRuntimePredictor {
    last_n: usize,
    default_runtime: f64,
    samples: Mutex<HashMap<(FunctionId, EndpointId), Vec<f64>>>,
}

impl RollingAverageRuntimePredictor {
    pub fn new(last_n: usize, default_runtime: f64) -> Self {
        Self {
            last_n: last_n.max(1),
            default_runtime,
            samples: Mutex::new(HashMap::new()),
        }
    }
}

impl RuntimePredictor for RollingAverageRuntimePredictor {
    fn update(&self, record: &PendingRecord, runtime_seconds: f64) {
        let key = (record.function_id.clone(), record.endpoint.clone());
        let mut samples = self.samples.lock().expect("runtime predictor mutex poisoned");
        let window = samples.entry(key).or_default();
        window.push(runtime_seconds);
        if window.len() > self.last_n {
            let overflow = window.len() - self.last_n;
            window.drain(0..overflow);
        }
    }

    fn has_learned(&self, func: &FunctionId, endpoint: &EndpointId) -> bool {
        let samples = self.samples.lock().expect("runtime predictor mutex poisoned");
        samples
            .get(&(func.clone(), endpoint.clone()))
            .is_some_and(|window| !window.is_empty())
    }

    fn predict(&self, func: &FunctionId, endpoint: &EndpointId) -> f64 {
        let samples = self.samples.lock().expect("runtime predictor mutex poisoned");
        match samples.get(&(func.clone(), endpoint.clone())) {
            Some(window) if !window.is_empty() => window.iter().sum::<f64>() / window.len() as f64,
            _ => self.default_runtime,
        }
    }
}

/// A transfer-time predictor that returns a fixed estimate regardless of
/// file size or endpoint, for standalone operation without a real transfer
/// model.
pub struct ConstantTransferPredictor {
    seconds_per_file: f64,
}

impl ConstantTransferPredictor {
    pub fn new(seconds_per_file: f64) -> Self {
        Self { seconds_per_file }
    }
}

impl TransferPredictor for ConstantTransferPredictor {
    fn transfer_time(&self, files: &[FileReference], _endpoint: &EndpointId) -> f64 {
        files.len() as f64 * self.seconds_per_file
    }
}

/// An import-time predictor that returns a fixed estimate per package, for
/// standalone operation without a warm-started import model.
pub struct ConstantImportPredictor {
    seconds_per_package: f64,
}

impl ConstantImportPredictor {
    pub fn new(seconds_per_package: f64) -> Self {
        Self { seconds_per_package }
    }
}

impl ImportPredictor for ConstantImportPredictor {
    fn import_time(&self, _package: &str, _endpoint: &EndpointId) -> f64 {
        self.seconds_per_package
    }
}

/// Default `TransferCoordinator` for standalone operation (§2.1): the
/// file-transfer subsystem is out of scope for this core (§1) and treated
/// as an external collaborator, so this stand-in reports every transfer as
/// already staged rather than performing any real staging. A deployment
/// with a real `TransferManager` injects its own implementation instead.
pub struct NoopTransferCoordinator;

#[async_trait::async_trait]
impl TransferCoordinator for NoopTransferCoordinator {
    async fn transfer(
        &self,
        _files: &[FileReference],
        _endpoint: &EndpointId,
        _task_id: &ClientTaskId,
    ) -> Result<Option<TransferHandle>> {
        Ok(None)
    }

    async fn is_complete(&self, _handle: &TransferHandle) -> Result<bool> {
        Ok(true)
    }

    async fn get_transfer_time(&self, _handle: &TransferHandle) -> Result<f64> {
        Ok(0.0)
    }
}

/// Builds a registered [`Strategy`] by name (§9's "registry of constructors
/// keyed by name"). Unknown names fall back to `"round-robin"` with a
/// warning, preferring a safe default over a hard failure for non-critical
/// settings.
pub fn build_strategy(
    name: &str,
    endpoints: Vec<EndpointId>,
    clock: Arc<dyn Clock>,
    runtime_predictor: Arc<dyn RuntimePredictor>,
    transfer_predictor: Arc<dyn TransferPredictor>,
) -> Arc<dyn Strategy> {
    if name != "round-robin" {
        tracing::warn!(strategy = name, "unknown strategy name, falling back to round-robin");
    }
    Arc::new(RoundRobinStrategy::new(
        endpoints,
        clock,
        runtime_predictor,
        transfer_predictor,
    ))
}

/// Builds a registered [`RuntimePredictor`] by name. `"rolling-average"` is
/// the only built-in kind and the configuration default (§6).
pub fn build_runtime_predictor(
    name: &str,
    last_n: usize,
    default_runtime: f64,
) -> Arc<dyn RuntimePredictor> {
    if name != "rolling-average" {
        tracing::warn!(
            runtime_predictor = name,
            "unknown runtime predictor name, falling back to rolling-average"
        );
    }
    Arc::new(RollingAverageRuntimePredictor::new(last_n, default_runtime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn test_round_robin_rotates_across_calls() {
        let endpoints = vec![EndpointId::new("a"), EndpointId::new("b")];
        let strategy = RoundRobinStrategy::new(
            endpoints,
            Arc::new(FakeClock::new(0.0)),
            Arc::new(RollingAverageRuntimePredictor::new(5, 1.0)),
            Arc::new(ConstantTransferPredictor::new(0.0)),
        );
        let func = FunctionId::new("f");
        let empty = HashSet::new();
        let transfer_etas = HashMap::new();

        let first = strategy
            .choose_endpoint(&func, &[], &[], &empty, &transfer_etas)
            .unwrap();
        let second = strategy
            .choose_endpoint(&func, &[], &[], &empty, &transfer_etas)
            .unwrap();
        assert_ne!(first.endpoint, second.endpoint);
    }

    #[test]
    fn test_round_robin_excludes_blocked_endpoints() {
        let endpoints = vec![EndpointId::new("a"), EndpointId::new("b")];
        let strategy = RoundRobinStrategy::new(
            endpoints,
            Arc::new(FakeClock::new(0.0)),
            Arc::new(RollingAverageRuntimePredictor::new(5, 1.0)),
            Arc::new(ConstantTransferPredictor::new(0.0)),
        );
        let func = FunctionId::new("f");
        let mut exclude = HashSet::new();
        exclude.insert(EndpointId::new("a"));
        let transfer_etas = HashMap::new();

        let choice = strategy
            .choose_endpoint(&func, &[], &[], &exclude, &transfer_etas)
            .unwrap();
        assert_eq!(choice.endpoint, EndpointId::new("b"));
    }

    #[test]
    fn test_choose_endpoint_fails_when_all_blocked() {
        let endpoints = vec![EndpointId::new("a")];
        let strategy = RoundRobinStrategy::new(
            endpoints,
            Arc::new(FakeClock::new(0.0)),
            Arc::new(RollingAverageRuntimePredictor::new(5, 1.0)),
            Arc::new(ConstantTransferPredictor::new(0.0)),
        );
        let func = FunctionId::new("f");
        let mut exclude = HashSet::new();
        exclude.insert(EndpointId::new("a"));
        let transfer_etas = HashMap::new();

        assert!(strategy
            .choose_endpoint(&func, &[], &[], &exclude, &transfer_etas)
            .is_err());
    }

    #[test]
    fn test_predict_eta_sums_components_and_floors_at_now() {
        let strategy = RoundRobinStrategy::new(
            vec![EndpointId::new("a")],
            Arc::new(FakeClock::new(100.0)),
            Arc::new(RollingAverageRuntimePredictor::new(5, 2.0)),
            Arc::new(ConstantTransferPredictor::new(1.0)),
        );
        let func = FunctionId::new("f");
        let endpoint = EndpointId::new("a");

        // queue_delay below `now` is floored at `now`.
        let eta = strategy.predict_eta(&func, &endpoint, &[], &[], 3.0, 0.0);
        assert_eq!(eta, 100.0 + 2.0 + 3.0);

        // queue_delay above `now` wins, and files add transfer time.
        let files = vec![FileReference {
            source_url: "s3://a".into(),
            destination_path: "/a".into(),
            size_bytes: None,
        }];
        let eta = strategy.predict_eta(&func, &endpoint, &[], &files, 3.0, 150.0);
        assert_eq!(eta, 150.0 + 2.0 + 3.0 + 1.0);
    }

    #[test]
    fn test_rolling_average_predictor_learns_and_predicts() {
        let predictor = RollingAverageRuntimePredictor::new(2, 5.0);
        let func = FunctionId::new("f");
        let endpoint = EndpointId::new("e");
        assert!(!predictor.has_learned(&func, &endpoint));
        assert_eq!(predictor.predict(&func, &endpoint), 5.0);

        let record = PendingRecord {
            task_id: crate::ClientTaskId::new(),
            function_id: func.clone(),
            endpoint: endpoint.clone(),
            payload: vec![],
            eta: 0.0,
            time_sent: 0.0,
            transfer_time: 0.0,
            is_eta_reliable: false,
        };
        predictor.update(&record, 2.0);
        predictor.update(&record, 4.0);
        assert!(predictor.has_learned(&func, &endpoint));
        assert_eq!(predictor.predict(&func, &endpoint), 3.0);

        // Window caps at last_n=2: oldest sample drops off.
        predictor.update(&record, 6.0);
        assert_eq!(predictor.predict(&func, &endpoint), 5.0);
    }

    #[test]
    fn test_constant_transfer_predictor_scales_with_file_count() {
        let predictor = ConstantTransferPredictor::new(3.0);
        let endpoint = EndpointId::new("e");
        let files = vec![
            FileReference {
                source_url: "s3://a".into(),
                destination_path: "/a".into(),
                size_bytes: None,
            },
            FileReference {
                source_url: "s3://b".into(),
                destination_path: "/b".into(),
                size_bytes: None,
            },
        ];
        assert_eq!(predictor.transfer_time(&files, &endpoint), 6.0);
    }
}
