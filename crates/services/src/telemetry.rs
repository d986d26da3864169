use std::collections::{BTreeMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use exam_core::Clock;
use exam_core::model::{ExamSettings, StorageMetric, StorageOperation};
use storage::repository::KeyValueStore;

/// Key the metrics ring is persisted under.
pub const METRICS_KEY: &str = "exam:metrics";

/// Error text of a metric whose operation was dropped before it finished.
pub const CANCELLED: &str = "cancelled";

/// Fixed-capacity log of storage metrics; the oldest entry is evicted on overflow.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsBuffer {
    capacity: usize,
    entries: VecDeque<StorageMetric>,
}

impl MetricsBuffer {
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, metric: StorageMetric) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(metric);
    }

    /// Replace the contents, keeping only the newest `capacity` entries.
    pub fn replace(&mut self, metrics: Vec<StorageMetric>) {
        self.entries.clear();
        for metric in metrics {
            self.push(metric);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<StorageMetric> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Records a cancelled metric unless disarmed once the future completes.
struct PendingMetric<'a> {
    telemetry: &'a StorageTelemetry,
    operation: StorageOperation,
    started: Instant,
    armed: bool,
}

impl PendingMetric<'_> {
    fn disarm(&mut self) -> Duration {
        self.armed = false;
        self.started.elapsed()
    }
}

impl Drop for PendingMetric<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.telemetry
                .record_cancelled(self.operation, self.started.elapsed());
        }
    }
}

/// Aggregate over all recorded metrics of one operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSummary {
    pub operation: StorageOperation,
    pub count: usize,
    pub failures: usize,
    pub average_ms: f64,
    pub max_ms: f64,
}

/// Times storage operations and keeps a persisted rolling log of the results.
#[derive(Clone)]
pub struct StorageTelemetry {
    kv: Arc<dyn KeyValueStore>,
    clock: Clock,
    slow_threshold: Duration,
    buffer: Arc<Mutex<MetricsBuffer>>,
}

impl StorageTelemetry {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Clock, settings: &ExamSettings) -> Self {
        Self {
            kv,
            clock,
            slow_threshold: Duration::from_millis(settings.slow_operation_ms()),
            buffer: Arc::new(Mutex::new(MetricsBuffer::new(settings.metrics_capacity()))),
        }
    }

    /// Run `fut`, record how long it took and whether it failed, and hand back
    /// its result untouched.
    ///
    /// A future dropped before completion (timeout, task abort, panic) is still
    /// recorded, as a failure with error text `cancelled`.
    ///
    /// # Errors
    ///
    /// Returns whatever error `fut` returned.
    pub async fn measure<T, E, F>(&self, operation: StorageOperation, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut pending = PendingMetric {
            telemetry: self,
            operation,
            started: Instant::now(),
            armed: true,
        };
        let result = fut.await;
        let elapsed = pending.disarm();
        let error = result.as_ref().err().map(ToString::to_string);
        self.record(operation, elapsed, error).await;
        result
    }

    async fn record(&self, operation: StorageOperation, elapsed: Duration, error: Option<String>) {
        let store_size_bytes = match self.kv.used_bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(error = %err, "could not measure store size");
                0
            }
        };
        let metric = self.metric(operation, elapsed, error, store_size_bytes);
        if let Some(snapshot) = self.push(metric) {
            self.persist(&snapshot).await;
        }
    }

    /// Record an operation whose future never completed. Runs during drop, so
    /// it reuses the last known store size and leaves persistence to the next
    /// measured operation.
    fn record_cancelled(&self, operation: StorageOperation, elapsed: Duration) {
        let store_size_bytes = self
            .buffer
            .lock()
            .ok()
            .and_then(|guard| guard.entries.back().map(|m| m.store_size_bytes))
            .unwrap_or(0);
        let error = Some(CANCELLED.to_owned());
        let metric = self.metric(operation, elapsed, error, store_size_bytes);
        self.push(metric);
    }

    fn metric(
        &self,
        operation: StorageOperation,
        elapsed: Duration,
        error: Option<String>,
        store_size_bytes: u64,
    ) -> StorageMetric {
        let duration_ms = elapsed.as_secs_f64() * 1_000.0;

        if let Some(err) = &error {
            warn!(%operation, duration_ms, error = %err, "storage operation failed");
        } else if elapsed > self.slow_threshold {
            let threshold_ms = u64::try_from(self.slow_threshold.as_millis()).unwrap_or(u64::MAX);
            warn!(%operation, duration_ms, threshold_ms, "slow storage operation");
        }

        StorageMetric {
            operation,
            duration_ms,
            success: error.is_none(),
            error,
            store_size_bytes,
            recorded_at: self.clock.now(),
        }
    }

    /// Append to the ring and return a snapshot to persist.
    fn push(&self, metric: StorageMetric) -> Option<Vec<StorageMetric>> {
        match self.buffer.lock() {
            Ok(mut guard) => {
                guard.push(metric);
                Some(guard.to_vec())
            }
            Err(err) => {
                warn!(error = %err, "metrics buffer poisoned; dropping metric");
                None
            }
        }
    }

    async fn persist(&self, snapshot: &[StorageMetric]) {
        let raw = match serde_json::to_string(snapshot) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "could not encode storage metrics");
                return;
            }
        };
        if let Err(err) = self.kv.set(METRICS_KEY, &raw).await {
            debug!(error = %err, "could not persist storage metrics");
        }
    }

    /// Reload metrics persisted by an earlier run. Corrupt data is discarded.
    ///
    /// Returns the number of metrics restored.
    pub async fn restore(&self) -> usize {
        let raw = match self.kv.get(METRICS_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return 0,
            Err(err) => {
                warn!(error = %err, "could not read persisted storage metrics");
                return 0;
            }
        };
        let metrics: Vec<StorageMetric> = match serde_json::from_str(&raw) {
            Ok(metrics) => metrics,
            Err(err) => {
                warn!(error = %err, "discarding corrupt persisted storage metrics");
                return 0;
            }
        };

        match self.buffer.lock() {
            Ok(mut guard) => {
                guard.replace(metrics);
                guard.len()
            }
            Err(_) => 0,
        }
    }

    /// Recorded metrics, oldest first.
    #[must_use]
    pub fn metrics(&self) -> Vec<StorageMetric> {
        self.buffer
            .lock()
            .map(|guard| guard.to_vec())
            .unwrap_or_default()
    }

    /// Metrics that failed or ran past the slow threshold.
    #[must_use]
    pub fn problems(&self) -> Vec<StorageMetric> {
        let threshold_ms = self.slow_threshold.as_secs_f64() * 1_000.0;
        self.metrics()
            .into_iter()
            .filter(|m| !m.success || m.duration_ms > threshold_ms)
            .collect()
    }

    #[must_use]
    pub fn summary(&self) -> Vec<OperationSummary> {
        let mut by_op: BTreeMap<StorageOperation, Vec<StorageMetric>> = BTreeMap::new();
        for metric in self.metrics() {
            by_op.entry(metric.operation).or_default().push(metric);
        }

        by_op
            .into_iter()
            .map(|(operation, metrics)| {
                let total: f64 = metrics.iter().map(|m| m.duration_ms).sum();
                #[allow(clippy::cast_precision_loss)]
                let average_ms = total / metrics.len() as f64;
                OperationSummary {
                    operation,
                    count: metrics.len(),
                    failures: metrics.iter().filter(|m| !m.success).count(),
                    average_ms,
                    max_ms: metrics.iter().map(|m| m.duration_ms).fold(0.0, f64::max),
                }
            })
            .collect()
    }

    /// Drop all metrics, in memory and persisted.
    pub async fn clear(&self) {
        if let Ok(mut guard) = self.buffer.lock() {
            guard.clear();
        }
        if let Err(err) = self.kv.remove(METRICS_KEY).await {
            warn!(error = %err, "could not remove persisted storage metrics");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::ExamSettingsDraft;
    use exam_core::time::{fixed_clock, fixed_now};
    use storage::repository::{InMemoryStore, StorageError};
    use tracing_test::traced_test;

    fn metric(n: u32) -> StorageMetric {
        StorageMetric {
            operation: StorageOperation::Save,
            duration_ms: f64::from(n),
            success: true,
            error: None,
            store_size_bytes: 0,
            recorded_at: fixed_now(),
        }
    }

    fn telemetry(kv: &InMemoryStore, capacity: usize) -> StorageTelemetry {
        let settings = ExamSettingsDraft {
            metrics_capacity: capacity,
            ..ExamSettingsDraft::default()
        }
        .validate()
        .unwrap();
        StorageTelemetry::new(Arc::new(kv.clone()), fixed_clock(), &settings)
    }

    #[test]
    fn ring_keeps_only_the_newest_entries() {
        let cap = 10;
        let mut buffer = MetricsBuffer::new(cap);
        for n in 0..15 {
            buffer.push(metric(n));
        }

        assert_eq!(buffer.len(), cap);
        let kept: Vec<f64> = buffer.to_vec().iter().map(|m| m.duration_ms).collect();
        let expected: Vec<f64> = (5..15).map(f64::from).collect();
        assert_eq!(kept, expected);
    }

    #[test]
    fn replace_trims_to_capacity() {
        let mut buffer = MetricsBuffer::new(2);
        buffer.replace((0..5).map(metric).collect());
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.to_vec()[0].duration_ms, 3.0);
    }

    #[tokio::test]
    async fn measure_forwards_success_and_records_it() {
        let kv = InMemoryStore::new();
        let t = telemetry(&kv, 50);

        let value = t
            .measure(StorageOperation::Load, async { Ok::<_, StorageError>(42) })
            .await
            .unwrap();

        assert_eq!(value, 42);
        let metrics = t.metrics();
        assert_eq!(metrics.len(), 1);
        assert!(metrics[0].success);
        assert_eq!(metrics[0].operation, StorageOperation::Load);
        assert!(kv.get(METRICS_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    #[traced_test]
    async fn slow_operations_are_flagged_and_logged() {
        let kv = InMemoryStore::new();
        let settings = ExamSettingsDraft {
            slow_operation_ms: 1,
            ..ExamSettingsDraft::default()
        }
        .validate()
        .unwrap();
        let t = StorageTelemetry::new(Arc::new(kv.clone()), fixed_clock(), &settings);

        t.measure(StorageOperation::Load, async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, StorageError>(())
        })
        .await
        .unwrap();

        let problems = t.problems();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].success);
        assert!(problems[0].duration_ms >= 20.0);
        assert!(logs_contain("slow storage operation"));
    }

    #[tokio::test]
    #[traced_test]
    async fn dropped_operation_is_recorded_as_cancelled() {
        let kv = InMemoryStore::new();
        let t = telemetry(&kv, 50);

        let timed_out = tokio::time::timeout(
            Duration::from_millis(5),
            t.measure(StorageOperation::Save, async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, StorageError>(())
            }),
        )
        .await;

        assert!(timed_out.is_err());
        let metrics = t.metrics();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].operation, StorageOperation::Save);
        assert!(!metrics[0].success);
        assert_eq!(metrics[0].error.as_deref(), Some(CANCELLED));
        assert!(logs_contain("storage operation failed"));
    }

    #[tokio::test]
    async fn measure_rethrows_original_error_and_records_failure() {
        let kv = InMemoryStore::new();
        let t = telemetry(&kv, 50);

        let err = t
            .measure(StorageOperation::Save, async {
                Err::<(), _>(StorageError::Connection("disk gone".into()))
            })
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::Connection("disk gone".into()));
        let metrics = t.metrics();
        assert!(!metrics[0].success);
        assert_eq!(metrics[0].error.as_deref(), Some("connection error: disk gone"));
        assert_eq!(t.problems().len(), 1);
        assert_eq!(t.summary()[0].failures, 1);
    }

    #[tokio::test]
    async fn metrics_survive_a_restart_and_cap_applies() {
        let kv = InMemoryStore::new();
        let first = telemetry(&kv, 3);
        for _ in 0..5 {
            first
                .measure(StorageOperation::Delete, async { Ok::<_, StorageError>(()) })
                .await
                .unwrap();
        }
        assert_eq!(first.metrics().len(), 3);

        let second = telemetry(&kv, 3);
        assert_eq!(second.restore().await, 3);
        assert_eq!(second.metrics(), first.metrics());

        second.clear().await;
        assert!(second.metrics().is_empty());
        assert!(kv.get(METRICS_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_persisted_metrics_are_discarded() {
        let kv = InMemoryStore::new();
        kv.set(METRICS_KEY, "[{oops").await.unwrap();
        let t = telemetry(&kv, 5);
        assert_eq!(t.restore().await, 0);
        assert!(t.metrics().is_empty());
    }

    #[tokio::test]
    async fn metric_persistence_failure_does_not_change_result() {
        // too small to hold the metrics ring
        let kv = InMemoryStore::with_quota(8);
        let t = telemetry(&kv, 5);

        let out = t
            .measure(StorageOperation::Optimize, async { Ok::<_, StorageError>("done") })
            .await
            .unwrap();

        assert_eq!(out, "done");
        assert_eq!(t.metrics().len(), 1);
        assert!(kv.get(METRICS_KEY).await.unwrap().is_none());
    }
}
