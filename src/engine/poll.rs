//! Polling execution engine over a time-series store.

use super::{ExecutionEngine, ExecutionError, ResultEvent, ResultStream};
use crate::cancel::CancelToken;
use crate::types::Variables;
use crossbeam_channel::{bounded, select, tick, Sender};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// One stored observation.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub metric: String,
    /// Seconds since Unix epoch.
    pub timestamp: i64,
    pub value: f64,
    pub tags: HashMap<String, String>,
}

impl DataPoint {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "metric": self.metric,
            "timestamp": self.timestamp,
            "value": self.value,
            "tags": self.tags,
        })
    }
}

/// The narrow seam to the time-series storage engine.
///
/// Aggregation semantics, retention, and the wire to the actual backend all
/// live behind this trait.
pub trait TimeSeriesStore: Send + Sync {
    /// Store one data point.
    fn put(&self, point: DataPoint) -> Result<(), ExecutionError>;

    /// Most recent data point(s) for a metric, filtered by exact tag match.
    fn query_last(
        &self,
        metric: &str,
        tags: &HashMap<String, String>,
    ) -> Result<Vec<DataPoint>, ExecutionError>;

    /// Whether the metric exists (used to reject queries at start).
    fn has_metric(&self, metric: &str) -> bool;
}

/// Configuration for [`PollEngine`].
#[derive(Clone, Debug)]
pub struct PollConfig {
    /// How often to re-run the query.
    pub interval: Duration,

    /// Result stream capacity. A full stream makes the producer wait,
    /// which keeps the one-in-flight contract end to end.
    pub stream_capacity: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            stream_capacity: 16,
        }
    }
}

/// Execution engine that treats the query string as a metric name and
/// emits the metric's latest data points at a fixed interval.
///
/// String-valued variables become exact tag filters; the operation name is
/// ignored. A store error ends the execution after one erroring event.
pub struct PollEngine {
    store: Arc<dyn TimeSeriesStore>,
    config: PollConfig,
}

impl PollEngine {
    pub fn new(store: Arc<dyn TimeSeriesStore>, config: PollConfig) -> Self {
        Self { store, config }
    }

    fn tag_filters(variables: &Variables) -> HashMap<String, String> {
        variables
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect()
    }
}

impl ExecutionEngine for PollEngine {
    fn execute(
        &self,
        token: CancelToken,
        query: &str,
        _operation_name: Option<&str>,
        variables: &Variables,
    ) -> Result<ResultStream, ExecutionError> {
        let metric = query.trim().to_string();
        if metric.is_empty() {
            return Err(ExecutionError::InvalidQuery(
                "query must name a metric".to_string(),
            ));
        }
        if !self.store.has_metric(&metric) {
            return Err(ExecutionError::InvalidQuery(format!(
                "unknown metric: {}",
                metric
            )));
        }

        let tags = Self::tag_filters(variables);
        let store = self.store.clone();
        let interval = self.config.interval;
        let (tx, rx) = bounded(self.config.stream_capacity);

        thread::Builder::new()
            .name(format!("livewatch-poll-{}", metric))
            .spawn(move || poll_loop(store, metric, tags, interval, token, tx))
            .map_err(|e| ExecutionError::Failed(e.to_string()))?;

        Ok(rx)
    }
}

fn poll_loop(
    store: Arc<dyn TimeSeriesStore>,
    metric: String,
    tags: HashMap<String, String>,
    interval: Duration,
    token: CancelToken,
    tx: Sender<ResultEvent>,
) {
    let ticker = tick(interval);

    loop {
        select! {
            recv(token.done()) -> _ => {
                tracing::debug!(metric = %metric, "poll execution cancelled");
                return;
            }
            recv(ticker) -> _ => {
                let points = match store.query_last(&metric, &tags) {
                    Ok(points) => points,
                    Err(err) => {
                        tracing::warn!(metric = %metric, error = %err, "query-last failed, ending execution");
                        let _ = tx.try_send(ResultEvent::errors(vec![err]));
                        return;
                    }
                };

                for point in points {
                    let event = ResultEvent::data(point.to_json());
                    // A send that can still be interrupted by cancellation,
                    // so a stalled consumer cannot pin this thread.
                    select! {
                        send(tx, event) -> res => {
                            if res.is_err() {
                                // Receiver gone: the forwarding loop exited.
                                return;
                            }
                        }
                        recv(token.done()) -> _ => {
                            tracing::debug!(metric = %metric, "poll execution cancelled mid-send");
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;

    /// Minimal in-memory store: keeps the latest point per (metric, tags).
    struct MemoryStore {
        points: RwLock<Vec<DataPoint>>,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                points: RwLock::new(Vec::new()),
            }
        }
    }

    impl TimeSeriesStore for MemoryStore {
        fn put(&self, point: DataPoint) -> Result<(), ExecutionError> {
            let mut points = self.points.write();
            points.retain(|p| !(p.metric == point.metric && p.tags == point.tags));
            points.push(point);
            Ok(())
        }

        fn query_last(
            &self,
            metric: &str,
            tags: &HashMap<String, String>,
        ) -> Result<Vec<DataPoint>, ExecutionError> {
            Ok(self
                .points
                .read()
                .iter()
                .filter(|p| {
                    p.metric == metric && tags.iter().all(|(k, v)| p.tags.get(k) == Some(v))
                })
                .cloned()
                .collect())
        }

        fn has_metric(&self, metric: &str) -> bool {
            self.points.read().iter().any(|p| p.metric == metric)
        }
    }

    /// A store that always fails reads.
    struct BrokenStore;

    impl TimeSeriesStore for BrokenStore {
        fn put(&self, _point: DataPoint) -> Result<(), ExecutionError> {
            Err(ExecutionError::Storage("write failed".into()))
        }

        fn query_last(
            &self,
            _metric: &str,
            _tags: &HashMap<String, String>,
        ) -> Result<Vec<DataPoint>, ExecutionError> {
            Err(ExecutionError::Storage("read failed".into()))
        }

        fn has_metric(&self, _metric: &str) -> bool {
            true
        }
    }

    fn fast_config() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(10),
            stream_capacity: 16,
        }
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .put(DataPoint {
                metric: "cpu".into(),
                timestamp: 1_700_000_000,
                value: 0.75,
                tags: HashMap::from([("device_id".to_string(), "device-1".to_string())]),
            })
            .unwrap();
        store
    }

    #[test]
    fn test_unknown_metric_is_a_start_error() {
        let engine = PollEngine::new(seeded_store(), fast_config());
        let err = engine
            .execute(CancelToken::new(), "no_such_metric", None, &Variables::new())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidQuery(_)));
    }

    #[test]
    fn test_emits_latest_points() {
        let engine = PollEngine::new(seeded_store(), fast_config());
        let token = CancelToken::new();
        let stream = engine
            .execute(token.clone(), "cpu", None, &Variables::new())
            .unwrap();

        let event = stream.recv_timeout(Duration::from_secs(1)).unwrap();
        let data = event.data.unwrap();
        assert_eq!(data["metric"], "cpu");
        assert_eq!(data["value"], 0.75);
        assert!(event.errors.is_empty());

        token.cancel();
    }

    #[test]
    fn test_tag_filter_from_variables() {
        let store = seeded_store();
        store
            .put(DataPoint {
                metric: "cpu".into(),
                timestamp: 1_700_000_001,
                value: 0.25,
                tags: HashMap::from([("device_id".to_string(), "device-2".to_string())]),
            })
            .unwrap();

        let engine = PollEngine::new(store, fast_config());
        let token = CancelToken::new();
        let variables =
            Variables::from([("device_id".to_string(), serde_json::json!("device-2"))]);
        let stream = engine
            .execute(token.clone(), "cpu", None, &variables)
            .unwrap();

        let event = stream.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.data.unwrap()["value"], 0.25);

        token.cancel();
    }

    #[test]
    fn test_cancellation_ends_stream_promptly() {
        let engine = PollEngine::new(seeded_store(), fast_config());
        let token = CancelToken::new();
        let stream = engine
            .execute(token.clone(), "cpu", None, &Variables::new())
            .unwrap();

        stream.recv_timeout(Duration::from_secs(1)).unwrap();
        token.cancel();

        // Stream must disconnect; drain anything produced before the
        // cancellation was observed.
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        loop {
            match stream.recv_timeout(Duration::from_millis(50)) {
                Ok(_) => assert!(std::time::Instant::now() < deadline, "stream kept producing"),
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    assert!(std::time::Instant::now() < deadline, "stream never closed")
                }
            }
        }
    }

    #[test]
    fn test_store_error_emits_event_then_closes() {
        let engine = PollEngine::new(Arc::new(BrokenStore), fast_config());
        let token = CancelToken::new();
        let stream = engine
            .execute(token, "cpu", None, &Variables::new())
            .unwrap();

        let event = stream.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(event.data.is_none());
        assert_eq!(event.errors.len(), 1);

        // Terminal: the stream disconnects after the erroring event.
        assert!(matches!(
            stream.recv_timeout(Duration::from_secs(1)),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected)
        ));
    }
}
