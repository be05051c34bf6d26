use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use wsingest_metrics::{Metric, MetricSink, SinkError};

/// A sink that collects all metrics in memory.
///
/// Metrics whose name was passed to [`reject`](Self::reject) are refused with
/// [`SinkError::Rejected`] instead.
#[derive(Debug)]
pub struct Accumulator {
    metrics: Mutex<Vec<Metric>>,
    rejected: Mutex<Vec<String>>,
    count: watch::Sender<usize>,
}

impl Accumulator {
    /// Creates a new, empty accumulator.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            metrics: Mutex::new(Vec::new()),
            rejected: Mutex::new(Vec::new()),
            count: watch::channel(0).0,
        })
    }

    /// Refuses all metrics with the given name from now on.
    pub fn reject(&self, name: impl Into<String>) {
        self.rejected.lock().push(name.into());
    }

    /// Returns a copy of all metrics accepted so far, in order of arrival.
    pub fn metrics(&self) -> Vec<Metric> {
        self.metrics.lock().clone()
    }

    /// Returns the number of metrics accepted so far.
    pub fn len(&self) -> usize {
        self.metrics.lock().len()
    }

    /// Returns `true` if no metric has been accepted yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until at least `count` metrics have been accepted.
    ///
    /// Returns `false` if the timeout elapses first.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let mut rx = self.count.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(|len| *len >= count)).await;
        matches!(result, Ok(Ok(_)))
    }
}

impl MetricSink for Accumulator {
    fn accept(&self, metric: Metric) -> Result<(), SinkError> {
        if self.rejected.lock().contains(&metric.name) {
            return Err(SinkError::Rejected(metric.name));
        }

        let mut metrics = self.metrics.lock();
        metrics.push(metric);
        self.count.send_replace(metrics.len());

        Ok(())
    }
}
