use std::error::Error;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::Metric;

/// An error returned by [`MetricSink::accept`].
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The sink no longer accepts metrics.
    #[error("sink is closed")]
    Closed,
    /// The sink refused this particular metric.
    #[error("metric rejected: {0}")]
    Rejected(String),
    /// Any other failure of the sink.
    #[error("sink failed")]
    Other(#[source] Box<dyn Error + Send + Sync>),
}

/// Accepts metrics one at a time.
///
/// The sink is shared between the host and the ingestion task, and therefore must be `Send` and
/// `Sync`. Returning an error rejects only the given metric.
pub trait MetricSink: Send + Sync {
    /// Accepts a single metric.
    fn accept(&self, metric: Metric) -> Result<(), SinkError>;
}

impl<T: MetricSink + ?Sized> MetricSink for Arc<T> {
    fn accept(&self, metric: Metric) -> Result<(), SinkError> {
        (**self).accept(metric)
    }
}

impl MetricSink for mpsc::UnboundedSender<Metric> {
    fn accept(&self, metric: Metric) -> Result<(), SinkError> {
        self.send(metric).map_err(|_| SinkError::Closed)
    }
}
