use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use wsingest_metrics::{MetricParser, MetricSink};
use wsingest_system::ShutdownHandle;

use crate::{Connection, RawMessage, ReadError};

/// Counters describing the work of an [`IngestLoop`].
///
/// The counters are shared between the loop and its controller and can be read at any time.
#[derive(Debug, Default)]
pub struct IngestStats {
    messages: AtomicU64,
    metrics: AtomicU64,
    parse_failures: AtomicU64,
    sink_failures: AtomicU64,
}

impl IngestStats {
    /// Returns the number of text messages received.
    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    /// Returns the number of metrics accepted by the sink.
    pub fn metrics(&self) -> u64 {
        self.metrics.load(Ordering::Relaxed)
    }

    /// Returns the number of messages that failed to parse.
    pub fn parse_failures(&self) -> u64 {
        self.parse_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of metrics rejected by the sink.
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }
}

/// The reason an [`IngestLoop`] ended.
#[derive(Debug)]
pub enum IngestExit {
    /// The shutdown signal fired.
    Shutdown,
    /// The connection can no longer be read.
    ReadFailed(ReadError),
}

/// Reads messages from a connection and forwards parsed metrics to a sink.
///
/// Messages are processed strictly one at a time and in transport order: all metrics of a message
/// are handed to the sink before the next message is read.
pub struct IngestLoop {
    connection: Connection,
    parser: Arc<dyn MetricParser>,
    sink: Arc<dyn MetricSink>,
    shutdown: ShutdownHandle,
    stats: Arc<IngestStats>,
}

impl IngestLoop {
    /// Creates a new loop over the given connection.
    pub fn new(
        connection: Connection,
        parser: Arc<dyn MetricParser>,
        sink: Arc<dyn MetricSink>,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            connection,
            parser,
            sink,
            shutdown,
            stats: Arc::default(),
        }
    }

    /// Records counters into the given stats instead of private ones.
    pub fn with_stats(mut self, stats: Arc<IngestStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Returns the counters of this loop.
    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    /// Runs the loop until shutdown or until the connection fails.
    ///
    /// The connection is released before this returns.
    pub async fn run(mut self) -> IngestExit {
        let exit = loop {
            let result = tokio::select! {
                biased;
                _ = self.shutdown.notified() => break IngestExit::Shutdown,
                result = self.connection.read_next() => result,
            };

            match result {
                Ok(message) => self.process(message),
                Err(error) => break IngestExit::ReadFailed(error),
            }
        };

        match &exit {
            IngestExit::Shutdown => wsingest_log::debug!("ingestion stopped by shutdown"),
            IngestExit::ReadFailed(ReadError::Closed) => {
                wsingest_log::debug!("websocket connection closed")
            }
            IngestExit::ReadFailed(ReadError::PeerClosed) => {
                wsingest_log::info!("websocket peer closed the connection")
            }
            IngestExit::ReadFailed(error) => {
                wsingest_log::error!(
                    error = error as &dyn Error,
                    "failed to read from websocket connection"
                )
            }
        }

        match exit {
            // A broken transport cannot complete a close handshake.
            IngestExit::ReadFailed(ref error) if error.is_transport() => drop(self.connection),
            _ => self.connection.close_gracefully().await,
        }

        exit
    }

    fn process(&self, message: RawMessage) {
        self.stats.messages.fetch_add(1, Ordering::Relaxed);
        wsingest_log::debug!(bytes = message.len(), "received websocket message");

        let metrics = match self.parser.parse(message.as_bytes()) {
            Ok(metrics) => metrics,
            Err(error) => {
                self.stats.parse_failures.fetch_add(1, Ordering::Relaxed);
                wsingest_log::warn!(
                    error = &error as &dyn Error,
                    "failed to parse websocket message"
                );
                return;
            }
        };

        for metric in metrics {
            match self.sink.accept(metric) {
                Ok(()) => {
                    self.stats.metrics.fetch_add(1, Ordering::Relaxed);
                }
                Err(error) => {
                    self.stats.sink_failures.fetch_add(1, Ordering::Relaxed);
                    wsingest_log::warn!(error = &error as &dyn Error, "metric sink rejected metric");
                }
            }
        }
    }
}
