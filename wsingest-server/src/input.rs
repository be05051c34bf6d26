use std::error::Error;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wsingest_config::{Config, ConfigError};
use wsingest_metrics::{MetricParser, MetricSink};
use wsingest_system::{ShutdownSignal, TaskHandle};

use crate::{ConnectionManager, IngestExit, IngestLoop, IngestStats, StartError, Target};

/// The default time [`WebSocketInput::stop`] waits for the ingestion task.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The lifecycle state of a [`WebSocketInput`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputState {
    /// Created, but not started yet.
    Idle,
    /// Started successfully. The input remains running after the connection ended, until it is
    /// stopped.
    Running,
    /// Stopped. This state is final.
    Stopped,
}

impl fmt::Display for InputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputState::Idle => f.write_str("idle"),
            InputState::Running => f.write_str("running"),
            InputState::Stopped => f.write_str("stopped"),
        }
    }
}

/// A WebSocket input, controlled through [`start`](Self::start) and [`stop`](Self::stop).
///
/// The input moves through the states `Idle → Running → Stopped` exactly once. Starting opens the
/// connection and spawns the ingestion task; stopping signals the task, closes the connection and
/// waits a bounded time for the task to finish.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use tokio::sync::mpsc;
/// use wsingest_metrics::InfluxParser;
/// use wsingest_server::{Target, WebSocketInput};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let (sink, mut metrics) = mpsc::unbounded_channel();
/// let target = Target::Client("ws://localhost:3210/telegraf".parse()?);
///
/// let mut input = WebSocketInput::new(target, Arc::new(InfluxParser::new()));
/// input.start(Arc::new(sink)).await?;
///
/// while let Some(metric) = metrics.recv().await {
///     println!("{metric}");
/// }
///
/// input.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct WebSocketInput {
    target: Target,
    parser: Arc<dyn MetricParser>,
    shutdown_timeout: Duration,
    state: InputState,
    manager: ConnectionManager,
    shutdown: ShutdownSignal,
    stats: Arc<IngestStats>,
    local_addr: Option<SocketAddr>,
    task: Option<TaskHandle<IngestExit>>,
    finished: CancellationToken,
}

impl WebSocketInput {
    /// Creates an idle input for the given target.
    pub fn new(target: Target, parser: Arc<dyn MetricParser>) -> Self {
        Self {
            target,
            parser,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            state: InputState::Idle,
            manager: ConnectionManager::new(),
            shutdown: ShutdownSignal::new(),
            stats: Arc::default(),
            local_addr: None,
            task: None,
            finished: CancellationToken::new(),
        }
    }

    /// Creates an idle input from the input section of the configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let target = Target::from_config(config)?;
        let input = Self::new(target, config.data_format().parser())
            .with_shutdown_timeout(config.shutdown_timeout());
        Ok(input)
    }

    /// Sets the maximum time [`stop`](Self::stop) waits for the ingestion task.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Opens the connection and starts ingesting into `sink`.
    ///
    /// This is only valid in the [`Idle`](InputState::Idle) state. If the connection cannot be
    /// established, the error is returned and the input remains idle.
    pub async fn start(&mut self, sink: Arc<dyn MetricSink>) -> Result<(), StartError> {
        if self.state != InputState::Idle {
            return Err(StartError::InvalidState(self.state));
        }

        let connection = self.manager.open(&self.target).await.inspect_err(|error| {
            wsingest_log::error!(
                error = error as &dyn Error,
                endpoint = %self.target,
                "failed to start websocket input"
            );
        })?;

        self.local_addr = connection.local_addr();

        let ingest = IngestLoop::new(connection, self.parser.clone(), sink, self.shutdown.handle())
            .with_stats(self.stats.clone());

        let finished = self.finished.clone();
        self.task = Some(wsingest_system::spawn("ingest", async move {
            let _guard = finished.drop_guard();
            ingest.run().await
        }));

        self.state = InputState::Running;
        wsingest_log::info!(endpoint = %self.target, "websocket input started");

        Ok(())
    }

    /// Stops ingesting and releases the connection.
    ///
    /// Fires the shutdown signal, closes the connection and waits up to the shutdown timeout for
    /// the ingestion task. Calling this in any state other than [`Running`](InputState::Running)
    /// has no effect.
    pub async fn stop(&mut self) {
        if self.state != InputState::Running {
            wsingest_log::debug!(state = %self.state, "websocket input is not running");
            return;
        }

        self.state = InputState::Stopped;
        self.shutdown.fire();
        self.manager.close();

        if let Some(task) = self.task.take() {
            match task.join_timeout(self.shutdown_timeout).await {
                Ok(exit) => wsingest_log::debug!(?exit, "ingestion task finished"),
                Err(error) => wsingest_log::error!(
                    error = &error as &dyn Error,
                    "ingestion task did not finish cleanly"
                ),
            }
        }

        wsingest_log::info!(
            messages = self.stats.messages(),
            metrics = self.stats.metrics(),
            "websocket input stopped"
        );
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> InputState {
        self.state
    }

    /// Returns the ingestion counters.
    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Returns the bound address in server mode after the input has started.
    ///
    /// This is useful when listening on port `0`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns `true` if the ingestion task has ended.
    ///
    /// This happens after [`stop`](Self::stop), or earlier if the connection failed or the peer
    /// closed it.
    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Waits until the ingestion task has ended.
    ///
    /// If the input is never started, this never resolves.
    pub async fn finished(&self) {
        self.finished.cancelled().await
    }
}

impl fmt::Debug for WebSocketInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketInput")
            .field("target", &self.target)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Drop for WebSocketInput {
    fn drop(&mut self) {
        if self.state == InputState::Running {
            self.shutdown.fire();
            self.manager.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use wsingest_metrics::InfluxParser;
    use wsingest_test::Accumulator;

    use super::*;

    fn server_input() -> WebSocketInput {
        let target = Target::Server {
            addr: "127.0.0.1:0".parse().unwrap(),
            path: "/watch".to_owned(),
        };
        WebSocketInput::new(target, Arc::new(InfluxParser::new()))
    }

    #[test]
    fn test_from_config() {
        let config = Config::from_yaml_str("input:\n  shutdown_timeout: 1\n").unwrap();
        let input = WebSocketInput::from_config(&config).unwrap();

        assert_eq!(input.state(), InputState::Idle);
        assert_eq!(input.shutdown_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_lifecycle() {
        wsingest_test::setup();

        let mut input = server_input();
        assert_eq!(input.state(), InputState::Idle);

        // Stopping an idle input has no effect.
        input.stop().await;
        assert_eq!(input.state(), InputState::Idle);

        input.start(Accumulator::new()).await.unwrap();
        assert_eq!(input.state(), InputState::Running);
        assert!(input.local_addr().is_some());

        let error = input.start(Accumulator::new()).await.unwrap_err();
        insta::assert_snapshot!(error, @"cannot start websocket input in state running");

        input.stop().await;
        assert_eq!(input.state(), InputState::Stopped);
        assert!(input.is_finished());

        input.stop().await;
        assert_eq!(input.state(), InputState::Stopped);

        let error = input.start(Accumulator::new()).await.unwrap_err();
        assert!(matches!(error, StartError::InvalidState(InputState::Stopped)));
    }
}
