use std::error::Error;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::{CancellationToken, DropGuard};
use url::Url;
use wsingest_config::{Config, ConfigError, InputMode};
use wsingest_system::TaskHandle;

use crate::{ConnectionError, ReadError};

/// Maximum time to wait for the close handshake and the server task when closing gracefully.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// A text payload received from the connection.
///
/// Messages are immutable and handed out in the order they were received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage(Bytes);

impl RawMessage {
    /// Returns the payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the size of the payload in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Where to establish the WebSocket connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Dial a WebSocket server at the given `ws://` or `wss://` URL.
    Client(Url),
    /// Listen on `addr` and accept a single WebSocket upgrade on `path`.
    Server {
        /// The address to bind to. Port `0` picks a random port.
        addr: SocketAddr,
        /// The HTTP path accepting the upgrade, starting with `/`.
        path: String,
    },
}

impl Target {
    /// Resolves the target from the input section of the configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate_input()?;

        Ok(match config.input_mode() {
            InputMode::Client => Target::Client(config.client_url()?.clone()),
            InputMode::Server => Target::Server {
                addr: config.listen_addr()?,
                path: config.upgrade_path().to_owned(),
            },
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Client(url) => write!(f, "{url}"),
            Target::Server { addr, path } => write!(f, "{addr}{path}"),
        }
    }
}

/// Opens and closes the single connection of an input.
///
/// The manager retains a close handle to the connection it opened, so the connection can be
/// closed while it is owned and read by another task. Closing makes any pending
/// [`Connection::read_next`] return [`ReadError::Closed`].
#[derive(Debug, Default)]
pub struct ConnectionManager {
    closer: Option<CancellationToken>,
}

impl ConnectionManager {
    /// Creates a manager without a connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Establishes a connection to the given target.
    ///
    /// In client mode, this performs the WebSocket handshake. In server mode, this binds the
    /// listening socket; the peer is accepted lazily by the first read.
    ///
    /// Fails with [`ConnectionError::AlreadyOpen`] if the previous connection is still live.
    pub async fn open(&mut self, target: &Target) -> Result<Connection, ConnectionError> {
        if self.is_open() {
            return Err(ConnectionError::AlreadyOpen);
        }

        let closer = CancellationToken::new();
        let transport = match target {
            Target::Client(url) => Transport::dial(url).await?,
            Target::Server { addr, path } => Transport::listen(*addr, path, &closer).await?,
        };

        self.closer = Some(closer.clone());

        Ok(Connection {
            transport,
            _guard: closer.clone().drop_guard(),
            closer,
        })
    }

    /// Closes the connection.
    ///
    /// This is idempotent and does not wait for the connection to be released by its owner.
    pub fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            closer.cancel();
        }
    }

    /// Returns `true` if the connection is live.
    ///
    /// A connection stops being live when it is closed through the manager or dropped by its
    /// owner.
    pub fn is_open(&self) -> bool {
        self.closer
            .as_ref()
            .is_some_and(|closer| !closer.is_cancelled())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// A single live WebSocket session.
///
/// Dropping the connection releases the socket and, in server mode, stops the listener.
pub struct Connection {
    transport: Transport,
    closer: CancellationToken,
    _guard: DropGuard,
}

impl Connection {
    /// Waits for the next text message.
    ///
    /// Ping and pong frames are answered by the transport and never returned. Binary frames are
    /// skipped with a warning. In server mode, this first waits for a peer to upgrade.
    ///
    /// This method is cancel-safe.
    pub async fn read_next(&mut self) -> Result<RawMessage, ReadError> {
        tokio::select! {
            biased;
            _ = self.closer.cancelled() => Err(ReadError::Closed),
            result = self.transport.next_message() => result,
        }
    }

    /// Returns the local listening address in server mode.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.transport {
            Transport::Client { .. } => None,
            Transport::Server(server) => Some(server.local_addr),
        }
    }

    /// Returns a description of the remote end, if known.
    pub fn peer(&self) -> Option<String> {
        match &self.transport {
            Transport::Client { url, .. } => Some(url.to_string()),
            Transport::Server(server) => server.socket.as_ref().map(|(_, peer)| peer.to_string()),
        }
    }

    /// Closes the connection with a close handshake and releases it.
    ///
    /// Waits a bounded amount of time for the peer and, in server mode, for the listener to shut
    /// down.
    pub async fn close_gracefully(mut self) {
        match &mut self.transport {
            Transport::Client { stream, .. } => {
                match tokio::time::timeout(CLOSE_TIMEOUT, stream.close(None)).await {
                    Ok(Ok(())) => (),
                    Ok(Err(tungstenite::Error::ConnectionClosed)) => (),
                    Ok(Err(error)) => {
                        wsingest_log::debug!(
                            error = &error as &dyn Error,
                            "failed to close websocket connection"
                        );
                    }
                    Err(_) => wsingest_log::debug!("timed out closing websocket connection"),
                }
            }
            Transport::Server(server) => {
                if let Some((socket, _)) = server.socket.as_mut() {
                    let close = socket.send(ws::Message::Close(None));
                    tokio::time::timeout(CLOSE_TIMEOUT, close).await.ok();
                }

                self.closer.cancel();
                if let Some(task) = server.task.take() {
                    task.join_timeout(CLOSE_TIMEOUT).await.ok();
                }
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("local_addr", &self.local_addr())
            .field("peer", &self.peer())
            .field("closed", &self.closer.is_cancelled())
            .finish()
    }
}

enum Transport {
    Client {
        url: Url,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    },
    Server(ServerTransport),
}

impl Transport {
    async fn dial(url: &Url) -> Result<Self, ConnectionError> {
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|error| ConnectionError::Handshake {
                url: url.clone(),
                source: Box::new(error),
            })?;

        wsingest_log::info!(%url, "connected to websocket server");

        Ok(Transport::Client {
            url: url.clone(),
            stream,
        })
    }

    async fn listen(
        addr: SocketAddr,
        path: &str,
        closer: &CancellationToken,
    ) -> Result<Self, ConnectionError> {
        // Axum panics on routes that are not absolute or contain captures.
        if !path.starts_with('/') || path.contains(['{', '}', '*', ':']) {
            return Err(ConnectionError::InvalidPath(path.to_owned()));
        }

        let bind_error = |source| ConnectionError::Bind { addr, source };
        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let (upgrades_tx, upgrades) = mpsc::channel(1);
        let state = UpgradeState {
            occupied: Arc::new(AtomicBool::new(false)),
            upgrades: upgrades_tx,
        };

        let app = Router::new()
            .route(path, get(handle_upgrade))
            .with_state(state)
            .into_make_service_with_connect_info::<SocketAddr>();

        let shutdown = closer.clone().cancelled_owned();
        let task = wsingest_system::spawn("websocket_server", async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(shutdown);
            if let Err(error) = server.await {
                wsingest_log::error!(error = &error as &dyn Error, "websocket server failed");
            }
        });

        wsingest_log::info!(%local_addr, path, "websocket input listening");

        Ok(Transport::Server(ServerTransport {
            local_addr,
            upgrades,
            socket: None,
            task: Some(task),
        }))
    }

    async fn next_message(&mut self) -> Result<RawMessage, ReadError> {
        match self {
            Transport::Client { stream, .. } => loop {
                match stream.next().await {
                    Some(Ok(message @ Message::Text(_))) => {
                        return Ok(RawMessage(message.into_data()));
                    }
                    Some(Ok(Message::Binary(data))) => skip_binary(data.len()),
                    Some(Ok(Message::Close(_))) | None => return Err(ReadError::PeerClosed),
                    Some(Ok(_)) => (),
                    Some(Err(tungstenite::Error::ConnectionClosed)) => {
                        return Err(ReadError::PeerClosed);
                    }
                    Some(Err(error)) => return Err(ReadError::Transport(Box::new(error))),
                }
            },
            Transport::Server(server) => server.next_message().await,
        }
    }
}

fn skip_binary(len: usize) {
    wsingest_log::warn!(len, "skipping binary websocket frame");
}

struct ServerTransport {
    local_addr: SocketAddr,
    upgrades: mpsc::Receiver<(WebSocket, SocketAddr)>,
    socket: Option<(WebSocket, SocketAddr)>,
    task: Option<TaskHandle<()>>,
}

impl ServerTransport {
    async fn next_message(&mut self) -> Result<RawMessage, ReadError> {
        if self.socket.is_none() {
            let (socket, peer) = self
                .upgrades
                .recv()
                .await
                .ok_or_else(|| ReadError::Transport("websocket server stopped".into()))?;

            wsingest_log::info!(%peer, "websocket peer connected");
            self.socket = Some((socket, peer));
        }

        let Some((socket, _)) = self.socket.as_mut() else {
            return Err(ReadError::Closed);
        };

        loop {
            match socket.recv().await {
                Some(Ok(message @ ws::Message::Text(_))) => {
                    return Ok(RawMessage(message.into_data()));
                }
                Some(Ok(ws::Message::Binary(data))) => skip_binary(data.len()),
                Some(Ok(ws::Message::Close(_))) | None => return Err(ReadError::PeerClosed),
                Some(Ok(_)) => (),
                Some(Err(error)) => return Err(ReadError::Transport(Box::new(error))),
            }
        }
    }
}

impl Drop for ServerTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Shared state of the upgrade route, owned by one server connection.
#[derive(Clone)]
struct UpgradeState {
    occupied: Arc<AtomicBool>,
    upgrades: mpsc::Sender<(WebSocket, SocketAddr)>,
}

async fn handle_upgrade(
    State(state): State<UpgradeState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.occupied.swap(true, Ordering::AcqRel) {
        wsingest_log::warn!(%peer, "rejecting websocket peer, another peer is connected");
        return (StatusCode::CONFLICT, "another websocket peer is connected").into_response();
    }

    let occupied = state.occupied.clone();

    ws.on_failed_upgrade(move |error: axum::Error| {
        wsingest_log::warn!(error = &error as &dyn Error, "websocket upgrade failed");
        occupied.store(false, Ordering::Release);
    })
    .on_upgrade(move |socket| async move {
        if state.upgrades.send((socket, peer)).await.is_err() {
            wsingest_log::debug!(%peer, "dropping websocket peer, connection is closed");
        }
    })
}
