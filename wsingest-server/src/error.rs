use std::error::Error;
use std::io;
use std::net::SocketAddr;

use tokio_tungstenite::tungstenite;
use url::Url;

use crate::InputState;

/// An error returned when a connection cannot be established.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The connection manager already holds a live connection.
    #[error("connection is already open")]
    AlreadyOpen,
    /// The WebSocket handshake with the remote server failed.
    #[error("websocket handshake with {url} failed")]
    Handshake {
        /// The URL that was dialed.
        url: Url,
        /// The underlying transport or protocol error.
        #[source]
        source: Box<tungstenite::Error>,
    },
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}")]
    Bind {
        /// The address that was requested.
        addr: SocketAddr,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The upgrade path cannot be routed.
    #[error("invalid upgrade path `{0}`")]
    InvalidPath(String),
}

/// An error returned when no further messages can be read from a connection.
///
/// Once a read error has been returned, the connection is no longer usable for reads.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The peer sent a close frame or the stream ended.
    #[error("connection closed by peer")]
    PeerClosed,
    /// The connection was closed locally.
    #[error("connection closed")]
    Closed,
    /// The transport failed.
    #[error("websocket transport failed")]
    Transport(#[source] Box<dyn Error + Send + Sync>),
}

impl ReadError {
    /// Returns `true` if the peer ended the connection.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, Self::PeerClosed)
    }

    /// Returns `true` if the transport failed unexpectedly.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// An error returned by [`WebSocketInput::start`](crate::WebSocketInput::start).
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// The input was started before. An input can only be started once.
    #[error("cannot start websocket input in state {0}")]
    InvalidState(InputState),
    /// The connection could not be established.
    #[error("failed to open websocket connection")]
    Connection(#[from] ConnectionError),
}
