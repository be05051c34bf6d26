use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Connection state of a [`MockServer`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum PeerState {
    #[default]
    Waiting,
    Connected,
    Disconnected,
}

/// A WebSocket server accepting exactly one client.
///
/// Used as the remote end of a client mode input. Messages queued with [`send`](Self::send) are
/// delivered once the client has connected, in order.
#[derive(Debug)]
pub struct MockServer {
    addr: SocketAddr,
    path: String,
    outbound: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<PeerState>,
    request_path: Arc<Mutex<Option<String>>>,
    handle: JoinHandle<()>,
}

impl MockServer {
    /// Starts a server on a random loopback port.
    ///
    /// The `path` is only used to build [`url`](Self::url); the server accepts any path and
    /// records it in [`request_path`](Self::request_path).
    pub async fn start(path: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (outbound, mut rx) = mpsc::unbounded_channel::<Message>();
        let (state_tx, state) = watch::channel(PeerState::Waiting);
        let request_path = Arc::new(Mutex::new(None));

        let path_slot = request_path.clone();
        let handle = tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };

            let callback = move |request: &Request,
                                 response: Response|
                  -> Result<Response, ErrorResponse> {
                *path_slot.lock() = Some(request.uri().path().to_owned());
                Ok(response)
            };

            let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                state_tx.send_replace(PeerState::Disconnected);
                return;
            };

            state_tx.send_replace(PeerState::Connected);
            let (mut write, mut read) = ws.split();

            loop {
                tokio::select! {
                    message = rx.recv() => match message {
                        Some(message) => {
                            let is_close = matches!(message, Message::Close(_));
                            if write.send(message).await.is_err() || is_close {
                                break;
                            }
                        }
                        None => {
                            write.send(Message::Close(None)).await.ok();
                            break;
                        }
                    },
                    frame = read.next() => match frame {
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => (),
                    },
                }
            }

            // Drain until the client acknowledges a close or drops the socket.
            while let Some(Ok(frame)) = read.next().await {
                if frame.is_close() {
                    break;
                }
            }

            state_tx.send_replace(PeerState::Disconnected);
        });

        Self {
            addr,
            path: path.to_owned(),
            outbound,
            state,
            request_path,
            handle,
        }
    }

    /// Returns the WebSocket URL of this server, including the path.
    pub fn url(&self) -> String {
        format!("ws://{}{}", self.addr, self.path)
    }

    /// Returns the path the client requested during the handshake.
    pub fn request_path(&self) -> Option<String> {
        self.request_path.lock().clone()
    }

    /// Queues a text frame for the client.
    pub fn send(&self, text: impl Into<String>) {
        self.outbound.send(Message::text(text.into())).ok();
    }

    /// Queues a binary frame for the client.
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) {
        self.outbound.send(Message::binary(data.into())).ok();
    }

    /// Closes the connection with a close frame once all queued messages are delivered.
    pub fn close(&self) {
        self.outbound.send(Message::Close(None)).ok();
    }

    /// Waits until a client has completed the handshake.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        self.wait_state(timeout, |state| *state != PeerState::Waiting)
            .await
    }

    /// Waits until the client has disconnected.
    pub async fn wait_disconnected(&self, timeout: Duration) -> bool {
        self.wait_state(timeout, |state| *state == PeerState::Disconnected)
            .await
    }

    async fn wait_state(&self, timeout: Duration, f: impl FnMut(&PeerState) -> bool) -> bool {
        let mut state = self.state.clone();
        let result = tokio::time::timeout(timeout, state.wait_for(f)).await;
        matches!(result, Ok(Ok(_)))
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A WebSocket client dialing a server mode input.
pub struct MockClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl MockClient {
    /// Connects to the given WebSocket URL.
    pub async fn connect(url: &str) -> Result<Self, tungstenite::Error> {
        let (stream, _) = tokio_tungstenite::connect_async(url).await?;
        Ok(Self { stream })
    }

    /// Connects to the given URL, retrying until the server accepts or the timeout elapses.
    pub async fn connect_timeout(url: &str, timeout: Duration) -> Result<Self, tungstenite::Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match Self::connect(url).await {
                Ok(client) => return Ok(client),
                Err(error) if tokio::time::Instant::now() >= deadline => return Err(error),
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    }

    /// Sends a text frame.
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), tungstenite::Error> {
        self.stream.send(Message::text(text.into())).await
    }

    /// Sends a close frame and waits up to one second for the server to acknowledge it.
    pub async fn close(mut self) -> Result<(), tungstenite::Error> {
        self.stream.close(None).await?;
        self.wait_closed(Duration::from_secs(1)).await;
        Ok(())
    }

    /// Waits until the server closes the connection.
    ///
    /// Returns `false` if the timeout elapses first.
    pub async fn wait_closed(&mut self, timeout: Duration) -> bool {
        let closed = async {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => (),
                }
            }
        };

        tokio::time::timeout(timeout, closed).await.is_ok()
    }
}
