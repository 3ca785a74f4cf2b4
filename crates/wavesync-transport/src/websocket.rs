//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! The socket is split into a write half and a read half behind separate
//! locks, so a connection task can wait for the next inbound frame while
//! another task writes. [`Connection::send_unreliable`] treats the link as
//! busy when the write lock is held or the socket has not drained the
//! previous frame, and drops instead of waiting.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::future::poll_fn;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, Delivery, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }

    /// The address the listener is bound to (useful with port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let ws = tokio_tungstenite::accept_async(MaybeTlsStream::Plain(stream))
            .await
            .map_err(|e| {
                TransportError::AcceptFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;

        let conn = WebSocketConnection::from_stream(ws);
        tracing::debug!(id = %conn.id, %addr, "accepted WebSocket connection");
        Ok(conn)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A single WebSocket connection, server-accepted or client-dialed.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    /// Dials a WebSocket server, e.g. `ws://127.0.0.1:8080`.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            TransportError::ConnectFailed {
                url: url.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e),
            }
        })?;
        let conn = Self::from_stream(ws);
        tracing::debug!(id = %conn.id, url, "connected WebSocket client");
        Ok(conn)
    }

    fn from_stream(ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }

    async fn write(
        sink: &mut SplitSink<WsStream, Message>,
        data: &[u8],
    ) -> Result<(), TransportError> {
        sink.send(Message::Binary(data.to_vec().into()))
            .await
            .map_err(send_failed)
    }
}

fn send_failed(e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let mut sink = self.sink.lock().await;
        Self::write(&mut sink, data).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn send_unreliable(&self, data: &[u8]) -> Result<Delivery, Self::Error> {
        // Another writer holds the sink: the link is busy, drop the frame.
        let Ok(mut sink) = self.sink.try_lock() else {
            tracing::trace!(
                id = %self.id,
                bytes = data.len(),
                "unreliable frame dropped, sink locked"
            );
            return Ok(Delivery::Dropped);
        };

        // An earlier frame is still waiting on the socket.
        match poll_fn(|cx| sink.poll_ready_unpin(cx)).now_or_never() {
            None => {
                tracing::trace!(
                    id = %self.id,
                    bytes = data.len(),
                    "unreliable frame dropped, socket backed up"
                );
                return Ok(Delivery::Dropped);
            }
            Some(ready) => ready.map_err(send_failed)?,
        }
        sink.start_send_unpin(Message::Binary(data.to_vec().into()))
            .map_err(send_failed)?;

        // Flush what the socket takes now; the rest goes out with the
        // next write.
        if let Some(flushed) = poll_fn(|cx| sink.poll_flush_unpin(cx)).now_or_never() {
            flushed.map_err(send_failed)?;
        }
        Ok(Delivery::Sent)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink.lock().await.close().await.map_err(send_failed)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
