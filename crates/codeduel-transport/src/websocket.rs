//! WebSocket channels over `tokio-tungstenite`.
//!
//! The upgrade request is inspected once, during the handshake, for a
//! `token` query parameter. After that the socket is split so a writer
//! task can push events while the reader half waits for the next frame.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

use crate::{Connection, ConnectionId, Transport, TransportError, query_param};

static CONNECTION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Listens for clients and upgrades each one to a WebSocket.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds the listener. Port `0` picks a free port; see
    /// [`local_addr`](Self::local_addr).
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::Listen)?;
        tracing::info!(addr, "listening for WebSocket clients");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<WebSocketConnection, TransportError> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Listen)?;

        let mut query = None;
        let socket = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            query = req.uri().query().map(str::to_owned);
            Ok(resp)
        })
        .await
        .map_err(|e| TransportError::Upgrade(e.to_string()))?;

        let id = ConnectionId::new(CONNECTION_SEQ.fetch_add(1, Ordering::Relaxed));
        let credential = query.as_deref().and_then(|q| query_param(q, "token"));
        tracing::debug!(%id, %peer, has_credential = credential.is_some(), "client upgraded");

        let (writer, reader) = socket.split();
        Ok(WebSocketConnection {
            id,
            credential,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }
}

/// One upgraded client socket.
pub struct WebSocketConnection {
    id: ConnectionId,
    credential: Option<String>,
    writer: Mutex<SplitSink<WebSocketStream<TcpStream>, Message>>,
    reader: Mutex<SplitStream<WebSocketStream<TcpStream>>>,
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        // Event frames are JSON, which browsers want as text.
        let frame = match std::str::from_utf8(data) {
            Ok(text) => Message::Text(text.to_owned().into()),
            Err(_) => Message::Binary(data.to_vec().into()),
        };
        self.writer
            .lock()
            .await
            .send(frame)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut reader = self.reader.lock().await;
        while let Some(frame) = reader.next().await {
            match frame.map_err(|e| TransportError::Read(e.to_string()))? {
                Message::Text(text) => return Ok(Some(text.as_bytes().to_vec())),
                Message::Binary(bytes) => return Ok(Some(bytes.to_vec())),
                Message::Close(_) => return Ok(None),
                // Pings are answered by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.writer
            .lock()
            .await
            .close()
            .await
            .map_err(|e| TransportError::Closed(e.to_string()))
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }
}
