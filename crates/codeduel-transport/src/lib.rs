//! The channel a client holds open to the matchmaking core.
//!
//! [`Transport`] hands out accepted channels and [`Connection`] moves
//! frames over one of them. Nothing here knows about events or identities;
//! a channel only carries bytes and, optionally, the credential it was
//! opened with.
//!
//! # Feature Flags
//!
//! - `websocket` (default): [`WebSocketTransport`] on `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;

/// Identifies one accepted channel for its whole life.
///
/// Ids are never reused, so when a user reconnects the registry can tell
/// the replacement channel from the one it superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Source of new client channels.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next client and completes its upgrade.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;
}

/// One open client channel.
///
/// [`send`](Connection::send) and [`recv`](Connection::recv) use separate
/// halves: a writer task may push frames while the handler is parked in
/// `recv`.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    /// Writes one frame.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Reads the next data frame. `Ok(None)` means the peer closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    async fn close(&self) -> Result<(), Self::Error>;

    fn id(&self) -> ConnectionId;

    /// Credential presented while the channel was opened, passed through
    /// uninterpreted. For WebSocket it is the `token` query parameter.
    fn credential(&self) -> Option<&str> {
        None
    }
}

/// Value of `name` in a URL query string such as `a=1&token=xyz`.
///
/// `+` becomes a space and `%XX` escapes are decoded; a malformed escape
/// is kept as written. Missing and empty parameters both yield `None`.
pub fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| percent_decode(value))
        .filter(|value| !value.is_empty())
}

fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(b) => {
                        out.push(b);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
