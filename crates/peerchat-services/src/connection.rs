//! Connection records: the state kept for one live peer link.

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};

use peerchat_core::wire::{encode_frame, Message};

/// Process-unique link identity. Assigned by the registry, never reused.
pub type ConnectionId = u64;

/// Which side opened the TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Incoming => f.write_str("incoming"),
            Direction::Outgoing => f.write_str("outgoing"),
        }
    }
}

/// Copy of a record's identifying fields. Safe to hold across awaits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub ip: IpAddr,
    /// The peer's *listening* port.
    pub port: u16,
    pub direction: Direction,
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Bound on a best-effort farewell write to a peer that stopped reading.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Write half of a link, shared between the registry and in-flight sends.
pub type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

pub fn shared_writer<W>(writer: W) -> SharedWriter
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    Arc::new(Mutex::new(Box::new(writer)))
}

/// Encode `message` and write it as one frame.
pub async fn send_message(writer: &SharedWriter, message: &Message) -> io::Result<()> {
    let frame =
        encode_frame(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut w = writer.lock().await;
    w.write_all(&frame).await?;
    w.flush().await
}

/// Fires once the owning record has been removed and closed.
#[derive(Debug, Clone)]
pub struct CloseSignal(watch::Receiver<bool>);

impl CloseSignal {
    /// Resolves when the link is closed locally (or its record dropped).
    pub async fn closed(&mut self) {
        let _ = self.0.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.0.borrow()
    }
}

/// A registered link. Owned by the registry; dropping out of it closes the link.
pub struct ConnectionRecord {
    info: ConnectionInfo,
    writer: SharedWriter,
    closed: watch::Sender<bool>,
}

impl ConnectionRecord {
    pub(crate) fn new(info: ConnectionInfo, writer: SharedWriter) -> (Self, CloseSignal) {
        let (closed, rx) = watch::channel(false);
        (
            Self {
                info,
                writer,
                closed,
            },
            CloseSignal(rx),
        )
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn writer(&self) -> &SharedWriter {
        &self.writer
    }

    /// Best-effort: send `message` before closing. Failures are ignored,
    /// the peer may already be gone.
    pub async fn notify(&self, message: &Message) {
        let send = send_message(&self.writer, message);
        let result = match tokio::time::timeout(NOTIFY_TIMEOUT, send).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "peer not reading")),
        };
        if let Err(e) = result {
            tracing::debug!(
                conn_id = self.info.id,
                peer = %self.info,
                kind = message.kind(),
                error = %e,
                "best-effort send failed"
            );
        }
    }

    /// Shut the write side down and wake the reader. Consumes the record,
    /// so a link can only ever be closed once.
    pub async fn close(self) {
        let _ = self.closed.send(true);
        let mut w = self.writer.lock().await;
        if let Err(e) = w.shutdown().await {
            tracing::debug!(conn_id = self.info.id, error = %e, "socket shutdown failed");
        }
        tracing::debug!(conn_id = self.info.id, peer = %self.info, "connection closed");
    }
}
