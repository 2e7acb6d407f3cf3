//! Error taxonomy for connection management.
//!
//! Protocol (decode) errors live with the codec as
//! [`peerchat_core::FrameError`]; they never reach a caller.

use std::io;
use std::net::IpAddr;
use std::time::Duration;

use crate::connection::ConnectionId;

/// A link refused by local policy before any socket work.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("cannot connect to yourself")]
    SelfConnection,
    #[error("maximum of {limit} connections allowed")]
    CapacityExceeded { limit: usize },
    #[error("already connected to {ip}{}", port_suffix(.port))]
    DuplicateConnection { ip: IpAddr, port: Option<u16> },
}

fn port_suffix(port: &Option<u16>) -> String {
    port.map(|p| format!(":{p}")).unwrap_or_default()
}

/// The network said no.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {addr} timed out after {}s", .after.as_secs())]
    ConnectTimeout { addr: String, after: Duration },
    #[error("connection refused by {addr}")]
    ConnectionRefused { addr: String },
    #[error("could not resolve address {host}")]
    AddressUnresolvable { host: String },
    #[error("unable to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Everything `connect` can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("peer is shutting down")]
    ShuttingDown,
}

/// Failures of `send` / `terminate` on an existing link.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("connection {0} does not exist")]
    UnknownConnection(ConnectionId),
    #[error("message cannot exceed {max} characters (got {len})")]
    MessageTooLong { len: usize, max: usize },
    #[error("failed to send message to connection {id}: {source}")]
    SendFailed {
        id: ConnectionId,
        #[source]
        source: io::Error,
    },
}
