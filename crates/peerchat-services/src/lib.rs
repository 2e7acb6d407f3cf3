//! peerchat-services: per-link state, the connection registry, the
//! notification sink and the error taxonomy shared by the daemon.

pub mod connection;
pub mod error;
pub mod events;
pub mod registry;

pub use connection::{
    send_message, shared_writer, CloseSignal, ConnectionId, ConnectionInfo, ConnectionRecord,
    Direction, SharedWriter,
};
pub use error::{AdmissionError, ConnectError, OperationError, TransportError};
pub use events::{ChannelEvents, PeerEvent, PeerEvents};
pub use registry::{ConnectionRegistry, Registered};
