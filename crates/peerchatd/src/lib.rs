//! peerchatd: the peer connection manager.
//!
//! Every running peer is both a server and a client: it accepts inbound
//! links on its listening port and opens outbound ones on request, keeping
//! at most three links alive at once.
//!
//! Architecture:
//!
//!   TcpListener ──accept──> admission task ──handshake──┐
//!                                                       v
//!   connect() ──TcpStream──> announce_port ───> ConnectionRegistry ──> reader task ──> PeerEvents
//!                                                       ^
//!   send() / terminate() / list() / shutdown() ─────────┘

pub mod local_addr;
pub mod manager;
pub mod session;

pub use manager::{PeerManager, StartError};
pub use session::PeerSettings;
