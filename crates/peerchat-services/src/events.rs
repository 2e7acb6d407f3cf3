//! Notification sink: how the connection manager reports what peers do.

use tokio::sync::mpsc;

use crate::connection::ConnectionInfo;

/// Receives link events. Called from listener and reader tasks, so
/// implementations must not block.
pub trait PeerEvents: Send + Sync {
    /// An inbound link passed admission and the handshake.
    fn on_new_connection(&self, peer: &ConnectionInfo);

    /// A chat line arrived.
    fn on_chat(&self, peer: &ConnectionInfo, content: &str);

    /// The peer said `disconnect` and the link is gone.
    fn on_peer_disconnected(&self, peer: &ConnectionInfo);

    /// The link ended without a `disconnect` (EOF or socket error).
    fn on_connection_lost(&self, peer: &ConnectionInfo, reason: &str);

    /// Something went wrong that the user should hear about.
    fn on_error(&self, context: &str, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    NewConnection(ConnectionInfo),
    Chat { peer: ConnectionInfo, content: String },
    PeerDisconnected(ConnectionInfo),
    ConnectionLost { peer: ConnectionInfo, reason: String },
    Error { context: String, message: String },
}

/// Forwards every event into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    tx: mpsc::UnboundedSender<PeerEvent>,
}

/// Create a channel-backed sink and the receiver that drains it.
pub fn channel() -> (ChannelEvents, mpsc::UnboundedReceiver<PeerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelEvents { tx }, rx)
}

impl ChannelEvents {
    fn emit(&self, event: PeerEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl PeerEvents for ChannelEvents {
    fn on_new_connection(&self, peer: &ConnectionInfo) {
        self.emit(PeerEvent::NewConnection(peer.clone()));
    }

    fn on_chat(&self, peer: &ConnectionInfo, content: &str) {
        self.emit(PeerEvent::Chat {
            peer: peer.clone(),
            content: content.to_string(),
        });
    }

    fn on_peer_disconnected(&self, peer: &ConnectionInfo) {
        self.emit(PeerEvent::PeerDisconnected(peer.clone()));
    }

    fn on_connection_lost(&self, peer: &ConnectionInfo, reason: &str) {
        self.emit(PeerEvent::ConnectionLost {
            peer: peer.clone(),
            reason: reason.to_string(),
        });
    }

    fn on_error(&self, context: &str, message: &str) {
        self.emit(PeerEvent::Error {
            context: context.to_string(),
            message: message.to_string(),
        });
    }
}
