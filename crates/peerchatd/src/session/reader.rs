//! Per-link receive loop.
//!
//! One task per registered link. It ends when the peer says `disconnect`,
//! when the socket ends or fails, or when the link is closed locally. In
//! every case the record is removed exactly once, here.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;

use peerchat_core::{FrameDecoder, Message};
use peerchat_services::{CloseSignal, ConnectionId};

use super::SessionContext;

const READ_CHUNK: usize = 1024;

#[derive(Debug)]
enum Exit {
    /// Terminated or shut down on our side.
    Local,
    PeerDisconnected,
    Lost(String),
}

pub async fn read_loop(
    ctx: Arc<SessionContext>,
    id: ConnectionId,
    mut read_half: OwnedReadHalf,
    mut decoder: FrameDecoder,
    backlog: Vec<Message>,
    mut close: CloseSignal,
) {
    let exit = receive(&ctx, id, &mut read_half, &mut decoder, backlog, &mut close).await;

    // Whoever removes the record owns the notification. If it is already
    // gone, the link was closed locally and the user asked for that.
    let Some(info) = ctx.registry.remove(id).await else {
        tracing::debug!(conn_id = id, ?exit, "reader stopped after local close");
        return;
    };

    match exit {
        Exit::Local => {
            tracing::debug!(conn_id = id, peer = %info, "reader stopped");
        }
        Exit::PeerDisconnected => {
            tracing::info!(conn_id = id, peer = %info, "peer disconnected");
            ctx.events.on_peer_disconnected(&info);
        }
        Exit::Lost(reason) => {
            tracing::info!(conn_id = id, peer = %info, %reason, "connection lost");
            ctx.events.on_connection_lost(&info, &reason);
        }
    }
}

async fn receive(
    ctx: &SessionContext,
    id: ConnectionId,
    read_half: &mut OwnedReadHalf,
    decoder: &mut FrameDecoder,
    backlog: Vec<Message>,
    close: &mut CloseSignal,
) -> Exit {
    for message in backlog {
        if let Some(exit) = dispatch(ctx, id, message).await {
            return exit;
        }
    }

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = tokio::select! {
            biased;

            _ = close.closed() => return Exit::Local,

            result = read_half.read(&mut buf) => match result {
                Ok(0) => return Exit::Lost("peer closed the connection".to_string()),
                Ok(n) => n,
                Err(e) => return Exit::Lost(e.to_string()),
            },
        };

        for frame in decoder.push_chunk(&buf[..n]) {
            match frame {
                Ok(message) => {
                    if let Some(exit) = dispatch(ctx, id, message).await {
                        return exit;
                    }
                }
                Err(e) => {
                    tracing::warn!(conn_id = id, error = %e, "discarding undecodable frame");
                }
            }
        }
    }
}

/// Act on one message. `Some` ends the loop.
async fn dispatch(ctx: &SessionContext, id: ConnectionId, message: Message) -> Option<Exit> {
    // Peer details are looked up fresh: the link may have been terminated
    // while this frame was in flight.
    let Some(info) = ctx.registry.lookup(id).await else {
        return Some(Exit::Local);
    };

    match message {
        Message::Chat { content } => {
            tracing::debug!(conn_id = id, chars = content.chars().count(), "chat received");
            ctx.events.on_chat(&info, &content);
            None
        }
        Message::Disconnect => Some(Exit::PeerDisconnected),
        Message::Error { message } => {
            tracing::info!(conn_id = id, peer = %info, %message, "peer reported an error");
            ctx.events.on_error(&format!("peer {info}"), &message);
            None
        }
        Message::AnnouncePort { port } => {
            tracing::debug!(conn_id = id, port, "ignoring late port announcement");
            None
        }
    }
}
