//! Inbound link listener.
//!
//! Each accepted socket gets its own admission task: duplicate and capacity
//! pre-check, then a bounded wait for the peer's `announce_port`, then
//! registration and hand-off to a reader.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::Instant;

use peerchat_core::{FrameDecoder, Message};
use peerchat_services::{send_message, shared_writer, AdmissionError, Direction, SharedWriter};

use super::SessionContext;

const READ_CHUNK: usize = 1024;

/// Pause after a failed accept so a persistent error cannot spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct SessionListener {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    shutdown: broadcast::Receiver<()>,
}

impl SessionListener {
    pub fn new(
        listener: TcpListener,
        ctx: Arc<SessionContext>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            ctx,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(port = self.ctx.my_port, "listening for peers");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("session listener shutting down");
                    return;
                }

                result = self.listener.accept() => {
                    let (stream, peer_addr) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            if self.ctx.is_shutting_down() {
                                return;
                            }
                            tracing::warn!(error = %e, "accept failed");
                            self.ctx.events.on_error("accept", &e.to_string());
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };

                    tracing::debug!(%peer_addr, "accepted socket");
                    let ctx = Arc::clone(&self.ctx);
                    self.ctx.tasks.spawn(admit(ctx, stream, peer_addr)).await;
                }
            }
        }
    }
}

/// What the peer sent before the handshake window closed.
struct Handshake {
    announced_port: Option<u16>,
    decoder: FrameDecoder,
    /// Frames that arrived with (or instead of) the announcement.
    backlog: Vec<Message>,
    /// The socket ended or failed while we waited.
    ended: bool,
}

async fn admit(ctx: Arc<SessionContext>, stream: TcpStream, peer_addr: SocketAddr) {
    let ip = peer_addr.ip().to_canonical();
    let (mut read_half, write_half) = stream.into_split();
    let writer = shared_writer(write_half);

    if ctx.is_shutting_down() {
        refuse(&ctx, &writer, &mut read_half, "peer is shutting down").await;
        return;
    }

    // Inbound duplicates collide on IP alone, so this is decidable before
    // the handshake.
    if let Err(e) = ctx.registry.check_admission(ip, None).await {
        tracing::info!(%peer_addr, reason = %e, "rejecting inbound connection");
        refuse(&ctx, &writer, &mut read_half, refusal_text(&e)).await;
        return;
    }

    let handshake = await_announcement(&mut read_half, ctx.settings.handshake_timeout).await;
    if handshake.ended {
        tracing::debug!(%peer_addr, "peer left during handshake");
        return;
    }
    let port = match handshake.announced_port {
        Some(port) => port,
        None => {
            tracing::debug!(%peer_addr, "no port announcement, using source port");
            peer_addr.port()
        }
    };

    if ctx.is_shutting_down() {
        refuse(&ctx, &writer, &mut read_half, "peer is shutting down").await;
        return;
    }

    let registered = match ctx
        .registry
        .register(ip, port, Direction::Incoming, writer.clone())
        .await
    {
        Ok(registered) => registered,
        Err(e) => {
            tracing::info!(%peer_addr, reason = %e, "rejecting inbound connection");
            refuse(&ctx, &writer, &mut read_half, refusal_text(&e)).await;
            return;
        }
    };

    tracing::info!(
        conn_id = registered.info.id,
        peer = %registered.info,
        "inbound connection established"
    );
    ctx.events.on_new_connection(&registered.info);
    ctx.spawn_reader(registered, read_half, handshake.decoder, handshake.backlog)
        .await;
}

/// Read until the first complete frame or until `window` runs out.
async fn await_announcement(read_half: &mut OwnedReadHalf, window: Duration) -> Handshake {
    let mut handshake = Handshake {
        announced_port: None,
        decoder: FrameDecoder::default(),
        backlog: Vec::new(),
        ended: false,
    };
    let deadline = Instant::now() + window;
    let mut buf = [0u8; READ_CHUNK];

    loop {
        let n = match tokio::time::timeout_at(deadline, read_half.read(&mut buf)).await {
            Err(_) => return handshake,
            Ok(Ok(0)) | Ok(Err(_)) => {
                handshake.ended = true;
                return handshake;
            }
            Ok(Ok(n)) => n,
        };

        let frames = handshake.decoder.push_chunk(&buf[..n]);
        if frames.is_empty() {
            continue;
        }
        for (index, frame) in frames.into_iter().enumerate() {
            match frame {
                Ok(Message::AnnouncePort { port }) if index == 0 => {
                    handshake.announced_port = Some(port);
                }
                Ok(message) => handshake.backlog.push(message),
                Err(e) => tracing::debug!(error = %e, "undecodable handshake frame"),
            }
        }
        return handshake;
    }
}

fn refusal_text(err: &AdmissionError) -> &'static str {
    match err {
        AdmissionError::DuplicateConnection { .. } => "Duplicate connection rejected",
        AdmissionError::CapacityExceeded { .. } => "Connection limit reached",
        AdmissionError::SelfConnection => "Cannot connect to yourself",
    }
}

/// Tell the peer why, close our side, and wait briefly for theirs so the
/// explanation is not lost to a reset.
async fn refuse(
    ctx: &SessionContext,
    writer: &SharedWriter,
    read_half: &mut OwnedReadHalf,
    reason: &str,
) {
    if let Err(e) = send_message(writer, &Message::error(reason)).await {
        tracing::debug!(error = %e, "failed to send refusal");
    }
    let _ = writer.lock().await.shutdown().await;

    let drain = async {
        let mut buf = [0u8; READ_CHUNK];
        while let Ok(n) = read_half.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    };
    let _ = tokio::time::timeout(ctx.settings.handshake_timeout, drain).await;
}
