//! The peer connection manager: the public face of a running peer.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use peerchat_core::wire::MAX_CHAT_CHARS;
use peerchat_core::Message;
use peerchat_services::{
    send_message, ConnectError, ConnectionId, ConnectionInfo, ConnectionRegistry,
    OperationError, PeerEvents,
};

use crate::session::listener::SessionListener;
use crate::session::{initiator, PeerSettings, SessionContext};

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

pub struct PeerManager {
    ctx: Arc<SessionContext>,
    shutdown_tx: broadcast::Sender<()>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl PeerManager {
    /// Bind the listener and start accepting peers.
    pub async fn start(
        settings: PeerSettings,
        events: Arc<dyn PeerEvents>,
    ) -> Result<Self, StartError> {
        Self::start_with_registry(settings, events, ConnectionRegistry::new()).await
    }

    pub async fn start_with_registry(
        settings: PeerSettings,
        events: Arc<dyn PeerEvents>,
        registry: ConnectionRegistry,
    ) -> Result<Self, StartError> {
        let addr = settings.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| StartError::Bind { addr, source })?;
        let my_port = listener
            .local_addr()
            .map_err(|source| StartError::Bind { addr, source })?
            .port();

        let ctx = Arc::new(SessionContext::new(settings, my_port, registry, events));
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let listener_task = tokio::spawn(
            SessionListener::new(listener, Arc::clone(&ctx), shutdown_tx.subscribe()).run(),
        );

        tracing::info!(port = my_port, ip = %ctx.my_ip(), "peer manager started");
        Ok(Self {
            ctx,
            shutdown_tx,
            listener_task: Mutex::new(Some(listener_task)),
        })
    }

    pub fn my_ip(&self) -> IpAddr {
        self.ctx.my_ip()
    }

    pub fn my_port(&self) -> u16 {
        self.ctx.my_port
    }

    /// Open a link to `host:port`. Returns the new identity.
    pub async fn connect(&self, host: &str, port: u16) -> Result<ConnectionId, ConnectError> {
        initiator::initiate(&self.ctx, host, port).await
    }

    /// Send one chat line. A failed write drops the link.
    pub async fn send(&self, id: ConnectionId, text: &str) -> Result<(), OperationError> {
        let len = text.chars().count();
        if len > MAX_CHAT_CHARS {
            return Err(OperationError::MessageTooLong {
                len,
                max: MAX_CHAT_CHARS,
            });
        }

        let (info, writer) = self
            .ctx
            .registry
            .writer(id)
            .await
            .ok_or(OperationError::UnknownConnection(id))?;

        if let Err(source) = send_message(&writer, &Message::chat(text)).await {
            tracing::warn!(
                conn_id = id,
                peer = %info,
                error = %source,
                "send failed, dropping link"
            );
            self.ctx.registry.remove(id).await;
            return Err(OperationError::SendFailed { id, source });
        }
        tracing::debug!(conn_id = id, peer = %info, "chat sent");
        Ok(())
    }

    /// Say goodbye and close a link.
    ///
    /// `Ok(Some(_))` when this call closed it, `Ok(None)` when it was
    /// already gone, `UnknownConnection` when the identity was never issued.
    pub async fn terminate(
        &self,
        id: ConnectionId,
    ) -> Result<Option<ConnectionInfo>, OperationError> {
        let registry = &self.ctx.registry;
        let Some((info, writer)) = registry.writer(id).await else {
            return if registry.was_assigned(id).await {
                Ok(None)
            } else {
                Err(OperationError::UnknownConnection(id))
            };
        };

        if let Err(e) = send_message(&writer, &Message::Disconnect).await {
            tracing::debug!(conn_id = id, error = %e, "disconnect notice not delivered");
        }
        let removed = registry.remove(id).await;
        if removed.is_some() {
            tracing::info!(conn_id = id, peer = %info, "connection terminated");
        }
        Ok(removed)
    }

    /// Live links, ordered by identity.
    pub async fn list(&self) -> Vec<ConnectionInfo> {
        self.ctx.registry.list().await
    }

    /// Close every link, stop listening and wait for all connection tasks.
    /// Later calls return immediately.
    pub async fn shutdown(&self) {
        if !self.ctx.begin_shutdown() {
            return;
        }
        tracing::info!("shutting down peer manager");

        self.close_all().await;

        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.listener_task.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "listener task failed");
            }
        }

        self.ctx.tasks.join_all().await;
        // Anything that slipped through admission while we waited.
        self.close_all().await;
        tracing::info!("peer manager stopped");
    }

    async fn close_all(&self) {
        for record in self.ctx.registry.drain().await {
            record.notify(&Message::Disconnect).await;
            record.close().await;
        }
    }
}

impl Drop for PeerManager {
    fn drop(&mut self) {
        // Stop accepting if the owner never called shutdown.
        let _ = self.shutdown_tx.send(());
    }
}
