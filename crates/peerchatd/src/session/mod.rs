//! Session layer: everything that touches a peer socket.
//!
//! `listener` admits inbound links, `initiator` opens outbound ones, and
//! `reader` owns the receive side of each registered link until it ends.

pub mod initiator;
pub mod listener;
pub mod reader;

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use peerchat_core::config::NetworkConfig;
use peerchat_core::{FrameDecoder, Message};
use peerchat_services::registry::Registered;
use peerchat_services::{ConnectionRegistry, PeerEvents};

/// Runtime settings for one peer.
#[derive(Debug, Clone)]
pub struct PeerSettings {
    /// Where the listener binds. Port 0 asks the OS for one.
    pub listen_addr: SocketAddr,
    /// Address reported as ours.
    pub advertise_ip: IpAddr,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl PeerSettings {
    pub fn from_config(network: &NetworkConfig, port: u16, advertise_ip: IpAddr) -> Self {
        Self {
            listen_addr: SocketAddr::new(network.bind_addr, port),
            advertise_ip,
            connect_timeout: network.connect_timeout(),
            handshake_timeout: network.handshake_timeout(),
        }
    }
}

// ── Supervisor ────────────────────────────────────────────────────────────────

/// Owns every per-link task so shutdown can wait for them.
#[derive(Default)]
pub struct Supervisor {
    tasks: Mutex<JoinSet<()>>,
}

impl Supervisor {
    pub async fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        // Reap whatever already finished.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Wait until no task is left, including ones spawned while waiting.
    pub async fn join_all(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
            if tasks.is_empty() {
                return;
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        tracing::error!(error = %e, "connection task panicked");
                    }
                }
            }
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

// ── Shared context ────────────────────────────────────────────────────────────

/// State shared by the manager and every session task.
pub struct SessionContext {
    pub settings: PeerSettings,
    /// The port the listener actually bound.
    pub my_port: u16,
    pub registry: ConnectionRegistry,
    pub events: Arc<dyn PeerEvents>,
    pub tasks: Supervisor,
    shutting_down: AtomicBool,
}

impl SessionContext {
    pub fn new(
        settings: PeerSettings,
        my_port: u16,
        registry: ConnectionRegistry,
        events: Arc<dyn PeerEvents>,
    ) -> Self {
        Self {
            settings,
            my_port,
            registry,
            events,
            tasks: Supervisor::default(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn my_ip(&self) -> IpAddr {
        self.settings.advertise_ip
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Flag shutdown. Returns `true` only for the first caller.
    pub fn begin_shutdown(&self) -> bool {
        !self.shutting_down.swap(true, Ordering::SeqCst)
    }

    /// Would `ip:port` reach our own listener?
    pub fn is_self(&self, ip: IpAddr, port: u16) -> bool {
        port == self.my_port
            && (ip == self.my_ip()
                || ip == self.settings.listen_addr.ip()
                || ip.is_loopback()
                || ip.is_unspecified())
    }

    /// Hand a freshly registered link to its reader task.
    pub async fn spawn_reader(
        self: &Arc<Self>,
        registered: Registered,
        read_half: OwnedReadHalf,
        decoder: FrameDecoder,
        backlog: Vec<Message>,
    ) {
        let task = reader::read_loop(
            Arc::clone(self),
            registered.info.id,
            read_half,
            decoder,
            backlog,
            registered.close,
        );
        self.tasks.spawn(task).await;
    }
}
