//! Outbound link setup.
//!
//! Check capacity, resolve, admit, connect under a timeout, announce our
//! listening port, register, hand off to a reader. A full table refuses
//! before any name lookup. Admission runs again atomically inside
//! `register`.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use peerchat_core::{FrameDecoder, Message};
use peerchat_services::{
    send_message, shared_writer, AdmissionError, ConnectError, ConnectionId, Direction,
    TransportError,
};

use super::SessionContext;

pub async fn initiate(
    ctx: &Arc<SessionContext>,
    host: &str,
    port: u16,
) -> Result<ConnectionId, ConnectError> {
    if ctx.is_shutting_down() {
        return Err(ConnectError::ShuttingDown);
    }

    let capacity = ctx.registry.capacity();
    if ctx.registry.count().await >= capacity {
        return Err(AdmissionError::CapacityExceeded { limit: capacity }.into());
    }

    let ip = resolve(host, port, ctx.settings.connect_timeout).await?;
    if ctx.is_self(ip, port) {
        return Err(AdmissionError::SelfConnection.into());
    }
    ctx.registry.check_admission(ip, Some(port)).await?;

    let addr = SocketAddr::new(ip, port);
    tracing::debug!(%addr, "connecting");
    let stream = connect(addr, ctx.settings.connect_timeout).await?;

    let (read_half, write_half) = stream.into_split();
    let writer = shared_writer(write_half);
    let announce = Message::AnnouncePort { port: ctx.my_port };
    if let Err(source) = send_message(&writer, &announce).await {
        return Err(TransportError::ConnectFailed {
            addr: addr.to_string(),
            source,
        }
        .into());
    }

    let registered = match ctx
        .registry
        .register(ip, port, Direction::Outgoing, writer.clone())
        .await
    {
        Ok(registered) => registered,
        Err(e) => {
            // Lost a race with a concurrent connect or accept.
            let _ = writer.lock().await.shutdown().await;
            return Err(e.into());
        }
    };
    let id = registered.info.id;

    if ctx.is_shutting_down() {
        ctx.registry.remove(id).await;
        return Err(ConnectError::ShuttingDown);
    }

    tracing::info!(conn_id = id, peer = %registered.info, "outbound connection established");
    ctx.spawn_reader(registered, read_half, FrameDecoder::default(), Vec::new())
        .await;
    Ok(id)
}

async fn connect(addr: SocketAddr, within: Duration) -> Result<TcpStream, TransportError> {
    match tokio::time::timeout(within, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
            Err(TransportError::ConnectionRefused {
                addr: addr.to_string(),
            })
        }
        Ok(Err(source)) => Err(TransportError::ConnectFailed {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(TransportError::ConnectTimeout {
            addr: addr.to_string(),
            after: within,
        }),
    }
}

/// Literal addresses pass straight through; names go to the resolver,
/// preferring an IPv4 result.
async fn resolve(host: &str, port: u16, within: Duration) -> Result<IpAddr, TransportError> {
    let host = host.trim();
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip.to_canonical());
    }

    let unresolvable = || TransportError::AddressUnresolvable {
        host: host.to_string(),
    };
    let lookup = tokio::net::lookup_host((host, port));
    let addrs: Vec<SocketAddr> = match tokio::time::timeout(within, lookup).await {
        Ok(Ok(addrs)) => addrs.collect(),
        Ok(Err(e)) => {
            tracing::debug!(host, error = %e, "name resolution failed");
            return Err(unresolvable());
        }
        Err(_) => {
            tracing::debug!(host, "name resolution timed out");
            return Err(unresolvable());
        }
    };

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(|a| a.ip().to_canonical())
        .ok_or_else(unresolvable)
}
