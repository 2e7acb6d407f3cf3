//! Local address discovery for `myip`.

use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Any routable address works: connecting a UDP socket sends nothing, it
/// only makes the kernel pick the outbound interface.
const ROUTE_TARGET: &str = "8.8.8.8:80";

/// The address of the interface that carries outbound traffic, or
/// 127.0.0.1 when there is no route.
pub fn detect_local_ip() -> IpAddr {
    match outbound_route_ip() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => {
            tracing::warn!("route lookup returned no address, using loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not determine local address, using loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

fn outbound_route_ip() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(ROUTE_TARGET)?;
    Ok(socket.local_addr()?.ip())
}
