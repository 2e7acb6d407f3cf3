use crate::*;

use peerchat_services::{AdmissionError, ConnectError, TransportError};

fn loopback(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, last))
}

/// Three outbound links fill the table; the fourth is refused before any
/// socket is opened.
#[tokio::test]
async fn test_outbound_capacity_limit() -> Result<()> {
    let a = spawn_peer().await;
    let mut others = Vec::new();
    for _ in 0..3 {
        let mut peer = spawn_peer().await;
        link(&a, &mut peer).await?;
        others.push(peer);
    }

    let mut fourth = spawn_peer().await;
    let err = a.manager.connect("127.0.0.1", fourth.port()).await.unwrap_err();
    assert!(
        matches!(err, ConnectError::Admission(AdmissionError::CapacityExceeded { limit: 3 })),
        "got {err}"
    );
    fourth.expect_silence(Duration::from_millis(300)).await?;
    assert_eq!(a.manager.list().await.len(), 3);

    a.manager.shutdown().await;
    for peer in others {
        peer.manager.shutdown().await;
    }
    fourth.manager.shutdown().await;
    Ok(())
}

/// A full peer refuses inbound links with an explanation.
#[tokio::test]
async fn test_inbound_capacity_limit() -> Result<()> {
    let mut a = spawn_peer().await;

    let mut clients = Vec::new();
    for n in 2..=4 {
        let mut client = RawClient::connect_from(loopback(n), a.port()).await?;
        client.send(&Message::AnnouncePort { port: 7000 + u16::from(n) }).await?;
        a.expect_new_connection().await?;
        clients.push(client);
    }

    let mut extra = RawClient::connect_from(loopback(5), a.port()).await?;
    extra.send(&Message::AnnouncePort { port: 7005 }).await?;
    assert_eq!(
        extra.recv().await?,
        Some(Message::error("Connection limit reached"))
    );
    assert_eq!(extra.recv().await?, None);

    a.expect_silence(Duration::from_millis(200)).await?;
    assert_eq!(a.manager.list().await.len(), 3);

    a.manager.shutdown().await;
    for mut client in clients {
        assert_eq!(client.recv().await?, Some(Message::Disconnect));
    }
    Ok(())
}

/// Outbound duplicates are matched on IP and port.
#[tokio::test]
async fn test_outbound_duplicate_is_refused() -> Result<()> {
    let a = spawn_peer().await;
    let mut b = spawn_peer().await;
    link(&a, &mut b).await?;

    let err = a.manager.connect("127.0.0.1", b.port()).await.unwrap_err();
    assert!(
        matches!(
            err,
            ConnectError::Admission(AdmissionError::DuplicateConnection { port: Some(p), .. })
                if p == b.port()
        ),
        "got {err}"
    );
    // Same host by name resolves to the same link.
    let err = a.manager.connect("localhost", b.port()).await.unwrap_err();
    assert!(matches!(err, ConnectError::Admission(AdmissionError::DuplicateConnection { .. })));
    assert_eq!(a.manager.list().await.len(), 1);

    a.manager.shutdown().await;
    b.manager.shutdown().await;
    Ok(())
}

/// Inbound duplicates are matched on IP alone: a second peer on the same
/// host is refused even though it listens on another port.
#[tokio::test]
async fn test_inbound_duplicate_is_refused_by_ip() -> Result<()> {
    let mut a = spawn_peer().await;
    let b = spawn_peer().await;
    let mut c = spawn_peer().await;

    b.manager.connect("127.0.0.1", a.port()).await?;
    a.expect_new_connection().await?;

    // C cannot tell in advance; the refusal arrives over the wire.
    let c_id = c.manager.connect("127.0.0.1", a.port()).await?;
    match c.next_event().await? {
        PeerEvent::Error { message, .. } => assert_eq!(message, "Duplicate connection rejected"),
        other => bail!("expected refusal, got {other:?}"),
    }
    match c.next_event().await? {
        PeerEvent::ConnectionLost { peer, .. } => assert_eq!(peer.id, c_id),
        other => bail!("expected connection lost, got {other:?}"),
    }

    a.expect_silence(Duration::from_millis(200)).await?;
    assert_eq!(a.manager.list().await.len(), 1);
    wait_for_links(&c.manager, 0).await?;

    a.manager.shutdown().await;
    b.manager.shutdown().await;
    c.manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_self_connection_is_refused() -> Result<()> {
    let mut a = spawn_peer().await;
    for host in ["127.0.0.1", "localhost"] {
        let err = a.manager.connect(host, a.port()).await.unwrap_err();
        assert!(
            matches!(err, ConnectError::Admission(AdmissionError::SelfConnection)),
            "{host}: {err}"
        );
    }
    a.expect_silence(Duration::from_millis(200)).await?;
    a.manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_connect_to_closed_port_is_refused() -> Result<()> {
    let a = spawn_peer().await;
    let b = spawn_peer().await;
    let port = b.port();
    b.manager.shutdown().await;

    let err = a.manager.connect("127.0.0.1", port).await.unwrap_err();
    assert!(
        matches!(err, ConnectError::Transport(TransportError::ConnectionRefused { .. })),
        "got {err}"
    );
    assert!(a.manager.list().await.is_empty());
    a.manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unresolvable_host() -> Result<()> {
    let a = spawn_peer().await;
    let err = a.manager.connect("no such host", 4545).await.unwrap_err();
    assert!(
        matches!(err, ConnectError::Transport(TransportError::AddressUnresolvable { .. })),
        "got {err}"
    );
    a.manager.shutdown().await;
    Ok(())
}

/// A full table refuses before the host name is even looked up.
#[tokio::test]
async fn test_capacity_checked_before_name_resolution() -> Result<()> {
    let a = spawn_peer().await;
    let mut others = Vec::new();
    for _ in 0..3 {
        let mut peer = spawn_peer().await;
        link(&a, &mut peer).await?;
        others.push(peer);
    }

    let err = a.manager.connect("no such host", 4545).await.unwrap_err();
    assert!(
        matches!(err, ConnectError::Admission(AdmissionError::CapacityExceeded { limit: 3 })),
        "got {err}"
    );
    assert_eq!(a.manager.list().await.len(), 3);

    a.manager.shutdown().await;
    for peer in others {
        peer.manager.shutdown().await;
    }
    Ok(())
}
