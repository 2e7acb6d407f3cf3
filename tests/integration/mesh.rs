use crate::*;

use peerchat_services::Direction;

/// Two peers link up and chat both ways.
#[tokio::test]
async fn test_two_peers_chat_both_ways() -> Result<()> {
    let mut a = spawn_peer().await;
    let mut b = spawn_peer().await;

    let (a_id, on_b) = link(&a, &mut b).await?;
    assert_eq!(on_b.ip, LOCALHOST);
    assert_eq!(on_b.port, a.port(), "inbound side records the announced port");
    assert_eq!(on_b.direction, Direction::Incoming);

    let on_a = a.manager.list().await;
    assert_eq!(on_a.len(), 1);
    assert_eq!(on_a[0].id, a_id);
    assert_eq!(on_a[0].port, b.port());
    assert_eq!(on_a[0].direction, Direction::Outgoing);

    let listed_on_b = b.manager.list().await;
    assert_eq!(listed_on_b.len(), 1);
    assert_eq!(listed_on_b[0].id, on_b.id);
    assert_eq!(listed_on_b[0].port, a.port());
    assert_eq!(listed_on_b[0].direction, Direction::Incoming);

    a.manager.send(a_id, "hello from a").await?;
    match b.next_event().await? {
        PeerEvent::Chat { peer, content } => {
            assert_eq!(peer.id, on_b.id);
            assert_eq!(peer.port, a.port());
            assert_eq!(content, "hello from a");
        }
        other => bail!("expected chat, got {other:?}"),
    }

    b.manager.send(on_b.id, &"z".repeat(100)).await?;
    match a.next_event().await? {
        PeerEvent::Chat { peer, content } => {
            assert_eq!(peer.id, a_id);
            assert_eq!(content.chars().count(), 100);
        }
        other => bail!("expected chat, got {other:?}"),
    }

    a.manager.shutdown().await;
    b.manager.shutdown().await;
    Ok(())
}

/// Terminating on one side is reported as a peer disconnect on the other,
/// and both tables empty out.
#[tokio::test]
async fn test_terminate_reaches_the_other_side() -> Result<()> {
    let a = spawn_peer().await;
    let mut b = spawn_peer().await;
    let (a_id, on_b) = link(&a, &mut b).await?;

    let closed = a.manager.terminate(a_id).await?;
    assert_eq!(closed.map(|info| info.port), Some(b.port()));
    assert!(a.manager.list().await.is_empty());

    match b.next_event().await? {
        PeerEvent::PeerDisconnected(peer) => assert_eq!(peer.id, on_b.id),
        other => bail!("expected peer disconnect, got {other:?}"),
    }
    assert!(b.manager.list().await.is_empty());

    // Second terminate is a no-op.
    assert_eq!(a.manager.terminate(a_id).await?, None);

    a.manager.shutdown().await;
    b.manager.shutdown().await;
    Ok(())
}

/// Shutdown says goodbye to every peer and leaves nothing behind.
#[tokio::test]
async fn test_shutdown_disconnects_every_peer() -> Result<()> {
    let a = spawn_peer().await;
    let mut b = spawn_peer().await;
    let mut c = spawn_peer().await;
    link(&a, &mut b).await?;
    link(&a, &mut c).await?;
    assert_eq!(a.manager.list().await.len(), 2);

    a.manager.shutdown().await;
    assert!(a.manager.list().await.is_empty());

    for peer in [&mut b, &mut c] {
        match peer.next_event().await? {
            PeerEvent::PeerDisconnected(info) => assert_eq!(info.port, a.port()),
            other => bail!("expected peer disconnect, got {other:?}"),
        }
        assert!(peer.manager.list().await.is_empty());
    }

    // The listener is gone too.
    assert!(TcpStream::connect(("127.0.0.1", a.port())).await.is_err());

    b.manager.shutdown().await;
    c.manager.shutdown().await;
    Ok(())
}

/// A peer that vanishes without `disconnect` is reported as lost.
#[tokio::test]
async fn test_abrupt_close_is_reported_as_lost() -> Result<()> {
    let mut a = spawn_peer().await;
    let mut client = RawClient::connect(a.port()).await?;
    client.send(&Message::AnnouncePort { port: 6123 }).await?;

    let info = a.expect_new_connection().await?;
    assert_eq!(info.port, 6123);
    drop(client);

    match a.next_event().await? {
        PeerEvent::ConnectionLost { peer, .. } => assert_eq!(peer.id, info.id),
        other => bail!("expected connection lost, got {other:?}"),
    }
    assert!(a.manager.list().await.is_empty());

    a.manager.shutdown().await;
    Ok(())
}

/// Identities keep counting up after links close.
#[tokio::test]
async fn test_identities_are_not_reused() -> Result<()> {
    let a = spawn_peer().await;
    let mut b = spawn_peer().await;

    let (first, _) = link(&a, &mut b).await?;
    a.manager.terminate(first).await?;
    b.next_event().await?;
    wait_for_links(&b.manager, 0).await?;

    let (second, _) = link(&a, &mut b).await?;
    assert!(second > first);

    a.manager.shutdown().await;
    b.manager.shutdown().await;
    Ok(())
}
