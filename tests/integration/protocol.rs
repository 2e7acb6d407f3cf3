use crate::*;

use peerchat_services::OperationError;
use tokio::net::TcpListener;

/// The connecting side's first frame announces its listening port.
#[tokio::test]
async fn test_outbound_link_announces_listening_port() -> Result<()> {
    let a = spawn_peer().await;
    let target = TcpListener::bind("127.0.0.1:0").await?;
    let target_port = target.local_addr()?.port();

    let id = a.manager.connect("127.0.0.1", target_port).await?;
    let (stream, _) = target.accept().await?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    assert_eq!(
        decode_frame(line.as_bytes())?,
        Message::AnnouncePort { port: a.port() }
    );

    let listed = a.manager.list().await;
    assert_eq!(listed.len(), 1);
    assert_eq!((listed[0].id, listed[0].port), (id, target_port));

    a.manager.shutdown().await;
    Ok(())
}

/// Without an announcement the source port is recorded once the
/// handshake window closes.
#[tokio::test]
async fn test_silent_peer_falls_back_to_source_port() -> Result<()> {
    let mut a = spawn_peer().await;
    let client = RawClient::connect(a.port()).await?;

    let info = a.expect_new_connection().await?;
    assert_eq!(info.port, client.local_addr.port());

    a.manager.shutdown().await;
    Ok(())
}

/// A chat sent in place of the announcement is still delivered.
#[tokio::test]
async fn test_chat_before_announcement_is_delivered() -> Result<()> {
    let mut a = spawn_peer().await;
    let mut client = RawClient::connect(a.port()).await?;
    client.send(&Message::chat("too eager")).await?;

    let info = a.expect_new_connection().await?;
    assert_eq!(info.port, client.local_addr.port());
    match a.next_event().await? {
        PeerEvent::Chat { content, .. } => assert_eq!(content, "too eager"),
        other => bail!("expected chat, got {other:?}"),
    }

    a.manager.shutdown().await;
    Ok(())
}

/// Announcement and chat coalesced into a single segment both count.
#[tokio::test]
async fn test_coalesced_handshake_and_chat() -> Result<()> {
    let mut a = spawn_peer().await;
    let mut client = RawClient::connect(a.port()).await?;
    let mut bytes = encode_frame(&Message::AnnouncePort { port: 6500 })?;
    bytes.extend(encode_frame(&Message::chat("right behind"))?);
    client.send_raw(&bytes).await?;

    assert_eq!(a.expect_new_connection().await?.port, 6500);
    match a.next_event().await? {
        PeerEvent::Chat { content, .. } => assert_eq!(content, "right behind"),
        other => bail!("expected chat, got {other:?}"),
    }

    a.manager.shutdown().await;
    Ok(())
}

/// Garbage on an established link is skipped; the link survives.
#[tokio::test]
async fn test_malformed_frames_do_not_kill_the_link() -> Result<()> {
    let mut a = spawn_peer().await;
    let mut client = RawClient::connect(a.port()).await?;
    client.send(&Message::AnnouncePort { port: 6600 }).await?;
    let info = a.expect_new_connection().await?;

    client.send_raw(b"this is not json\n").await?;
    client.send_raw(b"{\"type\":\"teleport\"}\n").await?;
    let overlong = format!("{{\"type\":\"chat\",\"content\":\"{}\"}}\n", "x".repeat(101));
    client.send_raw(overlong.as_bytes()).await?;
    client.send_raw(&vec![b'y'; 8 * 1024]).await?;
    client.send_raw(b"\n").await?;
    client.send(&Message::chat("still here")).await?;

    match a.next_event().await? {
        PeerEvent::Chat { peer, content } => {
            assert_eq!(peer.id, info.id);
            assert_eq!(content, "still here");
        }
        other => bail!("expected chat, got {other:?}"),
    }
    assert_eq!(a.manager.list().await.len(), 1);

    a.manager.shutdown().await;
    Ok(())
}

/// An `error` frame is surfaced without closing; a late announcement is
/// ignored; `disconnect` ends the link.
#[tokio::test]
async fn test_error_late_announce_and_disconnect() -> Result<()> {
    let mut a = spawn_peer().await;
    let mut client = RawClient::connect(a.port()).await?;
    client.send(&Message::AnnouncePort { port: 6700 }).await?;
    let info = a.expect_new_connection().await?;

    client.send(&Message::error("something broke")).await?;
    match a.next_event().await? {
        PeerEvent::Error { message, .. } => assert_eq!(message, "something broke"),
        other => bail!("expected error, got {other:?}"),
    }

    client.send(&Message::AnnouncePort { port: 9999 }).await?;
    client.send(&Message::chat("ping")).await?;
    match a.next_event().await? {
        PeerEvent::Chat { peer, .. } => assert_eq!(peer.port, 6700),
        other => bail!("expected chat, got {other:?}"),
    }

    client.send(&Message::Disconnect).await?;
    match a.next_event().await? {
        PeerEvent::PeerDisconnected(peer) => assert_eq!(peer.id, info.id),
        other => bail!("expected peer disconnect, got {other:?}"),
    }
    assert!(a.manager.list().await.is_empty());
    assert_eq!(client.recv().await?, None);

    a.manager.shutdown().await;
    Ok(())
}

/// Once the peer is gone and the link reported lost, its identity is
/// no longer sendable.
#[tokio::test]
async fn test_send_to_vanished_peer() -> Result<()> {
    let mut a = spawn_peer().await;
    let mut client = RawClient::connect(a.port()).await?;
    client.send(&Message::AnnouncePort { port: 6800 }).await?;
    let info = a.expect_new_connection().await?;

    a.manager.send(info.id, "first").await?;
    assert_eq!(client.recv().await?, Some(Message::chat("first")));
    drop(client);

    match a.next_event().await? {
        PeerEvent::ConnectionLost { peer, .. } => assert_eq!(peer.id, info.id),
        other => bail!("expected connection lost, got {other:?}"),
    }
    let err = a.manager.send(info.id, "second").await.unwrap_err();
    assert!(matches!(err, OperationError::UnknownConnection(id) if id == info.id), "got {err}");

    a.manager.shutdown().await;
    Ok(())
}
