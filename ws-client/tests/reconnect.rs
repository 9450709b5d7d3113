//! Session-lifecycle tests driving the client against a local WebSocket
//! listener: the catch-up handshake after a dropped connection, and
//! teardown while a dial is still in flight.

use events::protocol::{ClientMessage, EventEnvelope, EventPayload, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use ws_client::{ClientEvent, ClientOptions, ConnectionState, EventKind, RealtimeClient};

fn fast_retry_client(addr: std::net::SocketAddr) -> RealtimeClient {
    let mut options = ClientOptions::new(format!("ws://{addr}/ws"));
    options.reconnect_min = Duration::from_millis(50);
    options.reconnect_max = Duration::from_millis(200);
    RealtimeClient::new(options)
}

#[tokio::test]
async fn reconnect_emits_lifecycle_events_and_requests_a_catch_up_sync() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (sync_tx, mut sync_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        // First session: push one sale, then drop the connection.
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        let envelope = EventEnvelope {
            event_id: "sale_abc_1000".to_string(),
            seq: 1,
            timestamp: chrono::Utc::now(),
            payload: EventPayload::SaleCompleted(serde_json::json!({"id": "abc", "amount": 12.5})),
        };
        let text = serde_json::to_string(&ServerMessage::SaleUpdate(envelope)).unwrap();
        socket.send(Message::Text(text)).await.unwrap();
        drop(socket);

        // Second session: forward whatever catch-up request arrives.
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(frame)) = socket.next().await {
            if let Message::Text(text) = frame {
                if let Ok(ClientMessage::RequestSync { last_event_id, .. }) =
                    serde_json::from_str(&text)
                {
                    let _ = sync_tx.send(last_event_id);
                    break;
                }
            }
        }
    });

    let client = fast_retry_client(addr);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let sale_tx = event_tx.clone();
    let _sales = client.on(EventKind::SaleUpdate, move |event| {
        let _ = sale_tx.send(event.clone());
    });
    let _reconnects = client.on(EventKind::Reconnected, move |event| {
        let _ = event_tx.send(event.clone());
    });

    client.connect("token").unwrap();

    // The sale from the first session advances the replay cursor.
    let first = timeout(Duration::from_secs(5), event_rx.recv())
        .await
        .expect("no sale before timeout")
        .unwrap();
    assert!(matches!(first, ClientEvent::Sale(_)));
    assert_eq!(
        client.status().last_event_id.as_deref(),
        Some("sale_abc_1000")
    );

    // The dropped connection is resumed and announced.
    let second = timeout(Duration::from_secs(5), event_rx.recv())
        .await
        .expect("no reconnected event before timeout")
        .unwrap();
    match second {
        ClientEvent::Reconnected { attempts } => assert!(attempts >= 1),
        other => panic!("expected reconnected, got {other:?}"),
    }

    // The resumed session immediately requests a catch-up carrying the
    // high-water mark.
    let cursor = timeout(Duration::from_secs(5), sync_rx.recv())
        .await
        .expect("server never received a sync request")
        .unwrap();
    assert_eq!(cursor.as_deref(), Some("sale_abc_1000"));

    assert!(client.is_connected());
    client.disconnect();
}

#[tokio::test]
async fn disconnect_during_a_dial_leaves_the_client_reconnectable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    // Accept the TCP connection but stall the WebSocket handshake until
    // told otherwise, keeping the client parked inside its dial.
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ = release_rx.await;
        let _ = tokio_tungstenite::accept_async(stream).await;
    });

    let client = fast_retry_client(addr);
    client.connect("token").unwrap();

    // Tear down while the handshake is still pending, then let the dial
    // complete.
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.disconnect();
    let _ = release_tx.send(());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.status().state, ConnectionState::Disconnected);
    assert!(!client.is_connected());

    // A fresh session can be established from scratch.
    client.connect("token").unwrap();
    assert_eq!(client.status().state, ConnectionState::Connecting);
    client.disconnect();
}
