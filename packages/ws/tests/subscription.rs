//! Integration tests for the multiplexed subscription client against an
//! in-process websocket server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use modelboard_models::ResourceType;
use modelboard_ws::models::{ActionKind, OutboundMessage, SubscriptionAction};
use modelboard_ws::{ConnectWsError, SubscriptionClient};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("ws://{addr}/ws/v1/subscription/resource"))
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    accept_async(stream).await.unwrap()
}

/// Reads frames until the next `data` frame, skipping heartbeats.
async fn next_data_frame(server: &mut WebSocketStream<TcpStream>) -> SubscriptionAction {
    loop {
        let message = timeout(Duration::from_secs(5), server.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = message {
            match serde_json::from_str::<OutboundMessage>(text.as_str()).unwrap() {
                OutboundMessage::Data { payload } => return payload,
                OutboundMessage::Heartbeat => {}
            }
        }
    }
}

fn event_frame(resource_type: &str, payload: serde_json::Value) -> Message {
    Message::Text(
        json!({
            "type": "success",
            "message": "",
            "payload": { "resource_type": resource_type, "payload": payload }
        })
        .to_string()
        .into(),
    )
}

#[test_log::test(tokio::test)]
async fn replays_subscriptions_on_connect_and_reconnect() {
    let (listener, url) = bind().await;
    let (client, handle) = SubscriptionClient::new(url);
    let client = client.with_reconnect_delay(Duration::from_millis(50));

    handle
        .subscribe(
            ResourceType::ModelVersion,
            vec!["a".to_string(), "b".to_string()],
            |_| {},
        )
        .unwrap();

    let task = tokio::spawn(async move { client.start().await });

    let mut server = accept(&listener).await;
    let action = next_data_frame(&mut server).await;
    assert_eq!(action.action, ActionKind::Subscribe);
    assert_eq!(action.resource_type, ResourceType::ModelVersion);
    assert_eq!(action.resource_uids, vec!["a", "b"]);

    // Kill the connection; the client must reconnect and replay.
    drop(server);

    let mut server = accept(&listener).await;
    let action = next_data_frame(&mut server).await;
    assert_eq!(action.action, ActionKind::Subscribe);
    assert_eq!(action.resource_uids, vec!["a", "b"]);

    handle.close();
    timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn replay_omits_unsubscribed_entries() {
    let (listener, url) = bind().await;
    let (client, handle) = SubscriptionClient::new(url);
    let client = client.with_reconnect_delay(Duration::from_millis(50));

    let first = handle
        .subscribe(ResourceType::ModelVersion, vec!["a".to_string()], |_| {})
        .unwrap();
    handle
        .subscribe(ResourceType::Deployment, vec!["d1".to_string()], |_| {})
        .unwrap();
    handle.unsubscribe(first).unwrap();

    let task = tokio::spawn(async move { client.start().await });

    let mut server = accept(&listener).await;
    let action = next_data_frame(&mut server).await;
    assert_eq!(action.action, ActionKind::Subscribe);
    assert_eq!(action.resource_type, ResourceType::Deployment);
    assert_eq!(action.resource_uids, vec!["d1"]);

    handle.close();
    timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn unsubscribe_sends_only_orphaned_uids() {
    let (listener, url) = bind().await;
    let (client, handle) = SubscriptionClient::new(url);

    let first = handle
        .subscribe(
            ResourceType::ModelVersion,
            vec!["a".to_string(), "b".to_string()],
            |_| {},
        )
        .unwrap();
    handle
        .subscribe(
            ResourceType::ModelVersion,
            vec!["b".to_string(), "c".to_string()],
            |_| {},
        )
        .unwrap();

    let task = tokio::spawn(async move { client.start().await });

    let mut server = accept(&listener).await;
    let replayed_first = next_data_frame(&mut server).await;
    let replayed_second = next_data_frame(&mut server).await;
    assert_eq!(replayed_first.resource_uids, vec!["a", "b"]);
    assert_eq!(replayed_second.resource_uids, vec!["b", "c"]);

    handle.unsubscribe(first).unwrap();

    // "b" is still wanted by the second entry; only "a" goes out.
    let action = next_data_frame(&mut server).await;
    assert_eq!(action.action, ActionKind::Unsubscribe);
    assert_eq!(action.resource_type, ResourceType::ModelVersion);
    assert_eq!(action.resource_uids, vec!["a"]);

    handle.close();
    timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn dispatches_matching_events_only() {
    let (listener, url) = bind().await;
    let (client, handle) = SubscriptionClient::new(url);
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    handle
        .subscribe(
            ResourceType::Deployment,
            vec!["dep-1".to_string()],
            move |payload| {
                seen_tx.send(payload.clone()).unwrap();
            },
        )
        .unwrap();

    let task = tokio::spawn(async move { client.start().await });

    let mut server = accept(&listener).await;
    next_data_frame(&mut server).await;

    // An unmatched uid first, then a matching one. The transport preserves
    // order, so receiving the second proves the first was dropped.
    server
        .send(event_frame("deployment", json!({ "uid": "other" })))
        .await
        .unwrap();
    server
        .send(event_frame(
            "deployment",
            json!({ "uid": "dep-1", "status": "running" }),
        ))
        .await
        .unwrap();

    let payload = timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload, json!({ "uid": "dep-1", "status": "running" }));
    assert!(seen_rx.try_recv().is_err());

    handle.close();
    timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn heartbeats_at_configured_cadence_while_open() {
    let (listener, url) = bind().await;
    let (client, handle) = SubscriptionClient::new(url);
    let client = client.with_heartbeat_interval(Duration::from_millis(50));

    let task = tokio::spawn(async move { client.start().await });

    let mut server = accept(&listener).await;
    let mut heartbeats = 0;
    while heartbeats < 2 {
        let message = timeout(Duration::from_secs(5), server.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = message {
            if serde_json::from_str::<OutboundMessage>(text.as_str()).unwrap()
                == OutboundMessage::Heartbeat
            {
                heartbeats += 1;
            }
        }
    }

    handle.close();
    timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn error_frame_closes_without_reconnect() {
    let (listener, url) = bind().await;
    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();
    let (client, handle) = SubscriptionClient::new(url);
    let client = client
        .with_reconnect_delay(Duration::from_millis(50))
        .with_error_handler(move |message| {
            errors_tx.send(message.to_string()).unwrap();
        });

    let task = tokio::spawn(async move { client.start().await });

    let mut server = accept(&listener).await;
    server
        .send(Message::Text(
            json!({ "type": "error", "message": "boom" }).to_string().into(),
        ))
        .await
        .unwrap();

    // The client fails closed: handler invoked, loop finished, no reconnect.
    let message = timeout(Duration::from_secs(5), errors_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message, "boom");
    timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(handle.is_closed());
    assert!(
        timeout(Duration::from_millis(300), listener.accept())
            .await
            .is_err()
    );
}

#[test_log::test(tokio::test)]
async fn unauthorized_handshake_ends_the_client_without_retry() {
    let (listener, url) = bind().await;
    let (client, _handle) = SubscriptionClient::new(url);
    let client = client.with_reconnect_delay(Duration::from_millis(50));

    let task = tokio::spawn(async move { client.start().await });

    // Reject the upgrade request at the HTTP layer.
    let (mut stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    let mut request = [0_u8; 2048];
    stream.read(&mut request).await.unwrap();
    stream
        .write_all(b"HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\n\r\n")
        .await
        .unwrap();

    let result = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(matches!(result, Err(ConnectWsError::Unauthorized)));
    drop(stream);
    assert!(
        timeout(Duration::from_millis(300), listener.accept())
            .await
            .is_err()
    );
}

#[test_log::test(tokio::test)]
async fn close_suppresses_reconnect() {
    let (listener, url) = bind().await;
    let (client, handle) = SubscriptionClient::new(url);
    let client = client.with_reconnect_delay(Duration::from_millis(50));

    let task = tokio::spawn(async move { client.start().await });

    let _server = accept(&listener).await;
    handle.close();

    timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(
        timeout(Duration::from_millis(300), listener.accept())
            .await
            .is_err()
    );
}
