//! End-to-end test of the WebSocket live channel against a local server

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use roomsync_core::{
    ConnectionStatus, DeviceId, EndpointConfig, HistoryRecord, LivePayload, PersistRequest,
    PersistedRecord, Result, RoomId, ServerId, SyncConfig, Timestamp,
};
use roomsync_runtime::{HistoryService, PersistenceEndpoint, RuntimeBuilder};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message as WsMessage;

struct NoHistory;

#[async_trait]
impl HistoryService for NoHistory {
    async fn fetch(&self, _room: &RoomId) -> Result<Vec<HistoryRecord>> {
        Ok(Vec::new())
    }
}

struct AcceptAll;

#[async_trait]
impl PersistenceEndpoint for AcceptAll {
    async fn persist(&self, _room: &RoomId, request: &PersistRequest) -> Result<PersistedRecord> {
        Ok(HistoryRecord {
            device_id: request.device_id.clone(),
            text: request.text.clone(),
            created_at: Timestamp::new(2_000),
            server_id: ServerId::new("s-1"),
            correlation_key: Some(request.correlation_key.clone()),
        })
    }
}

#[tokio::test]
async fn test_websocket_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (received_tx, mut received_rx) = mpsc::unbounded_channel::<String>();

    let greeting = LivePayload {
        device_id: DeviceId::new("device-b"),
        message: "welcome".to_string(),
        correlation_key: None,
        server_time: Some(Timestamp::new(1_500)),
        server_id: Some(ServerId::new("s-0")),
    };
    let greeting_frame = greeting.encode().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(WsMessage::Text(greeting_frame)).await.unwrap();
        while let Some(Ok(frame)) = ws.next().await {
            if let WsMessage::Text(text) = frame {
                let _ = received_tx.send(text);
            }
        }
    });

    let mut config = SyncConfig::testing();
    config.endpoints = EndpointConfig {
        live_url: format!("ws://{}/rooms/{{room}}/live", addr),
        ..EndpointConfig::default()
    };

    let mut runtime = RuntimeBuilder::new(RoomId::new("lobby"), DeviceId::new("device-a"))
        .with_config(config)
        .with_history_service(Arc::new(NoHistory))
        .with_persistence(Arc::new(AcceptAll))
        .build_and_start()
        .expect("Failed to start runtime");
    let handle = runtime.handle();

    let mut status = handle.status_updates();
    timeout(
        Duration::from_secs(5),
        status.wait_for(|s| *s == ConnectionStatus::Connected),
    )
    .await
    .expect("never connected")
    .unwrap();

    let mut timeline = handle.timeline();
    let snapshot = timeout(
        Duration::from_secs(5),
        timeline.wait_for(|messages| !messages.is_empty()),
    )
    .await
    .expect("greeting never arrived")
    .unwrap()
    .clone();
    assert_eq!(snapshot[0].text, "welcome");
    assert_eq!(snapshot[0].server_id, Some(ServerId::new("s-0")));

    let key = handle.compose("hello server").await.unwrap().unwrap();
    let sent = timeout(Duration::from_secs(5), received_rx.recv())
        .await
        .expect("server never received the frame")
        .unwrap();
    let payload = LivePayload::decode(&sent).unwrap();
    assert_eq!(payload.correlation_key, Some(key));
    assert_eq!(payload.message, "hello server");
    assert_eq!(payload.device_id.as_str(), "device-a");

    runtime.shutdown().await.unwrap();
    let _ = timeout(Duration::from_secs(2), server).await;
}
