use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Message, client::IntoClientRequest},
};

use sensor_api::server::client_registry::ConnectedClients;
use sensor_api::server::config::ServerConfig;
use sensor_api::server::snapshot_broadcaster::SnapshotBroadcaster;
use sensor_api::simulator::{SensorSimulator, SimulatorSettings};
use sensor_api::web::create_axum_router;

const KEY: &str = "ws-key";

async fn spawn_server() -> (SocketAddr, Arc<ConnectedClients>) {
    let simulator = Arc::new(SensorSimulator::new(SimulatorSettings {
        machine_count: 3,
        seed: Some(99),
        ..SimulatorSettings::default()
    }));
    let (tx, _) = broadcast::channel(16);
    SnapshotBroadcaster::new(simulator.clone(), tx.clone(), Duration::from_millis(50)).run();

    let clients = ConnectedClients::new();
    let config = Arc::new(ServerConfig::with_api_key(KEY).unwrap());
    let app = create_axum_router(simulator, tx, clients.clone(), config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    (addr, clients)
}

fn as_snapshot(msg: &Message) -> Option<Value> {
    match msg {
        Message::Text(text) => serde_json::from_str::<Value>(text.as_str()).ok().filter(|v| v.is_object()),
        _ => None,
    }
}

#[tokio::test]
async fn test_stream_pushes_snapshots() {
    let (addr, clients) = spawn_server().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/sensordata?api_key={KEY}")).await.unwrap();

    // Initial snapshot plus at least one broadcast.
    for _ in 0..2 {
        let msg = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
        let snapshot = as_snapshot(&msg).expect("snapshot frame");
        let machines = snapshot.as_object().unwrap();
        assert_eq!(machines.len(), 3);
        assert_eq!(machines["Machine_1"]["product_type"], "Polyethylene");
    }
    assert_eq!(clients.len(), 1);

    ws.send(Message::Text("ping".into())).await.unwrap();
    let mut got_pong = false;
    for _ in 0..20 {
        let msg = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
        if msg.to_text().unwrap() == "pong" {
            got_pong = true;
            break;
        }
    }
    assert!(got_pong);

    ws.close(None).await.unwrap();
    for _ in 0..50 {
        if clients.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(clients.is_empty());
}

#[tokio::test]
async fn test_bad_key_closes_with_policy_violation() {
    let (addr, clients) = spawn_server().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/sensordata?api_key=nope")).await.unwrap();

    let msg = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
    match msg {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1008);
            assert_eq!(frame.reason.as_str(), "Authentication failed");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
    assert!(clients.is_empty());
}

#[tokio::test]
async fn test_api_key_header_accepted() {
    let (addr, _clients) = spawn_server().await;
    let mut request = format!("ws://{addr}/ws/sensordata").into_client_request().unwrap();
    request.headers_mut().insert("X-API-Key", KEY.parse().unwrap());
    let (mut ws, _) = connect_async(request).await.unwrap();

    let msg = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
    let snapshot = as_snapshot(&msg).expect("snapshot frame");
    assert_eq!(snapshot.as_object().unwrap().len(), 3);
}
