use axum::{
    extract::{
        ConnectInfo, State,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code},
    },
    http::{Extensions, HeaderMap, Uri},
    response::IntoResponse,
};
use futures_util::stream::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::server::client_registry::ClientState;
use crate::simulator::Snapshot;
use crate::web::AppState;
use crate::web::middleware::auth::{presented_api_key, verify_api_key};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    extensions: Extensions,
) -> impl IntoResponse {
    let peer = extensions.get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(addr)| *addr);

    let presented = presented_api_key(&uri, &headers);
    if let Err(e) = verify_api_key(presented.as_deref(), &app_state.config.api_key) {
        warn!(?peer, "WebSocket authentication failed: {}", e);
        return ws.on_upgrade(reject_socket);
    }

    ws.on_upgrade(move |socket| handle_socket(socket, app_state, peer))
}

async fn reject_socket(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: Utf8Bytes::from_static("Authentication failed"),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

fn snapshot_message(snapshot: &Snapshot) -> Option<Message> {
    match serde_json::to_string(snapshot) {
        Ok(json) => Some(Message::Text(Utf8Bytes::from(json))),
        Err(e) => {
            warn!(error = %e, "Failed to serialize sensor snapshot.");
            None
        }
    }
}

/// Waits for the next snapshot, skipping any a slow client has already missed.
/// Returns `None` once the broadcast channel is closed.
async fn next_snapshot(rx: &mut broadcast::Receiver<Arc<Snapshot>>, client_id: Uuid) -> Option<Arc<Snapshot>> {
    loop {
        match rx.recv().await {
            Ok(snapshot) => return Some(snapshot),
            Err(RecvError::Lagged(skipped)) => {
                debug!(%client_id, skipped, "WebSocket client lagging; skipped snapshots.");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

async fn handle_socket(mut socket: WebSocket, app_state: Arc<AppState>, peer: Option<SocketAddr>) {
    let client: ClientState = app_state.connected_clients.register(peer);
    let client_id = client.client_id;
    info!(
        %client_id,
        ?peer,
        active_connections = app_state.connected_clients.len(),
        "New WebSocket client connected."
    );

    // Subscribe before the initial push so no broadcast slips in between.
    let mut rx = app_state.ws_data_broadcaster_tx.subscribe();

    let initial = app_state.simulator.latest_data().await;
    let initial_sent = match snapshot_message(&initial) {
        Some(msg) => socket.send(msg).await.is_ok(),
        None => true,
    };

    if initial_sent {
        loop {
            tokio::select! {
                update = next_snapshot(&mut rx, client_id) => {
                    let Some(snapshot) = update else { break };
                    let Some(msg) = snapshot_message(&snapshot) else { continue };
                    if socket.send(msg).await.is_err() {
                        warn!(%client_id, "Error sending sensor data to WebSocket client.");
                        break;
                    }
                }
                incoming = socket.next() => {
                    match incoming {
                        Some(Ok(Message::Text(t))) => {
                            debug!(%client_id, text = %t.as_str(), "Received text message.");
                            if t.as_str() == "ping"
                                && socket.send(Message::Text(Utf8Bytes::from_static("pong"))).await.is_err()
                            {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(p))) => {
                            if socket.send(Message::Pong(p)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(_))) | Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(c))) => {
                            if let Some(cf) = c {
                                info!(%client_id, code = cf.code, reason = %cf.reason.as_str(), "WebSocket client disconnected gracefully.");
                            } else {
                                info!(%client_id, "WebSocket client disconnected gracefully.");
                            }
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(%client_id, error = %e, "WebSocket connection error.");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
    } else {
        warn!(%client_id, "Error sending initial sensor snapshot. Closing connection.");
    }

    app_state.connected_clients.remove(&client_id);
    info!(
        %client_id,
        active_connections = app_state.connected_clients.len(),
        "WebSocket connection closed."
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{SensorSimulator, SimulatorSettings};

    #[tokio::test]
    async fn test_lagging_receiver_skips_to_latest() {
        let (tx, mut rx) = broadcast::channel::<Arc<Snapshot>>(1);
        let simulator = SensorSimulator::new(SimulatorSettings {
            machine_count: 1,
            seed: Some(5),
            ..SimulatorSettings::default()
        });
        let empty = Arc::new(Snapshot::default());
        let full = Arc::new(simulator.latest_data().await);

        // Capacity 1: the first two are overwritten before the receiver reads.
        tx.send(empty.clone()).unwrap();
        tx.send(empty.clone()).unwrap();
        tx.send(full.clone()).unwrap();

        let client_id = Uuid::new_v4();
        let received = next_snapshot(&mut rx, client_id).await.expect("latest snapshot survives");
        assert_eq!(received.len(), 1);
        assert!(Arc::ptr_eq(&received, &full));

        // The receiver keeps working after the lag.
        tx.send(empty.clone()).unwrap();
        let received = next_snapshot(&mut rx, client_id).await.unwrap();
        assert!(received.is_empty());

        drop(tx);
        assert!(next_snapshot(&mut rx, client_id).await.is_none());
    }
}
