use axum::{
    Json, Router,
    http::Method,
    middleware as axum_middleware,
    routing::get,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::client_registry::ConnectedClients;
use crate::server::config::ServerConfig;
use crate::simulator::{SensorSimulator, Snapshot};
use crate::web::middleware::auth;
use crate::web::models::MessageResponse;
use crate::web::routes::*;

pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod websocket_handler;

pub use error::AppError;

/// Shared handles every handler needs.
#[derive(Clone)]
pub struct AppState {
    pub simulator: Arc<SensorSimulator>,
    pub ws_data_broadcaster_tx: broadcast::Sender<Arc<Snapshot>>,
    pub connected_clients: Arc<ConnectedClients>,
    pub config: Arc<ServerConfig>,
}

async fn root_handler() -> Json<MessageResponse> {
    Json(MessageResponse::new("Welcome to the Industrial Sensor API"))
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_axum_router(
    simulator: Arc<SensorSimulator>,
    ws_data_broadcaster_tx: broadcast::Sender<Arc<Snapshot>>,
    connected_clients: Arc<ConnectedClients>,
    config: Arc<ServerConfig>,
) -> Router {
    let app_state = Arc::new(AppState {
        simulator,
        ws_data_broadcaster_tx,
        connected_clients,
        config,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check_handler))
        .merge(
            sensor_routes::sensor_router()
                .merge(control_routes::control_router())
                .route_layer(axum_middleware::from_fn_with_state(app_state.clone(), auth::auth)),
        )
        .route("/ws/sensordata", get(websocket_handler::websocket_handler))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
