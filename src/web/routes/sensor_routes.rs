use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use std::sync::Arc;

use crate::simulator::{SensorReading, Snapshot};
use crate::simulator::sensor_simulator::{ErrorDetails, FactoryStatus};
use crate::web::{AppError, AppState};

// --- Route Handlers ---

async fn get_sensor_data_handler(State(app_state): State<Arc<AppState>>) -> Json<Snapshot> {
    Json(app_state.simulator.latest_data().await)
}

async fn get_factory_status_handler(State(app_state): State<Arc<AppState>>) -> Json<FactoryStatus> {
    Json(app_state.simulator.factory_status().await)
}

async fn get_machine_data_handler(
    State(app_state): State<Arc<AppState>>,
    Path(machine_id): Path<String>,
) -> Result<Json<SensorReading>, AppError> {
    let reading = app_state.simulator.latest_for(&machine_id).await?;
    Ok(Json(reading))
}

async fn get_error_details_handler(State(app_state): State<Arc<AppState>>) -> Json<ErrorDetails> {
    Json(app_state.simulator.error_details().await)
}

pub fn sensor_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sensordata", get(get_sensor_data_handler))
        .route("/status", get(get_factory_status_handler))
        .route("/machine/{machine_id}", get(get_machine_data_handler))
        .route("/errors", get(get_error_details_handler))
}
