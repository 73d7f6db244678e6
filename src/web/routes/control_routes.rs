use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::QueryRejection},
    routing::post,
};
use std::sync::Arc;

use crate::simulator::MachineState;
use crate::simulator::sensor_simulator::{MAX_SIMULATION_SPEED, MIN_SIMULATION_SPEED};
use crate::web::models::{ForceStateQuery, MessageResponse, SimulationSpeedQuery};
use crate::web::{AppError, AppState};

async fn force_machine_state_handler(
    State(app_state): State<Arc<AppState>>,
    Path(machine_id): Path<String>,
    query: Result<Query<ForceStateQuery>, QueryRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Query(params) = query?;
    // The state is validated before the machine is looked up.
    let new_state: MachineState = params.state.parse()?;
    app_state.simulator.force_state_change(&machine_id, new_state).await?;

    Ok(Json(MessageResponse::new(format!(
        "Machine {machine_id} state changed to {}",
        params.state
    ))))
}

async fn set_simulation_speed_handler(
    State(app_state): State<Arc<AppState>>,
    query: Result<Query<SimulationSpeedQuery>, QueryRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Query(SimulationSpeedQuery { speed }) = query?;
    if !(MIN_SIMULATION_SPEED..=MAX_SIMULATION_SPEED).contains(&speed) {
        return Err(AppError::InvalidInput(format!(
            "Speed must be between {MIN_SIMULATION_SPEED:?} and {MAX_SIMULATION_SPEED:?}"
        )));
    }
    let applied = app_state.simulator.set_simulation_speed(speed).await;
    Ok(Json(MessageResponse::new(format!("Simulation speed set to {applied:?}x"))))
}

pub fn control_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/machine/{machine_id}/force-state", post(force_machine_state_handler))
        .route("/simulation/speed", post(set_simulation_speed_handler))
}
