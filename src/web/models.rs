use serde::{Deserialize, Serialize};

/// Plain `{"message": ...}` acknowledgement body.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// `?api_key=` on protected routes and the WebSocket upgrade.
#[derive(Debug, Deserialize, Default)]
pub struct ApiKeyQuery {
    pub api_key: Option<String>,
}

/// `?state=` for forcing a machine state; parsed case-insensitively by the handler.
#[derive(Debug, Deserialize)]
pub struct ForceStateQuery {
    /// Kept raw so the response can echo it back.
    pub state: String,
}

/// `?speed=` multiplier for the simulation clock.
#[derive(Debug, Deserialize)]
pub struct SimulationSpeedQuery {
    pub speed: f64,
}
