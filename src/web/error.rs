use axum::{
    Json,
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::simulator::SimulatorError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid API Key")]
    InvalidApiKey,
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<SimulatorError> for AppError {
    fn from(err: SimulatorError) -> Self {
        match err {
            SimulatorError::InvalidState(_) => AppError::InvalidInput(err.to_string()),
            SimulatorError::MachineNotFound(_) => AppError::NotFound(err.to_string()),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::InvalidInput(rejection.body_text())
    }
}
