use axum::{
    body::Body as AxumBody,
    extract::{Query, State},
    http::{HeaderMap, Request, Uri},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

use crate::web::models::ApiKeyQuery;
use crate::web::{AppState, error::AppError};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Pulls the key from the `api_key` query parameter, falling back to the `X-API-Key` header.
pub fn presented_api_key(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    Query::<ApiKeyQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(q)| q.api_key)
        .or_else(|| {
            headers
                .get(API_KEY_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(|s| s.to_string())
        })
}

pub fn verify_api_key(presented: Option<&str>, expected: &str) -> Result<(), AppError> {
    match presented {
        Some(key) if key == expected => Ok(()),
        _ => Err(AppError::InvalidApiKey),
    }
}

pub async fn auth(
    State(state): State<Arc<AppState>>,
    req: Request<AxumBody>,
    next: Next,
) -> Result<Response, AppError> {
    let presented = presented_api_key(req.uri(), req.headers());
    verify_api_key(presented.as_deref(), &state.config.api_key).inspect_err(|_| {
        warn!(path = %req.uri().path(), "Rejected request with invalid API key.");
    })?;
    Ok(next.run(req).await)
}
