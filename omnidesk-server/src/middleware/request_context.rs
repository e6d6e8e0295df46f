use std::str::FromStr;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use shared::{config::server::Config, models::AgentIdentity};
use uuid::Uuid;

use crate::http::error::{ApiError, AppResult};

/// Per-request data threaded through the middleware stack as an extension.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub request_id: String,
    /// Set by the session middleware once the bearer token resolves.
    pub identity: Option<AgentIdentity>,
}

impl RequestContext {
    pub fn company_id(&self) -> Option<i64> {
        self.identity.as_ref().map(|identity| identity.company_id)
    }

    pub fn require_identity(&self) -> AppResult<&AgentIdentity> {
        self.identity
            .as_ref()
            .ok_or_else(|| ApiError::unauthorized("authentication required"))
    }
}

#[derive(Clone, Debug)]
pub struct RequestIdState {
    header: HeaderName,
}

impl RequestIdState {
    pub fn from_config(config: &Config) -> Self {
        let header = HeaderName::from_str(&config.server.request_id_header)
            .unwrap_or_else(|_| HeaderName::from_static("x-request-id"));
        Self { header }
    }
}

/// Reuses the caller's request id when present, otherwise mints one, and
/// echoes it on the response.
pub async fn assign_request_id(
    State(state): State<RequestIdState>,
    mut request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let request_id = extract_request_id(request.headers(), &state.header)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let header_value = HeaderValue::from_str(&request_id)
        .map_err(|_| ApiError::internal_server_error("failed to encode request id"))?;

    request.extensions_mut().insert(RequestContext {
        request_id,
        identity: None,
    });
    request
        .headers_mut()
        .insert(state.header.clone(), header_value.clone());

    let mut response = next.run(request).await;
    response.headers_mut().insert(state.header, header_value);
    Ok(response)
}

fn extract_request_id(headers: &HeaderMap, header: &HeaderName) -> Option<String> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_owned)
}
