use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use shared::models::AgentIdentity;
use tracing::{debug, warn};

use crate::{
    app_state::AppState,
    auth::request_token,
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
};

/// Rejects requests without a valid session and records the resolved agent on
/// the [`RequestContext`].
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let token = request_token(req.headers(), None, &state.config.session.cookie_name)
        .ok_or_else(|| ApiError::unauthorized("missing session token"))?;
    let identity = resolve_identity(&state, &token).await?;
    debug!(
        user_id = identity.user_id,
        company_id = identity.company_id,
        path = req.uri().path(),
        "request authenticated"
    );

    if let Some(context) = req.extensions_mut().get_mut::<RequestContext>() {
        context.identity = Some(identity);
    } else {
        req.extensions_mut().insert(RequestContext {
            request_id: String::new(),
            identity: Some(identity),
        });
    }

    Ok(next.run(req).await)
}

/// Resolves `token` through the configured session store. Unknown tokens map
/// to 401; a missing or failing store maps to 503.
pub(crate) async fn resolve_identity(state: &AppState, token: &str) -> AppResult<AgentIdentity> {
    let store = state.sessions.as_ref().ok_or_else(|| {
        ApiError::service_unavailable("session_store_unavailable", "session store not configured")
    })?;

    match store.resolve(token).await {
        Ok(Some(identity)) => Ok(identity),
        Ok(None) => Err(ApiError::unauthorized("invalid or expired session")),
        Err(err) => {
            warn!(error = %err, "session lookup failed");
            Err(ApiError::service_unavailable(
                "session_store_unavailable",
                "unable to verify session",
            ))
        }
    }
}
