use std::sync::Arc;

use axum::{Extension, Json, Router, routing::get};
use shared::models::AgentIdentity;

use crate::{
    app_state::AppState, http::error::AppResult, middleware::request_context::RequestContext,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/me", get(get_me))
}

/// The agent behind the current session.
#[utoipa::path(
    get,
    path = "/api/me",
    responses(
        (status = 200, description = "Authenticated agent", body = AgentIdentity),
        (status = 401, description = "Missing or invalid session", body = crate::http::problem::ProblemDetails)
    ),
    security(("bearer" = [])),
    tag = "Identity"
)]
pub async fn get_me(Extension(context): Extension<RequestContext>) -> AppResult<Json<AgentIdentity>> {
    Ok(Json(context.require_identity()?.clone()))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, json_body, send, state};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn me_returns_session_identity() {
        let app = app(state());

        let response = send(&app, "GET", "/api/me", Some("supervisor"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["user_id"], 2);
        assert_eq!(body["company_id"], 1);
        assert_eq!(body["role"], "supervisor");
    }

    #[tokio::test]
    async fn me_requires_a_session() {
        let app = app(state());
        let response = send(&app, "GET", "/api/me", None, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
