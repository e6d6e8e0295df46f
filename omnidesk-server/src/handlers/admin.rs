use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    routing::{get, patch, post},
};
use shared::models::{
    AgentIdentity, InvalidateCacheRequest, InvalidateCacheResponse, OpsStats,
    UpdateUserRoleRequest, UserSummary,
};
use tracing::{info, instrument};

use super::require_pool;
use crate::{
    app_state::AppState,
    http::{
        error::{ApiError, AppResult},
        problem::ProblemDetails,
    },
    middleware::request_context::RequestContext,
    services::user_service::UserService,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/users/{user_id}/role", patch(update_user_role))
        .route("/admin/cache/stats", get(cache_stats))
        .route("/admin/cache/invalidate", post(invalidate_cache))
}

fn require_admin(context: &RequestContext) -> AppResult<&AgentIdentity> {
    let identity = context.require_identity()?;
    if identity.is_admin() {
        Ok(identity)
    } else {
        Err(ApiError::forbidden("administrator role required"))
    }
}

#[utoipa::path(
    get,
    path = "/api/admin/users",
    responses(
        (status = 200, description = "Users of the caller's company", body = [UserSummary]),
        (status = 403, description = "Caller is not an admin", body = ProblemDetails)
    ),
    security(("bearer" = [])),
    tag = "Admin"
)]
#[instrument(skip(state, context))]
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
) -> AppResult<Json<Vec<UserSummary>>> {
    let admin = require_admin(&context)?;
    let users = UserService::new(require_pool(&state)?)
        .list(admin.company_id)
        .await?;
    Ok(Json(users))
}

#[utoipa::path(
    patch,
    path = "/api/admin/users/{user_id}/role",
    params(("user_id" = i64, Path, description = "User id")),
    request_body = UpdateUserRoleRequest,
    responses(
        (status = 200, description = "Updated user", body = UserSummary),
        (status = 403, description = "Caller is not an admin, or targeted themselves", body = ProblemDetails),
        (status = 404, description = "Unknown user", body = ProblemDetails)
    ),
    security(("bearer" = [])),
    tag = "Admin"
)]
#[instrument(skip(state, context, payload))]
pub async fn update_user_role(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(user_id): Path<i64>,
    Json(payload): Json<UpdateUserRoleRequest>,
) -> AppResult<Json<UserSummary>> {
    let admin = require_admin(&context)?;
    let user = UserService::new(require_pool(&state)?)
        .update_role(admin.company_id, admin.user_id, user_id, payload.role)
        .await?;
    Ok(Json(user))
}

/// Cache and realtime counters for operators.
#[utoipa::path(
    get,
    path = "/api/admin/cache/stats",
    responses(
        (status = 200, description = "Cache and connection statistics", body = OpsStats),
        (status = 403, description = "Caller is not an admin", body = ProblemDetails)
    ),
    security(("bearer" = [])),
    tag = "Admin"
)]
pub async fn cache_stats(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
) -> AppResult<Json<OpsStats>> {
    require_admin(&context)?;
    Ok(Json(OpsStats {
        cache: state.cache.stats().await,
        realtime: state.hub.stats().await,
    }))
}

/// Drops every cache entry whose key contains `pattern`. The cache is shared
/// by all companies, so an empty pattern clears it for everyone.
#[utoipa::path(
    post,
    path = "/api/admin/cache/invalidate",
    request_body = InvalidateCacheRequest,
    responses(
        (status = 200, description = "Number of removed entries", body = InvalidateCacheResponse),
        (status = 403, description = "Caller is not an admin", body = ProblemDetails)
    ),
    security(("bearer" = [])),
    tag = "Admin"
)]
#[instrument(skip(state, context))]
pub async fn invalidate_cache(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<InvalidateCacheRequest>,
) -> AppResult<Json<InvalidateCacheResponse>> {
    let admin = require_admin(&context)?;
    let removed = state.cache.invalidate(&request.pattern).await;
    info!(user_id = admin.user_id, pattern = %request.pattern, removed, "cache invalidated by admin");
    Ok(Json(InvalidateCacheResponse { removed }))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, json_body, send, state};
    use axum::http::StatusCode;
    use serde_json::json;
    use std::convert::Infallible;

    #[tokio::test]
    async fn stats_report_cache_and_connections() {
        let state = state();
        let _: Result<u8, Infallible> = state
            .cache()
            .get("dashboard:1:", || async { Ok(1) }, None)
            .await;
        let _connection = state.hub().accept(1).await;
        let app = app(state);

        let response = send(&app, "GET", "/api/admin/cache/stats", Some("admin"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["cache"]["keys"], 1);
        assert_eq!(body["cache"]["misses"], 1);
        assert_eq!(body["realtime"]["connections"], 1);
        assert_eq!(body["realtime"]["tenants"], 1);
    }

    #[tokio::test]
    async fn invalidate_removes_matching_keys() {
        let state = state();
        for key in ["dashboard:1:", "templates:1:"] {
            let _: Result<u8, Infallible> = state.cache().get(key, || async { Ok(1) }, None).await;
        }
        let app = app(state);

        let response = send(
            &app,
            "POST",
            "/api/admin/cache/invalidate",
            Some("admin"),
            Some(json!({ "pattern": "dashboard:" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["removed"], 1);
    }

    #[tokio::test]
    async fn non_admins_are_forbidden() {
        let app = app(state());
        for token in ["supervisor", "agent"] {
            let response = send(&app, "GET", "/api/admin/cache/stats", Some(token), None).await;
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
    }
}
