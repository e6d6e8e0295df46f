use std::{sync::Arc, time::Duration};

use axum::{Extension, Json, Router, extract::State, routing::get};
use shared::models::DashboardStats;
use tracing::instrument;

use super::require_pool;
use crate::{
    app_state::AppState,
    http::error::AppResult,
    middleware::request_context::RequestContext,
    services::{analytics_service::AnalyticsService, query_cache::keys},
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/analytics/dashboard", get(dashboard))
}

/// Company dashboard figures, cached for the configured dashboard TTL and
/// dropped whenever a conversation or message changes.
#[utoipa::path(
    get,
    path = "/api/analytics/dashboard",
    responses(
        (status = 200, description = "Dashboard figures", body = DashboardStats)
    ),
    security(("bearer" = [])),
    tag = "Analytics"
)]
#[instrument(skip(state, context))]
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
) -> AppResult<Json<DashboardStats>> {
    let identity = context.require_identity()?;
    let service = AnalyticsService::new(require_pool(&state)?);
    let company_id = identity.company_id;

    let stats = state
        .cache
        .get(
            &keys::dashboard(company_id),
            || service.dashboard(company_id),
            Some(Duration::from_secs(state.config.cache.dashboard_ttl_seconds)),
        )
        .await?;

    Ok(Json(stats))
}
