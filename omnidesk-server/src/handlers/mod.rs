pub mod admin;
pub mod analytics;
pub mod conversations;
pub mod identity;
pub mod messages;
pub mod notes;
pub mod realtime;
pub mod templates;

use sqlx::PgPool;

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
};

fn require_pool(state: &AppState) -> AppResult<PgPool> {
    state.pool.clone().ok_or_else(|| {
        ApiError::service_unavailable("database_unavailable", "database pool not configured")
    })
}
