use std::{sync::Arc, time::Duration};

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
};
use shared::models::{AgentIdentity, CreateTemplateRequest, Template};
use tracing::{info, instrument};

use super::require_pool;
use crate::{
    app_state::AppState,
    http::{
        error::{ApiError, AppResult},
        problem::ProblemDetails,
    },
    middleware::request_context::RequestContext,
    services::{query_cache::keys, template_service::TemplateService},
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/templates", get(list_templates).post(create_template))
        .route("/templates/{template_id}", delete(delete_template))
}

fn require_template_manager(identity: &AgentIdentity) -> AppResult<()> {
    if identity.can_manage_templates() {
        Ok(())
    } else {
        Err(ApiError::forbidden(
            "only admins and supervisors can manage templates",
        ))
    }
}

#[utoipa::path(
    get,
    path = "/api/templates",
    responses(
        (status = 200, description = "Company templates", body = [Template])
    ),
    security(("bearer" = [])),
    tag = "Templates"
)]
#[instrument(skip(state, context))]
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
) -> AppResult<Json<Vec<Template>>> {
    let identity = context.require_identity()?;
    let service = TemplateService::new(require_pool(&state)?);
    let company_id = identity.company_id;

    let templates = state
        .cache
        .get(
            &keys::templates(company_id),
            || service.list(company_id),
            Some(Duration::from_secs(state.config.cache.templates_ttl_seconds)),
        )
        .await?;

    Ok(Json(templates))
}

#[utoipa::path(
    post,
    path = "/api/templates",
    request_body = CreateTemplateRequest,
    responses(
        (status = 201, description = "Template created", body = Template),
        (status = 400, description = "Invalid or duplicate template", body = ProblemDetails),
        (status = 403, description = "Caller is not an admin or supervisor", body = ProblemDetails)
    ),
    security(("bearer" = [])),
    tag = "Templates"
)]
#[instrument(skip(state, context, payload))]
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Json(payload): Json<CreateTemplateRequest>,
) -> AppResult<(StatusCode, Json<Template>)> {
    let identity = context.require_identity()?;
    require_template_manager(identity)?;
    let service = TemplateService::new(require_pool(&state)?);

    let template = service.create(identity.company_id, payload).await?;
    state.notifier().templates_changed(identity.company_id).await;
    info!(template_id = template.id, "template created");

    Ok((StatusCode::CREATED, Json(template)))
}

#[utoipa::path(
    delete,
    path = "/api/templates/{template_id}",
    params(("template_id" = i64, Path, description = "Template id")),
    responses(
        (status = 204, description = "Template deleted"),
        (status = 403, description = "Caller is not an admin or supervisor", body = ProblemDetails),
        (status = 404, description = "Unknown template", body = ProblemDetails)
    ),
    security(("bearer" = [])),
    tag = "Templates"
)]
#[instrument(skip(state, context))]
pub async fn delete_template(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(template_id): Path<i64>,
) -> AppResult<StatusCode> {
    let identity = context.require_identity()?;
    require_template_manager(identity)?;
    let service = TemplateService::new(require_pool(&state)?);

    service.delete(identity.company_id, template_id).await?;
    state.notifier().templates_changed(identity.company_id).await;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, send, state};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn agents_cannot_create_templates() {
        let app = app(state());
        let response = send(
            &app,
            "POST",
            "/api/templates",
            Some("agent"),
            Some(json!({ "name": "hi", "body": "Hello {{customer_name}}" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn agents_cannot_delete_templates() {
        let app = app(state());
        let response = send(&app, "DELETE", "/api/templates/3", Some("agent"), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn supervisors_pass_the_role_check() {
        let app = app(state());
        let response = send(&app, "DELETE", "/api/templates/3", Some("supervisor"), None).await;
        // No database in this test: the request got past authorization.
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
