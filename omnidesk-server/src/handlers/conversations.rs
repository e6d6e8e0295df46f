use std::{sync::Arc, time::Duration};

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    routing::{get, patch, post},
};
use serde::Deserialize;
use shared::models::{
    AssignConversationRequest, Channel, ConversationDetail, ConversationListResponse,
    ConversationStatus, ConversationSummary, UpdateConversationStatusRequest,
};
use tracing::{debug, instrument};
use utoipa::IntoParams;

use super::require_pool;
use crate::{
    app_state::AppState,
    http::{error::AppResult, problem::ProblemDetails},
    middleware::request_context::RequestContext,
    services::{
        conversation_service::{ConversationFilter, ConversationService},
        message_service::MessageService,
        query_cache::keys,
    },
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/conversations", get(list_conversations))
        .route("/conversations/{conversation_id}", get(get_conversation))
        .route(
            "/conversations/{conversation_id}/status",
            patch(update_conversation_status),
        )
        .route(
            "/conversations/{conversation_id}/assign",
            post(assign_conversation),
        )
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConversationListQuery {
    /// Only conversations in this status.
    status: Option<ConversationStatus>,
    /// Only conversations on this channel.
    channel: Option<Channel>,
    /// Page size, 1 to 200. Defaults to 50.
    limit: Option<i64>,
}

/// Company inbox, most recent activity first. Served from the query cache.
#[utoipa::path(
    get,
    path = "/api/conversations",
    params(ConversationListQuery),
    responses(
        (status = 200, description = "Conversation inbox", body = ConversationListResponse),
        (status = 401, description = "Missing or invalid session", body = ProblemDetails)
    ),
    security(("bearer" = [])),
    tag = "Conversations"
)]
#[instrument(skip(state, context))]
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Query(query): Query<ConversationListQuery>,
) -> AppResult<Json<ConversationListResponse>> {
    let identity = context.require_identity()?;
    let service = ConversationService::new(require_pool(&state)?);
    let filter = ConversationFilter {
        status: query.status,
        channel: query.channel,
        limit: query.limit,
    };
    let company_id = identity.company_id;
    let key = keys::conversations(
        company_id,
        filter.status,
        filter.channel,
        filter.effective_limit(),
    );

    let conversations = state
        .cache
        .get(
            &key,
            || service.list(company_id, filter),
            Some(Duration::from_secs(state.config.cache.conversations_ttl_seconds)),
        )
        .await?;

    Ok(Json(ConversationListResponse { conversations }))
}

#[utoipa::path(
    get,
    path = "/api/conversations/{conversation_id}",
    params(("conversation_id" = i64, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Conversation with its messages", body = ConversationDetail),
        (status = 404, description = "Unknown conversation", body = ProblemDetails)
    ),
    security(("bearer" = [])),
    tag = "Conversations"
)]
#[instrument(skip(state, context))]
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<i64>,
) -> AppResult<Json<ConversationDetail>> {
    let identity = context.require_identity()?;
    let pool = require_pool(&state)?;

    let conversation = ConversationService::new(pool.clone())
        .get(identity.company_id, conversation_id)
        .await?;
    let messages = MessageService::new(pool)
        .list(identity.company_id, conversation_id)
        .await?;

    Ok(Json(ConversationDetail {
        conversation,
        messages,
    }))
}

#[utoipa::path(
    patch,
    path = "/api/conversations/{conversation_id}/status",
    params(("conversation_id" = i64, Path, description = "Conversation id")),
    request_body = UpdateConversationStatusRequest,
    responses(
        (status = 200, description = "Updated conversation", body = ConversationSummary),
        (status = 404, description = "Unknown conversation", body = ProblemDetails)
    ),
    security(("bearer" = [])),
    tag = "Conversations"
)]
#[instrument(skip(state, context, payload))]
pub async fn update_conversation_status(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<i64>,
    Json(payload): Json<UpdateConversationStatusRequest>,
) -> AppResult<Json<ConversationSummary>> {
    let identity = context.require_identity()?;
    let service = ConversationService::new(require_pool(&state)?);

    let conversation = service
        .update_status(identity.company_id, conversation_id, payload.status)
        .await?;
    publish_update(&state, identity.company_id, &conversation).await;

    Ok(Json(conversation))
}

#[utoipa::path(
    post,
    path = "/api/conversations/{conversation_id}/assign",
    params(("conversation_id" = i64, Path, description = "Conversation id")),
    request_body = AssignConversationRequest,
    responses(
        (status = 200, description = "Updated conversation", body = ConversationSummary),
        (status = 400, description = "Agent not in this company", body = ProblemDetails),
        (status = 404, description = "Unknown conversation", body = ProblemDetails)
    ),
    security(("bearer" = [])),
    tag = "Conversations"
)]
#[instrument(skip(state, context, payload))]
pub async fn assign_conversation(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<i64>,
    Json(payload): Json<AssignConversationRequest>,
) -> AppResult<Json<ConversationSummary>> {
    let identity = context.require_identity()?;
    let service = ConversationService::new(require_pool(&state)?);

    let conversation = service
        .assign(identity.company_id, conversation_id, payload.agent_id)
        .await?;
    publish_update(&state, identity.company_id, &conversation).await;

    Ok(Json(conversation))
}

async fn publish_update(state: &AppState, company_id: i64, conversation: &ConversationSummary) {
    let delivered = state
        .notifier()
        .conversation_updated(
            company_id,
            conversation.id,
            conversation.status,
            conversation.assigned_agent_id,
        )
        .await;
    debug!(conversation_id = conversation.id, delivered, "conversation update published");
}
