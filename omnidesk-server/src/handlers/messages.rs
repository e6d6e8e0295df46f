use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use shared::models::{MessageView, SendMessageRequest};
use tracing::{debug, instrument};

use super::require_pool;
use crate::{
    app_state::AppState,
    http::{error::AppResult, problem::ProblemDetails},
    middleware::request_context::RequestContext,
    services::message_service::MessageService,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(
        "/conversations/{conversation_id}/messages",
        get(list_messages).post(send_message),
    )
}

#[utoipa::path(
    get,
    path = "/api/conversations/{conversation_id}/messages",
    params(("conversation_id" = i64, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Messages in chronological order", body = [MessageView]),
        (status = 404, description = "Unknown conversation", body = ProblemDetails)
    ),
    security(("bearer" = [])),
    tag = "Messages"
)]
#[instrument(skip(state, context))]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<i64>,
) -> AppResult<Json<Vec<MessageView>>> {
    let identity = context.require_identity()?;
    let service = MessageService::new(require_pool(&state)?);

    let messages = service.list(identity.company_id, conversation_id).await?;
    Ok(Json(messages))
}

/// Sends an agent reply, typed or rendered from a template, and notifies the
/// company's connected agents.
#[utoipa::path(
    post,
    path = "/api/conversations/{conversation_id}/messages",
    params(("conversation_id" = i64, Path, description = "Conversation id")),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message stored", body = MessageView),
        (status = 400, description = "Empty, oversized or ambiguous body", body = ProblemDetails),
        (status = 404, description = "Unknown conversation or template", body = ProblemDetails)
    ),
    security(("bearer" = [])),
    tag = "Messages"
)]
#[instrument(skip(state, context, payload))]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<i64>,
    Json(payload): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<MessageView>)> {
    let identity = context.require_identity()?;
    let service = MessageService::new(require_pool(&state)?);

    let message = service.send(identity, conversation_id, payload).await?;
    let delivered = state
        .notifier()
        .message_created(identity.company_id, message.clone())
        .await;
    debug!(message_id = message.id, delivered, "new message published");

    Ok((StatusCode::CREATED, Json(message)))
}
