use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use shared::models::{CreateNoteRequest, Note};
use tracing::instrument;

use super::require_pool;
use crate::{
    app_state::AppState,
    http::{error::AppResult, problem::ProblemDetails},
    middleware::request_context::RequestContext,
    services::note_service::NoteService,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(
        "/conversations/{conversation_id}/notes",
        get(list_notes).post(create_note),
    )
}

#[utoipa::path(
    get,
    path = "/api/conversations/{conversation_id}/notes",
    params(("conversation_id" = i64, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Internal notes, oldest first", body = [Note]),
        (status = 404, description = "Unknown conversation", body = ProblemDetails)
    ),
    security(("bearer" = [])),
    tag = "Notes"
)]
#[instrument(skip(state, context))]
pub async fn list_notes(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<i64>,
) -> AppResult<Json<Vec<Note>>> {
    let identity = context.require_identity()?;
    let notes = NoteService::new(require_pool(&state)?)
        .list(identity.company_id, conversation_id)
        .await?;
    Ok(Json(notes))
}

#[utoipa::path(
    post,
    path = "/api/conversations/{conversation_id}/notes",
    params(("conversation_id" = i64, Path, description = "Conversation id")),
    request_body = CreateNoteRequest,
    responses(
        (status = 201, description = "Note stored", body = Note),
        (status = 400, description = "Empty or oversized note", body = ProblemDetails),
        (status = 404, description = "Unknown conversation", body = ProblemDetails)
    ),
    security(("bearer" = [])),
    tag = "Notes"
)]
#[instrument(skip(state, context, payload))]
pub async fn create_note(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<i64>,
    Json(payload): Json<CreateNoteRequest>,
) -> AppResult<(StatusCode, Json<Note>)> {
    let identity = context.require_identity()?;
    let note = NoteService::new(require_pool(&state)?)
        .create(identity, conversation_id, &payload.body)
        .await?;
    Ok((StatusCode::CREATED, Json(note)))
}
