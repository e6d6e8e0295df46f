//! Internal notes: agent-only annotations on a conversation. Notes are never
//! delivered to customers and never published over the realtime channel.

use chrono::{DateTime, Utc};
use shared::models::{AgentIdentity, Note};
use sqlx::PgPool;
use tracing::instrument;

use super::{
    conversation_service::not_found,
    error::{ServiceError, ServiceResult},
};

const MAX_NOTE_LENGTH: usize = 2000;

#[derive(sqlx::FromRow)]
struct NoteRow {
    id: i64,
    conversation_id: i64,
    author_id: i64,
    author_name: String,
    body: String,
    created_at: DateTime<Utc>,
}

impl From<NoteRow> for Note {
    fn from(row: NoteRow) -> Self {
        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            author_id: row.author_id,
            author_name: row.author_name,
            body: row.body,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NoteService {
    pool: PgPool,
}

impl NoteService {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(name = "notes.list", skip(self), err)]
    pub async fn list(&self, company_id: i64, conversation_id: i64) -> ServiceResult<Vec<Note>> {
        let rows = sqlx::query_as::<_, NoteRow>(
            "SELECT n.id, n.conversation_id, n.author_id, u.name AS author_name, n.body, n.created_at
               FROM notes n
               JOIN conversations c ON c.id = n.conversation_id
               JOIN users u ON u.id = n.author_id
              WHERE n.conversation_id = $1 AND c.company_id = $2
              ORDER BY n.created_at, n.id",
        )
        .bind(conversation_id)
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            ensure_conversation(&self.pool, company_id, conversation_id).await?;
        }
        Ok(rows.into_iter().map(Note::from).collect())
    }

    #[instrument(
        name = "notes.create",
        skip(self, author, body),
        fields(company_id = author.company_id),
        err
    )]
    pub async fn create(
        &self,
        author: &AgentIdentity,
        conversation_id: i64,
        body: &str,
    ) -> ServiceResult<Note> {
        let body = validate_note(body)?;

        sqlx::query_as::<_, NoteRow>(
            "INSERT INTO notes (conversation_id, author_id, body)
             SELECT c.id, $3, $4
               FROM conversations c
              WHERE c.id = $1 AND c.company_id = $2
             RETURNING id, conversation_id, author_id, $5::TEXT AS author_name, body, created_at",
        )
        .bind(conversation_id)
        .bind(author.company_id)
        .bind(author.user_id)
        .bind(body)
        .bind(&author.name)
        .fetch_optional(&self.pool)
        .await?
        .map(Note::from)
        .ok_or_else(|| not_found(conversation_id))
    }
}

async fn ensure_conversation(pool: &PgPool, company_id: i64, id: i64) -> ServiceResult<()> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = $1 AND company_id = $2)",
    )
    .bind(id)
    .bind(company_id)
    .fetch_one(pool)
    .await?;

    if exists { Ok(()) } else { Err(not_found(id)) }
}

fn validate_note(body: &str) -> ServiceResult<&str> {
    let body = body.trim();
    if body.is_empty() {
        return Err(ServiceError::validation("note body must not be empty"));
    }
    if body.chars().count() > MAX_NOTE_LENGTH {
        return Err(ServiceError::validation(format!(
            "note body exceeds {MAX_NOTE_LENGTH} characters"
        )));
    }
    Ok(body)
}
