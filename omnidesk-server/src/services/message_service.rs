use chrono::{DateTime, Utc};
use shared::models::{
    AgentIdentity, MAX_MESSAGE_LENGTH, MessageDirection, MessageView, SendMessageRequest,
};
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::{
    conversation_service::not_found,
    error::{ServiceError, ServiceResult},
    template_service::find_template,
};

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    conversation_id: i64,
    direction: String,
    sender_agent_id: Option<i64>,
    content: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for MessageView {
    type Error = ServiceError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            conversation_id: row.conversation_id,
            direction: row.direction.parse()?,
            sender_agent_id: row.sender_agent_id,
            content: row.content,
            created_at: row.created_at,
        })
    }
}

/// Where the body of an outgoing message comes from.
#[derive(Debug, PartialEq, Eq)]
enum MessageSource {
    Text(String),
    Template(i64),
}

#[derive(Debug, Clone)]
pub struct MessageService {
    pool: PgPool,
}

impl MessageService {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Messages of one conversation in chronological order.
    #[instrument(name = "messages.list", skip(self), err)]
    pub async fn list(&self, company_id: i64, conversation_id: i64) -> ServiceResult<Vec<MessageView>> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = $1 AND company_id = $2)",
        )
        .bind(conversation_id)
        .bind(company_id)
        .fetch_one(&self.pool)
        .await?;
        if !exists {
            return Err(not_found(conversation_id));
        }

        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, conversation_id, direction, sender_agent_id, content, created_at
               FROM messages
              WHERE conversation_id = $1
              ORDER BY created_at, id",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MessageView::try_from).collect()
    }

    /// Stores an outbound reply from `agent` and bumps the conversation's
    /// activity time in the same transaction.
    #[instrument(
        name = "messages.send",
        skip(self, agent, request),
        fields(company_id = agent.company_id, user_id = agent.user_id),
        err
    )]
    pub async fn send(
        &self,
        agent: &AgentIdentity,
        conversation_id: i64,
        request: SendMessageRequest,
    ) -> ServiceResult<MessageView> {
        let source = message_source(request)?;
        let mut tx = self.pool.begin().await?;

        let customer_name: String = sqlx::query_scalar(
            "SELECT cu.name
               FROM conversations c
               JOIN customers cu ON cu.id = c.customer_id
              WHERE c.id = $1 AND c.company_id = $2
                FOR UPDATE OF c",
        )
        .bind(conversation_id)
        .bind(agent.company_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| not_found(conversation_id))?;

        let content = match source {
            MessageSource::Text(text) => text,
            MessageSource::Template(template_id) => {
                let template = find_template(&mut *tx, agent.company_id, template_id).await?;
                debug!(template_id, "rendering message from template");
                validate_content(&template.render(&customer_name, &agent.name))?
            }
        };

        let row = sqlx::query_as::<_, MessageRow>(
            "INSERT INTO messages (conversation_id, direction, sender_agent_id, content)
             VALUES ($1, $2, $3, $4)
             RETURNING id, conversation_id, direction, sender_agent_id, content, created_at",
        )
        .bind(conversation_id)
        .bind(MessageDirection::Outbound.as_str())
        .bind(agent.user_id)
        .bind(&content)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE conversations
                SET last_message_at = $2, updated_at = NOW()
              WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(row.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }
}

fn message_source(request: SendMessageRequest) -> ServiceResult<MessageSource> {
    match (request.content, request.template_id) {
        (Some(_), Some(_)) => Err(ServiceError::validation(
            "provide either content or template_id, not both",
        )),
        (Some(content), None) => validate_content(&content).map(MessageSource::Text),
        (None, Some(template_id)) => Ok(MessageSource::Template(template_id)),
        (None, None) => Err(ServiceError::validation("message content is required")),
    }
}

fn validate_content(content: &str) -> ServiceResult<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::validation("message content must not be empty"));
    }
    if trimmed.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ServiceError::validation(format!(
            "message content exceeds {MAX_MESSAGE_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_owned())
}
