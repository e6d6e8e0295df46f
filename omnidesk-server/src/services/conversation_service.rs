//! Company-scoped conversation queries and state changes.
//!
//! Every statement filters on `company_id`; a conversation owned by another
//! company is reported as not found rather than forbidden.

use chrono::{DateTime, Utc};
use shared::models::{Channel, ConversationStatus, ConversationSummary, CustomerSummary};
use sqlx::PgPool;
use tracing::instrument;

use super::error::{ServiceError, ServiceResult};

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 200;
const PREVIEW_CHARS: usize = 120;

/// Inbox filter. `limit` is clamped to `1..=MAX_LIST_LIMIT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversationFilter {
    pub status: Option<ConversationStatus>,
    pub channel: Option<Channel>,
    pub limit: Option<i64>,
}

impl ConversationFilter {
    #[must_use]
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }
}

const SUMMARY_SELECT: &str = "
    SELECT c.id,
           c.channel,
           c.status,
           c.assigned_agent_id,
           c.last_message_at,
           c.created_at,
           cu.id    AS customer_id,
           cu.name  AS customer_name,
           cu.phone AS customer_phone,
           cu.email AS customer_email,
           (SELECT m.content
              FROM messages m
             WHERE m.conversation_id = c.id
             ORDER BY m.created_at DESC, m.id DESC
             LIMIT 1) AS last_message
      FROM conversations c
      JOIN customers cu ON cu.id = c.customer_id";

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: i64,
    channel: String,
    status: String,
    assigned_agent_id: Option<i64>,
    last_message_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    customer_id: i64,
    customer_name: String,
    customer_phone: Option<String>,
    customer_email: Option<String>,
    last_message: Option<String>,
}

impl TryFrom<ConversationRow> for ConversationSummary {
    type Error = ServiceError;

    fn try_from(row: ConversationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            customer: CustomerSummary {
                id: row.customer_id,
                name: row.customer_name,
                phone: row.customer_phone,
                email: row.customer_email,
            },
            channel: row.channel.parse()?,
            status: row.status.parse()?,
            assigned_agent_id: row.assigned_agent_id,
            last_message_preview: row.last_message.as_deref().map(preview),
            last_message_at: row.last_message_at,
            created_at: row.created_at,
        })
    }
}

fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", &content[..cut]),
        None => content.to_owned(),
    }
}

#[derive(Debug, Clone)]
pub struct ConversationService {
    pool: PgPool,
}

impl ConversationService {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inbox listing, most recent activity first.
    #[instrument(name = "conversations.list", skip(self), err)]
    pub async fn list(
        &self,
        company_id: i64,
        filter: ConversationFilter,
    ) -> ServiceResult<Vec<ConversationSummary>> {
        let sql = format!(
            "{SUMMARY_SELECT}
             WHERE c.company_id = $1
               AND ($2::TEXT IS NULL OR c.status = $2)
               AND ($3::TEXT IS NULL OR c.channel = $3)
             ORDER BY COALESCE(c.last_message_at, c.created_at) DESC, c.id DESC
             LIMIT $4"
        );

        let rows = sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(company_id)
            .bind(filter.status.map(ConversationStatus::as_str))
            .bind(filter.channel.map(Channel::as_str))
            .bind(filter.effective_limit())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ConversationSummary::try_from).collect()
    }

    #[instrument(name = "conversations.get", skip(self), err)]
    pub async fn get(&self, company_id: i64, id: i64) -> ServiceResult<ConversationSummary> {
        let sql = format!("{SUMMARY_SELECT} WHERE c.company_id = $1 AND c.id = $2");
        sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(company_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| not_found(id))?
            .try_into()
    }

    /// Fails with `NotFound` unless the conversation belongs to the company.
    pub async fn ensure_exists(&self, company_id: i64, id: i64) -> ServiceResult<()> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = $1 AND company_id = $2)",
        )
        .bind(id)
        .bind(company_id)
        .fetch_one(&self.pool)
        .await?;

        if exists { Ok(()) } else { Err(not_found(id)) }
    }

    #[instrument(name = "conversations.update_status", skip(self), err)]
    pub async fn update_status(
        &self,
        company_id: i64,
        id: i64,
        status: ConversationStatus,
    ) -> ServiceResult<ConversationSummary> {
        let updated = sqlx::query(
            "UPDATE conversations
                SET status = $3, updated_at = NOW()
              WHERE id = $1 AND company_id = $2",
        )
        .bind(id)
        .bind(company_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(not_found(id));
        }
        self.get(company_id, id).await
    }

    /// Assigns the conversation to `agent_id`, or clears the assignee. The
    /// agent must be an active user of the same company.
    #[instrument(name = "conversations.assign", skip(self), err)]
    pub async fn assign(
        &self,
        company_id: i64,
        id: i64,
        agent_id: Option<i64>,
    ) -> ServiceResult<ConversationSummary> {
        if let Some(agent_id) = agent_id {
            let eligible: bool = sqlx::query_scalar(
                "SELECT EXISTS(
                     SELECT 1 FROM users WHERE id = $1 AND company_id = $2 AND is_active
                 )",
            )
            .bind(agent_id)
            .bind(company_id)
            .fetch_one(&self.pool)
            .await?;

            if !eligible {
                return Err(ServiceError::validation(format!(
                    "agent {agent_id} is not an active member of this company"
                )));
            }
        }

        let updated = sqlx::query(
            "UPDATE conversations
                SET assigned_agent_id = $3, updated_at = NOW()
              WHERE id = $1 AND company_id = $2",
        )
        .bind(id)
        .bind(company_id)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(not_found(id));
        }
        self.get(company_id, id).await
    }
}

pub(crate) fn not_found(id: i64) -> ServiceError {
    ServiceError::not_found(format!("conversation {id} not found"))
}
