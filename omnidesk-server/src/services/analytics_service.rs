use shared::models::{Channel, ChannelCount, ConversationStatus, DashboardStats, StatusBreakdown};
use sqlx::PgPool;
use tracing::instrument;

use super::error::ServiceResult;

#[derive(sqlx::FromRow)]
struct GroupCount {
    key: String,
    total: i64,
}

#[derive(Debug, Clone)]
pub struct AnalyticsService {
    pool: PgPool,
}

impl AnalyticsService {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Company-wide dashboard figures. Expensive; callers serve it through the
    /// query cache.
    #[instrument(name = "analytics.dashboard", skip(self), err)]
    pub async fn dashboard(&self, company_id: i64) -> ServiceResult<DashboardStats> {
        let by_status = sqlx::query_as::<_, GroupCount>(
            "SELECT status AS key, COUNT(*) AS total
               FROM conversations
              WHERE company_id = $1
              GROUP BY status",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        let by_channel = sqlx::query_as::<_, GroupCount>(
            "SELECT channel AS key, COUNT(*) AS total
               FROM conversations
              WHERE company_id = $1
              GROUP BY channel
              ORDER BY total DESC, channel",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        let messages_last_24h: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)
               FROM messages m
               JOIN conversations c ON c.id = m.conversation_id
              WHERE c.company_id = $1
                AND m.created_at >= NOW() - INTERVAL '24 hours'",
        )
        .bind(company_id)
        .fetch_one(&self.pool)
        .await?;

        let avg_first_response_seconds: Option<f64> = sqlx::query_scalar(
            "WITH firsts AS (
                 SELECT m.conversation_id,
                        MIN(m.created_at) FILTER (WHERE m.direction = 'inbound')  AS first_in,
                        MIN(m.created_at) FILTER (WHERE m.direction = 'outbound') AS first_out
                   FROM messages m
                   JOIN conversations c ON c.id = m.conversation_id
                  WHERE c.company_id = $1
                  GROUP BY m.conversation_id
             )
             SELECT AVG(EXTRACT(EPOCH FROM (first_out - first_in)))::FLOAT8
               FROM firsts
              WHERE first_out > first_in",
        )
        .bind(company_id)
        .fetch_one(&self.pool)
        .await?;

        summarize(&by_status, by_channel, messages_last_24h, avg_first_response_seconds)
    }
}

fn summarize(
    by_status: &[GroupCount],
    by_channel: Vec<GroupCount>,
    messages_last_24h: i64,
    avg_first_response_seconds: Option<f64>,
) -> ServiceResult<DashboardStats> {
    let mut breakdown = StatusBreakdown::default();
    for group in by_status {
        let slot = match group.key.parse::<ConversationStatus>()? {
            ConversationStatus::Open => &mut breakdown.open,
            ConversationStatus::Pending => &mut breakdown.pending,
            ConversationStatus::Resolved => &mut breakdown.resolved,
            ConversationStatus::Closed => &mut breakdown.closed,
        };
        *slot = group.total;
    }

    let by_channel = by_channel
        .into_iter()
        .map(|group| {
            Ok(ChannelCount {
                channel: group.key.parse::<Channel>()?,
                conversations: group.total,
            })
        })
        .collect::<ServiceResult<Vec<_>>>()?;

    Ok(DashboardStats {
        total_conversations: by_status.iter().map(|group| group.total).sum(),
        by_status: breakdown,
        by_channel,
        messages_last_24h,
        avg_first_response_seconds,
    })
}
