use std::sync::Arc;

use shared::models::{ConversationStatus, MessageView, ServerEvent};
use tracing::debug;

use super::{
    notification_hub::NotificationHub,
    query_cache::{ReadThroughCache, keys},
};

/// Glue run after a successful write: drop the company's stale cached reads,
/// then tell its connected agents what changed.
///
/// Invalidation happens first so an agent reacting to the notification reads
/// fresh data.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    hub: Arc<NotificationHub>,
    cache: Arc<ReadThroughCache>,
}

impl ChangeNotifier {
    #[must_use]
    pub fn new(hub: Arc<NotificationHub>, cache: Arc<ReadThroughCache>) -> Self {
        Self { hub, cache }
    }

    pub async fn message_created(&self, company_id: i64, message: MessageView) -> usize {
        self.invalidate_company_reads(company_id).await;
        self.hub
            .publish(company_id, &ServerEvent::new_message(message))
            .await
    }

    pub async fn conversation_updated(
        &self,
        company_id: i64,
        conversation_id: i64,
        status: ConversationStatus,
        assigned_agent_id: Option<i64>,
    ) -> usize {
        self.invalidate_company_reads(company_id).await;
        self.hub
            .publish(
                company_id,
                &ServerEvent::conversation_update(conversation_id, status, assigned_agent_id),
            )
            .await
    }

    pub async fn templates_changed(&self, company_id: i64) {
        self.cache.invalidate(&keys::templates(company_id)).await;
    }

    async fn invalidate_company_reads(&self, company_id: i64) {
        let conversations = self
            .cache
            .invalidate(&keys::conversations_prefix(company_id))
            .await;
        let dashboard = self.cache.invalidate(&keys::dashboard(company_id)).await;
        debug!(company_id, conversations, dashboard, "invalidated company reads");
    }
}
