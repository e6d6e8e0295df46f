use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::Channel;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct StatusBreakdown {
    pub open: i64,
    pub pending: i64,
    pub resolved: i64,
    pub closed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ChannelCount {
    pub channel: Channel,
    pub conversations: i64,
}

/// Company-wide figures for the analytics dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct DashboardStats {
    pub total_conversations: i64,
    pub by_status: StatusBreakdown,
    pub by_channel: Vec<ChannelCount>,
    pub messages_last_24h: i64,
    /// Mean seconds between a conversation's first inbound message and the first agent reply.
    pub avg_first_response_seconds: Option<f64>,
}
