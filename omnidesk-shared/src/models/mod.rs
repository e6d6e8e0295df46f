pub mod admin;
pub mod analytics;
pub mod conversation;
pub mod message;
pub mod note;
pub mod notification;
pub mod template;
pub mod user;

pub use admin::{CacheStats, InvalidateCacheRequest, InvalidateCacheResponse, OpsStats, RealtimeStats};
pub use analytics::{ChannelCount, DashboardStats, StatusBreakdown};
pub use conversation::{
    AssignConversationRequest, Channel, ConversationDetail, ConversationListResponse,
    ConversationStatus, ConversationSummary, CustomerSummary, UpdateConversationStatusRequest,
};
pub use message::{MAX_MESSAGE_LENGTH, MessageDirection, MessageView, SendMessageRequest};
pub use note::{CreateNoteRequest, Note};
pub use notification::{ClientMessage, ServerEvent};
pub use template::{CreateTemplateRequest, Template};
pub use user::{AgentIdentity, UpdateUserRoleRequest, UserRole, UserSummary};

/// Error raised when a persisted enum column holds an unknown value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
