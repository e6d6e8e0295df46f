//! Realtime notification frames exchanged over the `/ws` connection.
//!
//! Frames are JSON objects discriminated by `type`. Delivery is best-effort and
//! at-most-once; clients that miss a frame recover by re-fetching over HTTP.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{ConversationStatus, MessageView};

/// Frame pushed from the server to connected agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage {
        #[serde(rename = "conversationId")]
        conversation_id: i64,
        message: MessageView,
        /// Milliseconds since the Unix epoch.
        timestamp: i64,
    },
    ConversationUpdate {
        #[serde(rename = "conversationId")]
        conversation_id: i64,
        status: ConversationStatus,
        #[serde(rename = "assignedAgentId", default)]
        assigned_agent_id: Option<i64>,
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
}

impl ServerEvent {
    #[must_use]
    pub fn new_message(message: MessageView) -> Self {
        Self::NewMessage {
            conversation_id: message.conversation_id,
            message,
            timestamp: now_millis(),
        }
    }

    #[must_use]
    pub fn conversation_update(
        conversation_id: i64,
        status: ConversationStatus,
        assigned_agent_id: Option<i64>,
    ) -> Self {
        Self::ConversationUpdate {
            conversation_id,
            status,
            assigned_agent_id,
            timestamp: now_millis(),
        }
    }

    #[must_use]
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: now_millis(),
        }
    }

    /// Wire name of the frame, as it appears in the `type` field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::ConversationUpdate { .. } => "conversation_update",
            Self::Pong { .. } => "pong",
        }
    }

    #[must_use]
    pub fn conversation_id(&self) -> Option<i64> {
        match self {
            Self::NewMessage {
                conversation_id, ..
            }
            | Self::ConversationUpdate {
                conversation_id, ..
            } => Some(*conversation_id),
            Self::Pong { .. } => None,
        }
    }
}

/// Control frame sent by a client.
///
/// `join_conversation` and `leave_conversation` are accepted for forward
/// compatibility but do not change what the connection receives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    JoinConversation {
        #[serde(rename = "conversationId", default)]
        conversation_id: Option<i64>,
    },
    LeaveConversation {
        #[serde(rename = "conversationId", default)]
        conversation_id: Option<i64>,
    },
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
