use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

use super::UnknownVariant;

/// Longest message body an agent may send.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Whether a message came from the customer or was sent by an agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl fmt::Display for MessageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageDirection {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            other => Err(UnknownVariant::new("message direction", other)),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct MessageView {
    pub id: i64,
    pub conversation_id: i64,
    pub direction: MessageDirection,
    /// Agent that sent an outbound message; `None` for customer messages.
    pub sender_agent_id: Option<i64>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Body of an agent reply. Either `content` or `template_id` must be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub template_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_request_fields_are_optional() {
        let request: SendMessageRequest = serde_json::from_str(r#"{"template_id": 3}"#).unwrap();
        assert_eq!(request.template_id, Some(3));
        assert!(request.content.is_none());
    }

    #[test]
    fn direction_parses_persisted_values() {
        assert_eq!(
            "outbound".parse::<MessageDirection>().unwrap(),
            MessageDirection::Outbound
        );
        assert!("sideways".parse::<MessageDirection>().is_err());
    }
}
