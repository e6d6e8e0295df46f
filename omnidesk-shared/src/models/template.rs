use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::Channel;

/// A canned reply agents can send instead of typing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Template {
    pub id: i64,
    pub name: String,
    /// Body text; may contain `{{customer_name}}` and `{{agent_name}}` placeholders.
    pub body: String,
    /// Restricts the template to one channel when set.
    pub channel: Option<Channel>,
    pub created_at: DateTime<Utc>,
}

impl Template {
    /// Substitutes the supported placeholders in one pass over the body.
    /// Unknown placeholders are left as-is, and substituted text is never
    /// scanned again.
    #[must_use]
    pub fn render(&self, customer_name: &str, agent_name: &str) -> String {
        let mut out = String::with_capacity(self.body.len());
        let mut rest = self.body.as_str();
        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let tail = &rest[open..];
            if let Some(after) = tail.strip_prefix("{{customer_name}}") {
                out.push_str(customer_name);
                rest = after;
            } else if let Some(after) = tail.strip_prefix("{{agent_name}}") {
                out.push_str(agent_name);
                rest = after;
            } else {
                out.push('{');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub body: String,
    #[serde(default)]
    pub channel: Option<Channel>,
}
