use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

use super::UnknownVariant;

/// Company-scoped role assignments for an agent account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Supervisor,
    Agent,
}

impl UserRole {
    /// Return the canonical string representation expected by persistence layers.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Supervisor => "supervisor",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Self::Admin),
            "supervisor" => Ok(Self::Supervisor),
            "agent" => Ok(Self::Agent),
            other => Err(UnknownVariant::new("user role", other)),
        }
    }
}

/// The authenticated agent behind a request or realtime connection.
///
/// `company_id` is the tenant every query and notification is scoped to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct AgentIdentity {
    pub user_id: i64,
    pub company_id: i64,
    pub name: String,
    pub email: String,
    pub role: UserRole,
}

impl AgentIdentity {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Admins and supervisors curate the company's reply templates.
    #[must_use]
    pub fn can_manage_templates(&self) -> bool {
        matches!(self.role, UserRole::Admin | UserRole::Supervisor)
    }
}

/// A user of the company as shown to administrators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct UserSummary {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct UpdateUserRoleRequest {
    pub role: UserRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(role: UserRole) -> AgentIdentity {
        AgentIdentity {
            user_id: 7,
            company_id: 1,
            name: "Ana".into(),
            email: "ana@example.com".into(),
            role,
        }
    }

    #[test]
    fn role_parses_its_own_representation() {
        for role in [UserRole::Admin, UserRole::Supervisor, UserRole::Agent] {
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), role);
        }
        assert!("owner".parse::<UserRole>().is_err());
    }

    #[test]
    fn template_management_requires_elevated_role() {
        assert!(identity(UserRole::Admin).can_manage_templates());
        assert!(identity(UserRole::Supervisor).can_manage_templates());
        assert!(!identity(UserRole::Agent).can_manage_templates());
        assert!(!identity(UserRole::Supervisor).is_admin());
    }

    #[test]
    fn role_serializes_snake_case() {
        let json = serde_json::to_string(&UserRole::Supervisor).unwrap();
        assert_eq!(json, "\"supervisor\"");
    }
}
