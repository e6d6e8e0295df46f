use chrono::{DateTime, Utc};
use shared::models::{UserRole, UserSummary};
use sqlx::PgPool;
use tracing::{info, instrument};

use super::error::{ServiceError, ServiceResult};

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    role: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserSummary {
    type Error = ServiceError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            email: row.email,
            role: row.role.parse()?,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

/// Company user administration.
#[derive(Debug, Clone)]
pub struct UserService {
    pool: PgPool,
}

impl UserService {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(name = "users.list", skip(self), err)]
    pub async fn list(&self, company_id: i64) -> ServiceResult<Vec<UserSummary>> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, role, is_active, created_at
               FROM users
              WHERE company_id = $1
              ORDER BY name, id",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UserSummary::try_from).collect()
    }

    /// Changes a user's role. Admins cannot change their own role, which keeps
    /// at least the acting admin in place.
    #[instrument(name = "users.update_role", skip(self), err)]
    pub async fn update_role(
        &self,
        company_id: i64,
        actor_id: i64,
        user_id: i64,
        role: UserRole,
    ) -> ServiceResult<UserSummary> {
        if actor_id == user_id {
            return Err(ServiceError::forbidden("you cannot change your own role"));
        }

        let row = sqlx::query_as::<_, UserRow>(
            "UPDATE users
                SET role = $3
              WHERE id = $1 AND company_id = $2
          RETURNING id, name, email, role, is_active, created_at",
        )
        .bind(user_id)
        .bind(company_id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("user {user_id} not found")))?;

        info!(user_id, role = %role, "user role updated");
        row.try_into()
    }
}
