use std::fmt;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use shared::models::{AgentIdentity, UnknownVariant, UserRole};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors produced while resolving a session token.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("session references an invalid role: {0}")]
    InvalidRole(#[from] UnknownVariant),
}

/// Resolves an opaque bearer token to the agent it was issued to.
///
/// `Ok(None)` means the token is unknown, expired, revoked, or belongs to a
/// deactivated user.
#[async_trait]
pub trait SessionStore: Send + Sync + fmt::Debug {
    async fn resolve(&self, token: &str) -> Result<Option<AgentIdentity>, SessionError>;
}

/// Session store backed by the `agent_sessions` table. Only SHA-256 digests of
/// tokens are stored.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl fmt::Debug for PgSessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgSessionStore").finish_non_exhaustive()
    }
}

#[derive(sqlx::FromRow)]
struct SessionIdentityRow {
    user_id: i64,
    company_id: i64,
    name: String,
    email: String,
    role: String,
}

impl TryFrom<SessionIdentityRow> for AgentIdentity {
    type Error = UnknownVariant;

    fn try_from(row: SessionIdentityRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: row.user_id,
            company_id: row.company_id,
            name: row.name,
            email: row.email,
            role: row.role.parse::<UserRole>()?,
        })
    }
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn hash_token(token: &str) -> Vec<u8> {
        Sha256::digest(token.as_bytes()).to_vec()
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    #[instrument(name = "session.resolve", skip_all, err)]
    async fn resolve(&self, token: &str) -> Result<Option<AgentIdentity>, SessionError> {
        if token.trim().is_empty() {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, SessionIdentityRow>(
            "UPDATE agent_sessions s
                SET last_seen_at = NOW()
               FROM users u
              WHERE s.token_hash = $1
                AND s.revoked_at IS NULL
                AND s.expires_at > NOW()
                AND u.id = s.user_id
                AND u.is_active
          RETURNING u.id AS user_id, u.company_id, u.name, u.email, u.role",
        )
        .bind(Self::hash_token(token))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            debug!("session token did not resolve");
            return Ok(None);
        };

        Ok(Some(AgentIdentity::try_from(row)?))
    }
}
