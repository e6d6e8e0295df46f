use chrono::{DateTime, Utc};
use shared::models::{Channel, CreateTemplateRequest, Template};
use sqlx::{PgExecutor, PgPool};
use tracing::instrument;

use super::error::{ServiceError, ServiceResult};

const MAX_NAME_LENGTH: usize = 120;
const MAX_BODY_LENGTH: usize = shared::models::MAX_MESSAGE_LENGTH;

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: i64,
    name: String,
    body: String,
    channel: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TemplateRow> for Template {
    type Error = ServiceError;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            body: row.body,
            channel: row.channel.as_deref().map(str::parse::<Channel>).transpose()?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TemplateService {
    pool: PgPool,
}

impl TemplateService {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(name = "templates.list", skip(self), err)]
    pub async fn list(&self, company_id: i64) -> ServiceResult<Vec<Template>> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            "SELECT id, name, body, channel, created_at
               FROM templates
              WHERE company_id = $1
              ORDER BY name, id",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Template::try_from).collect()
    }

    #[instrument(name = "templates.create", skip(self, request), err)]
    pub async fn create(
        &self,
        company_id: i64,
        request: CreateTemplateRequest,
    ) -> ServiceResult<Template> {
        let (name, body) = validate_template(&request)?;

        sqlx::query_as::<_, TemplateRow>(
            "INSERT INTO templates (company_id, name, body, channel)
             VALUES ($1, $2, $3, $4)
             RETURNING id, name, body, channel, created_at",
        )
        .bind(company_id)
        .bind(name)
        .bind(body)
        .bind(request.channel.map(Channel::as_str))
        .fetch_one(&self.pool)
        .await
        .map_err(ServiceError::from_db_error)?
        .try_into()
    }

    #[instrument(name = "templates.delete", skip(self), err)]
    pub async fn delete(&self, company_id: i64, id: i64) -> ServiceResult<()> {
        let deleted = sqlx::query("DELETE FROM templates WHERE id = $1 AND company_id = $2")
            .bind(id)
            .bind(company_id)
            .execute(&self.pool)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(ServiceError::not_found(format!("template {id} not found")));
        }
        Ok(())
    }
}

/// Loads one company template with any executor, so it can join a caller's
/// transaction.
pub(crate) async fn find_template<'e>(
    executor: impl PgExecutor<'e>,
    company_id: i64,
    id: i64,
) -> ServiceResult<Template> {
    sqlx::query_as::<_, TemplateRow>(
        "SELECT id, name, body, channel, created_at
           FROM templates
          WHERE id = $1 AND company_id = $2",
    )
    .bind(id)
    .bind(company_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| ServiceError::not_found(format!("template {id} not found")))?
    .try_into()
}

fn validate_template(request: &CreateTemplateRequest) -> ServiceResult<(&str, &str)> {
    let name = request.name.trim();
    let body = request.body.trim();

    if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
        return Err(ServiceError::validation(format!(
            "template name must be 1 to {MAX_NAME_LENGTH} characters"
        )));
    }
    if body.is_empty() || body.chars().count() > MAX_BODY_LENGTH {
        return Err(ServiceError::validation(format!(
            "template body must be 1 to {MAX_BODY_LENGTH} characters"
        )));
    }
    Ok((name, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, body: &str) -> CreateTemplateRequest {
        CreateTemplateRequest {
            name: name.into(),
            body: body.into(),
            channel: None,
        }
    }

    #[test]
    fn validation_trims_and_bounds_fields() {
        let valid = request("  greeting ", " Hello {{customer_name}} ");
        assert_eq!(
            validate_template(&valid).unwrap(),
            ("greeting", "Hello {{customer_name}}")
        );

        assert!(validate_template(&request("", "body")).is_err());
        assert!(validate_template(&request("name", "   ")).is_err());
        assert!(validate_template(&request(&"n".repeat(MAX_NAME_LENGTH + 1), "body")).is_err());
    }

    #[test]
    fn row_with_channel_maps() {
        let template = Template::try_from(TemplateRow {
            id: 3,
            name: "away".into(),
            body: "Back soon".into(),
            channel: Some("instagram".into()),
            created_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(template.channel, Some(Channel::Instagram));
    }
}
