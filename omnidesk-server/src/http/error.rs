use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use super::problem::ProblemDetails;
use crate::services::error::ServiceError;

pub type AppResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_failed", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limit_exceeded",
            message,
        )
    }

    pub fn service_unavailable(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, code, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if self.status.is_server_error() {
            error!(code = self.code, message = %self.message, "request failed");
        }

        let mut problem = ProblemDetails::new(self.status, self.code, self.message);
        if let Some(details) = self.details {
            problem = problem.with_details(details);
        }

        problem.into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal_server_error(value.to_string())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let code = db_err
                .code()
                .unwrap_or(std::borrow::Cow::Borrowed("unknown"));
            let message = format!("database error {code}");
            return Self::internal_server_error(message)
                .with_details(json!({ "sqlstate": code, "message": db_err.message() }));
        }

        Self::internal_server_error(err.to_string())
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(message) => Self::bad_request(message),
            ServiceError::NotFound(message) => Self::not_found(message),
            ServiceError::Forbidden(message) => Self::forbidden(message),
            ServiceError::Database(db_err) => Self::from(db_err),
            ServiceError::Corrupt(variant) => Self::internal_server_error(variant.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;
    use serde_json::Value;

    #[test]
    fn with_details_is_kept() {
        let error = ApiError::forbidden("nope").with_details(json!({ "reason": "role" }));
        assert_eq!(error.status(), StatusCode::FORBIDDEN);
        assert_eq!(error.code(), "forbidden");
        assert!(
            error
                .details
                .as_ref()
                .is_some_and(|details| details["reason"] == Value::from("role"))
        );
    }

    #[tokio::test]
    async fn into_response_serializes_problem_details() {
        let response = ApiError::not_found("conversation 9 not found")
            .with_details(json!({ "conversation_id": 9 }))
            .into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );

        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .expect("body to bytes");
        let json: Value = serde_json::from_slice(&bytes).expect("problem details json");
        assert_eq!(json["type"], "https://omnidesk.dev/problems/not_found");
        assert_eq!(json["code"], "not_found");
        assert_eq!(json["details"]["conversation_id"], 9);
    }

    #[test]
    fn service_errors_map_to_matching_status_codes() {
        let cases = [
            (ServiceError::validation("empty"), StatusCode::BAD_REQUEST),
            (ServiceError::not_found("missing"), StatusCode::NOT_FOUND),
            (ServiceError::forbidden("role"), StatusCode::FORBIDDEN),
            (
                ServiceError::Database(sqlx::Error::PoolTimedOut),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }
}
