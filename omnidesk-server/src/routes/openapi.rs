use std::sync::Arc;

use crate::{app_state::AppState, openapi::ApiDoc};
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

async fn openapi_yaml() -> impl IntoResponse {
    match ApiDoc::openapi().to_yaml() {
        Ok(yaml) => (StatusCode::OK, yaml),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("YAML error: {e}"),
        ),
    }
}

/// Swagger UI plus the JSON and YAML renderings of the API document.
pub fn openapi_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/openapi/omnidesk.json", ApiDoc::openapi()))
        .route("/openapi/omnidesk.yaml", get(openapi_yaml))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    #[tokio::test]
    async fn yaml_document_is_served() {
        let app = openapi_routes().with_state(Arc::new(AppState::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/openapi/omnidesk.yaml")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn json_document_is_served() {
        let app = openapi_routes().with_state(Arc::new(AppState::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/openapi/omnidesk.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
