use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, header},
    middleware::Next,
    response::Response,
};
use shared::config::server::Config;

/// Baseline response headers. HSTS is only emitted when enabled, which the
/// production profile does by default.
#[derive(Clone, Debug)]
pub struct SecurityHeadersState {
    hsts: Option<HeaderValue>,
    content_security_policy: HeaderValue,
}

impl SecurityHeadersState {
    pub fn from_config(config: &Config) -> Self {
        let hsts = &config.security.hsts;
        let hsts = hsts.enabled.then(|| {
            let mut directives = vec![format!("max-age={}", hsts.max_age_seconds)];
            if hsts.include_subdomains {
                directives.push("includeSubDomains".into());
            }
            if hsts.preload {
                directives.push("preload".into());
            }
            HeaderValue::from_str(&directives.join("; "))
                .unwrap_or_else(|_| HeaderValue::from_static("max-age=63072000"))
        });

        Self {
            hsts,
            content_security_policy: HeaderValue::from_static(
                "default-src 'self'; frame-ancestors 'none'; object-src 'none'; base-uri 'self'",
            ),
        }
    }
}

pub async fn apply_security_headers(
    State(state): State<SecurityHeadersState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    if let Some(hsts) = state.hsts {
        headers.insert(header::STRICT_TRANSPORT_SECURITY, hsts);
    }
    headers
        .entry(header::X_CONTENT_TYPE_OPTIONS)
        .or_insert_with(|| HeaderValue::from_static("nosniff"));
    headers
        .entry(header::X_FRAME_OPTIONS)
        .or_insert_with(|| HeaderValue::from_static("DENY"));
    headers
        .entry(header::CONTENT_SECURITY_POLICY)
        .or_insert(state.content_security_policy);

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, routing::get};
    use shared::config::server::Profile;
    use tower::ServiceExt;

    async fn headers_for(profile: Profile) -> http::HeaderMap {
        let config = Config::default_for_profile(profile);
        let app = Router::new().route("/", get(|| async { "ok" })).layer(
            axum::middleware::from_fn_with_state(
                SecurityHeadersState::from_config(&config),
                apply_security_headers,
            ),
        );
        app.oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap()
            .headers()
            .clone()
    }

    #[tokio::test]
    async fn hsts_only_in_production() {
        let prod = headers_for(Profile::Prod).await;
        assert!(prod.contains_key(header::STRICT_TRANSPORT_SECURITY));

        let dev = headers_for(Profile::Dev).await;
        assert!(!dev.contains_key(header::STRICT_TRANSPORT_SECURITY));
        assert_eq!(dev.get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
    }
}
