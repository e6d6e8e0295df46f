//! Agent authentication: bearer-token extraction and session resolution.

pub mod session;

use axum::http::{HeaderMap, header};
use cookie::Cookie;

/// Extracts the session token from, in order of precedence, an explicit
/// `token` query value, an `Authorization: Bearer` header, or the session
/// cookie. Blank values are ignored.
pub fn request_token(
    headers: &HeaderMap,
    query_token: Option<&str>,
    cookie_name: &str,
) -> Option<String> {
    query_token
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .or_else(|| bearer_token(headers))
        .or_else(|| session_cookie(headers, cookie_name))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_owned())
}

fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse(value).flatten())
        .find(|cookie| cookie.name() == name && !cookie.value().is_empty())
        .map(|cookie| cookie.value().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn query_token_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));

        assert_eq!(
            request_token(&headers, Some("query-token"), "omnidesk_session").as_deref(),
            Some("query-token")
        );
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc123"));

        assert_eq!(
            request_token(&headers, Some("  "), "omnidesk_session").as_deref(),
            Some("abc123")
        );
    }

    #[test]
    fn falls_back_to_session_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; omnidesk_session=cookie-token"),
        );

        assert_eq!(
            request_token(&headers, None, "omnidesk_session").as_deref(),
            Some("cookie-token")
        );
    }

    #[test]
    fn missing_credentials_yield_none() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("omnidesk_session="));
        assert!(request_token(&headers, None, "omnidesk_session").is_none());
    }
}
