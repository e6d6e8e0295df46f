use axum::{body::Body, http::Request, response::Response};
use std::time::Duration;
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{DefaultOnBodyChunk, DefaultOnEos, MakeSpan, TraceLayer};
use tracing::{Span, debug, error, info};

use crate::middleware::request_context::RequestContext;

type TraceLayerType = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    HttpMakeSpan,
    fn(&Request<Body>, &Span),
    fn(&Response, Duration, &Span),
    DefaultOnBodyChunk,
    DefaultOnEos,
    fn(ServerErrorsFailureClass, Duration, &Span),
>;

/// Opens one span per request, tagged with the id assigned by the request-id
/// middleware.
#[derive(Clone, Debug, Default)]
pub struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .extensions()
            .get::<RequestContext>()
            .map_or_else(|| "n/a".to_owned(), |ctx| ctx.request_id.clone());

        tracing::info_span!(
            "http_request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
            status_code = tracing::field::Empty,
        )
    }
}

fn on_request(req: &Request<Body>, _span: &Span) {
    debug!(version = ?req.version(), "started processing request");
}

fn on_response(response: &Response, latency: Duration, span: &Span) {
    let status = response.status().as_u16();
    span.record("status_code", status);
    info!(status, latency_ms = latency.as_millis(), "finished processing request");
}

fn on_failure(error: ServerErrorsFailureClass, latency: Duration, _span: &Span) {
    error!(error = %error, latency_ms = latency.as_millis(), "error processing request");
}

pub fn create_trace_layer() -> TraceLayerType {
    TraceLayer::new_for_http()
        .make_span_with(HttpMakeSpan)
        .on_request(on_request as fn(&Request<Body>, &Span))
        .on_response(on_response as fn(&Response, Duration, &Span))
        .on_failure(on_failure as fn(ServerErrorsFailureClass, Duration, &Span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::get};
    use tower::ServiceExt;
    use tracing_subscriber::util::SubscriberInitExt;

    #[test]
    fn span_uses_request_id_from_context() {
        let _guard = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .set_default();
        let mut request = Request::builder().uri("/api/me").body(()).unwrap();
        request.extensions_mut().insert(RequestContext {
            request_id: "req-9".into(),
            identity: None,
        });

        let span = HttpMakeSpan.make_span(&request);
        assert_eq!(span.metadata().map(|meta| meta.name()), Some("http_request"));
    }

    #[tokio::test]
    async fn layer_passes_responses_through() {
        let app = Router::new()
            .route("/", get(|| async { StatusCode::ACCEPTED }))
            .layer(create_trace_layer());

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
