use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use axum::{
    Extension, Router,
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::get,
    serve,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use shared::config::server::{Config, DatabaseConfig, LogFormat};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    app_state::AppState,
    db::bootstrap,
    handlers,
    middleware::{
        auth::require_session,
        rate_limit::{self, RateLimitState},
        request_context::{self, RequestIdState},
        security::{self, SecurityHeadersState},
    },
    routes::{self, openapi::openapi_routes},
    tracer,
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Process-wide Prometheus handle. The first call installs the global
/// recorder; if another recorder already owns that slot, a detached recorder
/// still backs the handle so `/metrics` keeps rendering.
pub fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .unwrap_or_else(|err| {
                    warn!(error = %err, "prometheus recorder already installed");
                    PrometheusBuilder::new().build_recorder().handle()
                })
        })
        .clone()
}

fn describe_metrics() {
    metrics::describe_counter!("health_checks_total", "Health and readiness probe results");
    metrics::describe_counter!(
        "omnidesk_ws_notifications_total",
        "Events published to company notification groups"
    );
    metrics::describe_counter!(
        "omnidesk_ws_delivery_failures_total",
        "Connections dropped because their outbound queue was full or closed"
    );
    metrics::describe_counter!(
        "omnidesk_ws_heartbeat_evictions_total",
        "Connections evicted after missing a heartbeat probe"
    );
    metrics::describe_gauge!("omnidesk_ws_connections", "Open notification sockets");
    metrics::describe_counter!("omnidesk_cache_hits_total", "Read-through cache hits");
    metrics::describe_counter!("omnidesk_cache_misses_total", "Read-through cache misses");
    metrics::describe_counter!(
        "omnidesk_cache_invalidations_total",
        "Cache entries removed by invalidation"
    );
    metrics::describe_counter!("omnidesk_rate_limited_total", "Requests rejected with 429");
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    // A subscriber may already be installed (tests, embedding); keep it.
    let installed = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates the Postgres pool. Every connection gets the configured
/// statement timeout.
///
/// # Errors
/// Returns an error if the database connection pool cannot be created.
pub async fn create_database_pool(db: &DatabaseConfig) -> Result<sqlx::PgPool, sqlx::Error> {
    let statement_timeout = format!("SET statement_timeout = {}", db.statement_timeout_ms);
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .after_connect(move |conn, _meta| {
            let statement_timeout = statement_timeout.clone();
            Box::pin(async move {
                sqlx::query(&statement_timeout).execute(conn).await?;
                Ok(())
            })
        })
        .connect(&db.url)
        .await?;
    metrics::gauge!("db_pool_max_connections").set(f64::from(db.max_connections));
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!("db_statement_timeout_ms").set(db.statement_timeout_ms as f64);
    Ok(pool)
}

/// Creates the CORS layer. An empty origin list allows any origin.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    use http::Method;

    let methods = vec![
        Method::GET,
        Method::POST,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];

    let mut cors = CorsLayer::new()
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::any())
        .allow_credentials(config.server.cors.allow_credentials)
        .max_age(Duration::from_secs(config.server.cors.max_age_seconds));

    if config.server.cors.allowed_origins.is_empty() {
        cors = cors.allow_origin(AllowOrigin::any());
    } else {
        let origins = config
            .server
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| http::HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>();
        cors = cors.allow_origin(AllowOrigin::list(origins));
    }

    cors
}

/// The `/api` router. Every route requires a resolved agent session.
pub fn create_api_router(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .merge(handlers::identity::routes())
        .merge(handlers::conversations::routes())
        .merge(handlers::messages::routes())
        .merge(handlers::notes::routes())
        .merge(handlers::templates::routes())
        .merge(handlers::analytics::routes())
        .merge(handlers::admin::routes())
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(state),
            require_session,
        ))
}

/// Creates the main application router with all middleware and routes.
///
/// Layers are applied after the routes so they wrap every one of them; the
/// request id layer is outermost so the session check and the trace span both
/// see it.
pub fn create_app_router(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let config = Arc::clone(state.config());
    let cors = create_cors_layer(&config);
    let request_id_state = RequestIdState::from_config(&config);
    let rate_limit_state = RateLimitState::from_config(&config);
    let security_state = SecurityHeadersState::from_config(&config);

    Router::new()
        .nest("/api", create_api_router(&state))
        .merge(handlers::realtime::routes())
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint))
        .merge(openapi_routes())
        .with_state(state)
        .layer(Extension(metrics_handle))
        .layer(cors)
        .layer(middleware::from_fn_with_state(
            security_state,
            security::apply_security_headers,
        ))
        .layer(middleware::from_fn_with_state(
            rate_limit_state,
            rate_limit::enforce_rate_limits,
        ))
        .layer(tracer::create_trace_layer())
        .layer(middleware::from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
}

/// Resolves on Ctrl+C or SIGTERM, then stops the heartbeat and closes every
/// notification socket so graceful shutdown is not held open by them.
pub async fn create_shutdown_signal(state: Arc<AppState>, heartbeat: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutting down...");
    heartbeat.cancel();
    let closed = state.hub().close_all().await;
    info!(closed, "closed notification sockets");
}

/// Starts the server: connect, bootstrap the schema, verify readiness, then
/// serve until a shutdown signal arrives.
///
/// # Errors
/// Returns an error if the database is unreachable, bootstrap fails, or the
/// listener cannot be bound.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    initialize_tracing(&config);
    info!(profile = ?config.profile, "Starting server...");

    let metrics_handle = metrics_handle();
    describe_metrics();
    let config = Arc::new(config);

    let pool = create_database_pool(&config.db).await?;
    bootstrap::ensure_liveness(&pool).await?;
    bootstrap::run(&pool, &config.db).await?;
    bootstrap::ensure_readiness(&pool).await?;

    let state = Arc::new(AppState::new(Arc::clone(&config), Some(pool)));
    let heartbeat = CancellationToken::new();
    let heartbeat_task = state.hub().spawn_heartbeat(heartbeat.clone());

    let app = create_app_router(Arc::clone(&state), metrics_handle);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal(Arc::clone(&state), heartbeat.clone()))
        .await?;

    heartbeat.cancel();
    if let Err(err) = heartbeat_task.await {
        warn!(error = %err, "heartbeat task ended abnormally");
    }
    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use shared::config::server::{Config, LogFormat, Profile};
    use std::{
        io::{self, Write},
        sync::Mutex,
    };
    use tracing::{Subscriber, info};
    use tracing_subscriber::fmt::{self, MakeWriter};

    #[derive(Clone)]
    struct BufferMakeWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl BufferMakeWriter {
        fn new(buffer: Arc<Mutex<Vec<u8>>>) -> Self {
            Self { buffer }
        }
    }

    struct BufferWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl<'a> MakeWriter<'a> for BufferMakeWriter {
        type Writer = BufferWriter;

        fn make_writer(&'a self) -> Self::Writer {
            BufferWriter {
                buffer: Arc::clone(&self.buffer),
            }
        }
    }

    impl Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn initialize_tracing_returns_configured_level() {
        let config = Config::default_for_profile(Profile::Dev);
        assert_eq!(initialize_tracing(&config), config.logging.level);
    }

    #[test]
    fn json_log_format_produces_json_output() {
        let mut config = Config::default_for_profile(Profile::Dev);
        config.logging.format = LogFormat::Json;

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let make_writer = BufferMakeWriter::new(buffer.clone());

        let subscriber = subscriber_with_writer(&config, make_writer);
        let dispatch = tracing::dispatcher::Dispatch::new(subscriber);

        tracing::dispatcher::with_default(&dispatch, || {
            info!(event = "json_test", "log entry");
        });

        let contents = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        let line = contents
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap();
        let value: Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["fields"]["message"], "log entry");
        assert_eq!(value["fields"]["event"], "json_test");
    }

    #[test]
    fn text_log_format_emits_plain_events() {
        let mut config = Config::default_for_profile(Profile::Dev);
        config.logging.format = LogFormat::Text;

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let make_writer = BufferMakeWriter::new(buffer.clone());

        let subscriber = subscriber_with_writer(&config, make_writer);
        let dispatch = tracing::dispatcher::Dispatch::new(subscriber);

        tracing::dispatcher::with_default(&dispatch, || {
            info!(event = "text_test", "log entry");
        });

        let contents = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        let line = contents
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap();
        assert!(
            serde_json::from_str::<Value>(line).is_err(),
            "expected plain text log line"
        );
        assert!(line.contains("log entry"));
    }

    fn subscriber_with_writer<W>(config: &Config, writer: W) -> Box<dyn Subscriber + Send + Sync>
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        let env_filter = super::build_env_filter(config);
        let builder = fmt::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(writer);

        if matches!(config.logging.format, LogFormat::Json) {
            Box::new(builder.json().with_ansi(false).finish())
        } else {
            Box::new(builder.with_ansi(true).finish())
        }
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_payload() {
        use axum::{
            body::{Body, to_bytes},
            http::{Request, StatusCode, header},
        };
        use tower::ServiceExt;

        let metrics_handle = super::metrics_handle();
        super::describe_metrics();
        let app = super::create_app_router(Arc::new(AppState::default()), metrics_handle);

        let health = app
            .clone()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert_eq!(content_type, "text/plain; version=0.0.4");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(
            body.contains("health_checks_total"),
            "expected the health probe counter in the exposition body"
        );
    }

    #[tokio::test]
    async fn responses_carry_request_id_and_security_headers() {
        use axum::{
            body::Body,
            http::{Request, StatusCode},
        };
        use tower::ServiceExt;

        let app = super::create_app_router(Arc::new(AppState::default()), super::metrics_handle());
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn api_routes_require_a_session() {
        use axum::{
            body::Body,
            http::{Request, StatusCode},
        };
        use tower::ServiceExt;

        let app = super::create_app_router(Arc::new(AppState::default()), super::metrics_handle());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/conversations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
