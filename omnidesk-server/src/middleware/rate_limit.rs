use std::{collections::HashMap, sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::State,
    http::{self, Method, Request},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::http::error::{ApiError, AppResult};
use shared::config::server::Config;

/// Paths that are never throttled: probes, scraping and the long-lived socket.
const EXEMPT_PATHS: &[&str] = &["/healthz", "/readyz", "/metrics", "/ws"];

/// Token-bucket limiter keyed by client and route.
#[derive(Clone, Debug)]
pub struct RateLimitState {
    store: Arc<Mutex<HashMap<String, Bucket>>>,
    capacity: f64,
    refill_per_sec: f64,
}

impl RateLimitState {
    pub fn from_config(config: &Config) -> Self {
        Self {
            store: Arc::new(Mutex::new(HashMap::new())),
            capacity: f64::from(config.rate_limits.burst.max(1)),
            refill_per_sec: f64::from(config.rate_limits.default_rps.max(0.1_f32)),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

enum RateLimitOutcome {
    Allowed {
        limit: u32,
        remaining: u32,
        reset_after: u64,
    },
    Denied {
        retry_after: u64,
    },
}

impl Bucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn take(&mut self, capacity: f64, refill_per_sec: f64) -> RateLimitOutcome {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            let deficit = (capacity - self.tokens).max(0.0);
            RateLimitOutcome::Allowed {
                limit: capacity as u32,
                remaining: self.tokens.floor() as u32,
                reset_after: (deficit / refill_per_sec).ceil() as u64,
            }
        } else {
            RateLimitOutcome::Denied {
                retry_after: ((1.0 - self.tokens) / refill_per_sec).ceil() as u64,
            }
        }
    }
}

pub async fn enforce_rate_limits(
    State(state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let path = request.uri().path();
    if request.method() == Method::OPTIONS || EXEMPT_PATHS.contains(&path) {
        return Ok(next.run(request).await);
    }

    let key = bucket_key(&request);
    let outcome = {
        let mut store = state.store.lock().await;
        store
            .entry(key.clone())
            .or_insert_with(|| Bucket::new(state.capacity))
            .take(state.capacity, state.refill_per_sec)
    };

    match outcome {
        RateLimitOutcome::Allowed {
            limit,
            remaining,
            reset_after,
        } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("RateLimit-Limit", header_value(limit));
            headers.insert("RateLimit-Remaining", header_value(remaining));
            headers.insert("RateLimit-Reset", header_value(reset_after));
            Ok(response)
        }
        RateLimitOutcome::Denied { retry_after } => {
            debug!(key, retry_after, "rate limit exceeded");
            metrics::counter!("omnidesk_rate_limited_total").increment(1);
            Err(ApiError::too_many_requests("rate limit exceeded")
                .with_details(serde_json::json!({ "retry_after_seconds": retry_after })))
        }
    }
}

/// Buckets are per forwarded client address and path, so one noisy client
/// cannot starve a whole route.
fn bucket_key(request: &Request<Body>) -> String {
    let client = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map_or("direct", str::trim);
    format!("{client}|{}", request.uri().path())
}

fn header_value<T: ToString>(value: T) -> http::HeaderValue {
    http::HeaderValue::from_str(&value.to_string())
        .unwrap_or_else(|_| http::HeaderValue::from_static("0"))
}
