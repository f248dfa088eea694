//! Fixed-window rate limiting for the consultation endpoint

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::api::dto::ErrorResponse;

/// Request counter per client IP
#[derive(Clone)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    /// IP -> (count, window_start)
    requests: Arc<RwLock<HashMap<IpAddr, (u32, Instant)>>>,
}

impl RateLimiter {
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::new(requests_per_minute, Duration::from_secs(60))
    }

    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Counts the request and reports whether it is within budget.
    pub async fn check_rate_limit(&self, ip: IpAddr) -> bool {
        let mut requests = self.requests.write().await;
        let now = Instant::now();

        let (count, start) = requests.entry(ip).or_insert((0, now));
        if now.duration_since(*start) > self.window {
            *count = 0;
            *start = now;
        }

        if *count < self.max_requests {
            *count += 1;
            true
        } else {
            false
        }
    }

    /// Drops windows that have already expired.
    pub async fn cleanup_expired(&self) {
        let mut requests = self.requests.write().await;
        let now = Instant::now();
        let window = self.window;

        requests.retain(|_, (_, start)| now.duration_since(*start) <= window);
    }

    /// Spawns a task that periodically prunes expired windows.
    pub fn spawn_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.window);
            loop {
                ticker.tick().await;
                limiter.cleanup_expired().await;
            }
        })
    }
}

pub fn client_ip(request: &Request) -> IpAddr {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
        .unwrap_or_else(|| IpAddr::from([127, 0, 0, 1]))
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request);

    if limiter.check_rate_limit(ip).await {
        next.run(request).await
    } else {
        tracing::warn!("Rate limit exceeded for {}", ip);
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse {
                error: "Rate limit exceeded. Please try again later.".to_string(),
                code: 429,
            }),
        )
            .into_response()
    }
}
