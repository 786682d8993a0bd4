//! Sliding-window rate limiting per client IP.
//!
//! A global limiter guards the whole API; [`EndpointRateLimiter`] adds tighter
//! limits for scanner actions such as `/lending`, where a stuck scanner key
//! would otherwise fire requests in a loop.

use super::ip::extract_ip_from_headers;
use axum::{
    extract::{connect_info::ConnectInfo, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::{HashMap, VecDeque},
    net::{IpAddr, SocketAddr},
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

use crate::error::AppError;

const GLOBAL_CLEANUP_EVERY: Duration = Duration::from_secs(600);

/// Request timestamps of one client, oldest first.
type Window = VecDeque<Instant>;

#[derive(Clone)]
pub struct RateLimiter {
    clients: Arc<Mutex<HashMap<IpAddr, Window>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    /// Allows `max_requests` per `window_seconds` and client IP.
    pub fn new(max_requests: usize, window_seconds: u64) -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_seconds),
        }
    }

    /// Records the request if allowed, otherwise returns `AppError::RateLimited`.
    pub async fn check_rate_limit(&self, ip: IpAddr) -> Result<(), AppError> {
        self.admit(ip, Instant::now()).await
    }

    async fn admit(&self, ip: IpAddr, now: Instant) -> Result<(), AppError> {
        let mut clients = self.clients.lock().await;
        let window = clients.entry(ip).or_default();
        self.expire(window, now);

        if window.len() >= self.max_requests {
            let waited = window.front().and_then(|oldest| now.checked_duration_since(*oldest));
            let retry_after = waited.map(|w| self.window.saturating_sub(w)).unwrap_or(Duration::from_secs(1));
            return Err(AppError::RateLimited { retry_after_seconds: retry_after.as_secs().max(1) });
        }

        window.push_back(now);
        Ok(())
    }

    // Timestamps from the future (clock skew) count as fresh
    fn expire(&self, window: &mut Window, now: Instant) {
        while let Some(oldest) = window.front() {
            match now.checked_duration_since(*oldest) {
                Some(age) if age >= self.window => {
                    window.pop_front();
                }
                _ => break,
            }
        }
    }

    /// Forgets clients without requests inside the window.
    pub async fn cleanup_old_entries(&self) {
        self.cleanup_at(Instant::now()).await;
    }

    async fn cleanup_at(&self, now: Instant) {
        let mut clients = self.clients.lock().await;
        clients.retain(|_, window| {
            self.expire(window, now);
            !window.is_empty()
        });
    }

    #[cfg(test)]
    async fn tracked_clients(&self) -> usize {
        self.clients.lock().await.len()
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

lazy_static::lazy_static! {
    static ref GLOBAL_LIMITER: RateLimiter = RateLimiter::new(
        env_or("SCANDY_RATE_LIMIT_MAX_REQUESTS", 1000),
        env_or("SCANDY_RATE_LIMIT_WINDOW_SECONDS", 60),
    );
}

static GLOBAL_CLEANUP: OnceLock<()> = OnceLock::new();

/// Global per-IP limit, 1000 requests per 60s unless overridden by
/// `SCANDY_RATE_LIMIT_MAX_REQUESTS` / `SCANDY_RATE_LIMIT_WINDOW_SECONDS`.
pub async fn rate_limit_middleware(req: Request, next: Next) -> Response {
    let remote_ip = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0.ip());
    let ip = extract_ip_from_headers(req.headers(), remote_ip);

    GLOBAL_CLEANUP.get_or_init(|| {
        let limiter = GLOBAL_LIMITER.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GLOBAL_CLEANUP_EVERY);
            loop {
                ticker.tick().await;
                limiter.cleanup_old_entries().await;
            }
        });
    });

    if let Err(e) = GLOBAL_LIMITER.check_rate_limit(ip).await {
        tracing::debug!(%ip, "Request rejected by global rate limit");
        return e.into_response();
    }
    next.run(req).await
}

/// Per-endpoint limiters, fixed at construction.
#[derive(Clone, Default)]
pub struct EndpointRateLimiter {
    limiters: Arc<HashMap<String, RateLimiter>>,
}

impl EndpointRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces limits given as `(endpoint, max_requests, window_seconds)`.
    pub fn with_limits(self, limits: Vec<(&str, usize, u64)>) -> Self {
        let mut limiters = Arc::unwrap_or_clone(self.limiters);
        limiters.extend(
            limits
                .into_iter()
                .map(|(endpoint, max, window)| (endpoint.to_string(), RateLimiter::new(max, window))),
        );
        Self { limiters: Arc::new(limiters) }
    }

    /// Endpoints without a configured limit always pass.
    pub async fn check_endpoint_limit(&self, endpoint: &str, ip: IpAddr) -> Result<(), AppError> {
        match self.limiters.get(endpoint) {
            Some(limiter) => limiter.check_rate_limit(ip).await,
            None => Ok(()),
        }
    }

    pub async fn cleanup_all(&self) {
        for limiter in self.limiters.values() {
            limiter.cleanup_old_entries().await;
        }
    }
}
