use std::sync::Arc;

use crate::config::AppConfig;
use crate::lending::LendingService;
use crate::metrics::Metrics;
use crate::middleware::EndpointRateLimiter;

/// The shared application state.
///
/// Cloned into every handler by axum; all members are cheap handles.
#[derive(Clone)]
pub struct AppState {
    /// The SQLite connection pool.
    pub db: sqlx::SqlitePool,
    /// Parsed and validated configuration.
    pub config: Arc<AppConfig>,
    /// Counters exposed on `/metrics`.
    pub metrics: Metrics,
    /// Lend/return/consume transitions and the consistency repair pass.
    pub lending: LendingService,
    /// The per-endpoint rate limiter.
    pub rate_limiter: EndpointRateLimiter,
}

impl AppState {
    /// Creates the state with the default endpoint limits:
    ///   - 120 lending actions per minute
    ///   - 6 consistency repairs per minute
    pub fn new(db: sqlx::SqlitePool, config: AppConfig) -> Self {
        let rate_limiter = EndpointRateLimiter::new().with_limits(vec![
            ("/lending", 120, 60),
            ("/admin/consistency/fix", 6, 60),
        ]);
        let metrics = Metrics::new();

        Self {
            lending: LendingService::new(db.clone(), metrics.clone()),
            db,
            config: Arc::new(config),
            metrics,
            rate_limiter,
        }
    }
}
