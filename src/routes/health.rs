use std::fmt::Write as _;

use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

// Liveness only, never touches the database
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// Readiness: DB ping bounded by a timeout
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let ping = sqlx::query("SELECT 1").fetch_one(&state.db);
    match tokio::time::timeout(std::time::Duration::from_secs(5), ping).await {
        Ok(Ok(_)) => (StatusCode::OK, "ready").into_response(),
        Ok(Err(e)) => (StatusCode::SERVICE_UNAVAILABLE, format!("not ready: {}", e)).into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready: timeout").into_response(),
    }
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.get_snapshot())
}

/// Prometheus text exposition of the lending counters.
pub async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let m = state.metrics.get_snapshot();
    let series: [(&str, &str, &str, u64); 8] = [
        ("lendings_created", "counter", "Tools lent", m.lendings_created),
        ("lendings_returned", "counter", "Tools returned", m.lendings_returned),
        ("consumptions", "counter", "Consumable withdrawals", m.consumptions),
        ("stock_adjustments", "counter", "Consumable stock adjustments", m.stock_adjustments),
        ("rejected_operations", "counter", "Lending operations rejected by inventory state", m.rejected_operations),
        ("repair_runs", "counter", "Consistency repair passes", m.repair_runs),
        ("issues_repaired", "counter", "Consistency issues repaired", m.issues_repaired),
        ("uptime_seconds", "gauge", "Uptime seconds", m.uptime_seconds),
    ];

    let mut body = String::new();
    for (name, kind, help, value) in series {
        let _ = writeln!(body, "# HELP scandy_{name} {help}");
        let _ = writeln!(body, "# TYPE scandy_{name} {kind}");
        let _ = writeln!(body, "scandy_{name} {value}");
    }
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

pub async fn version() -> impl IntoResponse {
    let body = serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "build": {
            "profile": if cfg!(debug_assertions) { "debug" } else { "release" },
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }
    });
    (StatusCode::OK, Json(body))
}
