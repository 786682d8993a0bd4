use axum::{
    extract::{Query, State},
    http::HeaderMap,
};
use serde::Deserialize;
use sqlx::QueryBuilder;

use crate::{
    error::AppResult,
    lending::{ConsistencyReport, ConsumeOutcome, LendOutcome, RepairReport, ReturnOutcome},
    middleware::{ip::MaybeRemoteAddr, validation::validate_barcode},
    routes::helpers::{check_rate_limit, clamp_limit, JsonOrForm, LENDING_VIEW_SELECT},
    state::AppState,
    types::{ApiResponse, ConsumeRequest, LendRequest, LendingView, ReturnRequest},
};

#[derive(Debug, Deserialize)]
pub struct LendingListQuery {
    pub open_only: Option<bool>,
    pub tool: Option<String>,
    pub worker: Option<String>,
    pub limit: Option<i64>,
}

pub async fn lend(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: MaybeRemoteAddr,
    JsonOrForm(req): JsonOrForm<LendRequest>,
) -> AppResult<ApiResponse<LendOutcome>> {
    check_rate_limit(&state, "/lending", &headers, remote).await?;
    let tool = validate_barcode("tool_barcode", &req.tool_barcode)?;
    let worker = validate_barcode("worker_barcode", &req.worker_barcode)?;

    let outcome = state.lending.lend(&tool, &worker).await?;
    let message = format!("Werkzeug {} an {} ausgeliehen", outcome.tool_name, outcome.worker_name);
    Ok(ApiResponse::ok(message, outcome))
}

pub async fn return_tool(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: MaybeRemoteAddr,
    JsonOrForm(req): JsonOrForm<ReturnRequest>,
) -> AppResult<ApiResponse<ReturnOutcome>> {
    check_rate_limit(&state, "/lending", &headers, remote).await?;
    let tool = validate_barcode("tool_barcode", &req.tool_barcode)?;
    // HTML forms send an empty field instead of omitting it
    let worker = match req.worker_barcode.as_deref().map(str::trim).filter(|w| !w.is_empty()) {
        Some(w) => Some(validate_barcode("worker_barcode", w)?),
        None => None,
    };

    let outcome = state.lending.return_tool(&tool, worker.as_deref()).await?;
    Ok(ApiResponse::ok(format!("Werkzeug {} zurückgegeben", tool), outcome))
}

pub async fn consume(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: MaybeRemoteAddr,
    JsonOrForm(req): JsonOrForm<ConsumeRequest>,
) -> AppResult<ApiResponse<ConsumeOutcome>> {
    check_rate_limit(&state, "/lending", &headers, remote).await?;
    let consumable = validate_barcode("consumable_barcode", &req.consumable_barcode)?;
    let worker = validate_barcode("worker_barcode", &req.worker_barcode)?;

    let outcome = state.lending.consume(&consumable, &worker, req.quantity).await?;
    let message = if outcome.below_minimum {
        format!("{} entnommen, Restbestand {} unter Mindestbestand", req.quantity, outcome.remaining)
    } else {
        format!("{} entnommen, Restbestand {}", req.quantity, outcome.remaining)
    };
    Ok(ApiResponse::ok(message, outcome))
}

pub async fn list_lendings(
    State(state): State<AppState>,
    Query(q): Query<LendingListQuery>,
) -> AppResult<ApiResponse<Vec<LendingView>>> {
    let mut qb = QueryBuilder::new(format!("{} WHERE 1 = 1", LENDING_VIEW_SELECT));
    if q.open_only.unwrap_or(false) {
        qb.push(" AND l.returned_at IS NULL");
    }
    if let Some(tool) = q.tool.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        qb.push(" AND l.tool_barcode = ").push_bind(tool.to_string());
    }
    if let Some(worker) = q.worker.as_deref().map(str::trim).filter(|w| !w.is_empty()) {
        qb.push(" AND l.worker_barcode = ").push_bind(worker.to_string());
    }
    qb.push(" ORDER BY l.lent_at DESC, l.id DESC LIMIT ").push_bind(clamp_limit(q.limit, 200));

    let lendings = qb.build_query_as::<LendingView>().fetch_all(&state.db).await?;
    Ok(ApiResponse::ok(format!("{} Ausleihen", lendings.len()), lendings))
}

pub async fn check_consistency(State(state): State<AppState>) -> AppResult<ApiResponse<ConsistencyReport>> {
    let report = state.lending.validate_lending_consistency().await?;
    let message = if report.is_consistent() {
        "Ausleihdaten sind konsistent".to_string()
    } else {
        format!("{} Inkonsistenzen gefunden", report.issues.len())
    };
    Ok(ApiResponse::ok(message, report))
}

pub async fn fix_consistency(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: MaybeRemoteAddr,
) -> AppResult<ApiResponse<RepairReport>> {
    check_rate_limit(&state, "/admin/consistency/fix", &headers, remote).await?;
    let report = state.lending.fix_lending_inconsistencies().await?;
    Ok(ApiResponse::ok(format!("{} Inkonsistenzen behoben", report.total_fixed()), report))
}
