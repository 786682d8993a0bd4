use axum::extract::State;

use crate::{
    error::AppResult,
    state::AppState,
    types::{ApiResponse, DashboardStats},
};

// Soft-deleted rows are excluded everywhere
const STATS_SQL: &str = r#"SELECT
    (SELECT COUNT(*) FROM tools WHERE deleted = 0) AS tools_total,
    (SELECT COUNT(*) FROM tools WHERE deleted = 0 AND status = 'verfügbar') AS tools_available,
    (SELECT COUNT(*) FROM tools WHERE deleted = 0 AND status = 'ausgeliehen') AS tools_lent,
    (SELECT COUNT(*) FROM tools WHERE deleted = 0 AND status = 'defekt') AS tools_defect,
    (SELECT COUNT(*) FROM workers WHERE deleted = 0) AS workers_total,
    (SELECT COUNT(*) FROM consumables WHERE deleted = 0) AS consumables_total,
    (SELECT COUNT(*) FROM consumables WHERE deleted = 0 AND quantity < min_quantity) AS consumables_low_stock,
    (SELECT COUNT(*) FROM lendings l JOIN tools t ON t.barcode = l.tool_barcode
        WHERE l.returned_at IS NULL AND t.deleted = 0) AS open_lendings,
    (SELECT COUNT(*) FROM tickets WHERE status != 'erledigt') AS open_tickets"#;

pub async fn dashboard(State(state): State<AppState>) -> AppResult<ApiResponse<DashboardStats>> {
    let stats = sqlx::query_as::<_, DashboardStats>(STATS_SQL).fetch_one(&state.db).await?;
    Ok(ApiResponse::ok("Übersicht", stats))
}
