use axum::extract::{Path, State};

use crate::{
    error::{AppError, AppResult},
    state::AppState,
    types::{ApiResponse, BarcodeKind, BarcodeLookup},
};

#[derive(sqlx::FromRow)]
struct LookupRow {
    kind: String,
    barcode: String,
    name: String,
    deleted: bool,
}

/// Resolves a scanned code to the tool, worker or consumable carrying it.
pub async fn lookup_barcode(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<ApiResponse<BarcodeLookup>> {
    let code = code.trim();
    let row = sqlx::query_as::<_, LookupRow>(
        r#"SELECT 'tool' AS kind, barcode, name, deleted FROM tools WHERE barcode = ?1
           UNION ALL
           SELECT 'worker' AS kind, barcode, firstname || ' ' || lastname AS name, deleted FROM workers WHERE barcode = ?1
           UNION ALL
           SELECT 'consumable' AS kind, barcode, name, deleted FROM consumables WHERE barcode = ?1
           LIMIT 1"#,
    )
    .bind(code)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Barcode {} ist unbekannt", code)))?;

    let kind = match row.kind.as_str() {
        "tool" => BarcodeKind::Tool,
        "worker" => BarcodeKind::Worker,
        _ => BarcodeKind::Consumable,
    };
    let lookup = BarcodeLookup { kind, barcode: row.barcode, name: row.name, deleted: row.deleted };
    Ok(ApiResponse::ok("Barcode erkannt", lookup))
}
