use axum::{
    extract::{FromRequest, Request},
    http::{header::CONTENT_TYPE, HeaderMap},
    Form, Json,
};
use serde::de::DeserializeOwned;
use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    db::now_iso,
    error::{AppError, AppResult},
    middleware::ip::{client_ip, MaybeRemoteAddr},
    state::AppState,
    types::{BarcodeKind, LendingView},
};

pub const TOOL_COLUMNS: &str =
    "id, barcode, name, description, status, category, location, deleted, created_at, modified_at";

pub const WORKER_COLUMNS: &str =
    "id, barcode, firstname, lastname, department, email, deleted, created_at, modified_at";

pub const CONSUMABLE_COLUMNS: &str = "id, barcode, name, description, quantity, min_quantity, unit, category, \
     location, deleted, created_at, modified_at";

pub const USAGE_COLUMNS: &str = "id, consumable_barcode, worker_barcode, quantity, used_at, comment";

/// Lendings joined with tool and worker names; append `WHERE`/`ORDER BY` as needed.
pub const LENDING_VIEW_SELECT: &str = r#"SELECT l.id, l.tool_barcode, t.name AS tool_name,
       l.worker_barcode, (w.firstname || ' ' || w.lastname) AS worker_name,
       l.lent_at, l.returned_at
FROM lendings l
LEFT JOIN tools t ON t.barcode = l.tool_barcode
LEFT JOIN workers w ON w.barcode = l.worker_barcode"#;

/// Body extractor accepting `application/json` and `application/x-www-form-urlencoded`.
///
/// Rejections use the regular error envelope instead of axum's plain-text bodies.
pub struct JsonOrForm<T>(pub T);

impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);

        if is_form {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(format!("Ungültige Formulardaten: {}", e.body_text())))?;
            Ok(JsonOrForm(value))
        } else {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(format!("Ungültiges JSON: {}", e.body_text())))?;
            Ok(JsonOrForm(value))
        }
    }
}

/// Per-endpoint rate limit keyed by client IP.
pub async fn check_rate_limit(
    state: &AppState,
    endpoint: &str,
    headers: &HeaderMap,
    remote: MaybeRemoteAddr,
) -> AppResult<()> {
    state.rate_limiter.check_endpoint_limit(endpoint, client_ip(headers, remote)).await
}

/// Escapes `%`, `_` and `\` for `LIKE ... ESCAPE '\'`.
pub fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Which kind of entity uses `barcode`, including soft-deleted rows.
pub async fn barcode_owner(
    conn: &mut SqliteConnection,
    barcode: &str,
) -> AppResult<Option<BarcodeKind>> {
    let kind: Option<String> = sqlx::query_scalar(
        r#"SELECT 'tool' FROM tools WHERE barcode = ?1
           UNION ALL SELECT 'worker' FROM workers WHERE barcode = ?1
           UNION ALL SELECT 'consumable' FROM consumables WHERE barcode = ?1
           LIMIT 1"#,
    )
    .bind(barcode)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(kind.map(|k| match k.as_str() {
        "tool" => BarcodeKind::Tool,
        "worker" => BarcodeKind::Worker,
        _ => BarcodeKind::Consumable,
    }))
}

/// Barcodes are unique across tools, workers and consumables.
///
/// Run on the write transaction that inserts the row.
pub async fn ensure_barcode_free(conn: &mut SqliteConnection, barcode: &str) -> AppResult<()> {
    match barcode_owner(conn, barcode).await? {
        None => Ok(()),
        Some(kind) => {
            let what = match kind {
                BarcodeKind::Tool => "ein Werkzeug",
                BarcodeKind::Worker => "einen Mitarbeiter",
                BarcodeKind::Consumable => "ein Verbrauchsmaterial",
            };
            Err(AppError::Conflict(format!("Barcode {} ist bereits für {} vergeben", barcode, what)))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SoftDeleteTable {
    Tools,
    Workers,
    Consumables,
}

impl SoftDeleteTable {
    fn name(self) -> &'static str {
        match self {
            SoftDeleteTable::Tools => "tools",
            SoftDeleteTable::Workers => "workers",
            SoftDeleteTable::Consumables => "consumables",
        }
    }
}

/// Marks a row deleted; `false` if there was no live row with that barcode.
pub async fn soft_delete(db: &SqlitePool, table: SoftDeleteTable, barcode: &str) -> AppResult<bool> {
    let now = now_iso();
    let sql = format!(
        "UPDATE {} SET deleted = 1, deleted_at = ?1, modified_at = ?1 WHERE barcode = ?2 AND deleted = 0",
        table.name()
    );
    let res = sqlx::query(&sql).bind(&now).bind(barcode).execute(db).await?;
    Ok(res.rows_affected() > 0)
}

/// Undoes a soft delete; `false` if there was no deleted row with that barcode.
pub async fn restore(db: &SqlitePool, table: SoftDeleteTable, barcode: &str) -> AppResult<bool> {
    let now = now_iso();
    let sql = format!(
        "UPDATE {} SET deleted = 0, deleted_at = NULL, modified_at = ?1 WHERE barcode = ?2 AND deleted = 1",
        table.name()
    );
    let res = sqlx::query(&sql).bind(&now).bind(barcode).execute(db).await?;
    Ok(res.rows_affected() > 0)
}

pub async fn open_lendings_for_tool(db: &SqlitePool, tool_barcode: &str) -> AppResult<Vec<LendingView>> {
    let sql = format!(
        "{} WHERE l.tool_barcode = ?1 AND l.returned_at IS NULL ORDER BY l.lent_at DESC, l.id DESC",
        LENDING_VIEW_SELECT
    );
    Ok(sqlx::query_as::<_, LendingView>(&sql).bind(tool_barcode).fetch_all(db).await?)
}

/// Clamps a client supplied page size.
pub fn clamp_limit(limit: Option<i64>, default: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, 1000)
}
