use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use sqlx::QueryBuilder;

use crate::{
    db::{begin_write, now_iso},
    error::{AppError, AppResult, OptionExt},
    lending::ConsumeOutcome,
    middleware::validation::{optional_text, require_text, validate_barcode, validate_non_negative},
    routes::helpers::{
        clamp_limit, ensure_barcode_free, like_pattern, restore, soft_delete, SoftDeleteTable,
        CONSUMABLE_COLUMNS, USAGE_COLUMNS,
    },
    state::AppState,
    types::{
        ApiResponse, Consumable, ConsumableUsage, CreateConsumableRequest, StockAdjustRequest,
        UpdateConsumableRequest,
    },
};

#[derive(Debug, Deserialize)]
pub struct ConsumableListQuery {
    pub q: Option<String>,
    pub category: Option<String>,
    pub low_stock: Option<bool>,
    pub include_deleted: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub limit: Option<i64>,
}

pub async fn list_consumables(
    State(state): State<AppState>,
    Query(q): Query<ConsumableListQuery>,
) -> AppResult<ApiResponse<Vec<Consumable>>> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM consumables WHERE 1 = 1", CONSUMABLE_COLUMNS));
    if !q.include_deleted.unwrap_or(false) {
        qb.push(" AND deleted = 0");
    }
    if let Some(category) = optional_text(q.category.as_deref()) {
        qb.push(" AND category = ").push_bind(category);
    }
    if q.low_stock.unwrap_or(false) {
        qb.push(" AND quantity < min_quantity");
    }
    if let Some(term) = optional_text(q.q.as_deref()) {
        let pattern = like_pattern(&term);
        qb.push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR barcode LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
    qb.push(" ORDER BY name COLLATE NOCASE, barcode");

    let items = qb.build_query_as::<Consumable>().fetch_all(&state.db).await?;
    Ok(ApiResponse::ok(format!("{} Verbrauchsmaterialien gefunden", items.len()), items))
}

/// Creates a consumable; a non-zero initial quantity is booked as the first ledger entry.
pub async fn create_consumable(
    State(state): State<AppState>,
    Json(req): Json<CreateConsumableRequest>,
) -> AppResult<ApiResponse<Consumable>> {
    let barcode = validate_barcode("barcode", &req.barcode)?;
    let name = require_text("name", &req.name, 200)?;
    let quantity = validate_non_negative("quantity", req.quantity.unwrap_or(0))?;
    let min_quantity = validate_non_negative("min_quantity", req.min_quantity.unwrap_or(0))?;

    let now = now_iso();
    let mut tx = begin_write(&state.db).await?;
    ensure_barcode_free(&mut tx, &barcode).await?;

    let sql = format!(
        r#"INSERT INTO consumables
               (barcode, name, description, quantity, min_quantity, unit, category, location, created_at, modified_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
           RETURNING {}"#,
        CONSUMABLE_COLUMNS
    );
    let consumable = sqlx::query_as::<_, Consumable>(&sql)
        .bind(&barcode)
        .bind(&name)
        .bind(optional_text(req.description.as_deref()))
        .bind(quantity)
        .bind(min_quantity)
        .bind(optional_text(req.unit.as_deref()))
        .bind(optional_text(req.category.as_deref()))
        .bind(optional_text(req.location.as_deref()))
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;

    if quantity > 0 {
        sqlx::query(
            r#"INSERT INTO consumable_usages (consumable_barcode, worker_barcode, quantity, used_at, comment)
               VALUES (?1, NULL, ?2, ?3, 'Anfangsbestand')"#,
        )
        .bind(&barcode)
        .bind(quantity)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(barcode = %consumable.barcode, quantity, "Consumable created");
    Ok(ApiResponse::created("Verbrauchsmaterial angelegt", consumable))
}

pub async fn get_consumable(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
) -> AppResult<ApiResponse<Consumable>> {
    let sql = format!("SELECT {} FROM consumables WHERE barcode = ?1", CONSUMABLE_COLUMNS);
    let consumable = sqlx::query_as::<_, Consumable>(&sql)
        .bind(&barcode)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("Verbrauchsmaterial")?;
    Ok(ApiResponse::ok("Verbrauchsmaterial geladen", consumable))
}

/// Updates descriptive fields; stock changes go through `POST /consumables/{barcode}/stock`.
pub async fn update_consumable(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
    Json(req): Json<UpdateConsumableRequest>,
) -> AppResult<ApiResponse<Consumable>> {
    let name = match req.name.as_deref() {
        Some(n) => Some(require_text("name", n, 200)?),
        None => None,
    };
    let min_quantity = match req.min_quantity {
        Some(m) => Some(validate_non_negative("min_quantity", m)?),
        None => None,
    };

    let sql = format!(
        r#"UPDATE consumables SET
               name = COALESCE(?1, name),
               description = COALESCE(?2, description),
               min_quantity = COALESCE(?3, min_quantity),
               unit = COALESCE(?4, unit),
               category = COALESCE(?5, category),
               location = COALESCE(?6, location),
               modified_at = ?7
           WHERE barcode = ?8 AND deleted = 0
           RETURNING {}"#,
        CONSUMABLE_COLUMNS
    );
    let consumable = sqlx::query_as::<_, Consumable>(&sql)
        .bind(name)
        .bind(optional_text(req.description.as_deref()))
        .bind(min_quantity)
        .bind(optional_text(req.unit.as_deref()))
        .bind(optional_text(req.category.as_deref()))
        .bind(optional_text(req.location.as_deref()))
        .bind(now_iso())
        .bind(&barcode)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("Verbrauchsmaterial")?;

    Ok(ApiResponse::ok("Verbrauchsmaterial aktualisiert", consumable))
}

pub async fn delete_consumable(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
) -> AppResult<ApiResponse<()>> {
    if !soft_delete(&state.db, SoftDeleteTable::Consumables, &barcode).await? {
        return Err(AppError::NotFound(format!("Verbrauchsmaterial {} nicht gefunden", barcode)));
    }
    tracing::info!(%barcode, "Consumable deleted");
    Ok(ApiResponse::ok("Verbrauchsmaterial gelöscht", ()))
}

pub async fn restore_consumable(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
) -> AppResult<ApiResponse<()>> {
    if !restore(&state.db, SoftDeleteTable::Consumables, &barcode).await? {
        return Err(AppError::NotFound(format!("Gelöschtes Verbrauchsmaterial {} nicht gefunden", barcode)));
    }
    tracing::info!(%barcode, "Consumable restored");
    Ok(ApiResponse::ok("Verbrauchsmaterial wiederhergestellt", ()))
}

pub async fn adjust_stock(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
    Json(req): Json<StockAdjustRequest>,
) -> AppResult<ApiResponse<ConsumeOutcome>> {
    let worker = match req.worker_barcode.as_deref().map(str::trim).filter(|w| !w.is_empty()) {
        Some(w) => Some(validate_barcode("worker_barcode", w)?),
        None => None,
    };
    let comment = optional_text(req.comment.as_deref());

    let outcome = state.lending.adjust_stock(&barcode, req.delta, worker.as_deref(), comment.as_deref()).await?;
    Ok(ApiResponse::ok(format!("Bestand aktualisiert, neuer Bestand {}", outcome.remaining), outcome))
}

pub async fn consumable_usages(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
    Query(q): Query<UsageQuery>,
) -> AppResult<ApiResponse<Vec<ConsumableUsage>>> {
    let sql = format!(
        "SELECT {} FROM consumable_usages WHERE consumable_barcode = ?1 ORDER BY used_at DESC, id DESC LIMIT ?2",
        USAGE_COLUMNS
    );
    let usages = sqlx::query_as::<_, ConsumableUsage>(&sql)
        .bind(&barcode)
        .bind(clamp_limit(q.limit, 200))
        .fetch_all(&state.db)
        .await?;
    Ok(ApiResponse::ok(format!("{} Buchungen", usages.len()), usages))
}
