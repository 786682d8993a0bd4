use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use sqlx::{QueryBuilder, SqlitePool};

use crate::{
    db::{begin_write, now_iso},
    error::{AppError, AppResult, OptionExt},
    middleware::validation::{optional_text, require_text, validate_barcode},
    routes::helpers::{
        clamp_limit, ensure_barcode_free, like_pattern, restore, soft_delete, SoftDeleteTable,
        LENDING_VIEW_SELECT, USAGE_COLUMNS, WORKER_COLUMNS,
    },
    state::AppState,
    types::{ApiResponse, ConsumableUsage, CreateWorkerRequest, LendingView, UpdateWorkerRequest, Worker},
};

#[derive(Debug, Deserialize)]
pub struct WorkerListQuery {
    pub department: Option<String>,
    pub q: Option<String>,
    pub include_deleted: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct WorkerLendingsQuery {
    pub open_only: Option<bool>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub limit: Option<i64>,
}

async fn ensure_department(db: &SqlitePool, department: &str) -> AppResult<()> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM departments WHERE name = ?1")
        .bind(department)
        .fetch_optional(db)
        .await?;
    if exists.is_none() {
        return Err(AppError::ValidationError {
            field: "department".to_string(),
            message: format!("Abteilung {} existiert nicht", department),
        });
    }
    Ok(())
}

pub async fn list_workers(
    State(state): State<AppState>,
    Query(q): Query<WorkerListQuery>,
) -> AppResult<ApiResponse<Vec<Worker>>> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM workers WHERE 1 = 1", WORKER_COLUMNS));
    if !q.include_deleted.unwrap_or(false) {
        qb.push(" AND deleted = 0");
    }
    if let Some(department) = optional_text(q.department.as_deref()) {
        qb.push(" AND department = ").push_bind(department);
    }
    if let Some(term) = optional_text(q.q.as_deref()) {
        let pattern = like_pattern(&term);
        qb.push(" AND ((firstname || ' ' || lastname) LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR barcode LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
    qb.push(" ORDER BY lastname COLLATE NOCASE, firstname COLLATE NOCASE");

    let workers = qb.build_query_as::<Worker>().fetch_all(&state.db).await?;
    Ok(ApiResponse::ok(format!("{} Mitarbeiter gefunden", workers.len()), workers))
}

pub async fn create_worker(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkerRequest>,
) -> AppResult<ApiResponse<Worker>> {
    let barcode = validate_barcode("barcode", &req.barcode)?;
    let firstname = require_text("firstname", &req.firstname, 100)?;
    let lastname = require_text("lastname", &req.lastname, 100)?;
    let department = optional_text(req.department.as_deref());
    if let Some(dep) = department.as_deref() {
        ensure_department(&state.db, dep).await?;
    }
    let mut tx = begin_write(&state.db).await?;
    ensure_barcode_free(&mut tx, &barcode).await?;

    let now = now_iso();
    let sql = format!(
        r#"INSERT INTO workers (barcode, firstname, lastname, department, email, created_at, modified_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
           RETURNING {}"#,
        WORKER_COLUMNS
    );
    let worker = sqlx::query_as::<_, Worker>(&sql)
        .bind(&barcode)
        .bind(&firstname)
        .bind(&lastname)
        .bind(department)
        .bind(optional_text(req.email.as_deref()))
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(barcode = %worker.barcode, "Worker created");
    Ok(ApiResponse::created("Mitarbeiter angelegt", worker))
}

pub async fn get_worker(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
) -> AppResult<ApiResponse<Worker>> {
    let sql = format!("SELECT {} FROM workers WHERE barcode = ?1", WORKER_COLUMNS);
    let worker = sqlx::query_as::<_, Worker>(&sql)
        .bind(&barcode)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("Mitarbeiter")?;
    Ok(ApiResponse::ok("Mitarbeiter geladen", worker))
}

pub async fn update_worker(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
    Json(req): Json<UpdateWorkerRequest>,
) -> AppResult<ApiResponse<Worker>> {
    let firstname = match req.firstname.as_deref() {
        Some(v) => Some(require_text("firstname", v, 100)?),
        None => None,
    };
    let lastname = match req.lastname.as_deref() {
        Some(v) => Some(require_text("lastname", v, 100)?),
        None => None,
    };
    let department = optional_text(req.department.as_deref());
    if let Some(dep) = department.as_deref() {
        ensure_department(&state.db, dep).await?;
    }

    let sql = format!(
        r#"UPDATE workers SET
               firstname = COALESCE(?1, firstname),
               lastname = COALESCE(?2, lastname),
               department = COALESCE(?3, department),
               email = COALESCE(?4, email),
               modified_at = ?5
           WHERE barcode = ?6 AND deleted = 0
           RETURNING {}"#,
        WORKER_COLUMNS
    );
    let worker = sqlx::query_as::<_, Worker>(&sql)
        .bind(firstname)
        .bind(lastname)
        .bind(department)
        .bind(optional_text(req.email.as_deref()))
        .bind(now_iso())
        .bind(&barcode)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("Mitarbeiter")?;

    Ok(ApiResponse::ok("Mitarbeiter aktualisiert", worker))
}

pub async fn delete_worker(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
) -> AppResult<ApiResponse<()>> {
    let open: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM lendings WHERE worker_barcode = ?1 AND returned_at IS NULL")
            .bind(&barcode)
            .fetch_one(&state.db)
            .await?;
    if open > 0 {
        return Err(AppError::Conflict(format!(
            "Mitarbeiter {} hat noch {} offene Ausleihe(n)",
            barcode, open
        )));
    }
    if !soft_delete(&state.db, SoftDeleteTable::Workers, &barcode).await? {
        return Err(AppError::NotFound(format!("Mitarbeiter {} nicht gefunden", barcode)));
    }
    tracing::info!(%barcode, "Worker deleted");
    Ok(ApiResponse::ok("Mitarbeiter gelöscht", ()))
}

pub async fn restore_worker(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
) -> AppResult<ApiResponse<()>> {
    if !restore(&state.db, SoftDeleteTable::Workers, &barcode).await? {
        return Err(AppError::NotFound(format!("Gelöschter Mitarbeiter {} nicht gefunden", barcode)));
    }
    tracing::info!(%barcode, "Worker restored");
    Ok(ApiResponse::ok("Mitarbeiter wiederhergestellt", ()))
}

pub async fn worker_lendings(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
    Query(q): Query<WorkerLendingsQuery>,
) -> AppResult<ApiResponse<Vec<LendingView>>> {
    let open_filter = if q.open_only.unwrap_or(false) { " AND l.returned_at IS NULL" } else { "" };
    let sql = format!(
        "{} WHERE l.worker_barcode = ?1{} ORDER BY l.lent_at DESC, l.id DESC LIMIT ?2",
        LENDING_VIEW_SELECT, open_filter
    );
    let lendings = sqlx::query_as::<_, LendingView>(&sql)
        .bind(&barcode)
        .bind(clamp_limit(q.limit, 200))
        .fetch_all(&state.db)
        .await?;
    Ok(ApiResponse::ok(format!("{} Ausleihen", lendings.len()), lendings))
}

pub async fn worker_usages(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
    Query(q): Query<UsageQuery>,
) -> AppResult<ApiResponse<Vec<ConsumableUsage>>> {
    let sql = format!(
        "SELECT {} FROM consumable_usages WHERE worker_barcode = ?1 ORDER BY used_at DESC, id DESC LIMIT ?2",
        USAGE_COLUMNS
    );
    let usages = sqlx::query_as::<_, ConsumableUsage>(&sql)
        .bind(&barcode)
        .bind(clamp_limit(q.limit, 200))
        .fetch_all(&state.db)
        .await?;
    Ok(ApiResponse::ok(format!("{} Entnahmen", usages.len()), usages))
}
