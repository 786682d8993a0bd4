use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use sqlx::QueryBuilder;

use crate::{
    db::{begin_write, now_iso},
    error::{AppError, AppResult, OptionExt},
    middleware::validation::{optional_text, require_text, validate_barcode},
    routes::helpers::{
        clamp_limit, ensure_barcode_free, like_pattern, open_lendings_for_tool, restore, soft_delete,
        SoftDeleteTable, LENDING_VIEW_SELECT, TOOL_COLUMNS,
    },
    state::AppState,
    types::{
        ApiResponse, CreateToolRequest, LendingView, SetToolStatusRequest, Tool, ToolDetail, ToolStatus,
        UpdateToolRequest,
    },
};

#[derive(Debug, Deserialize)]
pub struct ToolListQuery {
    pub status: Option<ToolStatus>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub q: Option<String>,
    pub include_deleted: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

pub async fn list_tools(
    State(state): State<AppState>,
    Query(q): Query<ToolListQuery>,
) -> AppResult<ApiResponse<Vec<Tool>>> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM tools WHERE 1 = 1", TOOL_COLUMNS));
    if !q.include_deleted.unwrap_or(false) {
        qb.push(" AND deleted = 0");
    }
    if let Some(status) = q.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(category) = optional_text(q.category.as_deref()) {
        qb.push(" AND category = ").push_bind(category);
    }
    if let Some(location) = optional_text(q.location.as_deref()) {
        qb.push(" AND location = ").push_bind(location);
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

    let tools = qb.build_query_as::<Tool>().fetch_all(&state.db).await?;
    Ok(ApiResponse::ok(format!("{} Werkzeuge gefunden", tools.len()), tools))
}

pub async fn create_tool(
    State(state): State<AppState>,
    Json(req): Json<CreateToolRequest>,
) -> AppResult<ApiResponse<Tool>> {
    let barcode = validate_barcode("barcode", &req.barcode)?;
    let name = require_text("name", &req.name, 200)?;
    let mut tx = begin_write(&state.db).await?;
    ensure_barcode_free(&mut tx, &barcode).await?;

    let now = now_iso();
    let sql = format!(
        r#"INSERT INTO tools (barcode, name, description, status, category, location, created_at, modified_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
           RETURNING {}"#,
        TOOL_COLUMNS
    );
    let tool = sqlx::query_as::<_, Tool>(&sql)
        .bind(&barcode)
        .bind(&name)
        .bind(optional_text(req.description.as_deref()))
        .bind(ToolStatus::Verfuegbar)
        .bind(optional_text(req.category.as_deref()))
        .bind(optional_text(req.location.as_deref()))
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(barcode = %tool.barcode, "Tool created");
    Ok(ApiResponse::created("Werkzeug angelegt", tool))
}

/// Tool with its current holder, soft-deleted tools included.
pub async fn get_tool(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
) -> AppResult<ApiResponse<ToolDetail>> {
    let sql = format!("SELECT {} FROM tools WHERE barcode = ?1", TOOL_COLUMNS);
    let tool = sqlx::query_as::<_, Tool>(&sql)
        .bind(&barcode)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("Werkzeug")?;

    let current_lending = open_lendings_for_tool(&state.db, &barcode).await?.into_iter().next();
    Ok(ApiResponse::ok("Werkzeug geladen", ToolDetail { tool, current_lending }))
}

pub async fn update_tool(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
    Json(req): Json<UpdateToolRequest>,
) -> AppResult<ApiResponse<Tool>> {
    let name = match req.name.as_deref() {
        Some(n) => Some(require_text("name", n, 200)?),
        None => None,
    };

    let sql = format!(
        r#"UPDATE tools SET
               name = COALESCE(?1, name),
               description = COALESCE(?2, description),
               category = COALESCE(?3, category),
               location = COALESCE(?4, location),
               modified_at = ?5
           WHERE barcode = ?6 AND deleted = 0
           RETURNING {}"#,
        TOOL_COLUMNS
    );
    let tool = sqlx::query_as::<_, Tool>(&sql)
        .bind(name)
        .bind(optional_text(req.description.as_deref()))
        .bind(optional_text(req.category.as_deref()))
        .bind(optional_text(req.location.as_deref()))
        .bind(now_iso())
        .bind(&barcode)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("Werkzeug")?;

    Ok(ApiResponse::ok("Werkzeug aktualisiert", tool))
}

pub async fn delete_tool(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
) -> AppResult<ApiResponse<()>> {
    if let Some(open) = open_lendings_for_tool(&state.db, &barcode).await?.into_iter().next() {
        return Err(AppError::Conflict(format!(
            "Werkzeug {} ist noch an {} ausgeliehen und kann nicht gelöscht werden",
            barcode,
            open.worker_name.unwrap_or(open.worker_barcode)
        )));
    }
    if !soft_delete(&state.db, SoftDeleteTable::Tools, &barcode).await? {
        return Err(AppError::NotFound(format!("Werkzeug {} nicht gefunden", barcode)));
    }
    tracing::info!(%barcode, "Tool deleted");
    Ok(ApiResponse::ok("Werkzeug gelöscht", ()))
}

pub async fn restore_tool(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
) -> AppResult<ApiResponse<()>> {
    if !restore(&state.db, SoftDeleteTable::Tools, &barcode).await? {
        return Err(AppError::NotFound(format!("Gelöschtes Werkzeug {} nicht gefunden", barcode)));
    }
    tracing::info!(%barcode, "Tool restored");
    Ok(ApiResponse::ok("Werkzeug wiederhergestellt", ()))
}

/// Marks a tool `defekt` or back to `verfügbar`.
///
/// `ausgeliehen` is only ever set by a lending; `verfügbar` is refused while
/// an open lending exists.
pub async fn set_tool_status(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
    Json(req): Json<SetToolStatusRequest>,
) -> AppResult<ApiResponse<Tool>> {
    if req.status == ToolStatus::Ausgeliehen {
        return Err(AppError::ValidationError {
            field: "status".to_string(),
            message: "Status 'ausgeliehen' wird nur durch eine Ausleihe gesetzt".to_string(),
        });
    }

    let mut tx = begin_write(&state.db).await?;

    let open: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM lendings WHERE tool_barcode = ?1 AND returned_at IS NULL")
            .bind(&barcode)
            .fetch_one(&mut *tx)
            .await?;
    if req.status == ToolStatus::Verfuegbar && open > 0 {
        return Err(AppError::Conflict(format!(
            "Werkzeug {} hat eine offene Ausleihe und kann nicht auf verfügbar gesetzt werden",
            barcode
        )));
    }

    let sql = format!(
        "UPDATE tools SET status = ?1, modified_at = ?2 WHERE barcode = ?3 AND deleted = 0 RETURNING {}",
        TOOL_COLUMNS
    );
    let tool = sqlx::query_as::<_, Tool>(&sql)
        .bind(req.status)
        .bind(now_iso())
        .bind(&barcode)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_not_found("Werkzeug")?;

    tx.commit().await?;

    tracing::info!(%barcode, status = %tool.status, "Tool status changed");
    Ok(ApiResponse::ok(format!("Status auf {} gesetzt", tool.status), tool))
}

pub async fn tool_history(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> AppResult<ApiResponse<Vec<LendingView>>> {
    let sql = format!(
        "{} WHERE l.tool_barcode = ?1 ORDER BY l.lent_at DESC, l.id DESC LIMIT ?2",
        LENDING_VIEW_SELECT
    );
    let history = sqlx::query_as::<_, LendingView>(&sql)
        .bind(&barcode)
        .bind(clamp_limit(q.limit, 200))
        .fetch_all(&state.db)
        .await?;
    Ok(ApiResponse::ok(format!("{} Ausleihen", history.len()), history))
}
