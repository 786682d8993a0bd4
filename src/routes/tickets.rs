use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use sqlx::QueryBuilder;

use crate::{
    db::{begin_write, now_iso},
    error::{AppResult, OptionExt},
    middleware::validation::{optional_text, require_text},
    state::AppState,
    types::{
        ApiResponse, CreateNoteRequest, CreateTicketRequest, Ticket, TicketDetail, TicketNote, TicketPriority,
        TicketStatus, UpdateTicketRequest,
    },
};

const TICKET_COLUMNS: &str = "id, title, description, status, priority, category, created_by, assigned_to, \
     created_at, updated_at, resolved_at";

#[derive(Debug, Deserialize)]
pub struct TicketListQuery {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub assigned_to: Option<String>,
}

pub async fn create_ticket(
    State(state): State<AppState>,
    Json(req): Json<CreateTicketRequest>,
) -> AppResult<ApiResponse<Ticket>> {
    let title = require_text("title", &req.title, 200)?;
    let now = now_iso();

    let sql = format!(
        r#"INSERT INTO tickets (title, description, status, priority, category, created_by, assigned_to, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
           RETURNING {}"#,
        TICKET_COLUMNS
    );
    let ticket = sqlx::query_as::<_, Ticket>(&sql)
        .bind(&title)
        .bind(optional_text(req.description.as_deref()))
        .bind(TicketStatus::Offen)
        .bind(req.priority.unwrap_or_default())
        .bind(optional_text(req.category.as_deref()))
        .bind(optional_text(req.created_by.as_deref()))
        .bind(optional_text(req.assigned_to.as_deref()))
        .bind(&now)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(ticket_id = ticket.id, priority = ticket.priority.as_str(), "Ticket created");
    Ok(ApiResponse::created("Ticket angelegt", ticket))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    Query(q): Query<TicketListQuery>,
) -> AppResult<ApiResponse<Vec<Ticket>>> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM tickets WHERE 1 = 1", TICKET_COLUMNS));
    if let Some(status) = q.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(priority) = q.priority {
        qb.push(" AND priority = ").push_bind(priority);
    }
    if let Some(assignee) = optional_text(q.assigned_to.as_deref()) {
        qb.push(" AND assigned_to = ").push_bind(assignee);
    }
    qb.push(" ORDER BY created_at DESC, id DESC");

    let tickets = qb.build_query_as::<Ticket>().fetch_all(&state.db).await?;
    Ok(ApiResponse::ok(format!("{} Tickets", tickets.len()), tickets))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse<TicketDetail>> {
    let sql = format!("SELECT {} FROM tickets WHERE id = ?1", TICKET_COLUMNS);
    let ticket = sqlx::query_as::<_, Ticket>(&sql)
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("Ticket")?;

    let notes = sqlx::query_as::<_, TicketNote>(
        "SELECT id, ticket_id, author, text, created_at FROM ticket_notes WHERE ticket_id = ?1 ORDER BY created_at, id",
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;

    Ok(ApiResponse::ok("Ticket geladen", TicketDetail { ticket, notes }))
}

/// Changes status, priority, category or assignee.
///
/// Entering `erledigt` stamps `resolved_at`, leaving it clears the stamp.
pub async fn update_ticket(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTicketRequest>,
) -> AppResult<ApiResponse<Ticket>> {
    let sql = format!(
        r#"UPDATE tickets SET
               status = COALESCE(?1, status),
               priority = COALESCE(?2, priority),
               category = COALESCE(?3, category),
               assigned_to = COALESCE(?4, assigned_to),
               resolved_at = CASE
                   WHEN ?1 IS NULL THEN resolved_at
                   WHEN ?1 = 'erledigt' THEN COALESCE(resolved_at, ?5)
                   ELSE NULL
               END,
               updated_at = ?5
           WHERE id = ?6
           RETURNING {}"#,
        TICKET_COLUMNS
    );
    let ticket = sqlx::query_as::<_, Ticket>(&sql)
        .bind(req.status)
        .bind(req.priority)
        .bind(optional_text(req.category.as_deref()))
        .bind(optional_text(req.assigned_to.as_deref()))
        .bind(now_iso())
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_not_found("Ticket")?;

    tracing::info!(ticket_id = id, status = ticket.status.as_str(), "Ticket updated");
    Ok(ApiResponse::ok("Ticket aktualisiert", ticket))
}

pub async fn add_note(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<CreateNoteRequest>,
) -> AppResult<ApiResponse<TicketNote>> {
    let text = require_text("text", &req.text, 5000)?;
    let now = now_iso();
    let mut tx = begin_write(&state.db).await?;

    sqlx::query("UPDATE tickets SET updated_at = ?1 WHERE id = ?2 RETURNING id")
        .bind(&now)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_not_found("Ticket")?;

    let note = sqlx::query_as::<_, TicketNote>(
        r#"INSERT INTO ticket_notes (ticket_id, author, text, created_at) VALUES (?1, ?2, ?3, ?4)
           RETURNING id, ticket_id, author, text, created_at"#,
    )
    .bind(id)
    .bind(optional_text(req.author.as_deref()))
    .bind(&text)
    .bind(&now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(ApiResponse::created("Notiz hinzugefügt", note))
}
