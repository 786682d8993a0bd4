//! Lend/return/consume state transitions.
//!
//! Every operation runs inside a single immediate SQLite transaction, so
//! concurrent scanners queue on the write lock and the later one sees the
//! earlier one's lending. Writes are additionally guarded (`INSERT ... WHERE
//! NOT EXISTS`, `UPDATE ... WHERE quantity >= ?`); returning early with an error
//! drops the transaction and rolls back every write of the operation.

pub mod consistency;

use std::time::Duration;

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::{begin_write, now_iso};
use crate::metrics::Metrics;
use crate::types::{Consumable, ConsumableUsage, Lending, Tool, ToolStatus, Worker};

pub use consistency::{ConsistencyIssue, ConsistencyReport, RepairReport};

#[derive(Debug, thiserror::Error)]
pub enum LendingError {
    #[error("Werkzeug {0} nicht gefunden")]
    ToolNotFound(String),
    #[error("Mitarbeiter {0} nicht gefunden")]
    WorkerNotFound(String),
    #[error("Verbrauchsmaterial {0} nicht gefunden")]
    ConsumableNotFound(String),
    #[error("Werkzeug {tool_barcode} ist bereits an {holder_name} ({holder_barcode}) ausgeliehen")]
    AlreadyLent { tool_barcode: String, holder_name: String, holder_barcode: String },
    #[error("Werkzeug {0} ist als defekt markiert und kann nicht ausgeliehen werden")]
    ToolDefect(String),
    #[error("Keine offene Ausleihe für Werkzeug {0} gefunden")]
    NoOpenLending(String),
    #[error(
        "Werkzeug {tool_barcode} ist an {holder_name} ({holder_barcode}) ausgeliehen, nicht an {worker_barcode}"
    )]
    NotLentByWorker {
        tool_barcode: String,
        worker_barcode: String,
        holder_name: String,
        holder_barcode: String,
    },
    #[error("Nicht genügend Bestand für {barcode}: verfügbar {available}, angefordert {requested}")]
    InsufficientStock { barcode: String, available: i64, requested: i64 },
    #[error("Ungültige Menge: {0}")]
    InvalidQuantity(i64),
    #[error("Datenbankfehler: {0}")]
    Database(#[from] sqlx::Error),
}

impl LendingError {
    /// Rejections caused by the current inventory state rather than by the store.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, LendingError::Database(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LendOutcome {
    pub lending: Lending,
    pub tool_name: String,
    pub worker_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnOutcome {
    pub lending: Lending,
    /// Tool status after the return; `None` if the tool row no longer exists.
    pub tool_status: Option<ToolStatus>,
    /// Open lendings still referencing the tool (only non-zero for legacy duplicates).
    pub remaining_open: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumeOutcome {
    pub usage: ConsumableUsage,
    pub remaining: i64,
    pub below_minimum: bool,
}

#[derive(Clone)]
pub struct LendingService {
    db: SqlitePool,
    metrics: Metrics,
}

impl LendingService {
    pub fn new(db: SqlitePool, metrics: Metrics) -> Self {
        Self { db, metrics }
    }

    /// Lends a tool to a worker.
    ///
    /// Fails if either barcode is unknown, if the tool already has an open
    /// lending (naming the holder) or if the tool is marked `defekt`.
    pub async fn lend(&self, tool_barcode: &str, worker_barcode: &str) -> Result<LendOutcome, LendingError> {
        let res = self.lend_inner(tool_barcode, worker_barcode).await;
        match &res {
            Ok(outcome) => {
                self.metrics.inc_lendings_created();
                tracing::info!(
                    tool = %tool_barcode,
                    worker = %worker_barcode,
                    lending_id = outcome.lending.id,
                    "Tool lent"
                );
            }
            Err(e) => self.note_failure("lend", tool_barcode, e),
        }
        res
    }

    async fn lend_inner(&self, tool_barcode: &str, worker_barcode: &str) -> Result<LendOutcome, LendingError> {
        let mut tx = begin_write(&self.db).await?;

        let tool = fetch_tool(&mut tx, tool_barcode)
            .await?
            .ok_or_else(|| LendingError::ToolNotFound(tool_barcode.to_string()))?;
        let worker = fetch_worker(&mut tx, worker_barcode)
            .await?
            .ok_or_else(|| LendingError::WorkerNotFound(worker_barcode.to_string()))?;

        if let Some(open) = open_lending_for_tool(&mut tx, tool_barcode).await? {
            return Err(already_lent(&mut tx, tool_barcode, &open).await?);
        }
        if tool.status == ToolStatus::Defekt {
            return Err(LendingError::ToolDefect(tool_barcode.to_string()));
        }

        let now = now_iso();
        let inserted = sqlx::query(
            r#"INSERT INTO lendings (tool_barcode, worker_barcode, lent_at)
               SELECT ?1, ?2, ?3
               WHERE NOT EXISTS (
                   SELECT 1 FROM lendings WHERE tool_barcode = ?1 AND returned_at IS NULL
               )"#,
        )
        .bind(tool_barcode)
        .bind(worker_barcode)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // Lost the race against another writer between the check and the insert
            return match open_lending_for_tool(&mut tx, tool_barcode).await? {
                Some(open) => Err(already_lent(&mut tx, tool_barcode, &open).await?),
                None => Err(LendingError::NoOpenLending(tool_barcode.to_string())),
            };
        }
        let lending_id = inserted.last_insert_rowid();

        let updated = sqlx::query(
            "UPDATE tools SET status = ?1, modified_at = ?2 WHERE barcode = ?3 AND deleted = 0 AND status != ?4",
        )
        .bind(ToolStatus::Ausgeliehen)
        .bind(&now)
        .bind(tool_barcode)
        .bind(ToolStatus::Defekt)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            // Dropping `tx` discards the inserted lending
            return Err(LendingError::ToolDefect(tool_barcode.to_string()));
        }

        tx.commit().await?;

        Ok(LendOutcome {
            lending: Lending {
                id: lending_id,
                tool_barcode: tool_barcode.to_string(),
                worker_barcode: worker_barcode.to_string(),
                lent_at: now,
                returned_at: None,
            },
            tool_name: tool.name,
            worker_name: worker.full_name(),
        })
    }

    /// Returns a tool.
    ///
    /// With `worker_barcode` the open lending of that worker is closed, otherwise
    /// the most recent open lending of the tool. The tool becomes `verfügbar`
    /// once no open lending remains; a `defekt` tool keeps its status.
    pub async fn return_tool(
        &self,
        tool_barcode: &str,
        worker_barcode: Option<&str>,
    ) -> Result<ReturnOutcome, LendingError> {
        let res = self.return_inner(tool_barcode, worker_barcode).await;
        match &res {
            Ok(outcome) => {
                self.metrics.inc_lendings_returned();
                tracing::info!(
                    tool = %tool_barcode,
                    worker = %outcome.lending.worker_barcode,
                    lending_id = outcome.lending.id,
                    "Tool returned"
                );
                if outcome.remaining_open > 0 {
                    tracing::warn!(
                        tool = %tool_barcode,
                        remaining = outcome.remaining_open,
                        "Tool still has open lendings after return"
                    );
                }
            }
            Err(e) => self.note_failure("return", tool_barcode, e),
        }
        res
    }

    async fn return_inner(
        &self,
        tool_barcode: &str,
        worker_barcode: Option<&str>,
    ) -> Result<ReturnOutcome, LendingError> {
        let mut tx = begin_write(&self.db).await?;

        let latest_open = open_lending_for_tool(&mut tx, tool_barcode).await?;
        let lending = match worker_barcode {
            Some(worker) => {
                let scoped = sqlx::query_as::<_, Lending>(
                    r#"SELECT id, tool_barcode, worker_barcode, lent_at, returned_at
                       FROM lendings
                       WHERE tool_barcode = ?1 AND worker_barcode = ?2 AND returned_at IS NULL
                       ORDER BY lent_at DESC, id DESC LIMIT 1"#,
                )
                .bind(tool_barcode)
                .bind(worker)
                .fetch_optional(&mut *tx)
                .await?;
                match (scoped, latest_open) {
                    (Some(l), _) => l,
                    (None, Some(other)) => {
                        let holder_name = worker_display_name(&mut tx, &other.worker_barcode).await?;
                        return Err(LendingError::NotLentByWorker {
                            tool_barcode: tool_barcode.to_string(),
                            worker_barcode: worker.to_string(),
                            holder_name,
                            holder_barcode: other.worker_barcode,
                        });
                    }
                    (None, None) => return Err(LendingError::NoOpenLending(tool_barcode.to_string())),
                }
            }
            None => latest_open.ok_or_else(|| LendingError::NoOpenLending(tool_barcode.to_string()))?,
        };

        let now = now_iso();
        let closed = sqlx::query("UPDATE lendings SET returned_at = ?1 WHERE id = ?2 AND returned_at IS NULL")
            .bind(&now)
            .bind(lending.id)
            .execute(&mut *tx)
            .await?;
        if closed.rows_affected() == 0 {
            return Err(LendingError::NoOpenLending(tool_barcode.to_string()));
        }

        let remaining_open: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM lendings WHERE tool_barcode = ?1 AND returned_at IS NULL",
        )
        .bind(tool_barcode)
        .fetch_one(&mut *tx)
        .await?;

        if remaining_open == 0 {
            sqlx::query("UPDATE tools SET status = ?1, modified_at = ?2 WHERE barcode = ?3 AND status = ?4")
                .bind(ToolStatus::Verfuegbar)
                .bind(&now)
                .bind(tool_barcode)
                .bind(ToolStatus::Ausgeliehen)
                .execute(&mut *tx)
                .await?;
        }

        let tool_status: Option<ToolStatus> = sqlx::query_scalar("SELECT status FROM tools WHERE barcode = ?1")
            .bind(tool_barcode)
            .fetch_optional(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(ReturnOutcome {
            lending: Lending { returned_at: Some(now), ..lending },
            tool_status,
            remaining_open,
        })
    }

    /// Takes `quantity` units of a consumable for a worker.
    pub async fn consume(
        &self,
        consumable_barcode: &str,
        worker_barcode: &str,
        quantity: i64,
    ) -> Result<ConsumeOutcome, LendingError> {
        let res = self.consume_inner(consumable_barcode, worker_barcode, quantity).await;
        match &res {
            Ok(outcome) => {
                self.metrics.inc_consumptions();
                tracing::info!(
                    consumable = %consumable_barcode,
                    worker = %worker_barcode,
                    quantity,
                    remaining = outcome.remaining,
                    "Consumable used"
                );
                if outcome.below_minimum {
                    tracing::warn!(
                        consumable = %consumable_barcode,
                        remaining = outcome.remaining,
                        "Consumable below minimum stock"
                    );
                }
            }
            Err(e) => self.note_failure("consume", consumable_barcode, e),
        }
        res
    }

    async fn consume_inner(
        &self,
        consumable_barcode: &str,
        worker_barcode: &str,
        quantity: i64,
    ) -> Result<ConsumeOutcome, LendingError> {
        if quantity <= 0 {
            return Err(LendingError::InvalidQuantity(quantity));
        }
        let mut tx = begin_write(&self.db).await?;

        let consumable = fetch_consumable(&mut tx, consumable_barcode)
            .await?
            .ok_or_else(|| LendingError::ConsumableNotFound(consumable_barcode.to_string()))?;
        fetch_worker(&mut tx, worker_barcode)
            .await?
            .ok_or_else(|| LendingError::WorkerNotFound(worker_barcode.to_string()))?;

        let now = now_iso();
        let updated = sqlx::query(
            r#"UPDATE consumables SET quantity = quantity - ?1, modified_at = ?2
               WHERE barcode = ?3 AND deleted = 0 AND quantity >= ?1"#,
        )
        .bind(quantity)
        .bind(&now)
        .bind(consumable_barcode)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(LendingError::InsufficientStock {
                barcode: consumable_barcode.to_string(),
                available: consumable.quantity,
                requested: quantity,
            });
        }

        let usage = insert_usage(&mut tx, consumable_barcode, Some(worker_barcode), -quantity, &now, None).await?;
        let remaining = current_quantity(&mut tx, consumable_barcode).await?;

        tx.commit().await?;

        Ok(ConsumeOutcome { usage, remaining, below_minimum: remaining < consumable.min_quantity })
    }

    /// Restocks (`delta > 0`) or corrects (`delta < 0`) a consumable's quantity.
    pub async fn adjust_stock(
        &self,
        consumable_barcode: &str,
        delta: i64,
        worker_barcode: Option<&str>,
        comment: Option<&str>,
    ) -> Result<ConsumeOutcome, LendingError> {
        let res = self.adjust_inner(consumable_barcode, delta, worker_barcode, comment).await;
        match &res {
            Ok(outcome) => {
                self.metrics.inc_stock_adjustments();
                tracing::info!(
                    consumable = %consumable_barcode,
                    delta,
                    remaining = outcome.remaining,
                    "Consumable stock adjusted"
                );
            }
            Err(e) => self.note_failure("adjust_stock", consumable_barcode, e),
        }
        res
    }

    async fn adjust_inner(
        &self,
        consumable_barcode: &str,
        delta: i64,
        worker_barcode: Option<&str>,
        comment: Option<&str>,
    ) -> Result<ConsumeOutcome, LendingError> {
        if delta == 0 {
            return Err(LendingError::InvalidQuantity(delta));
        }
        let mut tx = begin_write(&self.db).await?;

        let consumable = fetch_consumable(&mut tx, consumable_barcode)
            .await?
            .ok_or_else(|| LendingError::ConsumableNotFound(consumable_barcode.to_string()))?;
        if let Some(worker) = worker_barcode {
            fetch_worker(&mut tx, worker)
                .await?
                .ok_or_else(|| LendingError::WorkerNotFound(worker.to_string()))?;
        }

        let new_quantity =
            consumable.quantity.checked_add(delta).ok_or(LendingError::InvalidQuantity(delta))?;
        if new_quantity < 0 {
            return Err(LendingError::InsufficientStock {
                barcode: consumable_barcode.to_string(),
                available: consumable.quantity,
                requested: delta.checked_neg().ok_or(LendingError::InvalidQuantity(delta))?,
            });
        }

        let now = now_iso();
        let updated = sqlx::query(
            r#"UPDATE consumables SET quantity = ?1, modified_at = ?2
               WHERE barcode = ?3 AND deleted = 0 AND quantity = ?4"#,
        )
        .bind(new_quantity)
        .bind(&now)
        .bind(consumable_barcode)
        .bind(consumable.quantity)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(LendingError::ConsumableNotFound(consumable_barcode.to_string()));
        }

        let usage = insert_usage(&mut tx, consumable_barcode, worker_barcode, delta, &now, comment).await?;
        let remaining = current_quantity(&mut tx, consumable_barcode).await?;

        tx.commit().await?;

        Ok(ConsumeOutcome { usage, remaining, below_minimum: remaining < consumable.min_quantity })
    }

    /// Scans all tools and open lendings and reports every mismatch.
    pub async fn validate_lending_consistency(&self) -> Result<ConsistencyReport, LendingError> {
        let mut conn = self.db.acquire().await?;
        let report = consistency::check(&mut conn).await?;
        if report.is_consistent() {
            tracing::debug!(tools = report.tools_checked, "Lending data consistent");
        } else {
            tracing::warn!(issues = report.issues.len(), "Lending inconsistencies detected");
        }
        Ok(report)
    }

    /// Repairs every issue `validate_lending_consistency` would report.
    pub async fn fix_lending_inconsistencies(&self) -> Result<RepairReport, LendingError> {
        let mut tx = begin_write(&self.db).await?;
        let report = consistency::repair(&mut tx).await?;
        tx.commit().await?;

        self.metrics.record_repair(report.total_fixed());
        if report.total_fixed() > 0 {
            tracing::info!(
                orphaned_deleted = report.orphaned_deleted,
                duplicates_closed = report.duplicates_closed,
                set_available = report.statuses_set_available,
                set_lent = report.statuses_set_lent,
                "Lending inconsistencies repaired"
            );
        }
        if report.remaining_issues > 0 {
            tracing::warn!(remaining = report.remaining_issues, "Issues left after repair pass");
        }
        Ok(report)
    }

    fn note_failure(&self, op: &str, barcode: &str, err: &LendingError) {
        if err.is_rejection() {
            self.metrics.inc_rejected();
            tracing::debug!(op, barcode, reason = %err, "Lending operation rejected");
        } else {
            tracing::error!(op, barcode, error = %err, "Lending operation failed");
        }
    }
}

/// Runs `fix_lending_inconsistencies` every `every` until `cancel` fires.
///
/// The first pass happens one period after startup.
pub fn spawn_repair_task(service: LendingService, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Consistency repair task stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = service.fix_lending_inconsistencies().await {
                        tracing::error!(error = %e, "Scheduled consistency repair failed");
                    }
                }
            }
        }
    })
}

async fn fetch_tool(conn: &mut SqliteConnection, barcode: &str) -> Result<Option<Tool>, sqlx::Error> {
    sqlx::query_as::<_, Tool>(
        r#"SELECT id, barcode, name, description, status, category, location, deleted, created_at, modified_at
           FROM tools WHERE barcode = ?1 AND deleted = 0"#,
    )
    .bind(barcode)
    .fetch_optional(&mut *conn)
    .await
}

async fn fetch_worker(conn: &mut SqliteConnection, barcode: &str) -> Result<Option<Worker>, sqlx::Error> {
    sqlx::query_as::<_, Worker>(
        r#"SELECT id, barcode, firstname, lastname, department, email, deleted, created_at, modified_at
           FROM workers WHERE barcode = ?1 AND deleted = 0"#,
    )
    .bind(barcode)
    .fetch_optional(&mut *conn)
    .await
}

async fn fetch_consumable(conn: &mut SqliteConnection, barcode: &str) -> Result<Option<Consumable>, sqlx::Error> {
    sqlx::query_as::<_, Consumable>(
        r#"SELECT id, barcode, name, description, quantity, min_quantity, unit, category, location,
                  deleted, created_at, modified_at
           FROM consumables WHERE barcode = ?1 AND deleted = 0"#,
    )
    .bind(barcode)
    .fetch_optional(&mut *conn)
    .await
}

async fn open_lending_for_tool(
    conn: &mut SqliteConnection,
    tool_barcode: &str,
) -> Result<Option<Lending>, sqlx::Error> {
    sqlx::query_as::<_, Lending>(
        r#"SELECT id, tool_barcode, worker_barcode, lent_at, returned_at
           FROM lendings
           WHERE tool_barcode = ?1 AND returned_at IS NULL
           ORDER BY lent_at DESC, id DESC LIMIT 1"#,
    )
    .bind(tool_barcode)
    .fetch_optional(&mut *conn)
    .await
}

/// Full name of a worker, falling back to the barcode for unknown workers.
async fn worker_display_name(conn: &mut SqliteConnection, barcode: &str) -> Result<String, sqlx::Error> {
    let name: Option<String> =
        sqlx::query_scalar("SELECT firstname || ' ' || lastname FROM workers WHERE barcode = ?1")
            .bind(barcode)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(name.unwrap_or_else(|| barcode.to_string()))
}

async fn already_lent(
    conn: &mut SqliteConnection,
    tool_barcode: &str,
    open: &Lending,
) -> Result<LendingError, sqlx::Error> {
    let holder_name = worker_display_name(conn, &open.worker_barcode).await?;
    Ok(LendingError::AlreadyLent {
        tool_barcode: tool_barcode.to_string(),
        holder_name,
        holder_barcode: open.worker_barcode.clone(),
    })
}

async fn insert_usage(
    conn: &mut SqliteConnection,
    consumable_barcode: &str,
    worker_barcode: Option<&str>,
    quantity: i64,
    used_at: &str,
    comment: Option<&str>,
) -> Result<ConsumableUsage, sqlx::Error> {
    sqlx::query_as::<_, ConsumableUsage>(
        r#"INSERT INTO consumable_usages (consumable_barcode, worker_barcode, quantity, used_at, comment)
           VALUES (?1, ?2, ?3, ?4, ?5)
           RETURNING id, consumable_barcode, worker_barcode, quantity, used_at, comment"#,
    )
    .bind(consumable_barcode)
    .bind(worker_barcode)
    .bind(quantity)
    .bind(used_at)
    .bind(comment)
    .fetch_one(&mut *conn)
    .await
}

async fn current_quantity(conn: &mut SqliteConnection, barcode: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT quantity FROM consumables WHERE barcode = ?1")
        .bind(barcode)
        .fetch_one(&mut *conn)
        .await
}
