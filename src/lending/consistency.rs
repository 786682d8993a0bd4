//! Detection and repair of drift between `tools.status` and open lendings.
//!
//! [`analyze`] works on plain snapshots so it can be tested and benchmarked
//! without a database; [`check`] and [`repair`] load the snapshots from SQLite.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::db::now_iso;
use crate::types::ToolStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ToolSnapshot {
    pub barcode: String,
    pub status: ToolStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OpenLendingSnapshot {
    pub id: i64,
    pub tool_barcode: String,
    pub worker_barcode: String,
    pub lent_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyIssue {
    /// Tool is marked `ausgeliehen` but has no open lending.
    StatusWithoutLending { tool_barcode: String },
    /// Tool has an open lending but is marked `verfügbar`.
    LendingWithoutStatus { tool_barcode: String, lending_id: i64 },
    /// Open lending referencing a tool that does not exist.
    OrphanedLending { lending_id: i64, tool_barcode: String, worker_barcode: String },
    /// More than one open lending for the same tool; `keep_id` is the most recent.
    DuplicateOpenLendings { tool_barcode: String, lending_ids: Vec<i64>, keep_id: i64 },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub tools_checked: usize,
    pub open_lendings_checked: usize,
    pub issues: Vec<ConsistencyIssue>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub orphaned_deleted: u64,
    pub duplicates_closed: u64,
    pub statuses_set_available: u64,
    pub statuses_set_lent: u64,
    pub remaining_issues: usize,
}

impl RepairReport {
    pub fn total_fixed(&self) -> u64 {
        self.orphaned_deleted + self.duplicates_closed + self.statuses_set_available + self.statuses_set_lent
    }
}

/// Compares every tool's status with the open lendings referencing it.
///
/// Status drift is never reported for `defekt` tools, since that status is an
/// operator override. Orphaned and duplicate open lendings are reported for
/// every tool regardless of its status.
pub fn analyze(tools: &[ToolSnapshot], open_lendings: &[OpenLendingSnapshot]) -> ConsistencyReport {
    let status_by_barcode: HashMap<&str, ToolStatus> =
        tools.iter().map(|t| (t.barcode.as_str(), t.status)).collect();

    // BTreeMap keeps the issue order stable across runs
    let mut open_by_tool: BTreeMap<&str, Vec<&OpenLendingSnapshot>> = BTreeMap::new();
    let mut issues = Vec::new();

    for lending in open_lendings {
        if status_by_barcode.contains_key(lending.tool_barcode.as_str()) {
            open_by_tool.entry(lending.tool_barcode.as_str()).or_default().push(lending);
        } else {
            issues.push(ConsistencyIssue::OrphanedLending {
                lending_id: lending.id,
                tool_barcode: lending.tool_barcode.clone(),
                worker_barcode: lending.worker_barcode.clone(),
            });
        }
    }

    for (tool_barcode, group) in &open_by_tool {
        let newest = group
            .iter()
            .max_by(|a, b| a.lent_at.cmp(&b.lent_at).then(a.id.cmp(&b.id)))
            .map(|l| l.id);
        if let (true, Some(keep_id)) = (group.len() > 1, newest) {
            let mut lending_ids: Vec<i64> = group.iter().map(|l| l.id).collect();
            lending_ids.sort_unstable();
            issues.push(ConsistencyIssue::DuplicateOpenLendings {
                tool_barcode: tool_barcode.to_string(),
                lending_ids,
                keep_id,
            });
        }
        if let (Some(ToolStatus::Verfuegbar), Some(lending_id)) =
            (status_by_barcode.get(tool_barcode).copied(), newest)
        {
            issues.push(ConsistencyIssue::LendingWithoutStatus {
                tool_barcode: tool_barcode.to_string(),
                lending_id,
            });
        }
    }

    for tool in tools {
        if tool.status == ToolStatus::Ausgeliehen && !open_by_tool.contains_key(tool.barcode.as_str()) {
            issues.push(ConsistencyIssue::StatusWithoutLending { tool_barcode: tool.barcode.clone() });
        }
    }

    ConsistencyReport { tools_checked: tools.len(), open_lendings_checked: open_lendings.len(), issues }
}

async fn load_snapshots(
    conn: &mut SqliteConnection,
) -> Result<(Vec<ToolSnapshot>, Vec<OpenLendingSnapshot>), sqlx::Error> {
    // Soft-deleted tools still exist; their lendings are not orphans
    let tools = sqlx::query_as::<_, ToolSnapshot>("SELECT barcode, status FROM tools ORDER BY barcode")
        .fetch_all(&mut *conn)
        .await?;
    let open = sqlx::query_as::<_, OpenLendingSnapshot>(
        r#"SELECT id, tool_barcode, worker_barcode, lent_at
           FROM lendings WHERE returned_at IS NULL ORDER BY id"#,
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok((tools, open))
}

pub async fn check(conn: &mut SqliteConnection) -> Result<ConsistencyReport, sqlx::Error> {
    let (tools, open) = load_snapshots(conn).await?;
    Ok(analyze(&tools, &open))
}

/// Applies all repairs on `conn`; the caller owns the transaction.
///
/// Orphans and duplicates are handled first, then statuses are recomputed
/// against the cleaned-up lendings.
pub async fn repair(conn: &mut SqliteConnection) -> Result<RepairReport, sqlx::Error> {
    let mut report = RepairReport::default();
    let now = now_iso();

    let initial = check(conn).await?;
    for issue in &initial.issues {
        match issue {
            ConsistencyIssue::OrphanedLending { lending_id, .. } => {
                let res = sqlx::query("DELETE FROM lendings WHERE id = ?1 AND returned_at IS NULL")
                    .bind(*lending_id)
                    .execute(&mut *conn)
                    .await?;
                report.orphaned_deleted += res.rows_affected();
            }
            ConsistencyIssue::DuplicateOpenLendings { lending_ids, keep_id, .. } => {
                for id in lending_ids.iter().filter(|id| *id != keep_id) {
                    let res = sqlx::query("UPDATE lendings SET returned_at = ?1 WHERE id = ?2 AND returned_at IS NULL")
                        .bind(&now)
                        .bind(*id)
                        .execute(&mut *conn)
                        .await?;
                    report.duplicates_closed += res.rows_affected();
                }
            }
            _ => {}
        }
    }

    let cleaned = check(conn).await?;
    for issue in &cleaned.issues {
        match issue {
            ConsistencyIssue::StatusWithoutLending { tool_barcode } => {
                let res = sqlx::query("UPDATE tools SET status = ?1, modified_at = ?2 WHERE barcode = ?3 AND status = ?4")
                    .bind(ToolStatus::Verfuegbar)
                    .bind(&now)
                    .bind(tool_barcode)
                    .bind(ToolStatus::Ausgeliehen)
                    .execute(&mut *conn)
                    .await?;
                report.statuses_set_available += res.rows_affected();
            }
            ConsistencyIssue::LendingWithoutStatus { tool_barcode, .. } => {
                let res = sqlx::query("UPDATE tools SET status = ?1, modified_at = ?2 WHERE barcode = ?3 AND status = ?4")
                    .bind(ToolStatus::Ausgeliehen)
                    .bind(&now)
                    .bind(tool_barcode)
                    .bind(ToolStatus::Verfuegbar)
                    .execute(&mut *conn)
                    .await?;
                report.statuses_set_lent += res.rows_affected();
            }
            _ => {}
        }
    }

    report.remaining_issues = check(conn).await?.issues.len();
    Ok(report)
}
