use sqlx::{Sqlite, SqlitePool, Transaction};

/// Current UTC time in the fixed-width format stored in all timestamp columns.
///
/// Lexicographic order of these strings equals chronological order, which the
/// lending queries rely on for "most recent".
pub fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Starts a transaction that holds SQLite's write lock from the first statement.
///
/// A deferred transaction that reads before writing fails with `SQLITE_BUSY`
/// once another writer has committed; an immediate one waits on the busy
/// timeout instead. sqlx 0.7 only issues a plain `BEGIN`, so it is swapped for
/// `BEGIN IMMEDIATE` inside a single command. The returned `Transaction` keeps
/// its usual commit and rollback-on-drop behaviour.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    if let Err(e) = sqlx::query("COMMIT; BEGIN IMMEDIATE").execute(&mut *tx).await {
        // sqlx still counts an open transaction and will roll it back on drop
        let _ = sqlx::query("BEGIN").execute(&mut *tx).await;
        return Err(e);
    }
    Ok(tx)
}

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    // Pragmas for better durability/performance
    if let Err(e) = sqlx::query("PRAGMA journal_mode=WAL;").execute(pool).await {
        tracing::warn!("Failed to set WAL journal mode: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA synchronous=NORMAL;").execute(pool).await {
        tracing::warn!("Failed to set synchronous mode: {}", e);
    }
    sqlx::query("PRAGMA foreign_keys=ON;").execute(pool).await?;
    if let Err(e) = sqlx::query("PRAGMA busy_timeout=10000;").execute(pool).await {
        tracing::warn!("Failed to set busy_timeout: {}", e);
    }

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS tools (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            barcode TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT NULL,
            status TEXT NOT NULL DEFAULT 'verfügbar',
            category TEXT NULL,
            location TEXT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT NULL,
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS workers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            barcode TEXT NOT NULL UNIQUE,
            firstname TEXT NOT NULL,
            lastname TEXT NOT NULL,
            department TEXT NULL,
            email TEXT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT NULL,
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS consumables (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            barcode TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT NULL,
            quantity INTEGER NOT NULL DEFAULT 0,
            min_quantity INTEGER NOT NULL DEFAULT 0,
            unit TEXT NULL,
            category TEXT NULL,
            location TEXT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT NULL,
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL,
            CHECK (quantity >= 0)
        )"#,
    )
    .execute(pool)
    .await?;

    // lendings: no foreign keys, orphans are detected by the repair pass
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS lendings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tool_barcode TEXT NOT NULL,
            worker_barcode TEXT NOT NULL,
            lent_at TEXT NOT NULL,
            returned_at TEXT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS consumable_usages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            consumable_barcode TEXT NOT NULL,
            worker_barcode TEXT NULL,
            quantity INTEGER NOT NULL,
            used_at TEXT NOT NULL,
            comment TEXT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS departments (
            name TEXT PRIMARY KEY,
            created_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS department_features (
            department TEXT NOT NULL,
            feature TEXT NOT NULL,
            enabled INTEGER NOT NULL,
            PRIMARY KEY (department, feature),
            FOREIGN KEY(department) REFERENCES departments(name) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS tickets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            description TEXT NULL,
            status TEXT NOT NULL DEFAULT 'offen',
            priority TEXT NOT NULL DEFAULT 'normal',
            category TEXT NULL,
            created_by TEXT NULL,
            assigned_to TEXT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            resolved_at TEXT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS ticket_notes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ticket_id INTEGER NOT NULL,
            author TEXT NULL,
            text TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(ticket_id) REFERENCES tickets(id) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        ("idx_tools_status", "CREATE INDEX IF NOT EXISTS idx_tools_status ON tools(status, deleted)"),
        ("idx_workers_department", "CREATE INDEX IF NOT EXISTS idx_workers_department ON workers(department)"),
        (
            "idx_lendings_tool_open",
            "CREATE INDEX IF NOT EXISTS idx_lendings_tool_open ON lendings(tool_barcode, returned_at)",
        ),
        (
            "idx_lendings_worker",
            "CREATE INDEX IF NOT EXISTS idx_lendings_worker ON lendings(worker_barcode, lent_at DESC)",
        ),
        (
            "idx_usages_consumable",
            "CREATE INDEX IF NOT EXISTS idx_usages_consumable ON consumable_usages(consumable_barcode, used_at DESC)",
        ),
        (
            "idx_usages_worker",
            "CREATE INDEX IF NOT EXISTS idx_usages_worker ON consumable_usages(worker_barcode, used_at DESC)",
        ),
        ("idx_tickets_status", "CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status, created_at DESC)"),
        ("idx_ticket_notes_ticket", "CREATE INDEX IF NOT EXISTS idx_ticket_notes_ticket ON ticket_notes(ticket_id)"),
    ];

    for (name, query) in indexes {
        if let Err(e) = sqlx::query(query).execute(pool).await {
            match &e {
                sqlx::Error::Database(db_err) => {
                    let msg = db_err.message().to_lowercase();
                    if msg.contains("already exists") || msg.contains("duplicate") {
                        tracing::debug!("Index {} already exists, skipping", name);
                    } else {
                        tracing::warn!("Failed to create index {}: {}", name, e);
                    }
                }
                _ => {
                    tracing::warn!("Failed to create index {}: {}", name, e);
                }
            }
        }
    }

    Ok(())
}

/// Inserts the configured departments if they are missing.
pub async fn seed_departments(pool: &SqlitePool, names: &[String]) -> anyhow::Result<()> {
    let now = now_iso();
    for name in names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        sqlx::query("INSERT OR IGNORE INTO departments (name, created_at) VALUES (?1, ?2)")
            .bind(name)
            .bind(&now)
            .execute(pool)
            .await?;
    }
    Ok(())
}
