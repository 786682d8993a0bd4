//! Tests for the Scandy backend.
//!
//! - **api_tests**: master data, ticket, department and lookup endpoints
//! - **lending_tests**: lend/return/consume transitions through the service and HTTP
//! - **consistency_tests**: drift detection and repair on a real database
//! - **config_tests**: configuration loading and validation
//! - **db_tests**: schema and seeding
//! - **error_tests**: error envelope and status mapping
//! - **health_api_tests**: health checks, metrics and version
//!
//! Every test runs against its own temporary SQLite file.

pub mod api_tests;
pub mod error_tests;

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Sqlite, SqlitePool};
use tempfile::NamedTempFile;

use crate::{config::AppConfig, db, routes, state::AppState};

/// A pool on a temporary database file; the file lives as long as this value.
pub struct TestDb {
    pub pool: SqlitePool,
    pub url: String,
    _file: NamedTempFile,
}

pub async fn test_db() -> TestDb {
    test_db_with_connections(1).await
}

/// Like [`test_db`] but with a pool of `connections`, so concurrent writers really contend.
pub async fn test_db_with_connections(connections: u32) -> TestDb {
    let file = NamedTempFile::new().unwrap();
    let url = format!("sqlite:{}", file.path().display());
    Sqlite::create_database(&url).await.unwrap();

    let pool = SqlitePoolOptions::new().max_connections(connections).connect(&url).await.unwrap();
    db::init_db(&pool).await.unwrap();
    db::seed_departments(&pool, &["Werkstatt".to_string(), "Lager".to_string()]).await.unwrap();

    TestDb { pool, url, _file: file }
}

pub fn test_config(db_url: &str) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.database.url = db_url.to_string();
    cfg.lending.auto_repair = false;
    cfg
}

pub async fn test_app_with(cfg: impl FnOnce(&mut AppConfig)) -> (Router, AppState, TestDb) {
    app_on(test_db().await, cfg)
}

pub async fn test_app_with_connections(connections: u32) -> (Router, AppState, TestDb) {
    app_on(test_db_with_connections(connections).await, |_| {})
}

fn app_on(tdb: TestDb, cfg: impl FnOnce(&mut AppConfig)) -> (Router, AppState, TestDb) {
    let mut config = test_config(&tdb.url);
    cfg(&mut config);
    let state = AppState::new(tdb.pool.clone(), config);
    (routes::router(state.clone()), state, tdb)
}

pub async fn test_app() -> (Router, AppState, TestDb) {
    test_app_with(|_| {}).await
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn form_request(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn insert_tool(pool: &SqlitePool, barcode: &str, name: &str, status: &str) {
    let now = db::now_iso();
    sqlx::query(
        "INSERT INTO tools (barcode, name, status, created_at, modified_at) VALUES (?1, ?2, ?3, ?4, ?4)",
    )
    .bind(barcode)
    .bind(name)
    .bind(status)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_worker(pool: &SqlitePool, barcode: &str, firstname: &str, lastname: &str) {
    let now = db::now_iso();
    sqlx::query(
        "INSERT INTO workers (barcode, firstname, lastname, created_at, modified_at) VALUES (?1, ?2, ?3, ?4, ?4)",
    )
    .bind(barcode)
    .bind(firstname)
    .bind(lastname)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_consumable(pool: &SqlitePool, barcode: &str, quantity: i64, min_quantity: i64) {
    let now = db::now_iso();
    sqlx::query(
        r#"INSERT INTO consumables (barcode, name, quantity, min_quantity, created_at, modified_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?5)"#,
    )
    .bind(barcode)
    .bind(format!("Material {}", barcode))
    .bind(quantity)
    .bind(min_quantity)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();
}

/// Inserts a lending row directly, bypassing all checks.
pub async fn insert_lending(pool: &SqlitePool, tool: &str, worker: &str, lent_at: &str, returned_at: Option<&str>) -> i64 {
    sqlx::query("INSERT INTO lendings (tool_barcode, worker_barcode, lent_at, returned_at) VALUES (?1, ?2, ?3, ?4)")
        .bind(tool)
        .bind(worker)
        .bind(lent_at)
        .bind(returned_at)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
}

pub async fn tool_status(pool: &SqlitePool, barcode: &str) -> String {
    sqlx::query_scalar("SELECT status FROM tools WHERE barcode = ?1")
        .bind(barcode)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn open_lending_count(pool: &SqlitePool, tool: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM lendings WHERE tool_barcode = ?1 AND returned_at IS NULL")
        .bind(tool)
        .fetch_one(pool)
        .await
        .unwrap()
}
