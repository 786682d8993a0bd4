//! HTTP route handlers for the Scandy API.
//!
//! - `tools`, `workers`, `consumables`: inventory master data
//! - `lending`: lend/return/consume actions, lending lists and the consistency admin endpoints
//! - `barcodes`: scanner lookup
//! - `departments`: departments and their feature switches
//! - `tickets`: maintenance tickets with notes
//! - `dashboard`: aggregate counts
//! - `health`: probes, metrics and version
//! - `helpers`: column lists, body extractor and shared queries

pub mod barcodes;
pub mod consumables;
pub mod dashboard;
pub mod departments;
pub mod health;
pub mod helpers;
pub mod lending;
pub mod tickets;
pub mod tools;
pub mod workers;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};

use crate::{middleware::auth::admin_auth_middleware, state::AppState};

/// All API routes with state applied; global layers are added by the binary.
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin/consistency", get(lending::check_consistency))
        .route("/admin/consistency/fix", post(lending::fix_consistency))
        .route("/admin/departments", post(departments::create_department))
        .route("/admin/departments/{name}/features/{feature}", put(departments::set_department_feature))
        .route_layer(from_fn_with_state(state.config.clone(), admin_auth_middleware));

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/metrics/prometheus", get(health::metrics_prometheus))
        .route("/version", get(health::version))
        .route("/dashboard", get(dashboard::dashboard))
        .route("/barcodes/{code}", get(barcodes::lookup_barcode))
        .route("/tools", get(tools::list_tools).post(tools::create_tool))
        .route(
            "/tools/{barcode}",
            get(tools::get_tool).put(tools::update_tool).delete(tools::delete_tool),
        )
        .route("/tools/{barcode}/restore", post(tools::restore_tool))
        .route("/tools/{barcode}/status", put(tools::set_tool_status))
        .route("/tools/{barcode}/lendings", get(tools::tool_history))
        .route("/workers", get(workers::list_workers).post(workers::create_worker))
        .route(
            "/workers/{barcode}",
            get(workers::get_worker).put(workers::update_worker).delete(workers::delete_worker),
        )
        .route("/workers/{barcode}/restore", post(workers::restore_worker))
        .route("/workers/{barcode}/lendings", get(workers::worker_lendings))
        .route("/workers/{barcode}/usages", get(workers::worker_usages))
        .route("/consumables", get(consumables::list_consumables).post(consumables::create_consumable))
        .route(
            "/consumables/{barcode}",
            get(consumables::get_consumable)
                .put(consumables::update_consumable)
                .delete(consumables::delete_consumable),
        )
        .route("/consumables/{barcode}/restore", post(consumables::restore_consumable))
        .route("/consumables/{barcode}/stock", post(consumables::adjust_stock))
        .route("/consumables/{barcode}/usages", get(consumables::consumable_usages))
        .route("/lending/lend", post(lending::lend))
        .route("/lending/return", post(lending::return_tool))
        .route("/lending/consume", post(lending::consume))
        .route("/lendings", get(lending::list_lendings))
        .route("/departments", get(departments::list_departments))
        .route("/departments/{name}/features", get(departments::department_features))
        .route("/tickets", get(tickets::list_tickets).post(tickets::create_ticket))
        .route("/tickets/{id}", get(tickets::get_ticket).patch(tickets::update_ticket))
        .route("/tickets/{id}/notes", post(tickets::add_note))
        .merge(admin)
        .with_state(state)
}
