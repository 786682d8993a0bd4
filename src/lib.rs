//! # Scandy Backend Library
//!
//! Inventory backend for workshops: tools are lent to workers by scanning two
//! barcodes, consumables are withdrawn from stock, and a repair pass keeps tool
//! status and open lendings in agreement.
//!
//! ## Core Components
//!
//! - [`config`]: Layered configuration (embedded defaults, `scandy.toml`, env)
//! - [`db`]: SQLite schema and seeding
//! - [`error`]: Error type and the JSON error envelope
//! - [`lending`]: Lend/return/consume transitions and consistency checks
//! - [`metrics`]: Operation counters
//! - [`middleware`]: Admin auth, rate limiting, validation and security headers
//! - [`routes`]: HTTP handlers and the router
//! - [`state`]: Shared application state
//! - [`types`]: Rows, requests and response types

pub mod config;
pub mod db;
pub mod error;
pub mod lending;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;
