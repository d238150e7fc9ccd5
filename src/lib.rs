//! TabStash Server Library
//!
//! This crate exposes the server's modules so the integration tests and
//! benchmarks can drive the real application. The server binary is in
//! main.rs.
//!
//! # Modules
//!
//! - `sync`: the incremental sync engine (versioning, conflicts, catch-up)
//! - `db`: SQLite persistence (entity stores, operation log, cursors)
//! - `realtime`: live fan-out to connected devices

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod realtime;
pub mod routes;
pub mod state;
pub mod sync;
