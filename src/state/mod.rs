/// State management module
///
/// This module handles all persistent cache state, including:
/// - The SQLite metadata store (store.rs)
/// - Shared record types (data.rs)
/// - Cache configuration loaded from JSON (config.rs)

pub mod config;
pub mod data;
pub mod store;
