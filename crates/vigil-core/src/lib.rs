//! Shared infrastructure for the vigil alert relay.
//!
//! Holds the pieces that are independent of relay semantics:
//! - `SQLite` pool helpers and the shared `DatabaseError`
//! - tracing subscriber initialisation

pub mod db;
pub mod tracing_init;
