//! Core data models for the tiered file-storage service.
//!
//! These entities represent content-addressed files, their per-owner
//! associations, in-flight upload sessions, and queued tier transfers.
//! The database-backed ones map cleanly to tables via `sqlx::FromRow`
//! and serialize naturally as JSON via `serde`.

pub mod file;
pub mod session;
pub mod transfer;
pub mod user_file;
