//! Core data models for the folder/file tree.
//!
//! These entities map cleanly to database tables via `sqlx::FromRow` and
//! serialize as JSON via `serde` with their column names.

pub mod file;
pub mod folder;
pub mod user;
