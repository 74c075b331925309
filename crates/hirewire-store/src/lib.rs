//! # hirewire-store
//!
//! SQLite persistence for Hirewire messaging.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for the message
//! collection and the two user collections (job seekers and employers).
//! Callers that live on an async runtime are expected to move calls onto a
//! blocking thread.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
