//! # murmur-store
//!
//! Durable storage for Murmur, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for accounts, the
//! append-only message log, attachments, and the derived chat list.

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
