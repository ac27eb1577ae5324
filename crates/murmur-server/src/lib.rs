//! # murmur-server
//!
//! Real-time chat relay for Murmur.
//!
//! - **Connection registry**: at most one live WebSocket per user; a new
//!   connection closes the previous one
//! - **Fan-out**: public messages reach every connected user, private ones
//!   only the sender and the recipient
//! - **Ingestion**: resolve recipient, store attachment, persist, deliver
//! - **Presence**: TTL-based online markers refreshed on every activity
//! - **REST API** (axum) for accounts, history, attachments and chat lists

pub mod api;
pub mod auth;
pub mod blob_store;
pub mod config;
pub mod error;
pub mod fanout;
pub mod ingest;
pub mod presence;
pub mod registry;
pub mod store;
pub mod ws;

pub use api::{build_router, AppState};
pub use config::ServerConfig;
pub use error::ServerError;
