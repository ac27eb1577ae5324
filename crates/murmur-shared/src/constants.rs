/// Application name
pub const APP_NAME: &str = "Murmur";

/// How long a presence marker stays valid without a refresh, in seconds
pub const PRESENCE_TTL_SECS: u64 = 60;

/// Bounded wait applied to every store and blob operation, in seconds
pub const STORE_TIMEOUT_SECS: u64 = 5;

/// Lifetime of an issued bearer token, in seconds (24 hours)
pub const TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

/// Number of messages returned by history endpoints
pub const HISTORY_LIMIT: u32 = 50;

/// Number of conversations returned by the chat list
pub const CHAT_LIST_LIMIT: u32 = 100;

/// Maximum attachment size in bytes (10 MiB)
pub const MAX_ATTACHMENT_SIZE: usize = 10 * 1024 * 1024;

/// Pending outbound events per live channel before pushes start failing
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Minimum password length accepted at registration
pub const MIN_PASSWORD_LEN: usize = 8;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;
