//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use murmur_shared::constants;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP / WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./murmur.db`
    pub database_path: PathBuf,

    /// Directory where uploaded attachments are written.
    /// Env: `ATTACHMENT_DIR`
    /// Default: `./storage`
    pub attachment_dir: PathBuf,

    /// Maximum attachment size in bytes.
    /// Env: `MAX_ATTACHMENT_SIZE`
    /// Default: 10 MiB
    pub max_attachment_size: usize,

    /// Shared HS256 signing secret.
    /// Env: `JWT_SECRET`
    /// Default: none (a random per-process secret is generated at startup).
    pub jwt_secret: Option<String>,

    /// RS256 key pair in PEM form. Takes precedence over `jwt_secret` when
    /// both paths are set.
    /// Env: `JWT_PRIVATE_KEY_PATH`, `JWT_PUBLIC_KEY_PATH`
    pub jwt_private_key_path: Option<PathBuf>,
    pub jwt_public_key_path: Option<PathBuf>,

    /// Lifetime of issued tokens.
    /// Env: `TOKEN_TTL_SECS`
    /// Default: 24 h
    pub token_ttl: Duration,

    /// How long a user stays "online" after their last activity.
    /// Env: `PRESENCE_TTL_SECS`
    /// Default: 60 s
    pub presence_ttl: Duration,

    /// Bounded wait for every store and blob call.
    /// Env: `STORE_TIMEOUT_SECS`
    /// Default: 5 s
    pub store_timeout: Duration,

    /// Pending events per live channel before pushes to it fail.
    /// Env: `OUTBOUND_QUEUE_CAPACITY`
    /// Default: 64
    pub outbound_queue_capacity: usize,
}

// Hand-written so the secret never reaches the logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("attachment_dir", &self.attachment_dir)
            .field("max_attachment_size", &self.max_attachment_size)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("jwt_private_key_path", &self.jwt_private_key_path)
            .field("jwt_public_key_path", &self.jwt_public_key_path)
            .field("token_ttl", &self.token_ttl)
            .field("presence_ttl", &self.presence_ttl)
            .field("store_timeout", &self.store_timeout)
            .field("outbound_queue_capacity", &self.outbound_queue_capacity)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], constants::DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./murmur.db"),
            attachment_dir: PathBuf::from("./storage"),
            max_attachment_size: constants::MAX_ATTACHMENT_SIZE,
            jwt_secret: None,
            jwt_private_key_path: None,
            jwt_public_key_path: None,
            token_ttl: Duration::from_secs(constants::TOKEN_TTL_SECS),
            presence_ttl: Duration::from_secs(constants::PRESENCE_TTL_SECS),
            store_timeout: Duration::from_secs(constants::STORE_TIMEOUT_SECS),
            outbound_queue_capacity: constants::OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. `from_env` is the
    /// production caller; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            parse_into(&mut config.http_addr, "HTTP_ADDR", &addr);
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("ATTACHMENT_DIR") {
            config.attachment_dir = PathBuf::from(path);
        }

        if let Some(val) = lookup("MAX_ATTACHMENT_SIZE") {
            parse_into(&mut config.max_attachment_size, "MAX_ATTACHMENT_SIZE", &val);
        }

        // -- Identity gate --

        if let Some(secret) = lookup("JWT_SECRET") {
            if !secret.is_empty() {
                config.jwt_secret = Some(secret);
            }
        }

        config.jwt_private_key_path = lookup("JWT_PRIVATE_KEY_PATH")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        config.jwt_public_key_path = lookup("JWT_PUBLIC_KEY_PATH")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        if let Some(val) = lookup("TOKEN_TTL_SECS") {
            parse_secs_into(&mut config.token_ttl, "TOKEN_TTL_SECS", &val);
        }

        // -- Runtime limits --

        if let Some(val) = lookup("PRESENCE_TTL_SECS") {
            parse_secs_into(&mut config.presence_ttl, "PRESENCE_TTL_SECS", &val);
        }

        if let Some(val) = lookup("STORE_TIMEOUT_SECS") {
            parse_secs_into(&mut config.store_timeout, "STORE_TIMEOUT_SECS", &val);
        }

        if let Some(val) = lookup("OUTBOUND_QUEUE_CAPACITY") {
            parse_into(&mut config.outbound_queue_capacity, "OUTBOUND_QUEUE_CAPACITY", &val);
            if config.outbound_queue_capacity == 0 {
                tracing::warn!("OUTBOUND_QUEUE_CAPACITY must be positive, using default");
                config.outbound_queue_capacity = constants::OUTBOUND_QUEUE_CAPACITY;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_into<T: FromStr>(slot: &mut T, key: &str, raw: &str) {
    match raw.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}

fn parse_secs_into(slot: &mut Duration, key: &str, raw: &str) {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => *slot = Duration::from_secs(secs),
        _ => tracing::warn!(key, value = %raw, "Invalid duration, using default"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.presence_ttl, Duration::from_secs(60));
        assert_eq!(config.store_timeout, Duration::from_secs(5));
        assert!(config.jwt_private_key_path.is_none());
        assert!(config.jwt_public_key_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = from_map(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("PRESENCE_TTL_SECS", "30"),
            ("JWT_SECRET", "s3cret"),
            ("JWT_PRIVATE_KEY_PATH", "/keys/private.pem"),
            ("JWT_PUBLIC_KEY_PATH", "/keys/public.pem"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.presence_ttl, Duration::from_secs(30));
        assert_eq!(config.jwt_secret.as_deref(), Some("s3cret"));
        assert_eq!(
            config.jwt_private_key_path.as_deref(),
            Some(std::path::Path::new("/keys/private.pem"))
        );
        assert_eq!(
            config.jwt_public_key_path.as_deref(),
            Some(std::path::Path::new("/keys/public.pem"))
        );
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_map(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("STORE_TIMEOUT_SECS", "0"),
            ("OUTBOUND_QUEUE_CAPACITY", "0"),
            ("MAX_ATTACHMENT_SIZE", "huge"),
        ]);
        let defaults = ServerConfig::default();
        assert_eq!(config.http_addr, defaults.http_addr);
        assert_eq!(config.store_timeout, defaults.store_timeout);
        assert_eq!(config.outbound_queue_capacity, defaults.outbound_queue_capacity);
        assert_eq!(config.max_attachment_size, defaults.max_attachment_size);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = from_map(&[("JWT_SECRET", "top-secret-value")]);
        let printed = format!("{config:?}");
        assert!(!printed.contains("top-secret-value"));
    }
}
