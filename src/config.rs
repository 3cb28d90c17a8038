use serde::Deserialize;
use std::borrow::Cow;
use std::time::Duration;

/// The configuration of a [`SessionManager`](crate::SessionManager).
///
/// It is fixed once the manager is constructed.
/// Every field has a default, so a partial configuration can be deserialized.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the session cookie. Also the namespace shared by all sessions of one manager.
    pub cookie_name: Cow<'static, str>,
    /// Session cookie path.
    pub cookie_path: Cow<'static, str>,
    /// Session cookie http only flag.
    pub cookie_http_only: bool,
    /// Address of the store, e.g. `redis://127.0.0.1:6379`.
    pub address: String,
    /// Index of the store database. The database is selected once per store connection if it is not 0.
    pub database: i64,
    /// Prefix of the store keys, followed by the session id.
    pub key_prefix: Cow<'static, str>,
    /// Sliding lifetime of a session, in seconds.
    pub ttl_seconds: u64,
    /// Maximum number of pooled store connections.
    pub max_connections: u32,
    /// Timeout of each store operation, in milliseconds.
    pub io_timeout_ms: u64,
}

impl SessionConfig {
    /// The session lifetime of the default configuration.
    pub const DEFAULT_TTL_SECONDS: u64 = 1800;

    /// Create the default configuration.
    pub fn new() -> Self {
        Default::default()
    }

    /// Use the given cookie name.
    pub fn with_cookie_name(mut self, cookie_name: impl Into<Cow<'static, str>>) -> Self {
        self.cookie_name = cookie_name.into();
        self
    }

    /// Use the given cookie path.
    pub fn with_cookie_path(mut self, cookie_path: impl Into<Cow<'static, str>>) -> Self {
        self.cookie_path = cookie_path.into();
        self
    }

    /// Use the given store address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Use the store database with the given index.
    pub fn with_database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    /// Use the given key prefix.
    pub fn with_key_prefix(mut self, key_prefix: impl Into<Cow<'static, str>>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    /// Use the given session lifetime.
    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// The timeout of each store operation.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub(crate) fn store_key(&self, session_id: &str) -> String {
        format!("{}{session_id}", self.key_prefix)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session_id".into(),
            cookie_path: "/".into(),
            cookie_http_only: true,
            address: "redis://127.0.0.1:6379".to_owned(),
            database: 0,
            key_prefix: "sess:".into(),
            ttl_seconds: Self::DEFAULT_TTL_SECONDS,
            max_connections: 16,
            io_timeout_ms: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"cookie_name": "sid", "database": 2, "ttl_seconds": 60}"#)
                .unwrap();
        assert_eq!(config.cookie_name, "sid");
        assert_eq!(config.database, 2);
        assert_eq!(config.ttl_seconds, 60);
        assert_eq!(config.key_prefix, "sess:");
        assert_eq!(config.cookie_path, "/");
        assert!(config.cookie_http_only);
        assert_eq!(config.io_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn store_key_is_prefixed() {
        let config = SessionConfig::new().with_key_prefix("app:sess:");
        assert_eq!(config.store_key("abc"), "app:sess:abc");
        assert_eq!(SessionConfig::default().ttl_seconds, 1800);
    }
}
