//! The interface between sessions and the key-value store that persists them.

use anyhow::Result;
use std::fmt::{Display, Formatter};

/// This is the backend-facing interface of the session manager.
/// It defines the hash commands of a key-value store that sessions are persisted with.
///
/// All methods block until the store replied.
/// Implementations are expected to bound the time they block, and report a timeout as an error.
pub trait StoreClient {
    /// Set `field` of the hash at `key` to `value`, creating the hash if it does not exist.
    fn hash_set(&mut self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Set `field` of the hash at `key` to `value`, and let `key` expire `ttl_seconds` from now.
    ///
    /// Both take effect together or not at all, so a hash created by this command never lives without expiry.
    fn hash_set_with_expiry(
        &mut self,
        key: &str,
        field: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<()>;

    /// Remove `field` from the hash at `key`.
    fn hash_delete(&mut self, key: &str, field: &str) -> Result<()>;

    /// Return all fields and values of the hash at `key` as a flat sequence.
    ///
    /// Fields are at even and values at odd positions, each value directly following its field.
    /// Callers rely on this order to pair them up again.
    /// A missing hash is returned as an empty sequence.
    fn hash_get_all(&mut self, key: &str) -> Result<Vec<String>>;

    /// Delete `key`.
    fn delete(&mut self, key: &str) -> Result<()>;

    /// Let `key` expire `ttl_seconds` from now.
    fn expire(&mut self, key: &str, ttl_seconds: u64) -> Result<()>;

    /// Switch to the database with the given index.
    fn select_database(&mut self, index: i64) -> Result<()>;
}

/// A source of store clients, shared between all requests.
///
/// One client is checked out per request and owned by its [`Session`](crate::Session).
/// Dropping the client returns it to the backend.
pub trait StoreBackend {
    /// The client type handed out by this backend.
    type Client: StoreClient;

    /// Check out a client for handling a single request.
    fn checkout(&self) -> Result<Self::Client>;
}

/// The store commands issued by sessions, used to report which command failed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum StoreCommand {
    /// `HSET`
    HashSet,
    /// `HDEL`
    HashDelete,
    /// `HGETALL`
    HashGetAll,
    /// `DEL`
    Delete,
    /// `EXPIRE`
    Expire,
    /// `SELECT`
    SelectDatabase,
}

impl StoreCommand {
    /// The name of the command in the store protocol.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HashSet => "HSET",
            Self::HashDelete => "HDEL",
            Self::HashGetAll => "HGETALL",
            Self::Delete => "DEL",
            Self::Expire => "EXPIRE",
            Self::SelectDatabase => "SELECT",
        }
    }
}

impl Display for StoreCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
