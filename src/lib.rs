//! HTTP sessions stored as redis hashes.
//!
//! This crate maps a session cookie to a hash of named string values in a key-value store.
//! The hash lives under the key `"sess:" + id`, and expires after a period of inactivity.
//!
//! # Lifecycle
//!
//! A [`SessionManager`] turns the cookies of a request into a [`Session`].
//! If the request carries no session cookie, or its session expired, a new session with a new id is created.
//! New sessions are written to the store lazily, when the first value is set.
//!
//! Every mutation of a session is written through to the store immediately,
//! and slides the expiry of the stored hash, as does loading the session.
//! Reading values never touches the store.
//! Store failures are returned to the caller, who decides whether to fail the request.
//!
//! # Security
//!
//! Session ids consist of 40 alphanumeric characters drawn from a cryptographically secure generator.
//! The session cookie is not signed or encrypted.
//!
//! # Example
//!
//! ```
//! use http::header::{COOKIE, SET_COOKIE};
//! use http::HeaderMap;
//! use redis_session::{MemoryStore, SessionConfig, SessionManager};
//!
//! # fn main() -> redis_session::Result {
//! // Use `SessionManager::connect` to connect to a redis server instead.
//! let manager = SessionManager::new(MemoryStore::new(), SessionConfig::new());
//!
//! // A request without cookie gets a new session.
//! let mut response = HeaderMap::new();
//! let mut session = manager.session(&HeaderMap::new(), &mut response)?;
//! session.set("theme", "dark")?;
//!
//! // The next request presents the cookie and sees the stored values.
//! let cookie = response[SET_COOKIE].to_str().unwrap().split(';').next().unwrap().to_owned();
//! let mut request = HeaderMap::new();
//! request.insert(COOKIE, cookie.parse().unwrap());
//! let (session, _set_cookie) = manager.load_or_create(&request)?;
//! assert_eq!(session.get("theme"), "dark");
//! assert_eq!(session.get("missing"), "");
//! # Ok(()) }
//! ```

#![forbid(unsafe_code)]
#![deny(
    future_incompatible,
    missing_debug_implementations,
    nonstandard_style,
    missing_docs,
    unreachable_pub,
    unused_qualifications
)]

/// A Result with the error type of this crate and default return type of ()
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

mod config;
mod error;
mod memory_store;
#[cfg(feature = "redis")]
mod redis_store;
mod session;
mod session_manager;
pub mod store;

pub use config::SessionConfig;
pub use error::Error;
pub use memory_store::{MemoryStore, MemoryStoreClient, Operation};
#[cfg(feature = "redis")]
pub use redis_store::{RedisConnection, RedisStore};
pub use session::{
    Session, SessionCookie, SessionId, MAX_SESSION_ID_LENGTH, SESSION_ID_LENGTH,
};
pub use session_manager::cookie_generator::{
    DebugSessionCookieGenerator, DefaultSessionCookieGenerator, SessionCookieGenerator,
};
pub use session_manager::SessionManager;
pub use store::{StoreBackend, StoreClient, StoreCommand};
