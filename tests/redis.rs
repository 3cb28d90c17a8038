//! Tests against a running redis server.
//!
//! They are ignored by default. Run them with `cargo test -- --ignored`,
//! optionally pointing `REDIS_URL` at a server other than `redis://127.0.0.1:6379`.
#![cfg(feature = "redis")]

use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use redis_session::{RedisStore, SessionConfig, SessionManager, StoreBackend, StoreClient};

fn config() -> SessionConfig {
    let address =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_owned());
    SessionConfig::new()
        .with_address(address)
        .with_key_prefix("redis_session_test:")
        .with_ttl_seconds(60)
}

fn request_with(set_cookie: &HeaderValue) -> HeaderMap {
    let pair = set_cookie.to_str().unwrap().split(';').next().unwrap();
    let mut request = HeaderMap::new();
    request.insert(COOKIE, HeaderValue::from_str(pair).unwrap());
    request
}

#[test]
#[ignore = "needs a redis server"]
fn test_session_lifecycle() {
    let manager = SessionManager::connect(config()).unwrap();

    let (mut session, set_cookie) = manager.load_or_create(&HeaderMap::new()).unwrap();
    assert!(session.is_new());
    session.set("theme", "dark").unwrap();
    session.set("lang", "en").unwrap();
    session.remove("lang").unwrap();
    drop(session);

    let request = request_with(&set_cookie);
    let (session, _) = manager.load_or_create(&request).unwrap();
    assert!(!session.is_new());
    assert_eq!(session.get("theme"), "dark");
    assert_eq!(session.get("lang"), "");

    let mut response = HeaderMap::new();
    session.destroy(&mut response).unwrap();
    assert!(response[SET_COOKIE]
        .to_str()
        .unwrap()
        .contains("Max-Age=0"));

    let (session, _) = manager.load_or_create(&request).unwrap();
    assert!(session.is_new());
    assert!(session.is_empty());
}

#[test]
#[ignore = "needs a redis server"]
fn test_hash_commands_and_databases() {
    let store = RedisStore::connect(&config().with_database(1)).unwrap();
    let key = "redis_session_test:databases";

    let mut client = store.checkout().unwrap();
    client.delete(key).unwrap();
    client.hash_set_with_expiry(key, "theme", "dark", 60).unwrap();
    client.hash_set(key, "lang", "en").unwrap();
    client.hash_delete(key, "lang").unwrap();
    assert_eq!(client.hash_get_all(key).unwrap(), ["theme", "dark"]);

    client.select_database(0).unwrap();
    assert!(client.hash_get_all(key).unwrap().is_empty());

    client.select_database(1).unwrap();
    client.expire(key, 60).unwrap();
    client.delete(key).unwrap();
    assert!(client.hash_get_all(key).unwrap().is_empty());
}

#[test]
#[ignore = "needs a redis server"]
fn test_unreachable_server() {
    let mut config = config().with_address("redis://127.0.0.1:1");
    config.io_timeout_ms = 200;
    let error = RedisStore::connect(&config).unwrap_err();
    assert!(error.is_store_error());
}
