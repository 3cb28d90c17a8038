use crate::store::{StoreClient, StoreCommand};
use crate::{Error, Result, SessionConfig};
use chrono::{DateTime, Duration, Utc};
use cookie::time::OffsetDateTime;
use cookie::Cookie;
use http::header::SET_COOKIE;
use http::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

/// The number of characters of a session id.
pub const SESSION_ID_LENGTH: usize = 40;

/// Browsers cap the lifetime of cookies at 400 days.
const MAX_COOKIE_AGE_SECONDS: i64 = 400 * 24 * 60 * 60;

/// Session ids presented by clients are rejected beyond this length.
pub const MAX_SESSION_ID_LENGTH: usize = 128;

/// A session id, as sent by the client in the session cookie.
///
/// Generated ids consist of exactly [`SESSION_ID_LENGTH`] alphanumeric ASCII characters.
/// Ids presented by clients are accepted if they are printable ASCII of at most [`MAX_SESSION_ID_LENGTH`] characters,
/// as they only name a session if the store holds a hash for them.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Parse a cookie value into a session id.
    /// Returns `None` if the value is empty, too long or not printable ASCII.
    pub fn parse(cookie_value: &str) -> Option<Self> {
        (!cookie_value.is_empty()
            && cookie_value.len() <= MAX_SESSION_ID_LENGTH
            && cookie_value.bytes().all(|byte| byte.is_ascii_graphic()))
        .then(|| Self(cookie_value.to_owned()))
    }

    /// Returns the id as it appears in the cookie.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // The id is a credential, keep it out of logs.
        let prefix = self.0.get(..4).unwrap_or_default();
        write!(f, "SessionId({prefix}..)")
    }
}

/// The session cookie as it is sent to the client.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SessionCookie {
    name: Cow<'static, str>,
    value: String,
    path: Cow<'static, str>,
    max_age: i64,
    expires: DateTime<Utc>,
    http_only: bool,
}

impl SessionCookie {
    pub(crate) fn new(config: &SessionConfig, id: &SessionId, now: DateTime<Utc>) -> Self {
        let mut cookie = Self {
            name: config.cookie_name.clone(),
            value: id.as_str().to_owned(),
            path: config.cookie_path.clone(),
            max_age: 0,
            expires: now,
            http_only: config.cookie_http_only,
        };
        cookie.refresh(config.ttl_seconds, now);
        cookie
    }

    /// Let the cookie expire `ttl_seconds` after `now`.
    pub(crate) fn refresh(&mut self, ttl_seconds: u64, now: DateTime<Utc>) {
        self.max_age = i64::try_from(ttl_seconds)
            .unwrap_or(i64::MAX)
            .min(MAX_COOKIE_AGE_SECONDS);
        self.expires = now + Duration::seconds(self.max_age);
    }

    /// Turn this cookie into one that makes the client delete it.
    pub(crate) fn expire(&mut self) {
        self.value.clear();
        self.max_age = 0;
        self.expires = DateTime::<Utc>::UNIX_EPOCH;
    }

    /// The name of the cookie.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value of the cookie, i.e. the session id. Empty if the session was destroyed.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The path of the cookie.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The lifetime of the cookie, in seconds.
    pub fn max_age(&self) -> i64 {
        self.max_age
    }

    /// The absolute expiry of the cookie.
    pub fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    /// Returns true if the cookie is hidden from scripts.
    pub fn http_only(&self) -> bool {
        self.http_only
    }

    /// Render the cookie as the value of a `Set-Cookie` header.
    pub fn to_header_value(&self) -> Result<HeaderValue> {
        let expires = OffsetDateTime::from_unix_timestamp(self.expires.timestamp())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let cookie = Cookie::build((self.name.clone(), self.value.clone()))
            .path(self.path.clone())
            .max_age(cookie::time::Duration::seconds(self.max_age))
            .expires(expires)
            .http_only(self.http_only)
            .build();
        Ok(HeaderValue::from_str(&cookie.to_string())?)
    }
}

/// A session with a client, alive while one request is handled.
///
/// The session mirrors the stored hash of its id.
/// Every mutation is written through to the store immediately and slides the expiry of the stored hash.
/// The session owns the store client it was loaded with, which is returned to the backend on drop.
///
/// Sessions are obtained from [`SessionManager::load_or_create`](crate::SessionManager::load_or_create).
#[must_use]
pub struct Session<Client> {
    name: Cow<'static, str>,
    cookie: SessionCookie,
    values: HashMap<String, String>,
    key: String,
    ttl_seconds: u64,
    is_new: bool,
    client: Client,
}

impl<Client: StoreClient> Session<Client> {
    pub(crate) fn new(
        config: &SessionConfig,
        cookie: SessionCookie,
        values: HashMap<String, String>,
        is_new: bool,
        client: Client,
    ) -> Self {
        Self {
            name: config.cookie_name.clone(),
            key: config.store_key(cookie.value()),
            ttl_seconds: config.ttl_seconds,
            cookie,
            values,
            is_new,
            client,
        }
    }

    /// The id of this session.
    pub fn id(&self) -> &str {
        self.cookie.value()
    }

    /// The name of this session, which is the name of its cookie.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cookie of this session.
    pub fn cookie(&self) -> &SessionCookie {
        &self.cookie
    }

    /// Returns true if the id of this session was generated while handling the current request.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Returns the value of `field`, or the empty string if it is not set.
    ///
    /// This does not access the store, and does not refresh the expiry of the session.
    pub fn get(&self, field: &str) -> &str {
        self.get_opt(field).unwrap_or_default()
    }

    /// Returns the value of `field`, or `None` if it is not set.
    pub fn get_opt(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    /// Returns the value of `field` decoded from JSON, or `None` if it is not set.
    pub fn get_json<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>> {
        self.get_opt(field)
            .map(|value| {
                serde_json::from_str(value).map_err(|source| Error::InvalidValue {
                    field: field.to_owned(),
                    source,
                })
            })
            .transpose()
    }

    /// Returns true if `field` is set.
    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    /// Iterate over all fields and their values, in no particular order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(field, value)| (field.as_str(), value.as_str()))
    }

    /// The number of fields that are set.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Set `field` to the string form of `value` and persist it.
    ///
    /// The value is updated in memory before it is written to the store.
    /// The write and the new expiry of the stored hash are applied together.
    /// If the store fails, the in-memory value stays and the error is returned.
    pub fn set(&mut self, field: impl Into<String>, value: impl ToString) -> Result {
        let field = field.into();
        let value = value.to_string();
        self.values.insert(field.clone(), value.clone());
        self.client
            .hash_set_with_expiry(&self.key, &field, &value, self.ttl_seconds)
            .map_err(Error::store_operation(StoreCommand::HashSet, &self.key))?;
        self.cookie.refresh(self.ttl_seconds, Utc::now());
        Ok(())
    }

    /// Set `field` to the JSON encoding of `value` and persist it.
    pub fn set_json<T: Serialize + ?Sized>(
        &mut self,
        field: impl Into<String>,
        value: &T,
    ) -> Result {
        let field = field.into();
        let value = serde_json::to_string(value).map_err(|source| Error::InvalidValue {
            field: field.clone(),
            source,
        })?;
        self.set(field, value)
    }

    /// Remove `field` and persist the removal. Returns the removed value.
    pub fn remove(&mut self, field: &str) -> Result<Option<String>> {
        let removed = self.values.remove(field);
        self.client
            .hash_delete(&self.key, field)
            .map_err(Error::store_operation(StoreCommand::HashDelete, &self.key))?;
        self.touch()?;
        Ok(removed)
    }

    /// Slide the expiry of this session without changing its values.
    ///
    /// This is done automatically by [`set`](Self::set) and [`remove`](Self::remove).
    pub fn touch(&mut self) -> Result {
        self.client
            .expire(&self.key, self.ttl_seconds)
            .map_err(Error::store_operation(StoreCommand::Expire, &self.key))?;
        self.cookie.refresh(self.ttl_seconds, Utc::now());
        Ok(())
    }

    /// The value of the `Set-Cookie` header that keeps this session alive on the client.
    pub fn set_cookie_header(&self) -> Result<HeaderValue> {
        self.cookie.to_header_value()
    }

    /// Destroy this session.
    ///
    /// The values are cleared, an expired cookie is appended to `response`, and the stored hash is deleted.
    /// The cookie is appended even if deleting the hash fails.
    pub fn destroy(mut self, response: &mut HeaderMap) -> Result {
        log::debug!("Destroying session of {}", self.name);
        self.values.clear();
        self.cookie.expire();
        response.append(SET_COOKIE, self.cookie.to_header_value()?);
        self.client
            .delete(&self.key)
            .map_err(Error::store_operation(StoreCommand::Delete, &self.key))
    }
}

impl<Client> Debug for Session<Client> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("is_new", &self.is_new)
            .field("fields", &self.values.keys().collect::<Vec<_>>())
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_session_id() {
        let valid = "a".repeat(SESSION_ID_LENGTH);
        assert_eq!(SessionId::parse(&valid).unwrap().as_str(), valid);
        assert_eq!(SessionId::parse("sess_abc").unwrap().as_str(), "sess_abc");
        assert!(SessionId::parse("").is_none());
        assert!(SessionId::parse("a b").is_none());
        assert!(SessionId::parse(&"a".repeat(MAX_SESSION_ID_LENGTH + 1)).is_none());
        assert_eq!(
            format!("{:?}", SessionId::parse(&valid).unwrap()),
            "SessionId(aaaa..)"
        );
    }

    #[test]
    fn cookie_header_carries_expiry() {
        let config = SessionConfig::new().with_cookie_name("sid");
        let id = SessionId::parse(&"x".repeat(SESSION_ID_LENGTH)).unwrap();
        let now = Utc.with_ymd_and_hms(2022, 10, 1, 12, 0, 0).unwrap();
        let cookie = SessionCookie::new(&config, &id, now);
        assert_eq!(cookie.max_age(), 1800);
        assert_eq!(
            cookie.expires(),
            Utc.with_ymd_and_hms(2022, 10, 1, 12, 30, 0).unwrap()
        );

        let header = cookie.to_header_value().unwrap();
        let header = header.to_str().unwrap();
        assert!(header.starts_with(&format!("sid={}", id.as_str())));
        assert!(header.contains("Path=/"));
        assert!(header.contains("Max-Age=1800"));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("Expires=Sat, 01 Oct 2022 12:30:00 GMT"));
    }

    #[test]
    fn expired_cookie_is_empty_and_in_the_past() {
        let config = SessionConfig::new();
        let id = SessionId::parse(&"x".repeat(SESSION_ID_LENGTH)).unwrap();
        let mut cookie = SessionCookie::new(&config, &id, Utc::now());
        cookie.expire();
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), 0);
        assert!(cookie.expires() < Utc::now());

        let header = cookie.to_header_value().unwrap();
        let header = header.to_str().unwrap();
        assert!(header.starts_with("session_id=;"));
        assert!(header.contains("Max-Age=0"));
        assert!(header.contains("Expires=Thu, 01 Jan 1970 00:00:00 GMT"));
    }

    #[test]
    fn huge_ttl_is_capped() {
        let config = SessionConfig::new().with_ttl_seconds(u64::MAX);
        let id = SessionId::parse(&"x".repeat(SESSION_ID_LENGTH)).unwrap();
        let cookie = SessionCookie::new(&config, &id, Utc::now());
        assert_eq!(cookie.max_age(), MAX_COOKIE_AGE_SECONDS);
    }
}
