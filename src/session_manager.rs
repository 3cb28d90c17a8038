use crate::session::{SessionCookie, SessionId};
use crate::store::{StoreBackend, StoreClient, StoreCommand};
use crate::{Error, Result, Session, SessionConfig};
use chrono::Utc;
use cookie::Cookie;
use cookie_generator::{DefaultSessionCookieGenerator, SessionCookieGenerator};
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use std::collections::HashMap;

pub(crate) mod cookie_generator;

/// A session manager.
///
/// This is the user-facing interface of the crate.
/// It binds a session namespace, i.e. the cookie name, to a store backend,
/// and turns the cookies of a request into a [`Session`].
///
/// The manager is shared between all requests. Each loaded session checks out its own store client.
#[derive(Debug, Clone)]
pub struct SessionManager<Store, CookieGenerator = DefaultSessionCookieGenerator> {
    store: Store,
    config: SessionConfig,
    cookie_generator: CookieGenerator,
}

#[cfg(feature = "redis")]
impl SessionManager<crate::RedisStore> {
    /// Connect to the redis server configured in `config`.
    ///
    /// Fails with [`Error::Connection`] if the server cannot be reached or the database cannot be selected.
    pub fn connect(config: SessionConfig) -> Result<Self> {
        let store = crate::RedisStore::connect(&config)?;
        Ok(Self::new(store, config))
    }
}

impl<Store: StoreBackend> SessionManager<Store> {
    /// Create a new session manager with the given store backend.
    pub fn new(store: Store, config: SessionConfig) -> Self {
        Self::new_with_cookie_generator(store, config, DefaultSessionCookieGenerator)
    }
}

impl<Store: StoreBackend, CookieGenerator: SessionCookieGenerator>
    SessionManager<Store, CookieGenerator>
{
    /// Create a new session manager with the given store backend and cookie generator.
    ///
    /// The cookie generator must produce unpredictable cookies, see [`DefaultSessionCookieGenerator`].
    pub fn new_with_cookie_generator(
        store: Store,
        config: SessionConfig,
        cookie_generator: CookieGenerator,
    ) -> Self {
        Self {
            store,
            config,
            cookie_generator,
        }
    }

    /// The configuration of this manager.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The store backend of this manager.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Get the session of a request, creating one if the request carries no valid session cookie.
    ///
    /// `request` are the headers of the request, which are searched for the session cookie.
    /// Returns the session and the value of the `Set-Cookie` header to attach to the response.
    ///
    /// If the cookie names a session whose hash is gone from the store, because it expired or was destroyed,
    /// a new session with a new id is returned.
    /// New sessions are not written to the store until a value is set.
    ///
    /// Fails with [`Error::CorruptSessionData`] if the stored hash is malformed.
    /// The hash is then deleted, and the caller may proceed with [`create_session`](Self::create_session).
    pub fn load_or_create(
        &self,
        request: &HeaderMap,
    ) -> Result<(Session<Store::Client>, HeaderValue)> {
        let Some(id) = self.find_session_id(request) else {
            return self.create_session();
        };

        let mut client = self.checkout()?;
        let key = self.config.store_key(id.as_str());
        let fields = client
            .hash_get_all(&key)
            .map_err(Error::store_operation(StoreCommand::HashGetAll, &key))?;

        if fields.is_empty() {
            log::debug!(
                "Session of {} expired or does not exist, creating a new one",
                self.config.cookie_name
            );
            return self.new_session(client);
        }

        let values = match pair_up(fields) {
            Ok(values) => values,
            Err(len) => {
                log::warn!("Discarding corrupt session data under {key}: {len} elements");
                if let Err(error) = client.delete(&key) {
                    log::warn!("Could not delete corrupt session data under {key}: {error}");
                }
                return Err(Error::CorruptSessionData { key, len });
            }
        };

        client
            .expire(&key, self.config.ttl_seconds)
            .map_err(Error::store_operation(StoreCommand::Expire, &key))?;

        log::debug!(
            "Loaded session of {} with {} fields",
            self.config.cookie_name,
            values.len()
        );
        let cookie = SessionCookie::new(&self.config, &id, Utc::now());
        let header = cookie.to_header_value()?;
        Ok((
            Session::new(&self.config, cookie, values, false, client),
            header,
        ))
    }

    /// Like [`load_or_create`](Self::load_or_create), but appends the `Set-Cookie` header to `response`.
    pub fn session(
        &self,
        request: &HeaderMap,
        response: &mut HeaderMap,
    ) -> Result<Session<Store::Client>> {
        let (session, header) = self.load_or_create(request)?;
        response.append(SET_COOKIE, header);
        Ok(session)
    }

    /// Create a new empty session with a new id, ignoring any cookie of the request.
    ///
    /// Returns the session and the value of the `Set-Cookie` header to attach to the response.
    pub fn create_session(&self) -> Result<(Session<Store::Client>, HeaderValue)> {
        let client = self.checkout()?;
        self.new_session(client)
    }

    fn new_session(
        &self,
        client: Store::Client,
    ) -> Result<(Session<Store::Client>, HeaderValue)> {
        let id = self.generate_session_id()?;
        log::debug!("Created new session of {}", self.config.cookie_name);
        let cookie = SessionCookie::new(&self.config, &id, Utc::now());
        let header = cookie.to_header_value()?;
        Ok((
            Session::new(&self.config, cookie, HashMap::new(), true, client),
            header,
        ))
    }

    fn generate_session_id(&self) -> Result<SessionId> {
        let cookie_value = self.cookie_generator.generate_cookie();
        SessionId::parse(&cookie_value).ok_or(Error::InvalidSessionId {
            len: cookie_value.len(),
        })
    }

    fn checkout(&self) -> Result<Store::Client> {
        self.store
            .checkout()
            .map_err(|source| Error::Checkout { source })
    }

    /// Returns the id in the session cookie of the request, if there is one and it is well-formed.
    fn find_session_id(&self, request: &HeaderMap) -> Option<SessionId> {
        let id = request
            .get_all(COOKIE)
            .iter()
            .filter_map(|header| header.to_str().ok())
            .flat_map(|header| Cookie::split_parse(header))
            .filter_map(|cookie| cookie.ok())
            .find(|cookie| cookie.name() == self.config.cookie_name)
            .and_then(|cookie| SessionId::parse(cookie.value_trimmed()));
        if id.is_none() {
            log::trace!("No valid cookie {} in request", self.config.cookie_name);
        }
        id
    }
}

/// Pair up a flat sequence of alternating fields and values.
/// Returns the length of the sequence if it is odd.
fn pair_up(fields: Vec<String>) -> std::result::Result<HashMap<String, String>, usize> {
    if fields.len() % 2 != 0 {
        return Err(fields.len());
    }

    let mut values = HashMap::with_capacity(fields.len() / 2);
    let mut fields = fields.into_iter();
    while let (Some(field), Some(value)) = (fields.next(), fields.next()) {
        values.insert(field, value);
    }
    Ok(values)
}
