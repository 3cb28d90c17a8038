use crate::store::{StoreBackend, StoreClient};
use crate::{Error, SessionConfig};
use r2d2::{CustomizeConnection, Pool, PooledConnection};
use redis::{Client, Connection, RedisError, RedisResult};
use std::fmt::{Debug, Formatter};
use std::time::Duration;

/// A session store backed by a redis server.
///
/// Holds a pool of connections; one connection is checked out per request.
/// Cloning is cheap, all clones share the pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool<Client>,
}

impl RedisStore {
    /// Connect to the redis server at `config.address`.
    ///
    /// Every pooled connection selects `config.database` once when it is opened,
    /// and fails operations that take longer than `config.io_timeout()`.
    /// Fails if the address is invalid, or if no connection can be established within the timeout.
    pub fn connect(config: &SessionConfig) -> Result<Self, Error> {
        let connection_error = |source: anyhow::Error| Error::Connection {
            address: config.address.clone(),
            source,
        };

        let client = Client::open(config.address.as_str())
            .map_err(|error| connection_error(error.into()))?;
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(config.io_timeout())
            .connection_customizer(Box::new(ConnectionSetup {
                database: config.database,
                io_timeout: config.io_timeout(),
            }))
            .build(client)
            .map_err(|error| connection_error(error.into()))?;

        log::debug!(
            "Connected to session store at {} (database {})",
            config.address,
            config.database
        );
        Ok(Self { pool })
    }

    /// Use an existing connection pool.
    /// Selecting the database and setting timeouts is up to the pool.
    pub fn from_pool(pool: Pool<Client>) -> Self {
        Self { pool }
    }
}

impl StoreBackend for RedisStore {
    type Client = RedisConnection;

    fn checkout(&self) -> anyhow::Result<RedisConnection> {
        Ok(RedisConnection(self.pool.get()?))
    }
}

impl Debug for RedisStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("state", &self.pool.state())
            .finish()
    }
}

/// Prepares fresh pool connections.
#[derive(Debug, Clone, Copy)]
struct ConnectionSetup {
    database: i64,
    io_timeout: Duration,
}

impl CustomizeConnection<Connection, RedisError> for ConnectionSetup {
    fn on_acquire(&self, connection: &mut Connection) -> Result<(), RedisError> {
        connection.set_read_timeout(Some(self.io_timeout))?;
        connection.set_write_timeout(Some(self.io_timeout))?;
        if self.database != 0 {
            select(connection, self.database)?;
        }
        Ok(())
    }
}

fn select(connection: &mut Connection, database: i64) -> RedisResult<()> {
    redis::cmd("SELECT").arg(database).query(connection)
}

/// A redis connection checked out of the pool of a [RedisStore].
/// It is returned to the pool on drop.
pub struct RedisConnection(PooledConnection<Client>);

impl StoreClient for RedisConnection {
    fn hash_set(&mut self, key: &str, field: &str, value: &str) -> anyhow::Result<()> {
        redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query::<()>(&mut *self.0)?;
        Ok(())
    }

    fn hash_set_with_expiry(
        &mut self,
        key: &str,
        field: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> anyhow::Result<()> {
        // MULTI/EXEC, so the hash never exists without expiry.
        redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds)
            .ignore()
            .query::<()>(&mut *self.0)?;
        Ok(())
    }

    fn hash_delete(&mut self, key: &str, field: &str) -> anyhow::Result<()> {
        redis::cmd("HDEL")
            .arg(key)
            .arg(field)
            .query::<()>(&mut *self.0)?;
        Ok(())
    }

    fn hash_get_all(&mut self, key: &str) -> anyhow::Result<Vec<String>> {
        // Read the reply as a flat list to keep the wire order of fields and values.
        Ok(redis::cmd("HGETALL").arg(key).query(&mut *self.0)?)
    }

    fn delete(&mut self, key: &str) -> anyhow::Result<()> {
        redis::cmd("DEL").arg(key).query::<()>(&mut *self.0)?;
        Ok(())
    }

    fn expire(&mut self, key: &str, ttl_seconds: u64) -> anyhow::Result<()> {
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds)
            .query::<()>(&mut *self.0)?;
        Ok(())
    }

    fn select_database(&mut self, index: i64) -> anyhow::Result<()> {
        select(&mut self.0, index)?;
        Ok(())
    }
}

impl Debug for RedisConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("RedisConnection")
    }
}
