use crate::store::{StoreBackend, StoreClient, StoreCommand};
use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// # in-memory session store
/// A hash store held in process memory, implementing the same commands as the remote store.
/// Because there is no external persistence, this store is ephemeral and will be cleared
/// on server restart.
///
/// Clones share the same data, so one store can back a manager while a test inspects it.
///
/// # ***READ THIS BEFORE USING IN A PRODUCTION DEPLOYMENT***
///
/// Storing sessions only in memory brings the following problems:
///
/// 1. All sessions must fit in available memory (important for high load services)
/// 2. Expired hashes are only evicted when they are accessed or when [MemoryStore::cleanup] runs.
///    If cleanup is never run, it might result in OOM
/// 3. All sessions will be lost on shutdown
/// 4. If the service is clustered particular session will be stored only on a single instance.
///
/// For tests, [MemoryStore::new_with_logger] records every command that reaches the store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
    database: i64,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    databases: HashMap<i64, HashMap<String, StoredHash>>,
    logger: Option<Vec<Operation>>,
    unavailable: bool,
    failing: HashSet<StoreCommand>,
}

#[derive(Debug, Default)]
struct StoredHash {
    fields: BTreeMap<String, String>,
    expiry: Option<DateTime<Utc>>,
}

/// A command that reached a [MemoryStore] created with [MemoryStore::new_with_logger].
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Operation {
    /// `HSET key field value`
    HashSet {
        /// The key of the hash.
        key: String,
        /// The field that was set.
        field: String,
        /// The new value.
        value: String,
    },
    /// `HDEL key field`
    HashDelete {
        /// The key of the hash.
        key: String,
        /// The field that was removed.
        field: String,
    },
    /// `HGETALL key`
    HashGetAll {
        /// The key of the hash.
        key: String,
    },
    /// `DEL key`
    Delete {
        /// The deleted key.
        key: String,
    },
    /// `EXPIRE key ttl_seconds`
    Expire {
        /// The key of the hash.
        key: String,
        /// The new time to live.
        ttl_seconds: u64,
    },
    /// `SELECT index`
    SelectDatabase {
        /// The selected database.
        index: i64,
    },
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Default::default()
    }

    /// Create a new empty memory store that records all commands it receives.
    pub fn new_with_logger() -> Self {
        let store = Self::new();
        store.lock().logger = Some(Vec::new());
        store
    }

    /// Hand out clients that select the database with the given index on checkout.
    pub fn with_database(mut self, index: i64) -> Self {
        self.database = index;
        self
    }

    /// Returns the commands recorded so far.
    /// Empty if this store was not created with [MemoryStore::new_with_logger].
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().logger.clone().unwrap_or_default()
    }

    /// Forget the commands recorded so far.
    pub fn clear_operations(&self) {
        if let Some(logger) = self.lock().logger.as_mut() {
            logger.clear();
        }
    }

    /// While unavailable, every command fails as if the store could not be reached.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// While failing, every invocation of `command` fails without changing any data.
    /// Commands that are applied together with `command` fail as well.
    pub fn set_failing(&self, command: StoreCommand, failing: bool) {
        let mut inner = self.lock();
        if failing {
            inner.failing.insert(command);
        } else {
            inner.failing.remove(&command);
        }
    }

    /// Returns the fields of the hash at `key` in the database of this store, if it exists and is not expired.
    pub fn hash(&self, key: &str) -> Option<BTreeMap<String, String>> {
        let now = Utc::now();
        self.lock()
            .databases
            .get(&self.database)
            .and_then(|database| database.get(key))
            .filter(|hash| !hash.is_expired(now))
            .map(|hash| hash.fields.clone())
    }

    /// Returns the time at which the hash at `key` expires, if it exists and has an expiry.
    pub fn expiry(&self, key: &str) -> Option<DateTime<Utc>> {
        self.lock()
            .databases
            .get(&self.database)
            .and_then(|database| database.get(key))
            .and_then(|hash| hash.expiry)
    }

    /// Returns the number of hashes in all databases, including expired ones that were not evicted yet.
    pub fn len(&self) -> usize {
        self.lock().databases.values().map(HashMap::len).sum()
    }

    /// Returns true if the memory store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Performs cleanup of expired hashes. This should be run on an
    /// intermittent basis if this store is run for long enough that
    /// memory accumulation is a concern.
    pub fn cleanup(&self) {
        log::trace!("Cleaning up memory store...");
        let now = Utc::now();
        let mut inner = self.lock();
        let initial_len: usize = inner.databases.values().map(HashMap::len).sum();
        for database in inner.databases.values_mut() {
            database.retain(|_, hash| !hash.is_expired(now));
        }
        let len: usize = inner.databases.values().map(HashMap::len).sum();
        log::trace!("Deleted {} expired hashes", initial_len - len);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        // A panic while holding the lock cannot leave the maps in a torn state.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StoreBackend for MemoryStore {
    type Client = MemoryStoreClient;

    fn checkout(&self) -> Result<MemoryStoreClient> {
        if self.lock().unavailable {
            bail!("memory store is unavailable");
        }
        let mut client = MemoryStoreClient {
            store: self.clone(),
            database: 0,
        };
        if self.database != 0 {
            client.select_database(self.database)?;
        }
        Ok(client)
    }
}

/// A client of a [MemoryStore], bound to one of its databases.
#[derive(Debug, Clone)]
pub struct MemoryStoreClient {
    store: MemoryStore,
    database: i64,
}

impl MemoryStoreClient {
    /// Run `command` on the current database, after recording `operation` and evicting the hash at `key` if it is expired.
    fn run<T>(
        &mut self,
        operation: Operation,
        key: &str,
        command: impl FnOnce(&mut HashMap<String, StoredHash>) -> T,
    ) -> Result<T> {
        self.run_all(vec![operation], key, command)
    }

    /// Like [run](Self::run), but `command` carries out all of `operations` under one lock.
    /// If any of them fails, none is applied.
    fn run_all<T>(
        &mut self,
        operations: Vec<Operation>,
        key: &str,
        command: impl FnOnce(&mut HashMap<String, StoredHash>) -> T,
    ) -> Result<T> {
        let mut inner = self.store.lock();
        let failed = operations
            .iter()
            .map(Operation::command)
            .find(|command| inner.failing.contains(command));
        if let Some(logger) = inner.logger.as_mut() {
            logger.extend(operations);
        }
        if inner.unavailable {
            bail!("memory store is unavailable");
        }
        if let Some(command) = failed {
            bail!("memory store failed to run {}", command);
        }

        let database = inner.databases.entry(self.database).or_default();
        if database
            .get(key)
            .map_or(false, |hash| hash.is_expired(Utc::now()))
        {
            database.remove(key);
        }
        Ok(command(database))
    }
}

impl StoreClient for MemoryStoreClient {
    fn hash_set(&mut self, key: &str, field: &str, value: &str) -> Result<()> {
        let operation = Operation::HashSet {
            key: key.to_owned(),
            field: field.to_owned(),
            value: value.to_owned(),
        };
        self.run(operation, key, |database| {
            database
                .entry(key.to_owned())
                .or_default()
                .fields
                .insert(field.to_owned(), value.to_owned());
        })
    }

    fn hash_set_with_expiry(
        &mut self,
        key: &str,
        field: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<()> {
        let operations = vec![
            Operation::HashSet {
                key: key.to_owned(),
                field: field.to_owned(),
                value: value.to_owned(),
            },
            Operation::Expire {
                key: key.to_owned(),
                ttl_seconds,
            },
        ];
        let expiry = expiry_after(ttl_seconds);
        self.run_all(operations, key, |database| {
            let hash = database.entry(key.to_owned()).or_default();
            hash.fields.insert(field.to_owned(), value.to_owned());
            hash.expiry = expiry;
        })
    }

    fn hash_delete(&mut self, key: &str, field: &str) -> Result<()> {
        let operation = Operation::HashDelete {
            key: key.to_owned(),
            field: field.to_owned(),
        };
        self.run(operation, key, |database| {
            if let Some(hash) = database.get_mut(key) {
                hash.fields.remove(field);
                // Like in redis, a hash without fields does not exist.
                if hash.fields.is_empty() {
                    database.remove(key);
                }
            }
        })
    }

    fn hash_get_all(&mut self, key: &str) -> Result<Vec<String>> {
        let operation = Operation::HashGetAll {
            key: key.to_owned(),
        };
        self.run(operation, key, |database| {
            database
                .get(key)
                .map(|hash| {
                    hash.fields
                        .iter()
                        .flat_map(|(field, value)| [field.clone(), value.clone()])
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let operation = Operation::Delete {
            key: key.to_owned(),
        };
        self.run(operation, key, |database| {
            database.remove(key);
        })
    }

    fn expire(&mut self, key: &str, ttl_seconds: u64) -> Result<()> {
        let operation = Operation::Expire {
            key: key.to_owned(),
            ttl_seconds,
        };
        let expiry = expiry_after(ttl_seconds);
        self.run(operation, key, |database| {
            // Expiring a missing key is a no-op.
            if let Some(hash) = database.get_mut(key) {
                hash.expiry = expiry;
            }
        })
    }

    fn select_database(&mut self, index: i64) -> Result<()> {
        let mut inner = self.store.lock();
        if let Some(logger) = inner.logger.as_mut() {
            logger.push(Operation::SelectDatabase { index });
        }
        if inner.unavailable {
            bail!("memory store is unavailable");
        }
        if inner.failing.contains(&StoreCommand::SelectDatabase) {
            bail!("memory store failed to run {}", StoreCommand::SelectDatabase);
        }
        self.database = index;
        Ok(())
    }
}

impl Operation {
    /// The store command this operation was recorded for.
    pub fn command(&self) -> StoreCommand {
        match self {
            Self::HashSet { .. } => StoreCommand::HashSet,
            Self::HashDelete { .. } => StoreCommand::HashDelete,
            Self::HashGetAll { .. } => StoreCommand::HashGetAll,
            Self::Delete { .. } => StoreCommand::Delete,
            Self::Expire { .. } => StoreCommand::Expire,
            Self::SelectDatabase { .. } => StoreCommand::SelectDatabase,
        }
    }
}

/// The point in time `ttl_seconds` from now, if it can be represented.
fn expiry_after(ttl_seconds: u64) -> Option<DateTime<Utc>> {
    let ttl = Duration::seconds(
        i64::try_from(ttl_seconds)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000),
    );
    Utc::now().checked_add_signed(ttl)
}

impl StoredHash {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.map_or(false, |expiry| expiry <= now)
    }
}
