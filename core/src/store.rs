//! Key-value persistence for learned state.
//!
//! Two backends behind one enum:
//! - `InMemory`: thread-safe map, used by tests and ephemeral sessions
//! - `Redb`: a single `&str -> &[u8]` table in a redb database file
//!
//! Values are opaque bytes; each component chooses its own encoding (bincode
//! for tables, JSON for lists). See `keys` for the names in use.
use crate::{Error, Result};
use redb::{ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Keys written by `PredictionFusion::save_state`.
pub mod keys {
    /// bincode n-gram tables
    pub const NGRAM: &str = "ngram";
    /// bincode history ring and frequency table
    pub const HISTORY: &str = "history";
    /// JSON list of custom templates
    pub const CUSTOM_TEMPLATES: &str = "templates.custom";
    /// JSON list of user-added vocabulary
    pub const VOCABULARY: &str = "vocabulary";
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut map = self.inner.write().map_err(|_| Error::Poisoned("state store"))?;
        map.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.inner.read().map_err(|_| Error::Poisoned("state store"))?;
        Ok(map.get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut map = self.inner.write().map_err(|_| Error::Poisoned("state store"))?;
        Ok(map.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let map = self.inner.read().map_err(|_| Error::Poisoned("state store"))?;
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// redb-backed store. Every `put`/`remove` is its own write transaction.
pub struct RedbStore {
    db: redb::Database,
    path: PathBuf,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").field("path", &self.path).finish()
    }
}

impl RedbStore {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = TableDefinition::new("state");

    /// Create or open a database at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = redb::Database::create(path.as_ref())?;
        Ok(Self {
            db,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(Self::TABLE)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(Self::TABLE) {
            Ok(table) => table,
            // nothing written yet
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(Self::TABLE)?;
            let existed = table.remove(key)?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(Self::TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for item in table.iter()? {
            let (k, _) = item?;
            out.push(k.value().to_string());
        }
        Ok(out)
    }
}

/// Backend switch used by the engine and tools.
#[derive(Debug)]
pub enum StateStore {
    InMemory(InMemoryStore),
    Redb(RedbStore),
}

impl Default for StateStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl StateStore {
    pub fn in_memory() -> Self {
        StateStore::InMemory(InMemoryStore::new())
    }

    pub fn open_redb<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(StateStore::Redb(RedbStore::open(path)?))
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        match self {
            StateStore::InMemory(m) => m.put(key, value),
            StateStore::Redb(r) => r.put(key, value),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self {
            StateStore::InMemory(m) => m.get(key),
            StateStore::Redb(r) => r.get(key),
        }
    }

    /// Returns true if the key existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        match self {
            StateStore::InMemory(m) => m.remove(key),
            StateStore::Redb(r) => r.remove(key),
        }
    }

    /// All stored keys in ascending order.
    pub fn keys(&self) -> Result<Vec<String>> {
        match self {
            StateStore::InMemory(m) => m.keys(),
            StateStore::Redb(r) => r.keys(),
        }
    }
}
