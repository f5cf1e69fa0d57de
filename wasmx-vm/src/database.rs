//! Key-value databases opened by privileged contracts.
//!
//! A contract opens a named connection through the `kvdb` host namespace.
//! Writes go to a savepoint stack kept per connection: the first access
//! opens `sp0` over the database, every nested call pushes a savepoint on
//! the connections already in use, and the savepoint is committed or
//! dropped with the call's outcome. `sp0` reaches the database only when
//! the transaction succeeds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use wasmx_storage::branch::BranchStore;
use wasmx_storage::error::StorageError;
use wasmx_storage::memory::MemoryStore;
use wasmx_storage::traits::KvStore;
use wasmx_types::wire::KvConnectionRequest;

use crate::error::VmError;

pub const MEMORY_DRIVER: &str = "memdb";
const ROOT_SAVEPOINT: &str = "sp0";

/// Opens databases for one driver name.
pub trait DatabaseBackend: Send + Sync {
    fn driver(&self) -> &str;
    fn open(&self, dir: &str, name: &str) -> Result<Arc<dyn KvStore>, VmError>;
}

/// In-process databases that live as long as the backend. Reopening the
/// same `dir` and `name` returns the same data.
#[derive(Default)]
pub struct MemoryBackend {
    databases: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DatabaseBackend for MemoryBackend {
    fn driver(&self) -> &str {
        MEMORY_DRIVER
    }

    fn open(&self, dir: &str, name: &str) -> Result<Arc<dyn KvStore>, VmError> {
        let mut databases = self.databases.lock().map_err(|_| VmError::Internal {
            reason: "memdb lock poisoned".to_string(),
        })?;
        let store = databases
            .entry(format!("{dir}{name}"))
            .or_insert_with(|| Arc::new(MemoryStore::new()))
            .clone();
        Ok(store)
    }
}

fn contract_error(reason: impl Into<String>) -> VmError {
    VmError::ContractError {
        reason: reason.into(),
    }
}

fn storage_error(err: StorageError) -> VmError {
    contract_error(err.to_string())
}

struct Connection {
    /// `dir` followed by `name`.
    source: String,
    database: Arc<dyn KvStore>,
    savepoints: Vec<(String, Arc<BranchStore>)>,
}

impl Connection {
    /// The innermost savepoint, opening `sp0` on first use.
    fn current(&mut self) -> Arc<BranchStore> {
        if let Some((_, store)) = self.savepoints.last() {
            return store.clone();
        }
        let root = Arc::new(BranchStore::new(self.database.clone()));
        self.savepoints
            .push((ROOT_SAVEPOINT.to_string(), root.clone()));
        root
    }
}

/// Open connections keyed by `<contract hex>_<id>`.
pub struct DatabaseRegistry {
    backends: HashMap<String, Arc<dyn DatabaseBackend>>,
    connections: Mutex<HashMap<String, Connection>>,
}

impl Default for DatabaseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseRegistry {
    /// A registry with the in-memory driver only.
    pub fn new() -> Self {
        Self::with_backends(vec![Arc::new(MemoryBackend::new())])
    }

    pub fn with_backends(backends: Vec<Arc<dyn DatabaseBackend>>) -> Self {
        Self {
            backends: backends
                .into_iter()
                .map(|b| (b.driver().to_string(), b))
                .collect(),
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Connection>>, VmError> {
        self.connections.lock().map_err(|_| VmError::Internal {
            reason: "database registry lock poisoned".to_string(),
        })
    }

    pub fn connection_id(contract: &[u8], id: &str) -> String {
        format!("{}_{id}", hex::encode(contract))
    }

    pub fn is_connected(&self, connection: &str) -> bool {
        self.lock().map(|c| c.contains_key(connection)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open `request` under `connection`. Reconnecting to the same database
    /// is a no-op; reusing the id for another database fails.
    pub fn connect(&self, connection: String, request: &KvConnectionRequest) -> Result<(), VmError> {
        let source = format!("{}{}", request.dir, request.name);
        let mut connections = self.lock()?;
        if let Some(open) = connections.get(&connection) {
            if open.source == source {
                return Ok(());
            }
            return Err(contract_error("connection id already in use"));
        }
        let backend = self
            .backends
            .get(&request.driver)
            .ok_or_else(|| contract_error(format!("unknown database driver: {}", request.driver)))?;
        let database = backend.open(&request.dir, &request.name)?;
        info!(%connection, driver = %request.driver, "database connected");
        connections.insert(
            connection,
            Connection {
                source,
                database,
                savepoints: Vec::new(),
            },
        );
        Ok(())
    }

    /// Drop `connection` with its uncommitted savepoints.
    pub fn close(&self, connection: &str) -> Result<(), VmError> {
        match self.lock()?.remove(connection) {
            Some(_) => {
                info!(%connection, "database connection closed");
                Ok(())
            }
            None => Err(contract_error("kv db connection not found")),
        }
    }

    /// Run `f` against the innermost savepoint of `connection`.
    pub fn with_store<T>(
        &self,
        connection: &str,
        f: impl FnOnce(&dyn KvStore) -> Result<T, StorageError>,
    ) -> Result<T, VmError> {
        let store = {
            let mut connections = self.lock()?;
            let open = connections
                .get_mut(connection)
                .ok_or_else(|| contract_error("kv db connection not found"))?;
            open.current()
        };
        f(store.as_ref()).map_err(storage_error)
    }

    /// Push savepoint `name` on every connection in use.
    pub fn begin_subcall(&self, name: &str) -> Result<(), VmError> {
        let mut connections = self.lock()?;
        for open in connections.values_mut() {
            let Some((_, top)) = open.savepoints.last() else {
                continue;
            };
            let branch = Arc::new(BranchStore::new(top.clone()));
            open.savepoints.push((name.to_string(), branch));
        }
        Ok(())
    }

    /// Pop savepoint `name` wherever it is innermost, folding it into its
    /// parent when `commit` is set.
    pub fn end_subcall(&self, name: &str, commit: bool) -> Result<(), VmError> {
        let mut connections = self.lock()?;
        for (connection, open) in connections.iter_mut() {
            if !matches!(open.savepoints.last(), Some((top, _)) if top == name) {
                continue;
            }
            if let Some((_, branch)) = open.savepoints.pop() {
                if commit {
                    branch.commit().map_err(VmError::from)?;
                } else {
                    branch.discard().map_err(VmError::from)?;
                    debug!(%connection, savepoint = name, "savepoint dropped");
                }
            }
        }
        Ok(())
    }

    /// Close every savepoint stack. `sp0` is written to its database only
    /// when `commit` is set and no nested savepoint was left open.
    pub fn end_transaction(&self, commit: bool) -> Result<(), VmError> {
        let mut connections = self.lock()?;
        for open in connections.values_mut() {
            let savepoints = std::mem::take(&mut open.savepoints);
            if let [(_, root)] = savepoints.as_slice() {
                if commit {
                    root.commit().map_err(VmError::from)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> KvConnectionRequest {
        KvConnectionRequest {
            driver: MEMORY_DRIVER.to_string(),
            dir: "/data/".to_string(),
            name: name.to_string(),
            id: "main".to_string(),
        }
    }

    fn get(registry: &DatabaseRegistry, key: &[u8]) -> Option<Vec<u8>> {
        registry.with_store("c_main", |s| s.get(key)).unwrap()
    }

    fn put(registry: &DatabaseRegistry, key: &[u8], value: &[u8]) {
        registry.with_store("c_main", |s| s.put(key, value)).unwrap();
    }

    #[test]
    fn test_connection_id_is_scoped_by_contract() {
        assert_eq!(DatabaseRegistry::connection_id(&[0xab; 2], "db"), "abab_db");
    }

    #[test]
    fn test_connect_reuse_and_conflict() {
        let registry = DatabaseRegistry::new();
        registry.connect("c_main".into(), &request("one")).unwrap();
        registry.connect("c_main".into(), &request("one")).unwrap();
        let err = registry.connect("c_main".into(), &request("two")).unwrap_err();
        assert!(err.to_string().contains("already in use"));
        assert_eq!(registry.len(), 1);

        let mut unknown = request("three");
        unknown.driver = "goleveldb".into();
        let err = registry.connect("c_other".into(), &unknown).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_close_forgets_connection() {
        let registry = DatabaseRegistry::new();
        registry.connect("c_main".into(), &request("one")).unwrap();
        registry.close("c_main").unwrap();
        assert!(!registry.is_connected("c_main"));
        assert!(registry.close("c_main").is_err());
        assert!(registry.with_store("c_main", |s| s.get(b"k")).is_err());
    }

    #[test]
    fn test_writes_reach_database_on_commit_only() {
        let registry = DatabaseRegistry::new();
        registry.connect("c_main".into(), &request("one")).unwrap();
        put(&registry, b"k", b"v1");
        registry.end_transaction(false).unwrap();
        assert_eq!(get(&registry, b"k"), None);

        put(&registry, b"k", b"v2");
        registry.end_transaction(true).unwrap();
        registry.end_transaction(true).unwrap();
        assert_eq!(get(&registry, b"k"), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_subcall_savepoints() {
        let registry = DatabaseRegistry::new();
        registry.connect("c_main".into(), &request("one")).unwrap();
        put(&registry, b"outer", b"1");

        registry.begin_subcall("sp1_2").unwrap();
        put(&registry, b"dropped", b"1");
        registry.end_subcall("sp1_2", false).unwrap();
        assert_eq!(get(&registry, b"dropped"), None);

        registry.begin_subcall("sp1_3").unwrap();
        put(&registry, b"kept", b"1");
        registry.end_subcall("sp1_3", true).unwrap();
        assert_eq!(get(&registry, b"kept"), Some(b"1".to_vec()));

        registry.end_transaction(true).unwrap();
        assert_eq!(get(&registry, b"outer"), Some(b"1".to_vec()));
        assert_eq!(get(&registry, b"kept"), Some(b"1".to_vec()));
    }

    #[test]
    fn test_unused_connections_get_no_savepoint() {
        let registry = DatabaseRegistry::new();
        registry.connect("c_main".into(), &request("one")).unwrap();
        registry.begin_subcall("sp1_2").unwrap();
        put(&registry, b"k", b"v");
        registry.end_subcall("sp1_2", false).unwrap();
        registry.end_transaction(true).unwrap();
        assert_eq!(get(&registry, b"k"), Some(b"v".to_vec()));
    }

    #[test]
    fn test_memory_backend_shares_reopened_databases() {
        let backend = MemoryBackend::new();
        let first = backend.open("/data/", "one").unwrap();
        first.put(b"k", b"v").unwrap();
        let again = backend.open("/data/", "one").unwrap();
        assert_eq!(again.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(backend.open("/data/", "two").unwrap().get(b"k").unwrap(), None);
    }
}
