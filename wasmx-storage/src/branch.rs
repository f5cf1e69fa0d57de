use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::StorageError;
use crate::traits::{in_range, BatchOp, BatchWriter, KvPairs, KvStore};

/// Pending write: `Some(value)` for a put, `None` for a tombstone.
type Overlay = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Savepoint over a parent store.
///
/// Writes are buffered in an overlay and become visible to the parent only
/// on [`commit`](BranchStore::commit). Reads see the overlay first, then the
/// parent. Branches nest: the parent may itself be a `BranchStore`.
pub struct BranchStore {
    parent: Arc<dyn KvStore>,
    pending: RwLock<Overlay>,
}

impl BranchStore {
    pub fn new(parent: Arc<dyn KvStore>) -> Self {
        Self {
            parent,
            pending: RwLock::new(BTreeMap::new()),
        }
    }

    /// Flush all buffered writes into the parent and clear the overlay.
    pub fn commit(&self) -> Result<(), StorageError> {
        let ops = self.drain()?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => self.parent.put(&key, &value)?,
                BatchOp::Delete { key } => self.parent.delete(&key)?,
            }
        }
        Ok(())
    }

    /// Drop all buffered writes.
    pub fn discard(&self) -> Result<(), StorageError> {
        self.drain().map(|ops| {
            tracing::trace!(dropped = ops.len(), "discarded branch writes");
        })
    }

    /// Number of buffered writes (puts and tombstones).
    pub fn pending_len(&self) -> Result<usize, StorageError> {
        Ok(self.read_pending()?.len())
    }

    fn drain(&self) -> Result<Vec<BatchOp>, StorageError> {
        let mut pending = self.pending.write().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })?;
        Ok(std::mem::take(&mut *pending)
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => BatchOp::Put { key, value },
                None => BatchOp::Delete { key },
            })
            .collect())
    }

    fn read_pending(&self) -> Result<std::sync::RwLockReadGuard<'_, Overlay>, StorageError> {
        self.pending.read().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })
    }

    fn write_pending(&self) -> Result<std::sync::RwLockWriteGuard<'_, Overlay>, StorageError> {
        self.pending.write().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })
    }
}

impl KvStore for BranchStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        if let Some(entry) = self.read_pending()?.get(key) {
            return Ok(entry.clone());
        }
        self.parent.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.write_pending()?
            .insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.write_pending()?.insert(key.to_vec(), None);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }

    fn range(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        reverse: bool,
    ) -> Result<KvPairs, StorageError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.parent.range(start, end, false)?.into_iter().collect();
        for (key, value) in self.read_pending()?.iter() {
            if !in_range(key, start, end) {
                continue;
            }
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        let iter = merged.into_iter();
        Ok(if reverse { iter.rev().collect() } else { iter.collect() })
    }
}

impl BatchWriter for BranchStore {
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let mut pending = self.pending.write().map_err(|e| StorageError::BatchError {
            reason: e.to_string(),
        })?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    pending.insert(key, Some(value));
                }
                BatchOp::Delete { key } => {
                    pending.insert(key, None);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use proptest::prelude::*;

    fn parent_with(pairs: &[(&str, &str)]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for (k, v) in pairs {
            store.put(k.as_bytes(), v.as_bytes()).unwrap();
        }
        store
    }

    #[test]
    fn test_reads_fall_through_to_parent() {
        let parent = parent_with(&[("k", "parent")]);
        let branch = BranchStore::new(parent.clone());
        assert_eq!(branch.get(b"k").unwrap(), Some(b"parent".to_vec()));
    }

    #[test]
    fn test_writes_invisible_until_commit() {
        let parent = parent_with(&[("k", "old")]);
        let branch = BranchStore::new(parent.clone());
        branch.put(b"k", b"new").unwrap();
        branch.put(b"x", b"1").unwrap();
        assert_eq!(parent.get(b"k").unwrap(), Some(b"old".to_vec()));
        assert_eq!(branch.get(b"k").unwrap(), Some(b"new".to_vec()));

        branch.commit().unwrap();
        assert_eq!(parent.get(b"k").unwrap(), Some(b"new".to_vec()));
        assert_eq!(parent.get(b"x").unwrap(), Some(b"1".to_vec()));
        assert_eq!(branch.pending_len().unwrap(), 0);
    }

    #[test]
    fn test_discard_leaves_parent_untouched() {
        let parent = parent_with(&[("k", "old")]);
        let branch = BranchStore::new(parent.clone());
        branch.put(b"k", b"new").unwrap();
        branch.delete(b"k").unwrap();
        branch.discard().unwrap();
        assert_eq!(parent.get(b"k").unwrap(), Some(b"old".to_vec()));
        assert_eq!(branch.get(b"k").unwrap(), Some(b"old".to_vec()));
    }

    #[test]
    fn test_tombstone_hides_parent_value() {
        let parent = parent_with(&[("k", "v")]);
        let branch = BranchStore::new(parent.clone());
        branch.delete(b"k").unwrap();
        assert!(!branch.exists(b"k").unwrap());
        branch.commit().unwrap();
        assert!(!parent.exists(b"k").unwrap());
    }

    #[test]
    fn test_range_merges_overlay() {
        let parent = parent_with(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let branch = BranchStore::new(parent.clone());
        branch.delete(b"b").unwrap();
        branch.put(b"bb", b"22").unwrap();
        branch.put(b"z", b"26").unwrap();
        let keys: Vec<Vec<u8>> = branch
            .range(Some(b"a".as_slice()), Some(b"d".as_slice()), false)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"bb".to_vec(), b"c".to_vec()]);

        let rev = branch.range(None, None, true).unwrap();
        assert_eq!(rev.first().unwrap().0, b"z".to_vec());
    }

    #[test]
    fn test_nested_branches_commit_inner_first() {
        let root = parent_with(&[]);
        let outer = Arc::new(BranchStore::new(root.clone()));
        let inner = BranchStore::new(outer.clone());
        inner.put(b"k", b"inner").unwrap();
        inner.commit().unwrap();
        assert_eq!(outer.get(b"k").unwrap(), Some(b"inner".to_vec()));
        assert_eq!(root.get(b"k").unwrap(), None);
        outer.commit().unwrap();
        assert_eq!(root.get(b"k").unwrap(), Some(b"inner".to_vec()));
    }

    proptest! {
        #[test]
        fn prop_commit_matches_direct_writes(
            ops in proptest::collection::vec(
                (proptest::collection::vec(0u8..4, 1..3), proptest::option::of(any::<u8>())),
                0..32,
            )
        ) {
            let direct = MemoryStore::new();
            let parent = Arc::new(MemoryStore::new());
            let branch = BranchStore::new(parent.clone());
            for (key, value) in &ops {
                match value {
                    Some(v) => {
                        direct.put(key, &[*v]).unwrap();
                        branch.put(key, &[*v]).unwrap();
                    }
                    None => {
                        direct.delete(key).unwrap();
                        branch.delete(key).unwrap();
                    }
                }
            }
            prop_assert_eq!(branch.range(None, None, false).unwrap(), direct.range(None, None, false).unwrap());
            branch.commit().unwrap();
            prop_assert_eq!(parent.range(None, None, false).unwrap(), direct.range(None, None, false).unwrap());
        }

        #[test]
        fn prop_discard_is_invisible(
            keys in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..4), 0..16)
        ) {
            let parent = Arc::new(MemoryStore::new());
            parent.put(b"seed", b"v").unwrap();
            let before = parent.range(None, None, false).unwrap();
            let branch = BranchStore::new(parent.clone());
            for key in &keys {
                branch.put(key, b"x").unwrap();
            }
            branch.delete(b"seed").unwrap();
            branch.discard().unwrap();
            prop_assert_eq!(parent.range(None, None, false).unwrap(), before);
        }
    }
}
