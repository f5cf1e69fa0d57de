use std::sync::Arc;

use wasmx_types::deps::StorageClassification;
use wasmx_types::primitives::Address;

use crate::error::StorageError;
use crate::traits::{prefix_end, KvPairs, KvStore};

/// A view of a store where every key is transparently prefixed.
///
/// Contract storage is namespaced as `class byte || address || key`, so two
/// contracts (or one contract under two classifications) never share keys.
pub struct PrefixStore {
    inner: Arc<dyn KvStore>,
    prefix: Vec<u8>,
}

impl PrefixStore {
    pub fn new(inner: Arc<dyn KvStore>, prefix: Vec<u8>) -> Self {
        Self { inner, prefix }
    }

    /// Storage view for one contract under one storage classification.
    pub fn for_contract(
        inner: Arc<dyn KvStore>,
        class: StorageClassification,
        address: &Address,
    ) -> Self {
        Self::new(inner, contract_prefix(class, address))
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }
}

/// Key prefix for a contract's storage: `class byte || address`.
pub fn contract_prefix(class: StorageClassification, address: &Address) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(1 + address.len());
    prefix.push(class.key_prefix());
    prefix.extend_from_slice(address);
    prefix
}

impl KvStore for PrefixStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(&self.full_key(key))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.inner.put(&self.full_key(key), value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.inner.delete(&self.full_key(key))
    }

    fn exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        self.inner.exists(&self.full_key(key))
    }

    fn range(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        reverse: bool,
    ) -> Result<KvPairs, StorageError> {
        let lower = self.full_key(start.unwrap_or_default());
        let upper = match end {
            Some(e) => Some(self.full_key(e)),
            None => prefix_end(&self.prefix),
        };
        let plen = self.prefix.len();
        Ok(self
            .inner
            .range(Some(lower.as_slice()), upper.as_deref(), reverse)?
            .into_iter()
            .map(|(k, v)| (k[plen..].to_vec(), v))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn test_isolation_between_contracts() {
        let base: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let a = PrefixStore::for_contract(base.clone(), StorageClassification::SingleConsensus, &[1u8; 20]);
        let b = PrefixStore::for_contract(base.clone(), StorageClassification::SingleConsensus, &[2u8; 20]);
        a.put(b"counter", b"1").unwrap();
        assert_eq!(a.get(b"counter").unwrap(), Some(b"1".to_vec()));
        assert_eq!(b.get(b"counter").unwrap(), None);
    }

    #[test]
    fn test_classification_separates_namespaces() {
        let base: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let addr = [7u8; 20];
        let core = PrefixStore::for_contract(base.clone(), StorageClassification::CoreConsensus, &addr);
        let meta = PrefixStore::for_contract(base.clone(), StorageClassification::MetaConsensus, &addr);
        core.put(b"k", b"core").unwrap();
        assert!(!meta.exists(b"k").unwrap());
    }

    #[test]
    fn test_range_strips_prefix_and_stays_inside() {
        let base: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let a = PrefixStore::new(base.clone(), b"a/".to_vec());
        let b = PrefixStore::new(base.clone(), b"b/".to_vec());
        a.put(b"1", b"x").unwrap();
        a.put(b"2", b"y").unwrap();
        b.put(b"0", b"z").unwrap();

        let all = a.range(None, None, false).unwrap();
        assert_eq!(
            all,
            vec![(b"1".to_vec(), b"x".to_vec()), (b"2".to_vec(), b"y".to_vec())]
        );
        let rev = a.range(None, None, true).unwrap();
        assert_eq!(rev[0].0, b"2".to_vec());
        let bounded = a.range(Some(b"2".as_slice()), None, false).unwrap();
        assert_eq!(bounded.len(), 1);
    }
}
