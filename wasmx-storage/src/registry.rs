use std::sync::Arc;

use wasmx_types::deps::ContractDependency;
use wasmx_types::primitives::Address;

use crate::error::StorageError;
use crate::traits::KvStore;

const CONTRACT_PREFIX: &[u8] = b"registry/contract/";
const ROLE_PREFIX: &[u8] = b"registry/role/";

/// Contract descriptors and role assignments persisted in a key-value store.
///
/// Descriptors are borsh-encoded under `registry/contract/<address>`; role
/// bindings map `registry/role/<role>` to a 20-byte address.
pub struct ContractRegistry {
    store: Arc<dyn KvStore>,
}

impl ContractRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn contract_key(address: &Address) -> Vec<u8> {
        [CONTRACT_PREFIX, address.as_slice()].concat()
    }

    fn role_key(role: &str) -> Vec<u8> {
        [ROLE_PREFIX, role.as_bytes()].concat()
    }

    /// Store a descriptor, replacing any previous one at the same address.
    /// A non-empty role also rebinds that role to this address.
    pub fn register(&self, dep: &ContractDependency) -> Result<(), StorageError> {
        let bytes = borsh::to_vec(dep).map_err(|e| StorageError::SerializationError {
            reason: e.to_string(),
        })?;
        self.store.put(&Self::contract_key(&dep.address), &bytes)?;
        if dep.has_role() {
            self.store.put(&Self::role_key(dep.role_str()), &dep.address)?;
        }
        Ok(())
    }

    pub fn get(&self, address: &Address) -> Result<Option<ContractDependency>, StorageError> {
        match self.store.get(&Self::contract_key(address))? {
            Some(bytes) => borsh::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::DeserializationError {
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub fn contains(&self, address: &Address) -> Result<bool, StorageError> {
        self.store.exists(&Self::contract_key(address))
    }

    pub fn remove(&self, address: &Address) -> Result<(), StorageError> {
        if let Some(dep) = self.get(address)? {
            if dep.has_role() && self.address_by_role(dep.role_str())? == Some(*address) {
                self.store.delete(&Self::role_key(dep.role_str()))?;
            }
        }
        self.store.delete(&Self::contract_key(address))
    }

    /// Address currently bound to `role`.
    pub fn address_by_role(&self, role: &str) -> Result<Option<Address>, StorageError> {
        match self.store.get(&Self::role_key(role))? {
            Some(bytes) => {
                let address: Address =
                    bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| StorageError::DeserializationError {
                            reason: format!("role binding for {role} is {} bytes", bytes.len()),
                        })?;
                Ok(Some(address))
            }
            None => Ok(None),
        }
    }

    /// Role of the contract at `address`, or the empty string.
    pub fn role_by_address(&self, address: &Address) -> Result<String, StorageError> {
        Ok(self
            .get(address)?
            .and_then(|dep| dep.role)
            .unwrap_or_default())
    }

    /// All registered descriptors in address order.
    pub fn all(&self) -> Result<Vec<ContractDependency>, StorageError> {
        self.store
            .prefix_scan(CONTRACT_PREFIX)?
            .into_iter()
            .map(|(_, bytes)| {
                borsh::from_slice(&bytes).map_err(|e| StorageError::DeserializationError {
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use wasmx_types::constants::{ROLE_BANK, ROLE_LIBRARY};
    use wasmx_types::deps::{StorageClassification, SystemDep};

    fn registry() -> ContractRegistry {
        ContractRegistry::new(Arc::new(MemoryStore::new()))
    }

    fn dep(byte: u8, role: Option<&str>) -> ContractDependency {
        ContractDependency {
            address: [byte; 20],
            role: role.map(str::to_string),
            label: format!("contract_{byte}"),
            storage_type: StorageClassification::SingleConsensus,
            code_id: byte as u64,
            bytecode: vec![0, 97, 115, 109],
            system_deps: vec![SystemDep::new("wasmx_env_2")],
            ..Default::default()
        }
    }

    #[test]
    fn test_register_and_get() {
        let reg = registry();
        let d = dep(1, None);
        reg.register(&d).unwrap();
        assert_eq!(reg.get(&[1u8; 20]).unwrap(), Some(d));
        assert!(reg.contains(&[1u8; 20]).unwrap());
        assert_eq!(reg.get(&[2u8; 20]).unwrap(), None);
    }

    #[test]
    fn test_role_bindings() {
        let reg = registry();
        reg.register(&dep(3, Some(ROLE_BANK))).unwrap();
        reg.register(&dep(4, Some(ROLE_LIBRARY))).unwrap();
        assert_eq!(reg.address_by_role(ROLE_BANK).unwrap(), Some([3u8; 20]));
        assert_eq!(reg.role_by_address(&[4u8; 20]).unwrap(), ROLE_LIBRARY);
        assert_eq!(reg.role_by_address(&[9u8; 20]).unwrap(), "");
    }

    #[test]
    fn test_remove_clears_role() {
        let reg = registry();
        reg.register(&dep(5, Some(ROLE_BANK))).unwrap();
        reg.remove(&[5u8; 20]).unwrap();
        assert_eq!(reg.get(&[5u8; 20]).unwrap(), None);
        assert_eq!(reg.address_by_role(ROLE_BANK).unwrap(), None);
    }

    #[test]
    fn test_all_in_address_order() {
        let reg = registry();
        reg.register(&dep(9, None)).unwrap();
        reg.register(&dep(2, None)).unwrap();
        let addrs: Vec<Address> = reg.all().unwrap().into_iter().map(|d| d.address).collect();
        assert_eq!(addrs, vec![[2u8; 20], [9u8; 20]]);
    }
}
