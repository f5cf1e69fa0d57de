use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::constants::{CORE_ROLES, ROLE_LIBRARY};
use crate::error::TypesError;
use crate::primitives::{Address, Hash};

/// Storage determinism class of a contract.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub enum StorageClassification {
    /// Deterministic state shared by every validator.
    CoreConsensus,
    /// Deterministic metadata readable and writable from core contracts.
    MetaConsensus,
    /// Node-local, non-deterministic state.
    SingleConsensus,
    #[default]
    Unclassified,
}

impl StorageClassification {
    /// One-byte key prefix separating the storage classes in the backing store.
    pub fn key_prefix(self) -> u8 {
        match self {
            StorageClassification::CoreConsensus => 0x01,
            StorageClassification::MetaConsensus => 0x02,
            StorageClassification::SingleConsensus => 0x03,
            StorageClassification::Unclassified => 0x04,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StorageClassification::CoreConsensus => "CoreConsensus",
            StorageClassification::MetaConsensus => "MetaConsensus",
            StorageClassification::SingleConsensus => "SingleConsensus",
            StorageClassification::Unclassified => "Unclassified",
        }
    }

    /// Whether a contract of this class may call a contract of class `callee`.
    ///
    /// Core contracts may only reach core or meta contracts.
    pub fn may_call(self, callee: StorageClassification) -> bool {
        if self != StorageClassification::CoreConsensus {
            return true;
        }
        matches!(
            callee,
            StorageClassification::CoreConsensus | StorageClassification::MetaConsensus
        )
    }
}

impl fmt::Display for StorageClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageClassification {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CoreConsensus" => Ok(StorageClassification::CoreConsensus),
            "MetaConsensus" => Ok(StorageClassification::MetaConsensus),
            "SingleConsensus" => Ok(StorageClassification::SingleConsensus),
            "Unclassified" | "" => Ok(StorageClassification::Unclassified),
            other => Err(TypesError::InvalidStorageType {
                value: other.to_string(),
            }),
        }
    }
}

/// A capability request resolved against the host module registry.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct SystemDep {
    /// Role the capability is registered under, if any.
    #[serde(default)]
    pub role: String,
    /// Interface or runtime label.
    pub label: String,
    /// Location of an auxiliary module (interpreters), if any.
    #[serde(default)]
    pub file_path: String,
    /// Nested dependencies, resolved before this one.
    #[serde(default)]
    pub deps: Vec<SystemDep>,
}

impl SystemDep {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_deps(mut self, deps: Vec<SystemDep>) -> Self {
        self.deps = deps;
        self
    }
}

/// Flatten a dependency tree into labels, nested dependencies first.
pub fn flatten_labels(deps: &[SystemDep]) -> Vec<String> {
    let mut out = Vec::new();
    for dep in deps {
        for label in flatten_labels(&dep.deps) {
            if !out.contains(&label) {
                out.push(label);
            }
        }
        if !out.contains(&dep.label) {
            out.push(dep.label.clone());
        }
    }
    out
}

/// Static descriptor of a deployed contract.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct ContractDependency {
    pub address: Address,
    /// Role the contract is registered under.
    pub role: Option<String>,
    /// Registry label (e.g. `bank_0.0.1`).
    pub label: String,
    pub storage_type: StorageClassification,
    pub code_id: u64,
    pub code_hash: Hash,
    /// Path of the module file when the code is not stored inline.
    pub code_file_path: String,
    /// Module bytecode, or interpreted source for interpreter-backed contracts.
    pub bytecode: Vec<u8>,
    /// Pinned modules stay compiled in the engine cache.
    pub pinned: bool,
    pub system_deps: Vec<SystemDep>,
}

impl ContractDependency {
    pub fn has_role(&self) -> bool {
        self.role.as_deref().is_some_and(|r| !r.is_empty())
    }

    pub fn role_str(&self) -> &str {
        self.role.as_deref().unwrap_or("")
    }

    pub fn is_library(&self) -> bool {
        self.role_str() == ROLE_LIBRARY
    }

    /// Whether the contract holds a role allowed to import privileged modules.
    pub fn has_core_role(&self) -> bool {
        CORE_ROLES.contains(&self.role_str())
    }

    /// Dependency labels in resolution order.
    pub fn labels(&self) -> Vec<String> {
        flatten_labels(&self.system_deps)
    }

    /// Whether any dependency (at any depth) carries `label`.
    pub fn depends_on(&self, label: &str) -> bool {
        self.labels().iter().any(|l| l == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_may_only_call_core_or_meta() {
        use StorageClassification::*;
        assert!(CoreConsensus.may_call(CoreConsensus));
        assert!(CoreConsensus.may_call(MetaConsensus));
        assert!(!CoreConsensus.may_call(SingleConsensus));
        assert!(!CoreConsensus.may_call(Unclassified));
        assert!(SingleConsensus.may_call(CoreConsensus));
        assert!(Unclassified.may_call(SingleConsensus));
    }

    #[test]
    fn test_storage_classification_parse() {
        assert_eq!(
            "MetaConsensus".parse::<StorageClassification>().unwrap(),
            StorageClassification::MetaConsensus
        );
        assert!("Bogus".parse::<StorageClassification>().is_err());
    }

    #[test]
    fn test_flatten_labels_nested_first() {
        let deps = vec![
            SystemDep::new("interpreter_python_utf8_0.2.0").with_deps(vec![
                SystemDep::new("wasi_snapshot_preview1"),
                SystemDep::new("wasmx_wasi_rust_1"),
            ]),
            SystemDep::new("wasmx_env_2"),
            SystemDep::new("wasi_snapshot_preview1"),
        ];
        assert_eq!(
            flatten_labels(&deps),
            vec![
                "wasi_snapshot_preview1",
                "wasmx_wasi_rust_1",
                "interpreter_python_utf8_0.2.0",
                "wasmx_env_2",
            ]
        );
    }

    #[test]
    fn test_roles() {
        let mut dep = ContractDependency::default();
        assert!(!dep.has_role());
        dep.role = Some(String::new());
        assert!(!dep.has_role());
        dep.role = Some(ROLE_LIBRARY.to_string());
        assert!(dep.has_role());
        assert!(dep.is_library());
        assert!(!dep.has_core_role());
        dep.role = Some("consensus".to_string());
        assert!(dep.has_core_role());
    }
}
