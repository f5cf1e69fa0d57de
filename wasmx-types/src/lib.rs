//! Shared type definitions for the wasmx execution core.
//!
//! Addresses, the execution environment, contract dependency descriptors,
//! dependency labels and roles, and the JSON wire records exchanged with
//! guest modules.

pub mod codec;
pub mod constants;
pub mod deps;
pub mod env;
pub mod error;
pub mod primitives;
pub mod wire;

#[cfg(test)]
mod tests {
    use borsh::{BorshDeserialize, BorshSerialize};

    fn borsh_roundtrip<T: BorshSerialize + BorshDeserialize + PartialEq + std::fmt::Debug>(
        value: &T,
    ) {
        let encoded = borsh::to_vec(value).expect("borsh serialize failed");
        let decoded = T::try_from_slice(&encoded).expect("borsh deserialize failed");
        assert_eq!(*value, decoded);
    }

    #[test]
    fn test_contract_dependency_roundtrip() {
        use crate::deps::*;
        let dep = ContractDependency {
            address: [7u8; 20],
            role: Some("bank".to_string()),
            label: "bank_0.0.1".to_string(),
            storage_type: StorageClassification::CoreConsensus,
            code_id: 3,
            code_hash: [9u8; 32],
            code_file_path: "codes/3.wasm".to_string(),
            bytecode: vec![0, 97, 115, 109],
            pinned: true,
            system_deps: vec![SystemDep {
                role: String::new(),
                label: "wasmx_env_2".to_string(),
                file_path: String::new(),
                deps: vec![SystemDep::new("memory_assemblyscript_1")],
            }],
        };
        borsh_roundtrip(&dep);
    }
}
