//! End-to-end execution through the public engine API: dependency
//! resolution, nested calls over branched state, the CosmWasm and WASI
//! drivers, and contract databases, with guests written in WAT.

use std::collections::HashMap;
use std::sync::Arc;

use wasmx_storage::memory::MemoryStore;
use wasmx_storage::prefix::PrefixStore;
use wasmx_storage::traits::KvStore;
use wasmx_types::codec::{AddressCodec, HexAddressCodec};
use wasmx_types::constants::{
    CW_ENV_8, ENTRY_POINT_EXECUTE, ROLE_BANK, ROLE_LIBRARY, WASI_SNAPSHOT_PREVIEW1,
    WASMX_KVDB_I64_1, WASMX_WASI_RUST_1,
};
use wasmx_types::deps::{ContractDependency, StorageClassification, SystemDep};
use wasmx_types::env::Env;
use wasmx_types::primitives::{Address, Amount, Hash, Word};
use wasmx_types::wire::{CallCode, ChainEvent, DeployRequest};
use wasmx_vm::chain::InstantiateRequest;
use wasmx_vm::{
    ChainHandler, Collaborators, DatabaseRegistry, ExecutionRequest, ExecutionResult,
    NoPrecompiles, VmConfig, VmError, WasmxEngine,
};

const CALLER: Address = [0xA1; 20];
const CALLER_B: Address = [0xA2; 20];
const CALLEE: Address = [0xB1; 20];
const MISSING: Address = [0xEE; 20];

/// Helper: a ledger that only knows contract descriptors.
struct TestChain {
    contracts: HashMap<Address, ContractDependency>,
    codec: HexAddressCodec,
}

impl TestChain {
    fn new(contracts: Vec<ContractDependency>) -> Self {
        Self {
            contracts: contracts.into_iter().map(|c| (c.address, c)).collect(),
            codec: HexAddressCodec::new("mythos"),
        }
    }
}

impl ChainHandler for TestChain {
    fn address_codec(&self) -> &dyn AddressCodec {
        &self.codec
    }

    fn contract_dependency(
        &self,
        address: &Address,
    ) -> Result<Option<ContractDependency>, VmError> {
        Ok(self.contracts.get(address).cloned())
    }

    fn can_call_system_contract(&self, _caller: &Address) -> bool {
        false
    }

    fn balance(&self, _address: &Address, _denom: &str) -> Result<Amount, VmError> {
        Ok(0)
    }

    fn transfer(&self, _from: &Address, _to: &Address, _amount: Amount) -> Result<(), VmError> {
        Err(VmError::chain("transfers disabled"))
    }

    fn block_hash(&self, _height: u64) -> Hash {
        [0u8; 32]
    }

    fn code_hash(&self, _address: &Address) -> Hash {
        [0u8; 32]
    }

    fn code(&self, address: &Address) -> Vec<u8> {
        self.contracts
            .get(address)
            .map(|c| c.bytecode.clone())
            .unwrap_or_default()
    }

    fn address_by_role(&self, role: &str) -> Result<Option<Address>, VmError> {
        Ok(self
            .contracts
            .values()
            .find(|c| c.role_str() == role)
            .map(|c| c.address))
    }

    fn role_by_address(&self, address: &Address) -> String {
        self.contracts
            .get(address)
            .map(|c| c.role_str().to_string())
            .unwrap_or_default()
    }

    fn instantiate_code(&self, _request: InstantiateRequest) -> Result<Address, VmError> {
        Err(VmError::chain("instantiation disabled"))
    }

    fn deploy(&self, _request: DeployRequest) -> Result<Address, VmError> {
        Err(VmError::chain("deployment disabled"))
    }

    fn execute_cosmos_msg(
        &self,
        _sender: &Address,
        _msg: &[u8],
    ) -> Result<(Vec<ChainEvent>, Vec<u8>), VmError> {
        Err(VmError::chain("no message router"))
    }

    fn submit_cosmos_query(&self, _request: &[u8]) -> Result<Vec<u8>, VmError> {
        Err(VmError::chain("no query router"))
    }

    fn decode_cosmos_tx(&self, _tx: &[u8]) -> Result<Vec<u8>, VmError> {
        Err(VmError::chain("no tx decoder"))
    }

    fn verify_cosmos_tx(&self, _tx: &[u8]) -> Result<bool, VmError> {
        Ok(false)
    }

    fn cw_query(&self, _caller: &Address, _request: &[u8]) -> Result<Vec<u8>, VmError> {
        Err(VmError::chain("no cosmwasm queries"))
    }

    fn set_contract_info(&self, _address: &Address, _info: &[u8]) -> Result<(), VmError> {
        Ok(())
    }
}

/// Helper: WAT string literal for arbitrary bytes.
fn wat_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("\\{b:02x}")).collect()
}

fn word(last: u8) -> Word {
    let mut w = [0u8; 32];
    w[31] = last;
    w
}

/// Helper: ewasm guest storing its call code for `target` under key 1 and
/// finishing with the same word.
fn caller_guest(target: &Address) -> Vec<u8> {
    wat::parse_str(format!(
        r#"(module
  (import "env" "ethereum_call" (func $call (param i64 i32 i32 i32 i32 i32 i32) (result i32)))
  (import "env" "ethereum_storageStore" (func $store (param i32 i32)))
  (import "env" "ethereum_finish" (func $finish (param i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 64) "{target}")
  (func (export "main")
    (i32.store8 (i32.const 31) (i32.const 1))
    (i32.store8 (i32.const 63)
      (call $call (i64.const 1000000) (i32.const 64) (i32.const 96)
        (i32.const 128) (i32.const 0) (i32.const 200) (i32.const 32)))
    (call $store (i32.const 0) (i32.const 32))
    (call $finish (i32.const 32) (i32.const 32))))"#,
        target = wat_bytes(target)
    ))
    .unwrap()
}

/// Helper: ewasm guest storing 42 under key 2, then finishing or reverting
/// with "nope".
fn storer_guest(revert: bool) -> Vec<u8> {
    let end = if revert {
        "(call $revert (i32.const 100) (i32.const 4))"
    } else {
        "(call $finish (i32.const 32) (i32.const 32))"
    };
    wat::parse_str(format!(
        r#"(module
  (import "env" "ethereum_storageStore" (func $store (param i32 i32)))
  (import "env" "ethereum_finish" (func $finish (param i32 i32)))
  (import "env" "ethereum_revert" (func $revert (param i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 100) "nope")
  (func (export "main")
    (i32.store8 (i32.const 31) (i32.const 2))
    (i32.store8 (i32.const 63) (i32.const 42))
    (call $store (i32.const 0) (i32.const 32))
    {end}))"#
    ))
    .unwrap()
}

/// Helper: CosmWasm guest whose `execute` answers with `result`.
fn cosmwasm_guest(result: &[u8]) -> Vec<u8> {
    let len = (result.len() as u32).to_le_bytes();
    let mut region = 16u32.to_le_bytes().to_vec();
    region.extend_from_slice(&len);
    region.extend_from_slice(&len);
    wat::parse_str(format!(
        r#"(module
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 4096))
  (data (i32.const 0) "{region}")
  (data (i32.const 16) "{result}")
  (func (export "allocate") (param $size i32) (result i32)
    (local $region i32)
    (local.set $region (global.get $heap))
    (i32.store (local.get $region) (i32.add (local.get $region) (i32.const 12)))
    (i32.store offset=4 (local.get $region) (local.get $size))
    (i32.store offset=8 (local.get $region) (i32.const 0))
    (global.set $heap
      (i32.add (global.get $heap) (i32.add (local.get $size) (i32.const 12))))
    (local.get $region))
  (func (export "deallocate") (param i32))
  (func (export "execute") (param i32 i32 i32) (result i32)
    (i32.const 0)))"#,
        region = wat_bytes(&region),
        result = wat_bytes(result)
    ))
    .unwrap()
}

fn contract(address: Address, bytecode: Vec<u8>) -> ContractDependency {
    ContractDependency {
        address,
        bytecode,
        ..Default::default()
    }
}

/// Helper: engine, shared store and chain for one scenario.
struct Harness {
    engine: WasmxEngine,
    store: Arc<MemoryStore>,
    chain: Arc<TestChain>,
}

impl Harness {
    fn new(contracts: Vec<ContractDependency>) -> Self {
        Self {
            engine: WasmxEngine::new(VmConfig::default()).unwrap(),
            store: Arc::new(MemoryStore::new()),
            chain: Arc::new(TestChain::new(contracts)),
        }
    }

    fn run(&self, address: Address, is_query: bool) -> Result<ExecutionResult, VmError> {
        let contract = self.chain.contracts[&address].clone();
        let mut env = Env::default();
        env.current_call.sender = [0xCC; 20];
        env.current_call.origin = [0xCC; 20];
        env.current_call.is_query = is_query;
        self.engine.execute(ExecutionRequest {
            env,
            contract,
            entry_point: ENTRY_POINT_EXECUTE.to_string(),
            store: self.store.clone(),
            collaborators: Collaborators {
                chain: self.chain.clone(),
                app: None,
                precompiles: Arc::new(NoPrecompiles),
            },
            gas_limit: 5_000_000,
        })
    }

    fn stored(&self, address: Address, key: u8) -> Option<Vec<u8>> {
        let class = self
            .chain
            .contracts
            .get(&address)
            .map(|c| c.storage_type)
            .unwrap_or_default();
        PrefixStore::for_contract(self.store.clone(), class, &address)
            .get(&word(key))
            .unwrap()
    }
}

#[test]
fn test_execute_commits_only_outside_queries() {
    let harness = Harness::new(vec![contract(CALLEE, storer_guest(false))]);

    let query = harness.run(CALLEE, true).unwrap();
    assert_eq!(query.code, CallCode::Success);
    assert_eq!(query.data, word(42).to_vec());
    assert_eq!(harness.stored(CALLEE, 2), None);

    let result = harness.run(CALLEE, false).unwrap();
    assert_eq!(result.code, CallCode::Success);
    assert!(result.gas_used > 0);
    assert_eq!(harness.stored(CALLEE, 2), Some(word(42).to_vec()));
}

#[test]
fn test_revert_discards_state() {
    let harness = Harness::new(vec![contract(CALLEE, storer_guest(true))]);
    let result = harness.run(CALLEE, false).unwrap();
    assert_eq!(result.code, CallCode::Revert);
    assert_eq!(result.data, b"nope".to_vec());
    assert!(result.error.is_some());
    assert!(result.logs.is_empty());
    assert_eq!(harness.stored(CALLEE, 2), None);
}

#[test]
fn test_call_to_missing_contract_succeeds() {
    let harness = Harness::new(vec![contract(CALLER, caller_guest(&MISSING))]);
    let result = harness.run(CALLER, false).unwrap();
    assert_eq!(result.code, CallCode::Success);
    assert_eq!(result.data[31], CallCode::Success.as_i32() as u8);
    assert_eq!(harness.stored(CALLER, 1), Some(word(0).to_vec()));
}

#[test]
fn test_nested_call_commits_callee_state() {
    let harness = Harness::new(vec![
        contract(CALLER, caller_guest(&CALLEE)),
        contract(CALLEE, storer_guest(false)),
    ]);
    let result = harness.run(CALLER, false).unwrap();
    assert_eq!(result.data[31], 0);
    assert_eq!(harness.stored(CALLEE, 2), Some(word(42).to_vec()));
}

#[test]
fn test_reverting_callee_keeps_caller_state() {
    let harness = Harness::new(vec![
        contract(CALLER, caller_guest(&CALLEE)),
        contract(CALLEE, storer_guest(true)),
    ]);
    let result = harness.run(CALLER, false).unwrap();
    assert_eq!(result.code, CallCode::Success);
    assert_eq!(result.data[31], CallCode::Revert.as_i32() as u8);
    assert_eq!(harness.stored(CALLER, 1), Some(word(2).to_vec()));
    assert_eq!(harness.stored(CALLEE, 2), None);
}

#[test]
fn test_nested_gas_is_charged_to_the_transaction() {
    let alone = Harness::new(vec![contract(CALLER, caller_guest(&MISSING))]);
    let nested = Harness::new(vec![
        contract(CALLER, caller_guest(&CALLEE)),
        contract(CALLEE, storer_guest(false)),
    ]);
    let alone_gas = alone.run(CALLER, false).unwrap().gas_used;
    let nested_gas = nested.run(CALLER, false).unwrap().gas_used;
    assert!(nested_gas > alone_gas);
}

#[test]
fn test_failed_nested_call_gas_stays_charged() {
    let alone = Harness::new(vec![contract(CALLER, caller_guest(&MISSING))]);
    let failed = Harness::new(vec![
        contract(CALLER, caller_guest(&CALLEE)),
        contract(CALLEE, storer_guest(true)),
    ]);
    let alone_gas = alone.run(CALLER, false).unwrap().gas_used;
    let result = failed.run(CALLER, false).unwrap();
    assert_eq!(result.code, CallCode::Success);
    assert_eq!(result.data[31], CallCode::Revert.as_i32() as u8);
    assert!(result.gas_used > alone_gas);
}

/// Helper: ewasm guest making a read-only call to `target` and storing the
/// outcome code under key 1.
fn static_caller_guest(target: &Address) -> Vec<u8> {
    wat::parse_str(format!(
        r#"(module
  (import "env" "ethereum_callStatic" (func $call (param i64 i32 i32 i32 i32 i32) (result i32)))
  (import "env" "ethereum_storageStore" (func $store (param i32 i32)))
  (import "env" "ethereum_finish" (func $finish (param i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 64) "{target}")
  (func (export "main")
    (i32.store8 (i32.const 31) (i32.const 1))
    (i32.store8 (i32.const 63)
      (call $call (i64.const 1000000) (i32.const 64)
        (i32.const 128) (i32.const 0) (i32.const 200) (i32.const 32)))
    (call $store (i32.const 0) (i32.const 32))
    (call $finish (i32.const 200) (i32.const 32))))"#,
        target = wat_bytes(target)
    ))
    .unwrap()
}

#[test]
fn test_nested_query_discards_callee_writes() {
    let harness = Harness::new(vec![
        contract(CALLER, static_caller_guest(&CALLEE)),
        contract(CALLEE, storer_guest(false)),
    ]);
    let result = harness.run(CALLER, false).unwrap();
    assert_eq!(result.code, CallCode::Success);
    assert_eq!(result.data, word(42).to_vec());
    assert_eq!(harness.stored(CALLER, 1), Some(word(0).to_vec()));
    assert_eq!(harness.stored(CALLEE, 2), None);
}

#[test]
fn test_no_role_caller_cannot_reach_role_contract() {
    let mut bank = contract(CALLEE, storer_guest(false));
    bank.role = Some(ROLE_BANK.to_string());
    let harness = Harness::new(vec![contract(CALLER, caller_guest(&CALLEE)), bank]);
    let result = harness.run(CALLER, false).unwrap();
    assert_eq!(result.data[31], CallCode::Failure.as_i32() as u8);
    assert_eq!(harness.stored(CALLEE, 2), None);
}

#[test]
fn test_core_caller_storage_boundaries() {
    for (class, expected) in [
        (StorageClassification::SingleConsensus, CallCode::Failure),
        (StorageClassification::MetaConsensus, CallCode::Success),
    ] {
        let mut caller = contract(CALLER, caller_guest(&CALLEE));
        caller.storage_type = StorageClassification::CoreConsensus;
        let mut callee = contract(CALLEE, storer_guest(false));
        callee.storage_type = class;
        let harness = Harness::new(vec![caller, callee]);
        let result = harness.run(CALLER, false).unwrap();
        assert_eq!(result.data[31], expected.as_i32() as u8, "callee class {class}");
    }
}

#[test]
fn test_library_writes_caller_storage() {
    let mut library = contract(CALLEE, storer_guest(false));
    library.role = Some(ROLE_LIBRARY.to_string());
    let mut first = contract(CALLER, caller_guest(&CALLEE));
    first.role = Some("alpha".to_string());
    let mut second = contract(CALLER_B, caller_guest(&CALLEE));
    second.role = Some("beta".to_string());
    let harness = Harness::new(vec![library, first, second]);

    harness.run(CALLER, false).unwrap();
    assert_eq!(harness.stored(CALLER, 2), Some(word(42).to_vec()));
    assert_eq!(harness.stored(CALLER_B, 2), None);

    harness.run(CALLER_B, false).unwrap();
    assert_eq!(harness.stored(CALLER_B, 2), Some(word(42).to_vec()));
    assert_eq!(harness.stored(CALLEE, 2), None);
}

#[test]
fn test_out_of_gas_is_fatal() {
    let spin = wat::parse_str(
        r#"(module
  (memory (export "memory") 1)
  (func (export "main") (loop (br 0))))"#,
    )
    .unwrap();
    let harness = Harness::new(vec![contract(CALLEE, spin)]);
    let err = harness.run(CALLEE, false).unwrap_err();
    assert!(matches!(err, VmError::OutOfGas { .. }));
}

#[test]
fn test_cosmwasm_error_reverts() {
    let mut cw = contract(CALLEE, cosmwasm_guest(br#"{"error":"boom"}"#));
    cw.system_deps = vec![SystemDep::new(CW_ENV_8)];
    let harness = Harness::new(vec![cw]);
    let result = harness.run(CALLEE, false).unwrap();
    assert_eq!(result.code, CallCode::Revert);
    assert_eq!(result.data, b"cw_execute_error: boom".to_vec());
}

#[test]
fn test_cosmwasm_malformed_result_reverts() {
    let mut cw = contract(CALLEE, cosmwasm_guest(b"not json"));
    cw.system_deps = vec![SystemDep::new(CW_ENV_8)];
    let harness = Harness::new(vec![cw]);
    let result = harness.run(CALLEE, false).unwrap();
    assert_eq!(result.code, CallCode::Revert);
    assert!(result.data.starts_with(b"cw_execute_error: invalid result"));

    let mut cw = contract(CALLEE, cosmwasm_guest(br#"{"ok":{"data":"!!"}}"#));
    cw.system_deps = vec![SystemDep::new(CW_ENV_8)];
    let harness = Harness::new(vec![cw]);
    let result = harness.run(CALLEE, false).unwrap();
    assert_eq!(result.code, CallCode::Revert);
    assert!(result.data.starts_with(b"cw_execute_error: "));
}

#[test]
fn test_cosmwasm_response_becomes_events() {
    let response = br#"{"ok":{"messages":[],"attributes":[{"key":"action","value":"mint"}],"events":[{"type":"transfer","attributes":[{"key":"amount","value":"5"}]}],"data":"aGk="}}"#;
    let mut cw = contract(CALLEE, cosmwasm_guest(response));
    cw.system_deps = vec![SystemDep::new(CW_ENV_8)];
    let harness = Harness::new(vec![cw]);
    let result = harness.run(CALLEE, false).unwrap();
    assert_eq!(result.code, CallCode::Success);
    assert_eq!(result.data, b"hi".to_vec());
    let types: Vec<_> = result.events.iter().map(|e| e.ty.as_str()).collect();
    assert_eq!(types, vec!["wasm", "wasm-transfer"]);
    assert_eq!(result.events[0].attributes[0].value, "mint");
}

/// Helper: WASI guest storing "v" under "k", loading it back as finish
/// data, then exiting with `exit_code`.
fn wasi_guest(exit_code: i32) -> Vec<u8> {
    wat::parse_str(format!(
        r#"(module
  (import "wasmx" "storageStore" (func $store (param i32 i32 i32 i32)))
  (import "wasmx" "storageLoad" (func $load (param i32 i32) (result i64)))
  (import "wasmx" "setFinishData" (func $finish_data (param i32 i32)))
  (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 1024))
  (data (i32.const 0) "kv")
  (func (export "alloc") (param $size i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $size)))
    (local.get $ptr))
  (func (export "_start")
    (local $packed i64)
    (call $store (i32.const 0) (i32.const 1) (i32.const 1) (i32.const 1))
    (local.set $packed (call $load (i32.const 0) (i32.const 1)))
    (call $finish_data
      (i32.wrap_i64 (i64.shr_u (local.get $packed) (i64.const 32)))
      (i32.wrap_i64 (local.get $packed)))
    (call $exit (i32.const {exit_code}))))"#
    ))
    .unwrap()
}

fn wasi_contract(bytecode: Vec<u8>) -> ContractDependency {
    let mut dep = contract(CALLEE, bytecode);
    dep.system_deps = vec![
        SystemDep::new(WASI_SNAPSHOT_PREVIEW1),
        SystemDep::new(WASMX_WASI_RUST_1),
    ];
    dep
}

fn stored_raw(harness: &Harness, key: &[u8]) -> Option<Vec<u8>> {
    PrefixStore::for_contract(
        harness.store.clone(),
        StorageClassification::Unclassified,
        &CALLEE,
    )
    .get(key)
    .unwrap()
}

#[test]
fn test_wasi_program_finishes_and_commits() {
    let harness = Harness::new(vec![wasi_contract(wasi_guest(0))]);
    let result = harness.run(CALLEE, false).unwrap();
    assert_eq!(result.code, CallCode::Success);
    assert_eq!(result.data, b"v".to_vec());
    assert_eq!(stored_raw(&harness, b"k"), Some(b"v".to_vec()));
}

#[test]
fn test_wasi_nonzero_exit_reverts() {
    let harness = Harness::new(vec![wasi_contract(wasi_guest(3))]);
    let result = harness.run(CALLEE, false).unwrap();
    assert_eq!(result.code, CallCode::Revert);
    assert_eq!(result.data, b"v".to_vec());
    assert_eq!(stored_raw(&harness, b"k"), None);
}

/// Helper: system-call guest that writes "v" under `word(2)`, calls
/// `target`, then finishes with what it reads back under the same key.
fn syscall_caller_guest(target: &Address) -> Vec<u8> {
    wat::parse_str(format!(
        r#"(module
  (import "wasmx" "storageStore" (func $store (param i32 i32 i32 i32)))
  (import "wasmx" "storageLoad" (func $load (param i32 i32) (result i64)))
  (import "wasmx" "callClassic" (func $call (param i64 i32 i32 i64 i32 i32) (result i64)))
  (import "wasmx" "setFinishData" (func $finish_data (param i32 i32)))
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 1024))
  (data (i32.const 0) "{key}")
  (data (i32.const 32) "v")
  (data (i32.const 64) "{target}")
  (func (export "alloc") (param $size i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $size)))
    (local.get $ptr))
  (func (export "_start")
    (local $packed i64)
    (call $store (i32.const 0) (i32.const 32) (i32.const 32) (i32.const 1))
    (drop (call $call (i64.const 1000000) (i32.const 64) (i32.const 20)
      (i64.const 0) (i32.const 0) (i32.const 0)))
    (local.set $packed (call $load (i32.const 0) (i32.const 32)))
    (call $finish_data
      (i32.wrap_i64 (i64.shr_u (local.get $packed) (i64.const 32)))
      (i32.wrap_i64 (local.get $packed)))))"#,
        key = wat_bytes(&word(2)),
        target = wat_bytes(target)
    ))
    .unwrap()
}

#[test]
fn test_failed_nested_call_leaves_syscall_storage() {
    let mut library = contract(CALLEE, storer_guest(true));
    library.role = Some(ROLE_LIBRARY.to_string());
    let mut caller = contract(CALLER, syscall_caller_guest(&CALLEE));
    caller.role = Some("alpha".to_string());
    caller.system_deps = vec![
        SystemDep::new(WASI_SNAPSHOT_PREVIEW1),
        SystemDep::new(WASMX_WASI_RUST_1),
    ];
    let harness = Harness::new(vec![library, caller]);

    let result = harness.run(CALLER, false).unwrap();
    assert_eq!(result.code, CallCode::Success);
    assert_eq!(result.data, b"v".to_vec());
    assert_eq!(harness.stored(CALLER, 2), Some(b"v".to_vec()));
}

const KV_CONNECT: &[u8] = br#"{"driver":"memdb","dir":"/tmp/","name":"index","id":"db"}"#;
const KV_SET: &[u8] = br#"{"id":"db","key":"aw==","value":"dg=="}"#;
const KV_GET: &[u8] = br#"{"id":"db","key":"aw=="}"#;

fn packed(offset: u32, data: &[u8]) -> i64 {
    ((offset as u64) << 32 | data.len() as u64) as i64
}

/// Helper: guest connecting to a database, writing `k` = `v` and finishing
/// with the JSON answer of reading `k` back.
fn kvdb_guest() -> Vec<u8> {
    wat::parse_str(format!(
        r#"(module
  (import "kvdb" "Connect" (func $connect (param i64) (result i64)))
  (import "kvdb" "Set" (func $set (param i64) (result i64)))
  (import "kvdb" "Get" (func $get (param i64) (result i64)))
  (import "wasmx" "setFinishData" (func $finish_data (param i32 i32)))
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 1024))
  (data (i32.const 0) "{connect}")
  (data (i32.const 128) "{set}")
  (data (i32.const 256) "{get}")
  (func (export "alloc") (param $size i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $size)))
    (local.get $ptr))
  (func (export "_start")
    (local $packed i64)
    (drop (call $connect (i64.const {connect_ptr})))
    (drop (call $set (i64.const {set_ptr})))
    (local.set $packed (call $get (i64.const {get_ptr})))
    (call $finish_data
      (i32.wrap_i64 (i64.shr_u (local.get $packed) (i64.const 32)))
      (i32.wrap_i64 (local.get $packed)))))"#,
        connect = wat_bytes(KV_CONNECT),
        set = wat_bytes(KV_SET),
        get = wat_bytes(KV_GET),
        connect_ptr = packed(0, KV_CONNECT),
        set_ptr = packed(128, KV_SET),
        get_ptr = packed(256, KV_GET),
    ))
    .unwrap()
}

fn kvdb_contract(role: Option<&str>) -> ContractDependency {
    let mut dep = contract(CALLER, kvdb_guest());
    dep.role = role.map(str::to_string);
    dep.storage_type = StorageClassification::SingleConsensus;
    dep.system_deps = vec![
        SystemDep::new(WASMX_KVDB_I64_1),
        SystemDep::new(WASI_SNAPSHOT_PREVIEW1),
        SystemDep::new(WASMX_WASI_RUST_1),
    ];
    dep
}

fn database_value(harness: &Harness, key: &[u8]) -> Option<Vec<u8>> {
    let connection = DatabaseRegistry::connection_id(&CALLER, "db");
    harness
        .engine
        .databases()
        .with_store(&connection, |store| store.get(key))
        .unwrap()
}

#[test]
fn test_database_writes_commit_with_the_transaction() {
    let harness = Harness::new(vec![kvdb_contract(Some("indexer"))]);
    let result = harness.run(CALLER, false).unwrap();
    assert_eq!(result.code, CallCode::Success);
    assert_eq!(result.data, br#"{"error":"","value":"dg=="}"#.to_vec());
    assert_eq!(database_value(&harness, b"k"), Some(b"v".to_vec()));
}

#[test]
fn test_database_writes_in_queries_are_dropped() {
    let harness = Harness::new(vec![kvdb_contract(Some("indexer"))]);
    let result = harness.run(CALLER, true).unwrap();
    assert_eq!(result.code, CallCode::Success);
    assert_eq!(result.data, br#"{"error":"","value":"dg=="}"#.to_vec());
    assert_eq!(database_value(&harness, b"k"), None);
}

#[test]
fn test_database_mock_for_contracts_without_role() {
    let harness = Harness::new(vec![kvdb_contract(None)]);
    let result = harness.run(CALLER, false).unwrap();
    assert_eq!(result.code, CallCode::Success);
    assert_eq!(result.data, br#"{"error":"","value":""}"#.to_vec());
    assert!(harness.engine.databases().is_empty());
}
