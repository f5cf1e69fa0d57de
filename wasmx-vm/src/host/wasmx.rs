//! The native `wasmx` namespace.
//!
//! [`CORE_FUNCTIONS`] is the storage, log and return-data surface every
//! native contract gets; [`EXTENDED_FUNCTIONS`] adds environment queries,
//! nested calls, deployment, crypto, address codecs and the cosmos bridge.

use tracing::{debug, error, info};

use wasmx_crypto::hash::{keccak256, sha256};
use wasmx_crypto::keys::{self, Keypair};
use wasmx_crypto::merkle::merkle_hash;
use wasmx_storage::traits::KvStore;
use wasmx_types::constants::DEFAULT_SYS_DEP;
use wasmx_types::primitives::{
    address_to_word, amount_from_be, amount_to_word, cleanup_address, pad_left_32,
};
use wasmx_types::wire::{
    AccountJson, AddressPrefixedRequest, CallRequestJson, CallResponseJson, ChainEvent,
    Create2AccountRequestJson, CreateAccountRequestJson, DeployRequest,
    InstantiateAccountRequest, InstantiateAccountResponse, LoggerRequest, MerkleSlices,
    StoragePair, StoragePairs, StorageRange, StorageValues, VerifyTxResponse, WasmxLog,
    WasmxLogJson,
};

use super::{HostCall, HostFnSpec};
use crate::chain::InstantiateRequest;
use crate::error::VmError;
use crate::router;
use crate::value::{HostOutcome, HostVal, Kind};

const P: Kind = Kind::Ptr;

/// Maximum topics on one log.
pub const MAX_LOG_TOPICS: usize = 4;

pub static CORE_FUNCTIONS: &[HostFnSpec] = &[
    HostFnSpec::new("getCallData", &[], &[P], get_call_data),
    HostFnSpec::new("getCaller", &[], &[P], get_caller),
    HostFnSpec::new("getAddress", &[], &[P], get_address),
    HostFnSpec::new("storageLoad", &[P], &[P], storage_load),
    HostFnSpec::new("storageStore", &[P, P], &[], storage_store),
    HostFnSpec::new("storageDelete", &[P], &[], storage_delete),
    HostFnSpec::new("storageDeleteRange", &[P], &[], storage_delete_range),
    HostFnSpec::new("storageLoadRange", &[P], &[P], storage_load_range),
    HostFnSpec::new("storageLoadRangePairs", &[P], &[P], storage_load_range_pairs),
    HostFnSpec::new("log", &[P], &[], log),
    HostFnSpec::new("getReturnData", &[], &[P], get_return_data),
    HostFnSpec::new("getFinishData", &[], &[P], get_finish_data),
    HostFnSpec::new("setFinishData", &[P], &[], set_finish_data),
    HostFnSpec::new("setReturnData", &[P], &[], set_finish_data),
    HostFnSpec::new("finish", &[P], &[], finish),
    HostFnSpec::new("revert", &[P], &[], revert),
];

pub static EXTENDED_FUNCTIONS: &[HostFnSpec] = &[
    HostFnSpec::new("sha256", &[P], &[P], sha256_fn),
    HostFnSpec::new("getEnv", &[], &[P], get_env),
    HostFnSpec::new("getChainId", &[], &[P], get_chain_id),
    HostFnSpec::new("getCurrentBlock", &[], &[P], get_current_block),
    HostFnSpec::new("getBlockHash", &[P], &[P], get_block_hash),
    HostFnSpec::new("getAccount", &[P], &[P], get_account),
    HostFnSpec::new("getBalance", &[P], &[P], get_balance),
    HostFnSpec::new("call", &[P], &[P], wasmx_call),
    HostFnSpec::new("keccak256", &[P], &[P], keccak256_fn),
    HostFnSpec::new("createAccountInterpreted", &[P], &[P], create_account_interpreted),
    HostFnSpec::new("create2AccountInterpreted", &[P], &[P], create2_account_interpreted),
    HostFnSpec::new("createAccount", &[P], &[P], create_account),
    HostFnSpec::new("create2Account", &[P], &[P], create2_account),
    HostFnSpec::new("MerkleHash", &[P], &[P], merkle_hash_fn),
    HostFnSpec::new("LoggerInfo", &[P], &[], logger_info),
    HostFnSpec::new("LoggerError", &[P], &[], logger_error),
    HostFnSpec::new("LoggerDebug", &[P], &[], logger_debug),
    HostFnSpec::new("LoggerDebugExtended", &[P], &[], logger_debug_extended),
    HostFnSpec::new("ed25519Sign", &[P, P], &[P], ed25519_sign),
    HostFnSpec::new("ed25519Verify", &[P, P, P], &[Kind::I32], ed25519_verify),
    HostFnSpec::new("ed25519PubToHex", &[P], &[P], ed25519_pub_to_hex),
    HostFnSpec::new("validate_bech32_address", &[P], &[P], validate_bech32_address),
    HostFnSpec::new("addr_humanize", &[P], &[P], addr_humanize),
    HostFnSpec::new("addr_canonicalize", &[P], &[P], addr_canonicalize),
    HostFnSpec::new("addr_equivalent", &[P, P], &[Kind::I32], addr_equivalent),
    HostFnSpec::new("addr_humanize_mc", &[P, P], &[P], addr_humanize_mc),
    HostFnSpec::new("addr_canonicalize_mc", &[P], &[P], addr_canonicalize_mc),
    HostFnSpec::new("getAddressByRole", &[P], &[P], get_address_by_role),
    HostFnSpec::new("getRoleByAddress", &[P], &[P], get_role_by_address),
    HostFnSpec::new("executeCosmosMsg", &[P], &[P], execute_cosmos_msg),
    HostFnSpec::new("decodeCosmosTxToJson", &[P], &[P], decode_cosmos_tx_to_json),
    HostFnSpec::new("verifyCosmosTx", &[P], &[P], verify_cosmos_tx),
    HostFnSpec::new("emitCosmosEvents", &[P], &[], emit_cosmos_events),
];

// ─── Core ───────────────────────────────────────────────────────────────────

fn get_call_data(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let data = call.env().current_call.call_data.clone();
    call.ret_bytes(&data)
}

fn get_caller(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let word = address_to_word(&call.env().current_call.sender);
    call.ret_bytes(&word)
}

fn get_address(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let word = address_to_word(&call.env().contract.address);
    call.ret_bytes(&word)
}

fn storage_load(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let key = call.read(args[0])?;
    let value = call.state().storage.get(&key)?.unwrap_or_default();
    call.charge(call.session().config().gas.byte_read * value.len() as u64)?;
    call.ret_bytes(&value)
}

fn storage_store(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let key = call.read(args[0])?;
    let value = call.read(args[1])?;
    call.charge(call.session().config().gas.sstore)?;
    call.state().storage.put(&key, &value)?;
    Ok(HostOutcome::none())
}

fn storage_delete(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let key = call.read(args[0])?;
    call.state().storage.delete(&key)?;
    Ok(HostOutcome::none())
}

/// Empty bounds are open.
fn bound(key: &[u8]) -> Option<&[u8]> {
    (!key.is_empty()).then_some(key)
}

fn storage_delete_range(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let range: StorageRange = call.read_json(args[0])?;
    call.state()
        .storage
        .delete_range(bound(&range.start_key), bound(&range.end_key))?;
    Ok(HostOutcome::none())
}

fn load_range(
    call: &mut HostCall<'_, '_>,
    range: &StorageRange,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, VmError> {
    let pairs = call.state().storage.range(
        bound(&range.start_key),
        bound(&range.end_key),
        range.reverse,
    )?;
    let bytes: u64 = pairs.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum();
    call.charge(call.session().config().gas.byte_read * bytes)?;
    Ok(pairs)
}

fn storage_load_range(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let range: StorageRange = call.read_json(args[0])?;
    let values = load_range(call, &range)?
        .into_iter()
        .map(|(_, value)| value)
        .collect();
    call.ret_json(&StorageValues { values })
}

fn storage_load_range_pairs(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let range: StorageRange = call.read_json(args[0])?;
    let values = load_range(call, &range)?
        .into_iter()
        .map(|(key, value)| StoragePair { key, value })
        .collect();
    call.ret_json(&StoragePairs { values })
}

fn log(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let entry: WasmxLogJson = call.read_json(args[0])?;
    if entry.topics.len() > MAX_LOG_TOPICS {
        return Err(VmError::ContractError {
            reason: format!("log has {} topics, at most {MAX_LOG_TOPICS}", entry.topics.len()),
        });
    }
    let env = call.env();
    let log = WasmxLog {
        contract_address: env.contract.address,
        system_dependency: env
            .contract
            .system_deps
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_SYS_DEP.to_string()),
        log_type: if entry.log_type.is_empty() {
            "wasmx".to_string()
        } else {
            entry.log_type
        },
        data: entry.data,
        topics: entry.topics.iter().map(|t| pad_left_32(t)).collect(),
    };
    let max_logs = call.session().config().max_logs;
    call.state_mut().effects.push_log(log, max_logs)?;
    Ok(HostOutcome::none())
}

fn get_return_data(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let data = call.state().effects.return_data.clone();
    call.ret_bytes(&data)
}

fn get_finish_data(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let data = call.state().effects.finish_data.clone();
    call.ret_bytes(&data)
}

fn set_finish_data(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let data = call.read(args[0])?;
    call.state_mut().effects.finish_data = data;
    Ok(HostOutcome::none())
}

fn finish(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let data = call.read(args[0])?;
    let effects = &mut call.state_mut().effects;
    effects.finish_data = data.clone();
    effects.return_data = data.clone();
    Ok(HostOutcome::Finish(data))
}

fn revert(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let data = call.read(args[0])?;
    let effects = &mut call.state_mut().effects;
    effects.finish_data = data.clone();
    effects.return_data = data.clone();
    Ok(HostOutcome::Revert(data))
}

// ─── Environment ────────────────────────────────────────────────────────────

fn sha256_fn(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let data = call.read(args[0])?;
    call.ret_bytes(&sha256(&data))
}

fn keccak256_fn(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let data = call.read(args[0])?;
    call.ret_bytes(&keccak256(&data))
}

fn get_env(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let env = call.env().to_guest_json(call.session().codec())?;
    call.ret_json(&env)
}

fn get_chain_id(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let chain_id = call.env().chain.chain_id_full.clone();
    call.ret_bytes(chain_id.as_bytes())
}

fn get_current_block(
    call: &mut HostCall<'_, '_>,
    _args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let env = call.env().to_guest_json(call.session().codec())?;
    call.ret_json(&env["block"])
}

fn get_block_hash(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let height = amount_from_be(&call.read(args[0])?);
    let height = u64::try_from(height).unwrap_or(u64::MAX);
    let hash = call.session().chain().block_hash(height);
    call.ret_bytes(&hash)
}

fn get_account(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let address = cleanup_address(&call.read(args[0])?);
    let session = call.session();
    let chain = session.chain();
    let account = AccountJson {
        address: address.to_vec(),
        code_hash: chain.code_hash(&address).to_vec(),
        bytecode: chain.code(&address),
        balance: amount_to_word(chain.balance(&address, &session.env.chain.denom)?).to_vec(),
    };
    call.ret_json(&account)
}

fn get_balance(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let address = cleanup_address(&call.read(args[0])?);
    let session = call.session();
    let balance = session.chain().balance(&address, &session.env.chain.denom)?;
    call.ret_bytes(&amount_to_word(balance))
}

// ─── Calls and Deployment ───────────────────────────────────────────────────

fn wasmx_call(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let request: CallRequestJson = call.read_json(args[0])?;
    let from = call.env().contract.address;
    let response = router::call_with_funds(call.state_mut(), request.into_request(from))?;
    call.state_mut().effects.return_data = response.data.clone();
    call.ret_json(&CallResponseJson::from(response))
}

fn deploy(
    call: &mut HostCall<'_, '_>,
    bytecode: Vec<u8>,
    balance: &[u8],
    salt: Option<[u8; 32]>,
) -> Result<HostOutcome, VmError> {
    let request = DeployRequest {
        creator: call.env().contract.address,
        bytecode,
        balance: amount_from_be(balance),
        salt,
        interpreter: None,
    };
    let address = call.session().chain().deploy(request)?;
    call.ret_bytes(&address_to_word(&address))
}

fn create_account_interpreted(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let request: CreateAccountRequestJson = call.read_json(args[0])?;
    deploy(call, request.bytecode, &request.balance, None)
}

fn create2_account_interpreted(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let request: Create2AccountRequestJson = call.read_json(args[0])?;
    let salt = pad_left_32(&request.salt);
    deploy(call, request.bytecode, &request.balance, Some(salt))
}

fn instantiate(
    call: &mut HostCall<'_, '_>,
    request: InstantiateAccountRequest,
    deterministic: bool,
) -> Result<HostOutcome, VmError> {
    let session = call.session();
    let address = session.chain().instantiate_code(InstantiateRequest {
        creator: session.env.contract.address,
        code_id: request.code_id,
        msg: request.msg,
        funds: request.funds,
        label: request.label,
        salt: deterministic.then_some(request.salt),
    })?;
    let address = session.codec().bytes_to_string(&address)?;
    call.ret_json(&InstantiateAccountResponse { address })
}

fn create_account(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let request: InstantiateAccountRequest = call.read_json(args[0])?;
    instantiate(call, request, false)
}

fn create2_account(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let request: InstantiateAccountRequest = call.read_json(args[0])?;
    instantiate(call, request, true)
}

// ─── Crypto ─────────────────────────────────────────────────────────────────

fn merkle_hash_fn(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let request: MerkleSlices = call.read_json(args[0])?;
    call.ret_bytes(&merkle_hash(&request.slices))
}

fn ed25519_sign(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let private_key = call.read(args[0])?;
    let message = call.read(args[1])?;
    let signature = Keypair::from_private_key(&private_key)?.sign(&message);
    call.ret_bytes(&signature)
}

fn ed25519_verify(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let pubkey = call.read(args[0])?;
    let signature = call.read(args[1])?;
    let message = call.read(args[2])?;
    let valid = keys::verify(&message, &signature, &pubkey).is_ok();
    Ok(HostOutcome::i32(valid as i32))
}

fn ed25519_pub_to_hex(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let pubkey = call.read(args[0])?;
    let digest = sha256(&pubkey);
    call.ret_bytes(&digest[..20])
}

// ─── Addresses ──────────────────────────────────────────────────────────────

fn validate_bech32_address(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let value = String::from_utf8_lossy(&call.read(args[0])?).into_owned();
    let valid = call.session().codec().string_to_bytes_any_prefix(&value).is_ok();
    Ok(call.ret_ptr_int(valid as i32))
}

fn addr_humanize(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let address = cleanup_address(&call.read(args[0])?);
    let human = call.session().codec().bytes_to_string(&address)?;
    call.ret_bytes(human.as_bytes())
}

fn canonical(call: &mut HostCall<'_, '_>, ptr: HostVal) -> Result<(String, [u8; 20]), VmError> {
    let value = String::from_utf8_lossy(&call.read(ptr)?).into_owned();
    Ok(call.session().codec().string_to_bytes_any_prefix(&value)?)
}

fn addr_canonicalize(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let (_, address) = canonical(call, args[0])?;
    call.ret_bytes(&address)
}

fn addr_equivalent(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let (_, first) = canonical(call, args[0])?;
    let (_, second) = canonical(call, args[1])?;
    Ok(HostOutcome::i32((first == second) as i32))
}

fn addr_humanize_mc(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let address = cleanup_address(&call.read(args[0])?);
    let prefix = String::from_utf8_lossy(&call.read(args[1])?).into_owned();
    let human = call
        .session()
        .codec()
        .bytes_to_string_with_prefix(&address, &prefix)?;
    call.ret_bytes(human.as_bytes())
}

fn addr_canonicalize_mc(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let (prefix, address) = canonical(call, args[0])?;
    call.ret_json(&AddressPrefixedRequest {
        bz: address.to_vec(),
        prefix,
    })
}

fn get_address_by_role(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let role = String::from_utf8_lossy(&call.read(args[0])?).into_owned();
    let address = call
        .session()
        .chain()
        .address_by_role(&role)?
        .ok_or_else(|| VmError::chain(format!("no contract with role {role}")))?;
    call.ret_bytes(&address)
}

fn get_role_by_address(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let address = cleanup_address(&call.read(args[0])?);
    let role = call.session().chain().role_by_address(&address);
    call.ret_bytes(role.as_bytes())
}

// ─── Cosmos Bridge ──────────────────────────────────────────────────────────

fn execute_cosmos_msg(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let msg = call.read(args[0])?;
    let sender = call.env().contract.address;
    let result = call.session().chain().execute_cosmos_msg(&sender, &msg);
    let response = match result {
        Ok((events, _)) => {
            let max_events = call.session().config().max_events;
            call.state_mut().effects.push_events(events, max_events)?;
            CallResponseJson {
                success: 0,
                data: Vec::new(),
            }
        }
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => CallResponseJson {
            success: 1,
            data: err.to_string().into_bytes(),
        },
    };
    call.ret_json(&response)
}

fn decode_cosmos_tx_to_json(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let tx = call.read(args[0])?;
    let json = call.session().chain().decode_cosmos_tx(&tx)?;
    call.ret_bytes(&json)
}

fn verify_cosmos_tx(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let tx = call.read(args[0])?;
    let response = match call.session().chain().verify_cosmos_tx(&tx) {
        Ok(valid) => VerifyTxResponse {
            valid,
            error: String::new(),
        },
        Err(err) => VerifyTxResponse {
            valid: false,
            error: err.to_string(),
        },
    };
    call.ret_json(&response)
}

fn emit_cosmos_events(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let events: Vec<ChainEvent> = call.read_json(args[0])?;
    let max_events = call.session().config().max_events;
    call.state_mut().effects.push_events(events, max_events)?;
    Ok(HostOutcome::none())
}

// ─── Logging ────────────────────────────────────────────────────────────────

fn logger_request(call: &mut HostCall<'_, '_>, ptr: HostVal) -> Result<(String, String), VmError> {
    let request: LoggerRequest = call.read_json(ptr)?;
    Ok((request.msg, request.parts.join(" ")))
}

fn contract_hex(call: &HostCall<'_, '_>) -> String {
    hex::encode(call.env().contract.address)
}

fn logger_info(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let (msg, parts) = logger_request(call, args[0])?;
    info!(contract = %contract_hex(call), parts = %parts, "{msg}");
    Ok(HostOutcome::none())
}

fn logger_error(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let (msg, parts) = logger_request(call, args[0])?;
    error!(contract = %contract_hex(call), parts = %parts, "{msg}");
    Ok(HostOutcome::none())
}

fn logger_debug(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let (msg, parts) = logger_request(call, args[0])?;
    debug!(contract = %contract_hex(call), parts = %parts, "{msg}");
    Ok(HostOutcome::none())
}

fn logger_debug_extended(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let (msg, parts) = logger_request(call, args[0])?;
    debug!(
        chain_id = %call.env().chain.chain_id_full,
        contract = %contract_hex(call),
        parts = %parts,
        "{msg}"
    );
    Ok(HostOutcome::none())
}
