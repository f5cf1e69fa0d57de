//! The CosmWasm dialect (`interface_version_8`), imported as `env`.
//!
//! Every pointer argument designates a [`Region`](crate::region::Region).

use tracing::debug;

use wasmx_crypto::error::CryptoError;
use wasmx_crypto::{keys, secp};
use wasmx_storage::traits::KvStore;
use wasmx_types::primitives::cleanup_address;

use super::{HostCall, HostFnSpec};
use crate::error::VmError;
use crate::region::{decode_sections, encode_sections, read_region, Region};
use crate::value::{HostOutcome, HostVal, Kind};

const I32: Kind = Kind::I32;

const KI: usize = 1024;
const MI: usize = 1024 * KI;

pub const MAX_LENGTH_DB_KEY: usize = 64 * KI;
pub const MAX_LENGTH_DB_VALUE: usize = 128 * KI;
pub const MAX_LENGTH_CANONICAL_ADDRESS: usize = 64;
pub const MAX_LENGTH_HUMAN_ADDRESS: usize = 256;
pub const MAX_LENGTH_QUERY_CHAIN_REQUEST: usize = 64 * KI;
pub const MAX_LENGTH_ED25519_MESSAGE: usize = 128 * KI;
pub const MAX_LENGTH_ED25519_SIGNATURE: usize = 64;
pub const MAX_COUNT_ED25519_BATCH: usize = 256;
pub const MAX_LENGTH_DEBUG: usize = 2 * MI;
pub const MAX_LENGTH_ABORT: usize = 2 * MI;
const MAX_LENGTH_HASH: usize = 32;
const MAX_LENGTH_SECP256K1_SIGNATURE: usize = 64;
const MAX_LENGTH_PUBKEY: usize = 65;
const MAX_LENGTH_ED25519_PUBKEY: usize = 32;

/// `db_scan` orderings.
pub const ORDER_ASCENDING: i32 = 1;
pub const ORDER_DESCENDING: i32 = 2;

/// Crypto result codes.
const VERIFY_VALID: i32 = 0;
const VERIFY_INVALID: i32 = 1;
const ERR_INVALID_HASH_FORMAT: u32 = 3;
const ERR_INVALID_SIGNATURE_FORMAT: u32 = 4;
const ERR_INVALID_PUBKEY_FORMAT: u32 = 5;
const ERR_BATCH: u32 = 7;
const ERR_GENERIC: u32 = 10;

pub static FUNCTIONS: &[HostFnSpec] = &[
    HostFnSpec::new("db_read", &[I32], &[I32], db_read),
    HostFnSpec::new("db_write", &[I32, I32], &[], db_write),
    HostFnSpec::new("db_remove", &[I32], &[], db_remove),
    HostFnSpec::new("db_scan", &[I32, I32, I32], &[I32], db_scan),
    HostFnSpec::new("db_next", &[I32], &[I32], db_next),
    HostFnSpec::new("addr_validate", &[I32], &[I32], addr_validate),
    HostFnSpec::new("addr_canonicalize", &[I32, I32], &[I32], addr_canonicalize),
    HostFnSpec::new("addr_humanize", &[I32, I32], &[I32], addr_humanize),
    HostFnSpec::new("secp256k1_verify", &[I32, I32, I32], &[I32], secp256k1_verify),
    HostFnSpec::new(
        "secp256k1_recover_pubkey",
        &[I32, I32, I32],
        &[Kind::I64],
        secp256k1_recover_pubkey,
    ),
    HostFnSpec::new("ed25519_verify", &[I32, I32, I32], &[I32], ed25519_verify),
    HostFnSpec::new("ed25519_batch_verify", &[I32, I32, I32], &[I32], ed25519_batch_verify),
    HostFnSpec::new("debug", &[I32], &[], debug_fn),
    HostFnSpec::new("query_chain", &[I32], &[I32], query_chain),
    HostFnSpec::new("abort", &[I32], &[], abort),
];

// ─── Region Helpers ─────────────────────────────────────────────────────────

fn region_ptr(value: HostVal) -> Result<u32, VmError> {
    Ok(value.as_i32()? as u32)
}

fn read(call: &mut HostCall<'_, '_>, ptr: HostVal, max_len: usize) -> Result<Vec<u8>, VmError> {
    let ptr = region_ptr(ptr)?;
    read_region(call.mem(), ptr, max_len)
}

/// Allocate a region holding `data` and return its pointer.
fn alloc_region(call: &mut HostCall<'_, '_>, data: &[u8]) -> Result<i32, VmError> {
    Ok(crate::region::write_new_region(call.mem(), data)? as i32)
}

/// Error message handed back as a region pointer.
fn error_region(call: &mut HostCall<'_, '_>, message: &str) -> Result<HostOutcome, VmError> {
    let ptr = alloc_region(call, message.as_bytes())?;
    Ok(HostOutcome::i32(ptr))
}

fn crypto_code(err: &CryptoError) -> u32 {
    match err {
        CryptoError::InvalidHashLength { .. } => ERR_INVALID_HASH_FORMAT,
        CryptoError::InvalidSignatureFormat { .. } => ERR_INVALID_SIGNATURE_FORMAT,
        CryptoError::InvalidKeyMaterial { .. } => ERR_INVALID_PUBKEY_FORMAT,
        CryptoError::BatchLengthMismatch { .. } => ERR_BATCH,
        CryptoError::VerificationFailed { .. } | CryptoError::RecoveryFailed { .. } => ERR_GENERIC,
    }
}

/// Map a verification result to `0` valid, `1` invalid, larger on error.
fn verify_code(result: Result<(), CryptoError>) -> i32 {
    match result {
        Ok(()) => VERIFY_VALID,
        Err(CryptoError::VerificationFailed { .. }) => VERIFY_INVALID,
        Err(err) => crypto_code(&err) as i32,
    }
}

// ─── Storage ────────────────────────────────────────────────────────────────

fn db_read(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let key = read(call, args[0], MAX_LENGTH_DB_KEY)?;
    let Some(value) = call.state().storage.get(&key)? else {
        return Ok(HostOutcome::i32(0));
    };
    call.charge(call.session().config().gas.byte_read * value.len() as u64)?;
    let ptr = alloc_region(call, &value)?;
    Ok(HostOutcome::i32(ptr))
}

fn db_write(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    if call.env().current_call.read_only {
        return Err(VmError::ContractError {
            reason: "db_write in a read-only context".to_string(),
        });
    }
    let key = read(call, args[0], MAX_LENGTH_DB_KEY)?;
    let value = read(call, args[1], MAX_LENGTH_DB_VALUE)?;
    call.charge(call.session().config().gas.sstore)?;
    call.state().storage.put(&key, &value)?;
    Ok(HostOutcome::none())
}

fn db_remove(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    if call.env().current_call.read_only {
        return Err(VmError::ContractError {
            reason: "db_remove in a read-only context".to_string(),
        });
    }
    let key = read(call, args[0], MAX_LENGTH_DB_KEY)?;
    call.state().storage.delete(&key)?;
    Ok(HostOutcome::none())
}

/// A null region pointer is an open bound.
fn optional_bound(call: &mut HostCall<'_, '_>, ptr: HostVal) -> Result<Option<Vec<u8>>, VmError> {
    if region_ptr(ptr)? == 0 {
        return Ok(None);
    }
    read(call, ptr, MAX_LENGTH_DB_KEY).map(Some)
}

fn db_scan(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let start = optional_bound(call, args[0])?;
    let end = optional_bound(call, args[1])?;
    let reverse = match args[2].as_i32()? {
        ORDER_ASCENDING => false,
        ORDER_DESCENDING => true,
        other => {
            return Err(VmError::ContractError {
                reason: format!("invalid scan order {other}"),
            })
        }
    };
    let pairs = call
        .state()
        .storage
        .range(start.as_deref(), end.as_deref(), reverse)?;
    let bytes: u64 = pairs.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum();
    call.charge(call.session().config().gas.byte_read * bytes)?;
    let id = call.state_mut().effects.open_iterator(pairs);
    Ok(HostOutcome::i32(id))
}

/// Next pair as `key || len(key) || value || len(value)`. An exhausted
/// iterator yields two empty sections and is closed.
fn db_next(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let id = args[0].as_i32()?;
    let next = call.state_mut().effects.next_pair(id)?;
    let data = match next {
        Some((key, value)) => encode_sections(&[&key, &value]),
        None => encode_sections(&[&[], &[]]),
    };
    let ptr = alloc_region(call, &data)?;
    Ok(HostOutcome::i32(ptr))
}

// ─── Addresses ──────────────────────────────────────────────────────────────

fn canonicalize(call: &HostCall<'_, '_>, human: &[u8]) -> Result<[u8; 20], String> {
    if human.is_empty() {
        return Err("empty address".to_string());
    }
    if human.len() > MAX_LENGTH_HUMAN_ADDRESS {
        return Err("address too long".to_string());
    }
    let human = std::str::from_utf8(human).map_err(|_| "address is not utf-8".to_string())?;
    call.session()
        .codec()
        .string_to_bytes(human)
        .map_err(|e| format!("invalid address: {e}"))
}

fn addr_validate(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let human = read(call, args[0], MAX_LENGTH_HUMAN_ADDRESS)?;
    let canonical = match canonicalize(call, &human) {
        Ok(canonical) => canonical,
        Err(message) => return error_region(call, &message),
    };
    let normalized = call.session().codec().bytes_to_string(&canonical)?;
    if normalized.as_bytes() != human.as_slice() {
        return error_region(call, "address validation failed: not normalized");
    }
    Ok(HostOutcome::i32(0))
}

fn write_destination(
    call: &mut HostCall<'_, '_>,
    ptr: HostVal,
    data: &[u8],
) -> Result<HostOutcome, VmError> {
    let ptr = region_ptr(ptr)?;
    let mem = call.mem();
    let mut region = Region::load(mem, ptr)?;
    region.write(mem, data)?;
    Ok(HostOutcome::i32(0))
}

fn addr_canonicalize(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let human = read(call, args[0], MAX_LENGTH_HUMAN_ADDRESS)?;
    match canonicalize(call, &human) {
        Ok(canonical) => write_destination(call, args[1], &canonical),
        Err(message) => error_region(call, &message),
    }
}

fn addr_humanize(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let canonical = read(call, args[0], MAX_LENGTH_CANONICAL_ADDRESS)?;
    if canonical.is_empty() || canonical.len() > 32 {
        return error_region(call, "invalid canonical address length");
    }
    let human = call
        .session()
        .codec()
        .bytes_to_string(&cleanup_address(&canonical))?;
    write_destination(call, args[1], human.as_bytes())
}

// ─── Crypto ─────────────────────────────────────────────────────────────────

fn secp256k1_verify(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let hash = read(call, args[0], MAX_LENGTH_HASH)?;
    let signature = read(call, args[1], MAX_LENGTH_SECP256K1_SIGNATURE)?;
    let pubkey = read(call, args[2], MAX_LENGTH_PUBKEY)?;
    call.charge(call.session().config().gas.secp256k1_verify)?;
    Ok(HostOutcome::i32(verify_code(secp::verify(&hash, &signature, &pubkey))))
}

/// Region pointer in the low half on success, error code in the high half
/// on failure.
fn secp256k1_recover_pubkey(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let hash = read(call, args[0], MAX_LENGTH_HASH)?;
    let signature = read(call, args[1], MAX_LENGTH_SECP256K1_SIGNATURE)?;
    let recovery_param = args[2].as_i32()?;
    call.charge(call.session().config().gas.secp256k1_verify)?;
    match secp::recover(&hash, &signature, recovery_param) {
        Ok(pubkey) => {
            let ptr = alloc_region(call, &pubkey)? as u32;
            Ok(HostOutcome::i64(ptr as i64))
        }
        Err(err) => Ok(HostOutcome::i64(((crypto_code(&err) as u64) << 32) as i64)),
    }
}

fn ed25519_verify(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let message = read(call, args[0], MAX_LENGTH_ED25519_MESSAGE)?;
    let signature = read(call, args[1], MAX_LENGTH_ED25519_SIGNATURE)?;
    let pubkey = read(call, args[2], MAX_LENGTH_ED25519_PUBKEY)?;
    Ok(HostOutcome::i32(verify_code(keys::verify(&message, &signature, &pubkey))))
}

/// Lists are section-encoded, as produced for `db_next`.
fn ed25519_batch_verify(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let limit = (MAX_LENGTH_ED25519_MESSAGE + 4) * MAX_COUNT_ED25519_BATCH;
    let messages = decode_sections(&read(call, args[0], limit)?)?;
    let signatures = decode_sections(&read(call, args[1], limit)?)?;
    let pubkeys = decode_sections(&read(call, args[2], limit)?)?;
    if [messages.len(), signatures.len(), pubkeys.len()]
        .iter()
        .any(|n| *n > MAX_COUNT_ED25519_BATCH)
    {
        return Ok(HostOutcome::i32(ERR_BATCH as i32));
    }
    let messages: Vec<&[u8]> = messages.iter().map(Vec::as_slice).collect();
    let signatures: Vec<&[u8]> = signatures.iter().map(Vec::as_slice).collect();
    let pubkeys: Vec<&[u8]> = pubkeys.iter().map(Vec::as_slice).collect();
    let result = keys::batch_verify(&messages, &signatures, &pubkeys);
    Ok(HostOutcome::i32(verify_code(result)))
}

// ─── Misc ───────────────────────────────────────────────────────────────────

fn debug_fn(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let message = read(call, args[0], MAX_LENGTH_DEBUG)?;
    debug!(
        contract = %hex::encode(call.env().contract.address),
        "{}",
        String::from_utf8_lossy(&message)
    );
    Ok(HostOutcome::none())
}

/// The answer is a `SystemResult<ContractResult<Binary>>` JSON document.
fn query_chain(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let request = read(call, args[0], MAX_LENGTH_QUERY_CHAIN_REQUEST)?;
    let caller = call.env().contract.address;
    let answer = match call.session().chain().cw_query(&caller, &request) {
        Ok(data) => serde_json::json!({
            "ok": {
                "ok": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, data),
            }
        }),
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => serde_json::json!({ "ok": { "error": err.to_string() } }),
    };
    let ptr = alloc_region(call, &serde_json::to_vec(&answer)?)?;
    Ok(HostOutcome::i32(ptr))
}

fn abort(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let message = read(call, args[0], MAX_LENGTH_ABORT)?;
    let effects = &mut call.state_mut().effects;
    effects.finish_data = message.clone();
    effects.return_data = message.clone();
    Ok(HostOutcome::Revert(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_codes() {
        assert_eq!(verify_code(Ok(())), 0);
        assert_eq!(
            verify_code(Err(CryptoError::VerificationFailed { index: 0 })),
            1
        );
        assert_eq!(
            verify_code(Err(CryptoError::InvalidHashLength { len: 3 })),
            ERR_INVALID_HASH_FORMAT as i32
        );
        assert!(verify_code(Err(CryptoError::InvalidKeyMaterial {
            reason: String::new()
        })) > 1);
    }

    #[test]
    fn test_limits() {
        assert_eq!(MAX_LENGTH_DB_KEY, 65_536);
        assert_eq!(MAX_LENGTH_DB_VALUE, 131_072);
        assert_eq!(MAX_LENGTH_ABORT, 2 * 1024 * 1024);
    }
}
