//! The `kvdb` namespace: key-value databases for privileged contracts.
//!
//! Every function takes one JSON request and returns one JSON response.
//! Failures the contract can act on travel in the response's `error` field.
//! Contracts without access are linked against [`MOCK_FUNCTIONS`], which
//! answer every request with an empty success.

use wasmx_types::wire::{
    KvConnectionRequest, KvGetResponse, KvHasResponse, KvIdRequest, KvIteratorRequest,
    KvIteratorResponse, KvKeyRequest, KvResponse, KvSetRequest,
};

use super::{HostCall, HostFnSpec};
use crate::database::DatabaseRegistry;
use crate::error::VmError;
use crate::value::{HostOutcome, HostVal, Kind};

const P: Kind = Kind::Ptr;

pub static FUNCTIONS: &[HostFnSpec] = &[
    HostFnSpec::new("Connect", &[P], &[P], connect),
    HostFnSpec::new("Close", &[P], &[P], close),
    HostFnSpec::new("Get", &[P], &[P], get),
    HostFnSpec::new("Has", &[P], &[P], has),
    HostFnSpec::new("Set", &[P], &[P], set),
    HostFnSpec::new("Delete", &[P], &[P], delete),
    HostFnSpec::new("Iterator", &[P], &[P], iterator),
];

pub static MOCK_FUNCTIONS: &[HostFnSpec] = &[
    HostFnSpec::new("Connect", &[P], &[P], mock_ok),
    HostFnSpec::new("Close", &[P], &[P], mock_ok),
    HostFnSpec::new("Get", &[P], &[P], mock_get),
    HostFnSpec::new("Has", &[P], &[P], mock_has),
    HostFnSpec::new("Set", &[P], &[P], mock_ok),
    HostFnSpec::new("Delete", &[P], &[P], mock_ok),
    HostFnSpec::new("Iterator", &[P], &[P], mock_iterator),
];

/// Split a registry result into a response error and a fatal error.
fn settle<T>(result: Result<T, VmError>) -> Result<Result<T, String>, VmError> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(err) if err.is_fatal() => Err(err),
        Err(VmError::ContractError { reason }) => Ok(Err(reason)),
        Err(err) => Ok(Err(err.to_string())),
    }
}

fn connection(call: &HostCall<'_, '_>, id: &str) -> String {
    DatabaseRegistry::connection_id(&call.env().contract.address, id)
}

fn databases<'s>(call: &'s HostCall<'_, '_>) -> &'s DatabaseRegistry {
    &call.session().engine.databases
}

fn error_only(call: &mut HostCall<'_, '_>, result: Result<(), VmError>) -> Result<HostOutcome, VmError> {
    let error = settle(result)?.err().unwrap_or_default();
    call.ret_json(&KvResponse { error })
}

fn connect(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let request: KvConnectionRequest = call.read_json(args[0])?;
    let id = connection(call, &request.id);
    let result = databases(call).connect(id, &request);
    error_only(call, result)
}

fn close(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let request: KvIdRequest = call.read_json(args[0])?;
    let id = connection(call, &request.id);
    let result = databases(call).close(&id);
    error_only(call, result)
}

fn get(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let request: KvKeyRequest = call.read_json(args[0])?;
    let id = connection(call, &request.id);
    let response = match settle(databases(call).with_store(&id, |s| s.get(&request.key)))? {
        Ok(value) => KvGetResponse {
            error: String::new(),
            value: value.unwrap_or_default(),
        },
        Err(error) => KvGetResponse {
            error,
            value: Vec::new(),
        },
    };
    call.ret_json(&response)
}

fn has(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let request: KvKeyRequest = call.read_json(args[0])?;
    let id = connection(call, &request.id);
    let response = match settle(databases(call).with_store(&id, |s| s.exists(&request.key)))? {
        Ok(found) => KvHasResponse {
            error: String::new(),
            found,
        },
        Err(error) => KvHasResponse {
            error,
            found: false,
        },
    };
    call.ret_json(&response)
}

fn set(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let request: KvSetRequest = call.read_json(args[0])?;
    let id = connection(call, &request.id);
    let result = databases(call).with_store(&id, |s| s.put(&request.key, &request.value));
    error_only(call, result)
}

fn delete(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let request: KvKeyRequest = call.read_json(args[0])?;
    let id = connection(call, &request.id);
    let result = databases(call).with_store(&id, |s| s.delete(&request.key));
    error_only(call, result)
}

fn iterator(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let request: KvIteratorRequest = call.read_json(args[0])?;
    let id = connection(call, &request.id);
    let bound = |b: &[u8]| (!b.is_empty()).then(|| b.to_vec());
    let (start, end) = (bound(&request.start), bound(&request.end));
    let scanned = databases(call).with_store(&id, |s| s.range(start.as_deref(), end.as_deref(), false));
    let response = match settle(scanned)? {
        Ok(pairs) => {
            let (keys, values) = pairs.into_iter().unzip();
            KvIteratorResponse {
                error: String::new(),
                keys,
                values,
            }
        }
        Err(error) => KvIteratorResponse {
            error,
            ..Default::default()
        },
    };
    call.ret_json(&response)
}

fn mock_ok(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    call.ret_json(&KvResponse::default())
}

fn mock_get(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    call.ret_json(&KvGetResponse::default())
}

fn mock_has(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    call.ret_json(&KvHasResponse::default())
}

fn mock_iterator(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    call.ret_json(&KvIteratorResponse::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_table_mirrors_real_signatures() {
        assert_eq!(FUNCTIONS.len(), MOCK_FUNCTIONS.len());
        for (real, mock) in FUNCTIONS.iter().zip(MOCK_FUNCTIONS) {
            assert_eq!(real.name, mock.name);
            assert_eq!(real.params, mock.params);
            assert_eq!(real.results, mock.results);
        }
    }

    #[test]
    fn test_settle_keeps_fatal_errors() {
        let soft: Result<(), VmError> = Err(VmError::ContractError {
            reason: "kv db connection not found".into(),
        });
        assert_eq!(
            settle(soft).unwrap(),
            Err("kv db connection not found".to_string())
        );
        let fatal: Result<(), VmError> = Err(VmError::Internal {
            reason: "lock".into(),
        });
        assert!(settle(fatal).is_err());
    }
}
