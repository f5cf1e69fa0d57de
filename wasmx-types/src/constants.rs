// ─── Host Interface Labels ───────────────────────────────────────────────────

/// Native `wasmx` core set, i32 pointers.
pub const WASMX_ENV_1: &str = "wasmx_env_1";

/// Native core plus extended set, i32 pointers.
pub const WASMX_ENV_2: &str = "wasmx_env_2";

/// Alias of [`WASMX_ENV_2`] naming the pointer width explicitly.
pub const WASMX_ENV_I32_2: &str = "wasmx_env_i32_2";

/// Native core plus extended set, i64 packed pointers.
pub const WASMX_ENV_I64_2: &str = "wasmx_env_i64_2";

/// Privileged `wasmxcore` set, i32 pointers.
pub const WASMX_ENV_CORE_I32_1: &str = "wasmx_env_core_i32_1";

/// Privileged `wasmxcore` set, i64 packed pointers.
pub const WASMX_ENV_CORE_I64_1: &str = "wasmx_env_core_i64_1";

/// Block-lifecycle bridge (`consensus` namespace), i32 pointers.
pub const WASMX_CONSENSUS_JSON_1: &str = "wasmx_consensus_json_1";

/// Block-lifecycle bridge, i64 packed pointers.
pub const WASMX_CONSENSUS_JSON_I64_1: &str = "wasmx_consensus_json_i64_1";

/// Non-deterministic system queries.
pub const SYS_ENV_1: &str = "sys_env_1";

/// Ethereum-bytecode dialect.
pub const EWASM_ENV_1: &str = "ewasm_env_1";

/// Standardized (CosmWasm) dialect.
pub const CW_ENV_8: &str = "interface_version_8";

pub const WASI_SNAPSHOT_PREVIEW1: &str = "wasi_snapshot_preview1";
pub const WASI_UNSTABLE: &str = "wasi_unstable";

/// System-call `wasmx` surface with packed i64 pointers.
pub const WASMX_WASI_RUST_1: &str = "wasmx_wasi_rust_1";

/// Contract-owned key-value databases (`kvdb` namespace), i32 pointers.
pub const WASMX_KVDB_I32_1: &str = "wasmx_kvdb_i32_1";

/// Contract-owned key-value databases, i64 packed pointers.
pub const WASMX_KVDB_I64_1: &str = "wasmx_kvdb_i64_1";

/// Dependency installed when a contract declares none.
pub const DEFAULT_SYS_DEP: &str = EWASM_ENV_1;

// ─── Memory Layout Labels ────────────────────────────────────────────────────

pub const MEMORY_DEFAULT_1: &str = "memory_default_1";
pub const MEMORY_ASSEMBLYSCRIPT_1: &str = "memory_assemblyscript_1";
pub const MEMORY_TAYLOR: &str = "memory_taylor";
pub const MEMORY_RUST_I64_1: &str = "memory_rust_i64_1";
pub const MEMORY_PTRLEN_I64_1: &str = "memory_ptrlen_i64_1";

/// Guest allocator export names.
pub const MEMORY_EXPORT_AS: &str = "__new";
pub const MEMORY_EXPORT_ALLOCATE: &str = "allocate";
pub const MEMORY_EXPORT_MALLOC: &str = "malloc";
pub const MEMORY_EXPORT_ALLOC: &str = "alloc";
pub const MEMORY_EXPORT_FREE: &str = "free";

// ─── Interpreters ────────────────────────────────────────────────────────────

pub const INTERPRETER_PYTHON: &str = "interpreter_python_utf8_0.2.0";
pub const INTERPRETER_JS: &str = "interpreter_javascript_utf8_0.1.0";
pub const INTERPRETER_EVM_SHANGHAI: &str = "interpreter_evm_shanghai_bz_1.0.0";

// ─── Roles ───────────────────────────────────────────────────────────────────

/// Library contracts run their code against the caller's storage.
pub const ROLE_LIBRARY: &str = "deplibrary";
pub const ROLE_CONSENSUS: &str = "consensus";
pub const ROLE_INTERPRETER: &str = "interpreter";
pub const ROLE_INTERPRETER_PYTHON: &str = "interpreter_python";
pub const ROLE_INTERPRETER_JS: &str = "interpreter_javascript";
pub const ROLE_BANK: &str = "bank";
pub const ROLE_STORAGE_CHAIN: &str = "storage_chain";

/// Roles that may import privileged host modules.
pub const CORE_ROLES: &[&str] = &[ROLE_CONSENSUS, ROLE_STORAGE_CHAIN];

// ─── Entry Points ────────────────────────────────────────────────────────────

pub const ENTRY_POINT_INSTANTIATE: &str = "instantiate";
pub const ENTRY_POINT_EXECUTE: &str = "execute";
pub const ENTRY_POINT_QUERY: &str = "query";
pub const ENTRY_POINT_REPLY: &str = "reply";
pub const ENTRY_POINT_TIMED: &str = "eventual";
pub const ENTRY_POINT_P2P_MSG: &str = "p2pmsg";

/// Generic export used when a named entry point is absent.
pub const ENTRY_POINT_MAIN: &str = "main";

/// Default chain-level denomination used by the reference handlers.
pub const DEFAULT_DENOM: &str = "amyt";

/// File extension given to interpreted sources in the virtual filesystem.
pub fn interpreted_file_extension(dep: &str) -> Option<&'static str> {
    if dep.contains("python") {
        Some("py")
    } else if dep.contains("javascript") {
        Some("js")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpreted_file_extension() {
        assert_eq!(interpreted_file_extension(INTERPRETER_PYTHON), Some("py"));
        assert_eq!(interpreted_file_extension(ROLE_INTERPRETER_JS), Some("js"));
        assert_eq!(interpreted_file_extension(EWASM_ENV_1), None);
    }
}
