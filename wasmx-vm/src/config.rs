use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::VmError;
use crate::gas::{GasSchedule, DEFAULT_GAS_LIMIT};

/// Maximum Wasm linear memory: 16 MB.
pub const MAX_WASM_MEMORY_BYTES: usize = 16 * 1024 * 1024;
/// Maximum nesting of contract-to-contract calls.
pub const MAX_CALL_DEPTH: usize = 64;
/// Maximum log entries per execution context.
pub const MAX_LOGS: usize = 1_000;
/// Maximum chain events per execution context.
pub const MAX_EVENTS: usize = 1_000;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub max_memory_bytes: usize,
    pub max_call_depth: usize,
    pub max_logs: usize,
    pub max_events: usize,
    pub default_gas_limit: u64,
    /// Keep compiled modules between invocations. Pinned contracts are
    /// cached regardless.
    pub cache_compiled_modules: bool,
    /// WASI preopens in `guest:host` form, appended to those a driver adds.
    pub wasi_preopens: Vec<String>,
    /// Extra WASI program arguments.
    pub wasi_args: Vec<String>,
    pub gas: GasSchedule,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: MAX_WASM_MEMORY_BYTES,
            max_call_depth: MAX_CALL_DEPTH,
            max_logs: MAX_LOGS,
            max_events: MAX_EVENTS,
            default_gas_limit: DEFAULT_GAS_LIMIT,
            cache_compiled_modules: true,
            wasi_preopens: Vec::new(),
            wasi_args: Vec::new(),
            gas: GasSchedule::default(),
        }
    }
}

impl VmConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, VmError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| VmError::Config {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents).map_err(|e| VmError::Config {
            reason: format!("failed to parse config file '{}': {}", path.display(), e),
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, VmError> {
        toml::from_str(contents).map_err(|e| VmError::Config {
            reason: e.to_string(),
        })
    }

    pub fn to_toml_string(&self) -> Result<String, VmError> {
        toml::to_string_pretty(self).map_err(|e| VmError::Config {
            reason: format!("failed to serialize config: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VmConfig::default();
        assert_eq!(config.max_memory_bytes, 16 * 1024 * 1024);
        assert_eq!(config.max_call_depth, 64);
        assert_eq!(config.default_gas_limit, 10_000_000);
        assert!(config.cache_compiled_modules);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = VmConfig::from_toml_str(
            r#"
            max_call_depth = 8

            [gas]
            sstore = 5000
            "#,
        )
        .unwrap();
        assert_eq!(config.max_call_depth, 8);
        assert_eq!(config.gas.sstore, 5000);
        assert_eq!(config.gas.secp256k1_verify, 21_000);
        assert_eq!(config.max_logs, 1_000);
    }

    #[test]
    fn test_load_written_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("wasmx.toml");
        let mut config = VmConfig::default();
        config.wasi_preopens = vec![".:/tmp".to_string()];
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = VmConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = VmConfig::load("/nonexistent/path/wasmx.toml");
        assert!(matches!(result, Err(VmError::Config { .. })));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(VmConfig::from_toml_str("max_call_depth = \"deep\"").is_err());
    }
}
