//! WebAssembly execution core for the wasmx programmable ledger.
//!
//! Contracts declare the system dependencies they are built against. The
//! engine resolves those into host modules, a memory handler and an ABI
//! driver, instantiates the guest under wasmtime with fuel metering, and
//! routes nested calls over branched state that is committed only on
//! success.

pub mod background;
pub mod call_stack;
pub mod chain;
pub mod config;
pub mod context;
pub mod database;
pub mod driver;
pub mod engine;
pub mod error;
pub mod gas;
pub mod host;
pub mod instance;
pub mod logging;
pub mod memory;
pub mod region;
pub mod resolver;
pub mod router;
pub mod value;

pub use chain::{ChainHandler, ConsensusApplication, NativePrecompiles, NoPrecompiles};
pub use config::VmConfig;
pub use context::Collaborators;
pub use database::{DatabaseBackend, DatabaseRegistry, MemoryBackend};
pub use engine::{ExecutionRequest, ExecutionResult, WasmxEngine};
pub use error::VmError;
