use nwasm_core::TrapCode;
use thiserror::Error;

/// Runtime failure kinds (§7 "Runtime failure kinds"). Unlike
/// [`nwasm_core::CompileError`], most of these don't abort anything
/// beyond the one call that raised them — the runtime remains usable
/// afterwards (§7 "Partial execution").
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("trap: {code:?}")]
    Trap { code: TrapCode, stacktrace: Vec<u32> },

    #[error("memory access [{offset}, {offset_plus_size}) is out of range")]
    MemoryOutOfRange { offset: u32, offset_plus_size: u64 },

    #[error("no exported function named `{0}`")]
    FunctionNotFound(String),

    #[error("no exported global named `{0}`")]
    GlobalNotFound(String),

    #[error("global `{0}` is immutable")]
    GlobalIsImmutable(String),

    #[error("global `{name}` has type {actual:?}, expected {expected:?}")]
    GlobalTypeMismatch { name: String, expected: nwasm_core::MachineType, actual: nwasm_core::MachineType },

    #[error("exported function `{name}` has signature {actual}, requested signature does not match")]
    SignatureMismatch { name: String, actual: String },

    #[error("import `{module}`.`{symbol}` was left unresolved at compile time and no dynamically linked symbol satisfies it")]
    UnresolvedImport { module: String, symbol: String },

    #[error("a `Linkage::Static` symbol was passed to init_runtime; static symbols are compile-time only")]
    StaticSymbolAtRuntime { module: String, symbol: String },

    #[error("job memory allocator failed to satisfy a grow/init request")]
    OutOfMemory,

    #[error("the Wasm start function already ran")]
    StartAlreadyRan,

    #[error("exported function `{0}` is a re-exported import, which this runtime does not support")]
    ReexportedImportUnsupported(String),

    #[error(transparent)]
    Exec(#[from] nwasm_exec::ExecError),
}
