//! C3: module info. A thin, backend-independent flattening of a decoded
//! Wasm module: the type table, the function/global/table/memory
//! descriptors, exports (sorted by name, per §6's footer contract), and
//! the raw section bodies the driver still needs streaming access to
//! (function code bodies, element/data segment contents).
//!
//! This crate owns parsing only; it never touches machine code. `C6`/`C7`
//! in `nwasm-codegen` walk a [`ModuleInfo`] to emit one function at a
//! time.

mod decode;
mod types;

pub use decode::decode_module;
pub use types::{
    DataSegment, ElementSegment, ExportInfo, ExportKind, FunctionInfo, FunctionSignature, GlobalInfo, GlobalInit,
    ImportInfo, MemoryInfo, ModuleInfo, TableInfo,
};

pub use nwasm_core::MachineType;
