//! C9/C10: the runtime. Takes a [`nwasm_codegen::CompileResult`], maps
//! its code into executable memory (`nwasm-exec`), builds and
//! initializes job memory, resolves whatever imports compilation left
//! dangling, and hands back a [`Runtime`] an embedder calls into through
//! typed exported-function and exported-global handles.
//!
//! The trap/signal bridge (C10) lives in `trapbridge` and is invisible
//! at this crate's public surface: every typed call already turns a
//! trapped call into `Err(RuntimeError::Trap { .. })`.

mod basedata;
mod error;
mod memory;
mod runtime;
mod trapbridge;
mod typed;

pub use error::RuntimeError;
pub use runtime::Runtime;
pub use typed::{ExportedFunction, ExportedGlobal, TypedFunc0, TypedFunc1, TypedFunc2, WasmArg, WasmResult};

pub use nwasm_core::{MachineType, NativeSymbol, TrapCode};
