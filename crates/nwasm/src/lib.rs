//! Facade over the compiler and runtime crates (§1 "Architecture"): a
//! single dependency for an embedder that wants to compile a Wasm
//! module and run it without wiring `nwasm-codegen` and
//! `nwasm-runtime` together by hand.

pub use nwasm_codegen::{compile, CompileError, CompileOptions, CompileResult, CompiledHeader, ResolvedImport};
pub use nwasm_core::{ImportVersion, Linkage, MachineType, NativeSymbol, Signature, TrapCode};
pub use nwasm_masm::Isa;
pub use nwasm_module::{decode_module, ExportKind, ModuleInfo};
pub use nwasm_runtime::{ExportedFunction, ExportedGlobal, Runtime, RuntimeError, TypedFunc0, TypedFunc1, TypedFunc2, WasmArg, WasmResult};

/// Compile `bytecode` and immediately link it into a running
/// [`Runtime`], its start function (if any) already executed. The
/// common case an embedder with no need to inspect `CompileResult`
/// separately reaches for first.
pub fn load(bytecode: &[u8], native_symbols: &[NativeSymbol], options: &CompileOptions, ctx: usize) -> Result<Runtime, LoadError> {
    let compiled = compile(bytecode, native_symbols, options)?;
    // `init_runtime` only ever rebinds `Dynamic` symbols — `Static` ones
    // were already baked into the compiled artifact above, and passing
    // one back here is rejected as interface misuse (see DESIGN.md).
    let dynamic_symbols: Vec<NativeSymbol> = native_symbols.iter().filter(|ns| ns.linkage == Linkage::Dynamic).cloned().collect();
    let mut runtime = Runtime::init_runtime(compiled, &dynamic_symbols, ctx)?;
    runtime.start()?;
    Ok(runtime)
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
