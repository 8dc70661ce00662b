//! C7: the compiler driver (§4.5). Ties the decoder (`nwasm-module`),
//! the per-function backend (`func.rs`/`FuncGen`) and the footer/debug
//! serializers (`footer.rs`, `debug.rs`) into the single
//! [`compile`] entry point an embedder calls.
//!
//! `func.rs::FuncGen::compile` (confusingly similarly named) only
//! generates one function body; this module is the thing that walks
//! every function in a decoded module, keeps them all writing into one
//! shared [`nwasm_masm::CodeBuffer`], and resolves the cross-function
//! and cross-module bookkeeping (import linkage, link-data layout,
//! the footer) that a single function's code never needs to know about.

use nwasm_core::{CompileError, ImportVersion, Linkage, NativeSymbol, Signature};
use nwasm_masm::{build_masm, Isa};
use nwasm_module::{decode_module, FunctionSignature, ModuleInfo};
use wasmparser::FunctionBody;

use crate::debug::{DebugMap, FunctionDebugInfo};
use crate::footer;
use crate::func::FuncGen;

/// Knobs beyond the three the driver's contract names directly,
/// mirroring how `cranelift-codegen`'s own `settings::Flags` keeps
/// target selection and optimization toggles out of the call-site
/// argument list. `Default` picks the host ISA, bounds-checked memory
/// accesses, no stacktrace recording and no debug map — the cheapest
/// configuration that still runs every opcode this port implements.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub isa: Isa,
    pub allow_unknown_imports: bool,
    pub debug: bool,
    pub bounds_checks: bool,
    pub stacktrace: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            isa: Isa::host().unwrap_or(Isa::X64),
            allow_unknown_imports: false,
            debug: false,
            bounds_checks: true,
            stacktrace: false,
        }
    }
}

/// One imported function's resolution against the caller-supplied
/// [`NativeSymbol`] list (§6 "Host symbol linkage"). `static_ptr` is
/// `Some` only for `Linkage::Static` imports, whose address is known
/// now; a `Dynamic` import (or an unresolved one admitted only because
/// `allow_unknown_imports` was set) carries `None` here and is left for
/// `nwasm-runtime::init_runtime` to bind against its own symbol table.
#[derive(Debug, Clone)]
pub struct ResolvedImport {
    pub link_data_offset: u32,
    pub module: String,
    pub symbol: String,
    pub signature: Signature,
    pub static_ptr: Option<usize>,
    pub import_version: ImportVersion,
    pub linkage: Linkage,
}

/// The parsed counterpart of the binary footer (§6): everything
/// `nwasm-runtime` needs to initialize basedata and resolve imports,
/// kept as live Rust values rather than re-parsed out of
/// [`CompileResult::code`]'s tail.
#[derive(Debug, Clone)]
pub struct CompiledHeader {
    pub module: ModuleInfo,
    /// `(link_data_offset, native_entry_offset)` for every defined
    /// function, in compilation order.
    pub function_entry_points: Vec<(u32, u32)>,
    pub resolved_imports: Vec<ResolvedImport>,
    pub stacktrace_record_count: u32,
}

/// What `compile()` hands back: the native code buffer (with the
/// binary footer already appended to its tail), the debug map if one
/// was requested, and the parsed header describing everything in it.
pub struct CompileResult {
    pub code: Vec<u8>,
    pub debug_map: Option<DebugMap>,
    pub header: CompiledHeader,
}

/// Top-level contract (§4.5): validate and decode `bytecode`, compile
/// every defined function body, resolve host imports against
/// `native_symbols`, and serialize the footer (and, if
/// `options.debug`, the debug map).
pub fn compile(bytecode: &[u8], native_symbols: &[NativeSymbol], options: &CompileOptions) -> Result<CompileResult, CompileError> {
    let mut module = decode_module(bytecode)?;

    let resolved_imports = resolve_imports(&module, native_symbols, options.allow_unknown_imports)?;

    // Every defined function also indirects through a link-data slot
    // (its own compiled entry point, filled in below) exactly like an
    // imported one — this has to be finalized before any function body
    // is generated, since every call site and global access computes
    // its basedata displacement from the *total* link-data length.
    let defined_indices: Vec<usize> = module.defined_function_indices().collect();
    for &idx in &defined_indices {
        let offset = module.link_data_length;
        module.link_data_length += 8;
        module.functions[idx].link_data_offset = Some(offset);
    }
    let link_data_length = module.link_data_length;
    let stacktrace_record_count = 0;

    let mut masm = build_masm(options.isa);
    let mut function_entry_points = Vec::with_capacity(defined_indices.len());
    let mut debug_map = options.debug.then(DebugMap::new);

    for &idx in &defined_indices {
        let func = module.functions[idx].clone();
        let sig = module.types[func.signature_index as usize].clone();
        let body_bytes = func.body.as_ref().expect("defined function always carries a body");
        let body = FunctionBody::new(func.body_offset as usize, body_bytes);

        let result = FuncGen::compile(
            &mut *masm,
            &module,
            idx as u32,
            sig,
            &body,
            func.body_offset,
            options.stacktrace,
            options.bounds_checks,
            link_data_length,
            stacktrace_record_count,
        )?;

        let link_offset = func.link_data_offset.expect("assigned above");
        function_entry_points.push((link_offset, result.entry_offset));

        if let Some(map) = debug_map.as_mut() {
            map.functions.push(FunctionDebugInfo {
                func_index: idx as u32,
                locals_frame_offsets: result.locals_frame_offsets,
                source_map: result.source_map,
            });
        }
    }

    if let Some(map) = debug_map.as_mut() {
        for (idx, global) in module.globals.iter().enumerate() {
            if global.mutable {
                let offset = global.link_data_offset.expect("mutable globals always reserve a link-data slot");
                map.mutable_globals.push((idx as u32, offset));
            }
        }
    }

    let footer_bytes = footer::write_footer(&module, &function_entry_points, &resolved_imports, stacktrace_record_count);
    let mut code = masm.buffer().as_slice().to_vec();
    code.extend_from_slice(&footer_bytes);

    Ok(CompileResult {
        code,
        debug_map,
        header: CompiledHeader { module, function_entry_points, resolved_imports, stacktrace_record_count },
    })
}

fn resolve_imports(module: &ModuleInfo, native_symbols: &[NativeSymbol], allow_unknown_imports: bool) -> Result<Vec<ResolvedImport>, CompileError> {
    let mut out = Vec::new();
    for func in &module.functions {
        let Some(import) = &func.import else { continue };
        let sig = &module.types[func.signature_index as usize];
        let link_data_offset = func.link_data_offset.expect("imported functions reserve a link-data slot at decode time");

        let found = native_symbols
            .iter()
            .find(|ns| ns.module_name == import.module && ns.symbol == import.field);

        let resolved = match found {
            Some(ns) => {
                if !signature_matches(sig, &ns.signature) {
                    return Err(CompileError::SignatureMismatch { which: "import signature" });
                }
                match ns.linkage {
                    Linkage::Static => ResolvedImport {
                        link_data_offset,
                        module: import.module.clone(),
                        symbol: import.field.clone(),
                        signature: ns.signature.clone(),
                        static_ptr: Some(ns.ptr),
                        import_version: ns.import_version,
                        linkage: Linkage::Static,
                    },
                    Linkage::Dynamic => ResolvedImport {
                        link_data_offset,
                        module: import.module.clone(),
                        symbol: import.field.clone(),
                        signature: ns.signature.clone(),
                        static_ptr: None,
                        import_version: ns.import_version,
                        linkage: Linkage::Dynamic,
                    },
                }
            }
            None if allow_unknown_imports => ResolvedImport {
                link_data_offset,
                module: import.module.clone(),
                symbol: import.field.clone(),
                signature: Signature::from_wasm(&sig.params, &sig.results),
                static_ptr: None,
                import_version: ImportVersion::V2,
                linkage: Linkage::Dynamic,
            },
            None => {
                return Err(CompileError::InvalidBytecode(format!(
                    "unresolved import `{}`.`{}`",
                    import.module, import.field
                )))
            }
        };
        out.push(resolved);
    }
    Ok(out)
}

fn signature_matches(sig: &FunctionSignature, ns: &Signature) -> bool {
    sig.params.iter().copied().eq(ns.params.iter().copied()) && sig.results.iter().copied().eq(ns.results.iter().copied())
}
