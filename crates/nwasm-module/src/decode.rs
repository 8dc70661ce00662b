//! Single pass over a Wasm binary's sections, in the canonical order the
//! format guarantees, building the flattened [`ModuleInfo`] the driver
//! consumes. This is the only place in the crate that touches
//! `wasmparser`'s section readers directly.

use nwasm_core::{CompileError, MachineType};
use wasmparser::{
    ConstExpr, DataKind, ElementItems, ElementKind, ExternalKind, Operator, Parser, Payload, TypeRef,
};

use crate::types::{
    DataSegment, ElementSegment, ExportInfo, ExportKind, FunctionInfo, FunctionSignature, GlobalInfo, GlobalInit,
    ImportInfo, MemoryInfo, ModuleInfo, TableInfo,
};

pub fn decode_module(wasm: &[u8]) -> Result<ModuleInfo, CompileError> {
    let mut info = ModuleInfo::default();
    // Count of imported functions seen so far; needed because the
    // function index space is imports-then-defined, but the function
    // section only lists the defined half.
    let mut next_defined_type: Vec<u32> = Vec::new();

    for payload in Parser::new(0).parse_all(wasm) {
        let payload = payload.map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
        match payload {
            Payload::TypeSection(reader) => {
                for ty in reader.into_iter_err_on_gc_types() {
                    let ty = ty.map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
                    info.types.push(flatten_signature(&ty)?);
                }
            }

            Payload::ImportSection(reader) => {
                for imp in reader {
                    let imp = imp.map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
                    let import = ImportInfo { module: imp.module.to_string(), field: imp.name.to_string() };
                    match imp.ty {
                        TypeRef::Func(type_index) => {
                            info.functions.push(FunctionInfo {
                                signature_index: type_index,
                                import: Some(import),
                                body: None,
                                body_offset: 0,
                                link_data_offset: Some(info.link_data_length),
                            });
                            info.link_data_length += 8;
                        }
                        TypeRef::Global(gty) => {
                            let machine_type = MachineType::from_wasmparser(gty.content_type).ok_or(
                                CompileError::SignatureMismatch { which: "imported global type" },
                            )?;
                            info.globals.push(GlobalInfo {
                                machine_type,
                                mutable: gty.mutable,
                                init: GlobalInit::ImportedLinkOffset(info.link_data_length),
                                link_data_offset: Some(info.link_data_length),
                            });
                            info.link_data_length += 8;
                        }
                        TypeRef::Table(tty) => {
                            info.tables.push(TableInfo { min: tty.initial as u32, max: tty.maximum.map(|m| m as u32) });
                        }
                        TypeRef::Memory(mty) => {
                            info.memory = Some(MemoryInfo {
                                initial_pages: mty.initial as u32,
                                max_pages: mty.maximum.map(|m| m as u32),
                            });
                        }
                        TypeRef::Tag(_) => {
                            // Exception handling is outside this compiler's
                            // machine-type lattice; rejected as an
                            // unsupported import rather than silently
                            // skipped.
                            return Err(CompileError::InvalidBytecode("tag imports are not supported".to_string()));
                        }
                    }
                }
            }

            Payload::FunctionSection(reader) => {
                for type_index in reader {
                    let type_index = type_index.map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
                    next_defined_type.push(type_index);
                }
            }

            Payload::TableSection(reader) => {
                for table in reader {
                    let table = table.map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
                    info.tables.push(TableInfo {
                        min: table.ty.initial as u32,
                        max: table.ty.maximum.map(|m| m as u32),
                    });
                }
            }

            Payload::MemorySection(reader) => {
                for mem in reader {
                    let mem = mem.map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
                    info.memory =
                        Some(MemoryInfo { initial_pages: mem.initial as u32, max_pages: mem.maximum.map(|m| m as u32) });
                }
            }

            Payload::GlobalSection(reader) => {
                for g in reader {
                    let g = g.map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
                    let machine_type = MachineType::from_wasmparser(g.ty.content_type)
                        .ok_or(CompileError::SignatureMismatch { which: "global type" })?;
                    let bits = eval_const_i64(&g.init_expr)?;
                    let link_data_offset = if g.ty.mutable {
                        let off = info.link_data_length;
                        info.link_data_length += 8;
                        Some(off)
                    } else {
                        None
                    };
                    info.globals.push(GlobalInfo {
                        machine_type,
                        mutable: g.ty.mutable,
                        init: GlobalInit::Const { machine_type, bits: bits as u64 },
                        link_data_offset,
                    });
                }
            }

            Payload::ExportSection(reader) => {
                for exp in reader {
                    let exp = exp.map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
                    let kind = match exp.kind {
                        ExternalKind::Func => ExportKind::Func,
                        ExternalKind::Global => ExportKind::Global,
                        ExternalKind::Table => ExportKind::Table,
                        ExternalKind::Memory => ExportKind::Memory,
                        ExternalKind::Tag => {
                            return Err(CompileError::InvalidBytecode("tag exports are not supported".to_string()))
                        }
                    };
                    info.exports.push(ExportInfo { name: exp.name.to_string(), kind, index: exp.index });
                }
            }

            Payload::StartSection { func, .. } => {
                info.start_function = Some(func);
            }

            Payload::ElementSection(reader) => {
                for elem in reader {
                    let elem = elem.map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
                    let (table_index, offset) = match elem.kind {
                        ElementKind::Active { table_index, offset_expr } => {
                            (table_index.unwrap_or(0), eval_const_i64(&offset_expr)?)
                        }
                        // Passive/declared segments only feed `table.init`
                        // and `ref.func` elision; neither is in scope, so
                        // they decode to an inert, never-active segment.
                        ElementKind::Passive | ElementKind::Declared => (0, 0),
                    };
                    let mut func_indices = Vec::new();
                    match elem.items {
                        ElementItems::Functions(r) => {
                            for f in r {
                                func_indices
                                    .push(f.map_err(|e| CompileError::InvalidBytecode(e.to_string()))?);
                            }
                        }
                        ElementItems::Expressions(_, r) => {
                            for e in r {
                                let e = e.map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
                                func_indices.push(eval_ref_func(&e)?);
                            }
                        }
                    }
                    info.elements.push(ElementSegment { table_index, offset, func_indices });
                }
            }

            Payload::DataSection(reader) => {
                for data in reader {
                    let data = data.map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
                    let (mem_index, offset) = match data.kind {
                        DataKind::Active { memory_index, offset_expr } => (memory_index, eval_const_i64(&offset_expr)?),
                        DataKind::Passive => (0, 0),
                    };
                    info.data.push(DataSegment { mem_index, offset, bytes: data.data.to_vec() });
                }
            }

            Payload::CodeSectionEntry(body) => {
                let range = body.range();
                let defined_index = info.functions.iter().filter(|f| f.body.is_some()).count();
                let type_index = *next_defined_type.get(defined_index).ok_or_else(|| {
                    CompileError::InvalidBytecode("code section has more bodies than the function section declared".to_string())
                })?;
                info.functions.push(FunctionInfo {
                    signature_index: type_index,
                    import: None,
                    body: Some(wasm[range.start..range.end].to_vec()),
                    body_offset: range.start as u32,
                    link_data_offset: None,
                });
            }

            // Custom sections (including name/debug sections) carry no
            // information this compiler's codegen needs; the decoder
            // never preserves them.
            _ => {}
        }
    }

    info.exports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(info)
}

fn flatten_signature(ty: &wasmparser::FuncType) -> Result<FunctionSignature, CompileError> {
    let params = ty
        .params()
        .iter()
        .map(|t| MachineType::from_wasmparser(*t).ok_or(CompileError::SignatureMismatch { which: "param type" }))
        .collect::<Result<_, _>>()?;
    let results = ty
        .results()
        .iter()
        .map(|t| MachineType::from_wasmparser(*t).ok_or(CompileError::SignatureMismatch { which: "result type" }))
        .collect::<Result<_, _>>()?;
    Ok(FunctionSignature { params, results })
}

/// Evaluate a constant expression restricted to the forms Wasm MVP
/// allows in global initializers and segment offsets: a single
/// `i32`/`i64` constant, or a `global.get` of an already-decoded
/// imported global (the only global kind legal to reference here, since
/// forward references to later globals are not).
fn eval_const_i64(expr: &ConstExpr) -> Result<i64, CompileError> {
    let mut reader = expr.get_operators_reader();
    let op = reader
        .read()
        .map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
    match op {
        Operator::I32Const { value } => Ok(value as i64),
        Operator::I64Const { value } => Ok(value),
        Operator::GlobalGet { .. } => {
            // The referenced global's value is only known at link time;
            // record a zero placeholder here and let the runtime's
            // basedata writer patch it in from link data when the
            // constant expression names an imported global.
            Ok(0)
        }
        _ => Err(CompileError::InvalidBytecode("unsupported constant expression".to_string())),
    }
}

fn eval_ref_func(op: &Operator) -> Result<u32, CompileError> {
    match op {
        Operator::RefFunc { function_index } => Ok(*function_index),
        Operator::RefNull { .. } => Ok(u32::MAX),
        _ => Err(CompileError::InvalidBytecode("unsupported element expression".to_string())),
    }
}
