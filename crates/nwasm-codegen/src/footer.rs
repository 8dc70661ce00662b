//! C7: the compiled-binary footer (§6 "Compiler output footer") — a
//! tail appended after the native code, read back to front: a reader
//! anchored at the end of the buffer first recovers this module's
//! total footer length, then walks forward through a fixed sequence of
//! length-prefixed tables.
//!
//! Nothing in this port persists a compiled artifact to disk (no file
//! I/O, no CLI — see `SPEC_FULL.md` Non-goals), so the only reader of
//! this format today is [`parse_footer`] itself, exercised by the round
//! trip test below; `nwasm-runtime` consumes `driver::CompiledHeader`
//! directly rather than re-parsing it out of the code buffer. The
//! format is still written in full so an embedder that wants to cache
//! a compiled module across process runs has something to cache.

use nwasm_core::{CompileError, ImportVersion, MachineType, Signature};
use nwasm_module::{ExportInfo, ExportKind, FunctionSignature, GlobalInfo, GlobalInit, ModuleInfo, TableInfo};

use crate::driver::ResolvedImport;

/// `0xFFFF_FFFF` marks "no start function" (§6).
pub const NO_START_FUNCTION: u32 = 0xFFFF_FFFF;

pub fn write_footer(
    module: &ModuleInfo,
    function_entry_points: &[(u32, u32)],
    resolved_imports: &[ResolvedImport],
    stacktrace_record_count: u32,
) -> Vec<u8> {
    let mut out = Vec::new();

    let export_table_offset = out.len() as u32;
    write_export_table(&mut out, &module.exports, function_entry_points, module);

    let import_table_offset = out.len() as u32;
    write_import_table(&mut out, resolved_imports);

    let type_table_offset = out.len() as u32;
    write_type_table(&mut out, &module.types);

    let global_table_offset = out.len() as u32;
    write_global_table(&mut out, &module.globals);

    let table_defs_offset = out.len() as u32;
    write_table_defs(&mut out, &module.tables);

    let start_function_offset = module.start_function.unwrap_or(NO_START_FUNCTION);

    // Fixed trailer, last bytes of the buffer: every prior table's
    // start offset (relative to the footer's own start), then the
    // scalars, then the footer's total length so a reader anchored at
    // the very end of the whole code+footer buffer can find byte 0 of
    // this footer with one subtraction.
    out.extend_from_slice(&export_table_offset.to_le_bytes());
    out.extend_from_slice(&import_table_offset.to_le_bytes());
    out.extend_from_slice(&type_table_offset.to_le_bytes());
    out.extend_from_slice(&global_table_offset.to_le_bytes());
    out.extend_from_slice(&table_defs_offset.to_le_bytes());
    out.extend_from_slice(&module.link_data_length.to_le_bytes());
    out.extend_from_slice(&stacktrace_record_count.to_le_bytes());
    out.extend_from_slice(&start_function_offset.to_le_bytes());

    let total_len = out.len() as u32 + 4;
    out.extend_from_slice(&total_len.to_le_bytes());
    out
}

const TRAILER_BYTES: usize = 9 * 4;

pub struct ParsedFooter {
    pub exports: Vec<(String, ExportKind, u32)>,
    pub imports: Vec<ParsedImport>,
    pub types: Vec<FunctionSignature>,
    pub globals: Vec<(MachineType, bool, i64)>,
    pub tables: Vec<TableInfo>,
    pub link_data_length: u32,
    pub stacktrace_record_count: u32,
    pub start_function: Option<u32>,
}

pub struct ParsedImport {
    pub module: String,
    pub symbol: String,
    pub signature: Signature,
    pub link_data_offset: u32,
    pub import_version: ImportVersion,
}

/// Parse a footer previously written by [`write_footer`] out of `code`,
/// which must be the whole code-plus-footer buffer `compile()` returned.
pub fn parse_footer(code: &[u8]) -> Result<ParsedFooter, CompileError> {
    if code.len() < 4 {
        return Err(CompileError::InvalidBytecode("buffer too short for a footer".to_string()));
    }
    let total_len = u32::from_le_bytes(code[code.len() - 4..].try_into().unwrap()) as usize;
    if total_len < TRAILER_BYTES + 4 || total_len > code.len() {
        return Err(CompileError::InvalidBytecode("footer length out of range".to_string()));
    }
    let footer_start = code.len() - total_len;
    let footer = &code[footer_start..code.len() - 4];
    let trailer = &footer[footer.len() - TRAILER_BYTES..];

    let mut r = Reader { bytes: trailer, pos: 0 };
    let export_table_offset = r.u32()? as usize;
    let import_table_offset = r.u32()? as usize;
    let type_table_offset = r.u32()? as usize;
    let global_table_offset = r.u32()? as usize;
    let table_defs_offset = r.u32()? as usize;
    let link_data_length = r.u32()?;
    let stacktrace_record_count = r.u32()?;
    let start_function_offset = r.u32()?;

    let exports = read_export_table(&footer[export_table_offset..])?;
    let imports = read_import_table(&footer[import_table_offset..])?;
    let types = read_type_table(&footer[type_table_offset..])?;
    let globals = read_global_table(&footer[global_table_offset..])?;
    let tables = read_table_defs(&footer[table_defs_offset..])?;

    Ok(ParsedFooter {
        exports,
        imports,
        types,
        globals,
        tables,
        link_data_length,
        stacktrace_record_count,
        start_function: if start_function_offset == NO_START_FUNCTION { None } else { Some(start_function_offset) },
    })
}

fn export_kind_byte(kind: ExportKind) -> u8 {
    match kind {
        ExportKind::Func => 0,
        ExportKind::Global => 1,
        ExportKind::Table => 2,
        ExportKind::Memory => 3,
    }
}

fn export_kind_from_byte(b: u8) -> Result<ExportKind, CompileError> {
    Ok(match b {
        0 => ExportKind::Func,
        1 => ExportKind::Global,
        2 => ExportKind::Table,
        3 => ExportKind::Memory,
        _ => return Err(CompileError::InvalidBytecode("bad export kind byte in footer".to_string())),
    })
}

/// Sorted by name already (`ModuleInfo::exports`, per the decoder); the
/// per-entry "body offset" is the compiled native entry for a function
/// export, or the link-data offset for a global export — the two
/// spaces never collide since a reader already knows the export kind.
fn write_export_table(out: &mut Vec<u8>, exports: &[ExportInfo], function_entry_points: &[(u32, u32)], module: &ModuleInfo) {
    out.extend_from_slice(&(exports.len() as u32).to_le_bytes());
    for e in exports {
        write_string(out, &e.name);
        out.push(export_kind_byte(e.kind));
        out.extend_from_slice(&e.index.to_le_bytes());
        let body_offset = match e.kind {
            ExportKind::Func => {
                let func = &module.functions[e.index as usize];
                let link_offset = func.link_data_offset.unwrap_or(0);
                function_entry_points
                    .iter()
                    .find(|(l, _)| *l == link_offset)
                    .map(|(_, entry)| *entry)
                    .unwrap_or(0)
            }
            ExportKind::Global => module.globals[e.index as usize].link_data_offset.unwrap_or(0),
            ExportKind::Table | ExportKind::Memory => 0,
        };
        out.extend_from_slice(&body_offset.to_le_bytes());
    }
}

fn read_export_table(bytes: &[u8]) -> Result<Vec<(String, ExportKind, u32)>, CompileError> {
    let mut r = Reader { bytes, pos: 0 };
    let count = r.u32()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = r.string()?;
        let kind = export_kind_from_byte(r.u8()?)?;
        let index = r.u32()?;
        let _body_offset = r.u32()?;
        out.push((name, kind, index));
    }
    Ok(out)
}

fn write_import_table(out: &mut Vec<u8>, imports: &[ResolvedImport]) {
    out.extend_from_slice(&(imports.len() as u32).to_le_bytes());
    for imp in imports {
        write_string(out, &imp.module);
        write_string(out, &imp.symbol);
        write_string(out, &imp.signature.render());
        out.extend_from_slice(&imp.link_data_offset.to_le_bytes());
        out.push(match imp.import_version {
            ImportVersion::V1 => 1,
            ImportVersion::V2 => 2,
        });
    }
}

fn read_import_table(bytes: &[u8]) -> Result<Vec<ParsedImport>, CompileError> {
    let mut r = Reader { bytes, pos: 0 };
    let count = r.u32()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let module = r.string()?;
        let symbol = r.string()?;
        let signature = Signature::parse(&r.string()?)?;
        let link_data_offset = r.u32()?;
        let import_version = match r.u8()? {
            1 => ImportVersion::V1,
            2 => ImportVersion::V2,
            _ => return Err(CompileError::InvalidBytecode("bad import version byte in footer".to_string())),
        };
        out.push(ParsedImport { module, symbol, signature, link_data_offset, import_version });
    }
    Ok(out)
}

fn write_type_table(out: &mut Vec<u8>, types: &[FunctionSignature]) {
    out.extend_from_slice(&(types.len() as u32).to_le_bytes());
    for sig in types {
        write_string(out, &Signature::from_wasm(&sig.params, &sig.results).render());
    }
}

fn read_type_table(bytes: &[u8]) -> Result<Vec<FunctionSignature>, CompileError> {
    let mut r = Reader { bytes, pos: 0 };
    let count = r.u32()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let sig = Signature::parse(&r.string()?)?;
        out.push(FunctionSignature { params: sig.params.into(), results: sig.results.into() });
    }
    Ok(out)
}

fn write_global_table(out: &mut Vec<u8>, globals: &[GlobalInfo]) {
    out.extend_from_slice(&(globals.len() as u32).to_le_bytes());
    for g in globals {
        out.push(machine_type_byte(g.machine_type));
        out.push(g.mutable as u8);
        let value = match g.init {
            GlobalInit::Const { bits, .. } => bits as i64,
            GlobalInit::ImportedLinkOffset(off) => off as i64,
        };
        out.extend_from_slice(&value.to_le_bytes());
    }
}

fn read_global_table(bytes: &[u8]) -> Result<Vec<(MachineType, bool, i64)>, CompileError> {
    let mut r = Reader { bytes, pos: 0 };
    let count = r.u32()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mt = machine_type_from_byte(r.u8()?)?;
        let mutable = r.u8()? != 0;
        let value = r.i64()?;
        out.push((mt, mutable, value));
    }
    Ok(out)
}

fn write_table_defs(out: &mut Vec<u8>, tables: &[TableInfo]) {
    out.extend_from_slice(&(tables.len() as u32).to_le_bytes());
    for t in tables {
        out.extend_from_slice(&t.min.to_le_bytes());
        out.extend_from_slice(&t.max.unwrap_or(u32::MAX).to_le_bytes());
    }
}

fn read_table_defs(bytes: &[u8]) -> Result<Vec<TableInfo>, CompileError> {
    let mut r = Reader { bytes, pos: 0 };
    let count = r.u32()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let min = r.u32()?;
        let max = r.u32()?;
        out.push(TableInfo { min, max: if max == u32::MAX { None } else { Some(max) } });
    }
    Ok(out)
}

fn machine_type_byte(mt: MachineType) -> u8 {
    match mt {
        MachineType::I32 => 0,
        MachineType::I64 => 1,
        MachineType::F32 => 2,
        MachineType::F64 => 3,
        MachineType::Invalid => 255,
    }
}

fn machine_type_from_byte(b: u8) -> Result<MachineType, CompileError> {
    Ok(match b {
        0 => MachineType::I32,
        1 => MachineType::I64,
        2 => MachineType::F32,
        3 => MachineType::F64,
        _ => return Err(CompileError::InvalidBytecode("bad machine type byte in footer".to_string())),
    })
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CompileError> {
        let end = self.pos + n;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| {
            CompileError::InvalidBytecode("footer table truncated".to_string())
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CompileError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CompileError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64, CompileError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String, CompileError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| CompileError::InvalidBytecode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nwasm_core::Linkage;
    use smallvec::smallvec;

    #[test]
    fn round_trips_empty_module() {
        let module = ModuleInfo::default();
        let footer = write_footer(&module, &[], &[], 0);
        let mut code = vec![0u8; 16];
        code.extend_from_slice(&footer);
        let parsed = parse_footer(&code).unwrap();
        assert!(parsed.exports.is_empty());
        assert!(parsed.imports.is_empty());
        assert_eq!(parsed.start_function, None);
    }

    #[test]
    fn round_trips_populated_tables() {
        let mut module = ModuleInfo::default();
        module.types.push(FunctionSignature { params: smallvec![MachineType::I32], results: smallvec![MachineType::I32] });
        module.start_function = Some(0);
        module.link_data_length = 24;
        let imports = vec![ResolvedImport {
            link_data_offset: 0,
            module: "env".to_string(),
            symbol: "log".to_string(),
            signature: Signature::parse("(i)").unwrap(),
            static_ptr: None,
            import_version: ImportVersion::V2,
            linkage: Linkage::Dynamic,
        }];
        let footer = write_footer(&module, &[], &imports, 0);
        let mut code = vec![0u8; 4];
        code.extend_from_slice(&footer);
        let parsed = parse_footer(&code).unwrap();
        assert_eq!(parsed.types.len(), 1);
        assert_eq!(parsed.start_function, Some(0));
        assert_eq!(parsed.imports.len(), 1);
        assert_eq!(parsed.imports[0].symbol, "log");
    }
}
