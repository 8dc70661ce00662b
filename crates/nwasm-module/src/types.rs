use nwasm_core::MachineType;
use smallvec::SmallVec;

/// One entry of the type table (§3 "Module info"): a signature,
/// flattened to the machine-type lattice this compiler understands.
/// Multi-value results are represented directly as `Vec<MachineType>`
/// rather than bracketed `PARAMSTART`/`PARAMEND` byte markers — this is
/// the in-memory form the original's encoded byte sequence decodes
/// into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub params: SmallVec<[MachineType; 4]>,
    pub results: SmallVec<[MachineType; 2]>,
}

impl FunctionSignature {
    pub fn param_stack_bytes(&self, pointer_bytes: u32) -> u32 {
        self.params.iter().map(|p| p.byte_size().max(pointer_bytes.min(p.byte_size().max(4)))).sum()
    }
}

#[derive(Debug, Clone)]
pub struct ImportInfo {
    pub module: String,
    pub field: String,
}

/// A function descriptor: either imported (native linkage resolved at
/// compile time for `Static`, or left as a link-data placeholder for
/// `Dynamic`) or defined with a body in the code section.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub signature_index: u32,
    pub import: Option<ImportInfo>,
    /// Owned copy of this function's encoded body (locals declarations
    /// followed by the operator stream up to and including `end`);
    /// `None` for imports. Kept as an owned buffer rather than a range
    /// into the original module bytes so `ModuleInfo` has no borrowed
    /// lifetime and the driver can free the original input after decode.
    pub body: Option<Vec<u8>>,
    /// Absolute byte offset of `body` within the original module, used
    /// as the base for debug-map `wasmOffset` entries.
    pub body_offset: u32,
    /// Offset into link data where this import's resolved pointer (for
    /// `Dynamic` imports) or compiled entry point (for defined
    /// functions, filled in after code generation) lives.
    pub link_data_offset: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
pub enum GlobalInit {
    Const { machine_type: MachineType, bits: u64 },
    /// An imported global: its value is read through link data at the
    /// given offset rather than known at compile time.
    ImportedLinkOffset(u32),
}

#[derive(Debug, Clone)]
pub struct GlobalInfo {
    pub machine_type: MachineType,
    pub mutable: bool,
    pub init: GlobalInit,
    /// Offset into link data; present for every mutable global (§3
    /// invariant: "For every mutable global, `link_data[offset]` is the
    /// authoritative value") and for every imported global regardless of
    /// mutability.
    pub link_data_offset: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct TableInfo {
    pub min: u32,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryInfo {
    pub initial_pages: u32,
    pub max_pages: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Global,
    Table,
    Memory,
}

#[derive(Debug, Clone)]
pub struct ExportInfo {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub table_index: u32,
    pub offset: i64,
    pub func_indices: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct DataSegment {
    pub mem_index: u32,
    pub offset: i64,
    pub bytes: Vec<u8>,
}

/// The complete, backend-independent picture of a decoded Wasm module.
/// Owned by the driver for the duration of a compile (§3 lifecycle:
/// "created by the driver during section parsing... destroyed with the
/// compiler").
#[derive(Debug, Clone, Default)]
pub struct ModuleInfo {
    pub types: Vec<FunctionSignature>,
    pub functions: Vec<FunctionInfo>,
    pub globals: Vec<GlobalInfo>,
    pub tables: Vec<TableInfo>,
    pub memory: Option<MemoryInfo>,
    /// Sorted by name, matching the compiled footer's export table
    /// contract (§6).
    pub exports: Vec<ExportInfo>,
    pub start_function: Option<u32>,
    pub elements: Vec<ElementSegment>,
    pub data: Vec<DataSegment>,
    /// Running total of link-data bytes consumed by globals and
    /// imports so far; the driver keeps appending to this as it resolves
    /// more link-data consumers (e.g. per-function entry points once
    /// compiled).
    pub link_data_length: u32,
}

impl ModuleInfo {
    pub fn imported_function_count(&self) -> usize {
        self.functions.iter().filter(|f| f.import.is_some()).count()
    }

    pub fn defined_function_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.functions.iter().enumerate().filter(|(_, f)| f.import.is_none()).map(|(i, _)| i)
    }

    pub fn export_by_name(&self, name: &str) -> Option<&ExportInfo> {
        // Exports are kept sorted by name; a linear scan is used here
        // rather than `binary_search_by` to keep the common case (a
        // handful of exports) simple — see DESIGN.md.
        self.exports.iter().find(|e| e.name == name)
    }
}
