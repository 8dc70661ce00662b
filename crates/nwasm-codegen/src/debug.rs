//! C7: debug-map serialization (§6 "Debug map"). A separate byte stream
//! from the compiled code, built up by the driver alongside each
//! function's body and only produced when the caller asks for it —
//! nothing in the hot compile path depends on this module.

use nwasm_core::{basedata, CompileError};

pub const DEBUG_MAP_VERSION: u32 = 2;

/// Per-function fragment of the debug map: the frame offset of every
/// local (parameters first, matching `locals.rs`'s layout order) plus
/// the `(wasmOffset, nativeOffset)` pairs recorded at each basic-block
/// entry (`control.rs::begin_block`'s `Loop` case is the only site that
/// currently pushes one).
#[derive(Debug, Clone)]
pub struct FunctionDebugInfo {
    pub func_index: u32,
    pub locals_frame_offsets: Vec<i32>,
    pub source_map: Vec<(u32, u32)>,
}

/// Everything a debugger or stack-symbolizer needs that isn't already
/// baked into the compiled code: where basedata's fixed fields sit
/// relative to the linear-memory base, which globals are mutable (and
/// where their link-data slot is), and each function's local-frame
/// layout plus a coarse source map.
#[derive(Debug, Clone)]
pub struct DebugMap {
    pub version: u32,
    pub last_frame_ptr_offset: i32,
    pub actual_lin_mem_size_offset: i32,
    pub link_data_start_offset: i32,
    pub generic_trap_handler_offset: i32,
    /// `(global_index, link_data_offset)`, one per mutable global.
    pub mutable_globals: Vec<(u32, u32)>,
    pub functions: Vec<FunctionDebugInfo>,
}

impl DebugMap {
    /// Fields that come straight from the fixed basedata layout rather
    /// than anything the driver learns per module.
    pub fn new() -> Self {
        DebugMap {
            version: DEBUG_MAP_VERSION,
            last_frame_ptr_offset: -basedata::from_end::LAST_FRAME_REF_PTR,
            actual_lin_mem_size_offset: -basedata::from_end::ACTUAL_LIN_MEM_BYTE_SIZE,
            link_data_start_offset: basedata::from_start::LINK_DATA as i32,
            generic_trap_handler_offset: -basedata::from_end::TRAP_HANDLER_PTR,
            mutable_globals: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.last_frame_ptr_offset.to_le_bytes());
        out.extend_from_slice(&self.actual_lin_mem_size_offset.to_le_bytes());
        out.extend_from_slice(&self.link_data_start_offset.to_le_bytes());
        out.extend_from_slice(&self.generic_trap_handler_offset.to_le_bytes());

        out.extend_from_slice(&(self.mutable_globals.len() as u32).to_le_bytes());
        for (idx, offset) in &self.mutable_globals {
            out.extend_from_slice(&idx.to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
        }

        out.extend_from_slice(&(self.functions.len() as u32).to_le_bytes());
        for f in &self.functions {
            out.extend_from_slice(&f.func_index.to_le_bytes());
            out.extend_from_slice(&(f.locals_frame_offsets.len() as u32).to_le_bytes());
            for off in &f.locals_frame_offsets {
                out.extend_from_slice(&off.to_le_bytes());
            }
            out.extend_from_slice(&(f.source_map.len() as u32).to_le_bytes());
            for (wasm_off, native_off) in &f.source_map {
                out.extend_from_slice(&wasm_off.to_le_bytes());
                out.extend_from_slice(&native_off.to_le_bytes());
            }
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, CompileError> {
        let mut r = Reader { bytes, pos: 0 };
        let version = r.u32()?;
        let last_frame_ptr_offset = r.i32()?;
        let actual_lin_mem_size_offset = r.i32()?;
        let link_data_start_offset = r.i32()?;
        let generic_trap_handler_offset = r.i32()?;

        let n_globals = r.u32()?;
        let mut mutable_globals = Vec::with_capacity(n_globals as usize);
        for _ in 0..n_globals {
            mutable_globals.push((r.u32()?, r.u32()?));
        }

        let n_funcs = r.u32()?;
        let mut functions = Vec::with_capacity(n_funcs as usize);
        for _ in 0..n_funcs {
            let func_index = r.u32()?;
            let n_locals = r.u32()?;
            let mut locals_frame_offsets = Vec::with_capacity(n_locals as usize);
            for _ in 0..n_locals {
                locals_frame_offsets.push(r.i32()?);
            }
            let n_src = r.u32()?;
            let mut source_map = Vec::with_capacity(n_src as usize);
            for _ in 0..n_src {
                source_map.push((r.u32()?, r.u32()?));
            }
            functions.push(FunctionDebugInfo { func_index, locals_frame_offsets, source_map });
        }

        Ok(DebugMap {
            version,
            last_frame_ptr_offset,
            actual_lin_mem_size_offset,
            link_data_start_offset,
            generic_trap_handler_offset,
            mutable_globals,
            functions,
        })
    }
}

impl Default for DebugMap {
    fn default() -> Self {
        Self::new()
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CompileError> {
        let end = self.pos + n;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| {
            CompileError::InvalidBytecode("debug map truncated".to_string())
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, CompileError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, CompileError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let mut map = DebugMap::new();
        map.mutable_globals.push((0, 8));
        map.functions.push(FunctionDebugInfo { func_index: 0, locals_frame_offsets: vec![0, 8], source_map: vec![(0, 16)] });
        let bytes = map.serialize();
        let back = DebugMap::deserialize(&bytes).unwrap();
        assert_eq!(back.version, DEBUG_MAP_VERSION);
        assert_eq!(back.mutable_globals, map.mutable_globals);
        assert_eq!(back.functions.len(), 1);
        assert_eq!(back.functions[0].locals_frame_offsets, vec![0, 8]);
    }
}
