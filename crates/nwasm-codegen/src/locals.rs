//! Per-function variable storage (§3 "Variable storage"): where each
//! local currently lives, and the frame slot it falls back to once
//! evicted.

use nwasm_core::MachineType;
use nwasm_masm::Reg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Register(Reg),
    FrameSlot,
}

#[derive(Debug, Clone)]
pub struct LocalState {
    pub mt: MachineType,
    pub frame_offset: i32,
    pub location: Location,
}

/// Lays out one stack slot per local (params included, in their
/// original index order) from the frame base downward, and seeds each
/// local's initial location: params start in the incoming ABI register
/// (caller's job to have placed them there) or, once argument count
/// exceeds the register file, in their frame slot; non-parameter
/// locals always start zero-initialized in their frame slot.
pub fn layout_locals(param_types: &[MachineType], local_types: &[MachineType], pointer_bytes: u32) -> (Vec<LocalState>, u32) {
    let mut offset = 0i32;
    let mut out = Vec::with_capacity(param_types.len() + local_types.len());
    for &mt in param_types.iter().chain(local_types.iter()) {
        let size = mt.byte_size().max(pointer_bytes.min(8)) as i32;
        offset += size;
        out.push(LocalState { mt, frame_offset: -offset, location: Location::FrameSlot });
    }
    (out, offset as u32)
}
