use crate::reg::Reg;
use smallvec::SmallVec;

/// The native calling convention used for internal Wasm-to-Wasm calls
/// and for marshalling arguments to imported-function trampolines.
///
/// This is deliberately a *data* description (which registers, in which
/// order) rather than a trait: the register-copy resolver and call
/// lowering in `nwasm-codegen` just need to enumerate "the next free
/// integer/float argument register" without caring which ISA it is.
#[derive(Debug, Clone)]
pub struct CallingConvention {
    pub int_params: SmallVec<[Reg; 8]>,
    pub float_params: SmallVec<[Reg; 8]>,
    pub int_return: Reg,
    pub float_return: Reg,
    /// Registers the callee must preserve across the call; the register
    /// allocator spills any live value sitting in one of these before a
    /// `V2` imported call, which the contract assumes clobbers
    /// everything.
    pub caller_saved_int: SmallVec<[Reg; 16]>,
    pub caller_saved_float: SmallVec<[Reg; 16]>,
    pub stack_alignment: u32,
}
