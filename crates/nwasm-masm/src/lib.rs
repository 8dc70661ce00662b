//! C2: the per-architecture assembler.
//!
//! Exposes [`MacroAssembler`], a trait implemented once per target ISA
//! (`x64`, `aarch64`). The backend (`nwasm-codegen`) never emits bytes
//! directly; it calls through this trait, which picks among equivalent
//! instruction encodings and owns the expandable code buffer, the trap
//! stub table, and branch patching.

mod buffer;
mod cc;
mod isa;
mod masm;
mod reg;
mod trapstub;

pub mod aarch64;
pub mod x64;

pub use buffer::{CodeBuffer, Label, RelocKind, Relocation};
pub use cc::CallingConvention;
pub use isa::{build_masm, Isa};
pub use masm::{Cond, MacroAssembler, MemArg, OperandSize};
pub use reg::{Reg, RegClass, RegSet};
pub use trapstub::TrapStubTable;
