use crate::reg::Reg;

/// General-purpose register indices, numbered the way the ModRM/SIB/REX
/// encoding wants them (rax=0 .. r15=15).
pub mod gpr {
    use super::Reg;

    pub const RAX: Reg = Reg::int(0);
    pub const RCX: Reg = Reg::int(1);
    pub const RDX: Reg = Reg::int(2);
    pub const RBX: Reg = Reg::int(3);
    pub const RSP: Reg = Reg::int(4);
    pub const RBP: Reg = Reg::int(5);
    pub const RSI: Reg = Reg::int(6);
    pub const RDI: Reg = Reg::int(7);
    pub const R8: Reg = Reg::int(8);
    pub const R9: Reg = Reg::int(9);
    pub const R10: Reg = Reg::int(10);
    pub const R11: Reg = Reg::int(11);
    pub const R12: Reg = Reg::int(12);
    pub const R13: Reg = Reg::int(13);
    pub const R14: Reg = Reg::int(14);
    pub const R15: Reg = Reg::int(15);
}

pub mod xmm {
    use super::Reg;

    pub const XMM0: Reg = Reg::float(0);
    pub const XMM1: Reg = Reg::float(1);
    pub const XMM2: Reg = Reg::float(2);
    pub const XMM3: Reg = Reg::float(3);
    pub const XMM4: Reg = Reg::float(4);
    pub const XMM5: Reg = Reg::float(5);
    pub const XMM6: Reg = Reg::float(6);
    pub const XMM7: Reg = Reg::float(7);
}

/// `r14` is reserved to always hold the linear-memory base pointer
/// (basedata offsets are negative from this register), matching the
/// "cached base register" generated code keeps live across calls and
/// re-fetches after any memory-growing operation (§5 "Shared
/// resources").
pub const BASEDATA_REG: Reg = gpr::R14;

/// `r15` is reserved as a free scratch register the register allocator
/// never hands out, used for address computation in load/store
/// lowering so it doesn't have to fight the compile-time stack for a
/// register.
pub const RESERVED_SCRATCH: Reg = gpr::R15;
