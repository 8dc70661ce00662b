//! A representative subset of AArch64 A64 encodings: enough for the
//! integer arithmetic, comparisons, loads/stores and branches this
//! compiler's opcode lowering needs. Wide immediate loads use the
//! `movz`/`movk` sequence; unlike the x64 backend this does not yet
//! special-case every short immediate form winch's full AArch64 backend
//! would (see DESIGN.md).

use crate::buffer::CodeBuffer;
use crate::masm::{Cond, MemArg, OperandSize};
use crate::reg::Reg;
use nwasm_core::basedata::from_end;

pub const TRAP_CODE_SLOT_OFFSET: i64 = -(from_end::TRAP_CODE_SLOT as i64);
pub const TRAP_HANDLER_PTR_OFFSET: i64 = -(from_end::TRAP_HANDLER_PTR as i64);
pub const STACK_FENCE_OFFSET: i64 = -(from_end::STACK_FENCE as i64);

fn sf(size: OperandSize) -> u32 {
    if size == OperandSize::Quad {
        1
    } else {
        0
    }
}

pub fn movz(buf: &mut CodeBuffer, dst: Reg, imm16: u16, shift: u32, size: OperandSize) {
    let word = (sf(size) << 31) | (0b10100101 << 23) | ((shift / 16) << 21) | ((imm16 as u32) << 5) | dst.index as u32;
    buf.put4(word);
}

pub fn movk(buf: &mut CodeBuffer, dst: Reg, imm16: u16, shift: u32, size: OperandSize) {
    let word = (sf(size) << 31) | (0b11100101 << 23) | ((shift / 16) << 21) | ((imm16 as u32) << 5) | dst.index as u32;
    buf.put4(word);
}

/// Materialize `imm` into `dst` via `movz` + up to three `movk`s,
/// skipping any all-zero 16-bit chunk beyond the first.
pub fn mov_imm(buf: &mut CodeBuffer, dst: Reg, size: OperandSize, imm: i64) {
    let bits = imm as u64;
    let chunks = if size == OperandSize::Quad { 4 } else { 2 };
    let mut first = true;
    for i in 0..chunks {
        let chunk = ((bits >> (i * 16)) & 0xffff) as u16;
        if chunk == 0 && !first {
            continue;
        }
        if first {
            movz(buf, dst, chunk, i * 16, size);
            first = false;
        } else {
            movk(buf, dst, chunk, i * 16, size);
        }
    }
    if first {
        movz(buf, dst, 0, 0, size);
    }
}

pub fn mov_reg(buf: &mut CodeBuffer, dst: Reg, src: Reg, size: OperandSize) {
    // `orr dst, xzr, src` is the canonical `mov` alias.
    let word = (sf(size) << 31) | (0b0101010 << 24) | (src.index as u32) << 16 | (31 << 5) | dst.index as u32;
    buf.put4(word);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
}

impl AluOp {
    const fn opcode_bits(self) -> u32 {
        match self {
            AluOp::Add => 0b0001011,
            AluOp::Sub => 0b1001011,
            AluOp::And => 0b0001010,
            AluOp::Or => 0b0101010,
            AluOp::Xor => 0b1001010,
        }
    }
}

pub fn alu_rrr(buf: &mut CodeBuffer, op: AluOp, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize) {
    let word = (sf(size) << 31) | (op.opcode_bits() << 24) | (rhs.index as u32) << 16 | (lhs.index as u32) << 5 | dst.index as u32;
    buf.put4(word);
}

pub fn add_imm(buf: &mut CodeBuffer, dst: Reg, src: Reg, imm: u32, size: OperandSize) {
    debug_assert!(imm < (1 << 12));
    let word = (sf(size) << 31) | (0b0010001 << 24) | (imm << 10) | (src.index as u32) << 5 | dst.index as u32;
    buf.put4(word);
}

pub fn sub_imm(buf: &mut CodeBuffer, dst: Reg, src: Reg, imm: u32, size: OperandSize) {
    debug_assert!(imm < (1 << 12));
    let word = (sf(size) << 31) | (0b1010001 << 24) | (imm << 10) | (src.index as u32) << 5 | dst.index as u32;
    buf.put4(word);
}

pub fn cmp_rr(buf: &mut CodeBuffer, lhs: Reg, rhs: Reg, size: OperandSize) {
    // `subs xzr, lhs, rhs`.
    let word = (sf(size) << 31) | (0b1101011 << 24) | (rhs.index as u32) << 16 | (lhs.index as u32) << 5 | 31;
    buf.put4(word);
}

pub fn cmp_imm(buf: &mut CodeBuffer, lhs: Reg, imm: u32, size: OperandSize) {
    debug_assert!(imm < (1 << 12));
    let word = (sf(size) << 31) | (0b1110001 << 24) | (imm << 10) | (lhs.index as u32) << 5 | 31;
    buf.put4(word);
}

pub const fn cond_bits(cond: Cond) -> u32 {
    match cond {
        Cond::Eq => 0b0000,
        Cond::Ne => 0b0001,
        Cond::LtUnsigned => 0b0011,
        Cond::GeUnsigned => 0b0010,
        Cond::GtUnsigned => 0b1000,
        Cond::LeUnsigned => 0b1001,
        Cond::LtSigned => 0b1011,
        Cond::GeSigned => 0b1010,
        Cond::GtSigned => 0b1100,
        Cond::LeSigned => 0b1101,
    }
}

pub fn cset(buf: &mut CodeBuffer, dst: Reg, cond: Cond) {
    // `csinc dst, xzr, xzr, invert(cond)` is the canonical `cset` alias.
    let inv = cond_bits(cond) ^ 1;
    let word = (1 << 31) | (0b0011010100 << 21) | (31 << 16) | (inv << 12) | (1 << 10) | (31 << 5) | dst.index;
    buf.put4(word);
}

pub fn b_cond(buf: &mut CodeBuffer, cond: Cond) -> u32 {
    let here = buf.len();
    let word = (0b0101010 << 24) | cond_bits(cond);
    buf.put4(word);
    here
}

pub fn b(buf: &mut CodeBuffer) -> u32 {
    let here = buf.len();
    buf.put4(0b000101 << 26);
    here
}

pub fn bl(buf: &mut CodeBuffer) -> u32 {
    let here = buf.len();
    buf.put4(0b100101 << 26);
    here
}

pub fn blr(buf: &mut CodeBuffer, target: Reg) {
    let word = (0b1101011000111111000000 << 10) | (target.index as u32) << 5;
    buf.put4(word);
}

pub fn br(buf: &mut CodeBuffer, target: Reg) {
    let word = (0b1101011000011111000000 << 10) | (target.index as u32) << 5;
    buf.put4(word);
}

pub fn ret(buf: &mut CodeBuffer) {
    let word = (0b1101011001011111000000 << 10) | ((gpr_lr() as u32) << 5);
    buf.put4(word);
}

const fn gpr_lr() -> u8 {
    30
}

fn ldst_size_bits(size: OperandSize) -> u32 {
    match size {
        OperandSize::Byte => 0b00,
        OperandSize::Half => 0b01,
        OperandSize::Word => 0b10,
        OperandSize::Quad => 0b11,
    }
}

/// `dst = lhs op rhs` for the register-shift-amount data-processing-2
/// class (`lslv`/`asrv`/`lsrv`), and for `sdiv`/`udiv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataProc2Op {
    Lslv,
    Asrv,
    Lsrv,
    Sdiv,
    Udiv,
}

impl DataProc2Op {
    const fn opcode_bits(self) -> u32 {
        match self {
            DataProc2Op::Udiv => 0b000010,
            DataProc2Op::Sdiv => 0b000011,
            DataProc2Op::Lslv => 0b001000,
            DataProc2Op::Lsrv => 0b001001,
            DataProc2Op::Asrv => 0b001010,
        }
    }
}

pub fn data_proc_2(buf: &mut CodeBuffer, op: DataProc2Op, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize) {
    let word = (sf(size) << 31)
        | (0b0011010110 << 21)
        | (rhs.index as u32) << 16
        | (op.opcode_bits() << 10)
        | (lhs.index as u32) << 5
        | dst.index as u32;
    buf.put4(word);
}

/// `dst = minuend - (factor1 * factor2)` (`msub`), used to compute a
/// remainder as `lhs - (lhs / rhs) * rhs` since AArch64 has no direct
/// remainder instruction.
pub fn msub(buf: &mut CodeBuffer, dst: Reg, factor1: Reg, factor2: Reg, minuend: Reg, size: OperandSize) {
    let word = (sf(size) << 31)
        | (0b0011011000 << 21)
        | (factor2.index as u32) << 16
        | (1 << 15)
        | (minuend.index as u32) << 10
        | (factor1.index as u32) << 5
        | dst.index as u32;
    buf.put4(word);
}

pub fn load(buf: &mut CodeBuffer, dst: Reg, addr: MemArg, size: OperandSize, sign_extend: bool) {
    let opc = if sign_extend && size != OperandSize::Quad { 0b10u32 } else { 0b01u32 };
    let word = (ldst_size_bits(size) << 30)
        | (0b111_0_00 << 24)
        | (opc << 22)
        | (((addr.offset as u32) & 0x1ff) << 12)
        | (0b01 << 10)
        | (addr.base.index as u32) << 5
        | dst.index as u32;
    buf.put4(word);
}

pub fn store(buf: &mut CodeBuffer, addr: MemArg, src: Reg, size: OperandSize) {
    let word = (ldst_size_bits(size) << 30)
        | (0b111_0_00 << 24)
        | (((addr.offset as u32) & 0x1ff) << 12)
        | (0b01 << 10)
        | (addr.base.index as u32) << 5
        | src.index as u32;
    buf.put4(word);
}

/// `LDUR St/Dt, [Xn, #imm]` — the SIMD&FP sibling of [`load`]'s unscaled
/// form (same layout, `V=1` instead of `V=0`, `opc` just load/store
/// since FP never sign-extends).
pub fn load_float(buf: &mut CodeBuffer, dst: Reg, addr: MemArg, size: OperandSize) {
    let word = (ldst_size_bits(size) << 30)
        | (0b111_1_00 << 24)
        | (0b01 << 22)
        | (((addr.offset as u32) & 0x1ff) << 12)
        | (0b01 << 10)
        | (addr.base.index as u32) << 5
        | dst.index as u32;
    buf.put4(word);
}

pub fn store_float(buf: &mut CodeBuffer, addr: MemArg, src: Reg, size: OperandSize) {
    let word = (ldst_size_bits(size) << 30)
        | (0b111_1_00 << 24)
        | (((addr.offset as u32) & 0x1ff) << 12)
        | (0b01 << 10)
        | (addr.base.index as u32) << 5
        | src.index as u32;
    buf.put4(word);
}

/// `FMOV Sd, Sn` / `FMOV Dd, Dn` (register-to-register float move).
pub fn fmov_reg(buf: &mut CodeBuffer, dst: Reg, src: Reg, size: OperandSize) {
    let ty = if size == OperandSize::Quad { 0b01u32 } else { 0b00 };
    let word = (0x1eu32 << 24) | (ty << 22) | (1 << 21) | (0b10000 << 10) | (src.index as u32) << 5 | dst.index as u32;
    buf.put4(word);
}

/// `FMOV Sd, Wn` / `FMOV Dd, Xn` — move a GPR's raw bits into an FP
/// register (no int-to-float conversion).
pub fn fmov_gpr_to_fp(buf: &mut CodeBuffer, dst_fp: Reg, src_gpr: Reg, size: OperandSize) {
    let word = (sf(size) << 31) | (0b0011110 << 24) | (sf(size) << 22) | (1 << 21) | (0b111 << 16) | (src_gpr.index as u32) << 5 | dst_fp.index as u32;
    buf.put4(word);
}

/// `FMOV Wd, Sn` / `FMOV Xd, Dn` — the inverse of [`fmov_gpr_to_fp`].
pub fn fmov_fp_to_gpr(buf: &mut CodeBuffer, dst_gpr: Reg, src_fp: Reg, size: OperandSize) {
    let word = (sf(size) << 31) | (0b0011110 << 24) | (sf(size) << 22) | (1 << 21) | (0b110 << 16) | (src_fp.index as u32) << 5 | dst_gpr.index as u32;
    buf.put4(word);
}

/// `SBFM` alias group (`sxtb`/`sxth`/`sxtw`): sign-extend the low
/// `imms+1` bits of `src` into `dst`. `to64` selects the 64-bit
/// same-size-field variant (`N=1,sf=1`) needed to widen past 32 bits;
/// the `imms=31` (`sxtw`) case is always called with `to64 == true`
/// since 32-to-32 is a no-op.
fn sbfm(buf: &mut CodeBuffer, dst: Reg, src: Reg, imms: u32, to64: bool) {
    let sf_bit = to64 as u32;
    let n_bit = to64 as u32;
    // immr = 0: the field starts at bit 0, no rotation.
    let word = (sf_bit << 31) | (0b00100110u32 << 23) | (n_bit << 22) | (0u32 << 16) | (imms << 10) | (src.index as u32) << 5 | dst.index as u32;
    buf.put4(word);
}

pub fn sxtb(buf: &mut CodeBuffer, dst: Reg, src: Reg, to64: bool) {
    sbfm(buf, dst, src, 7, to64);
}

pub fn sxth(buf: &mut CodeBuffer, dst: Reg, src: Reg, to64: bool) {
    sbfm(buf, dst, src, 15, to64);
}

pub fn sxtw(buf: &mut CodeBuffer, dst: Reg, src: Reg) {
    sbfm(buf, dst, src, 31, true);
}
