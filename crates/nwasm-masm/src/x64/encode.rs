//! REX/ModRM/SIB encoding for the GPR subset of x86-64 this compiler
//! emits. Always uses the disp32 addressing form for memory operands
//! (no disp8 special-casing) — a deliberate simplification over a
//! production assembler's shortest-encoding rule, noted in DESIGN.md.

use crate::buffer::CodeBuffer;
use crate::masm::{Cond, MemArg, OperandSize};
use crate::reg::{Reg, RegClass};
use nwasm_core::basedata::from_end;

pub const TRAP_CODE_SLOT_OFFSET: i32 = -from_end::TRAP_CODE_SLOT;
pub const TRAP_HANDLER_PTR_OFFSET: i32 = -from_end::TRAP_HANDLER_PTR;
pub const STACK_FENCE_OFFSET: i32 = -from_end::STACK_FENCE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Cmp,
    Mov,
}

impl AluOp {
    /// Opcode for the `r/m, r` (register source written into
    /// register-or-memory destination) form, used here exclusively
    /// with a register destination (`alu_rr`).
    const fn rm_r_opcode(self) -> u8 {
        match self {
            AluOp::Add => 0x01,
            AluOp::Sub => 0x29,
            AluOp::And => 0x21,
            AluOp::Or => 0x09,
            AluOp::Xor => 0x31,
            AluOp::Cmp => 0x39,
            AluOp::Mov => 0x89,
        }
    }

    /// `/digit` extension used by the `0x81 /digit r/m, imm32` group;
    /// `Mov` has no group-1 form and is handled separately by
    /// `alu_ri`'s caller (`mov_imm`).
    const fn group1_ext(self) -> u8 {
        match self {
            AluOp::Add => 0,
            AluOp::Or => 1,
            AluOp::And => 4,
            AluOp::Sub => 5,
            AluOp::Xor => 6,
            AluOp::Cmp => 7,
            AluOp::Mov => unreachable!("mov has no group-1 immediate form"),
        }
    }
}

fn rex(w: bool, r_ext: bool, x_ext: bool, b_ext: bool) -> Option<u8> {
    if !w && !r_ext && !x_ext && !b_ext {
        None
    } else {
        Some(0x40 | ((w as u8) << 3) | ((r_ext as u8) << 2) | ((x_ext as u8) << 1) | (b_ext as u8))
    }
}

fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode << 6) | ((reg & 7) << 3) | (rm & 7)
}

fn emit_rex_opcode_modrm_rr(buf: &mut CodeBuffer, size: OperandSize, opcode: u8, reg_field: Reg, rm_field: Reg) {
    let w = size == OperandSize::Quad;
    if size == OperandSize::Half {
        buf.put1(0x66);
    }
    if let Some(r) = rex(w, reg_field.index >= 8, false, rm_field.index >= 8) {
        buf.put1(r);
    }
    let opcode = if size == OperandSize::Byte { opcode & !1 } else { opcode };
    buf.put1(opcode);
    buf.put1(modrm(0b11, reg_field.index, rm_field.index));
}

/// `dst op= src` (two-register ALU form): `opcode /r` with both operands
/// direct registers.
pub fn alu_rr(buf: &mut CodeBuffer, op: AluOp, dst: Reg, src: Reg, size: OperandSize) {
    // All our `rm_r_opcode`s are of the `op r/m, r` shape, i.e. `src` is
    // the `reg` field and `dst` is the `r/m` field.
    emit_rex_opcode_modrm_rr(buf, size, op.rm_r_opcode(), src, dst);
}

/// `dst op= imm32` via the `0x81 /digit` group (sign-extended to the
/// operand size).
pub fn alu_ri(buf: &mut CodeBuffer, op: AluOp, dst: Reg, imm: i32, size: OperandSize) {
    let w = size == OperandSize::Quad;
    if size == OperandSize::Half {
        buf.put1(0x66);
    }
    if let Some(r) = rex(w, false, false, dst.index >= 8) {
        buf.put1(r);
    }
    if (-128..=127).contains(&imm) && size != OperandSize::Byte {
        buf.put1(0x83);
        buf.put1(modrm(0b11, op.group1_ext(), dst.index));
        buf.put1(imm as i8 as u8);
    } else {
        buf.put1(if size == OperandSize::Byte { 0x80 } else { 0x81 });
        buf.put1(modrm(0b11, op.group1_ext(), dst.index));
        if size == OperandSize::Byte {
            buf.put1(imm as u8);
        } else {
            buf.put4(imm as u32);
        }
    }
}

pub fn imul_rr(buf: &mut CodeBuffer, dst: Reg, src: Reg, size: OperandSize) {
    let w = size == OperandSize::Quad;
    if let Some(r) = rex(w, dst.index >= 8, false, src.index >= 8) {
        buf.put1(r);
    }
    buf.put1(0x0f);
    buf.put1(0xaf);
    buf.put1(modrm(0b11, dst.index, src.index));
}

/// `MOVimm`: pick the shortest of (a) a sign-extended 32-bit immediate
/// move (`0xC7 /0`) or (b) a full 64-bit `movabs` (`0xB8+r imm64`),
/// widening only when the value doesn't fit in the sign-extended form.
pub fn mov_imm(buf: &mut CodeBuffer, dst: Reg, size: OperandSize, imm: i64) {
    if size != OperandSize::Quad || (i32::MIN as i64..=i32::MAX as i64).contains(&imm) {
        if let Some(r) = rex(size == OperandSize::Quad, false, false, dst.index >= 8) {
            buf.put1(r);
        }
        buf.put1(0xc7);
        buf.put1(modrm(0b11, 0, dst.index));
        buf.put4(imm as i32 as u32);
    } else {
        if let Some(r) = rex(true, false, false, dst.index >= 8) {
            buf.put1(r);
        }
        buf.put1(0xb8 + (dst.index & 7));
        buf.put8(imm as u64);
    }
}

fn emit_mem_operand(buf: &mut CodeBuffer, reg_field: u8, reg_ext: bool, mem: MemArg, size: OperandSize, opcode: u8) {
    let w = size == OperandSize::Quad;
    if size == OperandSize::Half {
        buf.put1(0x66);
    }
    if let Some(r) = rex(w, reg_ext, false, mem.base.index >= 8) {
        buf.put1(r);
    }
    buf.put1(opcode);
    // rsp/r12 as a base needs a SIB byte; always emit disp32 mode.
    let needs_sib = (mem.base.index & 7) == 4;
    buf.put1(modrm(0b10, reg_field, if needs_sib { 4 } else { mem.base.index }));
    if needs_sib {
        buf.put1(0x24); // scale=1, index=none, base=rsp-ish
    }
    buf.put4(mem.offset as u32);
}

pub fn load(buf: &mut CodeBuffer, dst: Reg, addr: MemArg, size: OperandSize, sign_extend: bool) {
    if size == OperandSize::Word && sign_extend {
        // `movsxd r64, r/m32` — the general opcode match below derives
        // REX.W from `size == Quad`, which is never true here, so a
        // sign-extending 32-bit load needs its own REX.W-forced path.
        if let Some(r) = rex(true, dst.index >= 8, false, addr.base.index >= 8) {
            buf.put1(r);
        }
        buf.put1(0x63);
        let needs_sib = (addr.base.index & 7) == 4;
        buf.put1(modrm(0b10, dst.index, if needs_sib { 4 } else { addr.base.index }));
        if needs_sib {
            buf.put1(0x24);
        }
        buf.put4(addr.offset as u32);
        return;
    }
    let opcode = match (size, sign_extend) {
        (OperandSize::Byte, true) => 0x0fbe,
        (OperandSize::Byte, false) => 0x0fb6,
        (OperandSize::Half, true) => 0x0fbf,
        (OperandSize::Half, false) => 0x0fb7,
        (OperandSize::Word, _) | (OperandSize::Quad, _) => 0x8b,
    };
    let w = size == OperandSize::Quad;
    if opcode > 0xff {
        if let Some(r) = rex(w, dst.index >= 8, false, addr.base.index >= 8) {
            buf.put1(r);
        }
        buf.put1(0x0f);
        buf.put1((opcode & 0xff) as u8);
        let needs_sib = (addr.base.index & 7) == 4;
        buf.put1(modrm(0b10, dst.index, if needs_sib { 4 } else { addr.base.index }));
        if needs_sib {
            buf.put1(0x24);
        }
        buf.put4(addr.offset as u32);
    } else {
        emit_mem_operand(buf, dst.index, dst.index >= 8, addr, size, opcode as u8);
    }
}

pub fn store(buf: &mut CodeBuffer, addr: MemArg, src: Reg, size: OperandSize) {
    let opcode = if size == OperandSize::Byte { 0x88 } else { 0x89 };
    emit_mem_operand(buf, src.index, src.index >= 8, addr, size, opcode);
}

/// `movb $imm8, offset(base)` — used only to write the trap-code byte
/// into basedata from a trap stub.
pub fn mov_imm8_to_mem(buf: &mut CodeBuffer, base: Reg, offset: i32, imm: u8) {
    if base.index >= 8 {
        buf.put1(0x41);
    }
    buf.put1(0xc6);
    let needs_sib = (base.index & 7) == 4;
    buf.put1(modrm(0b10, 0, if needs_sib { 4 } else { base.index }));
    if needs_sib {
        buf.put1(0x24);
    }
    buf.put4(offset as u32);
    buf.put1(imm);
}

/// `jmp *offset(base)` — used by trap stubs to jump through the
/// basedata trap-handler-pointer slot.
pub fn jmp_mem(buf: &mut CodeBuffer, base: Reg, offset: i32) {
    if base.index >= 8 {
        buf.put1(0x41);
    }
    buf.put1(0xff);
    let needs_sib = (base.index & 7) == 4;
    buf.put1(modrm(0b10, 4, if needs_sib { 4 } else { base.index }));
    if needs_sib {
        buf.put1(0x24);
    }
    buf.put4(offset as u32);
}

pub fn call_indirect(buf: &mut CodeBuffer, target: Reg) {
    if target.index >= 8 {
        buf.put1(0x41);
    }
    buf.put1(0xff);
    buf.put1(modrm(0b11, 2, target.index));
}

pub fn push(buf: &mut CodeBuffer, reg: Reg) {
    if reg.index >= 8 {
        buf.put1(0x41);
    }
    buf.put1(0x50 + (reg.index & 7));
}

pub fn pop(buf: &mut CodeBuffer, reg: Reg) {
    if reg.index >= 8 {
        buf.put1(0x41);
    }
    buf.put1(0x58 + (reg.index & 7));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Shl,
    Sar,
    Shr,
}

impl ShiftOp {
    const fn group2_ext(self) -> u8 {
        match self {
            ShiftOp::Shl => 4,
            ShiftOp::Shr => 5,
            ShiftOp::Sar => 7,
        }
    }
}

/// `dst = dst <</>>/ cl`, via the `0xD3 /digit` group-2 shift-by-`cl`
/// form. Callers already moved the shift amount into `cl`.
pub fn shift_by_cl(buf: &mut CodeBuffer, op: ShiftOp, dst: Reg, size: OperandSize) {
    let w = size == OperandSize::Quad;
    if size == OperandSize::Half {
        buf.put1(0x66);
    }
    if let Some(r) = rex(w, false, false, dst.index >= 8) {
        buf.put1(r);
    }
    buf.put1(if size == OperandSize::Byte { 0xd2 } else { 0xd3 });
    buf.put1(modrm(0b11, op.group2_ext(), dst.index));
}

/// Sign-extend `rax`/`eax` into `rdx:rax`/`edx:eax` (`cqo`/`cdq`),
/// required before a signed `idiv`.
pub fn sign_extend_into_dx(buf: &mut CodeBuffer, size: OperandSize) {
    if size == OperandSize::Quad {
        buf.put1(0x48);
    }
    buf.put1(0x99);
}

/// Zero `rdx`/`edx`, required before an unsigned `div`.
pub fn zero_dx(buf: &mut CodeBuffer, size: OperandSize) {
    alu_rr(buf, AluOp::Xor, crate::x64::regs::gpr::RDX, crate::x64::regs::gpr::RDX, size);
}

/// `idiv`/`div r/m`: `rdx:rax / r/m -> quotient in rax, remainder in
/// rdx`. `signed` selects `idiv` (`/7`) vs `div` (`/6`).
pub fn idiv(buf: &mut CodeBuffer, divisor: Reg, size: OperandSize, signed: bool) {
    let w = size == OperandSize::Quad;
    if let Some(r) = rex(w, false, false, divisor.index >= 8) {
        buf.put1(r);
    }
    buf.put1(0xf7);
    buf.put1(modrm(0b11, if signed { 7 } else { 6 }, divisor.index));
}

pub fn setcc(buf: &mut CodeBuffer, dst: Reg, cond: Cond) {
    if dst.index >= 8 || dst.index >= 4 {
        // A REX prefix (even a no-op 0x40) is required to address
        // sil/dil/spl/bpl instead of the legacy ah/ch/dh/bh aliases.
        let r = rex(false, false, false, dst.index >= 8).unwrap_or(0x40);
        buf.put1(r);
    }
    buf.put1(0x0f);
    buf.put1(cc_opcode(cond));
    buf.put1(modrm(0b11, 0, dst.index));
    // Zero-extend the byte result to the full register.
    if let Some(r) = rex(false, dst.index >= 8, false, dst.index >= 8) {
        buf.put1(r);
    }
    buf.put1(0x0f);
    buf.put1(0xb6);
    buf.put1(modrm(0b11, dst.index, dst.index));
}

const fn cc_opcode(cond: Cond) -> u8 {
    match cond {
        Cond::Eq => 0x94,
        Cond::Ne => 0x95,
        Cond::LtSigned => 0x9c,
        Cond::LeSigned => 0x9e,
        Cond::GtSigned => 0x9f,
        Cond::GeSigned => 0x9d,
        Cond::LtUnsigned => 0x92,
        Cond::LeUnsigned => 0x96,
        Cond::GtUnsigned => 0x97,
        Cond::GeUnsigned => 0x93,
    }
}

pub fn jcc_opcode(cond: Cond) -> u8 {
    // `0x0F 0x8x rel32` mirrors the `SETcc` condition nibble.
    0x80 | (cc_opcode(cond) & 0x0f)
}

/// Register-to-register sign extension. `from` names the *source*
/// width; `to64` picks a 64-bit (REX.W) or 32-bit destination. Widening
/// 32-to-32 makes no sense and isn't a caller of this function.
pub fn sign_extend_rr(buf: &mut CodeBuffer, dst: Reg, src: Reg, from: OperandSize, to64: bool) {
    let w = to64;
    match from {
        OperandSize::Byte => {
            // A bare REX prefix is required to address sil/dil/spl/bpl
            // instead of the legacy ah/ch/dh/bh aliases.
            let needs_bare_rex = (4..8).contains(&src.index);
            match rex(w, dst.index >= 8, false, src.index >= 8) {
                Some(r) => buf.put1(r),
                None if needs_bare_rex => buf.put1(0x40),
                None => {}
            }
            buf.put1(0x0f);
            buf.put1(0xbe);
            buf.put1(modrm(0b11, dst.index, src.index));
        }
        OperandSize::Half => {
            if let Some(r) = rex(w, dst.index >= 8, false, src.index >= 8) {
                buf.put1(r);
            }
            buf.put1(0x0f);
            buf.put1(0xbf);
            buf.put1(modrm(0b11, dst.index, src.index));
        }
        OperandSize::Word => {
            // `movsxd` always widens to 64 bits; this is only ever
            // called with `to64 == true` (32-to-32 is a no-op).
            if let Some(r) = rex(true, dst.index >= 8, false, src.index >= 8) {
                buf.put1(r);
            }
            buf.put1(0x63);
            buf.put1(modrm(0b11, dst.index, src.index));
        }
        OperandSize::Quad => unreachable!("no source to sign-extend from a 64-bit value"),
    }
}

fn xmm_rex(w: bool, r_ext: bool, b_ext: bool) -> Option<u8> {
    rex(w, r_ext, false, b_ext)
}

/// `movss`/`movsd xmm, m32/m64` (load).
pub fn load_float(buf: &mut CodeBuffer, dst: Reg, addr: MemArg, size: OperandSize) {
    buf.put1(if size == OperandSize::Quad { 0xf2 } else { 0xf3 });
    if let Some(r) = xmm_rex(false, dst.index >= 8, addr.base.index >= 8) {
        buf.put1(r);
    }
    buf.put1(0x0f);
    buf.put1(0x10);
    let needs_sib = (addr.base.index & 7) == 4;
    buf.put1(modrm(0b10, dst.index, if needs_sib { 4 } else { addr.base.index }));
    if needs_sib {
        buf.put1(0x24);
    }
    buf.put4(addr.offset as u32);
}

/// `movss`/`movsd m32/m64, xmm` (store).
pub fn store_float(buf: &mut CodeBuffer, addr: MemArg, src: Reg, size: OperandSize) {
    buf.put1(if size == OperandSize::Quad { 0xf2 } else { 0xf3 });
    if let Some(r) = xmm_rex(false, src.index >= 8, addr.base.index >= 8) {
        buf.put1(r);
    }
    buf.put1(0x0f);
    buf.put1(0x11);
    let needs_sib = (addr.base.index & 7) == 4;
    buf.put1(modrm(0b10, src.index, if needs_sib { 4 } else { addr.base.index }));
    if needs_sib {
        buf.put1(0x24);
    }
    buf.put4(addr.offset as u32);
}

/// `movd`/`movq xmm, r/m` — stage a GPR's bits into an XMM register
/// bit-for-bit (no conversion).
pub fn mov_gpr_to_xmm(buf: &mut CodeBuffer, dst_xmm: Reg, src_gpr: Reg, size: OperandSize) {
    buf.put1(0x66);
    if let Some(r) = xmm_rex(size == OperandSize::Quad, dst_xmm.index >= 8, src_gpr.index >= 8) {
        buf.put1(r);
    }
    buf.put1(0x0f);
    buf.put1(0x6e);
    buf.put1(modrm(0b11, dst_xmm.index, src_gpr.index));
}

/// `movd`/`movq r/m, xmm` — the inverse of [`mov_gpr_to_xmm`].
pub fn mov_xmm_to_gpr(buf: &mut CodeBuffer, dst_gpr: Reg, src_xmm: Reg, size: OperandSize) {
    buf.put1(0x66);
    if let Some(r) = xmm_rex(size == OperandSize::Quad, src_xmm.index >= 8, dst_gpr.index >= 8) {
        buf.put1(r);
    }
    buf.put1(0x0f);
    buf.put1(0x7e);
    buf.put1(modrm(0b11, src_xmm.index, dst_gpr.index));
}

/// `movss`/`movsd xmm, xmm` (register-to-register float move).
pub fn mov_xmm_xmm(buf: &mut CodeBuffer, dst: Reg, src: Reg, size: OperandSize) {
    buf.put1(if size == OperandSize::Quad { 0xf2 } else { 0xf3 });
    if let Some(r) = xmm_rex(false, dst.index >= 8, src.index >= 8) {
        buf.put1(r);
    }
    buf.put1(0x0f);
    buf.put1(0x10);
    buf.put1(modrm(0b11, dst.index, src.index));
}

/// Dispatches on both registers' class: float-float uses `movss`/`movsd`,
/// a float/int pair uses `movd`/`movq` to move the bit pattern across
/// register files, as used by constant materialization.
pub fn mov_float_reg(buf: &mut CodeBuffer, dst: Reg, src: Reg, size: OperandSize) {
    match (dst.class, src.class) {
        (RegClass::Float, RegClass::Float) => mov_xmm_xmm(buf, dst, src, size),
        (RegClass::Float, RegClass::Int) => mov_gpr_to_xmm(buf, dst, src, size),
        (RegClass::Int, RegClass::Float) => mov_xmm_to_gpr(buf, dst, src, size),
        (RegClass::Int, RegClass::Int) => alu_rr(buf, AluOp::Mov, dst, src, size),
    }
}

/// Stage an immediate bit pattern into the reserved GPR scratch, then
/// copy it into an XMM register — there is no `movimm` form that writes
/// an XMM register directly.
pub fn mov_imm_float(buf: &mut CodeBuffer, dst: Reg, size: OperandSize, imm: i64) {
    let scratch = crate::x64::regs::RESERVED_SCRATCH;
    mov_imm(buf, scratch, size, imm);
    mov_gpr_to_xmm(buf, dst, scratch, size);
}
