//! The x86-64 backend: System V calling convention, a REX-prefixed
//! ModRM/SIB encoder covering the GPR subset this compiler needs, and
//! the trap-stub/stack-fence machinery shared with every other ISA
//! through [`crate::MacroAssembler`].

mod encode;
mod regs;

pub use regs::{gpr, xmm};

use crate::buffer::{BranchOutOfRange, CodeBuffer, Label, RelocKind};
use crate::cc::CallingConvention;
use crate::masm::{Cond, MacroAssembler, MemArg, OperandSize};
use crate::reg::Reg;
use crate::trapstub::TrapStubTable;
use nwasm_core::{CompileError, ImplementationLimit, TrapCode};
use smallvec::smallvec;

/// Hard ceiling on a single function's stack frame, matching the
/// order-of-magnitude `original_source` enforces for `tricore`/`x86_64`
/// alike (a compiled frame this large almost certainly indicates a
/// runaway local count rather than legitimate code).
pub const MAX_STACK_FRAME_BYTES: u32 = 1 << 20;

pub struct X64Masm {
    buf: CodeBuffer,
    cc: CallingConvention,
    pub trap_stubs: TrapStubTable,
    sp_offset: u32,
}

impl X64Masm {
    pub fn new() -> Self {
        X64Masm {
            buf: CodeBuffer::new(),
            cc: CallingConvention {
                int_params: smallvec![gpr::RDI, gpr::RSI, gpr::RDX, gpr::RCX, gpr::R8, gpr::R9],
                float_params: smallvec![xmm::XMM0, xmm::XMM1, xmm::XMM2, xmm::XMM3, xmm::XMM4, xmm::XMM5, xmm::XMM6, xmm::XMM7],
                int_return: gpr::RAX,
                float_return: xmm::XMM0,
                caller_saved_int: smallvec![gpr::RAX, gpr::RCX, gpr::RDX, gpr::RSI, gpr::RDI, gpr::R8, gpr::R9, gpr::R10, gpr::R11],
                caller_saved_float: smallvec![
                    xmm::XMM0, xmm::XMM1, xmm::XMM2, xmm::XMM3, xmm::XMM4, xmm::XMM5, xmm::XMM6, xmm::XMM7
                ],
                stack_alignment: 16,
            },
            trap_stubs: TrapStubTable::new(),
            sp_offset: 0,
        }
    }

    pub fn sp_offset(&self) -> u32 {
        self.sp_offset
    }

    fn emit_trap_stub(&mut self, code: TrapCode) -> u32 {
        let offset = self.buf.len();
        // movb $code, basedata_trap_slot(rip-independent: via a fixed
        // register the runtime reserves for the basedata base, r14).
        encode::mov_imm8_to_mem(&mut self.buf, regs::BASEDATA_REG, encode::TRAP_CODE_SLOT_OFFSET, code.code());
        // jmp to the generic unwind path, whose address lives in a
        // basedata slot; encoded as an indirect jump through that slot.
        encode::jmp_mem(&mut self.buf, regs::BASEDATA_REG, encode::TRAP_HANDLER_PTR_OFFSET);
        self.trap_stubs.record(code, offset);
        offset
    }
}

impl Default for X64Masm {
    fn default() -> Self {
        Self::new()
    }
}

impl MacroAssembler for X64Masm {
    fn buffer(&self) -> &CodeBuffer {
        &self.buf
    }

    fn buffer_mut(&mut self) -> &mut CodeBuffer {
        &mut self.buf
    }

    fn calling_convention(&self) -> &CallingConvention {
        &self.cc
    }

    fn pointer_bytes(&self) -> u32 {
        8
    }

    fn basedata_reg(&self) -> Reg {
        regs::BASEDATA_REG
    }

    fn reserved_scratch(&self) -> Reg {
        regs::RESERVED_SCRATCH
    }

    fn sp_reg(&self) -> Reg {
        gpr::RSP
    }

    fn usable_int_regs(&self) -> crate::reg::RegSet {
        // Every GPR except rsp(4), rbp(5), and the two reserved above
        // (r14, r15).
        crate::reg::RegSet(0xffff & !((1 << 4) | (1 << 5) | (1 << 14) | (1 << 15)))
    }

    fn usable_float_regs(&self) -> crate::reg::RegSet {
        crate::reg::RegSet(0xff)
    }

    fn mov_imm(&mut self, dst: Reg, size: OperandSize, imm: i64) {
        if dst.class == crate::reg::RegClass::Float {
            encode::mov_imm_float(&mut self.buf, dst, size, imm);
        } else {
            encode::mov_imm(&mut self.buf, dst, size, imm);
        }
    }

    fn mov_reg(&mut self, dst: Reg, src: Reg, size: OperandSize) {
        if dst == src {
            return;
        }
        if dst.class == crate::reg::RegClass::Float || src.class == crate::reg::RegClass::Float {
            encode::mov_float_reg(&mut self.buf, dst, src, size);
        } else {
            encode::alu_rr(&mut self.buf, encode::AluOp::Mov, dst, src, size);
        }
    }

    fn add_imm_to_reg(&mut self, dst: Reg, imm: i32, size: OperandSize) {
        encode::alu_ri(&mut self.buf, encode::AluOp::Add, dst, imm, size);
    }

    fn add_sp(&mut self, delta: i32) {
        encode::alu_ri(&mut self.buf, encode::AluOp::Add, gpr::RSP, delta, OperandSize::Quad);
        self.sp_offset = (self.sp_offset as i64 - delta as i64) as u32;
    }

    fn load(&mut self, dst: Reg, addr: MemArg, size: OperandSize, sign_extend: bool) {
        if dst.class == crate::reg::RegClass::Float {
            encode::load_float(&mut self.buf, dst, addr, size);
        } else {
            encode::load(&mut self.buf, dst, addr, size, sign_extend);
        }
    }

    fn store(&mut self, addr: MemArg, src: Reg, size: OperandSize) {
        if src.class == crate::reg::RegClass::Float {
            encode::store_float(&mut self.buf, addr, src, size);
        } else {
            encode::store(&mut self.buf, addr, src, size);
        }
    }

    fn add(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize) {
        self.mov_reg(dst, lhs, size);
        encode::alu_rr(&mut self.buf, encode::AluOp::Add, dst, rhs, size);
    }

    fn sub(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize) {
        self.mov_reg(dst, lhs, size);
        encode::alu_rr(&mut self.buf, encode::AluOp::Sub, dst, rhs, size);
    }

    fn mul(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize) {
        self.mov_reg(dst, lhs, size);
        encode::imul_rr(&mut self.buf, dst, rhs, size);
    }

    fn and(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize) {
        self.mov_reg(dst, lhs, size);
        encode::alu_rr(&mut self.buf, encode::AluOp::And, dst, rhs, size);
    }

    fn or(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize) {
        self.mov_reg(dst, lhs, size);
        encode::alu_rr(&mut self.buf, encode::AluOp::Or, dst, rhs, size);
    }

    fn xor(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize) {
        self.mov_reg(dst, lhs, size);
        encode::alu_rr(&mut self.buf, encode::AluOp::Xor, dst, rhs, size);
    }

    fn cmp(&mut self, lhs: Reg, rhs: Reg, size: OperandSize) {
        encode::alu_rr(&mut self.buf, encode::AluOp::Cmp, lhs, rhs, size);
    }

    fn cmp_imm(&mut self, lhs: Reg, imm: i32, size: OperandSize) {
        encode::alu_ri(&mut self.buf, encode::AluOp::Cmp, lhs, imm, size);
    }

    fn set_cond(&mut self, dst: Reg, cond: Cond) {
        encode::setcc(&mut self.buf, dst, cond);
    }

    fn jump(&mut self, target: Option<Label>) -> Label {
        self.buf.put1(0xe9);
        let site = self.buf.reserve_reloc(RelocKind::PcRel32);
        if let Some(t) = target {
            let _ = self.buf.bind_pcrel32(site, t);
        }
        site
    }

    fn branch_if(&mut self, cond: Cond, target: Option<Label>) -> Label {
        self.buf.put1(0x0f);
        self.buf.put1(encode::jcc_opcode(cond));
        let site = self.buf.reserve_reloc(RelocKind::PcRel32);
        if let Some(t) = target {
            let _ = self.buf.bind_pcrel32(site, t);
        }
        site
    }

    fn bind_label(&mut self, label: Label, target: Label) -> Result<(), BranchOutOfRange> {
        self.buf.bind_pcrel32(label, target)
    }

    fn trap(&mut self, code: TrapCode) {
        let here = self.buf.len();
        let stub = match self.trap_stubs.reusable_stub(code, here) {
            Some(off) => off,
            None => self.emit_trap_stub(code),
        };
        let _ = self.jump(Some(Label(stub)));
    }

    fn conditional_trap(&mut self, code: TrapCode, cond: Cond) {
        let here = self.buf.len();
        let stub = match self.trap_stubs.reusable_stub(code, here) {
            Some(off) => off,
            None => self.emit_trap_stub(code),
        };
        let _ = self.branch_if(cond, Some(Label(stub)));
    }

    fn check_stack_fence(&mut self, data_scratch: Reg, addr_scratch: Reg) {
        encode::load(
            &mut self.buf,
            data_scratch,
            MemArg { base: regs::BASEDATA_REG, offset: encode::STACK_FENCE_OFFSET },
            OperandSize::Quad,
            false,
        );
        self.mov_reg(addr_scratch, gpr::RSP, OperandSize::Quad);
        self.cmp(addr_scratch, data_scratch, OperandSize::Quad);
        self.conditional_trap(TrapCode::StackFenceBreached, Cond::LtUnsigned);
    }

    fn set_stack_frame_size(
        &mut self,
        new_size: u32,
        checked_high_water_mark: &mut u32,
        data_scratch: Reg,
        addr_scratch: Reg,
    ) -> Result<(), CompileError> {
        if new_size > MAX_STACK_FRAME_BYTES {
            return Err(CompileError::ImplementationLimitReached(ImplementationLimit::StackFrameTooLarge {
                requested: new_size,
                limit: MAX_STACK_FRAME_BYTES,
            }));
        }
        let aligned = (new_size + 15) & !15;
        let delta = self.sp_offset as i64 - aligned as i64;
        if delta != 0 {
            self.add_sp(delta as i32);
        }
        if aligned > *checked_high_water_mark {
            self.check_stack_fence(data_scratch, addr_scratch);
            *checked_high_water_mark = aligned;
        }
        Ok(())
    }

    fn call_direct(&mut self, target: Label) {
        self.buf.put1(0xe8);
        let site = self.buf.reserve_reloc(RelocKind::PcRel32);
        let _ = self.buf.bind_pcrel32(site, target);
    }

    fn call_direct_unbound(&mut self) -> Label {
        self.buf.put1(0xe8);
        self.buf.reserve_reloc(RelocKind::PcRel32)
    }

    fn call_indirect(&mut self, target: Reg) {
        encode::call_indirect(&mut self.buf, target);
    }

    fn ret(&mut self) {
        self.buf.put1(0xc3);
    }

    fn push(&mut self, reg: Reg) {
        encode::push(&mut self.buf, reg);
        self.sp_offset += 8;
    }

    fn pop(&mut self, reg: Reg) {
        encode::pop(&mut self.buf, reg);
        self.sp_offset -= 8;
    }

    fn fixed_shift_count_reg(&self) -> Option<Reg> {
        Some(gpr::RCX)
    }

    fn fixed_div_dividend_reg(&self) -> Option<Reg> {
        Some(gpr::RAX)
    }

    fn div_clobbers(&self) -> crate::reg::RegSet {
        let mut set = crate::reg::RegSet::EMPTY;
        set.insert(gpr::RAX.index);
        set.insert(gpr::RDX.index);
        set
    }

    fn shl(&mut self, dst: Reg, lhs: Reg, _rhs: Reg, size: OperandSize) {
        // `_rhs` is asserted (by the caller's use of
        // `fixed_shift_count_reg`) to already be `cl`; the encoding
        // reads it implicitly.
        self.mov_reg(dst, lhs, size);
        encode::shift_by_cl(&mut self.buf, encode::ShiftOp::Shl, dst, size);
    }

    fn shr_signed(&mut self, dst: Reg, lhs: Reg, _rhs: Reg, size: OperandSize) {
        self.mov_reg(dst, lhs, size);
        encode::shift_by_cl(&mut self.buf, encode::ShiftOp::Sar, dst, size);
    }

    fn shr_unsigned(&mut self, dst: Reg, lhs: Reg, _rhs: Reg, size: OperandSize) {
        self.mov_reg(dst, lhs, size);
        encode::shift_by_cl(&mut self.buf, encode::ShiftOp::Shr, dst, size);
    }

    fn div_signed(&mut self, dst: Reg, _lhs: Reg, rhs: Reg, size: OperandSize) {
        // `_lhs` is asserted to already be in `rax`.
        encode::sign_extend_into_dx(&mut self.buf, size);
        encode::idiv(&mut self.buf, rhs, size, true);
        self.mov_reg(dst, gpr::RAX, size);
    }

    fn div_unsigned(&mut self, dst: Reg, _lhs: Reg, rhs: Reg, size: OperandSize) {
        encode::zero_dx(&mut self.buf, size);
        encode::idiv(&mut self.buf, rhs, size, false);
        self.mov_reg(dst, gpr::RAX, size);
    }

    fn rem_signed(&mut self, dst: Reg, _lhs: Reg, rhs: Reg, size: OperandSize) {
        encode::sign_extend_into_dx(&mut self.buf, size);
        encode::idiv(&mut self.buf, rhs, size, true);
        self.mov_reg(dst, gpr::RDX, size);
    }

    fn rem_unsigned(&mut self, dst: Reg, _lhs: Reg, rhs: Reg, size: OperandSize) {
        encode::zero_dx(&mut self.buf, size);
        encode::idiv(&mut self.buf, rhs, size, false);
        self.mov_reg(dst, gpr::RDX, size);
    }

    fn sign_extend8(&mut self, dst: Reg, src: Reg, to64: bool) {
        encode::sign_extend_rr(&mut self.buf, dst, src, OperandSize::Byte, to64);
    }

    fn sign_extend16(&mut self, dst: Reg, src: Reg, to64: bool) {
        encode::sign_extend_rr(&mut self.buf, dst, src, OperandSize::Half, to64);
    }

    fn sign_extend32(&mut self, dst: Reg, src: Reg) {
        encode::sign_extend_rr(&mut self.buf, dst, src, OperandSize::Word, true);
    }
}
