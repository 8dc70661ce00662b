//! C6: numeric, local, and global opcode lowering — everything that
//! doesn't touch control flow, memory, or a call. Each handler pops its
//! operands off the compile-time stack, lowers to native instructions
//! through the `MacroAssembler`, and pushes the result back as a
//! `ScratchRegister`.
//!
//! Floating point is data-movement only here (consts, locals, globals,
//! loads/stores in `memaccess.rs`): `mov_imm`/`mov_reg`/`load`/`store`
//! move an `f32`/`f64`'s bits correctly, but `MacroAssembler` has no
//! float arithmetic primitive at all, so `f32`/`f64` arithmetic and
//! comparison opcodes fall through to `UnsupportedOpcode` (see
//! `DESIGN.md`).

use nwasm_core::{CompileError, MachineType, TrapCode};
use nwasm_masm::{Cond, MacroAssembler, OperandSize};
use wasmparser::Operator;

use crate::func::{class_of, size_of, FuncGen};
use crate::stack::StackElement;

/// A binary integer opcode family, dispatched by the concrete
/// `MacroAssembler` method it lowers to.
enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    DivS,
    DivU,
    RemS,
    RemU,
}

impl<'m> FuncGen<'m> {
    pub(crate) fn lower_numeric(&mut self, op: &Operator<'_>) -> Result<bool, CompileError> {
        use MachineType::{I32, I64};
        use Operator::*;
        let handled = match op {
            I32Const { value } => self.push_const(MachineType::I32, *value as u32 as u64),
            I64Const { value } => self.push_const(MachineType::I64, *value as u64),
            F32Const { value } => self.push_const(MachineType::F32, value.bits() as u64),
            F64Const { value } => self.push_const(MachineType::F64, value.bits()),

            LocalGet { local_index } => self.local_get(*local_index),
            LocalSet { local_index } => self.local_set(*local_index, false)?,
            LocalTee { local_index } => self.local_set(*local_index, true)?,
            GlobalGet { global_index } => self.global_get(*global_index),
            GlobalSet { global_index } => self.global_set(*global_index)?,

            I32Add => self.binop(BinOp::Add, I32)?,
            I64Add => self.binop(BinOp::Add, I64)?,
            I32Sub => self.binop(BinOp::Sub, I32)?,
            I64Sub => self.binop(BinOp::Sub, I64)?,
            I32Mul => self.binop(BinOp::Mul, I32)?,
            I64Mul => self.binop(BinOp::Mul, I64)?,
            I32And => self.binop(BinOp::And, I32)?,
            I64And => self.binop(BinOp::And, I64)?,
            I32Or => self.binop(BinOp::Or, I32)?,
            I64Or => self.binop(BinOp::Or, I64)?,
            I32Xor => self.binop(BinOp::Xor, I32)?,
            I64Xor => self.binop(BinOp::Xor, I64)?,
            I32Shl => self.binop(BinOp::Shl, I32)?,
            I64Shl => self.binop(BinOp::Shl, I64)?,
            I32ShrS => self.binop(BinOp::ShrS, I32)?,
            I64ShrS => self.binop(BinOp::ShrS, I64)?,
            I32ShrU => self.binop(BinOp::ShrU, I32)?,
            I64ShrU => self.binop(BinOp::ShrU, I64)?,
            I32DivS => self.divide(BinOp::DivS, I32)?,
            I64DivS => self.divide(BinOp::DivS, I64)?,
            I32DivU => self.divide(BinOp::DivU, I32)?,
            I64DivU => self.divide(BinOp::DivU, I64)?,
            I32RemS => self.divide(BinOp::RemS, I32)?,
            I64RemS => self.divide(BinOp::RemS, I64)?,
            I32RemU => self.divide(BinOp::RemU, I32)?,
            I64RemU => self.divide(BinOp::RemU, I64)?,

            I32Eqz => self.eqz(I32)?,
            I64Eqz => self.eqz(I64)?,
            I32Eq => self.compare(Cond::Eq, I32)?,
            I64Eq => self.compare(Cond::Eq, I64)?,
            I32Ne => self.compare(Cond::Ne, I32)?,
            I64Ne => self.compare(Cond::Ne, I64)?,
            I32LtS => self.compare(Cond::LtSigned, I32)?,
            I64LtS => self.compare(Cond::LtSigned, I64)?,
            I32LtU => self.compare(Cond::LtUnsigned, I32)?,
            I64LtU => self.compare(Cond::LtUnsigned, I64)?,
            I32GtS => self.compare(Cond::GtSigned, I32)?,
            I64GtS => self.compare(Cond::GtSigned, I64)?,
            I32GtU => self.compare(Cond::GtUnsigned, I32)?,
            I64GtU => self.compare(Cond::GtUnsigned, I64)?,
            I32LeS => self.compare(Cond::LeSigned, I32)?,
            I64LeS => self.compare(Cond::LeSigned, I64)?,
            I32LeU => self.compare(Cond::LeUnsigned, I32)?,
            I64LeU => self.compare(Cond::LeUnsigned, I64)?,
            I32GeS => self.compare(Cond::GeSigned, I32)?,
            I64GeS => self.compare(Cond::GeSigned, I64)?,
            I32GeU => self.compare(Cond::GeUnsigned, I32)?,
            I64GeU => self.compare(Cond::GeUnsigned, I64)?,

            // Free relabel: the low 32 bits of the 64-bit register are
            // already correct, and this port never tracks a narrower
            // physical width than the register itself.
            I32WrapI64 => {
                let (reg, _) = self.pop_to_reg(None)?;
                self.stack.push(StackElement::ScratchRegister { reg, mt: MachineType::I32 });
                true
            }
            // Both target ISAs' 32-bit register-to-register moves
            // zero-extend the upper half, so this is a same-width mov
            // relabeled to i64 rather than a dedicated extend
            // instruction.
            I64ExtendI32U => {
                let (src, _) = self.pop_to_reg(None)?;
                let dst = self.alloc_reg(class_of(MachineType::I64), Some(src))?;
                self.masm.mov_reg(dst, src, OperandSize::Word);
                self.stack.push(StackElement::ScratchRegister { reg: dst, mt: MachineType::I64 });
                true
            }
            I32Extend8S => self.sign_extend(OperandSize::Byte, MachineType::I32, false)?,
            I32Extend16S => self.sign_extend(OperandSize::Half, MachineType::I32, false)?,
            I64Extend8S => self.sign_extend(OperandSize::Byte, MachineType::I64, true)?,
            I64Extend16S => self.sign_extend(OperandSize::Half, MachineType::I64, true)?,
            I64Extend32S | I64ExtendI32S => self.sign_extend(OperandSize::Word, MachineType::I64, true)?,

            _ => false,
        };
        Ok(handled)
    }

    fn push_const(&mut self, mt: MachineType, bits: u64) -> bool {
        self.stack.push(StackElement::Constant { mt, bits });
        true
    }

    fn local_get(&mut self, index: u32) -> bool {
        self.stack.push_local(index);
        true
    }

    /// `local.set`/`local.tee` both overwrite the local's frame slot;
    /// `tee` additionally leaves the new value on the stack. Every
    /// existing alias of the local is forced to materialize into its
    /// own register first (§3 invariant: mutating the source must not
    /// retroactively change an already-pushed copy).
    fn local_set(&mut self, index: u32, tee: bool) -> Result<bool, CompileError> {
        for alias in self.stack.take_local_aliases(index) {
            let elem = std::mem::replace(self.stack.get_mut(alias), StackElement::Invalid);
            let (reg, mt) = self.materialize(elem, None)?;
            *self.stack.get_mut(alias) = StackElement::ScratchRegister { reg, mt };
        }
        let local = self.locals[index as usize].clone();
        let (reg, _) = self.pop_to_reg(None)?;
        let dst = nwasm_masm::MemArg { base: self.masm.sp_reg(), offset: self.frame_size as i32 + local.frame_offset };
        self.masm.store(dst, reg, size_of(local.mt));
        if tee {
            self.stack.push(StackElement::ScratchRegister { reg, mt: local.mt });
        } else {
            self.regs.mark_free(reg);
        }
        Ok(true)
    }

    fn global_get(&mut self, index: u32) -> bool {
        self.stack.push_global(index);
        true
    }

    /// Every alias of the global must be invalidated the same way a
    /// local's are: a live register-cached copy would otherwise keep
    /// reading the pre-`global.set` value.
    fn global_set(&mut self, index: u32) -> Result<bool, CompileError> {
        for alias in self.stack.take_global_aliases(index) {
            let elem = std::mem::replace(self.stack.get_mut(alias), StackElement::Invalid);
            let (reg, mt) = self.materialize(elem, None)?;
            *self.stack.get_mut(alias) = StackElement::ScratchRegister { reg, mt };
        }
        let global = self.module.globals[index as usize].clone();
        let link_offset = global.link_data_offset.expect("mutable globals always reserve a link-data slot");
        let (reg, _) = self.pop_to_reg(None)?;
        let disp = nwasm_core::basedata::link_data_offset_from_basedata_reg(
            self.link_data_length,
            self.stacktrace_record_count,
            link_offset,
        );
        self.masm.store(nwasm_masm::MemArg { base: self.masm.basedata_reg(), offset: disp }, reg, size_of(global.machine_type));
        self.regs.mark_free(reg);
        Ok(true)
    }

    fn binop(&mut self, op: BinOp, mt: MachineType) -> Result<bool, CompileError> {
        let (rhs, _) = self.pop_to_reg(None)?;
        let (lhs, _) = self.pop_to_reg(None)?;
        let dst = self.alloc_reg(class_of(mt), Some(lhs))?;
        let size = size_of(mt);
        match op {
            BinOp::Add => self.masm.add(dst, lhs, rhs, size),
            BinOp::Sub => self.masm.sub(dst, lhs, rhs, size),
            BinOp::Mul => self.masm.mul(dst, lhs, rhs, size),
            BinOp::And => self.masm.and(dst, lhs, rhs, size),
            BinOp::Or => self.masm.or(dst, lhs, rhs, size),
            BinOp::Xor => self.masm.xor(dst, lhs, rhs, size),
            BinOp::Shl | BinOp::ShrS | BinOp::ShrU => return self.shift(op, dst, lhs, rhs, size, mt),
            BinOp::DivS | BinOp::DivU | BinOp::RemS | BinOp::RemU => unreachable!("routed through divide()"),
        }
        if dst != lhs {
            self.regs.mark_free(lhs);
        }
        if rhs != lhs && rhs != dst {
            self.regs.mark_free(rhs);
        }
        self.stack.push(StackElement::ScratchRegister { reg: dst, mt });
        Ok(true)
    }

    /// A shift count on x64 must sit in `cl`; request that register as
    /// the rhs operand's hint so no extra move is needed (`fixed_shift_count_reg`).
    fn shift(&mut self, op: BinOp, dst: nwasm_masm::Reg, lhs: nwasm_masm::Reg, rhs: nwasm_masm::Reg, size: OperandSize, mt: MachineType) -> Result<bool, CompileError> {
        let rhs = if let Some(fixed) = self.masm.fixed_shift_count_reg() {
            if rhs != fixed {
                self.masm.mov_reg(fixed, rhs, OperandSize::Word);
                self.regs.mark_free(rhs);
            }
            fixed
        } else {
            rhs
        };
        match op {
            BinOp::Shl => self.masm.shl(dst, lhs, rhs, size),
            BinOp::ShrS => self.masm.shr_signed(dst, lhs, rhs, size),
            BinOp::ShrU => self.masm.shr_unsigned(dst, lhs, rhs, size),
            _ => unreachable!(),
        }
        if dst != lhs {
            self.regs.mark_free(lhs);
        }
        self.stack.push(StackElement::ScratchRegister { reg: dst, mt });
        Ok(true)
    }

    /// Integer division and remainder. Emits the two Wasm-mandated trap
    /// checks (`IntegerDivideByZero` always; `IntegerOverflow` for the
    /// signed forms' `MIN / -1` case) before handing off to the
    /// backend's divide instruction, per §4.4's "callers are
    /// responsible for the trap checks beforehand" contract.
    fn divide(&mut self, op: BinOp, mt: MachineType) -> Result<bool, CompileError> {
        let size = size_of(mt);
        let (rhs_in, _) = self.pop_to_reg(None)?;
        let (lhs_in, _) = self.pop_to_reg(None)?;

        let dividend_hint = self.masm.fixed_div_dividend_reg();
        let lhs = if let Some(fixed) = dividend_hint {
            if lhs_in != fixed {
                self.masm.mov_reg(fixed, lhs_in, size);
                self.regs.mark_free(lhs_in);
            }
            fixed
        } else {
            lhs_in
        };
        // x64's idiv/div also clobber rdx as a side effect of computing
        // the quotient (div_clobbers()); both operands were just popped
        // fresh off the compile-time stack, so nothing else can be
        // live there at a divide site in this port's lowering order.

        self.masm.cmp_imm(rhs_in, 0, size);
        self.masm.conditional_trap(TrapCode::IntegerDivideByZero, Cond::Eq);

        let is_signed = matches!(op, BinOp::DivS | BinOp::RemS);
        if is_signed {
            let min_value: i64 = if size.bytes() == 8 { i64::MIN } else { i32::MIN as i64 };
            self.masm.cmp_imm(rhs_in, -1, size);
            let skip = self.masm.branch_if(Cond::Ne, None);
            self.masm.cmp_imm(lhs, min_value as i32, size);
            self.masm.conditional_trap(TrapCode::IntegerOverflow, Cond::Eq);
            let here = self.masm.buffer().current_position();
            self.bind(skip, here)?;
        }

        let dst = self.alloc_reg(class_of(mt), None)?;
        match op {
            BinOp::DivS => self.masm.div_signed(dst, lhs, rhs_in, size),
            BinOp::DivU => self.masm.div_unsigned(dst, lhs, rhs_in, size),
            BinOp::RemS => self.masm.rem_signed(dst, lhs, rhs_in, size),
            BinOp::RemU => self.masm.rem_unsigned(dst, lhs, rhs_in, size),
            _ => unreachable!(),
        }
        if dst != lhs {
            self.regs.mark_free(lhs);
        }
        if dst != rhs_in && rhs_in != lhs {
            self.regs.mark_free(rhs_in);
        }
        self.stack.push(StackElement::ScratchRegister { reg: dst, mt });
        Ok(true)
    }

    /// `i32.extend8_s`/`i32.extend16_s`/`i64.extend8_s`/`i64.extend16_s`/
    /// `i64.extend32_s`/`i64.extend_i32_s`: sign-extend the low `from`
    /// bits of the popped value into a register of `result_mt`. The
    /// `i64.extend_i32_s` case shares the `Word`/`to64=true` arm with
    /// `i64.extend32_s` — both sign-extend the low 32 bits into a full
    /// 64-bit register, regardless of whether the source was logically
    /// an `i32` or an `i64`.
    fn sign_extend(&mut self, from: OperandSize, result_mt: MachineType, to64: bool) -> Result<bool, CompileError> {
        let (src, _) = self.pop_to_reg(None)?;
        let dst = self.alloc_reg(class_of(result_mt), Some(src))?;
        match from {
            OperandSize::Byte => self.masm.sign_extend8(dst, src, to64),
            OperandSize::Half => self.masm.sign_extend16(dst, src, to64),
            OperandSize::Word => self.masm.sign_extend32(dst, src),
            OperandSize::Quad => unreachable!(),
        }
        self.stack.push(StackElement::ScratchRegister { reg: dst, mt: result_mt });
        Ok(true)
    }

    fn eqz(&mut self, mt: MachineType) -> Result<bool, CompileError> {
        let (reg, _) = self.pop_to_reg(None)?;
        self.masm.cmp_imm(reg, 0, size_of(mt));
        self.masm.set_cond(reg, Cond::Eq);
        self.stack.push(StackElement::ScratchRegister { reg, mt: MachineType::I32 });
        Ok(true)
    }

    /// Comparisons materialize straight to a 0/1 value rather than
    /// pushing a fusable `DeferredAction`: fusing a comparison directly
    /// into the next `br_if`/`if` branch (§4.4) needs flag-liveness
    /// tracking across the opcode that sits in between, which this port
    /// doesn't implement (see `DESIGN.md`) — every comparison costs one
    /// extra `set_cond` plus a `cmp_imm` at the consuming branch instead.
    fn compare(&mut self, cond: Cond, mt: MachineType) -> Result<bool, CompileError> {
        let (rhs, _) = self.pop_to_reg(None)?;
        let (lhs, _) = self.pop_to_reg(None)?;
        self.masm.cmp(lhs, rhs, size_of(mt));
        let dst = self.alloc_reg(class_of(MachineType::I32), Some(lhs))?;
        self.masm.set_cond(dst, cond);
        if dst != lhs {
            self.regs.mark_free(lhs);
        }
        if rhs != lhs && rhs != dst {
            self.regs.mark_free(rhs);
        }
        self.stack.push(StackElement::ScratchRegister { reg: dst, mt: MachineType::I32 });
        Ok(true)
    }
}
