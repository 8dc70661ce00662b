//! C6: linear-memory opcode lowering — every `load`/`store` variant,
//! plus `memory.size`/`memory.grow`. Every access funnels through
//! [`FuncGen::effective_address`], which folds in the bounds check (when
//! enabled) and the basedata-relative base-pointer add, so no load or
//! store elsewhere in this module ever builds a [`MemArg`] by hand.

use nwasm_core::{basedata, CompileError, ImplementationLimit, MachineType, TrapCode};
use nwasm_masm::{Cond, MacroAssembler, MemArg, OperandSize, Reg, RegClass};
use wasmparser::Operator;

use crate::func::{class_of, size_of, FuncGen};
use crate::regalloc::{resolve_register_copies, CopyEdge, CopySource};
use crate::stack::StackElement;

impl<'m> FuncGen<'m> {
    pub(crate) fn lower_memaccess(&mut self, op: &Operator<'_>) -> Result<bool, CompileError> {
        use Operator::*;
        let handled = match op {
            I32Load { memarg } => self.load_op(memarg, OperandSize::Word, false, MachineType::I32)?,
            I64Load { memarg } => self.load_op(memarg, OperandSize::Quad, false, MachineType::I64)?,
            F32Load { memarg } => self.load_op(memarg, OperandSize::Word, false, MachineType::F32)?,
            F64Load { memarg } => self.load_op(memarg, OperandSize::Quad, false, MachineType::F64)?,

            I32Load8S { memarg } => self.load_op(memarg, OperandSize::Byte, true, MachineType::I32)?,
            I32Load8U { memarg } => self.load_op(memarg, OperandSize::Byte, false, MachineType::I32)?,
            I32Load16S { memarg } => self.load_op(memarg, OperandSize::Half, true, MachineType::I32)?,
            I32Load16U { memarg } => self.load_op(memarg, OperandSize::Half, false, MachineType::I32)?,
            I64Load32S { memarg } => self.load_op(memarg, OperandSize::Word, true, MachineType::I64)?,
            I64Load32U { memarg } => self.load_op(memarg, OperandSize::Word, false, MachineType::I64)?,
            I64Load8U { memarg } => self.load_op(memarg, OperandSize::Byte, false, MachineType::I64)?,
            I64Load16U { memarg } => self.load_op(memarg, OperandSize::Half, false, MachineType::I64)?,
            // A single `load(.., sign_extend: true)` only ever sign-fills
            // up to the register width `size` itself names (a 32-bit
            // destination on x64, zero-extended by the architecture the
            // rest of the way to 64) so it can't produce a 64-bit sign
            // fill from an 8/16-bit source in one step; these two widen
            // in a second instruction instead.
            I64Load8S { memarg } => self.load_narrow_sign_extend_i64(memarg, OperandSize::Byte)?,
            I64Load16S { memarg } => self.load_narrow_sign_extend_i64(memarg, OperandSize::Half)?,

            I32Store { memarg } => self.store_op(memarg, OperandSize::Word)?,
            I64Store { memarg } => self.store_op(memarg, OperandSize::Quad)?,
            F32Store { memarg } => self.store_op(memarg, OperandSize::Word)?,
            F64Store { memarg } => self.store_op(memarg, OperandSize::Quad)?,
            I32Store8 { memarg } => self.store_op(memarg, OperandSize::Byte)?,
            I32Store16 { memarg } => self.store_op(memarg, OperandSize::Half)?,
            I64Store8 { memarg } => self.store_op(memarg, OperandSize::Byte)?,
            I64Store16 { memarg } => self.store_op(memarg, OperandSize::Half)?,
            I64Store32 { memarg } => self.store_op(memarg, OperandSize::Word)?,

            MemorySize { .. } => self.memory_size()?,
            MemoryGrow { .. } => self.memory_grow()?,

            _ => false,
        };
        Ok(handled)
    }

    /// `address + staticOffset`, bounds-checked against the basedata
    /// `ACTUAL_LIN_MEM_BYTE_SIZE` slot and rebased onto linear memory
    /// through `basedata_reg`. The popped Wasm address is always an
    /// `i32`; widening it through a 32-bit register move zero-extends
    /// the upper half on both backends (the same convention
    /// `i64.extend_i32_u` relies on), so there is no separate
    /// sign/zero-extend step here.
    ///
    /// The check compares `addr + offset + width` against the byte
    /// limit directly (a sum, not `addr` against `limit - offset -
    /// width`) so a `staticOffset` close to `u32::MAX` can never
    /// underflow the comparison into a false pass.
    fn effective_address(&mut self, addr_reg: Reg, static_offset: u64, access_bytes: u32) -> Result<MemArg, CompileError> {
        // Reject up front whenever `offset + width` wouldn't fit the
        // sum the bounds check computes, so the host-side arithmetic
        // below can never overflow even for a pathological `memarg`.
        let addend = static_offset + access_bytes as u64;
        if addend > i32::MAX as u64 {
            return Err(CompileError::ImplementationLimitReached(ImplementationLimit::StaticMemoryOffsetTooLarge {
                offset: static_offset,
                limit: i32::MAX as u32,
            }));
        }
        let offset_i32 = static_offset as i32;
        let addend_i32 = addend as i32;

        let scratch = self.masm.reserved_scratch();
        self.masm.mov_reg(scratch, addr_reg, OperandSize::Word);

        if self.bounds_checks {
            let limit = self.alloc_reg(RegClass::Int, None)?;
            self.masm.load(
                limit,
                MemArg { base: self.masm.basedata_reg(), offset: -basedata::from_end::ACTUAL_LIN_MEM_BYTE_SIZE },
                OperandSize::Quad,
                false,
            );
            let sum = self.alloc_reg(RegClass::Int, None)?;
            self.masm.mov_reg(sum, scratch, OperandSize::Quad);
            self.masm.add_imm_to_reg(sum, addend_i32, OperandSize::Quad);
            self.masm.cmp(sum, limit, OperandSize::Quad);
            self.masm.conditional_trap(TrapCode::OutOfBoundsMemoryAccess, Cond::GtUnsigned);
            self.regs.mark_free(sum);
            self.regs.mark_free(limit);
        }

        let basedata_reg = self.masm.basedata_reg();
        self.masm.add(scratch, scratch, basedata_reg, OperandSize::Quad);
        Ok(MemArg { base: scratch, offset: offset_i32 })
    }

    fn load_op(
        &mut self,
        memarg: &wasmparser::MemArg,
        size: OperandSize,
        sign_extend: bool,
        result_mt: MachineType,
    ) -> Result<bool, CompileError> {
        let (addr_reg, _) = self.pop_to_reg(None)?;
        let mem = self.effective_address(addr_reg, memarg.offset, size.bytes())?;
        self.regs.mark_free(addr_reg);
        let dst = self.alloc_reg(class_of(result_mt), None)?;
        self.masm.load(dst, mem, size, sign_extend);
        self.stack.push(StackElement::ScratchRegister { reg: dst, mt: result_mt });
        Ok(true)
    }

    fn load_narrow_sign_extend_i64(&mut self, memarg: &wasmparser::MemArg, from: OperandSize) -> Result<bool, CompileError> {
        let (addr_reg, _) = self.pop_to_reg(None)?;
        let mem = self.effective_address(addr_reg, memarg.offset, from.bytes())?;
        self.regs.mark_free(addr_reg);
        let dst = self.alloc_reg(RegClass::Int, None)?;
        self.masm.load(dst, mem, from, false);
        match from {
            OperandSize::Byte => self.masm.sign_extend8(dst, dst, true),
            OperandSize::Half => self.masm.sign_extend16(dst, dst, true),
            _ => unreachable!("only i64.load8_s/load16_s route through here"),
        }
        self.stack.push(StackElement::ScratchRegister { reg: dst, mt: MachineType::I64 });
        Ok(true)
    }

    fn store_op(&mut self, memarg: &wasmparser::MemArg, size: OperandSize) -> Result<bool, CompileError> {
        let (val_reg, _) = self.pop_to_reg(None)?;
        let (addr_reg, _) = self.pop_to_reg(None)?;
        let mem = self.effective_address(addr_reg, memarg.offset, size.bytes())?;
        self.regs.mark_free(addr_reg);
        self.masm.store(mem, val_reg, size);
        self.regs.mark_free(val_reg);
        Ok(true)
    }

    fn memory_size(&mut self) -> Result<bool, CompileError> {
        let dst = self.alloc_reg(RegClass::Int, None)?;
        self.masm.load(
            dst,
            MemArg { base: self.masm.basedata_reg(), offset: -basedata::from_end::LIN_MEM_WASM_SIZE },
            OperandSize::Word,
            false,
        );
        self.stack.push(StackElement::ScratchRegister { reg: dst, mt: MachineType::I32 });
        Ok(true)
    }

    /// `new_pages = current + delta`; over the module's declared (or
    /// the hard Wasm32) page ceiling, push `-1` without ever calling the
    /// helper. Otherwise marshal `(basedata_reg, new_pages)` into the
    /// first two integer argument registers and call through the
    /// basedata `MEMORY_HELPER_PTR` slot, which grows the backing
    /// allocation and returns either the new basedata pointer (memory
    /// may have moved) or null on failure.
    ///
    /// `old_pages` is spilled across the call through the basedata
    /// `SPILL_REGION` scratch slots: it's an ordinary allocator-owned
    /// register, so an arbitrary native call is free to clobber it like
    /// any other caller-saved register.
    fn memory_grow(&mut self) -> Result<bool, CompileError> {
        let (delta, _) = self.pop_to_reg(None)?;

        let new_pages = self.alloc_reg(RegClass::Int, None)?;
        self.masm.load(
            new_pages,
            MemArg { base: self.masm.basedata_reg(), offset: -basedata::from_end::LIN_MEM_WASM_SIZE },
            OperandSize::Word,
            false,
        );
        let old_pages = self.alloc_reg(RegClass::Int, None)?;
        self.masm.mov_reg(old_pages, new_pages, OperandSize::Word);
        self.masm.add(new_pages, new_pages, delta, OperandSize::Word);
        self.regs.mark_free(delta);

        let max_pages = self
            .module
            .memory
            .and_then(|m| m.max_pages)
            .unwrap_or(nwasm_core::MAX_WASM32_PAGES)
            .min(nwasm_core::MAX_WASM32_PAGES);
        self.masm.cmp_imm(new_pages, max_pages as i32, OperandSize::Word);
        let over_limit = self.masm.branch_if(Cond::GtUnsigned, None);

        self.masm.store(
            MemArg { base: self.masm.basedata_reg(), offset: -basedata::from_end::SPILL_REGION },
            old_pages,
            OperandSize::Word,
        );

        let cc = self.masm.calling_convention().clone();
        let basedata_reg = self.masm.basedata_reg();
        let edges = [
            CopyEdge { dst: cc.int_params[0], src: CopySource::Reg(basedata_reg), size: OperandSize::Quad },
            CopyEdge { dst: cc.int_params[1], src: CopySource::Reg(new_pages), size: OperandSize::Word },
        ];
        let scratch = self.masm.reserved_scratch();
        resolve_register_copies(self.masm, &edges, scratch);
        self.regs.mark_free(new_pages);

        let helper_ptr = self.masm.reserved_scratch();
        self.masm.load(
            helper_ptr,
            MemArg { base: self.masm.basedata_reg(), offset: -basedata::from_end::MEMORY_HELPER_PTR },
            OperandSize::Quad,
            false,
        );
        self.masm.call_indirect(helper_ptr);

        self.masm.load(
            old_pages,
            MemArg { base: self.masm.basedata_reg(), offset: -basedata::from_end::SPILL_REGION },
            OperandSize::Word,
            false,
        );

        let result_reg = cc.int_return;
        self.masm.cmp_imm(result_reg, 0, OperandSize::Quad);
        let helper_failed = self.masm.branch_if(Cond::Eq, None);
        let basedata_reg = self.masm.basedata_reg();
        self.masm.mov_reg(basedata_reg, result_reg, OperandSize::Quad);
        let done = self.masm.jump(None);

        let fail_here = self.masm.buffer().current_position();
        self.bind(over_limit, fail_here)?;
        self.bind(helper_failed, fail_here)?;
        self.masm.mov_imm(old_pages, OperandSize::Word, -1);

        let done_here = self.masm.buffer().current_position();
        self.bind(done, done_here)?;

        self.stack.push(StackElement::ScratchRegister { reg: old_pages, mt: MachineType::I32 });
        Ok(true)
    }
}
