//! C6: `call` and `call_indirect` lowering.
//!
//! Every callee, imported or defined, reserves a link-data slot that
//! holds its resolved entry pointer (`FunctionInfo::link_data_offset`) —
//! an imported slot is filled in at link time from the host symbol, a
//! defined function's slot is patched with its own compiled entry
//! address once the whole module has been assembled. This port never
//! special-cases a direct call against a known code-buffer position:
//! both kinds indirect through their link-data pointer exactly like a
//! mutable global read (`ops.rs::global_get`), so there is no forward
//! reference for the driver to patch mid-compile.
//!
//! `call_indirect` instead reads a function pointer out of the single
//! table's element array, bounds-checked against its declared length
//! and signature-checked against the call site's static type index.

use nwasm_core::{basedata, CompileError, ImplementationLimit, MachineType, TrapCode};
use nwasm_masm::{Cond, MacroAssembler, MemArg, OperandSize, Reg, RegClass};
use smallvec::SmallVec;
use wasmparser::Operator;

use crate::func::{class_of, size_of, FuncGen};
use crate::regalloc::{resolve_register_copies, CopyEdge, CopySource};
use crate::stack::{StackElement, TempStorage};

/// 16 bytes per table element: an 8-byte function pointer followed by
/// an 8-byte declared signature index, populated at link time from the
/// module's active element segments (see `nwasm_core::basedata`).
const TABLE_ENTRY_BYTES: i32 = 16;
const TABLE_ENTRY_FUNC_PTR_OFFSET: i32 = 0;
const TABLE_ENTRY_SIG_INDEX_OFFSET: i32 = 8;

impl<'m> FuncGen<'m> {
    pub(crate) fn lower_call(&mut self, op: &Operator<'_>) -> Result<bool, CompileError> {
        match op {
            Operator::Call { function_index } => {
                self.call_direct(*function_index)?;
                Ok(true)
            }
            Operator::CallIndirect { index, .. } => {
                self.call_indirect(*index)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn call_direct(&mut self, function_index: u32) -> Result<(), CompileError> {
        let func = self.module.functions[function_index as usize].clone();
        let sig = self.module.types[func.signature_index as usize].clone();
        reject_multi_result(&sig)?;

        self.spill_live_for_call()?;
        self.marshal_args(&sig.params)?;

        let link_offset = func
            .link_data_offset
            .expect("every function, imported or defined, reserves a link-data entry-point slot");
        let disp = basedata::link_data_offset_from_basedata_reg(self.link_data_length, self.stacktrace_record_count, link_offset);
        let target = self.masm.reserved_scratch();
        self.masm.load(target, MemArg { base: self.masm.basedata_reg(), offset: disp }, OperandSize::Quad, false);
        self.masm.call_indirect(target);

        self.push_call_result(&sig)?;
        Ok(())
    }

    /// The table index is popped first — it is Wasm's topmost operand,
    /// pushed after every argument — then the signature is checked
    /// against the call site's static type index before the pointer is
    /// ever used, so a type mismatch traps before an argument marshal
    /// could corrupt the stack for a call that's about to abort anyway.
    fn call_indirect(&mut self, type_index: u32) -> Result<(), CompileError> {
        let sig = self.module.types[type_index as usize].clone();
        reject_multi_result(&sig)?;

        self.spill_live_for_call()?;
        let (index, _) = self.pop_to_reg(None)?;

        let table_len = self.alloc_reg(RegClass::Int, None)?;
        self.masm.load(
            table_len,
            MemArg { base: self.masm.basedata_reg(), offset: -basedata::from_end::TABLE_LENGTH },
            OperandSize::Quad,
            false,
        );
        let index_zext = self.alloc_reg(RegClass::Int, None)?;
        self.masm.mov_reg(index_zext, index, OperandSize::Word);
        self.masm.cmp(index_zext, table_len, OperandSize::Quad);
        self.masm.conditional_trap(TrapCode::UndefinedElement, Cond::GeUnsigned);
        self.regs.mark_free(table_len);
        self.regs.mark_free(index);

        let table_base = self.alloc_reg(RegClass::Int, None)?;
        self.masm.load(
            table_base,
            MemArg { base: self.masm.basedata_reg(), offset: -basedata::from_end::TABLE_BASE_PTR },
            OperandSize::Quad,
            false,
        );

        // `MemArg` only supports base+immediate-offset addressing, so the
        // scaled index has to be computed by hand rather than folded
        // into the load itself.
        let entry_addr = self.alloc_reg(RegClass::Int, None)?;
        self.masm.mov_imm(entry_addr, OperandSize::Quad, TABLE_ENTRY_BYTES as i64);
        self.masm.mul(entry_addr, entry_addr, index_zext, OperandSize::Quad);
        self.masm.add(entry_addr, entry_addr, table_base, OperandSize::Quad);
        self.regs.mark_free(table_base);
        self.regs.mark_free(index_zext);

        let func_ptr = self.alloc_reg(RegClass::Int, None)?;
        self.masm.load(
            func_ptr,
            MemArg { base: entry_addr, offset: TABLE_ENTRY_FUNC_PTR_OFFSET },
            OperandSize::Quad,
            false,
        );
        self.masm.cmp_imm(func_ptr, 0, OperandSize::Quad);
        self.masm.conditional_trap(TrapCode::UndefinedElement, Cond::Eq);

        let sig_index = self.alloc_reg(RegClass::Int, None)?;
        self.masm.load(
            sig_index,
            MemArg { base: entry_addr, offset: TABLE_ENTRY_SIG_INDEX_OFFSET },
            OperandSize::Quad,
            false,
        );
        self.regs.mark_free(entry_addr);
        self.masm.cmp_imm(sig_index, type_index as i32, OperandSize::Quad);
        self.masm.conditional_trap(TrapCode::IndirectCallTypeMismatch, Cond::Ne);
        self.regs.mark_free(sig_index);

        // `func_ptr` must survive argument marshalling, which may spill
        // and reload through scratch/argument registers of its own;
        // home it in basedata's spill region the same way `memory.grow`
        // preserves `old_pages` across its own helper call.
        self.masm.store(MemArg { base: self.masm.basedata_reg(), offset: -basedata::from_end::SPILL_REGION }, func_ptr, OperandSize::Quad);
        self.regs.mark_free(func_ptr);

        self.marshal_args(&sig.params)?;

        let target = self.alloc_reg(RegClass::Int, None)?;
        self.masm.load(
            target,
            MemArg { base: self.masm.basedata_reg(), offset: -basedata::from_end::SPILL_REGION },
            OperandSize::Quad,
            false,
        );
        self.masm.call_indirect(target);
        self.regs.mark_free(target);

        self.push_call_result(&sig)?;
        Ok(())
    }

    /// Pop `params.len()` operands (innermost first), restore
    /// left-to-right order, and assign each to the next free register
    /// of its class in the calling convention, resolving the whole
    /// batch as one parallel move so an argument that already sits in
    /// some other argument's destination register isn't clobbered.
    fn marshal_args(&mut self, params: &[MachineType]) -> Result<(), CompileError> {
        let mut popped: SmallVec<[(Reg, MachineType); 8]> = SmallVec::new();
        for _ in 0..params.len() {
            let (reg, mt) = self.pop_to_reg(None)?;
            popped.push((reg, mt));
        }
        popped.reverse();

        let cc = self.masm.calling_convention().clone();
        let mut next_int = 0usize;
        let mut next_float = 0usize;
        let mut edges: SmallVec<[CopyEdge; 8]> = SmallVec::new();
        for (reg, mt) in popped.iter().copied() {
            let size = size_of(mt);
            if mt.is_float() {
                if next_float >= cc.float_params.len() {
                    return Err(CompileError::ImplementationLimitReached(ImplementationLimit::TooManyCallArguments {
                        count: params.iter().filter(|p| p.is_float()).count() as u32,
                        limit: cc.float_params.len() as u32,
                        class: "float",
                    }));
                }
                edges.push(CopyEdge { dst: cc.float_params[next_float], src: CopySource::Reg(reg), size });
                next_float += 1;
            } else {
                if next_int >= cc.int_params.len() {
                    return Err(CompileError::ImplementationLimitReached(ImplementationLimit::TooManyCallArguments {
                        count: params.iter().filter(|p| !p.is_float()).count() as u32,
                        limit: cc.int_params.len() as u32,
                        class: "integer",
                    }));
                }
                edges.push(CopyEdge { dst: cc.int_params[next_int], src: CopySource::Reg(reg), size });
                next_int += 1;
            }
        }

        let scratch = self.masm.reserved_scratch();
        resolve_register_copies(self.masm, &edges, scratch);
        for (reg, _) in popped {
            self.regs.mark_free(reg);
        }
        Ok(())
    }

    /// Spill every compile-time stack value still resident in a
    /// register, including the outgoing call's own arguments, into a
    /// fresh frame-backed temp. A native call's ABI is free to clobber
    /// any caller-saved register; this is the one point lowering has to
    /// account for a value surviving an instruction it didn't itself
    /// produce, mirrored at smaller scale by `memory.grow`'s single-slot
    /// spill of `old_pages` around its own helper call.
    fn spill_live_for_call(&mut self) -> Result<(), CompileError> {
        let ids: SmallVec<[u32; 16]> = self.stack.iter_ids().collect();
        for id in ids {
            let (reg, mt) = match self.stack.get(id) {
                StackElement::ScratchRegister { reg, mt } => (*reg, *mt),
                StackElement::TempResult { temp_id, mt } => match self.stack.temps[*temp_id as usize].storage {
                    Some(TempStorage::Register(r)) => (r, *mt),
                    _ => continue,
                },
                _ => continue,
            };
            let size = size_of(mt);
            let temp_offset = self.temps.alloc(size.bytes())?;
            let frame_offset = self.stacktrace_record_offset + crate::func::STACKTRACE_RECORD_BYTES as i32 + temp_offset;
            self.masm.store(MemArg { base: self.masm.sp_reg(), offset: self.frame_size as i32 + frame_offset }, reg, size);
            self.regs.mark_free(reg);

            let existing_temp_id = match self.stack.get(id) {
                StackElement::TempResult { temp_id, .. } => Some(*temp_id),
                _ => None,
            };
            match existing_temp_id {
                Some(temp_id) => self.stack.temps[temp_id as usize].storage = Some(TempStorage::FrameSlot(frame_offset)),
                None => {
                    let temp_id = self.stack.new_temp(mt);
                    self.stack.temps[temp_id as usize].storage = Some(TempStorage::FrameSlot(frame_offset));
                    *self.stack.get_mut(id) = StackElement::TempResult { temp_id, mt };
                }
            }
        }
        Ok(())
    }

    fn push_call_result(&mut self, sig: &nwasm_module::FunctionSignature) -> Result<(), CompileError> {
        if let Some(&mt) = sig.results.first() {
            let src = if mt.is_float() { self.masm.calling_convention().float_return } else { self.masm.calling_convention().int_return };
            let dst = self.alloc_reg(class_of(mt), Some(src))?;
            if dst != src {
                self.masm.mov_reg(dst, src, size_of(mt));
            }
            self.stack.push(StackElement::ScratchRegister { reg: dst, mt });
        }
        Ok(())
    }
}

/// This port carries at most one result register per call, matching
/// `control.rs`'s single-result restriction on block/loop types.
fn reject_multi_result(sig: &nwasm_module::FunctionSignature) -> Result<(), CompileError> {
    if sig.results.len() > 1 {
        return Err(CompileError::UnsupportedOpcode { opcode: 0xfc, offset: 0 });
    }
    Ok(())
}
