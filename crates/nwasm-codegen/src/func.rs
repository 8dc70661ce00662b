//! C6/C7 glue: `FuncGen` drives one function body's compilation,
//! threading the compile-time stack (`stack.rs`), the register
//! allocator (`regalloc.rs`) and the per-function local layout
//! (`locals.rs`) through a single pass over the opcode stream.
//!
//! Per-opcode lowering itself is split by concern into sibling modules
//! (`ops.rs` numerics/locals/globals, `control.rs` blocks/branches,
//! `memaccess.rs` loads/stores/memory.size/grow, `calls.rs` call
//! lowering); each contributes an `impl<'m> FuncGen<'m>` block rather
//! than growing one file without bound.

use nwasm_core::{basedata, CompileError, ImplementationLimit, MachineType, TrapCode};
use nwasm_masm::{Cond, Label, MacroAssembler, MemArg, OperandSize, Reg, RegClass, RegSet};
use nwasm_module::{FunctionSignature, GlobalInit, ModuleInfo};
use wasmparser::{FunctionBody, Operator};

use crate::locals::{layout_locals, LocalState};
use crate::regalloc::{Owner, RegAllocator};
use crate::stack::{BlockFrame, BlockKind, CompileStack, DeferredOp, StackElement, TempStorage};

/// Fixed per-function budget for spilled temporaries, block join slots
/// and call-argument marshalling, in 8-byte slots. A function whose
/// single-pass compilation would need more trips [`CompileError`] with
/// [`ImplementationLimit::TooManyTempSlots`] rather than growing the
/// frame further — see `DESIGN.md` for why this compiler reserves a
/// fixed region instead of repeatedly moving SP mid-body.
pub const TEMP_REGION_SLOTS: u32 = 64;
pub const TEMP_REGION_BYTES: u32 = TEMP_REGION_SLOTS * 8;

/// Hard ceiling on a function's total frame (locals + stacktrace record
/// + temp budget), matching the order-of-magnitude each backend's own
/// `MAX_STACK_FRAME_BYTES` already enforces for its own SP-adjustment
/// primitive.
pub const MAX_FRAME_BYTES: u32 = 1 << 20;

/// `{prevFrameRef, fncIndex, offsetToLocals, callerInstrOffset}`, one
/// per live call frame (§4.4 "stacktrace record"), four 8-byte fields
/// for simplicity of addressing even though two only ever hold a 32-bit
/// value.
pub const STACKTRACE_RECORD_BYTES: u32 = 32;

pub(crate) mod strec {
    pub const PREV_FRAME_REF: i32 = 0;
    pub const FNC_INDEX: i32 = 8;
    pub const OFFSET_TO_LOCALS: i32 = 16;
    pub const CALLER_INSTR_OFFSET: i32 = 24;
}

/// A bump-allocated region of the fixed temp budget, released in LIFO
/// order as values stop being live — mirrors a stack allocator with
/// save/restore marks rather than a free list, since within one
/// function body allocation and release are always nested (a spilled
/// temp outlives the call that spilled it; a call's stack-argument
/// bytes never outlive the call instruction itself).
#[derive(Default)]
pub struct TempRegion {
    cursor: u32,
    high_water: u32,
}

impl TempRegion {
    pub fn mark(&self) -> u32 {
        self.cursor
    }

    pub fn alloc(&mut self, bytes: u32) -> Result<i32, CompileError> {
        let offset = self.cursor;
        self.cursor += bytes;
        self.high_water = self.high_water.max(self.cursor);
        if self.high_water > TEMP_REGION_BYTES {
            return Err(CompileError::ImplementationLimitReached(ImplementationLimit::TooManyTempSlots {
                requested: self.high_water / 8,
                limit: TEMP_REGION_SLOTS,
            }));
        }
        Ok(offset as i32)
    }

    pub fn release_to(&mut self, mark: u32) {
        self.cursor = mark;
    }
}

pub struct FuncGen<'m> {
    pub(crate) masm: &'m mut dyn MacroAssembler,
    pub(crate) module: &'m ModuleInfo,
    pub(crate) func_index: u32,
    pub(crate) sig: FunctionSignature,
    pub(crate) locals: Vec<LocalState>,
    pub(crate) stack: CompileStack,
    pub(crate) regs: RegAllocator,
    pub(crate) blocks: Vec<BlockFrame>,
    pub(crate) frame_size: u32,
    pub(crate) locals_bytes: u32,
    pub(crate) stacktrace_record_offset: i32,
    pub(crate) temps: TempRegion,
    pub(crate) checked_high_water_mark: u32,
    pub(crate) source_map: Vec<(u32, u32)>,
    pub(crate) body_base_offset: u32,
    pub(crate) stacktrace_enabled: bool,
    pub(crate) bounds_checks: bool,
    /// Needed to translate a link-data byte offset into a negative
    /// displacement from `basedata_reg` (see
    /// `nwasm_core::basedata::link_data_offset_from_basedata_reg`);
    /// fixed for the whole module, so the driver hands both through
    /// unchanged on every function it compiles.
    pub(crate) link_data_length: u32,
    pub(crate) stacktrace_record_count: u32,
}

/// What one compiled function body hands back to the driver: the
/// native entry offset (relative to the whole code buffer) plus the
/// debug-map fragments the driver accumulates across functions.
pub struct FuncGenResult {
    pub entry_offset: u32,
    pub locals_frame_offsets: Vec<i32>,
    pub source_map: Vec<(u32, u32)>,
}

impl<'m> FuncGen<'m> {
    /// Compile `body` (the raw `{locals*, operator stream}` bytes for
    /// `func_index`), emitting into `masm` and returning the entry
    /// offset plus per-local frame offsets for the debug map.
    pub fn compile(
        masm: &'m mut dyn MacroAssembler,
        module: &'m ModuleInfo,
        func_index: u32,
        sig: FunctionSignature,
        body: &FunctionBody<'_>,
        body_base_offset: u32,
        stacktrace_enabled: bool,
        bounds_checks: bool,
        link_data_length: u32,
        stacktrace_record_count: u32,
    ) -> Result<FuncGenResult, CompileError> {
        let mut locals_reader = body.get_locals_reader().map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
        let mut local_types: Vec<MachineType> = Vec::new();
        for _ in 0..locals_reader.get_count() {
            let (count, ty) = locals_reader.read().map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
            let mt = MachineType::from_wasmparser(ty)
                .ok_or(CompileError::SignatureMismatch { which: "local type" })?;
            for _ in 0..count {
                local_types.push(mt);
            }
        }
        if sig.params.len() + local_types.len() > u16::MAX as usize {
            return Err(CompileError::ImplementationLimitReached(ImplementationLimit::TooManyLocals {
                count: (sig.params.len() + local_types.len()) as u32,
                limit: u16::MAX as u32,
            }));
        }

        let regs = RegAllocator::new(masm);
        let (locals, locals_bytes) = layout_locals(&sig.params, &local_types, masm.pointer_bytes());
        let num_locals = locals.len();
        let num_globals = module.globals.len();

        let mut gen = FuncGen {
            masm,
            module,
            func_index,
            sig,
            locals,
            stack: CompileStack::new(num_locals, num_globals),
            regs,
            blocks: Vec::new(),
            frame_size: 0,
            locals_bytes,
            stacktrace_record_offset: 0,
            temps: TempRegion::default(),
            checked_high_water_mark: 0,
            source_map: Vec::new(),
            body_base_offset,
            stacktrace_enabled,
            bounds_checks,
            link_data_length,
            stacktrace_record_count,
        };

        let entry_offset = gen.masm.buffer().len();
        gen.prologue()?;

        let ops_reader = body.get_operators_reader().map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
        for op in ops_reader.into_iter_with_offsets() {
            let (op, wasm_offset) = op.map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
            if matches!(op, Operator::End) && gen.blocks.len() == 1 {
                gen.on_function_end()?;
                break;
            }
            gen.lower(op, wasm_offset as u32)?;
        }

        gen.epilogue()?;

        Ok(FuncGenResult {
            entry_offset,
            locals_frame_offsets: gen.locals.iter().map(|l| l.frame_offset).collect(),
            source_map: gen.source_map,
        })
    }

    /// Prologue (§4.4 state machine: `Prologue -> Body -> Epilogue`):
    /// move SP once for the fixed frame (locals + stacktrace record +
    /// temp budget), spill every incoming parameter register to its
    /// reserved local slot, zero-init the remaining locals, then run
    /// the stack-fence check. The fence check is deferred to *after*
    /// the param spill specifically so it can borrow an argument
    /// register as its second scratch once that register's incoming
    /// value is safely homed — this compiler has only one permanently
    /// reserved scratch register, not two.
    fn prologue(&mut self) -> Result<(), CompileError> {
        self.stacktrace_record_offset = self.locals_bytes as i32;
        self.frame_size = align16(self.locals_bytes + STACKTRACE_RECORD_BYTES + TEMP_REGION_BYTES);
        if self.frame_size > MAX_FRAME_BYTES {
            return Err(CompileError::ImplementationLimitReached(ImplementationLimit::StackFrameTooLarge {
                requested: self.frame_size,
                limit: MAX_FRAME_BYTES,
            }));
        }
        self.masm.add_sp(-(self.frame_size as i32));

        self.spill_incoming_params();
        self.zero_init_locals();

        let data_scratch = self.masm.reserved_scratch();
        let addr_scratch = self.masm.calling_convention().int_params[0];
        self.masm.check_stack_fence(data_scratch, addr_scratch);
        self.checked_high_water_mark = self.frame_size;

        if self.stacktrace_enabled {
            self.push_stacktrace_record()?;
        }

        self.blocks.push(BlockFrame {
            kind: BlockKind::Block,
            params: 0,
            results: self.sig.results.len() as u32,
            entry_frame_size: self.frame_size,
            pending_branches: Default::default(),
            loop_header: None,
            unreachable: false,
            else_seen: false,
            pending_label: None,
            join_slots: Default::default(),
            join_types: Default::default(),
            regs_snapshot: None,
            base_len: 0,
            saved_params: Default::default(),
        });

        Ok(())
    }

    /// Move every incoming parameter from its ABI register (or, once
    /// the argument registers of its class run out, from the caller's
    /// outgoing stack area directly above this frame) into its fixed
    /// local slot. Locals always report `Location::FrameSlot` as their
    /// canonical home (`locals.rs`), so this is the one place a
    /// parameter value is read out of a register at all.
    fn spill_incoming_params(&mut self) {
        let cc = self.masm.calling_convention().clone();
        let mut next_int = 0usize;
        let mut next_float = 0usize;
        let mut stack_arg_offset = 0i32;
        for i in 0..self.sig.params.len() {
            let mt = self.sig.params[i];
            let local = &self.locals[i];
            let dst = MemArg { base: self.masm.sp_reg(), offset: self.frame_size as i32 + local.frame_offset };
            let size = size_of(mt);
            if mt.is_float() {
                if next_float < cc.float_params.len() {
                    let reg = cc.float_params[next_float];
                    next_float += 1;
                    self.masm.store(dst, reg, size);
                } else {
                    self.load_stack_arg_into_slot(dst, size, &mut stack_arg_offset);
                }
            } else if next_int < cc.int_params.len() {
                let reg = cc.int_params[next_int];
                next_int += 1;
                self.masm.store(dst, reg, size);
            } else {
                self.load_stack_arg_into_slot(dst, size, &mut stack_arg_offset);
            }
        }
    }

    /// A parameter the ABI passed on the caller's stack sits directly
    /// above this frame, past the return address a `call`/`bl`
    /// instruction pushes; copy it into the local's own slot via
    /// `reserved_scratch` rather than addressing it in place, so every
    /// later reference to the local goes through one uniform location.
    fn load_stack_arg_into_slot(&mut self, dst: MemArg, size: OperandSize, stack_arg_offset: &mut i32) {
        let scratch = self.masm.reserved_scratch();
        let src = MemArg {
            base: self.masm.sp_reg(),
            offset: self.frame_size as i32 + self.masm.pointer_bytes() as i32 + *stack_arg_offset,
        };
        self.masm.load(scratch, src, size, false);
        self.masm.store(dst, scratch, size);
        *stack_arg_offset += 8;
    }

    /// Wasm requires every local beyond the declared parameters to
    /// start at zero.
    fn zero_init_locals(&mut self) {
        if self.locals.len() <= self.sig.params.len() {
            return;
        }
        let scratch = self.masm.reserved_scratch();
        self.masm.mov_imm(scratch, OperandSize::Quad, 0);
        for local in &self.locals[self.sig.params.len()..] {
            let dst = MemArg { base: self.masm.sp_reg(), offset: self.frame_size as i32 + local.frame_offset };
            self.masm.store(dst, scratch, size_of(local.mt));
        }
    }

    /// Claim a register of `class`, evicting the lowest-indexed
    /// unprotected one if every usable register is already live. A
    /// local's or a global's register copy is always a read-through
    /// cache of a value still authoritative in its frame slot or link
    /// data (this port never lazily defers a local/global write-back),
    /// so evicting one of those is a plain free; a temp's register is
    /// its only home, so eviction spills it into the fixed temp budget
    /// and updates the temp's storage record for whichever stack
    /// elements still alias it.
    pub(crate) fn alloc_reg(&mut self, class: RegClass, hint: Option<Reg>) -> Result<Reg, CompileError> {
        if let Some(r) = self.regs.try_alloc(class, hint, RegSet::EMPTY) {
            self.regs.mark_used(r, None);
            return Ok(r);
        }
        let victim = self.regs.pick_eviction_victim(class, RegSet::EMPTY).ok_or_else(|| {
            CompileError::ImplementationLimitReached(ImplementationLimit::TooManyTempSlots {
                requested: TEMP_REGION_SLOTS + 1,
                limit: TEMP_REGION_SLOTS,
            })
        })?;
        if let Some(Owner::Temp(temp_id)) = self.regs.owner_of(victim) {
            let mt = self.stack.temps[temp_id as usize].mt;
            let size = size_of(mt);
            let temp_offset = self.temps.alloc(size.bytes())?;
            let frame_offset = self.stacktrace_record_offset + STACKTRACE_RECORD_BYTES as i32 + temp_offset;
            self.masm.store(MemArg { base: self.masm.sp_reg(), offset: self.frame_size as i32 + frame_offset }, victim, size);
            self.stack.temps[temp_id as usize].storage = Some(TempStorage::FrameSlot(frame_offset));
        }
        self.regs.mark_free(victim);
        self.regs.mark_used(victim, None);
        Ok(victim)
    }

    /// Bring a compile-time stack value into a register, preferring
    /// `hint` when the allocator can grant it. This is the one place
    /// every `StackElement` variant is resolved to a concrete register,
    /// so opcode lowering never inspects stack-element storage kinds
    /// directly.
    pub(crate) fn materialize(&mut self, elem: StackElement, hint: Option<Reg>) -> Result<(Reg, MachineType), CompileError> {
        match elem {
            StackElement::Constant { mt, bits } => {
                let reg = self.alloc_reg(class_of(mt), hint)?;
                self.masm.mov_imm(reg, size_of(mt), bits as i64);
                Ok((reg, mt))
            }
            StackElement::Local { index } => {
                let local = self.locals[index as usize].clone();
                let reg = self.alloc_reg(class_of(local.mt), hint)?;
                let src = MemArg { base: self.masm.sp_reg(), offset: self.frame_size as i32 + local.frame_offset };
                self.masm.load(reg, src, size_of(local.mt), false);
                Ok((reg, local.mt))
            }
            StackElement::Global { index } => {
                let global = self.module.globals[index as usize].clone();
                let reg = self.alloc_reg(class_of(global.machine_type), hint)?;
                match global.init {
                    GlobalInit::Const { bits, .. } if !global.mutable => {
                        self.masm.mov_imm(reg, size_of(global.machine_type), bits as i64);
                    }
                    _ => {
                        let link_offset = global
                            .link_data_offset
                            .expect("mutable or imported globals always reserve a link-data slot");
                        let disp = basedata::link_data_offset_from_basedata_reg(
                            self.link_data_length,
                            self.stacktrace_record_count,
                            link_offset,
                        );
                        self.masm.load(reg, MemArg { base: self.masm.basedata_reg(), offset: disp }, size_of(global.machine_type), false);
                    }
                }
                Ok((reg, global.machine_type))
            }
            StackElement::ScratchRegister { reg, mt } => Ok((reg, mt)),
            StackElement::TempResult { temp_id, mt } => match self.stack.temps[temp_id as usize].storage {
                Some(TempStorage::Register(r)) => Ok((r, mt)),
                Some(TempStorage::FrameSlot(off)) => {
                    let reg = self.alloc_reg(class_of(mt), hint)?;
                    self.masm.load(reg, MemArg { base: self.masm.sp_reg(), offset: self.frame_size as i32 + off }, size_of(mt), false);
                    Ok((reg, mt))
                }
                None => Err(CompileError::InvalidBytecode("temp result read before it was produced".to_string())),
            },
            StackElement::Deferred { op: DeferredOp::Compare { cond, .. } } => {
                let reg = self.alloc_reg(RegClass::Int, hint)?;
                self.masm.set_cond(reg, cond);
                Ok((reg, MachineType::I32))
            }
            StackElement::Invalid => Err(CompileError::InvalidBytecode("materialized an invalid stack element".to_string())),
        }
    }

    /// Results are expected at the top of the compile-time stack in
    /// declared order (§3 invariant: "the compile-time stack is emptied
    /// except for result values, which have been placed in the ABI
    /// return locations"). Multi-value results beyond what the native
    /// return registers hold are out of scope here (see DESIGN.md);
    /// every exported/callable signature this port handles has at most
    /// one integer and one float result live in a register at once.
    fn on_function_end(&mut self) -> Result<(), CompileError> {
        let n = self.sig.results.len();
        let mut placed = Vec::with_capacity(n);
        for _ in 0..n {
            let elem = self.stack.pop().ok_or_else(|| {
                CompileError::InvalidBytecode("stack underflow at function end".to_string())
            })?;
            placed.push(elem);
        }
        placed.reverse();
        for (i, elem) in placed.into_iter().enumerate() {
            let want = self.sig.results[i];
            let dst = if want.is_float() {
                self.masm.calling_convention().float_return
            } else {
                self.masm.calling_convention().int_return
            };
            let (reg, _) = self.materialize(elem, Some(dst))?;
            if reg != dst {
                self.masm.mov_reg(dst, reg, size_of(want));
            }
        }
        // Every earlier `return`/`br 0` already placed its own results
        // into these same ABI registers before jumping here (see
        // `control.rs::branch_to`), so this position is where both the
        // natural fallthrough and every early exit converge.
        let here = self.masm.buffer().current_position();
        let pending = std::mem::take(&mut self.blocks[0].pending_branches);
        for label in pending {
            self.bind(label, here)?;
        }
        self.blocks.pop();
        Ok(())
    }

    fn epilogue(&mut self) -> Result<(), CompileError> {
        if self.stacktrace_enabled {
            self.pop_stacktrace_record();
        }
        self.masm.ret();
        Ok(())
    }

    fn push_stacktrace_record(&mut self) -> Result<(), CompileError> {
        let scratch = self.masm.reserved_scratch();
        let rec = MemArg { base: self.masm.sp_reg(), offset: self.stacktrace_record_offset };

        self.masm.load(
            scratch,
            MemArg { base: self.masm.basedata_reg(), offset: -(basedata::from_end::LAST_FRAME_REF_PTR) },
            OperandSize::Quad,
            false,
        );
        self.masm.store(
            MemArg { base: rec.base, offset: rec.offset + strec::PREV_FRAME_REF },
            scratch,
            OperandSize::Quad,
        );
        self.masm.mov_imm(scratch, OperandSize::Word, self.func_index as i64);
        self.masm.store(MemArg { base: rec.base, offset: rec.offset + strec::FNC_INDEX }, scratch, OperandSize::Word);
        self.masm.mov_imm(scratch, OperandSize::Word, self.locals_bytes as i64);
        self.masm.store(MemArg { base: rec.base, offset: rec.offset + strec::OFFSET_TO_LOCALS }, scratch, OperandSize::Word);

        // own address = sp_reg + rec.offset; computed via add_imm_to_reg
        // on a copy of sp.
        self.masm.mov_reg(scratch, self.masm.sp_reg(), OperandSize::Quad);
        self.masm.add_imm_to_reg(scratch, rec.offset, OperandSize::Quad);
        self.masm.store(
            MemArg { base: self.masm.basedata_reg(), offset: -(basedata::from_end::LAST_FRAME_REF_PTR) },
            scratch,
            OperandSize::Quad,
        );
        Ok(())
    }

    fn pop_stacktrace_record(&mut self) {
        let scratch = self.masm.reserved_scratch();
        let rec = MemArg { base: self.masm.sp_reg(), offset: self.stacktrace_record_offset };
        self.masm.load(scratch, MemArg { base: rec.base, offset: rec.offset + strec::PREV_FRAME_REF }, OperandSize::Quad, false);
        self.masm.store(
            MemArg { base: self.masm.basedata_reg(), offset: -(basedata::from_end::LAST_FRAME_REF_PTR) },
            scratch,
            OperandSize::Quad,
        );
    }

    /// Every basic-block entry (function entry, and each `Loop` head)
    /// checks the interruption flag before doing any work, per §5
    /// "generated code reads the flag at every basic-block entry".
    pub(crate) fn emit_interrupt_check(&mut self) {
        let scratch = self.masm.reserved_scratch();
        self.masm.load(
            scratch,
            MemArg { base: self.masm.basedata_reg(), offset: -(basedata::from_end::STATUS_FLAGS) },
            OperandSize::Word,
            false,
        );
        self.masm.cmp_imm(scratch, 0, OperandSize::Word);
        self.masm.conditional_trap(TrapCode::RuntimeInterruptRequested, Cond::Ne);
    }

    pub(crate) fn elem_mt(&self, elem: &StackElement) -> MachineType {
        match elem {
            StackElement::Constant { mt, .. } => *mt,
            StackElement::Local { index } => self.locals[*index as usize].mt,
            StackElement::Global { index } => self.module.globals[*index as usize].machine_type,
            StackElement::ScratchRegister { mt, .. } => *mt,
            StackElement::TempResult { mt, .. } => *mt,
            StackElement::Deferred { .. } => MachineType::I32,
            StackElement::Invalid => MachineType::Invalid,
        }
    }

    pub(crate) fn current_block(&self) -> &BlockFrame {
        self.blocks.last().expect("implicit outer block always present")
    }

    pub(crate) fn current_block_mut(&mut self) -> &mut BlockFrame {
        self.blocks.last_mut().expect("implicit outer block always present")
    }

    pub(crate) fn in_unreachable(&self) -> bool {
        self.current_block().unreachable
    }

    /// Resolve a forward-reference relocation site against a now-known
    /// target, translating the assembler's own `BranchOutOfRange` into
    /// the compile error type every other fallible path in this crate
    /// uses.
    pub(crate) fn bind(&mut self, site: Label, target: Label) -> Result<(), CompileError> {
        self.masm.bind_label(site, target).map_err(|e| {
            CompileError::ImplementationLimitReached(ImplementationLimit::BranchOutOfRange {
                displacement: e.displacement,
                limit: e.limit,
            })
        })
    }

    /// Free whatever register(s) a popped stack element was occupying.
    /// Constants, locals and globals never own a register by themselves
    /// (materializing one is always a fresh, ownerless copy per
    /// `materialize`); only `ScratchRegister` and a register-resident
    /// `TempResult` need their claim released.
    pub(crate) fn release(&mut self, elem: &StackElement) {
        match elem {
            StackElement::ScratchRegister { reg, .. } => self.regs.mark_free(*reg),
            StackElement::TempResult { temp_id, .. } => {
                if let Some(TempStorage::Register(r)) = self.stack.temps[*temp_id as usize].storage {
                    self.regs.mark_free(r);
                }
            }
            _ => {}
        }
    }

    /// Pop one operand and bring it into a register, releasing whatever
    /// claim the popped stack element held first so the freshly
    /// materialized register can reuse it when it's the same one.
    pub(crate) fn pop_to_reg(&mut self, hint: Option<Reg>) -> Result<(Reg, MachineType), CompileError> {
        let elem = self.stack.pop().ok_or_else(|| CompileError::InvalidBytecode("stack underflow".to_string()))?;
        self.release(&elem);
        self.materialize(elem, hint)
    }
}

pub(crate) fn size_of(mt: MachineType) -> OperandSize {
    match mt {
        MachineType::I32 | MachineType::F32 => OperandSize::Word,
        MachineType::I64 | MachineType::F64 => OperandSize::Quad,
        MachineType::Invalid => OperandSize::Quad,
    }
}

pub(crate) fn class_of(mt: MachineType) -> RegClass {
    if mt.is_float() {
        RegClass::Float
    } else {
        RegClass::Int
    }
}

pub(crate) const fn align16(n: u32) -> u32 {
    (n + 15) & !15
}
