//! C6: control-flow opcode lowering and the top-level per-opcode
//! dispatcher (`lower`). `block`/`loop`/`if` push a [`BlockFrame`];
//! `br`/`br_if`/`br_table`/`return` resolve a target frame and either
//! jump to a known position (a `Loop`'s header) or record a forward
//! reference the matching `end` (or `else`) later patches, per §4.4's
//! `lastBlockBranch` chaining — implemented here as each frame's own
//! `pending_branches` list rather than a displacement-field linked
//! chain, since an arena-backed `Vec` is the ordinary way to express
//! the same forward-reference worklist outside the original's
//! pointer-chasing encoding.
//!
//! **Simplification** (see `DESIGN.md`): block/loop/if types with
//! multiple parameters or multiple results are not supported — every
//! control construct here carries at most one result value, matching
//! the rest of this port's single-register-return assumption. A
//! `blockty` naming more than one result is rejected as
//! `UnsupportedOpcode`.

use nwasm_core::{CompileError, ImplementationLimit, MachineType, TrapCode};
use nwasm_masm::{Cond, Label, MacroAssembler, OperandSize};
use wasmparser::{BlockType, BrTable, Operator};

use crate::func::{class_of, size_of, FuncGen};
use crate::stack::{BlockFrame, BlockKind, StackElement, TempStorage};

/// Block nesting depth beyond which this port refuses to compile
/// rather than risk unbounded recursion walking `self.blocks`.
const MAX_BLOCK_DEPTH: u32 = 1024;

impl<'m> FuncGen<'m> {
    pub(crate) fn lower(&mut self, op: Operator<'_>, wasm_offset: u32) -> Result<(), CompileError> {
        if self.in_unreachable() && !is_structural(&op) {
            return Ok(());
        }

        match op {
            Operator::Unreachable => {
                self.masm.trap(TrapCode::Unreachable);
                self.current_block_mut().unreachable = true;
                return Ok(());
            }
            Operator::Nop => return Ok(()),
            Operator::Block { blockty } => return self.begin_block(BlockKind::Block, blockty),
            Operator::Loop { blockty } => return self.begin_block(BlockKind::Loop, blockty),
            Operator::If { blockty } => return self.begin_if(blockty),
            Operator::Else => return self.do_else(),
            Operator::End => return self.do_end(),
            Operator::Br { relative_depth } => return self.branch_to(relative_depth, false),
            Operator::BrIf { relative_depth } => return self.branch_to(relative_depth, true),
            Operator::BrTable { targets } => return self.br_table(&targets),
            Operator::Return => {
                let depth = (self.blocks.len() - 1) as u32;
                return self.branch_to(depth, false);
            }
            Operator::Drop => {
                if let Some(elem) = self.stack.pop() {
                    self.release(&elem);
                }
                return Ok(());
            }
            Operator::Select | Operator::TypedSelect { .. } => return self.select(),
            _ => {}
        }

        if self.lower_numeric(&op)? {
            return Ok(());
        }
        if self.lower_memaccess(&op)? {
            return Ok(());
        }
        if self.lower_call(&op)? {
            return Ok(());
        }

        Err(CompileError::UnsupportedOpcode { opcode: 0xff, offset: (self.body_base_offset + wasm_offset) as usize })
    }

    fn result_mt(&self, blockty: BlockType) -> Result<Option<MachineType>, CompileError> {
        match blockty {
            BlockType::Empty => Ok(None),
            BlockType::Type(t) => {
                Ok(Some(MachineType::from_wasmparser(t).ok_or(CompileError::SignatureMismatch { which: "block result type" })?))
            }
            BlockType::FuncType(idx) => {
                let sig = &self.module.types[idx as usize];
                if !sig.params.is_empty() || sig.results.len() > 1 {
                    return Err(CompileError::UnsupportedOpcode { opcode: 0xfe, offset: 0 });
                }
                Ok(sig.results.first().copied())
            }
        }
    }

    fn push_block_frame(&mut self, kind: BlockKind, result: Option<MachineType>, loop_header: Option<Label>) -> Result<(), CompileError> {
        if self.blocks.len() as u32 >= MAX_BLOCK_DEPTH {
            return Err(CompileError::ImplementationLimitReached(ImplementationLimit::BlockNestingTooDeep {
                depth: self.blocks.len() as u32,
                limit: MAX_BLOCK_DEPTH,
            }));
        }
        let mut join_slots = smallvec::SmallVec::new();
        let mut join_types = smallvec::SmallVec::new();
        if let Some(mt) = result {
            let mark = self.temps.mark();
            let _ = mark;
            let offset = self.temps.alloc(8)?;
            let frame_offset = self.stacktrace_record_offset + crate::func::STACKTRACE_RECORD_BYTES as i32 + offset;
            join_slots.push(frame_offset);
            join_types.push(mt);
        }
        self.blocks.push(BlockFrame {
            kind,
            params: 0,
            results: result.is_some() as u32,
            entry_frame_size: self.frame_size,
            pending_branches: Default::default(),
            loop_header,
            unreachable: false,
            else_seen: false,
            pending_label: None,
            join_slots,
            join_types,
            regs_snapshot: None,
            base_len: self.stack.len(),
            saved_params: Default::default(),
        });
        Ok(())
    }

    fn begin_block(&mut self, kind: BlockKind, blockty: BlockType) -> Result<(), CompileError> {
        let result = self.result_mt(blockty)?;
        let header = if matches!(kind, BlockKind::Loop) {
            let here = self.masm.buffer().current_position();
            self.source_map.push((0, here.0));
            self.emit_interrupt_check();
            Some(here)
        } else {
            None
        };
        self.push_block_frame(kind, result, header)
    }

    fn begin_if(&mut self, blockty: BlockType) -> Result<(), CompileError> {
        let result = self.result_mt(blockty)?;
        let (cond, _) = self.pop_to_reg(None)?;
        self.masm.cmp_imm(cond, 0, OperandSize::Word);
        self.regs.mark_free(cond);
        let pending = self.masm.branch_if(Cond::Eq, None);
        self.push_block_frame(BlockKind::IfBlock, result, None)?;
        self.current_block_mut().pending_label = Some(pending);
        Ok(())
    }

    fn do_else(&mut self) -> Result<(), CompileError> {
        let block = self.current_block();
        if !matches!(block.kind, BlockKind::IfBlock) {
            return Err(CompileError::InvalidBytecode("`else` outside an `if`".to_string()));
        }
        self.flush_block_result()?;
        let base_len = self.current_block().base_len;
        self.stack.truncate(base_len);

        let end_jump = self.masm.jump(None);
        self.current_block_mut().pending_branches.push(end_jump);

        let here = self.masm.buffer().current_position();
        let false_branch = self.current_block().pending_label.expect("`if` always records its false-branch site");
        self.bind(false_branch, here)?;
        self.current_block_mut().else_seen = true;
        self.current_block_mut().unreachable = false;
        Ok(())
    }

    /// If the block carries a result and the current path is still
    /// reachable, materialize the top of the compile-time stack into
    /// the block's join slot. Safe to call unconditionally at every
    /// join point (`else`, `br`/`br_if` to this frame, and `end`) —
    /// see `DESIGN.md` for why writing it more than once on a given
    /// dynamic execution never happens.
    fn flush_block_result(&mut self) -> Result<(), CompileError> {
        let block = self.current_block();
        if block.unreachable || block.join_slots.is_empty() {
            return Ok(());
        }
        let slot = block.join_slots[0];
        let elem = self.stack.peek(0).cloned().ok_or_else(|| CompileError::InvalidBytecode("block result missing".to_string()))?;
        let (reg, mt) = self.materialize(elem, None)?;
        let dst = nwasm_masm::MemArg { base: self.masm.sp_reg(), offset: self.frame_size as i32 + slot };
        self.masm.store(dst, reg, size_of(mt));
        Ok(())
    }

    fn do_end(&mut self) -> Result<(), CompileError> {
        self.flush_block_result()?;
        let block = self.blocks.pop().expect("`end` always matches a pushed frame");
        self.stack.truncate(block.base_len);

        if matches!(block.kind, BlockKind::IfBlock) && !block.else_seen {
            if let Some(false_branch) = block.pending_label {
                let here = self.masm.buffer().current_position();
                self.bind(false_branch, here)?;
            }
        }

        let here = self.masm.buffer().current_position();
        for label in block.pending_branches {
            self.bind(label, here)?;
        }

        self.current_block_mut().unreachable = false;
        if let Some(mt) = block.join_types.first().copied() {
            let slot = block.join_slots[0];
            let temp_id = self.stack.new_temp(mt);
            self.stack.temps[temp_id as usize].storage = Some(TempStorage::FrameSlot(slot));
            self.stack.push_temp_ref(temp_id, mt);
        }
        Ok(())
    }

    /// Shared by `br`, `br_if`, and `return` (which always targets
    /// depth `blocks.len() - 1`, the implicit outer block). For a
    /// carried result, the value is written to the target's join slot
    /// (or, for the outermost block, straight into the ABI return
    /// register) *before* testing the branch condition — harmless on
    /// the not-taken path since nothing reads that slot except the one
    /// consolidated reader the jump (or fallthrough) actually reaches.
    fn branch_to(&mut self, relative_depth: u32, conditional: bool) -> Result<(), CompileError> {
        let cond_reg = if conditional {
            let (reg, _) = self.pop_to_reg(None)?;
            self.masm.cmp_imm(reg, 0, OperandSize::Word);
            self.regs.mark_free(reg);
            Some(reg)
        } else {
            None
        };

        let target_index = self.blocks.len() - 1 - relative_depth as usize;
        let is_outer = target_index == 0;
        let is_loop = matches!(self.blocks[target_index].kind, BlockKind::Loop);

        if is_outer {
            self.place_outer_return()?;
        } else if !is_loop && !self.blocks[target_index].join_slots.is_empty() {
            let slot = self.blocks[target_index].join_slots[0];
            let elem = self.stack.peek(0).cloned().ok_or_else(|| CompileError::InvalidBytecode("branch result missing".to_string()))?;
            let (reg, mt) = self.materialize(elem, None)?;
            let dst = nwasm_masm::MemArg { base: self.masm.sp_reg(), offset: self.frame_size as i32 + slot };
            self.masm.store(dst, reg, size_of(mt));
        }

        if !conditional {
            let base_len = self.blocks[target_index].base_len;
            while self.stack.len() > base_len {
                if let Some(elem) = self.stack.pop() {
                    self.release(&elem);
                }
            }
        }

        if let Some(header) = self.blocks[target_index].loop_header {
            if conditional {
                self.masm.branch_if(Cond::Ne, Some(header));
            } else {
                self.masm.jump(Some(header));
            }
        } else {
            let label = if conditional { self.masm.branch_if(Cond::Ne, None) } else { self.masm.jump(None) };
            self.blocks[target_index].pending_branches.push(label);
        }

        if !conditional {
            self.current_block_mut().unreachable = true;
        }
        let _ = cond_reg;
        Ok(())
    }

    /// `return`'s (and `br` to depth 0's) result placement: directly
    /// into the ABI return register, exactly like `on_function_end`,
    /// so every early exit converges on the same epilogue entry point.
    fn place_outer_return(&mut self) -> Result<(), CompileError> {
        if self.sig.results.is_empty() {
            return Ok(());
        }
        let want = self.sig.results[0];
        let dst = if want.is_float() { self.masm.calling_convention().float_return } else { self.masm.calling_convention().int_return };
        let elem = self.stack.peek(0).cloned().ok_or_else(|| CompileError::InvalidBytecode("return value missing".to_string()))?;
        let (reg, _) = self.materialize(elem, Some(dst))?;
        if reg != dst {
            self.masm.mov_reg(dst, reg, size_of(want));
        }
        Ok(())
    }

    /// Lowered as a sequential chain of compares (`cTRAP`-style
    /// conditional branches), not a native jump table: `MacroAssembler`
    /// has no jump-table primitive (see `DESIGN.md`). Every target
    /// shares the table's declared arity per Wasm validation, so the
    /// carried result (if any) is written once, ahead of the whole
    /// chain.
    fn br_table(&mut self, targets: &BrTable<'_>) -> Result<(), CompileError> {
        let default_depth = targets.default();
        let depths: Vec<u32> = targets.targets().collect::<Result<Vec<_>, _>>().map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;

        let default_index = self.blocks.len() - 1 - default_depth as usize;
        if default_index == 0 {
            self.place_outer_return()?;
        } else if !matches!(self.blocks[default_index].kind, BlockKind::Loop) && !self.blocks[default_index].join_slots.is_empty() {
            let slot = self.blocks[default_index].join_slots[0];
            let elem = self.stack.peek(1).cloned().ok_or_else(|| CompileError::InvalidBytecode("br_table result missing".to_string()))?;
            let (reg, mt) = self.materialize(elem, None)?;
            let dst = nwasm_masm::MemArg { base: self.masm.sp_reg(), offset: self.frame_size as i32 + slot };
            self.masm.store(dst, reg, size_of(mt));
        }

        let (index_reg, _) = self.pop_to_reg(None)?;
        for (i, depth) in depths.iter().enumerate() {
            self.masm.cmp_imm(index_reg, i as i32, OperandSize::Word);
            let target_index = self.blocks.len() - 1 - *depth as usize;
            if let Some(header) = self.blocks[target_index].loop_header {
                self.masm.branch_if(Cond::Eq, Some(header));
            } else {
                let label = self.masm.branch_if(Cond::Eq, None);
                self.blocks[target_index].pending_branches.push(label);
            }
        }
        self.regs.mark_free(index_reg);

        if let Some(elem) = self.stack.pop() {
            self.release(&elem);
        }

        if let Some(header) = self.blocks[default_index].loop_header {
            self.masm.jump(Some(header));
        } else {
            let label = self.masm.jump(None);
            self.blocks[default_index].pending_branches.push(label);
        }

        self.current_block_mut().unreachable = true;
        Ok(())
    }

    fn select(&mut self) -> Result<(), CompileError> {
        let (cond, _) = self.pop_to_reg(None)?;
        let (on_false, mt) = self.pop_to_reg(None)?;
        let (on_true, _) = self.pop_to_reg(None)?;

        self.masm.cmp_imm(cond, 0, OperandSize::Word);
        self.regs.mark_free(cond);
        let dst = self.alloc_reg(class_of(mt), Some(on_true))?;
        let skip_false = self.masm.branch_if(Cond::Ne, None);
        if dst != on_false {
            self.masm.mov_reg(dst, on_false, size_of(mt));
        }
        let done = self.masm.jump(None);
        let here = self.masm.buffer().current_position();
        self.bind(skip_false, here)?;
        if dst != on_true {
            self.masm.mov_reg(dst, on_true, size_of(mt));
        }
        let here2 = self.masm.buffer().current_position();
        self.bind(done, here2)?;

        if dst != on_true {
            self.regs.mark_free(on_true);
        }
        if dst != on_false && on_false != on_true {
            self.regs.mark_free(on_false);
        }
        self.stack.push(StackElement::ScratchRegister { reg: dst, mt });
        Ok(())
    }
}

/// Opcodes that manipulate block nesting and must still run while the
/// current path is unreachable, so the `end`/`else` count stays
/// balanced (§4.4's unreachable-region handling).
fn is_structural(op: &Operator<'_>) -> bool {
    matches!(op, Operator::Block { .. } | Operator::Loop { .. } | Operator::If { .. } | Operator::Else | Operator::End)
}
