//! C5: the scratch-oriented register allocator and the register-copy
//! resolver used to marshal call arguments without clobbering a source
//! that is itself some other argument's destination.

use nwasm_masm::{MacroAssembler, OperandSize, Reg, RegClass, RegSet};
use smallvec::SmallVec;

/// What currently holds a register, so eviction knows how to preserve
/// the value: write a local back to its reserved frame slot, a temp to
/// a freshly assigned frame slot (and fix up every stack element that
/// names it), or a cached mutable global back to link data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Local(u32),
    Global(u32),
    Temp(u32),
}

/// Free-set bookkeeping for one target's two register classes. Eviction
/// policy itself (what to do with the value being displaced) lives in
/// `crate::lower`, since it needs the compile-time stack and the
/// module's per-local frame offsets; this type only tracks which
/// registers are currently claimed and by whom.
#[derive(Clone)]
pub struct RegAllocator {
    usable_int: RegSet,
    usable_float: RegSet,
    used_int: RegSet,
    used_float: RegSet,
    owner_int: [Option<Owner>; 64],
    owner_float: [Option<Owner>; 64],
}

impl RegAllocator {
    pub fn new(masm: &dyn MacroAssembler) -> Self {
        RegAllocator {
            usable_int: masm.usable_int_regs(),
            usable_float: masm.usable_float_regs(),
            used_int: RegSet::EMPTY,
            used_float: RegSet::EMPTY,
            owner_int: [None; 64],
            owner_float: [None; 64],
        }
    }

    fn used_mut(&mut self, class: RegClass) -> &mut RegSet {
        match class {
            RegClass::Int => &mut self.used_int,
            RegClass::Float => &mut self.used_float,
        }
    }

    fn usable(&self, class: RegClass) -> RegSet {
        match class {
            RegClass::Int => self.usable_int,
            RegClass::Float => self.usable_float,
        }
    }

    pub fn is_free(&self, reg: Reg) -> bool {
        !self.used(reg.class).contains(reg.index)
    }

    fn used(&self, class: RegClass) -> RegSet {
        match class {
            RegClass::Int => self.used_int,
            RegClass::Float => self.used_float,
        }
    }

    pub fn owner_of(&self, reg: Reg) -> Option<Owner> {
        match reg.class {
            RegClass::Int => self.owner_int[reg.index as usize],
            RegClass::Float => self.owner_float[reg.index as usize],
        }
    }

    pub fn mark_used(&mut self, reg: Reg, owner: Option<Owner>) {
        self.used_mut(reg.class).insert(reg.index);
        match reg.class {
            RegClass::Int => self.owner_int[reg.index as usize] = owner,
            RegClass::Float => self.owner_float[reg.index as usize] = owner,
        }
    }

    pub fn mark_free(&mut self, reg: Reg) {
        self.used_mut(reg.class).remove(reg.index);
        match reg.class {
            RegClass::Int => self.owner_int[reg.index as usize] = None,
            RegClass::Float => self.owner_float[reg.index as usize] = None,
        }
    }

    /// `requestScratch`'s first two priority tiers: the hint if it's
    /// free and of the right class, else any other currently-unused
    /// register. Returns `None` when every usable register of the
    /// class is live, in which case the caller must evict.
    pub fn try_alloc(&self, class: RegClass, hint: Option<Reg>, protected: RegSet) -> Option<Reg> {
        if let Some(h) = hint {
            if h.class == class && self.is_free(h) && !protected.contains(h.index) {
                return Some(h);
            }
        }
        let free = self.usable(class).0 & !self.used(class).0 & !protected.0;
        if free == 0 {
            None
        } else {
            Some(match class {
                RegClass::Int => Reg::int(free.trailing_zeros() as u8),
                RegClass::Float => Reg::float(free.trailing_zeros() as u8),
            })
        }
    }

    /// Pick an eviction victim: the lowest-indexed used, unprotected
    /// register of `class`. Ties are broken by index order for
    /// determinism (§8 "compile determinism").
    pub fn pick_eviction_victim(&self, class: RegClass, protected: RegSet) -> Option<Reg> {
        let candidates = self.used(class).0 & self.usable(class).0 & !protected.0;
        if candidates == 0 {
            None
        } else {
            let idx = candidates.trailing_zeros() as u8;
            Some(match class {
                RegClass::Int => Reg::int(idx),
                RegClass::Float => Reg::float(idx),
            })
        }
    }
}

/// One edge of a parallel register move: `dst` must end up holding the
/// value currently described by `src`.
#[derive(Debug, Clone, Copy)]
pub struct CopyEdge {
    pub dst: Reg,
    pub src: CopySource,
    pub size: OperandSize,
}

#[derive(Debug, Clone, Copy)]
pub enum CopySource {
    Reg(Reg),
    Imm(i64),
}

/// Resolve a set of parallel register moves (call-argument marshalling)
/// into a correct sequence of `mov`/swap instructions, per §4.3's
/// register-copy resolver. A naive instruction-by-instruction emission
/// can clobber a source that is itself some other edge's destination;
/// this orders moves so every source is read before it is overwritten,
/// and breaks any remaining cycle with an explicit swap.
///
/// `scratch` is a spare register (never itself a `dst` in `edges`) used
/// to break a cycle when the target lacks a direct register-swap
/// instruction.
pub fn resolve_register_copies(masm: &mut dyn MacroAssembler, edges: &[CopyEdge], scratch: Reg) {
    let mut pending: SmallVec<[CopyEdge; 8]> = edges.iter().copied().collect();

    while !pending.is_empty() {
        // A "ready" edge is one whose destination is not read as the
        // source of any other still-pending edge — moving into it
        // can't destroy a value someone else still needs.
        let ready_index = pending.iter().position(|e| {
            !pending.iter().any(|other| matches!(other.src, CopySource::Reg(r) if r == e.dst) && other.dst != e.dst)
        });

        if let Some(i) = ready_index {
            let edge = pending.remove(i);
            match edge.src {
                CopySource::Reg(r) => masm.mov_reg(edge.dst, r, edge.size),
                CopySource::Imm(v) => masm.mov_imm(edge.dst, edge.size, v),
            }
            continue;
        }

        // Every remaining edge sits on a cycle. Break one link with a
        // three-step swap through `scratch`, which frees its `dst` for
        // the ready-edge pass to pick up on the next iteration.
        let edge = pending.remove(0);
        match edge.src {
            CopySource::Reg(r) => {
                masm.mov_reg(scratch, edge.dst, edge.size);
                masm.mov_reg(edge.dst, r, edge.size);
                for other in pending.iter_mut() {
                    if matches!(other.src, CopySource::Reg(s) if s == edge.dst) {
                        other.src = CopySource::Reg(scratch);
                    }
                }
            }
            CopySource::Imm(v) => masm.mov_imm(edge.dst, edge.size, v),
        }
    }
}
