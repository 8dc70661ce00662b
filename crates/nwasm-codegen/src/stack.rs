//! C4: the compile-time operand stack. Elements live in an arena
//! addressed by integer id rather than as a self-referential linked
//! list, so that the per-local/per-global alias lists and the
//! per-temporary refill chains stay valid across `erase`/`insert_before`
//! without unsafe pointer games.

use nwasm_masm::{Cond, Label, Reg};
use nwasm_core::MachineType;
use smallvec::SmallVec;

pub type ElemId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Block,
    Loop,
    IfBlock,
}

/// A control frame pushed by `block`/`loop`/`if`, held on `FuncGen`'s own
/// `Vec<BlockFrame>` rather than interleaved into the value stack — the
/// value stack only ever holds operands, so popping one never has to
/// skip over a control marker. §4.4 describes forward branches as
/// chained through their own relocation record; this port keeps the
/// same "resolve them all once `end` is reached" behavior with a plain
/// `Vec`-backed list instead, which is the ordinary way to express a
/// forward-reference worklist in a managed language.
#[derive(Debug, Clone)]
pub struct BlockFrame {
    pub kind: BlockKind,
    pub params: u32,
    pub results: u32,
    pub entry_frame_size: u32,
    /// Every not-yet-resolved branch targeting this frame's `end`.
    pub pending_branches: SmallVec<[Label; 4]>,
    pub loop_header: Option<Label>,
    /// Set once any path out of this frame is known unreachable; while
    /// set, opcodes that don't affect block structure are discarded
    /// instead of lowered, since the values they'd operate on were never
    /// actually produced.
    pub unreachable: bool,
    /// `if` without a matching `else` needs its forward branch bound at
    /// `end` just like `block`; this records whether `else` has already
    /// run so `end` doesn't double-patch.
    pub else_seen: bool,
    /// `IfBlock` only: the relocation site of the conditional branch
    /// emitted at `if` (taken when the condition is false), bound to
    /// the `else` target once seen, or to `end` directly for an
    /// `if`-without-`else`.
    pub pending_label: Option<Label>,
    /// Frame-relative byte offsets this frame's join point(s) spill
    /// through: a `Loop`'s params (the back-edge target) or a
    /// `Block`/`IfBlock`'s results (the forward-branch target),
    /// materialized to a fixed stack slot per value so every path that
    /// reaches the join (fallthrough or a branch) agrees on where to
    /// find it, rather than threading a dynamically-chosen register
    /// through arbitrarily nested control flow (see DESIGN.md).
    pub join_slots: SmallVec<[i32; 4]>,
    /// Machine type of each `join_slots` entry, same indexing.
    pub join_types: SmallVec<[MachineType; 4]>,
    /// `IfBlock` only: the register allocator's state as of `if`, before
    /// the "then" arm ran anything — restored at `else` so the "else"
    /// arm starts from the same free/used register picture rather than
    /// whatever the "then" arm happened to leave behind (the two arms
    /// are alternatives, never both executed).
    pub regs_snapshot: Option<Box<crate::regalloc::RegAllocator>>,
    /// Value-stack length at entry (after the condition, for `IfBlock`,
    /// is popped; before a `Loop`'s params are consumed into its join
    /// slots). Branches and `end` truncate back to this length plus the
    /// frame's arity, freeing any registers left by abandoned code.
    pub base_len: usize,
    /// `IfBlock` only: the params this construct was entered with,
    /// snapshotted (not popped) at `if` so `else` can see the same
    /// operands the "then" arm started from — the two arms are
    /// alternative continuations of the same point, not a sequence.
    pub saved_params: SmallVec<[StackElement; 4]>,
}

/// A value already computed but not yet consumed, describing where the
/// register allocator should look for it and whether evicting its
/// register requires a store first.
#[derive(Debug, Clone, Copy)]
pub enum TempStorage {
    Register(Reg),
    FrameSlot(i32),
}

/// The deferred forms this compiler fuses with their consumer. Kept as
/// a closed, small enum per the "explicit enum of deferrable opcodes"
/// guidance rather than a generic postponed-closure mechanism.
#[derive(Debug, Clone, Copy)]
pub enum DeferredOp {
    /// A comparison whose result may be consumed either as a branch
    /// condition (fused directly into `br_if`/`if`) or forced into a
    /// 0/1 value if some other opcode needs the boolean itself.
    Compare { cond: Cond, lhs: Reg, rhs: Reg, size: nwasm_masm::OperandSize },
}

#[derive(Debug, Clone)]
pub enum StackElement {
    Constant { mt: MachineType, bits: u64 },
    Local { index: u32 },
    Global { index: u32 },
    ScratchRegister { reg: Reg, mt: MachineType },
    TempResult { temp_id: u32, mt: MachineType },
    Deferred { op: DeferredOp },
    Invalid,
}

struct Slot {
    elem: StackElement,
    prev: Option<ElemId>,
    next: Option<ElemId>,
}

/// Side record for one outstanding temporary: its current storage plus
/// every live stack element that currently names it, so relocating the
/// storage (on spill, or on eviction) can walk and fix up every holder.
#[derive(Debug, Clone, Default)]
pub struct TempSlot {
    pub storage: Option<TempStorage>,
    pub mt: MachineType,
    pub aliases: SmallVec<[ElemId; 2]>,
}

/// The compile-time stack plus its auxiliary alias tables (§4.2).
pub struct CompileStack {
    slots: Vec<Slot>,
    free: Vec<ElemId>,
    head: Option<ElemId>,
    tail: Option<ElemId>,
    len: usize,
    local_aliases: Vec<SmallVec<[ElemId; 4]>>,
    global_aliases: Vec<SmallVec<[ElemId; 4]>>,
    pub temps: Vec<TempSlot>,
}

impl CompileStack {
    pub fn new(num_locals: usize, num_globals: usize) -> Self {
        CompileStack {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            local_aliases: vec![SmallVec::new(); num_locals],
            global_aliases: vec![SmallVec::new(); num_globals],
            temps: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn alloc_slot(&mut self, elem: StackElement) -> ElemId {
        if let Some(id) = self.free.pop() {
            self.slots[id as usize] = Slot { elem, prev: None, next: None };
            id
        } else {
            self.slots.push(Slot { elem, prev: None, next: None });
            (self.slots.len() - 1) as ElemId
        }
    }

    pub fn new_temp(&mut self, mt: MachineType) -> u32 {
        self.temps.push(TempSlot { mt, ..TempSlot::default() });
        (self.temps.len() - 1) as u32
    }

    pub fn get(&self, id: ElemId) -> &StackElement {
        &self.slots[id as usize].elem
    }

    pub fn get_mut(&mut self, id: ElemId) -> &mut StackElement {
        &mut self.slots[id as usize].elem
    }

    pub fn push(&mut self, elem: StackElement) -> ElemId {
        self.register_aliases(&elem, None);
        let id = self.alloc_slot(elem);
        self.link_tail(id);
        id
    }

    fn link_tail(&mut self, id: ElemId) {
        self.slots[id as usize].prev = self.tail;
        self.slots[id as usize].next = None;
        if let Some(t) = self.tail {
            self.slots[t as usize].next = Some(id);
        } else {
            self.head = Some(id);
        }
        self.tail = Some(id);
        self.len += 1;
    }

    fn register_aliases(&mut self, elem: &StackElement, owner: Option<ElemId>) {
        // Aliases are wired in by the caller after `push` returns the
        // new id (see `push_local`/`push_global`/`push_temp_ref`), since
        // the id doesn't exist until the slot is allocated. This hook
        // exists so `push` stays the single insertion point even though
        // most variants need no alias bookkeeping.
        let _ = (elem, owner);
    }

    pub fn push_local(&mut self, index: u32) -> ElemId {
        let id = self.alloc_slot(StackElement::Local { index });
        self.link_tail(id);
        self.local_aliases[index as usize].push(id);
        id
    }

    pub fn push_global(&mut self, index: u32) -> ElemId {
        let id = self.alloc_slot(StackElement::Global { index });
        self.link_tail(id);
        self.global_aliases[index as usize].push(id);
        id
    }

    pub fn push_temp_ref(&mut self, temp_id: u32, mt: MachineType) -> ElemId {
        let id = self.alloc_slot(StackElement::TempResult { temp_id, mt });
        self.link_tail(id);
        self.temps[temp_id as usize].aliases.push(id);
        id
    }

    /// Pop the top element, detaching it from whatever alias list it
    /// belongs to. Returns `None` on an empty stack (callers within a
    /// single function body never hit this on well-formed bytecode; the
    /// driver treats it as `InvalidBytecode` if it does).
    pub fn pop(&mut self) -> Option<StackElement> {
        let id = self.tail?;
        self.cleanup_aliases(id);
        self.detach(id);
        self.free.push(id);
        Some(std::mem::replace(&mut self.slots[id as usize].elem, StackElement::Invalid))
    }

    /// Deregister `id` from whatever alias/refill list it's named in,
    /// without touching the doubly-linked position — shared by `pop`
    /// (which then detaches) and `erase` (ditto), so a slot is never
    /// freed while a stale id still lingers in an alias list.
    fn cleanup_aliases(&mut self, id: ElemId) {
        match &self.slots[id as usize].elem {
            StackElement::Local { index } => {
                let index = *index;
                self.local_aliases[index as usize].retain(|&e| e != id);
            }
            StackElement::Global { index } => {
                let index = *index;
                self.global_aliases[index as usize].retain(|&e| e != id);
            }
            StackElement::TempResult { temp_id, .. } => {
                let temp_id = *temp_id;
                self.temps[temp_id as usize].aliases.retain(|&e| e != id);
            }
            _ => {}
        }
    }

    pub fn peek(&self, depth: usize) -> Option<&StackElement> {
        let mut cur = self.tail;
        for _ in 0..depth {
            cur = cur.and_then(|id| self.slots[id as usize].prev);
        }
        cur.map(|id| &self.slots[id as usize].elem)
    }

    pub fn top_id(&self) -> Option<ElemId> {
        self.tail
    }

    /// Every live element, bottom to top. Used to spill the whole
    /// operand stack ahead of a native call rather than just the
    /// arguments being passed, since the callee's ABI is free to
    /// clobber any register a deeper, still-live value happens to sit
    /// in.
    pub fn iter_ids(&self) -> impl Iterator<Item = ElemId> + '_ {
        std::iter::successors(self.head, move |&id| self.slots[id as usize].next)
    }

    /// Erase an arbitrary element (used when collapsing a `Block` frame
    /// on `end`, or when a deferred action is discarded without ever
    /// being consumed). Frees the register it held, if any, and the
    /// caller is responsible for actually doing so via the allocator —
    /// this only updates stack bookkeeping.
    pub fn erase(&mut self, id: ElemId) {
        self.cleanup_aliases(id);
        self.detach(id);
        self.free.push(id);
    }

    /// Every stack element still aliasing local `index`, clearing the
    /// alias list as a side effect — used by `local.set`/`local.tee`
    /// lowering to force each one into an independent materialized copy
    /// before the local's storage is overwritten, preserving the
    /// snapshot semantics Wasm locals require.
    pub fn take_local_aliases(&mut self, index: u32) -> SmallVec<[ElemId; 4]> {
        std::mem::take(&mut self.local_aliases[index as usize])
    }

    pub fn take_global_aliases(&mut self, index: u32) -> SmallVec<[ElemId; 4]> {
        std::mem::take(&mut self.global_aliases[index as usize])
    }

    fn detach(&mut self, id: ElemId) {
        let (prev, next) = (self.slots[id as usize].prev, self.slots[id as usize].next);
        match prev {
            Some(p) => self.slots[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n as usize].prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    pub fn local_alias_ids(&self, index: u32) -> &[ElemId] {
        &self.local_aliases[index as usize]
    }

    pub fn global_alias_ids(&self, index: u32) -> &[ElemId] {
        &self.global_aliases[index as usize]
    }

    /// Truncate the stack back to `target_len` elements, used when a
    /// branch leaves a block: everything above the block's declared
    /// arity is dropped (freeing registers is the caller's job, driven
    /// by iterating the dropped range before calling this).
    pub fn truncate(&mut self, target_len: usize) {
        while self.len > target_len {
            self.pop();
        }
    }

}
