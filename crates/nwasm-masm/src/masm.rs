use crate::buffer::{BranchOutOfRange, CodeBuffer, Label};
use crate::cc::CallingConvention;
use crate::reg::{Reg, RegSet};
use nwasm_core::TrapCode;

/// Width of a memory access or an arithmetic operation, independent of
/// the `MachineType` of the Wasm value it backs (e.g. an `i32.load8_u`
/// reads a `Byte` and zero-extends into a 32-bit destination).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandSize {
    Byte,
    Half,
    Word,
    Quad,
}

impl OperandSize {
    pub const fn bytes(self) -> u32 {
        match self {
            OperandSize::Byte => 1,
            OperandSize::Half => 2,
            OperandSize::Word => 4,
            OperandSize::Quad => 8,
        }
    }
}

/// A comparison condition, used by `cTRAP` and conditional branches.
/// Named after their signed/unsigned Wasm meaning rather than any one
/// ISA's mnemonic; each backend maps these onto its own condition-code
/// bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    LtSigned,
    LeSigned,
    GtSigned,
    GeSigned,
    LtUnsigned,
    LeUnsigned,
    GtUnsigned,
    GeUnsigned,
}

impl Cond {
    pub const fn inverse(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::LtSigned => Cond::GeSigned,
            Cond::LeSigned => Cond::GtSigned,
            Cond::GtSigned => Cond::LeSigned,
            Cond::GeSigned => Cond::LtSigned,
            Cond::LtUnsigned => Cond::GeUnsigned,
            Cond::LeUnsigned => Cond::GtUnsigned,
            Cond::GtUnsigned => Cond::LeUnsigned,
            Cond::GeUnsigned => Cond::LtUnsigned,
        }
    }
}

/// `address + staticOffset`: the address-mode operand shared by every
/// load/store, pre-linear-memory-base-addition. `loadArgsToRegsAndPrepDest`
/// folds the base-register add itself; this struct only carries the two
/// addends the opcode lowering already knows about.
#[derive(Debug, Clone, Copy)]
pub struct MemArg {
    pub base: Reg,
    pub offset: i32,
}

/// One candidate encoding considered by [`MacroAssembler::select_instr`].
/// `cost` is lift-bytes-plus-instruction-bytes as produced by the
/// caller; `dst_must_equal_arg0` mirrors instructions (e.g. x86's
/// two-operand `ADD`) whose destination is fused with the first source.
#[derive(Debug, Clone, Copy)]
pub struct InstrCandidate {
    pub cost: u32,
    pub dst_must_equal_arg0: bool,
    pub commutative_swap: bool,
}

/// C2: the per-architecture assembler contract. Every method appends to
/// the backend's own [`CodeBuffer`] (owned by the implementer, not this
/// trait, so that trap-stub dedup state and the checked-frame
/// high-water mark can live alongside it).
pub trait MacroAssembler {
    fn buffer(&self) -> &CodeBuffer;
    fn buffer_mut(&mut self) -> &mut CodeBuffer;

    fn calling_convention(&self) -> &CallingConvention;

    /// Pointer width of the target: 4 on 32-bit targets (where 64-bit
    /// Wasm values occupy a register pair), 8 elsewhere.
    fn pointer_bytes(&self) -> u32;

    /// Register permanently reserved to hold the linear-memory base
    /// pointer; never handed out by the register allocator.
    fn basedata_reg(&self) -> Reg;

    /// Register permanently reserved as address-computation scratch for
    /// memory-access lowering, kept out of the allocator's free set for
    /// the same reason as `basedata_reg`.
    fn reserved_scratch(&self) -> Reg;

    /// The architectural stack pointer, usable as a [`MemArg`] base for
    /// addressing the current function's frame slots.
    fn sp_reg(&self) -> Reg;

    /// Integer registers the allocator may hand out, excluding the
    /// stack/frame pointers and the two permanently reserved registers
    /// above.
    fn usable_int_regs(&self) -> RegSet;
    /// Float/vector registers the allocator may hand out.
    fn usable_float_regs(&self) -> RegSet;

    /// Load an immediate into `dst`, picking the shortest of the forms
    /// the ISA offers for the value's range (a sign-extended short
    /// immediate, a 16-bit move-high/move-low pair, or a full
    /// pointer-width load), mirroring §4.1's `MOVimm`.
    fn mov_imm(&mut self, dst: Reg, size: OperandSize, imm: i64);

    fn mov_reg(&mut self, dst: Reg, src: Reg, size: OperandSize);

    fn add_imm_to_reg(&mut self, dst: Reg, imm: i32, size: OperandSize);

    /// Move SP by `delta` bytes (negative grows the frame). This is the
    /// only primitive that touches SP directly; `set_stack_frame_size`
    /// is the only caller.
    fn add_sp(&mut self, delta: i32);

    fn load(&mut self, dst: Reg, addr: MemArg, size: OperandSize, sign_extend: bool);

    fn store(&mut self, addr: MemArg, src: Reg, size: OperandSize);

    fn add(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize);
    fn sub(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize);
    fn mul(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize);
    fn and(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize);
    fn or(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize);
    fn xor(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize);

    fn cmp(&mut self, lhs: Reg, rhs: Reg, size: OperandSize);
    fn cmp_imm(&mut self, lhs: Reg, imm: i32, size: OperandSize);
    /// Materialize the result of the last `cmp`/`cmp_imm` as a 0/1
    /// value in `dst` under `cond`.
    fn set_cond(&mut self, dst: Reg, cond: Cond);

    /// Emit an unconditional branch to `target` if bound, or a
    /// relocatable placeholder otherwise (`lastBlockBranch` chaining is
    /// the caller's responsibility; this just emits one instruction).
    fn jump(&mut self, target: Option<Label>) -> Label;
    /// Emit a branch taken when the last comparison satisfies `cond`.
    fn branch_if(&mut self, cond: Cond, target: Option<Label>) -> Label;

    fn bind_label(&mut self, label: Label, target: Label) -> Result<(), BranchOutOfRange>;

    /// Among `candidates` already filtered by the caller to those whose
    /// destination constraint is satisfiable given `arg0`/`arg1`, return
    /// the index of the cheapest; ties favor the earlier (lower lift
    /// count) entry, since callers list candidates in ascending lift
    /// order.
    fn select_instr(&self, candidates: &[InstrCandidate]) -> usize {
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(i, c)| (c.cost, *i))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// `TRAP(code)`: branch unconditionally to a deduplicated trap stub.
    fn trap(&mut self, code: TrapCode);
    /// `cTRAP(code, cond)`: branch to the stub only if the last compare
    /// satisfies `cond`.
    fn conditional_trap(&mut self, code: TrapCode, cond: Cond);

    /// Compare SP (or a scratch holding SP + frame growth) against the
    /// basedata stack-fence slot and trap with `StackFenceBreached` if
    /// crossed.
    fn check_stack_fence(&mut self, data_scratch: Reg, addr_scratch: Reg);

    /// The only path that moves SP for frame setup/teardown. Enforces
    /// alignment, rejects sizes above the hard implementation limit,
    /// and re-invokes `check_stack_fence` when `new_size` exceeds the
    /// previously checked high-water mark.
    fn set_stack_frame_size(
        &mut self,
        new_size: u32,
        checked_high_water_mark: &mut u32,
        data_scratch: Reg,
        addr_scratch: Reg,
    ) -> Result<(), nwasm_core::CompileError>;

    fn call_direct(&mut self, target: Label);
    /// Emit a direct call whose target isn't known yet (a forward
    /// reference to a function that hasn't been code-generated). The
    /// returned [`Label`] is the relocation site; the caller binds it
    /// once the target's entry offset is known, via [`Self::bind_label`].
    fn call_direct_unbound(&mut self) -> Label;
    fn call_indirect(&mut self, target: Reg);
    fn ret(&mut self);
    fn push(&mut self, reg: Reg);
    fn pop(&mut self, reg: Reg);

    /// Register the shift-count operand must sit in before
    /// `shl`/`shr_signed`/`shr_unsigned` is called, or `None` if the
    /// ISA accepts a shift count in any register (AArch64). x64's
    /// shift-by-register forms hard-wire the count to `cl`; lowering
    /// requests this register as the target hint for the rhs operand
    /// so no extra move is needed at the call site.
    fn fixed_shift_count_reg(&self) -> Option<Reg> {
        None
    }

    /// Register the dividend must sit in before
    /// `div_signed`/`div_unsigned`/`rem_signed`/`rem_unsigned`, or
    /// `None` if the ISA's divide instruction takes two arbitrary
    /// registers (AArch64's `sdiv`/`udiv`). x64's `idiv`/`div` read the
    /// dividend from `rdx:rax`.
    fn fixed_div_dividend_reg(&self) -> Option<Reg> {
        None
    }

    /// Registers clobbered by a divide instruction beyond its declared
    /// destination (x64's `rdx` holds the remainder as a side effect of
    /// computing the quotient, and vice versa); the register allocator
    /// must evict anything live there first.
    fn div_clobbers(&self) -> RegSet {
        RegSet::EMPTY
    }

    /// `dst = lhs << (rhs mod bitwidth)`. On x64 `rhs` must already be
    /// in the register `fixed_shift_count_reg()` names.
    fn shl(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize);
    fn shr_signed(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize);
    fn shr_unsigned(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize);

    /// Integer division. `lhs` must already be in
    /// `fixed_div_dividend_reg()` when that returns `Some`. Callers are
    /// responsible for emitting the `IntegerDivideByZero` and
    /// `IntegerOverflow` (`MIN / -1`) trap checks beforehand; these
    /// methods assume the division is safe to execute.
    fn div_signed(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize);
    fn div_unsigned(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize);
    fn rem_signed(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize);
    fn rem_unsigned(&mut self, dst: Reg, lhs: Reg, rhs: Reg, size: OperandSize);

    /// Sign-extend the low 8/16 bits of `src` into `dst`. `to64` widens
    /// to the full 64-bit register; otherwise the result is a 32-bit
    /// value (upper 32 bits don't care, per this port's `I32` convention).
    fn sign_extend8(&mut self, dst: Reg, src: Reg, to64: bool);
    fn sign_extend16(&mut self, dst: Reg, src: Reg, to64: bool);
    /// Sign-extend the low 32 bits of `src` into the full 64-bit `dst`
    /// (`i64.extend_i32_s`, `i64.extend32_s`).
    fn sign_extend32(&mut self, dst: Reg, src: Reg);
}
