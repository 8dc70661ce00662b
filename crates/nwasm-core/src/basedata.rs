//! Basedata layout: the fixed-shape metadata region placed immediately
//! before Wasm linear memory inside job memory (§3 "Basedata layout").
//! Every offset here is negative, i.e. measured *backwards* from the
//! linear-memory base pointer that generated code keeps live in a
//! reserved register; `nwasm-masm`'s trap/stack-fence emission and
//! `nwasm-runtime`'s basedata writer both anchor on these constants so
//! the two sides never disagree about the layout.

/// Offsets measured backwards from the linear-memory base (i.e. `base -
/// offset` is the address of the field). Mirrors `Basedata::FromEnd` in
/// the reference layout, trimmed to the fields this port actually uses
/// (no TriCore-only auxiliary call table).
pub mod from_end {
    /// Status flags, including the interruption-request bit (§5
    /// "Ordering guarantees").
    pub const STATUS_FLAGS: i32 = 8;
    /// Number of Wasm pages currently backing linear memory.
    pub const LIN_MEM_WASM_SIZE: i32 = STATUS_FLAGS + 4;
    /// Actual byte length of linear memory currently readable/writable
    /// (`<=` `LIN_MEM_WASM_SIZE * 64KiB`, see §3 invariants).
    pub const ACTUAL_LIN_MEM_BYTE_SIZE: i32 = LIN_MEM_WASM_SIZE + 4;
    /// One trap-code byte, written by generated code on trap.
    pub const TRAP_CODE_SLOT: i32 = ACTUAL_LIN_MEM_BYTE_SIZE + 8;
    /// Pointer to the generic trap/unwind entry point.
    pub const TRAP_HANDLER_PTR: i32 = TRAP_CODE_SLOT + 8;
    /// Saved host SP to restore when unwinding after a trap.
    pub const TRAP_STACK_REENTRY: i32 = TRAP_HANDLER_PTR + 8;
    /// Pointer to the (growth or notify) memory helper function.
    pub const MEMORY_HELPER_PTR: i32 = TRAP_STACK_REENTRY + 8;
    /// Base of the single table's contiguous element array, each element
    /// a 16-byte `{func_ptr: i64, sig_index: i64}` pair filled in at link
    /// time from the module's active element segments; a func_ptr of 0
    /// marks an unset slot (`UndefinedElement`).
    pub const TABLE_BASE_PTR: i32 = MEMORY_HELPER_PTR + 8;
    /// Element count of the array `TABLE_BASE_PTR` points to, used for
    /// `call_indirect`'s bounds check.
    pub const TABLE_LENGTH: i32 = TABLE_BASE_PTR + 8;
    /// Opaque pointer the embedder may stash and retrieve from host
    /// function callbacks.
    pub const CUSTOM_CTX_PTR: i32 = TABLE_LENGTH + 8;
    /// Back-reference to the owning `Runtime`, used by the memory
    /// helper and the trap bridge to reach Rust-side state.
    pub const RUNTIME_PTR: i32 = CUSTOM_CTX_PTR + 8;
    /// Pointer to the innermost live stacktrace record, or null.
    pub const LAST_FRAME_REF_PTR: i32 = RUNTIME_PTR + 8;
    /// Lower bound for SP; generated code traps if SP would cross it
    /// (`StackFenceBreached`).
    pub const STACK_FENCE: i32 = LAST_FRAME_REF_PTR + 8;
    /// Fixed-size scratch region generated code may spill into without
    /// touching the current frame (e.g. across a V2 import call that
    /// clobbers everything).
    pub const SPILL_REGION: i32 = STACK_FENCE + 8;
    pub const SPILL_REGION_BYTES: i32 = 16;
    /// Non-bounds-checked builds only: landing-pad indirection slots the
    /// MMU signal handler diverts a faulted access through.
    pub const LANDING_PAD_RET: i32 = SPILL_REGION + SPILL_REGION_BYTES;
    pub const LANDING_PAD_TARGET: i32 = LANDING_PAD_RET + 8;
    /// Current depth into the stacktrace ring (an entry count, not a
    /// byte offset); incremented on function entry, decremented on
    /// normal return, left alone by a trap so the ring reflects the
    /// live call chain at the moment of failure.
    pub const STACKTRACE_DEPTH: i32 = LANDING_PAD_TARGET + 8;
    /// Base of the stacktrace ring, sized at compile time
    /// (`stacktrace_record_count` entries of 4 bytes each, rounded up to
    /// 8-byte alignment).
    pub const STACKTRACE_BASE: i32 = STACKTRACE_DEPTH + 8;

    /// Total basedata length "from end", given how many stacktrace
    /// entries the module's compiled header says to keep.
    pub const fn total(stacktrace_record_count: u32) -> u32 {
        let raw = stacktrace_record_count * 4;
        let padded = crate::round_up_to_pow2(raw, 3);
        (STACKTRACE_BASE as u32) + padded
    }
}

/// Offsets measured forwards from the start of job memory.
pub mod from_start {
    /// Start of link data (mutable globals + resolved import slots).
    pub const LINK_DATA: u32 = 8;
}

/// Total basedata length for a module with `link_data_length` bytes of
/// link data and `stacktrace_record_count` stacktrace ring entries.
pub const fn basedata_length(link_data_length: u32, stacktrace_record_count: u32) -> u32 {
    from_start::LINK_DATA + link_data_length + from_end::total(stacktrace_record_count)
}

/// Generated code addresses everything through the linear-memory base
/// register (a negative offset reaches into basedata, a positive one
/// reaches into linear memory) — it never holds a separate job-memory
/// base pointer. Link data sits at the *front* of basedata, so reaching
/// byte `offset` within it from that register means walking backward
/// past the whole link-data region and the fixed `from_end` tail:
/// `job_memory_base + from_start::LINK_DATA + offset == basedata_reg -
/// (link_data_length + from_end::total(..) - offset)`.
pub const fn link_data_offset_from_basedata_reg(link_data_length: u32, stacktrace_record_count: u32, offset: u32) -> i32 {
    offset as i32 - link_data_length as i32 - from_end::total(stacktrace_record_count) as i32
}
