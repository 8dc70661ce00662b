//! C10: the trap and signal bridge (§4.6 "Trap contract", §9 "Exceptions
//! for control flow"). Generated code never raises a Rust panic or a
//! signal of its own accord on a Wasm `trap`/`unreachable`/bounds
//! failure — it writes a trap-code byte into basedata and performs an
//! indirect jump through `TRAP_HANDLER_PTR` (see
//! `nwasm_masm::x64::emit_trap_stub`). This module is the landing site
//! for that jump: a single, shared, arity-independent unwind target
//! that resumes the host call exactly where it left off, as if the
//! compiled function had returned normally.
//!
//! The trick mirrors `setjmp`/`longjmp`: instead of letting `call`
//! push a return address (which we'd have no way to hand to a
//! different function later), the entry trampoline pushes its own
//! resume address and branches without linking, stashing the
//! resulting stack pointer in basedata's `TRAP_STACK_REENTRY` slot.
//! `generic_trap_handler` below is exactly that resume address reached
//! the other way: by restoring `sp` from the stashed value and loading
//! the pushed resume address back off the stack.

use nwasm_core::basedata;

/// Installed at `MEMORY_HELPER_PTR`... no — installed at
/// `TRAP_HANDLER_PTR`. One instance serves every exported function of
/// every arity and every `Runtime`; it carries no state of its own; it
/// is disassembled straight out of this crate's own `.text`; nothing
/// about it is generic over a signature because all it ever does is
/// restore two machine registers and fall back into whichever
/// trampoline pushed its resume address.
#[cfg(target_arch = "x86_64")]
core::arch::global_asm!(
    ".pushsection .text.nwasm_trap_handler,\"ax\",@progbits",
    ".global nwasm_generic_trap_handler",
    ".hidden nwasm_generic_trap_handler",
    "nwasm_generic_trap_handler:",
    "mov rsp, [r14 - {reentry}]",
    "pop rax",
    "jmp rax",
    ".popsection",
    reentry = const basedata::from_end::TRAP_STACK_REENTRY,
);

#[cfg(target_arch = "aarch64")]
core::arch::global_asm!(
    ".pushsection .text.nwasm_trap_handler,\"ax\",@progbits",
    ".global nwasm_generic_trap_handler",
    ".hidden nwasm_generic_trap_handler",
    "nwasm_generic_trap_handler:",
    "ldr x9, [x28, {reentry}]",
    "mov sp, x9",
    "ldr x9, [sp]",
    "add sp, sp, #16",
    "br x9",
    ".popsection",
    reentry = const -(basedata::from_end::TRAP_STACK_REENTRY as i64),
);

extern "C" {
    /// Address of the shared handler defined above; never called
    /// directly from Rust, only its address is taken and written into
    /// basedata's `TRAP_HANDLER_PTR` slot.
    #[link_name = "nwasm_generic_trap_handler"]
    static NWASM_GENERIC_TRAP_HANDLER: u8;
}

pub(crate) fn generic_trap_handler_ptr() -> usize {
    unsafe { &NWASM_GENERIC_TRAP_HANDLER as *const u8 as usize }
}

/// Invoke a compiled entry point taking up to the platform's full
/// integer and float argument registers (the arities this port's typed
/// handles expose — see `typed.rs`), returning the raw bits that landed
/// in both the integer and the float return register as `(int, float)`.
/// Callers pick whichever half matches the Wasm function's declared
/// result type; the other half is whatever garbage the return register
/// happened to hold and must be ignored. The caller reads the basedata
/// trap-code slot to tell a trapped call apart from a normal return —
/// `invoke` itself cannot distinguish the two, since the trap handler
/// resumes at the exact same label a normal `ret` would.
///
/// # Safety
/// `entry` must be a valid native entry point compiled against this
/// exact ABI (the calling convention `nwasm-masm` emits for the host
/// ISA), `basedata_reg` must point at a fully initialized basedata
/// region whose `TRAP_HANDLER_PTR` slot already holds
/// [`generic_trap_handler_ptr`], and no other thread may be inside a
/// call through the same `basedata_reg` concurrently.
#[cfg(target_arch = "x86_64")]
pub(crate) unsafe fn invoke(entry: *const u8, basedata_reg: *mut u8, args: &[u64; 6], float_args: &[u64; 8]) -> (u64, u64) {
    let reentry_slot = basedata_reg.offset(-(basedata::from_end::TRAP_STACK_REENTRY as isize)) as *mut u64;
    let f0 = f64::from_bits(float_args[0]);
    let f1 = f64::from_bits(float_args[1]);
    let f2 = f64::from_bits(float_args[2]);
    let f3 = f64::from_bits(float_args[3]);
    let f4 = f64::from_bits(float_args[4]);
    let f5 = f64::from_bits(float_args[5]);
    let f6 = f64::from_bits(float_args[6]);
    let f7 = f64::from_bits(float_args[7]);
    let raw: u64;
    let raw_float: f64;
    core::arch::asm!(
        "lea r11, [rip + 2f]",
        "push r11",
        "mov [{reentry}], rsp",
        "jmp {entry}",
        "2:",
        reentry = in(reg) reentry_slot,
        entry = in(reg) entry,
        in("r14") basedata_reg,
        in("rdi") args[0],
        in("rsi") args[1],
        in("rdx") args[2],
        in("rcx") args[3],
        in("r8") args[4],
        in("r9") args[5],
        in("xmm0") f0,
        in("xmm1") f1,
        in("xmm2") f2,
        in("xmm3") f3,
        in("xmm4") f4,
        in("xmm5") f5,
        in("xmm6") f6,
        in("xmm7") f7,
        lateout("rax") raw,
        lateout("xmm0") raw_float,
        out("r11") _,
        clobber_abi("sysv64"),
    );
    (raw, raw_float.to_bits())
}

#[cfg(target_arch = "aarch64")]
pub(crate) unsafe fn invoke(entry: *const u8, basedata_reg: *mut u8, args: &[u64; 8], float_args: &[u64; 8]) -> (u64, u64) {
    let reentry_slot = basedata_reg.offset(-(basedata::from_end::TRAP_STACK_REENTRY as isize)) as *mut u64;
    let f0 = f64::from_bits(float_args[0]);
    let f1 = f64::from_bits(float_args[1]);
    let f2 = f64::from_bits(float_args[2]);
    let f3 = f64::from_bits(float_args[3]);
    let f4 = f64::from_bits(float_args[4]);
    let f5 = f64::from_bits(float_args[5]);
    let f6 = f64::from_bits(float_args[6]);
    let f7 = f64::from_bits(float_args[7]);
    let raw: u64;
    let raw_float: f64;
    core::arch::asm!(
        "sub sp, sp, #16",
        "adr x9, 2f",
        "str x9, [sp]",
        "mov x30, x9",
        "str sp, [{reentry}]",
        "br {entry}",
        "2:",
        "add sp, sp, #16",
        reentry = in(reg) reentry_slot,
        entry = in(reg) entry,
        in("x28") basedata_reg,
        in("x0") args[0],
        in("x1") args[1],
        in("x2") args[2],
        in("x3") args[3],
        in("x4") args[4],
        in("x5") args[5],
        in("x6") args[6],
        in("x7") args[7],
        in("d0") f0,
        in("d1") f1,
        in("d2") f2,
        in("d3") f3,
        in("d4") f4,
        in("d5") f5,
        in("d6") f6,
        in("d7") f7,
        lateout("x0") raw,
        lateout("d0") raw_float,
        out("x9") _,
        clobber_abi("C"),
    );
    (raw, raw_float.to_bits())
}
