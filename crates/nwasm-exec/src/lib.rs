//! C8: executable memory (§6 "Executable-memory primitive"). Compiled
//! code lands in freshly written RW pages; this crate is the one place
//! that flips them to RX and makes sure the CPU's instruction fetch
//! path actually sees the new bytes before anything jumps into them.
//!
//! Grounded on `region`'s own `alloc`/`protect` pair, the same crate
//! `wasmtime-runtime` depended on for this before it moved to
//! `rustix`/raw `mmap`.

use std::slice;

use region::Protection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to allocate {len} bytes of executable memory: {source}")]
    Alloc { len: usize, source: region::Error },

    #[error("failed to make {len}-byte region read-execute: {source}")]
    Protect { len: usize, source: region::Error },

    #[error("cannot allocate executable memory for an empty code buffer")]
    Empty,
}

/// A single RX mapping holding one compiled module's code. Dropping it
/// unmaps the pages; nothing else in this port keeps a raw pointer
/// into it past that point.
pub struct ExecutableMemory {
    allocation: region::Allocation,
    len: usize,
}

impl ExecutableMemory {
    /// Base address of the mapping. Entry offsets recorded in
    /// `CompiledHeader::function_entry_points` are relative to this.
    pub fn as_ptr(&self) -> *const u8 {
        self.allocation.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of a native entry point at `offset` bytes into the
    /// mapping. Callers are responsible for `offset` having come from
    /// this same code buffer's compile result.
    pub fn entry_point(&self, offset: u32) -> *const u8 {
        debug_assert!((offset as usize) < self.len);
        unsafe { self.as_ptr().add(offset as usize) }
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.as_ptr(), self.len) }
    }
}

// SAFETY: the mapping is never mutated after `allocate_rwx` returns —
// generated code only reads it, and unmapping happens exclusively in
// `Drop`. Sharing `&ExecutableMemory` across threads is therefore as
// safe as sharing any other read-only byte buffer.
unsafe impl Sync for ExecutableMemory {}
unsafe impl Send for ExecutableMemory {}

/// Allocate a page-aligned region, copy `code` into it, flush the
/// instruction cache, then transition the pages from read-write to
/// read-execute (§6: "allocates a page-aligned region, copies bytes,
/// flushes the instruction cache, and... transitions to read-execute").
///
/// On a target with no memory-protection unit this would stay RWX
/// throughout (§6's non-MMU carve-out); every architecture `region`
/// supports here has one, so that branch never triggers and isn't
/// modeled.
pub fn allocate_rwx(code: &[u8]) -> Result<ExecutableMemory, ExecError> {
    if code.is_empty() {
        return Err(ExecError::Empty);
    }

    let mut allocation =
        region::alloc(code.len(), Protection::READ_WRITE).map_err(|source| ExecError::Alloc { len: code.len(), source })?;

    // SAFETY: `allocation` was just created with exactly `code.len()`
    // writable bytes and is not yet reachable from anywhere else.
    unsafe {
        let dst = slice::from_raw_parts_mut(allocation.as_mut_ptr::<u8>(), code.len());
        dst.copy_from_slice(code);
    }

    flush_icache(allocation.as_ptr::<u8>(), code.len());

    // SAFETY: `allocation`'s pointer/len describe the region just
    // written above; no other reference to it exists yet.
    unsafe {
        region::protect(allocation.as_ptr::<u8>(), code.len(), Protection::READ_EXECUTE)
            .map_err(|source| ExecError::Protect { len: code.len(), source })?;
    }

    let len = code.len();
    Ok(ExecutableMemory { allocation, len })
}

#[cfg(target_arch = "aarch64")]
fn flush_icache(ptr: *const u8, len: usize) {
    // AArch64 keeps separate instruction and data caches; a store
    // through the data cache isn't guaranteed visible to the
    // instruction fetch path until each cache line is cleaned and the
    // corresponding icache line invalidated. `ic ivau`/`dc cvau` work
    // per cache-line-sized chunk, so walk the range in 64-byte strides
    // (the largest line size any AArch64 implementation documents) and
    // finish with the two barriers required before the new code can be
    // safely executed.
    const LINE: usize = 64;
    let start = ptr as usize;
    let end = start + len;
    let mut addr = start - (start % LINE);
    while addr < end {
        unsafe {
            std::arch::asm!("dc cvau, {0}", in(reg) addr);
        }
        addr += LINE;
    }
    unsafe {
        std::arch::asm!("dsb ish");
    }
    addr = start - (start % LINE);
    while addr < end {
        unsafe {
            std::arch::asm!("ic ivau, {0}", in(reg) addr);
        }
        addr += LINE;
    }
    unsafe {
        std::arch::asm!("dsb ish", "isb");
    }
}

/// x86_64 has a coherent instruction cache with respect to same-core
/// stores — the architecture only requires a serializing instruction
/// (implicit in the `call`/`jmp` that first reaches this code) before
/// the new bytes are observed, not an explicit flush.
#[cfg(not(target_arch = "aarch64"))]
fn flush_icache(_ptr: *const u8, _len: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_code() {
        assert!(matches!(allocate_rwx(&[]), Err(ExecError::Empty)));
    }

    #[test]
    fn allocates_and_copies() {
        // `ret` on x86_64, a harmless byte pattern everywhere else —
        // this test only checks the copy, never executes the mapping.
        let code = [0xc3u8, 0x90, 0x90, 0x90];
        let mem = allocate_rwx(&code).unwrap();
        assert_eq!(mem.len(), code.len());
        assert_eq!(mem.as_slice(), &code);
    }
}
