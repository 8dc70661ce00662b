//! Job memory (§4.6 "Memory growth paths", §5 "Shared resources"): the
//! single allocation that holds basedata immediately followed by Wasm
//! linear memory. Growth only ever extends the linear-memory tail;
//! basedata's own length is fixed for the lifetime of a `Runtime`
//! (§3's link-data length is final once compilation finishes).
//!
//! The spec distinguishes a realloc-style callback from a full
//! `Allocator` object; this port collapses both into the one
//! [`JobMemory`] type below, grown with `Vec::resize` rather than a
//! user-supplied callback — see DESIGN.md for why a pluggable
//! allocator wasn't carried over.

use nwasm_core::WASM_PAGE_SIZE;

pub(crate) struct JobMemory {
    buf: Vec<u8>,
    admin_len: u32,
    current_pages: u32,
    max_pages: u32,
}

impl JobMemory {
    pub(crate) fn new(admin_len: u32, initial_pages: u32, max_pages: u32) -> Self {
        let total = admin_len as usize + initial_pages as usize * WASM_PAGE_SIZE as usize;
        JobMemory { buf: vec![0u8; total], admin_len, current_pages: initial_pages, max_pages }
    }

    /// Pointer generated code keeps live in the reserved basedata
    /// register: the first byte past the fixed administrative region,
    /// i.e. the start of linear memory.
    pub(crate) fn basedata_ptr(&mut self) -> *mut u8 {
        unsafe { self.buf.as_mut_ptr().add(self.admin_len as usize) }
    }

    pub(crate) fn current_pages(&self) -> u32 {
        self.current_pages
    }

    pub(crate) fn actual_byte_size(&self) -> u64 {
        self.current_pages as u64 * WASM_PAGE_SIZE as u64
    }

    /// Growth law (§8 "Growth safety"): the first `prev + n` pages are
    /// zero-filled and readable once this returns `true`. `Vec::resize`
    /// already zero-fills whatever bytes a reallocation adds, so the
    /// only extra work here is deciding whether `new_pages` is
    /// reachable at all.
    pub(crate) fn grow(&mut self, new_pages: u32) -> bool {
        if new_pages > self.max_pages {
            return false;
        }
        let new_total = self.admin_len as usize + new_pages as usize * WASM_PAGE_SIZE as usize;
        self.buf.resize(new_total, 0);
        self.current_pages = new_pages;
        true
    }

    /// Best-effort release of pages above `min` (§4.6 `shrinkToSize`).
    /// `Vec::shrink_to` never fails outright; a request below the
    /// current floor the allocator is willing to release is simply a
    /// no-op, matching the contract's "allowed to fail silently".
    pub(crate) fn shrink_to(&mut self, min_pages: u32) {
        if min_pages >= self.current_pages {
            return;
        }
        let new_total = self.admin_len as usize + min_pages as usize * WASM_PAGE_SIZE as usize;
        self.buf.truncate(new_total);
        self.buf.shrink_to_fit();
        self.current_pages = min_pages;
    }

    pub(crate) fn linear_memory(&self) -> &[u8] {
        &self.buf[self.admin_len as usize..]
    }

    pub(crate) fn linear_memory_mut(&mut self) -> &mut [u8] {
        let start = self.admin_len as usize;
        &mut self.buf[start..]
    }
}
