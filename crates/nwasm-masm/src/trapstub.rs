use nwasm_core::TrapCode;
use std::collections::HashMap;

/// How far back (in code-buffer bytes) a short-form branch can reach on
/// the current target. Trap-stub reuse is only offered within this
/// range; beyond it, a fresh stub (and a fresh short branch to it) is
/// cheaper than widening every intervening branch to a long form.
const DEFAULT_SHORT_BRANCH_RANGE: u32 = 1 << 20;

/// Tracks the most recently emitted trap stub for each [`TrapCode`] so
/// that repeated trap sites for the same code within
/// `short_branch_range` bytes of each other reuse one shared stub
/// instead of re-emitting the code-loading prelude (§8 "Trap
/// deduplication").
#[derive(Debug, Default)]
pub struct TrapStubTable {
    most_recent: HashMap<u8, StubSite>,
    short_branch_range: u32,
}

#[derive(Debug, Clone, Copy)]
struct StubSite {
    offset: u32,
}

impl TrapStubTable {
    pub fn new() -> Self {
        TrapStubTable { most_recent: HashMap::new(), short_branch_range: DEFAULT_SHORT_BRANCH_RANGE }
    }

    pub fn with_short_branch_range(short_branch_range: u32) -> Self {
        TrapStubTable { most_recent: HashMap::new(), short_branch_range }
    }

    /// Called at a prospective new trap site with the current code
    /// buffer position. If a stub for `code` was emitted recently
    /// enough to be in range, returns its offset for a direct branch;
    /// otherwise the caller must emit a fresh stub and register it via
    /// [`TrapStubTable::record`].
    pub fn reusable_stub(&self, code: TrapCode, current_offset: u32) -> Option<u32> {
        let site = self.most_recent.get(&code.code())?;
        if current_offset.saturating_sub(site.offset) <= self.short_branch_range {
            Some(site.offset)
        } else {
            None
        }
    }

    pub fn record(&mut self, code: TrapCode, stub_offset: u32) {
        self.most_recent.insert(code.code(), StubSite { offset: stub_offset });
    }

    /// Reset at function-body boundaries: stub offsets are positions
    /// within one function's code region, never shared across
    /// functions.
    pub fn clear(&mut self) {
        self.most_recent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_stub_in_range() {
        let mut table = TrapStubTable::with_short_branch_range(100);
        table.record(TrapCode::OutOfBoundsMemoryAccess, 10);
        assert_eq!(table.reusable_stub(TrapCode::OutOfBoundsMemoryAccess, 50), Some(10));
        assert_eq!(table.reusable_stub(TrapCode::OutOfBoundsMemoryAccess, 200), None);
        assert_eq!(table.reusable_stub(TrapCode::Unreachable, 50), None);
    }
}
