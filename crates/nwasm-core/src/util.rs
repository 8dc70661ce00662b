/// Bytes in one unit of Wasm linear memory growth.
pub const WASM_PAGE_SIZE: u32 = 64 * 1024;

pub const fn wasm_page_size() -> u32 {
    WASM_PAGE_SIZE
}

/// Wasm32's hard ceiling on linear memory: a 4GiB address space divided
/// into 64KiB pages. `memory.grow` never succeeds past this regardless
/// of what the module's own declared `max_pages` says.
pub const MAX_WASM32_PAGES: u32 = 65536;

/// Round `value` up to the next multiple of `2^log2_align`.
///
/// Used for basedata layout (8-byte alignment of the stacktrace ring,
/// see `nwasm-runtime::basedata`) and for rounding requested linear
/// memory sizes up to an even page-granular amount.
pub const fn round_up_to_pow2(value: u32, log2_align: u32) -> u32 {
    let align = 1u32 << log2_align;
    (value + (align - 1)) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_alignment() {
        assert_eq!(round_up_to_pow2(0, 3), 0);
        assert_eq!(round_up_to_pow2(1, 3), 8);
        assert_eq!(round_up_to_pow2(8, 3), 8);
        assert_eq!(round_up_to_pow2(9, 3), 16);
    }
}
