//! Raw basedata field access (§3 "Basedata layout"). Every offset here
//! comes straight from `nwasm_core::basedata::from_end`; this module's
//! only job is the unaligned pointer arithmetic `runtime.rs` would
//! otherwise have to repeat at every call site.

use nwasm_core::basedata::from_end;

/// # Safety
/// `basedata_reg` must point at a live basedata region at least
/// `from_end::total(..)` bytes long.
pub(crate) unsafe fn write_u64(basedata_reg: *mut u8, offset: i32, value: u64) {
    let addr = basedata_reg.offset(-(offset as isize)) as *mut u64;
    addr.write_unaligned(value);
}

/// # Safety
/// See [`write_u64`].
pub(crate) unsafe fn read_u64(basedata_reg: *mut u8, offset: i32) -> u64 {
    let addr = basedata_reg.offset(-(offset as isize)) as *const u64;
    addr.read_unaligned()
}

/// # Safety
/// See [`write_u64`].
pub(crate) unsafe fn write_u32(basedata_reg: *mut u8, offset: i32, value: u32) {
    let addr = basedata_reg.offset(-(offset as isize)) as *mut u32;
    addr.write_unaligned(value);
}

/// # Safety
/// See [`write_u64`].
pub(crate) unsafe fn read_u32(basedata_reg: *mut u8, offset: i32) -> u32 {
    let addr = basedata_reg.offset(-(offset as isize)) as *const u32;
    addr.read_unaligned()
}

/// Link data lives *in front of* basedata's fixed fields, so reaching a
/// link-data cell means walking forward (growing address) from
/// `basedata_reg`'s negative end rather than backward from it; the
/// caller computes `displacement` with
/// `nwasm_core::basedata::link_data_offset_from_basedata_reg`, which is
/// already signed the right way for a direct `offset()` call.
///
/// # Safety
/// `basedata_reg` must point at a live basedata region and `displacement`
/// must land inside its link-data area.
pub(crate) unsafe fn write_link_u64(basedata_reg: *mut u8, displacement: i32, value: u64) {
    let addr = basedata_reg.offset(displacement as isize) as *mut u64;
    addr.write_unaligned(value);
}

/// # Safety
/// See [`write_link_u64`].
pub(crate) unsafe fn read_link_u64(basedata_reg: *mut u8, displacement: i32) -> u64 {
    let addr = basedata_reg.offset(displacement as isize) as *const u64;
    addr.read_unaligned()
}

/// # Safety
/// See [`write_u64`].
pub(crate) unsafe fn read_u8(basedata_reg: *mut u8, offset: i32) -> u8 {
    let addr = basedata_reg.offset(-(offset as isize));
    addr.read()
}

/// # Safety
/// See [`write_u64`].
pub(crate) unsafe fn write_u8(basedata_reg: *mut u8, offset: i32, value: u8) {
    let addr = basedata_reg.offset(-(offset as isize));
    addr.write(value);
}

/// Read the interruption flag's backing status word.
pub(crate) const STATUS_INTERRUPT_BIT: u32 = 0x1;

pub(crate) use from_end as offsets;
