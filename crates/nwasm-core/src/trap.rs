/// The failure class written into the basedata trap-code slot by
/// generated code, and read back by the host wrapper after a trapping
/// call returns.
///
/// Values 0..=31 are reserved for the public set below; an
/// implementation range above that is available for internal helper
/// traps (e.g. a disambiguation code used only inside a shared trap
/// stub before it is translated back to one of these on delivery).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TrapCode {
    Unreachable = 1,
    IntegerOverflow = 2,
    IntegerDivideByZero = 3,
    InvalidConversion = 4,
    OutOfBoundsMemoryAccess = 5,
    IndirectCallTypeMismatch = 6,
    UndefinedElement = 7,
    CallStackExhausted = 8,
    StackFenceBreached = 9,
    RuntimeInterruptRequested = 10,
}

impl TrapCode {
    /// Byte value written into the basedata trap-code slot. Zero is
    /// reserved to mean "no trap" and is never returned here.
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => TrapCode::Unreachable,
            2 => TrapCode::IntegerOverflow,
            3 => TrapCode::IntegerDivideByZero,
            4 => TrapCode::InvalidConversion,
            5 => TrapCode::OutOfBoundsMemoryAccess,
            6 => TrapCode::IndirectCallTypeMismatch,
            7 => TrapCode::UndefinedElement,
            8 => TrapCode::CallStackExhausted,
            9 => TrapCode::StackFenceBreached,
            10 => TrapCode::RuntimeInterruptRequested,
            _ => return None,
        })
    }
}
