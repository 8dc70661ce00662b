use crate::reg::Reg;

/// General-purpose register indices (`x0`..`x30`; `31` is used as the
/// encoding-only alias for either `sp` or the zero register depending
/// on instruction class, which this backend never needs to
/// disambiguate since it always means `sp` here).
pub mod gpr {
    use super::Reg;

    pub const X0: Reg = Reg::int(0);
    pub const X1: Reg = Reg::int(1);
    pub const X2: Reg = Reg::int(2);
    pub const X3: Reg = Reg::int(3);
    pub const X4: Reg = Reg::int(4);
    pub const X5: Reg = Reg::int(5);
    pub const X6: Reg = Reg::int(6);
    pub const X7: Reg = Reg::int(7);
    pub const X9: Reg = Reg::int(9);
    pub const X10: Reg = Reg::int(10);
    pub const X19: Reg = Reg::int(19);
    pub const X20: Reg = Reg::int(20);
    pub const X28: Reg = Reg::int(28);
    pub const FP: Reg = Reg::int(29);
    pub const LR: Reg = Reg::int(30);
    pub const SP: Reg = Reg::int(31);
}

pub mod vreg {
    use super::Reg;

    pub const V0: Reg = Reg::float(0);
    pub const V1: Reg = Reg::float(1);
}

/// `x28` ("platform register" slot, unused by our ABI) holds the
/// linear-memory base, the AArch64 analogue of x64's `r14`.
pub const BASEDATA_REG: Reg = gpr::X28;
pub const RESERVED_SCRATCH: Reg = gpr::X9;
