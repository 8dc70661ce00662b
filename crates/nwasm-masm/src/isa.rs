use crate::aarch64::Aarch64Masm;
use crate::masm::MacroAssembler;
use crate::x64::X64Masm;
use target_lexicon::{Architecture, Triple};

/// The set of backends this compiler ships. `nwasm-core`'s purpose
/// section also names TriCore as a target; that backend lives outside
/// this crate's scope (no `target_lexicon::Architecture` variant models
/// it, and its calling convention and trap dispatch are specific enough
/// to warrant its own implementer rather than a third arm here) — see
/// DESIGN.md Open Questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isa {
    X64,
    Aarch64,
}

impl Isa {
    pub fn host() -> Option<Self> {
        Self::from_triple(&Triple::host())
    }

    pub fn from_triple(triple: &Triple) -> Option<Self> {
        match triple.architecture {
            Architecture::X86_64 => Some(Isa::X64),
            Architecture::Aarch64(_) => Some(Isa::Aarch64),
            _ => None,
        }
    }
}

/// Construct the macro-assembler for `isa`, boxed so the driver (C7)
/// doesn't need to be generic over the backend type.
pub fn build_masm(isa: Isa) -> Box<dyn MacroAssembler> {
    match isa {
        Isa::X64 => Box::new(X64Masm::new()),
        Isa::Aarch64 => Box::new(Aarch64Masm::new()),
    }
}
