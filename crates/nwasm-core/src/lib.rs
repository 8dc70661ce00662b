//! Shared types used across every stage of the compiler and runtime:
//! the machine-type lattice, the trap-code enumeration, and the
//! compile-time/runtime error types.

pub mod basedata;
mod error;
mod machine_type;
mod symbol;
mod trap;
mod util;

pub use error::{CompileError, ImplementationLimit};
pub use machine_type::MachineType;
pub use symbol::{ImportVersion, Linkage, NativeSymbol, Signature};
pub use trap::TrapCode;
pub use util::{round_up_to_pow2, wasm_page_size, MAX_WASM32_PAGES, WASM_PAGE_SIZE};
