use thiserror::Error;

/// Why a function body, or an entire module, failed to compile.
/// Every variant aborts the in-progress compile; there is no partial
/// recovery, matching §7's "all abort the current compile" policy.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unsupported opcode 0x{opcode:02x} at offset {offset}")]
    UnsupportedOpcode { opcode: u8, offset: usize },

    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),

    #[error("implementation limit reached: {0}")]
    ImplementationLimitReached(#[from] ImplementationLimit),

    #[error("signature mismatch in field `{which}`")]
    SignatureMismatch { which: &'static str },

    #[error("out of memory while compiling")]
    OutOfMemory,
}

/// The concrete, enumerated set of hard limits a target implementation
/// may hit; kept closed (rather than a free-form string) so callers can
/// match on the cause.
#[derive(Debug, Error)]
pub enum ImplementationLimit {
    #[error("stack frame of {requested} bytes exceeds the hard limit of {limit} bytes")]
    StackFrameTooLarge { requested: u32, limit: u32 },

    #[error("branch displacement {displacement} is out of the encodable range (+/-{limit})")]
    BranchOutOfRange { displacement: i64, limit: i64 },

    #[error("function has {count} locals, exceeding the limit of {limit}")]
    TooManyLocals { count: u32, limit: u32 },

    #[error("block nesting depth {depth} exceeds the limit of {limit}")]
    BlockNestingTooDeep { depth: u32, limit: u32 },

    #[error("module declares {count} functions, exceeding the limit of {limit}")]
    TooManyFunctions { count: u32, limit: u32 },

    #[error("function body needs {requested} spill/join slots, exceeding the fixed allotment of {limit}")]
    TooManyTempSlots { requested: u32, limit: u32 },

    #[error("static memory access offset {offset} exceeds the encodable limit of {limit}")]
    StaticMemoryOffsetTooLarge { offset: u64, limit: u32 },

    #[error("call passes {count} {class} arguments, exceeding the {limit} available ABI registers")]
    TooManyCallArguments { count: u32, limit: u32, class: &'static str },
}
