//! Host symbol linkage (§6 "Host symbol linkage"): the vocabulary both
//! `nwasm-codegen` (resolving `Static` imports at compile time) and
//! `nwasm-runtime` (rebinding `Dynamic` ones at `initRuntime`) share, so
//! neither crate has to depend on the other to agree on what a
//! `NativeSymbol` looks like.

/// Whether a host symbol's address is known at compile time or must be
/// supplied later, at runtime initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Embedded into the compiled artifact's import table directly.
    /// Per §9's open question, a `Static` symbol is strictly a
    /// compile-time concept — `nwasm-runtime::init_runtime` rejects any
    /// `NativeSymbol` with this linkage passed to it as interface
    /// misuse (see DESIGN.md).
    Static,
    /// Left as a link-data placeholder at compile time; the runtime
    /// resolves the actual address during `initRuntime`.
    Dynamic,
}

/// The call-site ABI an imported function's trampoline was compiled
/// against (§4.4 "Calls").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportVersion {
    /// Fixed native ABI: a native-context pointer in the first argument
    /// register, Wasm arguments marshalled per the trampoline's
    /// pre-compiled signature.
    V1,
    /// All scratch registers spilled, arguments marshalled onto the
    /// stack in an 8-byte-slotted layout, `(sp, ret_area_ptr,
    /// context_ptr)` passed to the trampoline.
    V2,
}

/// A parsed import/export signature: `(` params `)` results, over the
/// character set `{i, I, f, F}` for `{i32, i64, f32, f64}` (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<crate::MachineType>,
    pub results: Vec<crate::MachineType>,
}

impl Signature {
    pub fn from_wasm(params: &[crate::MachineType], results: &[crate::MachineType]) -> Self {
        Signature { params: params.to_vec(), results: results.to_vec() }
    }

    /// Parse the `(iIfF)iIfF`-style textual form used by
    /// `getExportedFunctionByName`'s raw variant and by
    /// `NativeSymbol::signature`.
    pub fn parse(text: &str) -> Result<Self, crate::CompileError> {
        let open = text.find('(').ok_or_else(|| {
            crate::CompileError::InvalidBytecode(format!("signature `{text}` missing `(`"))
        })?;
        let close = text.find(')').ok_or_else(|| {
            crate::CompileError::InvalidBytecode(format!("signature `{text}` missing `)`"))
        })?;
        if close < open {
            return Err(crate::CompileError::InvalidBytecode(format!("signature `{text}` has `)` before `(`")));
        }
        let params = text[open + 1..close]
            .chars()
            .map(char_to_machine_type)
            .collect::<Result<Vec<_>, _>>()?;
        let results = text[close + 1..]
            .chars()
            .map(char_to_machine_type)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Signature { params, results })
    }

    pub fn render(&self) -> String {
        let mut s = String::from("(");
        for p in &self.params {
            s.push(machine_type_to_char(*p));
        }
        s.push(')');
        for r in &self.results {
            s.push(machine_type_to_char(*r));
        }
        s
    }
}

fn char_to_machine_type(c: char) -> Result<crate::MachineType, crate::CompileError> {
    Ok(match c {
        'i' => crate::MachineType::I32,
        'I' => crate::MachineType::I64,
        'f' => crate::MachineType::F32,
        'F' => crate::MachineType::F64,
        _ => {
            return Err(crate::CompileError::InvalidBytecode(format!(
                "unrecognized signature character `{c}`"
            )))
        }
    })
}

fn machine_type_to_char(mt: crate::MachineType) -> char {
    match mt {
        crate::MachineType::I32 => 'i',
        crate::MachineType::I64 => 'I',
        crate::MachineType::F32 => 'f',
        crate::MachineType::F64 => 'F',
        crate::MachineType::Invalid => '?',
    }
}

/// One host-provided symbol offered to `compile()` (§6). `ptr` is
/// opaque here (an untyped function pointer value) since this crate has
/// no FFI surface of its own; `nwasm-runtime` is the only consumer that
/// ever calls through it.
#[derive(Debug, Clone)]
pub struct NativeSymbol {
    pub linkage: Linkage,
    pub module_name: String,
    pub symbol: String,
    pub signature: Signature,
    pub ptr: usize,
    pub import_version: ImportVersion,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MachineType;

    #[test]
    fn parses_round_trips() {
        let sig = Signature::parse("(iIfF)i").unwrap();
        assert_eq!(sig.params, vec![MachineType::I32, MachineType::I64, MachineType::F32, MachineType::F64]);
        assert_eq!(sig.results, vec![MachineType::I32]);
        assert_eq!(sig.render(), "(iIfF)i");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Signature::parse("iIfF)i").is_err());
        assert!(Signature::parse("(x)i").is_err());
    }
}
