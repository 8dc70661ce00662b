/// An expandable byte buffer that the assembler appends native
/// instructions into. Labels let the backend reference a not-yet-known
/// position (the end of a `Block`/`IfBlock`, or a `Loop` head for a
/// back-edge) and have it patched once the position is known.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
    relocations: Vec<Relocation>,
}

/// An offset into a [`CodeBuffer`] that has not been bound to a byte
/// position yet. `Loop` heads bind immediately (the position is known
/// when the loop is entered); `Block`/`IfBlock` ends bind when the
/// matching `end` opcode is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// A 32-bit PC-relative displacement, measured from the end of the
    /// four relocation bytes (x86-64 `Jcc rel32`/`CALL rel32` shape).
    PcRel32,
    /// A 19-bit PC-relative displacement measured in instructions,
    /// shifted into an AArch64 conditional-branch encoding.
    PcRelAArch64Cond19,
    /// A 26-bit PC-relative displacement measured in instructions, for
    /// an unconditional AArch64 branch.
    PcRelAArch64Branch26,
}

/// A pending forward reference: `site` is the byte offset of the
/// relocatable field; it is resolved once the target label is bound.
#[derive(Debug, Clone, Copy)]
pub struct Relocation {
    pub site: u32,
    pub kind: RelocKind,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    pub fn put1(&mut self, b: u8) {
        self.bytes.push(b);
    }

    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn put4(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put8(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Reserve a 4-byte placeholder for a relocation and record it so
    /// [`CodeBuffer::resolve_label`] (via `patch_instruction_at_offset`)
    /// can fill it in once the target is known. Returns the byte offset
    /// of the placeholder (the `site`) for use as a `Label`.
    pub fn reserve_reloc(&mut self, kind: RelocKind) -> Label {
        let site = self.bytes.len() as u32;
        self.relocations.push(Relocation { site, kind });
        self.put4(0);
        Label(site)
    }

    /// The byte offset a newly bound label should record: the current
    /// end of the buffer (used for `Loop` heads and `end` targets).
    pub fn current_position(&self) -> Label {
        Label(self.bytes.len() as u32)
    }

    /// `patchInstructionAtOffset`: read the template bytes at `offset`,
    /// let `mutate` adjust them in place, and write them back. Used both
    /// for resolving branch targets and for the `MOVimm` multi-part
    /// encodings that are widened after the fact.
    pub fn patch_instruction_at_offset(&mut self, offset: u32, len: usize, mutate: impl FnOnce(&mut [u8])) {
        let start = offset as usize;
        mutate(&mut self.bytes[start..start + len]);
    }

    pub fn bind_pcrel32(&mut self, site: Label, target: Label) -> Result<(), BranchOutOfRange> {
        let site_end = site.0 as i64 + 4;
        let disp = target.0 as i64 - site_end;
        if disp < i32::MIN as i64 || disp > i32::MAX as i64 {
            return Err(BranchOutOfRange { displacement: disp, limit: i32::MAX as i64 });
        }
        self.patch_instruction_at_offset(site.0, 4, |b| b.copy_from_slice(&(disp as i32).to_le_bytes()));
        Ok(())
    }

    pub fn bind_pcrel_aarch64(&mut self, site: Label, target: Label, bits: u32) -> Result<(), BranchOutOfRange> {
        let disp_bytes = target.0 as i64 - site.0 as i64;
        debug_assert_eq!(disp_bytes % 4, 0, "AArch64 branch targets must be instruction-aligned");
        let disp_instrs = disp_bytes / 4;
        let limit = 1i64 << (bits - 1);
        if disp_instrs < -limit || disp_instrs >= limit {
            return Err(BranchOutOfRange { displacement: disp_instrs, limit });
        }
        let mask = (1u32 << bits) - 1;
        let field = (disp_instrs as u32) & mask;
        self.patch_instruction_at_offset(site.0, 4, |b| {
            let mut word = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            let shift = if bits == 19 { 5 } else { 0 };
            word = (word & !(mask << shift)) | (field << shift);
            b.copy_from_slice(&word.to_le_bytes());
        });
        Ok(())
    }
}

/// `BranchOutOfRange`: the only fatal error the assembler itself raises
/// (surfaced to the driver as [`nwasm_core::CompileError`]).
#[derive(Debug, Clone, Copy)]
pub struct BranchOutOfRange {
    pub displacement: i64,
    pub limit: i64,
}

impl std::fmt::Display for BranchOutOfRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "branch displacement {} out of range (+/-{})", self.displacement, self.limit)
    }
}

impl std::error::Error for BranchOutOfRange {}
