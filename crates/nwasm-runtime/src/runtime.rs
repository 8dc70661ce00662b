//! C9: the runtime proper (§4.6). Ties a compiled module's native code
//! (handed to [`nwasm_exec::allocate_rwx`]) to a fresh job memory,
//! initializes basedata, resolves every import left dangling by
//! compilation, and hands back typed handles onto the module's exports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use nwasm_codegen::{CompileResult, CompiledHeader, ResolvedImport};
use nwasm_core::{basedata as core_basedata, Linkage, NativeSymbol, TrapCode, WASM_PAGE_SIZE};
use nwasm_module::{ExportKind, GlobalInit};

use crate::basedata::{self, offsets};
use crate::error::RuntimeError;
use crate::memory::JobMemory;
use crate::trapbridge;
use crate::typed::{ExportedFunction, ExportedGlobal, GlobalSource};

/// A single table's element: 16 bytes, `func_ptr` then `sig_index`,
/// matching `nwasm-codegen::calls`'s `call_indirect` layout exactly.
#[repr(C)]
#[derive(Clone, Copy)]
struct TableEntry {
    func_ptr: u64,
    sig_index: u64,
}

/// State every handle derived from a [`Runtime`] needs to keep alive:
/// the executable code, job memory, and the single table. Kept behind
/// an `Arc` so `ExportedFunction`/`ExportedGlobal` handles can outlive
/// the `Runtime` value they came from without an explicit lifetime.
pub struct RuntimeShared {
    job_memory: Mutex<JobMemory>,
    exec_mem: nwasm_exec::ExecutableMemory,
    table: Vec<TableEntry>,
    link_data_length: u32,
    stacktrace_record_count: u32,
    started: AtomicBool,
    linked: AtomicBool,
}

impl RuntimeShared {
    pub(crate) fn basedata_reg(&self) -> *mut u8 {
        self.job_memory.lock().unwrap().basedata_ptr()
    }

    pub(crate) fn entry_ptr(&self, offset: u32) -> *const u8 {
        self.exec_mem.entry_point(offset)
    }

    pub(crate) fn take_trap(&self) -> Option<TrapCode> {
        let reg = self.basedata_reg();
        unsafe {
            let code = basedata::read_u8(reg, offsets::TRAP_CODE_SLOT);
            if code == 0 {
                return None;
            }
            basedata::write_u8(reg, offsets::TRAP_CODE_SLOT, 0);
            TrapCode::from_code(code)
        }
    }

    /// §7's stacktrace ring, innermost frame first; empty when the
    /// module was compiled without `stacktrace` recording.
    pub(crate) fn stacktrace_snapshot(&self) -> Vec<u32> {
        if self.stacktrace_record_count == 0 {
            return Vec::new();
        }
        let reg = self.basedata_reg();
        unsafe {
            let depth = basedata::read_u64(reg, offsets::STACKTRACE_DEPTH).min(self.stacktrace_record_count as u64) as u32;
            let mut out = Vec::with_capacity(depth as usize);
            for i in 0..depth {
                let entry_offset = offsets::STACKTRACE_BASE + (i as i32) * 4;
                out.push(basedata::read_u32(reg, entry_offset));
            }
            out
        }
    }

    fn link_displacement(&self, link_data_offset: u32) -> i32 {
        core_basedata::link_data_offset_from_basedata_reg(self.link_data_length, self.stacktrace_record_count, link_data_offset)
    }

    pub(crate) fn read_global_link_data(&self, link_data_offset: u32) -> u64 {
        let reg = self.basedata_reg();
        unsafe { basedata::read_link_u64(reg, self.link_displacement(link_data_offset)) }
    }

    pub(crate) fn write_global_link_data(&self, link_data_offset: u32, value: u64) {
        let reg = self.basedata_reg();
        unsafe { basedata::write_link_u64(reg, self.link_displacement(link_data_offset), value) }
    }

    /// Pin the current linear memory region so a host embedder can hand
    /// its address to code that assumes pointer stability, at the cost
    /// of `memory.grow` failing (Wasm-visibly) until
    /// [`Runtime::unlink_memory`] is called.
    fn set_linked(&self, linked: bool) {
        self.linked.store(linked, Ordering::SeqCst);
    }

    fn is_linked(&self) -> bool {
        self.linked.load(Ordering::SeqCst)
    }

    /// Status word layout: bit 0 is the interrupt-requested flag, bits
    /// 8..16 carry the trap code generated code should raise at its
    /// next safe point.
    fn request_interruption(&self, code: TrapCode) {
        let word = basedata::STATUS_INTERRUPT_BIT | (code.code() as u32) << 8;
        let reg = self.basedata_reg();
        unsafe { basedata::write_u32(reg, offsets::STATUS_FLAGS, word) };
    }
}

/// The native entry that `MEMORY_HELPER_PTR` indirects through (§4.6
/// "Memory growth paths"). Recovers the owning [`RuntimeShared`] from
/// the `RUNTIME_PTR` back-reference basedata writes at init time, grows
/// job memory, and returns the (possibly moved) new basedata pointer, or
/// null on failure — exactly the contract `nwasm-codegen::memaccess`'s
/// `memory_grow` lowering already assumes.
extern "C" fn memory_grow_trampoline(basedata_reg: *mut u8, new_pages: u32) -> *mut u8 {
    unsafe {
        let shared_ptr = basedata::read_u64(basedata_reg, offsets::RUNTIME_PTR) as *const RuntimeShared;
        if shared_ptr.is_null() {
            return std::ptr::null_mut();
        }
        let shared = &*shared_ptr;
        if shared.is_linked() {
            return std::ptr::null_mut();
        }
        let mut jm = shared.job_memory.lock().unwrap();
        if !jm.grow(new_pages) {
            return std::ptr::null_mut();
        }
        let new_ptr = jm.basedata_ptr();
        basedata::write_u32(new_ptr, offsets::LIN_MEM_WASM_SIZE, jm.current_pages());
        basedata::write_u64(new_ptr, offsets::ACTUAL_LIN_MEM_BYTE_SIZE, jm.actual_byte_size());
        new_ptr
    }
}

/// A fully linked, ready-to-call instance of one compiled module.
pub struct Runtime {
    shared: Arc<RuntimeShared>,
    header: CompiledHeader,
    /// Function index -> offset into `RuntimeShared::exec_mem`, for
    /// locally defined functions only.
    entry_offsets: HashMap<u32, u32>,
}

impl Runtime {
    /// Link and initialize a freshly compiled module (§4.6
    /// `init_runtime`). `ctx` is stashed verbatim at basedata's
    /// `CUSTOM_CTX_PTR` slot for host imports to retrieve.
    pub fn init_runtime(compiled: CompileResult, dynamic_symbols: &[NativeSymbol], ctx: usize) -> Result<Runtime, RuntimeError> {
        for ns in dynamic_symbols {
            if ns.linkage == Linkage::Static {
                return Err(RuntimeError::StaticSymbolAtRuntime { module: ns.module_name.clone(), symbol: ns.symbol.clone() });
            }
        }

        let CompileResult { code, header, .. } = compiled;
        let exec_mem = nwasm_exec::allocate_rwx(&code)?;

        let entry_offsets: HashMap<u32, u32> = header
            .module
            .defined_function_indices()
            .zip(header.function_entry_points.iter())
            .map(|(idx, (_, entry))| (idx as u32, *entry))
            .collect();

        let resolved_ptrs = resolve_dynamic_imports(&header.resolved_imports, dynamic_symbols)?;

        let func_ptr_by_index = build_func_ptr_index(&header, &exec_mem, &entry_offsets, &resolved_ptrs);
        let table = build_table(&header, &func_ptr_by_index);

        let initial_pages = header.module.memory.map(|m| m.initial_pages).unwrap_or(0);
        let max_pages = header.module.memory.and_then(|m| m.max_pages).unwrap_or(nwasm_core::MAX_WASM32_PAGES);
        let admin_len = core_basedata::basedata_length(header.module.link_data_length, header.stacktrace_record_count);
        let mut job_memory = JobMemory::new(admin_len, initial_pages, max_pages);

        for data in &header.module.data {
            let start = data.offset as usize;
            let end = start + data.bytes.len();
            job_memory.linear_memory_mut()[start..end].copy_from_slice(&data.bytes);
        }

        let shared = Arc::new(RuntimeShared {
            job_memory: Mutex::new(job_memory),
            exec_mem,
            table,
            link_data_length: header.module.link_data_length,
            stacktrace_record_count: header.stacktrace_record_count,
            started: AtomicBool::new(false),
            linked: AtomicBool::new(false),
        });

        // Safe to take now: every write below goes through the same
        // `Mutex<JobMemory>` the table-building and entry-offset work
        // above never touched.
        let reg = shared.basedata_reg();
        unsafe {
            basedata::write_u32(reg, offsets::STATUS_FLAGS, 0);
            basedata::write_u32(reg, offsets::LIN_MEM_WASM_SIZE, initial_pages);
            basedata::write_u64(reg, offsets::ACTUAL_LIN_MEM_BYTE_SIZE, initial_pages as u64 * WASM_PAGE_SIZE as u64);
            basedata::write_u8(reg, offsets::TRAP_CODE_SLOT, 0);
            basedata::write_u64(reg, offsets::TRAP_HANDLER_PTR, trapbridge::generic_trap_handler_ptr() as u64);
            basedata::write_u64(reg, offsets::TRAP_STACK_REENTRY, 0);
            basedata::write_u64(reg, offsets::MEMORY_HELPER_PTR, memory_grow_trampoline as usize as u64);
            basedata::write_u64(reg, offsets::TABLE_BASE_PTR, shared.table.as_ptr() as u64);
            basedata::write_u64(reg, offsets::TABLE_LENGTH, shared.table.len() as u64);
            basedata::write_u64(reg, offsets::CUSTOM_CTX_PTR, ctx as u64);
            basedata::write_u64(reg, offsets::RUNTIME_PTR, Arc::as_ptr(&shared) as u64);
            basedata::write_u64(reg, offsets::LAST_FRAME_REF_PTR, 0);
            basedata::write_u64(reg, offsets::STACK_FENCE, 0);

            for (link_offset, entry_offset) in &header.function_entry_points {
                basedata::write_link_u64(
                    reg,
                    core_basedata::link_data_offset_from_basedata_reg(header.module.link_data_length, header.stacktrace_record_count, *link_offset),
                    shared.entry_ptr(*entry_offset) as u64,
                );
            }
            for (ri, ptr) in header.resolved_imports.iter().zip(resolved_ptrs.iter()) {
                basedata::write_link_u64(
                    reg,
                    core_basedata::link_data_offset_from_basedata_reg(header.module.link_data_length, header.stacktrace_record_count, ri.link_data_offset),
                    *ptr as u64,
                );
            }
            for global in &header.module.globals {
                if let (GlobalInit::Const { bits, .. }, Some(offset)) = (global.init, global.link_data_offset) {
                    if global.mutable {
                        basedata::write_link_u64(
                            reg,
                            core_basedata::link_data_offset_from_basedata_reg(header.module.link_data_length, header.stacktrace_record_count, offset),
                            bits,
                        );
                    }
                }
                // Imported globals (`GlobalInit::ImportedLinkOffset`) have no
                // module/field recorded anywhere in `ModuleInfo` — see
                // DESIGN.md. Their link-data cell is left zeroed.
            }
        }

        Ok(Runtime { shared, header, entry_offsets })
    }

    /// Run the module's start function exactly once (§4.6 `start`).
    /// A no-op success if the module declares none.
    pub fn start(&mut self) -> Result<(), RuntimeError> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::StartAlreadyRan);
        }
        let Some(func_index) = self.header.module.start_function else {
            return Ok(());
        };
        let entry_offset = *self.entry_offsets.get(&func_index).ok_or_else(|| RuntimeError::FunctionNotFound("<start>".to_string()))?;
        crate::typed::call_raw(&self.shared, entry_offset, [0; 8], [0; 8])?;
        Ok(())
    }

    /// Look up an export by name, type-erased (§4.6 "Exported function
    /// access"); narrow it with `.get0()`/`.get1()`/`.get2()`.
    pub fn get_exported_function_by_name(&self, name: &str) -> Result<ExportedFunction, RuntimeError> {
        let export = self.header.module.export_by_name(name).ok_or_else(|| RuntimeError::FunctionNotFound(name.to_string()))?;
        if export.kind != ExportKind::Func {
            return Err(RuntimeError::FunctionNotFound(name.to_string()));
        }
        let func = &self.header.module.functions[export.index as usize];
        if func.import.is_some() {
            return Err(RuntimeError::ReexportedImportUnsupported(name.to_string()));
        }
        let entry_offset = *self.entry_offsets.get(&export.index).expect("defined function always has an entry offset");
        let sig = &self.header.module.types[func.signature_index as usize];
        Ok(ExportedFunction {
            name: name.to_string(),
            entry_offset,
            params: sig.params.iter().copied().collect(),
            results: sig.results.iter().copied().collect(),
            shared: self.shared.clone(),
        })
    }

    pub fn get_exported_global_by_name(&self, name: &str) -> Result<ExportedGlobal, RuntimeError> {
        let export = self.header.module.export_by_name(name).ok_or_else(|| RuntimeError::GlobalNotFound(name.to_string()))?;
        if export.kind != ExportKind::Global {
            return Err(RuntimeError::GlobalNotFound(name.to_string()));
        }
        let global = &self.header.module.globals[export.index as usize];
        let source = match (global.init, global.link_data_offset) {
            (_, Some(offset)) => GlobalSource::LinkData(offset),
            (GlobalInit::Const { bits, .. }, None) => GlobalSource::Constant(bits),
            (GlobalInit::ImportedLinkOffset(_), None) => unreachable!("imported globals always reserve a link-data slot"),
        };
        Ok(ExportedGlobal {
            name: name.to_string(),
            machine_type: global.machine_type,
            mutable: global.mutable,
            source,
            shared: self.shared.clone(),
        })
    }

    /// Flag `code` in basedata's status word; the next stack-fence or
    /// safe-point check a running call performs observes it and traps
    /// with `RuntimeInterruptRequested` instead of continuing (§5
    /// "Ordering guarantees"). May be called from any thread while a
    /// call is in flight on another.
    pub fn request_interruption(&self, code: TrapCode) {
        self.shared.request_interruption(code);
    }

    /// Pin the current linear memory allocation and hand back its
    /// address and byte length; `memory.grow` fails (without trapping)
    /// until [`Self::unlink_memory`] is called.
    pub fn link_memory(&self) -> (*mut u8, usize) {
        self.shared.set_linked(true);
        let mut jm = self.shared.job_memory.lock().unwrap();
        let len = jm.linear_memory().len();
        (jm.basedata_ptr(), len)
    }

    pub fn unlink_memory(&self) {
        self.shared.set_linked(false);
    }

    pub fn get_linear_memory_region(&self, offset: u32, size: u32) -> Result<Vec<u8>, RuntimeError> {
        let jm = self.shared.job_memory.lock().unwrap();
        let mem = jm.linear_memory();
        let offset_plus_size = offset as u64 + size as u64;
        if offset_plus_size > mem.len() as u64 {
            return Err(RuntimeError::MemoryOutOfRange { offset, offset_plus_size });
        }
        Ok(mem[offset as usize..offset as usize + size as usize].to_vec())
    }

    /// Best-effort release of unused linear memory pages (§4.6
    /// `shrinkToSize`); a no-op while memory is linked.
    pub fn shrink_to_size(&self, min_pages: u32) {
        if self.shared.is_linked() {
            return;
        }
        self.shared.job_memory.lock().unwrap().shrink_to(min_pages);
    }
}

fn resolve_dynamic_imports(resolved_imports: &[ResolvedImport], dynamic_symbols: &[NativeSymbol]) -> Result<Vec<usize>, RuntimeError> {
    let mut out = Vec::with_capacity(resolved_imports.len());
    for ri in resolved_imports {
        if let Some(ptr) = ri.static_ptr {
            out.push(ptr);
            continue;
        }
        let found = dynamic_symbols.iter().find(|ns| ns.module_name == ri.module && ns.symbol == ri.symbol);
        match found {
            Some(ns) => out.push(ns.ptr),
            None => return Err(RuntimeError::UnresolvedImport { module: ri.module.clone(), symbol: ri.symbol.clone() }),
        }
    }
    Ok(out)
}

fn build_func_ptr_index(
    header: &CompiledHeader,
    exec_mem: &nwasm_exec::ExecutableMemory,
    entry_offsets: &HashMap<u32, u32>,
    resolved_ptrs: &[usize],
) -> HashMap<u32, u64> {
    let mut out = HashMap::new();
    for (idx, offset) in entry_offsets {
        out.insert(*idx, exec_mem.entry_point(*offset) as u64);
    }
    let imported_indices = header.module.functions.iter().enumerate().filter(|(_, f)| f.import.is_some()).map(|(i, _)| i as u32);
    for (idx, ptr) in imported_indices.zip(resolved_ptrs.iter()) {
        out.insert(idx, *ptr as u64);
    }
    out
}

/// Table index 0 only — this port's `call_indirect` never carries a
/// table operand (see `nwasm-codegen::calls`).
fn build_table(header: &CompiledHeader, func_ptr_by_index: &HashMap<u32, u64>) -> Vec<TableEntry> {
    let len = header.module.tables.first().map(|t| t.min).unwrap_or(0);
    let mut table = vec![TableEntry { func_ptr: 0, sig_index: 0 }; len as usize];
    for element in header.module.elements.iter().filter(|e| e.table_index == 0) {
        let base = element.offset as usize;
        for (i, &func_index) in element.func_indices.iter().enumerate() {
            let Some(slot) = table.get_mut(base + i) else { continue };
            slot.func_ptr = func_ptr_by_index.get(&func_index).copied().unwrap_or(0);
            slot.sig_index = header.module.functions[func_index as usize].signature_index as u64;
        }
    }
    table
}
