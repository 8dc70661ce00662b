//! Typed exported-function handles (§4.6 "Exported function access").
//! `get_exported_function_by_name` hands back an untyped
//! [`ExportedFunction`] describing an entry point and its declared
//! signature; `get0`/`get1`/`get2` narrow it to a [`TypedFunc0`],
//! [`TypedFunc1`] or [`TypedFunc2`] once the caller's Rust types are
//! checked against that signature, mirroring the fixed-arity generic
//! shape of `wasmtime`'s older `Func::get0`/`get1`/`get2` API rather
//! than a tuple-based variadic call.

use std::sync::Arc;

use nwasm_core::MachineType;

use crate::error::RuntimeError;
use crate::runtime::RuntimeShared;

/// A value that can be marshalled into a single argument register (or
/// read back out of a single return register).
pub trait WasmArg: Copy {
    const MACHINE_TYPE: MachineType;
    fn to_raw(self) -> u64;
    fn float_bits(self) -> u64 {
        0
    }
}

impl WasmArg for i32 {
    const MACHINE_TYPE: MachineType = MachineType::I32;
    fn to_raw(self) -> u64 {
        self as u32 as u64
    }
}

impl WasmArg for i64 {
    const MACHINE_TYPE: MachineType = MachineType::I64;
    fn to_raw(self) -> u64 {
        self as u64
    }
}

impl WasmArg for f32 {
    const MACHINE_TYPE: MachineType = MachineType::F32;
    fn to_raw(self) -> u64 {
        0
    }
    fn float_bits(self) -> u64 {
        self.to_bits() as u64
    }
}

impl WasmArg for f64 {
    const MACHINE_TYPE: MachineType = MachineType::F64;
    fn to_raw(self) -> u64 {
        0
    }
    fn float_bits(self) -> u64 {
        self.to_bits()
    }
}

/// A value a typed call can produce, including the empty `()` result
/// wasmtime-style `get0::<()>` style signatures also support.
pub trait WasmResult: Copy {
    const MACHINE_TYPE: Option<MachineType>;
    fn from_raw(int_bits: u64, float_bits: u64) -> Self;
}

impl WasmResult for () {
    const MACHINE_TYPE: Option<MachineType> = None;
    fn from_raw(_int_bits: u64, _float_bits: u64) -> Self {}
}

impl WasmResult for i32 {
    const MACHINE_TYPE: Option<MachineType> = Some(MachineType::I32);
    fn from_raw(int_bits: u64, _float_bits: u64) -> Self {
        int_bits as u32 as i32
    }
}

impl WasmResult for i64 {
    const MACHINE_TYPE: Option<MachineType> = Some(MachineType::I64);
    fn from_raw(int_bits: u64, _float_bits: u64) -> Self {
        int_bits as i64
    }
}

impl WasmResult for f32 {
    const MACHINE_TYPE: Option<MachineType> = Some(MachineType::F32);
    fn from_raw(_int_bits: u64, float_bits: u64) -> Self {
        f32::from_bits(float_bits as u32)
    }
}

impl WasmResult for f64 {
    const MACHINE_TYPE: Option<MachineType> = Some(MachineType::F64);
    fn from_raw(_int_bits: u64, float_bits: u64) -> Self {
        f64::from_bits(float_bits)
    }
}

/// An exported function before its signature has been checked against
/// a caller's chosen Rust types.
#[derive(Clone)]
pub struct ExportedFunction {
    pub(crate) name: String,
    pub(crate) entry_offset: u32,
    pub(crate) params: Vec<MachineType>,
    pub(crate) results: Vec<MachineType>,
    pub(crate) shared: Arc<RuntimeShared>,
}

impl ExportedFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[MachineType] {
        &self.params
    }

    pub fn results(&self) -> &[MachineType] {
        &self.results
    }

    fn check(&self, params: &[MachineType], result: Option<MachineType>) -> Result<(), RuntimeError> {
        let actual_result = self.results.first().copied();
        if self.params != params || actual_result != result {
            return Err(RuntimeError::SignatureMismatch { name: self.name.clone(), actual: render_signature(&self.params, actual_result) });
        }
        Ok(())
    }

    pub fn get0<R: WasmResult>(&self) -> Result<TypedFunc0<R>, RuntimeError> {
        self.check(&[], R::MACHINE_TYPE)?;
        Ok(TypedFunc0 { inner: self.clone(), _r: std::marker::PhantomData })
    }

    pub fn get1<A: WasmArg, R: WasmResult>(&self) -> Result<TypedFunc1<A, R>, RuntimeError> {
        self.check(&[A::MACHINE_TYPE], R::MACHINE_TYPE)?;
        Ok(TypedFunc1 { inner: self.clone(), _a: std::marker::PhantomData, _r: std::marker::PhantomData })
    }

    pub fn get2<A: WasmArg, B: WasmArg, R: WasmResult>(&self) -> Result<TypedFunc2<A, B, R>, RuntimeError> {
        self.check(&[A::MACHINE_TYPE, B::MACHINE_TYPE], R::MACHINE_TYPE)?;
        Ok(TypedFunc2 { inner: self.clone(), _a: std::marker::PhantomData, _b: std::marker::PhantomData, _r: std::marker::PhantomData })
    }
}

fn render_signature(params: &[MachineType], result: Option<MachineType>) -> String {
    let p: Vec<&str> = params.iter().map(mt_name).collect();
    format!("({}) -> {}", p.join(", "), result.map(mt_name).unwrap_or("()"))
}

fn mt_name(mt: &MachineType) -> &'static str {
    match mt {
        MachineType::I32 => "i32",
        MachineType::I64 => "i64",
        MachineType::F32 => "f32",
        MachineType::F64 => "f64",
        MachineType::Invalid => "invalid",
    }
}

/// Runs `entry` through the trap bridge and turns a basedata trap code
/// into a [`RuntimeError::Trap`], shared by every arity below.
pub(crate) fn call_raw(shared: &RuntimeShared, entry_offset: u32, int_args: [u64; 8], float_args: [u64; 8]) -> Result<(u64, u64), RuntimeError> {
    let entry = shared.entry_ptr(entry_offset);
    let basedata_reg = shared.basedata_reg();
    let (int_ret, float_ret) = unsafe {
        #[cfg(target_arch = "x86_64")]
        {
            let six: [u64; 6] = [int_args[0], int_args[1], int_args[2], int_args[3], int_args[4], int_args[5]];
            crate::trapbridge::invoke(entry, basedata_reg, &six, &float_args)
        }
        #[cfg(target_arch = "aarch64")]
        {
            crate::trapbridge::invoke(entry, basedata_reg, &int_args, &float_args)
        }
    };
    match shared.take_trap() {
        Some(code) => Err(RuntimeError::Trap { code, stacktrace: shared.stacktrace_snapshot() }),
        None => Ok((int_ret, float_ret)),
    }
}

pub struct TypedFunc0<R: WasmResult> {
    inner: ExportedFunction,
    _r: std::marker::PhantomData<R>,
}

impl<R: WasmResult> TypedFunc0<R> {
    pub fn call(&self) -> Result<R, RuntimeError> {
        let (i, f) = call_raw(&self.inner.shared, self.inner.entry_offset, [0; 8], [0; 8])?;
        Ok(R::from_raw(i, f))
    }
}

pub struct TypedFunc1<A: WasmArg, R: WasmResult> {
    inner: ExportedFunction,
    _a: std::marker::PhantomData<A>,
    _r: std::marker::PhantomData<R>,
}

impl<A: WasmArg, R: WasmResult> TypedFunc1<A, R> {
    pub fn call(&self, a: A) -> Result<R, RuntimeError> {
        let mut int_args = [0u64; 8];
        let mut float_args = [0u64; 8];
        if A::MACHINE_TYPE.is_float() {
            float_args[0] = a.float_bits();
        } else {
            int_args[0] = a.to_raw();
        }
        let (i, f) = call_raw(&self.inner.shared, self.inner.entry_offset, int_args, float_args)?;
        Ok(R::from_raw(i, f))
    }
}

pub struct TypedFunc2<A: WasmArg, B: WasmArg, R: WasmResult> {
    inner: ExportedFunction,
    _a: std::marker::PhantomData<A>,
    _b: std::marker::PhantomData<B>,
    _r: std::marker::PhantomData<R>,
}

impl<A: WasmArg, B: WasmArg, R: WasmResult> TypedFunc2<A, B, R> {
    pub fn call(&self, a: A, b: B) -> Result<R, RuntimeError> {
        let mut int_args = [0u64; 8];
        let mut float_args = [0u64; 8];
        let mut int_slot = 0;
        let mut float_slot = 0;
        for (mt, raw, fbits) in [(A::MACHINE_TYPE, a.to_raw(), a.float_bits()), (B::MACHINE_TYPE, b.to_raw(), b.float_bits())] {
            if mt.is_float() {
                float_args[float_slot] = fbits;
                float_slot += 1;
            } else {
                int_args[int_slot] = raw;
                int_slot += 1;
            }
        }
        let (i, f) = call_raw(&self.inner.shared, self.inner.entry_offset, int_args, float_args)?;
        Ok(R::from_raw(i, f))
    }
}

/// Where an exported global's value lives: most globals reserve a
/// link-data slot (every mutable global does, per §3's "authoritative
/// value" invariant, and so does every imported one), but an immutable,
/// locally-defined global is folded to its constant at compile time and
/// never gets one.
#[derive(Debug, Clone, Copy)]
pub(crate) enum GlobalSource {
    LinkData(u32),
    Constant(u64),
}

/// A mutable or immutable exported global.
pub struct ExportedGlobal {
    pub(crate) name: String,
    pub(crate) machine_type: MachineType,
    pub(crate) mutable: bool,
    pub(crate) source: GlobalSource,
    pub(crate) shared: Arc<RuntimeShared>,
}

impl ExportedGlobal {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn machine_type(&self) -> MachineType {
        self.machine_type
    }

    pub fn get<T: WasmResult>(&self) -> Result<T, RuntimeError> {
        if T::MACHINE_TYPE != Some(self.machine_type) {
            return Err(RuntimeError::GlobalTypeMismatch { name: self.name.clone(), expected: self.machine_type, actual: T::MACHINE_TYPE.unwrap_or(MachineType::Invalid) });
        }
        let raw = match self.source {
            GlobalSource::LinkData(offset) => self.shared.read_global_link_data(offset),
            GlobalSource::Constant(bits) => bits,
        };
        Ok(T::from_raw(raw, raw))
    }

    pub fn set<T: WasmArg>(&self, value: T) -> Result<(), RuntimeError> {
        if !self.mutable {
            return Err(RuntimeError::GlobalIsImmutable(self.name.clone()));
        }
        if T::MACHINE_TYPE != self.machine_type {
            return Err(RuntimeError::GlobalTypeMismatch { name: self.name.clone(), expected: self.machine_type, actual: T::MACHINE_TYPE });
        }
        let raw = if self.machine_type.is_float() { value.float_bits() } else { value.to_raw() };
        let GlobalSource::LinkData(offset) = self.source else {
            unreachable!("mutable globals always carry a link-data source");
        };
        self.shared.write_global_link_data(offset, raw);
        Ok(())
    }
}
