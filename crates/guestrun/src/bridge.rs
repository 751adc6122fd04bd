//! # Host function bridge
//!
//! Turns Rust closures into Wasm imports. Every import is defined with
//! `Linker::func_new` over a lane list, so one code path serves both
//! flavours of handler:
//!
//! - **Raw** handlers see positional words and return positional words.
//! - **Typed** handlers see decoded [`Args`] and return an optional
//!   [`Value`]. `ref` parameters arrive dereferenced, `buf` parameters
//!   arrive copied out of guest memory, and `ref`/`buf` results are
//!   registered or materialized on the way back.
//!
//! A handler that fails with a [`Violation`] traps the guest call and
//! poisons the instance. Any other error just traps.

use std::sync::Arc;

use hostref::Handle;
use tracing::error;
use tracing::trace;
use wasmtime::Caller;
use wasmtime::Extern;
use wasmtime::FuncType;
use wasmtime::Linker;
use wasmtime::Val;

use crate::context::GuestCtx;
use crate::marshal;
use crate::marshal::GuestMemory;
use crate::marshal::Lane;
use crate::marshal::Word;
use crate::schema;
use crate::schema::Kind;
use crate::schema::Signature;
use crate::value::HostValue;
use crate::value::Value;

// ============================================================================
//  VIOLATIONS
// ============================================================================

/// A breach of the handle or marshaling protocol.
///
/// These are never retried. The instance that saw one is unusable.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    Handle(hostref::Error),
    WrongKind {
        handle: Handle,
        expected: &'static str,
        found: &'static str,
    },
    Arity {
        func: String,
        expected: usize,
        found: usize,
    },
    Argument {
        index: usize,
        expected: Kind,
    },
    Result {
        func: String,
        declared: Option<Kind>,
        returned: Option<Kind>,
    },
    Memory {
        offset: u32,
        len: u32,
    },
    Utf8 {
        offset: u32,
        len: u32,
    },
    MissingExport(String),
    Lane(String),
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handle(e) => write!(f, "{}", e),
            Self::WrongKind {
                handle,
                expected,
                found,
            } => write!(f, "handle {} holds {}, expected {}", handle, found, expected),
            Self::Arity {
                func,
                expected,
                found,
            } => write!(f, "'{}' takes {} values, got {}", func, expected, found),
            Self::Argument { index, expected } => {
                write!(f, "argument {} is not a {}", index, expected)
            }
            Self::Result {
                func,
                declared,
                returned,
            } => write!(
                f,
                "'{}' declares result {:?} but produced {:?}",
                func, declared, returned
            ),
            Self::Memory { offset, len } => {
                write!(f, "guest memory access out of bounds: {} bytes at {:#x}", len, offset)
            }
            Self::Utf8 { offset, len } => write!(f, "invalid UTF-8 in {} bytes at {:#x}", len, offset),
            Self::MissingExport(name) => write!(f, "guest does not export '{}'", name),
            Self::Lane(ty) => write!(f, "non-numeric value on the boundary: {}", ty),
        }
    }
}

impl std::error::Error for Violation {}

impl From<hostref::Error> for Violation {
    fn from(e: hostref::Error) -> Self {
        Self::Handle(e)
    }
}

/// Splits marshaling failures into violations and genuine guest traps.
pub(crate) fn escalate(e: marshal::Error) -> anyhow::Error {
    match e {
        marshal::Error::Guest(trap) => trap,
        marshal::Error::MissingExport(name) => Violation::MissingExport(name).into(),
        marshal::Error::OutOfBounds { offset, len } => Violation::Memory { offset, len }.into(),
        marshal::Error::InvalidUtf8 { offset, len } => Violation::Utf8 { offset, len }.into(),
        marshal::Error::UnsupportedLane(ty) => Violation::Lane(ty).into(),
    }
}

pub(crate) fn wrong_kind(handle: Handle, expected: &'static str, found: &HostValue) -> Violation {
    Violation::WrongKind {
        handle,
        expected,
        found: found.kind(),
    }
}

// ============================================================================
//  HOST CALL
// ============================================================================

/// A handler's view of the guest that called it.
pub struct HostCall<'a, 'c> {
    caller: &'a mut Caller<'c, GuestCtx>,
}

impl<'a, 'c> HostCall<'a, 'c> {
    pub(crate) fn new(caller: &'a mut Caller<'c, GuestCtx>) -> Self {
        Self { caller }
    }

    pub fn ctx(&mut self) -> &mut GuestCtx {
        self.caller.data_mut()
    }

    /// Registers `value` and returns the handle the guest will hold.
    pub fn alloc(&mut self, value: impl Into<HostValue>) -> Handle {
        let value = value.into();
        let kind = value.kind();
        let handle = self.caller.data_mut().handles.register(value);
        trace!(%handle, kind, "handle registered");
        handle
    }

    pub fn get(&self, handle: Handle) -> Result<&HostValue, Violation> {
        Ok(self.caller.data().handles.get(handle)?)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut HostValue, Violation> {
        Ok(self.caller.data_mut().handles.get_mut(handle)?)
    }

    pub fn set(&mut self, handle: Handle, value: impl Into<HostValue>) -> Result<(), Violation> {
        Ok(self.caller.data_mut().handles.set(handle, value.into())?)
    }

    pub fn free(&mut self, handle: Handle) -> Result<HostValue, Violation> {
        let value = self.caller.data_mut().handles.free(handle)?;
        trace!(%handle, "handle released");
        Ok(value)
    }

    /// The string behind `handle`.
    pub fn string(&self, handle: Handle) -> Result<&str, Violation> {
        let value = self.get(handle)?;
        value.as_str().ok_or_else(|| wrong_kind(handle, "string", value))
    }

    pub fn read_bytes(&mut self, offset: u32, len: u32) -> anyhow::Result<Vec<u8>> {
        marshal::load_bytes(self, offset, len).map_err(escalate)
    }

    pub fn read_string(&mut self, offset: u32, len: u32) -> anyhow::Result<String> {
        marshal::load_string(self, offset, len).map_err(escalate)
    }

    /// Copies `bytes` into the guest and returns the packed word for them.
    pub fn materialize(&mut self, bytes: &[u8]) -> anyhow::Result<Word> {
        marshal::materialize(self, bytes).map_err(escalate)
    }

    /// Calls back into a guest export while the guest is suspended in this
    /// host call.
    pub fn exec(&mut self, export: &str, args: &[Word]) -> anyhow::Result<Vec<Word>> {
        let func = self
            .caller
            .get_export(export)
            .and_then(Extern::into_func)
            .ok_or_else(|| Violation::MissingExport(export.to_string()))?;

        let expected = func.ty(&*self.caller).params().len();
        if expected != args.len() {
            return Err(Violation::Arity {
                func: export.to_string(),
                expected,
                found: args.len(),
            }
            .into());
        }

        trace!(export, "reentrant guest call");
        marshal::call_func(&mut *self.caller, func, args)
    }

    fn export(&mut self, name: &str) -> marshal::Result<Extern> {
        self.caller
            .get_export(name)
            .ok_or_else(|| marshal::Error::MissingExport(name.to_string()))
    }
}

impl GuestMemory for HostCall<'_, '_> {
    fn read(&mut self, offset: u32, len: u32) -> marshal::Result<Vec<u8>> {
        let name = self.caller.data().config.memory.clone();
        let memory = self
            .export(&name)?
            .into_memory()
            .ok_or(marshal::Error::MissingExport(name))?;
        marshal::read_memory(&*self.caller, memory, offset, len)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> marshal::Result<()> {
        let name = self.caller.data().config.memory.clone();
        let memory = self
            .export(&name)?
            .into_memory()
            .ok_or(marshal::Error::MissingExport(name))?;
        marshal::write_memory(&mut *self.caller, memory, offset, bytes)
    }

    fn alloc(&mut self, len: u32) -> marshal::Result<u32> {
        let name = self.caller.data().config.allocator.clone();
        let func = self
            .export(&name)?
            .into_func()
            .ok_or_else(|| marshal::Error::MissingExport(name.clone()))?;
        marshal::call_alloc(&mut *self.caller, func, &name, len)
    }
}

// ============================================================================
//  TYPED ARGUMENTS
// ============================================================================

/// Decoded arguments of a typed host call.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: Vec<Value>,
    handles: Vec<Option<Handle>>,
}

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        let handles = vec![None; values.len()];
        Self { values, handles }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    fn mismatch(index: usize, expected: Kind) -> Violation {
        Violation::Argument { index, expected }
    }

    pub fn i32(&self, index: usize) -> Result<i32, Violation> {
        match self.get(index) {
            Some(Value::I32(v)) => Ok(*v),
            _ => Err(Self::mismatch(index, Kind::I32)),
        }
    }

    pub fn i64(&self, index: usize) -> Result<i64, Violation> {
        match self.get(index) {
            Some(Value::I64(v)) => Ok(*v),
            _ => Err(Self::mismatch(index, Kind::I64)),
        }
    }

    pub fn f32(&self, index: usize) -> Result<f32, Violation> {
        match self.get(index) {
            Some(Value::F32(v)) => Ok(*v),
            _ => Err(Self::mismatch(index, Kind::F32)),
        }
    }

    pub fn f64(&self, index: usize) -> Result<f64, Violation> {
        match self.get(index) {
            Some(Value::F64(v)) => Ok(*v),
            _ => Err(Self::mismatch(index, Kind::F64)),
        }
    }

    pub fn bool(&self, index: usize) -> Result<bool, Violation> {
        match self.get(index) {
            Some(Value::Bool(v)) => Ok(*v),
            _ => Err(Self::mismatch(index, Kind::Bool)),
        }
    }

    /// The host value a `ref` argument pointed at when the call began.
    pub fn host(&self, index: usize) -> Result<&HostValue, Violation> {
        match self.get(index) {
            Some(Value::Ref(v)) => Ok(v),
            _ => Err(Self::mismatch(index, Kind::Ref)),
        }
    }

    /// The handle a `ref` argument arrived as.
    pub fn handle(&self, index: usize) -> Result<Handle, Violation> {
        self.handles
            .get(index)
            .copied()
            .flatten()
            .ok_or_else(|| Self::mismatch(index, Kind::Ref))
    }

    pub fn bytes(&self, index: usize) -> Result<&[u8], Violation> {
        match self.get(index) {
            Some(Value::Buf(v)) => Ok(v),
            _ => Err(Self::mismatch(index, Kind::Buf)),
        }
    }

    /// A string argument, whether it crossed as a `buf` or as a `ref`.
    pub fn str(&self, index: usize) -> Result<&str, Violation> {
        match self.get(index) {
            Some(Value::Buf(v)) => std::str::from_utf8(v).map_err(|_| Violation::Utf8 {
                offset: 0,
                len: v.len() as u32,
            }),
            Some(Value::Ref(HostValue::String(s))) => Ok(s),
            Some(Value::Ref(_)) => Err(Self::mismatch(index, Kind::Ref)),
            _ => Err(Self::mismatch(index, Kind::Buf)),
        }
    }

    fn decode(call: &mut HostCall<'_, '_>, sig: &Signature, words: &[Word]) -> anyhow::Result<Self> {
        let mut args = Args::default();
        let mut words = words.iter().copied();
        let mut next = || words.next().unwrap_or_default();

        for kind in &sig.params {
            let (value, handle) = match kind {
                Kind::I32 => (Value::I32(marshal::to_i32(next())), None),
                Kind::I64 => (Value::I64(marshal::to_i64(next())), None),
                Kind::F32 => (Value::F32(marshal::to_f32(next())), None),
                Kind::F64 => (Value::F64(marshal::to_f64(next())), None),
                Kind::Bool => (Value::Bool(marshal::to_bool(next())), None),
                Kind::Ref => {
                    let handle = marshal::to_handle(next());
                    (Value::Ref(call.get(handle)?.clone()), Some(handle))
                }
                Kind::Buf => {
                    let offset = next() as u32;
                    let len = next() as u32;
                    (Value::Buf(call.read_bytes(offset, len)?), None)
                }
            };
            args.values.push(value);
            args.handles.push(handle);
        }
        Ok(args)
    }
}

fn encode(
    call: &mut HostCall<'_, '_>,
    func: &str,
    declared: Option<Kind>,
    value: Option<Value>,
) -> anyhow::Result<Vec<Word>> {
    let word = match (declared, value) {
        (None, None) => return Ok(Vec::new()),
        (Some(kind), Some(value)) if value.kind() == kind => match value {
            Value::I32(v) => marshal::from_i32(v),
            Value::I64(v) => marshal::from_i64(v),
            Value::F32(v) => marshal::from_f32(v),
            Value::F64(v) => marshal::from_f64(v),
            Value::Bool(v) => marshal::from_bool(v),
            Value::Ref(v) => marshal::from_handle(call.alloc(v)),
            Value::Buf(bytes) => call.materialize(&bytes)?,
        },
        (declared, value) => {
            return Err(Violation::Result {
                func: func.to_string(),
                declared,
                returned: value.map(|v| v.kind()),
            }
            .into());
        }
    };
    Ok(vec![word])
}

// ============================================================================
//  HOST FUNCTIONS
// ============================================================================

type RawHandler =
    dyn Fn(&mut HostCall<'_, '_>, &[Word]) -> anyhow::Result<Vec<Word>> + Send + Sync;

type TypedHandler =
    dyn Fn(&mut HostCall<'_, '_>, &Args) -> anyhow::Result<Option<Value>> + Send + Sync;

#[derive(Clone)]
enum Dispatch {
    Raw(Arc<RawHandler>),
    Typed {
        signature: Signature,
        handler: Arc<TypedHandler>,
    },
}

/// One host import, ready to be defined in a linker.
#[derive(Clone)]
pub struct HostFunc {
    namespace: String,
    name: String,
    params: Vec<Lane>,
    results: Vec<Lane>,
    dispatch: Dispatch,
}

impl HostFunc {
    /// A positional handler over explicit lanes.
    pub fn raw<F>(
        namespace: impl Into<String>,
        name: impl Into<String>,
        params: impl Into<Vec<Lane>>,
        results: impl Into<Vec<Lane>>,
        handler: F,
    ) -> Self
    where
        F: Fn(&mut HostCall<'_, '_>, &[Word]) -> anyhow::Result<Vec<Word>> + Send + Sync + 'static,
    {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            params: params.into(),
            results: results.into(),
            dispatch: Dispatch::Raw(Arc::new(handler)),
        }
    }

    /// A handler whose arguments and result are marshaled per `signature`.
    pub fn typed<F>(
        namespace: impl Into<String>,
        name: impl Into<String>,
        signature: Signature,
        handler: F,
    ) -> Self
    where
        F: Fn(&mut HostCall<'_, '_>, &Args) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            params: signature.param_lanes(),
            results: signature.result_lanes(),
            dispatch: Dispatch::Typed {
                signature,
                handler: Arc::new(handler),
            },
        }
    }

    /// Like [`typed`](Self::typed), with the signature in text form.
    pub fn declare<F>(
        namespace: impl Into<String>,
        name: impl Into<String>,
        signature: &str,
        handler: F,
    ) -> schema::Result<Self>
    where
        F: Fn(&mut HostCall<'_, '_>, &Args) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        Ok(Self::typed(namespace, name, signature.parse()?, handler))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Lane] {
        &self.params
    }

    pub fn results(&self) -> &[Lane] {
        &self.results
    }

    pub fn signature(&self) -> Option<&Signature> {
        match &self.dispatch {
            Dispatch::Raw(_) => None,
            Dispatch::Typed { signature, .. } => Some(signature),
        }
    }

    /// Defines this import in `linker`.
    pub fn define(&self, linker: &mut Linker<GuestCtx>) -> wasmtime::Result<()> {
        let ty = FuncType::new(
            linker.engine(),
            self.params.iter().map(|l| l.val_type()),
            self.results.iter().map(|l| l.val_type()),
        );
        let label = format!("{}::{}", self.namespace, self.name);
        let dispatch = self.dispatch.clone();
        let results_lanes = self.results.clone();

        linker.func_new(
            &self.namespace,
            &self.name,
            ty,
            move |mut caller: Caller<'_, GuestCtx>, args: &[Val], results: &mut [Val]| {
                trace!(func = %label, "host call");

                let words = args
                    .iter()
                    .map(marshal::from_val)
                    .collect::<marshal::Result<Vec<Word>>>()
                    .map_err(escalate);

                let outcome = words.and_then(|words| {
                    let mut call = HostCall::new(&mut caller);
                    dispatch.run(&mut call, &label, &words)
                });

                let out = match outcome {
                    Ok(out) => out,
                    Err(e) => {
                        if let Some(violation) = e.downcast_ref::<Violation>() {
                            error!(func = %label, %violation, "protocol violation");
                            caller.data_mut().poison(violation.clone());
                        }
                        return Err(e);
                    }
                };

                if out.len() != results_lanes.len() {
                    let violation = Violation::Arity {
                        func: label.clone(),
                        expected: results_lanes.len(),
                        found: out.len(),
                    };
                    error!(func = %label, %violation, "protocol violation");
                    caller.data_mut().poison(violation.clone());
                    return Err(violation.into());
                }

                for ((slot, lane), word) in results.iter_mut().zip(&results_lanes).zip(out) {
                    *slot = lane.to_val(word);
                }
                Ok(())
            },
        )?;
        Ok(())
    }
}

impl Dispatch {
    fn run(&self, call: &mut HostCall<'_, '_>, func: &str, words: &[Word]) -> anyhow::Result<Vec<Word>> {
        match self {
            Dispatch::Raw(handler) => handler(call, words),
            Dispatch::Typed { signature, handler } => {
                let args = Args::decode(call, signature, words)?;
                let value = handler(call, &args)?;
                encode(call, func, signature.result, value)
            }
        }
    }
}

impl std::fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFunc")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("params", &self.params)
            .field("results", &self.results)
            .field("signature", &self.signature())
            .finish()
    }
}

/// A set of host functions sharing one import namespace.
#[derive(Clone, Debug)]
pub struct HostModule {
    namespace: String,
    funcs: Vec<HostFunc>,
}

impl HostModule {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            funcs: Vec::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn raw<F>(
        mut self,
        name: impl Into<String>,
        params: impl Into<Vec<Lane>>,
        results: impl Into<Vec<Lane>>,
        handler: F,
    ) -> Self
    where
        F: Fn(&mut HostCall<'_, '_>, &[Word]) -> anyhow::Result<Vec<Word>> + Send + Sync + 'static,
    {
        let func = HostFunc::raw(self.namespace.clone(), name, params, results, handler);
        self.funcs.push(func);
        self
    }

    pub fn typed<F>(mut self, name: impl Into<String>, signature: Signature, handler: F) -> Self
    where
        F: Fn(&mut HostCall<'_, '_>, &Args) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        let func = HostFunc::typed(self.namespace.clone(), name, signature, handler);
        self.funcs.push(func);
        self
    }

    pub fn declare<F>(self, name: impl Into<String>, signature: &str, handler: F) -> schema::Result<Self>
    where
        F: Fn(&mut HostCall<'_, '_>, &Args) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        Ok(self.typed(name, signature.parse()?, handler))
    }

    pub fn funcs(&self) -> &[HostFunc] {
        &self.funcs
    }

    pub fn into_funcs(self) -> Vec<HostFunc> {
        self.funcs
    }
}
