//! # Guest instances
//!
//! A [`GuestInstance`] owns one store, one instance and the lifecycle state
//! around them:
//!
//! ```text
//! NotStarted ──run()──> Running ──> Exited(code)
//!                          │     └─> Initialized
//!                          └─ trap: stays Running
//!
//! any state ──protocol violation──> Corrupted
//! ```
//!
//! `call` works in any healthy state. `exec` and `invoke` need the guest
//! runtime to have been started by `run` first. An entry point that traps
//! leaves the instance `Running`: `run` is not retried (`AlreadyStarted`),
//! but exports stay callable. `Corrupted` is terminal.

use hostref::Handle;
use tracing::debug;
use tracing::error;
use tracing::info;
use wasmtime::Func;
use wasmtime::Instance;
use wasmtime::Store;
use wasmtime_wasi::I32Exit;

use crate::bridge::Violation;
use crate::context::GuestCtx;
use crate::invoke::Invokable;
use crate::marshal;
use crate::marshal::GuestMemory;
use crate::marshal::Word;
use crate::schema::Kind;
use crate::value::HostValue;
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    NotStarted,
    Running,
    /// `_start` finished, either by returning or through `proc_exit`.
    Exited(i32),
    /// Only `_initialize` existed and it returned.
    Initialized,
    Corrupted,
}

#[derive(Debug)]
pub enum Error {
    /// `exec` or `invoke` before `run`.
    NotStarted,
    AlreadyStarted,
    /// Neither `_start` nor `_initialize` is exported.
    NoEntryPoint,
    ExportNotFound(String),
    /// A name that is not in the [`GuestApi`](crate::GuestApi).
    Undeclared(String),
    Arity {
        export: String,
        expected: usize,
        found: usize,
    },
    Argument {
        index: usize,
        expected: Kind,
        found: Kind,
    },
    /// The export's Wasm type disagrees with its declared signature.
    Signature {
        export: String,
        declared: String,
        actual: String,
    },
    /// The guest called `proc_exit` outside of `run`.
    Exited(i32),
    Trap(wasmtime::Error),
    Violation(Violation),
    /// A violation already poisoned this instance.
    Corrupted,
    Marshal(marshal::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "guest has not been started"),
            Self::AlreadyStarted => write!(f, "guest has already been started"),
            Self::NoEntryPoint => write!(f, "guest exports neither a start nor an initialize function"),
            Self::ExportNotFound(name) => write!(f, "export not found: {}", name),
            Self::Undeclared(name) => write!(f, "no invokable declared for '{}'", name),
            Self::Arity {
                export,
                expected,
                found,
            } => write!(f, "'{}' takes {} arguments, got {}", export, expected, found),
            Self::Argument {
                index,
                expected,
                found,
            } => write!(f, "argument {} should be {}, got {}", index, expected, found),
            Self::Signature {
                export,
                declared,
                actual,
            } => write!(f, "'{}' declared as {} but has type {}", export, declared, actual),
            Self::Exited(code) => write!(f, "guest exited with code {}", code),
            Self::Trap(e) => write!(f, "guest trapped: {}", e),
            Self::Violation(v) => write!(f, "protocol violation: {}", v),
            Self::Corrupted => write!(f, "instance is corrupted by an earlier protocol violation"),
            Self::Marshal(e) => write!(f, "marshal error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<marshal::Error> for Error {
    fn from(e: marshal::Error) -> Self {
        match e {
            marshal::Error::Guest(trap) => Self::Trap(trap),
            other => Self::Marshal(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// One running guest.
pub struct GuestInstance {
    store: Store<GuestCtx>,
    instance: Instance,
    state: State,
}

impl GuestInstance {
    pub(crate) fn new(store: Store<GuestCtx>, instance: Instance) -> Self {
        Self {
            store,
            instance,
            state: State::NotStarted,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn ctx(&mut self) -> &mut GuestCtx {
        self.store.data_mut()
    }

    /// Remaining fuel when the runtime meters execution.
    pub fn fuel(&self) -> Option<u64> {
        self.store.get_fuel().ok()
    }

    /// Starts the guest and returns its exit code.
    ///
    /// Prefers the command entry point. A guest that exits through
    /// `proc_exit` reports that code, a guest that returns reports `0`.
    /// Reactors are initialized and report `0`.
    pub fn run(&mut self) -> Result<i32> {
        self.healthy()?;
        if self.state != State::NotStarted {
            return Err(Error::AlreadyStarted);
        }

        let config = self.store.data().config.clone();
        if let Some(start) = self.func(&config.start) {
            self.state = State::Running;
            debug!(export = %config.start, "starting guest");

            let outcome = marshal::call_func(&mut self.store, start, &[]);
            self.check_violation()?;

            let code = match outcome {
                Ok(_) => 0,
                Err(e) => match e.downcast_ref::<I32Exit>() {
                    Some(exit) => exit.0,
                    None => return Err(Error::Trap(e)),
                },
            };
            info!(code, "guest exited");
            self.state = State::Exited(code);
            return Ok(code);
        }

        if let Some(initialize) = self.func(&config.initialize) {
            self.state = State::Running;
            debug!(export = %config.initialize, "initializing guest");

            let outcome = marshal::call_func(&mut self.store, initialize, &[]);
            self.settle(outcome)?;
            self.state = State::Initialized;
            return Ok(0);
        }

        Err(Error::NoEntryPoint)
    }

    /// Calls an export by name with positional words, in any healthy state.
    pub fn call(&mut self, export: &str, args: &[Word]) -> Result<Vec<Word>> {
        self.healthy()?;
        let func = self
            .func(export)
            .ok_or_else(|| Error::ExportNotFound(export.to_string()))?;

        let expected = func.ty(&self.store).params().len();
        if expected != args.len() {
            return Err(Error::Arity {
                export: export.to_string(),
                expected,
                found: args.len(),
            });
        }

        let outcome = marshal::call_func(&mut self.store, func, args);
        self.settle(outcome)
    }

    /// Like [`call`](Self::call), for a guest whose runtime is up.
    pub fn exec(&mut self, export: &str, args: &[Word]) -> Result<Vec<Word>> {
        self.healthy()?;
        if self.state == State::NotStarted {
            return Err(Error::NotStarted);
        }
        self.call(export, args)
    }

    /// Calls a declared export with typed values.
    pub fn invoke(&mut self, invokable: &Invokable, args: &[Value]) -> Result<Option<Value>> {
        self.healthy()?;
        if self.state == State::NotStarted {
            return Err(Error::NotStarted);
        }
        invokable.check_args(args)?;
        self.check_signature(invokable)?;

        let mut words = Vec::with_capacity(args.len());
        let mut lent = Vec::new();
        for arg in args {
            let word = match arg {
                Value::I32(v) => marshal::from_i32(*v),
                Value::I64(v) => marshal::from_i64(*v),
                Value::F32(v) => marshal::from_f32(*v),
                Value::F64(v) => marshal::from_f64(*v),
                Value::Bool(v) => marshal::from_bool(*v),
                Value::Ref(v) => {
                    let handle = self.alloc(v.clone());
                    lent.push(handle);
                    marshal::from_handle(handle)
                }
                // Rejected when the invokable was declared.
                Value::Buf(_) => 0,
            };
            words.push(word);
        }

        let results = match self.call(invokable.name(), &words) {
            Ok(results) => results,
            Err(e) => {
                self.reclaim(&lent);
                return Err(e);
            }
        };
        let Some(kind) = invokable.signature().result else {
            return Ok(None);
        };
        let word = results.first().copied().unwrap_or_default();

        let value = match kind {
            Kind::I32 => Value::I32(marshal::to_i32(word)),
            Kind::I64 => Value::I64(marshal::to_i64(word)),
            Kind::F32 => Value::F32(marshal::to_f32(word)),
            Kind::F64 => Value::F64(marshal::to_f64(word)),
            Kind::Bool => Value::Bool(marshal::to_bool(word)),
            Kind::Ref => Value::Ref(self.free(marshal::to_handle(word))?),
            Kind::Buf => Value::Buf(Vec::new()),
        };
        Ok(Some(value))
    }

    // ========================================================================
    //  HANDLES
    // ========================================================================

    pub fn alloc(&mut self, value: impl Into<HostValue>) -> Handle {
        let handle = self.store.data_mut().handles.register(value.into());
        debug!(%handle, "host registered handle");
        handle
    }

    pub fn get(&mut self, handle: Handle) -> Result<&HostValue> {
        self.healthy()?;
        if let Some(e) = self.store.data().handles.get(handle).err() {
            return Err(self.corrupt(e.into()));
        }
        self.store
            .data()
            .handles
            .get(handle)
            .map_err(|e| Error::Violation(e.into()))
    }

    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut HostValue> {
        self.healthy()?;
        if let Some(e) = self.store.data().handles.get(handle).err() {
            return Err(self.corrupt(e.into()));
        }
        self.store
            .data_mut()
            .handles
            .get_mut(handle)
            .map_err(|e| Error::Violation(e.into()))
    }

    pub fn set(&mut self, handle: Handle, value: impl Into<HostValue>) -> Result<()> {
        self.healthy()?;
        match self.store.data_mut().handles.set(handle, value.into()) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.corrupt(e.into())),
        }
    }

    pub fn free(&mut self, handle: Handle) -> Result<HostValue> {
        self.healthy()?;
        match self.store.data_mut().handles.free(handle) {
            Ok(value) => {
                debug!(%handle, "host released handle");
                Ok(value)
            }
            Err(e) => Err(self.corrupt(e.into())),
        }
    }

    // ========================================================================
    //  GUEST MEMORY
    // ========================================================================

    pub fn read_bytes(&mut self, offset: u32, len: u32) -> Result<Vec<u8>> {
        Ok(marshal::load_bytes(self, offset, len)?)
    }

    pub fn read_string(&mut self, offset: u32, len: u32) -> Result<String> {
        Ok(marshal::load_string(self, offset, len)?)
    }

    /// Copies `bytes` into the guest, returning the packed word for them.
    pub fn materialize(&mut self, bytes: &[u8]) -> Result<Word> {
        self.healthy()?;
        Ok(marshal::materialize(self, bytes)?)
    }

    // ========================================================================
    //  INTERNALS
    // ========================================================================

    fn func(&mut self, name: &str) -> Option<Func> {
        self.instance.get_func(&mut self.store, name)
    }

    fn healthy(&self) -> Result<()> {
        match self.state {
            State::Corrupted => Err(Error::Corrupted),
            _ => Ok(()),
        }
    }

    /// Releases argument handles after a failed call. Slots the guest
    /// already released are skipped.
    fn reclaim(&mut self, handles: &[Handle]) {
        let table = &mut self.store.data_mut().handles;
        for &handle in handles {
            if table.contains(handle) {
                let _ = table.free(handle);
            }
        }
    }

    fn corrupt(&mut self, violation: Violation) -> Error {
        error!(%violation, "instance corrupted");
        self.state = State::Corrupted;
        Error::Violation(violation)
    }

    fn check_violation(&mut self) -> Result<()> {
        match self.store.data_mut().take_violation() {
            Some(violation) => Err(self.corrupt(violation)),
            None => Ok(()),
        }
    }

    /// Maps the outcome of a guest call onto the lifecycle.
    fn settle<T>(&mut self, outcome: wasmtime::Result<T>) -> Result<T> {
        self.check_violation()?;
        match outcome {
            Ok(value) => Ok(value),
            Err(e) => match e.downcast_ref::<I32Exit>() {
                Some(exit) => {
                    let code = exit.0;
                    info!(code, "guest exited");
                    self.state = State::Exited(code);
                    Err(Error::Exited(code))
                }
                None => Err(Error::Trap(e)),
            },
        }
    }

    fn check_signature(&mut self, invokable: &Invokable) -> Result<()> {
        let func = self
            .func(invokable.name())
            .ok_or_else(|| Error::ExportNotFound(invokable.name().to_string()))?;
        let (params, results) = marshal::lanes_of(&func.ty(&self.store))?;

        let signature = invokable.signature();
        if params != signature.param_lanes() || results != signature.result_lanes() {
            return Err(Error::Signature {
                export: invokable.name().to_string(),
                declared: signature.to_string(),
                actual: format!("{:?} -> {:?}", params, results),
            });
        }
        Ok(())
    }
}

impl GuestMemory for GuestInstance {
    fn read(&mut self, offset: u32, len: u32) -> marshal::Result<Vec<u8>> {
        let name = self.store.data().config.memory.clone();
        let memory = self
            .instance
            .get_memory(&mut self.store, &name)
            .ok_or(marshal::Error::MissingExport(name))?;
        marshal::read_memory(&self.store, memory, offset, len)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> marshal::Result<()> {
        let name = self.store.data().config.memory.clone();
        let memory = self
            .instance
            .get_memory(&mut self.store, &name)
            .ok_or(marshal::Error::MissingExport(name))?;
        marshal::write_memory(&mut self.store, memory, offset, bytes)
    }

    fn alloc(&mut self, len: u32) -> marshal::Result<u32> {
        let name = self.store.data().config.allocator.clone();
        let func = self
            .func(&name)
            .ok_or_else(|| marshal::Error::MissingExport(name.clone()))?;
        marshal::call_alloc(&mut self.store, func, &name, len)
    }
}
