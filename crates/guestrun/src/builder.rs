//! # Instance Builder
//!
//! Collects host functions and context for one instance, checks them against
//! the module's imports, then links and instantiates.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;
use wasmtime::ExternType;
use wasmtime::Linker;
use wasmtime::Store;

use crate::bridge::HostFunc;
use crate::bridge::HostModule;
use crate::context::ContextBuilder;
use crate::context::GuestCtx;
use crate::host;
use crate::instance::GuestInstance;
use crate::marshal;
use crate::runtime::ModuleId;
use crate::runtime::Runtime;

#[derive(Debug)]
pub enum Error {
    Runtime(crate::runtime::Error),
    /// Two host functions claim the same import.
    Duplicate { namespace: String, name: String },
    /// A host function's lanes disagree with the module's import.
    Signature {
        namespace: String,
        name: String,
        expected: String,
        found: String,
    },
    Marshal(marshal::Error),
    Linker(wasmtime::Error),
    Instantiate(wasmtime::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Runtime(e) => write!(f, "Runtime error: {}", e),
            Self::Duplicate { namespace, name } => {
                write!(f, "Duplicate host function: {}::{}", namespace, name)
            }
            Self::Signature {
                namespace,
                name,
                expected,
                found,
            } => write!(
                f,
                "Import {}::{} expects {}, host function provides {}",
                namespace, name, expected, found
            ),
            Self::Marshal(e) => write!(f, "Marshal error: {}", e),
            Self::Linker(e) => write!(f, "Linker error: {}", e),
            Self::Instantiate(e) => write!(f, "Instantiate error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<crate::runtime::Error> for Error {
    fn from(e: crate::runtime::Error) -> Self {
        Self::Runtime(e)
    }
}

impl From<marshal::Error> for Error {
    fn from(e: marshal::Error) -> Self {
        Self::Marshal(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fluent builder for creating instances with configured imports.
pub struct InstanceBuilder {
    runtime: Arc<Runtime>,
    module_id: ModuleId,
    wasi: bool,
    builtins: bool,
    funcs: Vec<HostFunc>,
    context_builder: ContextBuilder,
}

impl InstanceBuilder {
    pub fn new(runtime: Arc<Runtime>, module_id: ModuleId) -> Self {
        Self {
            runtime,
            module_id,
            wasi: false,
            builtins: true,
            funcs: Vec::new(),
            context_builder: ContextBuilder::new(),
        }
    }

    /// Links WASI preview 1 against the context's `WasiCtxBuilder`.
    pub fn wasi(mut self) -> Self {
        self.wasi = true;
        self
    }

    /// Leaves the `env` builtins out.
    pub fn without_builtins(mut self) -> Self {
        self.builtins = false;
        self
    }

    pub fn host(mut self, func: HostFunc) -> Self {
        self.funcs.push(func);
        self
    }

    pub fn hosts(mut self, funcs: impl IntoIterator<Item = HostFunc>) -> Self {
        self.funcs.extend(funcs);
        self
    }

    pub fn module(self, module: HostModule) -> Self {
        self.hosts(module.into_funcs())
    }

    pub fn context(mut self, f: impl FnOnce(&mut ContextBuilder)) -> Self {
        f(&mut self.context_builder);
        self
    }

    pub fn build(self) -> Result<GuestInstance> {
        let module = self.runtime.get_module(self.module_id)?;

        let mut funcs = if self.builtins {
            host::builtins()
        } else {
            Vec::new()
        };
        funcs.extend(self.funcs);

        let mut seen = HashSet::new();
        for func in &funcs {
            if !seen.insert((func.namespace(), func.name())) {
                return Err(Error::Duplicate {
                    namespace: func.namespace().to_string(),
                    name: func.name().to_string(),
                });
            }
        }

        for import in module.imports() {
            let ExternType::Func(ty) = import.ty() else {
                continue;
            };
            let Some(func) = funcs
                .iter()
                .find(|f| f.namespace() == import.module() && f.name() == import.name())
            else {
                continue;
            };

            let (params, results) = marshal::lanes_of(&ty)?;
            if params != func.params() || results != func.results() {
                return Err(Error::Signature {
                    namespace: import.module().to_string(),
                    name: import.name().to_string(),
                    expected: format!("{:?} -> {:?}", params, results),
                    found: format!("{:?} -> {:?}", func.params(), func.results()),
                });
            }
        }

        let mut linker = Linker::<GuestCtx>::new(self.runtime.engine());
        if self.wasi {
            wasmtime_wasi::p1::add_to_linker_sync(&mut linker, |ctx: &mut GuestCtx| &mut ctx.wasi)
                .map_err(Error::Linker)?;
        }
        for func in &funcs {
            func.define(&mut linker).map_err(Error::Linker)?;
        }

        let ctx = self
            .context_builder
            .build(Arc::clone(&self.runtime.config));
        let mut store = Store::new(self.runtime.engine(), ctx);
        if let Some(fuel) = self.runtime.config.fuel {
            store.set_fuel(fuel).map_err(Error::Instantiate)?;
        }

        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(Error::Instantiate)?;

        debug!(
            module = %self.module_id,
            host_funcs = funcs.len(),
            wasi = self.wasi,
            "instantiated"
        );
        Ok(GuestInstance::new(store, instance))
    }
}
