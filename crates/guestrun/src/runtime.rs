//! # Runtime registry
//!
//! Owns the engine and the compiled guest modules. Modules are compiled once
//! and instantiated any number of times, each instance with its own store and
//! its own handle table.
//!
//! The module map is a `DashMap`, so one `Arc<Runtime>` can be shared by
//! threads that register and instantiate concurrently.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tracing::debug;
use wasmtime::Engine;
use wasmtime::Module;

use crate::builder::InstanceBuilder;
use crate::config::Config;

/// Strong type for module identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct ModuleId(pub u64);

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "module-{}", self.0)
    }
}

#[derive(Debug)]
pub enum Error {
    ModuleNotFound(ModuleId),
    Engine(wasmtime::Error),
    Module(wasmtime::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModuleNotFound(id) => write!(f, "Module not found: {}", id),
            Self::Engine(e) => write!(f, "Engine error: {}", e),
            Self::Module(e) => write!(f, "Module error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

pub struct Runtime {
    pub(crate) engine: Engine,
    pub(crate) config: Arc<Config>,
    pub(crate) modules: DashMap<ModuleId, Module>,
    next_module_id: AtomicU64,
}

impl Runtime {
    /// Creates a runtime with the default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let engine = Engine::new(&config.engine_config()).map_err(Error::Engine)?;
        Ok(Self {
            engine,
            config: Arc::new(config),
            modules: DashMap::new(),
            next_module_id: AtomicU64::new(1),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Compiles a module from its binary or text encoding.
    pub fn add_module_bytes(&self, bytes: impl AsRef<[u8]>) -> Result<ModuleId> {
        let module = Module::new(&self.engine, bytes).map_err(Error::Module)?;
        Ok(self.add_module(module))
    }

    /// Registers an already compiled module.
    pub fn add_module(&self, module: Module) -> ModuleId {
        let id = ModuleId(self.next_module_id.fetch_add(1, Ordering::Relaxed));
        debug!(module = %id, imports = module.imports().len(), "module registered");
        self.modules.insert(id, module);
        id
    }

    pub fn get_module(&self, id: ModuleId) -> Result<Module> {
        self.modules
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::ModuleNotFound(id))
    }

    pub fn remove_module(&self, id: ModuleId) -> Result<()> {
        self.modules
            .remove(&id)
            .ok_or(Error::ModuleNotFound(id))?;
        Ok(())
    }

    /// Starts configuring a new instance of a registered module.
    pub fn instantiate(self: &Arc<Self>, id: ModuleId) -> InstanceBuilder {
        InstanceBuilder::new(Arc::clone(self), id)
    }
}
