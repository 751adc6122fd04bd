//! # Store context
//!
//! Everything a guest instance owns lives in its store's data: the handle
//! table, the WASI context and whatever the embedder stashed in user data.
//! Host handlers reach it through [`HostCall::ctx`](crate::bridge::HostCall::ctx).

use std::sync::Arc;

use hostref::HandleTable;
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::p1::WasiP1Ctx;

use crate::bridge::Violation;
use crate::config::Config;
use crate::value::HostValue;

/// Staging area for state baked into a [`GuestCtx`].
///
/// Lets the embedder set WASI arguments, environment and preopens, and
/// insert typed user data, before the store exists.
pub struct ContextBuilder {
    pub wasi: WasiCtxBuilder,
    pub user_data: anymap::Map<dyn anymap::any::Any + Send + Sync>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            wasi: WasiCtxBuilder::new(),
            user_data: anymap::Map::new(),
        }
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, val: T) -> &mut Self {
        self.user_data.insert(val);
        self
    }

    pub(crate) fn build(mut self, config: Arc<Config>) -> GuestCtx {
        GuestCtx {
            wasi: self.wasi.build_p1(),
            handles: HandleTable::with_capacity(config.handle_capacity),
            config,
            violation: None,
            user_data: self.user_data,
        }
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-instance state stored in the wasmtime `Store`.
pub struct GuestCtx {
    pub(crate) wasi: WasiP1Ctx,
    pub(crate) handles: HandleTable<HostValue>,
    pub(crate) config: Arc<Config>,
    violation: Option<Violation>,
    user_data: anymap::Map<dyn anymap::any::Any + Send + Sync>,
}

impl GuestCtx {
    pub fn handles(&self) -> &HandleTable<HostValue> {
        &self.handles
    }

    pub fn handles_mut(&mut self) -> &mut HandleTable<HostValue> {
        &mut self.handles
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, val: T) {
        self.user_data.insert(val);
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.user_data.get::<T>()
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.user_data.get_mut::<T>()
    }

    /// Records a protocol violation. The first one wins.
    pub(crate) fn poison(&mut self, violation: Violation) {
        if self.violation.is_none() {
            self.violation = Some(violation);
        }
    }

    pub(crate) fn take_violation(&mut self) -> Option<Violation> {
        self.violation.take()
    }
}
