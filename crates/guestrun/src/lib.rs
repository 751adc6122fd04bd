//! # guestrun
//!
//! A host runtime for Wasm guests that hold host objects by handle.
//!
//! ## Architecture
//!
//! Wasm only moves numbers across the boundary. Strings, byte buffers and
//! arbitrary host objects stay on the host, in a per-instance
//! [`HandleTable`](hostref::HandleTable); the guest holds small integer
//! handles to them and asks the host to read or write through builtins.
//!
//! - **Host → guest**: [`GuestInstance::call`]/[`exec`](GuestInstance::exec)
//!   with positional words, or [`GuestInstance::invoke`] with typed
//!   [`Value`]s through a declared [`Invokable`].
//! - **Guest → host**: imports built from [`HostFunc`]s, either raw
//!   (positional words) or typed (a [`Signature`] drives decoding).
//!   Handlers may call back into the guest to any depth.
//!
//! ## Core Concepts
//!
//! - **Runtime**: the engine and the registry of compiled modules
//! - **InstanceBuilder**: wires builtins, host functions, WASI and context
//! - **GuestInstance**: one store, one handle table, one lifecycle
//! - **Violation**: misuse of a handle or of guest memory; poisons the instance
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use guestrun::HostFunc;
//! use guestrun::Runtime;
//! use guestrun::Value;
//!
//! # fn example(wasm: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let rt = Arc::new(Runtime::new()?);
//! let module = rt.add_module_bytes(wasm)?;
//!
//! let validate = HostFunc::declare("env", "validate", "(ref) -> bool", |_call, args| {
//!     Ok(Some(Value::Bool(args.str(0)? == "foo")))
//! })?;
//!
//! let mut guest = rt.instantiate(module).wasi().host(validate).build()?;
//! let code = guest.run()?;
//! # let _ = code;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod builder;
pub mod config;
pub mod context;
pub mod host;
pub mod instance;
pub mod invoke;
pub mod marshal;
pub mod runtime;
pub mod schema;
pub mod value;

pub use bridge::Args;
pub use bridge::HostCall;
pub use bridge::HostFunc;
pub use bridge::HostModule;
pub use bridge::Violation;
pub use builder::InstanceBuilder;
pub use config::Config;
pub use context::ContextBuilder;
pub use context::GuestCtx;
pub use hostref::Handle;
pub use instance::GuestInstance;
pub use instance::State;
pub use invoke::GuestApi;
pub use invoke::Invokable;
pub use marshal::Lane;
pub use marshal::Word;
pub use runtime::ModuleId;
pub use runtime::Runtime;
pub use schema::Kind;
pub use schema::Signature;
pub use value::HostValue;
pub use value::Value;

#[cfg(test)]
mod tests;
