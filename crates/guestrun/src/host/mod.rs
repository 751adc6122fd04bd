//! # Built-in host functions
//!
//! Installed under the `env` namespace on every instance unless the builder
//! opts out. Guests use them to create, fill, read and release handles
//! without the embedder writing a single import.
//!
//! Every builtin takes the handle as a plain `i32` so that it can mutate or
//! release the slot itself rather than a copy of its value.

pub mod map;
pub mod refs;

use hostref::Handle;

use crate::bridge::Args;
use crate::bridge::HostFunc;
use crate::bridge::Violation;

/// Import namespace of the builtins.
pub const NAMESPACE: &str = "env";

/// All builtins, handle accessors first.
pub fn builtins() -> Vec<HostFunc> {
    let mut funcs = refs::funcs();
    funcs.extend(map::funcs());
    funcs
}

fn handle_arg(args: &Args, index: usize) -> Result<Handle, Violation> {
    Ok(Handle(args.i32(index)? as u32))
}
