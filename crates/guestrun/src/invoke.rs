//! # Typed guest exports
//!
//! An [`Invokable`] pairs a guest export name with the [`Signature`] the host
//! expects it to have. Calling one through
//! [`GuestInstance::invoke`](crate::GuestInstance::invoke) marshals
//! [`Value`]s in and out:
//!
//! - `ref` arguments are registered in the instance's handle table. The guest
//!   owns those handles from then on and releases them with `ref_free`. If
//!   the call fails they are released by the host.
//! - `ref` results are taken out of the table: the guest hands the handle
//!   over and the slot is freed.
//! - `buf` is rejected at declaration: a guest export cannot hand the host a
//!   pointer into memory the host did not allocate.

use std::collections::HashMap;

use crate::instance;
use crate::instance::GuestInstance;
use crate::schema;
use crate::schema::Kind;
use crate::schema::Signature;
use crate::value::Value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invokable {
    name: String,
    signature: Signature,
}

impl Invokable {
    pub fn new(name: impl Into<String>, signature: Signature) -> schema::Result<Self> {
        let name = name.into();
        signature.forbid(&name, Kind::Buf)?;
        Ok(Self { name, signature })
    }

    /// Parses `signature` and declares an export with it.
    ///
    /// ```
    /// # use guestrun::Invokable;
    /// let operation = Invokable::declare("operation", "(i32, i32) -> i32")?;
    /// assert_eq!(operation.signature().to_string(), "(i32, i32) -> i32");
    /// # Ok::<(), guestrun::schema::Error>(())
    /// ```
    pub fn declare(name: impl Into<String>, signature: &str) -> schema::Result<Self> {
        Self::new(name, signature.parse()?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Checks argument count and kinds before anything touches the guest.
    pub(crate) fn check_args(&self, args: &[Value]) -> instance::Result<()> {
        if args.len() != self.signature.params.len() {
            return Err(instance::Error::Arity {
                export: self.name.clone(),
                expected: self.signature.params.len(),
                found: args.len(),
            });
        }
        for (index, (arg, kind)) in args.iter().zip(&self.signature.params).enumerate() {
            if arg.kind() != *kind {
                return Err(instance::Error::Argument {
                    index,
                    expected: *kind,
                    found: arg.kind(),
                });
            }
        }
        Ok(())
    }
}

/// A table of guest exports the host knows how to call.
#[derive(Clone, Debug, Default)]
pub struct GuestApi {
    exports: HashMap<String, Invokable>,
}

impl GuestApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(mut self, name: &str, signature: &str) -> schema::Result<Self> {
        let invokable = Invokable::declare(name, signature)?;
        self.exports.insert(invokable.name.clone(), invokable);
        Ok(self)
    }

    pub fn with(mut self, invokable: Invokable) -> Self {
        self.exports.insert(invokable.name.clone(), invokable);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Invokable> {
        self.exports.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }

    pub fn invoke(
        &self,
        instance: &mut GuestInstance,
        name: &str,
        args: &[Value],
    ) -> instance::Result<Option<Value>> {
        let invokable = self
            .get(name)
            .ok_or_else(|| instance::Error::Undeclared(name.to_string()))?;
        instance.invoke(invokable, args)
    }
}
