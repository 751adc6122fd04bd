//! # hostref
//!
//! A slot table that hands out small integer handles for values the host owns
//! but a Wasm guest needs to refer to.
//!
//! ## Philosophy
//!
//! - **Zero is null**: handles are `slot + 1`, so a guest can always use `0`
//!   to mean "no reference".
//! - **LIFO reuse**: released slots go on a stack and the most recently freed
//!   slot is handed out first.
//! - **Grow only**: capacity doubles when the table is full and never shrinks.
//!   Every handle issued before a resize stays valid after it.
//!
//! The table is not synchronized. One table belongs to one guest instance.

pub mod handle;
pub mod table;

pub use handle::Handle;
pub use table::Error;
pub use table::HandleTable;
pub use table::Result;
pub use table::MIN_CAPACITY;

#[cfg(test)]
mod tests;
