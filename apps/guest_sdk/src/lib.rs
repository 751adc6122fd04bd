//! # guest_sdk
//!
//! Guest-side view of the `env` builtins: a [`HostRef`] is the `u32` handle
//! the host gave us, with safe accessors over the raw imports.
//!
//! The host copies strings and byte buffers into guest memory through the
//! exported [`guest_malloc`]. wasi-libc already owns the `malloc` symbol, so
//! hosts running Rust guests configure the allocator name:
//!
//! ```ignore
//! let config = guestrun::Config::new().allocator("guest_malloc");
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use guest_sdk::HostRef;
//!
//! #[no_mangle]
//! pub extern "C" fn update(a: HostRef, b: HostRef) -> HostRef {
//!     let sum: i64 = a.as_string().parse::<i64>().unwrap_or(0)
//!         + b.as_string().parse::<i64>().unwrap_or(0);
//!     HostRef::alloc().set_string(&sum.to_string())
//! }
//! ```

use std::alloc::Layout;

mod sys {
    #[link(wasm_import_module = "env")]
    extern "C" {
        pub fn ref_alloc() -> u32;
        pub fn ref_free(r: u32);
        pub fn ref_set_string(r: u32, ptr: *const u8, len: usize);
        pub fn ref_as_string(r: u32) -> u64;
        pub fn ref_set_bytes(r: u32, ptr: *const u8, len: usize);
        pub fn ref_as_bytes(r: u32) -> u64;
        pub fn ref_set_bool(r: u32, v: bool);
        pub fn ref_as_bool(r: u32) -> bool;
        pub fn ref_set_i32(r: u32, v: i32);
        pub fn ref_as_i32(r: u32) -> i32;
        pub fn ref_set_i64(r: u32, v: i64);
        pub fn ref_as_i64(r: u32) -> i64;
        pub fn ref_set_f32(r: u32, v: f32);
        pub fn ref_as_f32(r: u32) -> f32;
        pub fn ref_set_f64(r: u32, v: f64);
        pub fn ref_as_f64(r: u32) -> f64;
        pub fn value_new() -> u32;
        pub fn value_set(r: u32, key: *const u8, len: usize, v: i64);
        pub fn value_get(r: u32, key: *const u8, len: usize) -> i64;
    }
}

/// Reserves `len` bytes for a buffer the host is about to write.
///
/// Ownership passes to whichever accessor unpacks the buffer.
#[no_mangle]
pub extern "C" fn guest_malloc(len: usize) -> *mut u8 {
    match Layout::array::<u8>(len) {
        Ok(layout) if len > 0 => unsafe { std::alloc::alloc(layout) },
        _ => std::ptr::null_mut(),
    }
}

/// Takes ownership of a packed `(offset, len)` buffer written by the host.
fn take_buffer(packed: u64) -> Vec<u8> {
    let ptr = (packed >> 32) as usize as *mut u8;
    let len = packed as u32 as usize;
    if ptr.is_null() || len == 0 {
        return Vec::new();
    }
    // Allocated by `guest_malloc` with the layout of a `[u8; len]`.
    unsafe { Vec::from_raw_parts(ptr, len, len) }
}

/// A host value held by handle.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HostRef(u32);

impl HostRef {
    /// An empty host slot.
    pub fn alloc() -> Self {
        HostRef(unsafe { sys::ref_alloc() })
    }

    /// A host map from string keys to 64-bit words.
    pub fn map() -> Self {
        HostRef(unsafe { sys::value_new() })
    }

    pub fn from_raw(raw: u32) -> Self {
        HostRef(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    /// Releases the slot. The handle must not be used afterwards.
    pub fn free(self) {
        unsafe { sys::ref_free(self.0) }
    }

    pub fn set_string(self, s: &str) -> Self {
        unsafe { sys::ref_set_string(self.0, s.as_ptr(), s.len()) };
        self
    }

    pub fn as_string(self) -> String {
        let bytes = take_buffer(unsafe { sys::ref_as_string(self.0) });
        String::from_utf8(bytes).unwrap_or_default()
    }

    pub fn set_bytes(self, b: &[u8]) -> Self {
        unsafe { sys::ref_set_bytes(self.0, b.as_ptr(), b.len()) };
        self
    }

    pub fn as_bytes(self) -> Vec<u8> {
        take_buffer(unsafe { sys::ref_as_bytes(self.0) })
    }

    pub fn set_bool(self, v: bool) -> Self {
        unsafe { sys::ref_set_bool(self.0, v) };
        self
    }

    pub fn as_bool(self) -> bool {
        unsafe { sys::ref_as_bool(self.0) }
    }

    pub fn set_i32(self, v: i32) -> Self {
        unsafe { sys::ref_set_i32(self.0, v) };
        self
    }

    pub fn as_i32(self) -> i32 {
        unsafe { sys::ref_as_i32(self.0) }
    }

    pub fn set_i64(self, v: i64) -> Self {
        unsafe { sys::ref_set_i64(self.0, v) };
        self
    }

    pub fn as_i64(self) -> i64 {
        unsafe { sys::ref_as_i64(self.0) }
    }

    pub fn set_f32(self, v: f32) -> Self {
        unsafe { sys::ref_set_f32(self.0, v) };
        self
    }

    pub fn as_f32(self) -> f32 {
        unsafe { sys::ref_as_f32(self.0) }
    }

    pub fn set_f64(self, v: f64) -> Self {
        unsafe { sys::ref_set_f64(self.0, v) };
        self
    }

    pub fn as_f64(self) -> f64 {
        unsafe { sys::ref_as_f64(self.0) }
    }

    /// Stores `v` under `key` in a map created with [`HostRef::map`].
    pub fn insert(self, key: &str, v: i64) -> Self {
        unsafe { sys::value_set(self.0, key.as_ptr(), key.len(), v) };
        self
    }

    /// The word under `key`, or `0` when absent.
    pub fn lookup(self, key: &str) -> i64 {
        unsafe { sys::value_get(self.0, key.as_ptr(), key.len()) }
    }
}
