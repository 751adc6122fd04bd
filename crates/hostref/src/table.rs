//! # Handle table
//!
//! Slots live in a `Vec<Option<T>>` whose length is the table capacity.
//! `count` is the high-water mark: slots below it have been handed out at
//! least once, slots above it have never been touched. Released slots are
//! pushed on `free` and popped before any fresh slot is used.

use crate::handle::Handle;

/// Capacity of a table created with [`HandleTable::new`].
pub const MIN_CAPACITY: usize = 8;

/// Handle table errors.
///
/// The runtime treats every one of these as a protocol violation: a guest
/// (or host) presented a handle the table never issued or already released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The null handle was dereferenced.
    Null,
    /// The handle names a slot that was never handed out.
    OutOfRange { handle: Handle, issued: usize },
    /// The handle names a slot that has been released.
    Vacant(Handle),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Null => write!(f, "null handle dereferenced"),
            Error::OutOfRange { handle, issued } => {
                write!(f, "handle {} out of range ({} slots issued)", handle, issued)
            }
            Error::Vacant(handle) => write!(f, "handle {} refers to a released slot", handle),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Maps nonzero handles to owned values.
pub struct HandleTable<T> {
    slots: Vec<Option<T>>,
    count: usize,
    free: Vec<usize>,
    live: usize,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }

    /// Creates a table with room for `capacity` values before the first resize.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            count: 0,
            free: Vec::new(),
            live: 0,
        }
    }

    /// Stores `value` and returns a fresh handle for it.
    ///
    /// Reuses the most recently released slot if there is one, otherwise
    /// takes the next untouched slot, doubling the capacity when full.
    pub fn register(&mut self, value: T) -> Handle {
        let slot = match self.free.pop() {
            Some(slot) => {
                debug_assert!(self.slots[slot].is_none(), "free-list slot still occupied");
                slot
            }
            None => {
                if self.count == self.slots.len() {
                    self.grow();
                }
                self.count += 1;
                self.count - 1
            }
        };

        self.slots[slot] = Some(value);
        self.live += 1;
        Handle::from_slot(slot)
    }

    /// Releases `handle` and returns the value it held.
    ///
    /// The slot becomes the next one [`register`](Self::register) hands out.
    /// Freeing a handle twice fails with [`Error::Vacant`] and leaves the
    /// free-list untouched.
    pub fn free(&mut self, handle: Handle) -> Result<T> {
        let slot = self.slot(handle)?;
        let value = self.slots[slot].take().ok_or(Error::Vacant(handle))?;
        self.free.push(slot);
        self.live -= 1;
        Ok(value)
    }

    pub fn get(&self, handle: Handle) -> Result<&T> {
        let slot = self.slot(handle)?;
        self.slots[slot].as_ref().ok_or(Error::Vacant(handle))
    }

    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut T> {
        let slot = self.slot(handle)?;
        self.slots[slot].as_mut().ok_or(Error::Vacant(handle))
    }

    /// Overwrites the value behind a live handle in place.
    pub fn set(&mut self, handle: Handle, value: T) -> Result<()> {
        self.replace(handle, value).map(|_| ())
    }

    /// Overwrites the value behind a live handle, returning the old one.
    pub fn replace(&mut self, handle: Handle, value: T) -> Result<T> {
        let current = self.get_mut(handle)?;
        Ok(std::mem::replace(current, value))
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_ok()
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots currently allocated. Only ever grows.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterates over live values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots[..self.count]
            .iter()
            .enumerate()
            .filter_map(|(slot, value)| value.as_ref().map(|v| (Handle::from_slot(slot), v)))
    }

    fn slot(&self, handle: Handle) -> Result<usize> {
        let slot = handle.slot().ok_or(Error::Null)?;
        if slot >= self.count {
            return Err(Error::OutOfRange {
                handle,
                issued: self.count,
            });
        }
        Ok(slot)
    }

    fn grow(&mut self) {
        let capacity = (self.slots.len() * 2).max(MIN_CAPACITY);
        self.slots.resize_with(capacity, || None);
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
