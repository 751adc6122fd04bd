//! # Marshaling protocol
//!
//! Every value that crosses the guest boundary travels as a 64-bit word.
//!
//! ## Rules
//!
//! - **Integers**: `i32` is sign-extended into the word and truncated on the
//!   way back. `i64` passes unchanged.
//! - **Booleans**: `0`/`1` on the way in, `word > 0` on the way out.
//! - **Floats**: the IEEE bits are reinterpreted into the word, never value
//!   converted. NaN payloads and negative zero survive the round trip.
//! - **Handles**: the raw `u32` of the handle in an `i32` lane.
//! - **Buffers**: copied into guest memory through the guest's allocator and
//!   returned as one packed word: offset in the upper 32 bits, length in the
//!   lower 32 bits.

use hostref::Handle;
use wasmtime::AsContext;
use wasmtime::AsContextMut;
use wasmtime::Func;
use wasmtime::FuncType;
use wasmtime::Memory;
use wasmtime::Val;
use wasmtime::ValType;

/// One untyped value on the boundary.
pub type Word = i64;

#[derive(Debug)]
pub enum Error {
    /// The guest does not export a function or memory the host needs.
    MissingExport(String),
    /// A read or write fell outside guest linear memory.
    OutOfBounds { offset: u32, len: u32 },
    /// Bytes loaded from the guest were not valid UTF-8.
    InvalidUtf8 { offset: u32, len: u32 },
    /// The engine produced or expected a non-numeric value.
    UnsupportedLane(String),
    /// The guest trapped while running its allocator.
    Guest(wasmtime::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingExport(name) => write!(f, "guest does not export '{}'", name),
            Self::OutOfBounds { offset, len } => {
                write!(f, "guest memory access out of bounds: {} bytes at {:#x}", len, offset)
            }
            Self::InvalidUtf8 { offset, len } => {
                write!(f, "invalid UTF-8 in {} bytes at {:#x}", len, offset)
            }
            Self::UnsupportedLane(ty) => write!(f, "unsupported value type on the boundary: {}", ty),
            Self::Guest(e) => write!(f, "guest allocator failed: {}", e),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
//  SCALARS
// ============================================================================

pub fn from_i32(v: i32) -> Word {
    v as Word
}

pub fn to_i32(w: Word) -> i32 {
    w as i32
}

pub fn from_i64(v: i64) -> Word {
    v
}

pub fn to_i64(w: Word) -> i64 {
    w
}

pub fn from_bool(v: bool) -> Word {
    if v { 1 } else { 0 }
}

pub fn to_bool(w: Word) -> bool {
    w > 0
}

pub fn from_f32(v: f32) -> Word {
    v.to_bits() as Word
}

pub fn to_f32(w: Word) -> f32 {
    f32::from_bits(w as u32)
}

pub fn from_f64(v: f64) -> Word {
    v.to_bits() as Word
}

pub fn to_f64(w: Word) -> f64 {
    f64::from_bits(w as u64)
}

pub fn from_handle(h: Handle) -> Word {
    h.raw() as Word
}

pub fn to_handle(w: Word) -> Handle {
    Handle(w as u32)
}

/// Packs a guest memory region into one word: offset high, length low.
pub fn pack(offset: u32, len: u32) -> Word {
    (((offset as u64) << 32) | len as u64) as Word
}

/// Splits a packed word back into `(offset, len)`.
pub fn unpack(w: Word) -> (u32, u32) {
    let bits = w as u64;
    ((bits >> 32) as u32, bits as u32)
}

// ============================================================================
//  LANES
// ============================================================================

/// A numeric Wasm parameter or result slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lane {
    I32,
    I64,
    F32,
    F64,
}

impl Lane {
    pub fn of(ty: &ValType) -> Option<Lane> {
        match ty {
            ValType::I32 => Some(Lane::I32),
            ValType::I64 => Some(Lane::I64),
            ValType::F32 => Some(Lane::F32),
            ValType::F64 => Some(Lane::F64),
            _ => None,
        }
    }

    pub fn val_type(self) -> ValType {
        match self {
            Lane::I32 => ValType::I32,
            Lane::I64 => ValType::I64,
            Lane::F32 => ValType::F32,
            Lane::F64 => ValType::F64,
        }
    }

    /// Places a word in this lane. Floats are carried as raw bits.
    pub fn to_val(self, w: Word) -> Val {
        match self {
            Lane::I32 => Val::I32(w as i32),
            Lane::I64 => Val::I64(w),
            Lane::F32 => Val::F32(w as u32),
            Lane::F64 => Val::F64(w as u64),
        }
    }

    fn zero(self) -> Val {
        self.to_val(0)
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::I32 => write!(f, "i32"),
            Lane::I64 => write!(f, "i64"),
            Lane::F32 => write!(f, "f32"),
            Lane::F64 => write!(f, "f64"),
        }
    }
}

/// Takes a numeric engine value out of its lane.
pub fn from_val(val: &Val) -> Result<Word> {
    match val {
        Val::I32(v) => Ok(from_i32(*v)),
        Val::I64(v) => Ok(*v),
        Val::F32(bits) => Ok(*bits as Word),
        Val::F64(bits) => Ok(*bits as Word),
        other => Err(Error::UnsupportedLane(format!("{:?}", other))),
    }
}

fn lanes(tys: impl Iterator<Item = ValType>) -> Result<Vec<Lane>> {
    tys.map(|ty| Lane::of(&ty).ok_or_else(|| Error::UnsupportedLane(ty.to_string())))
        .collect()
}

/// Lanes of a function's parameters and results.
pub fn lanes_of(ty: &FuncType) -> Result<(Vec<Lane>, Vec<Lane>)> {
    Ok((lanes(ty.params())?, lanes(ty.results())?))
}

/// Calls `func` with positional words and collects its results as words.
///
/// The caller is responsible for checking the argument count against the
/// function type first.
pub(crate) fn call_func(
    mut store: impl AsContextMut,
    func: Func,
    args: &[Word],
) -> std::result::Result<Vec<Word>, wasmtime::Error> {
    let (params, results) = lanes_of(&func.ty(&store))?;

    let params: Vec<Val> = params
        .iter()
        .zip(args)
        .map(|(lane, word)| lane.to_val(*word))
        .collect();
    let mut out: Vec<Val> = results.iter().map(|lane| lane.zero()).collect();

    func.call(&mut store, &params, &mut out)?;

    let words = out.iter().map(from_val).collect::<Result<Vec<_>>>()?;
    Ok(words)
}

// ============================================================================
//  GUEST MEMORY
// ============================================================================

/// The slice of the execution engine the marshaling layer depends on.
///
/// Implemented over a live host call and over an idle instance, so the same
/// buffer code runs whether the host is answering the guest or driving it.
pub trait GuestMemory {
    /// Copies `len` bytes out of linear memory at `offset`.
    fn read(&mut self, offset: u32, len: u32) -> Result<Vec<u8>>;

    /// Copies `bytes` into linear memory at `offset`.
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<()>;

    /// Reserves `len` bytes through the guest's exported allocator.
    fn alloc(&mut self, len: u32) -> Result<u32>;
}

pub(crate) fn read_memory(
    store: impl AsContext,
    memory: Memory,
    offset: u32,
    len: u32,
) -> Result<Vec<u8>> {
    let start = offset as usize;
    let end = start
        .checked_add(len as usize)
        .ok_or(Error::OutOfBounds { offset, len })?;
    memory
        .data(&store)
        .get(start..end)
        .map(<[u8]>::to_vec)
        .ok_or(Error::OutOfBounds { offset, len })
}

pub(crate) fn write_memory(
    store: impl AsContextMut,
    memory: Memory,
    offset: u32,
    bytes: &[u8],
) -> Result<()> {
    memory
        .write(store, offset as usize, bytes)
        .map_err(|_| Error::OutOfBounds {
            offset,
            len: bytes.len() as u32,
        })
}

/// Runs the guest allocator export, which must be `(i32) -> i32`.
pub(crate) fn call_alloc(mut store: impl AsContextMut, func: Func, name: &str, len: u32) -> Result<u32> {
    let alloc = func
        .typed::<i32, i32>(&store)
        .map_err(|_| Error::MissingExport(name.to_string()))?;
    let ptr = alloc.call(&mut store, len as i32).map_err(Error::Guest)?;
    Ok(ptr as u32)
}

/// Copies `bytes` into the guest and returns the packed `(offset, len)` word.
///
/// Empty buffers are not allocated; they come back as packed `0`, which the
/// guest reads as a null pointer with zero length.
pub fn materialize(mem: &mut impl GuestMemory, bytes: &[u8]) -> Result<Word> {
    if bytes.is_empty() {
        return Ok(pack(0, 0));
    }
    let len = u32::try_from(bytes.len()).map_err(|_| Error::OutOfBounds {
        offset: 0,
        len: u32::MAX,
    })?;
    let offset = mem.alloc(len)?;
    // A null block would alias the empty-buffer encoding.
    if offset == 0 {
        return Err(Error::OutOfBounds { offset, len });
    }
    mem.write(offset, bytes)?;
    Ok(pack(offset, len))
}

pub fn load_bytes(mem: &mut impl GuestMemory, offset: u32, len: u32) -> Result<Vec<u8>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    mem.read(offset, len)
}

pub fn load_string(mem: &mut impl GuestMemory, offset: u32, len: u32) -> Result<String> {
    let bytes = load_bytes(mem, offset, len)?;
    String::from_utf8(bytes).map_err(|_| Error::InvalidUtf8 { offset, len })
}
