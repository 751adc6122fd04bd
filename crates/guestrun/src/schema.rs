//! # Signatures
//!
//! Host imports and guest exports are described by a small text form:
//!
//! ```text
//! (i32, ref, buf) -> bool
//! () -> ref
//! (ref)
//! ```
//!
//! Each [`Kind`] knows which numeric lanes it occupies. `buf` is the odd one
//! out: two `i32` lanes (pointer, length) as a parameter, one packed `i64`
//! lane as a result.

use std::str::FromStr;

use crate::marshal::Lane;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    UnknownKind(String),
    Malformed(String),
    /// The kind cannot appear in this position.
    Unsupported { name: String, kind: Kind },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownKind(k) => write!(f, "unknown value kind '{}'", k),
            Self::Malformed(text) => write!(f, "malformed signature '{}'", text),
            Self::Unsupported { name, kind } => {
                write!(f, "kind '{}' is not supported for '{}'", kind, name)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    I32,
    I64,
    F32,
    F64,
    Bool,
    /// A host value behind a handle.
    Ref,
    /// Bytes in guest linear memory.
    Buf,
}

impl Kind {
    pub fn param_lanes(self) -> &'static [Lane] {
        match self {
            Kind::I32 | Kind::Bool | Kind::Ref => &[Lane::I32],
            Kind::I64 => &[Lane::I64],
            Kind::F32 => &[Lane::F32],
            Kind::F64 => &[Lane::F64],
            Kind::Buf => &[Lane::I32, Lane::I32],
        }
    }

    pub fn result_lane(self) -> Lane {
        match self {
            Kind::I32 | Kind::Bool | Kind::Ref => Lane::I32,
            Kind::I64 | Kind::Buf => Lane::I64,
            Kind::F32 => Lane::F32,
            Kind::F64 => Lane::F64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::I32 => "i32",
            Kind::I64 => "i64",
            Kind::F32 => "f32",
            Kind::F64 => "f64",
            Kind::Bool => "bool",
            Kind::Ref => "ref",
            Kind::Buf => "buf",
        }
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "i32" => Ok(Kind::I32),
            "i64" => Ok(Kind::I64),
            "f32" => Ok(Kind::F32),
            "f64" => Ok(Kind::F64),
            "bool" => Ok(Kind::Bool),
            "ref" => Ok(Kind::Ref),
            "buf" => Ok(Kind::Buf),
            other => Err(Error::UnknownKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered parameter kinds and an optional result kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    pub params: Vec<Kind>,
    pub result: Option<Kind>,
}

impl Signature {
    pub fn new(params: impl Into<Vec<Kind>>, result: Option<Kind>) -> Self {
        Self {
            params: params.into(),
            result,
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        text.parse()
    }

    /// Flattened parameter lanes, in order.
    pub fn param_lanes(&self) -> Vec<Lane> {
        self.params
            .iter()
            .flat_map(|k| k.param_lanes().iter().copied())
            .collect()
    }

    pub fn result_lanes(&self) -> Vec<Lane> {
        self.result.map(Kind::result_lane).into_iter().collect()
    }

    /// Rejects `kind` anywhere in the signature.
    pub fn forbid(&self, name: &str, kind: Kind) -> Result<()> {
        if self.params.contains(&kind) || self.result == Some(kind) {
            return Err(Error::Unsupported {
                name: name.to_string(),
                kind,
            });
        }
        Ok(())
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let malformed = || Error::Malformed(text.to_string());
        let trimmed = text.trim();

        let (params, result) = match trimmed.split_once("->") {
            Some((params, result)) => (params.trim(), Some(result.trim())),
            None => (trimmed, None),
        };

        let inner = params
            .strip_prefix('(')
            .and_then(|p| p.strip_suffix(')'))
            .ok_or_else(malformed)?;

        let params = if inner.trim().is_empty() {
            Vec::new()
        } else {
            inner
                .split(',')
                .map(|k| {
                    let k = k.trim();
                    if k.is_empty() { Err(malformed()) } else { k.parse() }
                })
                .collect::<Result<Vec<Kind>>>()?
        };

        let result = match result {
            Some("") => return Err(malformed()),
            Some(k) => Some(k.parse()?),
            None => None,
        };

        Ok(Signature { params, result })
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, kind) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", kind)?;
        }
        write!(f, ")")?;
        if let Some(result) = self.result {
            write!(f, " -> {}", result)?;
        }
        Ok(())
    }
}
