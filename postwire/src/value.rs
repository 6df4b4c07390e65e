//! Postgres value in text format.
//!
//! Values are decoded by the column type [`Oid`], only a core subset of types is supported:
//!
//! | type                                    | [`Value`]          |
//! |-----------------------------------------|--------------------|
//! | `bool`                                  | [`Value::Bool`]    |
//! | `int2`, `int4`, `int8`, `oid`           | [`Value::Int`]     |
//! | `float4`, `float8`                      | [`Value::Float`]   |
//! | `text`, `varchar`, `bpchar`, `char`, `name` | [`Value::Text`] |
//!
//! Other types are returned as [`Value::Text`], or rejected in strict mode.
use bytes::{Buf, Bytes};
use std::{borrow::Cow, fmt, str::Utf8Error};

use crate::{
    ext::{BindParams, FmtExt},
    postgres::{Oid, pg_type},
};

/// Postgres value.
///
/// [`Value::Null`] is only used for binding parameter,
/// NULL column in a row is [`None`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Returns `true` if value is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Value kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }

    /// Length of the text format, NULL has none.
    pub(crate) fn text_len(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::Text(s) => s.len(),
            _ => self.encode().remaining(),
        }
    }

    /// Encode value in text format.
    pub fn encode(&self) -> Encoded {
        let value = match self {
            Self::Null => return Encoded { value: None },
            Self::Bool(true) => Bytes::from_static(b"t"),
            Self::Bool(false) => Bytes::from_static(b"f"),
            Self::Int(i) => Bytes::copy_from_slice(itoa::Buffer::new().format(*i).as_bytes()),
            Self::Float(f) if f.is_nan() => Bytes::from_static(b"NaN"),
            Self::Float(f) if *f == f64::INFINITY => Bytes::from_static(b"Infinity"),
            Self::Float(f) if *f == f64::NEG_INFINITY => Bytes::from_static(b"-Infinity"),
            Self::Float(f) => Bytes::from(f.to_string()),
            Self::Text(s) => Bytes::copy_from_slice(s.as_bytes()),
        };
        Encoded { value: Some(value) }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => fmt::Display::fmt(b, f),
            Self::Int(i) => fmt::Display::fmt(i, f),
            Self::Float(n) => fmt::Display::fmt(n, f),
            Self::Text(s) => fmt::Display::fmt(s, f),
        }
    }
}

macro_rules! from {
    ($($ty:ty => $pat:pat => $body:expr;)*) => {$(
        impl From<$ty> for Value {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    )*};
}

from! {
    bool => b => Self::Bool(b);
    i16 => i => Self::Int(i.into());
    i32 => i => Self::Int(i.into());
    i64 => i => Self::Int(i);
    f32 => f => Self::Float(f.into());
    f64 => f => Self::Float(f);
    &str => s => Self::Text(s.to_owned());
    String => s => Self::Text(s);
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Self::Null,
        }
    }
}

/// Decode text format value by its type [`Oid`].
///
/// Unknown type is returned as [`Value::Text`] unless `strict` is `true`.
pub fn decode(oid: Oid, value: &[u8], strict: bool) -> Result<Value, TypeDecodeError> {
    use pg_type::*;

    let value = match oid {
        BOOL => match value {
            b"t" => Value::Bool(true),
            b"f" => Value::Bool(false),
            _ => return Err(TypeDecodeError::invalid(oid, value)),
        },
        INT2 => Value::Int(int::<i16>(oid, value)?.into()),
        INT4 => Value::Int(int::<i32>(oid, value)?.into()),
        INT8 => Value::Int(int::<i64>(oid, value)?),
        OID => Value::Int(int::<u32>(oid, value)?.into()),
        FLOAT4 | FLOAT8 => match std::str::from_utf8(value)?.parse() {
            Ok(ok) => Value::Float(ok),
            Err(_) => return Err(TypeDecodeError::invalid(oid, value)),
        },
        TEXT | VARCHAR | BPCHAR | CHAR | NAME => Value::Text(std::str::from_utf8(value)?.to_owned()),
        _ if strict => return Err(TypeDecodeError::UnknownOid(oid)),
        _ => Value::Text(String::from_utf8_lossy(value).into_owned()),
    };

    Ok(value)
}

fn int<I: std::str::FromStr>(oid: Oid, value: &[u8]) -> Result<I, TypeDecodeError> {
    // postgres never emits a sign for positive integers
    if value.first() == Some(&b'+') {
        return Err(TypeDecodeError::invalid(oid, value));
    }
    match std::str::from_utf8(value)?.parse() {
        Ok(ok) => Ok(ok),
        Err(_) => Err(TypeDecodeError::invalid(oid, value)),
    }
}

/// Text format parameter for `Bind` message.
#[derive(Debug, Clone)]
pub struct Encoded {
    value: Option<Bytes>,
}

impl Buf for Encoded {
    fn remaining(&self) -> usize {
        self.value.as_ref().map_or(0, Buf::remaining)
    }

    fn chunk(&self) -> &[u8] {
        match &self.value {
            Some(b) => b.chunk(),
            None => &[],
        }
    }

    fn advance(&mut self, cnt: usize) {
        if let Some(b) = &mut self.value {
            b.advance(cnt);
        }
    }
}

impl BindParams for Encoded {
    fn size(&self) -> i32 {
        match &self.value {
            // parameter larger than 2GB is rejected by server anyway
            Some(b) => i32::try_from(b.len()).unwrap_or(i32::MAX),
            None => -1,
        }
    }
}

/// An error when decoding value.
#[derive(Debug, thiserror::Error)]
pub enum TypeDecodeError {
    /// Column type is not supported in strict mode.
    #[error("unsupported column type oid {0}")]
    UnknownOid(Oid),
    /// Value is not valid for its type.
    #[error("invalid {ty} value: {value:?}")]
    Invalid {
        ty: &'static str,
        value: String,
    },
    /// Text value is not valid utf8.
    #[error("non utf8 value: {0}")]
    Utf8(#[from] Utf8Error),
    /// Column requested not found.
    #[error("column not found: {0:?}")]
    ColumnNotFound(Cow<'static, str>),
    /// Column is NULL.
    #[error("unexpected NULL value")]
    Null,
    /// Value kind cannot be converted into requested type.
    #[error("cannot decode {found} value as {expect}")]
    Mismatch {
        expect: &'static str,
        found: &'static str,
    },
    /// Integer does not fit in requested type.
    #[error("integer {0} out of range for {1}")]
    OutOfRange(i64, &'static str),
}

impl TypeDecodeError {
    fn invalid(oid: Oid, value: &[u8]) -> Self {
        Self::Invalid {
            ty: pg_type::type_name(oid).unwrap_or("unknown"),
            value: value.lossy().to_string(),
        }
    }
}
