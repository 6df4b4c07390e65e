use bytes::{Buf, BufMut, Bytes};

use crate::common::ByteStr;

/// Integer signess in postgres docs is awful.
pub trait UsizeExt {
    /// Length is `usize` in rust, while sometime postgres want `u32`,
    /// this will panic when overflow instead of wrapping.
    fn to_u32(self) -> u32;
    /// Length is `usize` in rust, while sometime postgres want `u16`,
    /// this will panic when overflow instead of wrapping.
    fn to_u16(self) -> u16;
}

/// Nul string operation.
pub trait StrExt {
    /// String length plus nul (1).
    fn nul_string_len(&self) -> u32;
}

/// Nul string operation in [`BufMut`]
pub trait BufMutExt {
    /// Write string and nul termination.
    fn put_nul_string(&mut self, string: &str);
}

/// Nul string operation in [`Bytes`]
pub trait BytesExt {
    /// Try to read nul terminated string.
    ///
    /// Returns [`None`] if no nul terminator found or string is not valid utf8,
    /// in which case `self` is left untouched.
    ///
    /// Using [`ByteStr`] avoid allocating [`Vec`] as it required for [`String::from_utf8`]
    fn get_nul_bytestr(&mut self) -> Option<ByteStr>;
}

/// Bounds checked integer reads.
///
/// [`Buf::get_u32`] and friends panic on short buffer, server input should never panic.
pub trait BufExt: Buf {
    /// Returns [`None`] when remaining is less than 1 byte.
    fn checked_u8(&mut self) -> Option<u8>;
    /// Returns [`None`] when remaining is less than 2 bytes.
    fn checked_u16(&mut self) -> Option<u16>;
    /// Returns [`None`] when remaining is less than 2 bytes.
    fn checked_i16(&mut self) -> Option<i16>;
    /// Returns [`None`] when remaining is less than 4 bytes.
    fn checked_u32(&mut self) -> Option<u32>;
    /// Returns [`None`] when remaining is less than 4 bytes.
    fn checked_i32(&mut self) -> Option<i32>;
}

/// Helper trait for efficient operation on [`Bind`][crate::postgres::frontend::Bind] message.
pub trait BindParams: Buf {
    /// The length of the parameter value, in bytes (this count does not include itself).
    ///
    /// Can be zero. As a special case, -1 indicates a NULL parameter value.
    /// No value bytes follow in the NULL case.
    fn size(&self) -> i32;
}

/// Helper trait to [`Display`][std::fmt::Display] bytes.
pub trait FmtExt {
    /// Lossy [`Display`][std::fmt::Display] bytes.
    fn lossy(&self) -> LossyFmt<'_>;
}

/// Lossy [`Display`][std::fmt::Display] implementation for bytes.
pub struct LossyFmt<'a>(pub &'a [u8]);

impl UsizeExt for usize {
    fn to_u32(self) -> u32 {
        self.try_into().expect("message size too large for protocol")
    }

    fn to_u16(self) -> u16 {
        self.try_into().expect("message size too large for protocol")
    }
}

impl StrExt for str {
    fn nul_string_len(&self) -> u32 {
        self.len().to_u32() + 1/* nul */
    }
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

macro_rules! checked {
    ($($name:ident => $get:ident -> $ty:ty;)*) => {$(
        fn $name(&mut self) -> Option<$ty> {
            if self.remaining() < size_of::<$ty>() {
                return None;
            }
            Some(self.$get())
        }
    )*};
}

impl<B: Buf> BufExt for B {
    checked! {
        checked_u8 => get_u8 -> u8;
        checked_u16 => get_u16 -> u16;
        checked_i16 => get_i16 -> i16;
        checked_u32 => get_u32 -> u32;
        checked_i32 => get_i32 -> i32;
    }
}

impl BytesExt for Bytes {
    fn get_nul_bytestr(&mut self) -> Option<ByteStr> {
        let end = self.iter().position(|e| matches!(e, b'\0'))?;
        let string = ByteStr::from_utf8(self.slice(..end)).ok()?;
        Buf::advance(self, end + 1);
        Some(string)
    }
}

impl FmtExt for [u8] {
    fn lossy(&self) -> LossyFmt<'_> {
        LossyFmt(self)
    }
}

impl std::fmt::Display for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &b in self.0 {
            if b.is_ascii_graphic() || b.is_ascii_whitespace() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:x}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b\"{self}\"")
    }
}
