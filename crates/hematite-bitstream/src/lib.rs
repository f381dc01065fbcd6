//! JPEG XL bitstream reader and container parser for jxl-hematite.
//!
//! [`Bitstream`] reads the raw bits of a codestream, with helpers for every
//! primitive field type the format defines. [`ContainerParser`] recognizes
//! bare codestreams and BMFF-style containers, unwrapping the latter into a
//! contiguous codestream buffer.

mod bitstream;
pub mod container;
mod error;

pub use bitstream::{Bits, Bitstream, Bookmark, U32Spec};
pub use container::{BitstreamKind, ContainerParser};
pub use error::{Error, Result};

/// Header structure that can be read from the bitstream with some context.
pub trait Bundle<Ctx = ()>: Sized {
    type Error;

    fn parse(bitstream: &mut Bitstream, ctx: Ctx) -> std::result::Result<Self, Self::Error>;
}

/// Performs `UnpackSigned`: maps `0, 1, 2, 3, ...` to `0, -1, 1, -2, ...`.
#[inline]
pub fn unpack_signed(x: u32) -> i32 {
    let base = (x >> 1) as i32;
    if x & 1 == 0 {
        base
    } else {
        -base - 1
    }
}

/// `UnpackSigned` for 64-bit fields.
#[inline]
pub fn unpack_signed_u64(x: u64) -> i64 {
    let base = (x >> 1) as i64;
    if x & 1 == 0 {
        base
    } else {
        -base - 1
    }
}

/// A length-prefixed UTF-8 name field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Name(pub String);

impl<Ctx> Bundle<Ctx> for Name {
    type Error = Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        let len = bitstream.read_u32(0, Bits(4), 16 + Bits(5), 48 + Bits(10))?;
        let mut data = Vec::with_capacity(len as usize);
        for _ in 0..len {
            data.push(bitstream.read_bits(8)? as u8);
        }
        let name = String::from_utf8(data).map_err(|_| Error::NonUtf8Name)?;
        Ok(Self(name))
    }
}

impl std::ops::Deref for Name {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpack_signed_alternates() {
        let unpacked: Vec<_> = (0u32..6).map(unpack_signed).collect();
        assert_eq!(unpacked, [0, -1, 1, -2, 2, -3]);
        assert_eq!(unpack_signed_u64(5), -3);
    }
}
