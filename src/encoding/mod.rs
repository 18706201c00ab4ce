//! Binary wire format for everything the store persists.
//!
//! Table headers and sparse-index cells, embedding-log entries, and the
//! HNSW snapshot files all share this one hand-owned encoding, so a
//! dependency bump can never silently reshape the bytes on disk. The
//! format is deliberately boring:
//!
//! - integers and floats are fixed-width **little-endian** (`u8`,
//!   `u32`, `u64`; `f32` travels as its raw IEEE-754 bits, so the
//!   embedding-log tombstone sentinel of `f32::MAX` components survives
//!   a round trip bit-exactly),
//! - `bool` is one byte, `0x00` or `0x01`, nothing else,
//! - `[u8; N]` is written raw — its width is known from context,
//! - `Vec<u8>` carries a `u32` length prefix,
//! - records encode field after field; counted sequences of records go
//!   through [`encode_vec`] / [`decode_vec`] with a `u32` count prefix.
//!
//! Fixed-layout records (the 32-byte table header, one embedding-log
//! entry) skip prefixes entirely and rely on the layout being agreed
//! on both sides.
//!
//! # Decoding untrusted bytes
//!
//! Decoders assume their input may be damaged. A length or count prefix
//! is validated against [`MAX_BLOB_BYTES`] / [`MAX_SEQ_ITEMS`] *before*
//! anything is allocated, so a corrupted-but-plausible file surfaces as
//! an [`EncodingError`] instead of an allocation failure. Running out
//! of input mid-value is [`EncodingError::ShortBuffer`]. Nothing in
//! this module panics.
//!
//! Every decoder returns `(value, bytes_consumed)` so callers can walk
//! a buffer of back-to-back values with a running offset.

#[cfg(test)]
mod tests;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Decoder limits
// ------------------------------------------------------------------------------------------------

/// Ceiling for a single length-prefixed byte blob (256 MiB). A prefix
/// above this is treated as damage, not as a reason to allocate.
pub const MAX_BLOB_BYTES: u32 = 256 * 1024 * 1024;

/// Ceiling for the element count of a decoded record sequence (16 M).
pub const MAX_SEQ_ITEMS: u32 = 16 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Errors
// ------------------------------------------------------------------------------------------------

/// Failures while reading or writing the wire format.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The input ended before the value did.
    #[error("buffer too short: wanted {wanted} more bytes, {remaining} remain")]
    ShortBuffer {
        /// Bytes the decoder still needed.
        wanted: usize,
        /// Bytes actually left in the buffer.
        remaining: usize,
    },

    /// A bool byte held something other than `0x00` or `0x01`.
    #[error("0x{0:02X} is not a bool")]
    BadBool(u8),

    /// A length or count was implausibly large — either a decoded
    /// prefix over its cap, or a value too big to encode at all.
    #[error("{what} of {got} exceeds the limit of {cap}")]
    LimitExceeded {
        /// What kind of quantity overflowed.
        what: &'static str,
        /// The offending size.
        got: u64,
        /// The limit it broke.
        cap: u64,
    },
}

// ------------------------------------------------------------------------------------------------
// Traits
// ------------------------------------------------------------------------------------------------

/// Appends the wire representation of `self` to a buffer.
///
/// Output must be deterministic — equal values, equal bytes — since
/// on-disk comparisons (the embedding-log tombstone check, snapshot
/// round trips) depend on it. The only value that cannot encode is a
/// byte blob longer than `u32::MAX`, whose length prefix would not fit.
pub trait Encode {
    /// Write `self` onto the end of `buf`.
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Reads one value from the front of a byte slice.
pub trait Decode: Sized {
    /// Decode a value starting at `buf[0]`, returning it together with
    /// how many bytes it occupied.
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

// ------------------------------------------------------------------------------------------------
// Convenience entry points
// ------------------------------------------------------------------------------------------------

/// Encodes `value` into a new buffer.
pub fn encode_to_vec<T: Encode>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

/// Decodes one `T` from the front of `buf`, returning `(value, consumed)`.
pub fn decode_from_slice<T: Decode>(buf: &[u8]) -> Result<(T, usize), EncodingError> {
    T::decode_from(buf)
}

// ------------------------------------------------------------------------------------------------
// Internal helpers
// ------------------------------------------------------------------------------------------------

/// Copies the next `N` bytes out of `buf`, or reports how short it fell.
#[inline]
fn take<const N: usize>(buf: &[u8]) -> Result<[u8; N], EncodingError> {
    if buf.len() < N {
        return Err(EncodingError::ShortBuffer {
            wanted: N,
            remaining: buf.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[..N]);
    Ok(out)
}

/// Narrows a host length to the `u32` prefix width.
#[inline]
fn prefix_len(len: usize) -> Result<u32, EncodingError> {
    u32::try_from(len).map_err(|_| EncodingError::LimitExceeded {
        what: "encoded length",
        got: len as u64,
        cap: u64::from(u32::MAX),
    })
}

// ------------------------------------------------------------------------------------------------
// Fixed-width numbers
// ------------------------------------------------------------------------------------------------

macro_rules! wire_fixed {
    ($($ty:ty),* $(,)?) => {$(
        impl Encode for $ty {
            #[inline]
            fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
                buf.extend_from_slice(&self.to_le_bytes());
                Ok(())
            }
        }

        impl Decode for $ty {
            #[inline]
            fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                let raw = take::<WIDTH>(buf)?;
                Ok((<$ty>::from_le_bytes(raw), WIDTH))
            }
        }
    )*};
}

wire_fixed!(u32, u64, f32);

impl Encode for u8 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(*self);
        Ok(())
    }
}

impl Decode for u8 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let [byte] = take::<1>(buf)?;
        Ok((byte, 1))
    }
}

// ------------------------------------------------------------------------------------------------
// bool — a strict 0x00 / 0x01 byte
// ------------------------------------------------------------------------------------------------

impl Encode for bool {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(*self as u8);
        Ok(())
    }
}

impl Decode for bool {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        match u8::decode_from(buf)? {
            (0, n) => Ok((false, n)),
            (1, n) => Ok((true, n)),
            (other, _) => Err(EncodingError::BadBool(other)),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Raw fixed-size byte arrays — width agreed out of band
// ------------------------------------------------------------------------------------------------

impl<const N: usize> Encode for [u8; N] {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl<const N: usize> Decode for [u8; N] {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((take::<N>(buf)?, N))
    }
}

// ------------------------------------------------------------------------------------------------
// Length-prefixed byte blobs
// ------------------------------------------------------------------------------------------------

impl Encode for Vec<u8> {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        prefix_len(self.len())?.encode_to(buf)?;
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl Decode for Vec<u8> {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (len, head) = u32::decode_from(buf)?;
        if len > MAX_BLOB_BYTES {
            return Err(EncodingError::LimitExceeded {
                what: "byte blob length",
                got: u64::from(len),
                cap: u64::from(MAX_BLOB_BYTES),
            });
        }
        let len = len as usize;
        let body = &buf[head..];
        if body.len() < len {
            return Err(EncodingError::ShortBuffer {
                wanted: len,
                remaining: body.len(),
            });
        }
        Ok((body[..len].to_vec(), head + len))
    }
}

// ------------------------------------------------------------------------------------------------
// Counted record sequences
//
// `Vec<u8>` above is raw bytes; a generic `impl for Vec<T>` would
// collide with it under the coherence rules, so sequences of records
// use these free functions instead.
// ------------------------------------------------------------------------------------------------

/// Writes `items` as a `u32` count followed by each record in order.
pub fn encode_vec<T: Encode>(items: &[T], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    prefix_len(items.len())?.encode_to(buf)?;
    for item in items {
        item.encode_to(buf)?;
    }
    Ok(())
}

/// Reads a counted sequence written by [`encode_vec`].
///
/// The count is checked against [`MAX_SEQ_ITEMS`] before the output
/// vector is sized.
pub fn decode_vec<T: Decode>(buf: &[u8]) -> Result<(Vec<T>, usize), EncodingError> {
    let (count, mut offset) = u32::decode_from(buf)?;
    if count > MAX_SEQ_ITEMS {
        return Err(EncodingError::LimitExceeded {
            what: "record count",
            got: u64::from(count),
            cap: u64::from(MAX_SEQ_ITEMS),
        });
    }
    let count = count as usize;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let (item, consumed) = T::decode_from(&buf[offset..])?;
        offset += consumed;
        items.push(item);
    }
    Ok((items, offset))
}
