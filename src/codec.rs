//! Value serialization seam.
//!
//! The wire protocol carries an opaque byte payload plus a 16-bit flags
//! field; what those bytes mean is intentionally outside this crate's
//! scope. [`ValueCodec`] is the boundary a caller crosses to plug in their
//! own serialization (JSON, bincode, raw bytes, whatever), and
//! [`IdentityCodec`] is the trivial default for callers who just want bytes
//! in, bytes out.

use crate::error::{Error, Result};

/// Converts between a caller's value type and the `(bytes, flags)` pair
/// that actually goes over the wire.
pub trait ValueCodec<T> {
    /// Serializes `value` into its wire bytes and the flags word stored
    /// alongside it.
    fn encode(&self, value: &T) -> Result<(Vec<u8>, u16)>;

    /// Reconstructs a value from wire bytes and the flags word the server
    /// returned with them.
    fn decode(&self, bytes: &[u8], flags: u16) -> Result<T>;
}

/// A codec that treats the value as already being exactly the wire bytes.
/// Flags round-trip unchanged but are never inspected.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl ValueCodec<Vec<u8>> for IdentityCodec {
    fn encode(&self, value: &Vec<u8>) -> Result<(Vec<u8>, u16)> {
        Ok((value.clone(), 0))
    }

    fn decode(&self, bytes: &[u8], _flags: u16) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

impl ValueCodec<String> for IdentityCodec {
    fn encode(&self, value: &String) -> Result<(Vec<u8>, u16)> {
        Ok((value.clone().into_bytes(), 0))
    }

    fn decode(&self, bytes: &[u8], _flags: u16) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::ProtocolError("value was not valid utf-8".into()))
    }
}
