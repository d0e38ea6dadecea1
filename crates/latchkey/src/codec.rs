//! Payload encoding for session values.
//!
//! Values are stored as a JSON object. An empty value map encodes to an empty
//! payload, and an empty payload decodes to an empty map, so backends can store
//! NULL for sessions that were created but never populated.

use std::collections::HashMap;
use std::io;

use serde_json::Value;
use zeroize::Zeroize;

use crate::error::Result;

/// Session values keyed by name.
pub type Values = HashMap<String, Value>;

/// Append the encoded form of `values` to `buf`.
pub fn encode_into(values: &Values, buf: &mut Vec<u8>) -> Result<()> {
    if values.is_empty() {
        return Ok(());
    }
    serde_json::to_writer(WipingWriter { buf }, values)?;
    Ok(())
}

/// Smallest allocation made when an empty buffer first grows.
const MIN_GROWTH: usize = 256;

/// Appends to a buffer, moving to a larger allocation by hand when full so
/// the outgrown one is wiped instead of freed with payload bytes in it.
struct WipingWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl io::Write for WipingWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let needed = self
            .buf
            .len()
            .checked_add(data.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::OutOfMemory, "payload too large"))?;
        if needed > self.buf.capacity() {
            drop(grow(self.buf, needed));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Move `buf` into an allocation of at least `needed` bytes, returning the old
/// allocation wiped over its full capacity.
fn grow(buf: &mut Vec<u8>, needed: usize) -> Vec<u8> {
    let capacity = needed
        .max(buf.capacity().saturating_mul(2))
        .max(MIN_GROWTH);
    let mut grown = Vec::with_capacity(capacity);
    grown.extend_from_slice(buf);
    let mut old = std::mem::replace(buf, grown);
    old.zeroize();
    old
}

/// Decode a payload produced by [`encode_into`].
pub fn decode(payload: &[u8]) -> Result<Values> {
    if payload.is_empty() {
        return Ok(Values::new());
    }
    Ok(serde_json::from_slice(payload)?)
}
