//! Decoding of CBOR bytes into serde types.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use std::io::Cursor;

/// Decodes exactly one CBOR item from `bytes`.
///
/// # Errors
///
/// Returns an error if the input is empty, malformed, does not match `T`,
/// or carries bytes after the first item.
pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    if bytes.is_empty() {
        return Err(CodecError::UnexpectedEof);
    }

    let mut cursor = Cursor::new(bytes);
    let value = ciborium::de::from_reader(&mut cursor)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;

    let consumed = usize::try_from(cursor.position()).unwrap_or(bytes.len());
    if consumed < bytes.len() {
        return Err(CodecError::TrailingBytes {
            remaining: bytes.len() - consumed,
        });
    }

    Ok(value)
}
