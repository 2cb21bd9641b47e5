//! Encoding of serde types to CBOR bytes.

use crate::error::{CodecError, CodecResult};
use serde::Serialize;

/// Encodes a value to CBOR bytes.
///
/// Output is a pure function of the value's serde representation. Records
/// that keep their maps in `BTreeMap`s therefore encode identically on every
/// client, which is what lets flush and compression results be compared
/// byte for byte.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if the value's `Serialize` impl fails.
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut out = Vec::with_capacity(128);
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(out)
}
