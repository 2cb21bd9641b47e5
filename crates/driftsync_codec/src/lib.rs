//! # driftsync Codec
//!
//! Deterministic CBOR encoding for every record driftsync persists:
//! archive stores, operation-log entries, snapshots and safety backups.
//!
//! ## Determinism Rules
//!
//! - Records keep keyed collections in `BTreeMap`, so maps encode sorted
//! - Integers use the shortest encoding
//! - Struct fields encode in declaration order
//! - Decoding rejects trailing bytes
//!
//! ## Usage
//!
//! ```
//! use driftsync_codec::{Decode, Encode};
//! use std::collections::BTreeMap;
//!
//! let mut counters = BTreeMap::new();
//! counters.insert("client-a".to_string(), 3u64);
//!
//! let bytes = counters.encode().unwrap();
//! let decoded = BTreeMap::<String, u64>::decode(&bytes).unwrap();
//! assert_eq!(counters, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(not(test), warn(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod decoder;
mod encoder;
mod error;

pub use decoder::from_bytes;
pub use encoder::to_canonical_bytes;
pub use error::{CodecError, CodecResult};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Trait for types that can be encoded to canonical CBOR.
pub trait Encode {
    /// Encode this value to canonical CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl<T: Serialize> Encode for T {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_bytes(self)
    }
}

impl<T: DeserializeOwned> Decode for T {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[test]
    fn json_payload_survives_encoding() {
        let payload = serde_json::json!({
            "tasks": [{"id": "t1", "timeSpent": 1200, "notes": null}],
            "flag": true,
        });
        let bytes = payload.encode().unwrap();
        let decoded = serde_json::Value::decode(&bytes).unwrap();
        assert_eq!(payload, decoded);
    }

    proptest! {
        #[test]
        fn equal_maps_encode_identically(entries in prop::collection::vec((".{0,8}", any::<u64>()), 0..32)) {
            let forward: BTreeMap<String, u64> = entries.iter().cloned().collect();
            let reversed: BTreeMap<String, u64> = entries.iter().rev().cloned().collect();
            // Later duplicates win in `collect`, so compare only when the key sets agree on values.
            prop_assume!(forward == reversed);
            prop_assert_eq!(forward.encode().unwrap(), reversed.encode().unwrap());
        }
    }
}
