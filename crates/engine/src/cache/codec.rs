//! NBT envelope shared by every cache record.
//!
//! ```text
//! { DataVersion: Int, Key: String, Data: Compound }
//! ```
//!
//! The header is read on its own first so version dispatch never has to
//! guess at the payload layout.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{CacheError, CacheRecord};
use crate::world::position::DimensionId;

#[derive(Serialize)]
struct EnvelopeRef<'a, P> {
    #[serde(rename = "DataVersion")]
    version: i32,
    #[serde(rename = "Key")]
    key: &'a str,
    #[serde(rename = "Data")]
    data: &'a P,
}

#[derive(Deserialize)]
struct Header {
    #[serde(rename = "DataVersion")]
    version: i32,
    #[serde(rename = "Key")]
    key: String,
}

#[derive(Deserialize)]
struct Envelope<P> {
    #[serde(rename = "Data")]
    data: P,
}

/// Encode a record at its current schema version.
pub fn encode<T: CacheRecord>(record: &T) -> Result<Vec<u8>, CacheError> {
    encode_versioned(T::KEY, T::VERSION, &record.to_schema())
}

/// Encode an arbitrary payload under `key` at `version`. Exposed so tests and
/// tools can produce files in older layouts.
pub fn encode_versioned<P: Serialize>(
    key: &'static str,
    version: i32,
    payload: &P,
) -> Result<Vec<u8>, CacheError> {
    fastnbt::to_bytes(&EnvelopeRef {
        version,
        key,
        data: payload,
    })
    .map_err(|source| CacheError::Encode { key, source })
}

/// Decode a record, dispatching to [`CacheRecord::migrate`] for older files.
pub fn decode<T: CacheRecord>(dimension: DimensionId, bytes: &[u8]) -> Result<T, CacheError> {
    let header: Header = fastnbt::from_bytes(bytes).map_err(|source| CacheError::Decode {
        key: T::KEY,
        source,
    })?;
    if header.key != T::KEY {
        return Err(CacheError::KeyMismatch {
            expected: T::KEY,
            found: header.key,
        });
    }

    match header.version.cmp(&T::VERSION) {
        std::cmp::Ordering::Equal => {
            let schema = decode_payload::<T::Schema>(T::KEY, bytes)?;
            Ok(T::from_schema(dimension, schema))
        }
        std::cmp::Ordering::Less => {
            tracing::info!(
                "Migrating {} for {} from schema v{} to v{}",
                T::KEY,
                dimension,
                header.version,
                T::VERSION
            );
            T::migrate(dimension, header.version, bytes)
        }
        std::cmp::Ordering::Greater => Err(CacheError::UnsupportedVersion {
            key: T::KEY,
            found: header.version,
            supported: T::VERSION,
        }),
    }
}

/// Decode just the `Data` compound as `P`. Migration hooks use this with
/// their legacy schema structs.
pub fn decode_payload<P: DeserializeOwned>(
    key: &'static str,
    bytes: &[u8],
) -> Result<P, CacheError> {
    let envelope: Envelope<P> =
        fastnbt::from_bytes(bytes).map_err(|source| CacheError::Decode { key, source })?;
    Ok(envelope.data)
}
