//! JSON codec for payloads exchanged with workers
//!
//! Workers may send a payload either as a JSON value or as a string holding
//! JSON text. Decoding tries the embedded text first and falls back to the
//! value itself, so `"{\"State\":\"after\"}"` and `{"State":"after"}` decode
//! to the same thing.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::domain::Payload;
use crate::error::{FunctionsError, Result};

/// Encode a value into a payload
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Payload> {
    serde_json::to_value(value).map_err(FunctionsError::Encode)
}

/// Decode a payload into `T`
///
/// The error keeps the raw payload text for diagnostics.
pub fn decode<T: DeserializeOwned>(payload: &Payload) -> Result<T> {
    let direct = match payload {
        Value::String(text) => match serde_json::from_str::<T>(text) {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!(error = %e, "decode: payload is not embedded JSON, trying the string itself");
                T::deserialize(payload)
            }
        },
        other => T::deserialize(other),
    };

    direct.map_err(|source| FunctionsError::Decode {
        raw: raw_text(payload),
        source,
    })
}

/// The payload, unless the worker sent null or an empty string
///
/// Both mean "no payload".
pub fn present(payload: Option<&Payload>) -> Option<&Payload> {
    payload.filter(|p| match p {
        Value::Null => false,
        Value::String(text) => !text.is_empty(),
        _ => true,
    })
}

/// Text of a payload as the worker sent it
pub fn raw_text(payload: &Payload) -> String {
    match payload {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
