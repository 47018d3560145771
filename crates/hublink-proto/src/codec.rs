//! CBOR helpers shared by every payload type.

use serde::{Serialize, de::DeserializeOwned};

use crate::errors::ProtocolError;

/// Serialize a payload to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(bytes)
}

/// Deserialize a payload from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}
