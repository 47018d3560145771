//! Hub key wrap.
//!
//! The hub publishes an exponent `E` and modulus `N`. Data is first masked:
//!
//! ```text
//! [mask_len][mask; mask_len][data[i] ^ mask[i % mask_len] ...]
//! ```
//!
//! with `mask_len = min(len(data), 32)`. Every byte `b` of that buffer is then
//! raised to `b^E mod N` independently and written in decimal; the numbers
//! are joined with commas. This is not block RSA and must not be replaced by
//! it: the hub undoes the transform one number at a time.

use num_bigint::BigUint;
use num_traits::Zero;

use crate::error::CryptoError;

/// Largest mask the encoding uses.
pub const MAX_MASK_SIZE: usize = 32;

/// Hub public parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct WrapKey {
    e: BigUint,
    n: BigUint,
}

impl WrapKey {
    /// Build a key from its exponent and modulus.
    pub fn new(e: BigUint, n: BigUint) -> Result<Self, CryptoError> {
        if n.is_zero() {
            return Err(CryptoError::InvalidPublicKey { reason: "modulus is zero".to_string() });
        }
        Ok(Self { e, n })
    }

    /// Parse a key from decimal strings, as the hub publishes it.
    pub fn from_decimal(e: &str, n: &str) -> Result<Self, CryptoError> {
        let parse = |name: &str, value: &str| {
            BigUint::parse_bytes(value.as_bytes(), 10).ok_or_else(|| {
                CryptoError::InvalidPublicKey { reason: format!("{name} is not a decimal integer") }
            })
        };
        Self::new(parse("exponent", e)?, parse("modulus", n)?)
    }

    /// Public exponent.
    pub fn exponent(&self) -> &BigUint {
        &self.e
    }

    /// Modulus.
    pub fn modulus(&self) -> &BigUint {
        &self.n
    }
}

impl std::fmt::Debug for WrapKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrapKey")
            .field("e", &self.e.to_str_radix(10))
            .field("n_bits", &self.n.bits())
            .finish()
    }
}

/// Apply the mask encoding to `data`.
///
/// `mask` must hold at least `min(len(data), 32)` bytes; extra bytes are
/// ignored.
pub fn encode_masked(data: &[u8], mask: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mask_len = data.len().min(MAX_MASK_SIZE);
    let mask = mask
        .get(..mask_len)
        .ok_or(CryptoError::MaskTooShort { needed: mask_len, actual: mask.len() })?;

    let mut encoded = Vec::with_capacity(1 + mask_len + data.len());
    // mask_len <= 32
    #[allow(clippy::cast_possible_truncation)]
    encoded.push(mask_len as u8);
    encoded.extend_from_slice(mask);
    encoded.extend(data.iter().enumerate().map(|(i, byte)| byte ^ mask[i % mask_len]));
    Ok(encoded)
}

/// Wrap `data` for the hub.
pub fn wrap(key: &WrapKey, data: &[u8], mask: &[u8]) -> Result<String, CryptoError> {
    let encoded = encode_masked(data, mask)?;
    let numbers: Vec<String> = encoded
        .iter()
        .map(|&byte| BigUint::from(byte).modpow(&key.e, &key.n).to_str_radix(10))
        .collect();
    Ok(numbers.join(","))
}
