//! Private half of the mock hub's wrap key.
//!
//! A textbook-sized key (`p = 61`, `q = 53`) is enough: the wrap transforms
//! one byte at a time, so every value stays below the modulus.

use hublink_proto::PublicKey;
use num_bigint::BigUint;

/// Public exponent.
pub const EXPONENT: u32 = 17;

/// Modulus.
pub const MODULUS: u32 = 3233;

/// Private exponent.
pub const PRIVATE_EXPONENT: u32 = 2753;

/// Public parameters as the hub publishes them.
pub fn public_key() -> PublicKey {
    PublicKey { e: EXPONENT.to_string(), n: MODULUS.to_string() }
}

/// Undo a wrap produced with [`public_key`].
pub fn unwrap(wrapped: &[u8]) -> Result<Vec<u8>, String> {
    let text = std::str::from_utf8(wrapped).map_err(|e| format!("wrapped value: {e}"))?;
    let d = BigUint::from(PRIVATE_EXPONENT);
    let n = BigUint::from(MODULUS);

    let mut encoded = Vec::new();
    for number in text.split(',') {
        let value = BigUint::parse_bytes(number.as_bytes(), 10)
            .ok_or_else(|| format!("not a decimal number: {number:?}"))?;
        let byte = u8::try_from(value.modpow(&d, &n))
            .map_err(|_| format!("value out of byte range: {number}"))?;
        encoded.push(byte);
    }

    let (&mask_len, rest) = encoded.split_first().ok_or("empty wrap")?;
    let mask_len = usize::from(mask_len);
    if rest.len() < mask_len {
        return Err("mask longer than wrapped value".to_string());
    }
    let (mask, data) = rest.split_at(mask_len);
    if mask.is_empty() {
        return Ok(Vec::new());
    }
    Ok(data.iter().enumerate().map(|(i, b)| b ^ mask[i % mask_len]).collect())
}

#[cfg(test)]
mod tests {
    use hublink_crypto::WrapKey;
    use proptest::prelude::*;

    use super::*;

    fn wrap_key() -> WrapKey {
        WrapKey::new(BigUint::from(EXPONENT), BigUint::from(MODULUS)).expect("key")
    }

    #[test]
    fn unwraps_known_answer() {
        assert_eq!(unwrap(b"1,0,2790").expect("unwrap"), vec![65]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(unwrap(b"").is_err());
        assert!(unwrap(b"1,x,3").is_err());
        assert!(unwrap(b"\xff").is_err());
    }

    proptest! {
        #[test]
        fn prop_unwrap_inverts_wrap(
            data in prop::collection::vec(any::<u8>(), 0..64),
            mask in prop::array::uniform32(any::<u8>()),
        ) {
            let wrapped = hublink_crypto::wrap(&wrap_key(), &data, &mask).expect("wrap");
            prop_assert_eq!(unwrap(wrapped.as_bytes()).expect("unwrap"), data);
        }
    }
}
