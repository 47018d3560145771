//! Message integrity tags.
//!
//! Inbound messages carry an HMAC-SHA256 of their payload keyed by the
//! session secret (the secret string's UTF-8 bytes).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Tag size in bytes.
pub const TAG_SIZE: usize = 32;

/// Compute the integrity tag of `payload`.
pub fn tag(secret: &str, payload: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, the error branch is unreachable.
    HmacSha256::new_from_slice(secret.as_bytes()).map_or_else(
        |_| Vec::new(),
        |mut mac| {
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        },
    )
}

/// Check `expected` against the tag of `payload`.
///
/// Plain byte comparison: lengths must match and every byte must be equal.
pub fn verify(expected: &[u8], payload: &[u8], secret: &str) -> bool {
    let actual = tag(secret, payload);
    if actual.len() != expected.len() {
        return false;
    }
    actual.iter().zip(expected).all(|(a, b)| a == b)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn rfc4231_case_2() {
        let tag = tag("Jefe", b"what do ya want for nothing?");
        assert_eq!(
            tag,
            hex!("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843").to_vec()
        );
    }

    #[test]
    fn tag_has_fixed_size() {
        assert_eq!(tag("", b"").len(), TAG_SIZE);
        assert_eq!(tag("key", &[0u8; 1000]).len(), TAG_SIZE);
    }

    #[test]
    fn truncated_tag_fails() {
        let full = tag("secret", b"payload");
        assert!(!verify(&full[..31], b"payload", "secret"));
        assert!(!verify(&[], b"payload", "secret"));
    }

    #[test]
    fn wrong_secret_fails() {
        let t = tag("secret", b"payload");
        assert!(!verify(&t, b"payload", "other"));
    }

    proptest! {
        #[test]
        fn prop_tag_verifies(
            secret in ".{0,40}",
            payload in prop::collection::vec(any::<u8>(), 0..512),
        ) {
            let t = tag(&secret, &payload);
            prop_assert!(verify(&t, &payload, &secret));
        }

        #[test]
        fn prop_payload_bit_flip_fails(
            secret in "[a-z0-9]{1,32}",
            payload in prop::collection::vec(any::<u8>(), 1..256),
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let t = tag(&secret, &payload);
            let mut tampered = payload.clone();
            let i = index.index(tampered.len());
            tampered[i] ^= 1 << bit;
            prop_assert!(!verify(&t, &tampered, &secret));
        }

        #[test]
        fn prop_tag_bit_flip_fails(
            secret in "[a-z0-9]{1,32}",
            payload in prop::collection::vec(any::<u8>(), 0..256),
            index in 0usize..TAG_SIZE,
            bit in 0u8..8,
        ) {
            let mut t = tag(&secret, &payload);
            t[index] ^= 1 << bit;
            prop_assert!(!verify(&t, &payload, &secret));
        }
    }
}
