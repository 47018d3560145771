//! Per-session key material.

use hublink_crypto::{CryptoError, IV_SIZE, KEY_SIZE};
use hublink_proto::{CipherEnvelope, Reply, redacted};

/// Keys negotiated by one handshake.
///
/// The two secrets are always replaced together: the symmetric key the
/// client generated (envelope encryption, both directions) and the secret the
/// hub issued in the ticket (integrity tags on inbound messages).
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    cipher_key: [u8; KEY_SIZE],
    secret: String,
}

impl SessionKeys {
    /// Bundle a symmetric key with the hub's integrity secret.
    pub fn new(cipher_key: [u8; KEY_SIZE], secret: impl Into<String>) -> Self {
        Self { cipher_key, secret: secret.into() }
    }

    /// Symmetric envelope key.
    pub fn cipher_key(&self) -> &[u8; KEY_SIZE] {
        &self.cipher_key
    }

    /// Integrity secret.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Wrap `payload` in an envelope, encrypted when an IV is given.
    pub fn seal(
        &self,
        payload: Vec<u8>,
        iv: Option<[u8; IV_SIZE]>,
    ) -> Result<CipherEnvelope, CryptoError> {
        match iv {
            Some(iv) => {
                let data = hublink_crypto::encrypt(&self.cipher_key, &iv, &payload)?;
                Ok(CipherEnvelope::encrypted(iv.to_vec(), data))
            },
            None => Ok(CipherEnvelope::plaintext(payload)),
        }
    }

    /// Recover the payload of an envelope.
    pub fn open(&self, envelope: CipherEnvelope) -> Result<Vec<u8>, CryptoError> {
        if envelope.is_encrypted() {
            hublink_crypto::decrypt(&self.cipher_key, &envelope.iv, &envelope.data)
        } else {
            Ok(envelope.data)
        }
    }

    /// Check a reply's integrity tag.
    pub fn verify(&self, reply: &Reply) -> bool {
        hublink_crypto::verify(&reply.hmac, &reply.data, &self.secret)
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("cipher_key", &redacted(KEY_SIZE))
            .field("secret", &redacted(self.secret.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> SessionKeys {
        SessionKeys::new([9u8; KEY_SIZE], "secret")
    }

    #[test]
    fn sealed_envelope_opens() {
        let keys = keys();
        let envelope = keys.seal(b"letter".to_vec(), Some([3u8; IV_SIZE])).expect("seal");
        assert!(envelope.is_encrypted());
        assert_ne!(envelope.data, b"letter");
        assert_eq!(keys.open(envelope).expect("open"), b"letter");
    }

    #[test]
    fn plaintext_envelope_passes_through() {
        let keys = keys();
        let envelope = keys.seal(b"letter".to_vec(), None).expect("seal");
        assert!(!envelope.is_encrypted());
        assert_eq!(keys.open(envelope).expect("open"), b"letter");
    }

    #[test]
    fn envelope_under_other_key_fails_or_differs() {
        let envelope = keys().seal(b"letter".to_vec(), Some([3u8; IV_SIZE])).expect("seal");
        let other = SessionKeys::new([1u8; KEY_SIZE], "secret");
        assert_ne!(other.open(envelope).ok(), Some(b"letter".to_vec()));
    }

    #[test]
    fn verify_uses_integrity_secret() {
        let keys = keys();
        let data = b"payload".to_vec();
        let reply = Reply {
            sender: "peer".to_string(),
            hmac: hublink_crypto::tag("secret", &data),
            data,
            timestamp: 0,
        };
        assert!(keys.verify(&reply));
        assert!(!SessionKeys::new([9u8; KEY_SIZE], "rotated").verify(&reply));
    }

    #[test]
    fn debug_redacts_everything() {
        let rendered = format!("{:?}", SessionKeys::new([9u8; KEY_SIZE], "sekrit"));
        assert!(!rendered.contains("sekrit"));
        assert!(rendered.contains("<redacted 32 bytes>"));
    }
}
