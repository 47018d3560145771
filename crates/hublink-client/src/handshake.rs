//! Two-step registration with the hub.
//!
//! ```text
//! client                                   hub control plane
//!   │  GET /public-key                          │
//!   │ ─────────────────────────────────────────>│
//!   │  { E, N }                                 │
//!   │ <─────────────────────────────────────────│
//!   │  fresh session key K                      │
//!   │  POST /conn/register                      │
//!   │    { wrap(K), AES_K(identity) }           │
//!   │ ─────────────────────────────────────────>│
//!   │  AES_K(ticket)                            │
//!   │ <─────────────────────────────────────────│
//! ```
//!
//! The result also carries the activation frame the caller must send as the
//! first frame on the hub's TCP channel.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hublink_crypto::{IV_SIZE, KEY_SIZE, MAX_MASK_SIZE, WrapKey};
use hublink_proto::{
    CipherEnvelope, CipherTicket, ClientIdentity, PublicKey, SharedKey, Ticket, from_cbor, to_cbor,
};

use crate::{control::ControlPlane, env::Environment, error::HandshakeError, keys::SessionKeys};

/// Outcome of a successful handshake.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Ticket issued by the hub.
    pub ticket: Ticket,
    /// Keys for the session this ticket opens.
    pub keys: SessionKeys,
    /// Serialized [`CipherTicket`] to send as the first frame.
    pub activation: Vec<u8>,
}

/// Runs handshakes against a control plane.
pub struct HandshakeClient<C, E> {
    control: C,
    env: E,
}

impl<C: ControlPlane, E: Environment> HandshakeClient<C, E> {
    /// Handshake client over `control`, drawing randomness from `env`.
    pub fn new(control: C, env: E) -> Self {
        Self { control, env }
    }

    /// Underlying control plane.
    pub fn control(&self) -> &C {
        &self.control
    }

    /// Register `identity` with the hub and prepare the activation frame.
    pub async fn handshake(&self, identity: &ClientIdentity) -> Result<Handshake, HandshakeError> {
        let wrap_key = self.fetch_public_key().await?;

        let cipher_key: [u8; KEY_SIZE] = self.env.random_array()?;
        let body = self.registration_body(&wrap_key, &cipher_key, identity)?;

        let response = self.control.register(body).await?;
        let envelope: CipherEnvelope = from_cbor(&response.into_payload()?)?;
        let ticket: Ticket = from_cbor(&hublink_crypto::decrypt(
            &cipher_key,
            &envelope.iv,
            &envelope.data,
        )?)?;

        let activation = self.activation_frame(&wrap_key, &cipher_key, &ticket)?;
        let keys = SessionKeys::new(cipher_key, ticket.secret_key.clone());

        tracing::debug!(conn_id = %ticket.conn_id(), address = %ticket.address, "registered");
        Ok(Handshake { ticket, keys, activation })
    }

    async fn fetch_public_key(&self) -> Result<WrapKey, HandshakeError> {
        let payload = self.control.public_key().await?.into_payload()?;
        let key: PublicKey = from_cbor(&payload)?;
        Ok(WrapKey::from_decimal(&key.e, &key.n)?)
    }

    fn registration_body(
        &self,
        wrap_key: &WrapKey,
        cipher_key: &[u8; KEY_SIZE],
        identity: &ClientIdentity,
    ) -> Result<String, HandshakeError> {
        let iv: [u8; IV_SIZE] = self.env.random_array()?;
        let data = hublink_crypto::encrypt(cipher_key, &iv, &to_cbor(identity)?)?;

        let mask: [u8; MAX_MASK_SIZE] = self.env.random_array()?;
        let wrapped = hublink_crypto::wrap(wrap_key, cipher_key, &mask)?;

        let body = SharedKey {
            key: wrapped.into_bytes(),
            cipher: CipherEnvelope::encrypted(iv.to_vec(), data),
        };
        Ok(STANDARD.encode(to_cbor(&body)?))
    }

    fn activation_frame(
        &self,
        wrap_key: &WrapKey,
        cipher_key: &[u8; KEY_SIZE],
        ticket: &Ticket,
    ) -> Result<Vec<u8>, HandshakeError> {
        let mask: [u8; MAX_MASK_SIZE] = self.env.random_array()?;
        let id = hublink_crypto::wrap(wrap_key, ticket.conn_id().as_bytes(), &mask)?;

        let iv: [u8; IV_SIZE] = self.env.random_array()?;
        let data = hublink_crypto::encrypt(cipher_key, &iv, &to_cbor(&ticket.client_ticket)?)?;

        let frame = CipherTicket {
            id: id.into_bytes(),
            cipher: CipherEnvelope::encrypted(iv.to_vec(), data),
        };
        Ok(to_cbor(&frame)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use hublink_proto::ClientTicket;

    use super::*;
    use crate::{control::HubResponse, error::EntropyError, system_env::SystemEnv};

    /// Environment whose entropy source is gone.
    #[derive(Clone)]
    struct NoEntropy;

    impl Environment for NoEntropy {
        fn sleep(
            &self,
            duration: std::time::Duration,
        ) -> impl std::future::Future<Output = ()> + Send {
            tokio::time::sleep(duration)
        }

        fn random_bytes(&self, _buffer: &mut [u8]) -> Result<(), EntropyError> {
            Err(EntropyError { reason: "no entropy device".to_string() })
        }
    }

    /// Undo the wrap for an identity key (`E = 1`, `N > 255`).
    fn unwrap_identity(wrapped: &[u8]) -> Vec<u8> {
        let encoded: Vec<u8> = std::str::from_utf8(wrapped)
            .expect("utf8")
            .split(',')
            .map(|n| n.parse::<u8>().expect("byte"))
            .collect();
        let mask_len = encoded[0] as usize;
        let mask = &encoded[1..=mask_len];
        encoded[1 + mask_len..].iter().enumerate().map(|(i, b)| b ^ mask[i % mask_len]).collect()
    }

    struct ScriptedHub {
        public_key: HubResponse,
        reject_register: Option<HubResponse>,
        seen_identity: Mutex<Option<ClientIdentity>>,
    }

    impl ScriptedHub {
        fn new() -> Self {
            let key = PublicKey { e: "1".to_string(), n: "1000".to_string() };
            Self {
                public_key: HubResponse::success(&to_cbor(&key).expect("encode")),
                reject_register: None,
                seen_identity: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ControlPlane for ScriptedHub {
        async fn public_key(&self) -> Result<HubResponse, HandshakeError> {
            Ok(self.public_key.clone())
        }

        async fn register(&self, body: String) -> Result<HubResponse, HandshakeError> {
            if let Some(rejection) = &self.reject_register {
                return Ok(rejection.clone());
            }

            let shared: SharedKey = from_cbor(&STANDARD.decode(body).expect("base64"))?;
            let key: [u8; KEY_SIZE] = unwrap_identity(&shared.key).try_into().expect("key size");
            let identity: ClientIdentity = from_cbor(&hublink_crypto::decrypt(
                &key,
                &shared.cipher.iv,
                &shared.cipher.data,
            )?)?;
            *self.seen_identity.lock().expect("lock") = Some(identity);

            let ticket = Ticket {
                client_ticket: ClientTicket {
                    conn_id: "conn-1".to_string(),
                    token: "session".to_string(),
                },
                address: "127.0.0.1:1".to_string(),
                secret_key: "hmac".to_string(),
            };
            let iv = [5u8; IV_SIZE];
            let data = hublink_crypto::encrypt(&key, &iv, &to_cbor(&ticket)?)?;
            let envelope = CipherEnvelope::encrypted(iv.to_vec(), data);
            Ok(HubResponse::success(&to_cbor(&envelope)?))
        }
    }

    fn identity() -> ClientIdentity {
        ClientIdentity {
            id: "client-1".to_string(),
            token: "token".to_string(),
            alias_name: "u1".to_string(),
            version: "2.2.0".to_string(),
        }
    }

    #[tokio::test]
    async fn handshake_recovers_ticket() {
        let client = HandshakeClient::new(ScriptedHub::new(), SystemEnv::new());

        let handshake = client.handshake(&identity()).await.expect("handshake");

        assert_eq!(handshake.ticket.conn_id(), "conn-1");
        assert_eq!(handshake.keys.secret(), "hmac");
        let seen = client.control().seen_identity.lock().expect("lock").clone();
        assert_eq!(seen, Some(identity()));
    }

    #[tokio::test]
    async fn activation_frame_carries_wrapped_conn_id_and_ticket() {
        let client = HandshakeClient::new(ScriptedHub::new(), SystemEnv::new());
        let handshake = client.handshake(&identity()).await.expect("handshake");

        let frame: CipherTicket = from_cbor(&handshake.activation).expect("decode");
        assert_eq!(unwrap_identity(&frame.id), b"conn-1");

        let ticket: ClientTicket = from_cbor(
            &handshake.keys.open(frame.cipher).expect("decrypt"),
        )
        .expect("decode");
        assert_eq!(ticket, handshake.ticket.client_ticket);
    }

    #[tokio::test]
    async fn public_key_rejection_carries_message() {
        let mut hub = ScriptedHub::new();
        hub.public_key = HubResponse::rejected(0, "hub offline");
        let client = HandshakeClient::new(hub, SystemEnv::new());

        let result = client.handshake(&identity()).await;

        assert!(matches!(
            result,
            Err(HandshakeError::Rejected { code: 0, ref message }) if message == "hub offline"
        ));
        assert!(client.control().seen_identity.lock().expect("lock").is_none());
    }

    #[tokio::test]
    async fn registration_rejection_fails_handshake() {
        let mut hub = ScriptedHub::new();
        hub.reject_register = Some(HubResponse::rejected(3, "bad token"));
        let client = HandshakeClient::new(hub, SystemEnv::new());

        let result = client.handshake(&identity()).await;
        assert!(matches!(result, Err(HandshakeError::Rejected { code: 3, .. })));
    }

    #[tokio::test]
    async fn malformed_public_key_fails_handshake() {
        let mut hub = ScriptedHub::new();
        hub.public_key = HubResponse::success(b"not cbor at all");
        let client = HandshakeClient::new(hub, SystemEnv::new());

        let result = client.handshake(&identity()).await;
        assert!(matches!(result, Err(HandshakeError::Decode { .. })));
    }

    #[tokio::test]
    async fn unparsable_modulus_fails_handshake() {
        let mut hub = ScriptedHub::new();
        let key = PublicKey { e: "1".to_string(), n: "abc".to_string() };
        hub.public_key = HubResponse::success(&to_cbor(&key).expect("encode"));
        let client = HandshakeClient::new(hub, SystemEnv::new());

        let result = client.handshake(&identity()).await;
        assert!(matches!(result, Err(HandshakeError::Crypto(_))));
    }

    #[tokio::test]
    async fn missing_entropy_fails_before_registering() {
        let client = HandshakeClient::new(ScriptedHub::new(), NoEntropy);

        let result = client.handshake(&identity()).await;

        assert!(matches!(result, Err(HandshakeError::Entropy(_))));
        assert!(client.control().seen_identity.lock().expect("lock").is_none());
    }
}
