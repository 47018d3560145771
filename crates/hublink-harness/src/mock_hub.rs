//! In-process hub for end-to-end tests.
//!
//! [`MockHub`] plays both halves of the hub: it implements
//! [`ControlPlane`] directly (no HTTP) and listens on a loopback TCP port for
//! the framed channel. It unwraps session keys with the private half of
//! [`crate::hub_keys`], so it can read every letter a client sends and push
//! correctly tagged replies back.
//!
//! Fault controls:
//! - [`MockHub::reject_public_key`]: control plane answers with an error code
//! - [`MockHub::set_available`]: control plane stops answering at all
//! - [`MockHub::drop_connection`]: hub closes its side of the newest channel
//! - [`MockHub::push_tampered_reply`] and [`MockHub::push_raw_frame`]: bad
//!   inbound traffic

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use hublink_client::{
    ClientOptions, ControlPlane, Environment, HandshakeError, HubClient, HubConfig, HubResponse,
    SessionKeys,
};
use hublink_crypto::{IV_SIZE, KEY_SIZE};
use hublink_proto::{
    CipherEnvelope, CipherTicket, ClientIdentity, ClientTicket, FrameHeader, Letter,
    MAX_PAYLOAD_SIZE, Reply, SharedKey, Ticket, encode_frame, from_cbor, to_cbor,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{mpsc, watch},
};

use crate::{hub_keys, seeded_env::SeededEnv};

/// Client ID the hub accepts.
pub const CLIENT_ID: &str = "client-1";

/// Client token the hub accepts.
pub const CLIENT_TOKEN: &str = "client-token";

/// How long the wait helpers wait before giving up.
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Letter recorded by the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedLetter {
    /// Connection ID of the channel it arrived on.
    pub conn_id: String,
    /// Whether the envelope was encrypted.
    pub encrypted: bool,
    /// Decoded letter.
    pub letter: Letter,
}

/// Registration issued by the control plane.
#[derive(Clone)]
struct Registration {
    keys: SessionKeys,
    token: String,
    alias: String,
}

/// Activated channel.
struct Connection {
    conn_id: String,
    keys: SessionKeys,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
}

struct HubState {
    address: String,
    env: SeededEnv,
    available: AtomicBool,
    public_key_rejection: Mutex<Option<String>>,
    public_key_requests: AtomicUsize,
    register_requests: AtomicUsize,
    next_conn: AtomicU64,
    next_timestamp: AtomicI64,
    registrations: Mutex<HashMap<String, Registration>>,
    connections: Mutex<Vec<Arc<Connection>>>,
    activated: watch::Sender<usize>,
    letters_tx: mpsc::UnboundedSender<ReceivedLetter>,
    letters_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ReceivedLetter>>,
}

/// Hub control plane and TCP hub on a loopback port.
#[derive(Clone)]
pub struct MockHub {
    state: Arc<HubState>,
}

impl MockHub {
    /// Bind a loopback port and start accepting channels.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?.to_string();
        let (letters_tx, letters_rx) = mpsc::unbounded_channel();
        let (activated, _) = watch::channel(0);

        let hub = Self {
            state: Arc::new(HubState {
                address,
                env: SeededEnv::new(0x4855_4220),
                available: AtomicBool::new(true),
                public_key_rejection: Mutex::new(None),
                public_key_requests: AtomicUsize::new(0),
                register_requests: AtomicUsize::new(0),
                next_conn: AtomicU64::new(0),
                next_timestamp: AtomicI64::new(1_700_000_000),
                registrations: Mutex::new(HashMap::new()),
                connections: Mutex::new(Vec::new()),
                activated,
                letters_tx,
                letters_rx: tokio::sync::Mutex::new(letters_rx),
            }),
        };

        let accepting = hub.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "hub accepted channel");
                        let hub = accepting.clone();
                        tokio::spawn(async move {
                            if let Err(e) = hub.serve(stream).await {
                                tracing::debug!(error = %e, "hub channel ended");
                            }
                        });
                    },
                    Err(e) => {
                        tracing::debug!(error = %e, "hub listener stopped");
                        break;
                    },
                }
            }
        });

        Ok(hub)
    }

    /// Configuration pointing a client at this hub.
    pub fn config(&self) -> HubConfig {
        HubConfig {
            host: "mock://hub".to_string(),
            id: CLIENT_ID.to_string(),
            token: CLIENT_TOKEN.to_string(),
        }
    }

    /// Client wired to this hub, with a seeded environment.
    pub fn client(&self, options: ClientOptions, seed: u64) -> HubClient<Self, SeededEnv> {
        HubClient::new(&self.config(), options, self.clone(), SeededEnv::new(seed))
    }

    /// TCP address channels connect to.
    pub fn address(&self) -> &str {
        &self.state.address
    }

    /// Answer public-key requests with error code 0 and `message`.
    pub fn reject_public_key(&self, message: &str) {
        *self.lock_rejection() = Some(message.to_string());
    }

    /// Make the control plane fail every request, or answer again.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Public-key requests seen so far.
    pub fn public_key_requests(&self) -> usize {
        self.state.public_key_requests.load(Ordering::SeqCst)
    }

    /// Registration requests seen so far.
    pub fn register_requests(&self) -> usize {
        self.state.register_requests.load(Ordering::SeqCst)
    }

    /// Channels activated so far.
    pub fn activations(&self) -> usize {
        *self.state.activated.borrow()
    }

    /// Alias registered for `conn_id`.
    pub fn alias(&self, conn_id: &str) -> Option<String> {
        self.lock_registrations().get(conn_id).map(|r| r.alias.clone())
    }

    /// Wait until `count` channels have been activated.
    pub async fn wait_for_activations(&self, count: usize) -> bool {
        let mut activated = self.state.activated.subscribe();
        tokio::time::timeout(WAIT_TIMEOUT, activated.wait_for(|n| *n >= count))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Next recorded letter, waiting up to five seconds.
    pub async fn next_letter(&self) -> Option<ReceivedLetter> {
        self.next_letter_within(WAIT_TIMEOUT).await
    }

    /// Next recorded letter, waiting up to `timeout`.
    pub async fn next_letter_within(&self, timeout: Duration) -> Option<ReceivedLetter> {
        let mut letters = self.state.letters_rx.lock().await;
        tokio::time::timeout(timeout, letters.recv()).await.ok().flatten()
    }

    /// Next recorded letter that is not a keepalive.
    pub async fn next_message(&self) -> Option<ReceivedLetter> {
        self.next_message_within(WAIT_TIMEOUT).await
    }

    /// Next recorded letter that is not a keepalive, waiting up to `timeout`.
    pub async fn next_message_within(&self, timeout: Duration) -> Option<ReceivedLetter> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let letter = self.next_letter_within(remaining).await?;
            if letter.letter != Letter::ping() {
                return Some(letter);
            }
        }
    }

    /// Send a correctly tagged, encrypted reply on the newest channel.
    pub async fn push_reply(&self, sender: &str, data: &[u8]) -> Result<(), BoxError> {
        let connection = self.newest()?;
        let reply = self.reply(&connection.keys, sender, data);
        self.send_reply(&connection, &reply).await
    }

    /// Send a reply whose integrity tag does not match its data.
    pub async fn push_tampered_reply(&self, sender: &str, data: &[u8]) -> Result<(), BoxError> {
        let connection = self.newest()?;
        let mut reply = self.reply(&connection.keys, sender, data);
        if let Some(byte) = reply.hmac.first_mut() {
            *byte ^= 0x01;
        }
        self.send_reply(&connection, &reply).await
    }

    /// Send `payload` as one frame on the newest channel, unmodified.
    pub async fn push_raw_frame(&self, payload: &[u8]) -> Result<(), BoxError> {
        let connection = self.newest()?;
        let frame = encode_frame(payload, MAX_PAYLOAD_SIZE)?;
        connection.writer.lock().await.write_all(&frame).await?;
        Ok(())
    }

    /// Close the hub's side of the newest channel.
    ///
    /// Replies already pushed are still delivered; the client sees end of
    /// stream after them.
    pub async fn drop_connection(&self) -> Result<(), BoxError> {
        let connection = {
            let mut connections = self.lock_connections();
            connections.pop().ok_or("no active channel")?
        };
        connection.writer.lock().await.shutdown().await?;
        tracing::debug!(conn_id = %connection.conn_id, "hub dropped channel");
        Ok(())
    }

    fn reply(&self, keys: &SessionKeys, sender: &str, data: &[u8]) -> Reply {
        Reply {
            sender: sender.to_string(),
            data: data.to_vec(),
            timestamp: self.state.next_timestamp.fetch_add(1, Ordering::SeqCst),
            hmac: hublink_crypto::tag(keys.secret(), data),
        }
    }

    async fn send_reply(&self, connection: &Connection, reply: &Reply) -> Result<(), BoxError> {
        let iv: [u8; IV_SIZE] = self.state.env.random_array()?;
        let envelope = connection.keys.seal(to_cbor(reply)?, Some(iv))?;
        let frame = encode_frame(&to_cbor(&envelope)?, MAX_PAYLOAD_SIZE)?;
        connection.writer.lock().await.write_all(&frame).await?;
        Ok(())
    }

    fn newest(&self) -> Result<Arc<Connection>, BoxError> {
        self.lock_connections().last().cloned().ok_or_else(|| "no active channel".into())
    }

    fn lock_rejection(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.state.public_key_rejection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_registrations(&self) -> std::sync::MutexGuard<'_, HashMap<String, Registration>> {
        self.state.registrations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_connections(&self) -> std::sync::MutexGuard<'_, Vec<Arc<Connection>>> {
        self.state.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), HandshakeError> {
        if self.state.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HandshakeError::Request { reason: "connection refused".to_string() })
        }
    }

    /// Decode a registration body and issue a ticket.
    fn issue_ticket(&self, body: &str) -> Result<HubResponse, HandshakeError> {
        let decode = |reason: String| HandshakeError::Decode { reason };

        let shared: SharedKey =
            from_cbor(&STANDARD.decode(body).map_err(|e| decode(e.to_string()))?)?;
        let cipher_key: [u8; KEY_SIZE] = hub_keys::unwrap(&shared.key)
            .map_err(decode)?
            .try_into()
            .map_err(|_| decode("session key is not 32 bytes".to_string()))?;
        let identity: ClientIdentity = from_cbor(&hublink_crypto::decrypt(
            &cipher_key,
            &shared.cipher.iv,
            &shared.cipher.data,
        )?)?;

        if identity.id != CLIENT_ID || identity.token != CLIENT_TOKEN {
            return Ok(HubResponse::rejected(0, "unknown client"));
        }

        let n = self.state.next_conn.fetch_add(1, Ordering::SeqCst) + 1;
        let ticket = Ticket {
            client_ticket: ClientTicket {
                conn_id: format!("conn-{n}"),
                token: format!("session-{n}"),
            },
            address: self.state.address.clone(),
            secret_key: format!("secret-{n}"),
        };
        self.lock_registrations().insert(ticket.client_ticket.conn_id.clone(), Registration {
            keys: SessionKeys::new(cipher_key, ticket.secret_key.clone()),
            token: ticket.client_ticket.token.clone(),
            alias: identity.alias_name,
        });

        let iv: [u8; IV_SIZE] = self.state.env.random_array()?;
        let data = hublink_crypto::encrypt(&cipher_key, &iv, &to_cbor(&ticket)?)?;
        Ok(HubResponse::success(&to_cbor(&CipherEnvelope::encrypted(iv.to_vec(), data))?))
    }

    /// Activate and serve one channel.
    async fn serve(&self, stream: TcpStream) -> Result<(), BoxError> {
        stream.set_nodelay(true)?;
        let (mut reader, writer) = stream.into_split();

        let activation: CipherTicket = from_cbor(&read_frame(&mut reader).await?)?;
        let conn_id = String::from_utf8(hub_keys::unwrap(&activation.id)?)?;
        let registration =
            self.lock_registrations().get(&conn_id).cloned().ok_or("unknown connection ID")?;
        let ticket: ClientTicket = from_cbor(&registration.keys.open(activation.cipher)?)?;
        if ticket.conn_id != conn_id || ticket.token != registration.token {
            return Err("activation ticket mismatch".into());
        }

        let connection = Arc::new(Connection {
            conn_id: conn_id.clone(),
            keys: registration.keys,
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
        });
        self.lock_connections().push(Arc::clone(&connection));
        self.state.activated.send_modify(|n| *n += 1);
        tracing::debug!(%conn_id, "hub activated channel");

        loop {
            let payload = read_frame(&mut reader).await?;
            let envelope: CipherEnvelope = from_cbor(&payload)?;
            let encrypted = envelope.is_encrypted();
            let letter: Letter = from_cbor(&connection.keys.open(envelope)?)?;

            if letter.kind == hublink_proto::LetterKind::Rename {
                let identity: ClientIdentity = from_cbor(&letter.data)?;
                if let Some(registration) = self.lock_registrations().get_mut(&conn_id) {
                    registration.alias = identity.alias_name;
                }
            }

            let received = ReceivedLetter { conn_id: conn_id.clone(), encrypted, letter };
            if self.state.letters_tx.send(received).is_err() {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl ControlPlane for MockHub {
    async fn public_key(&self) -> Result<HubResponse, HandshakeError> {
        self.state.public_key_requests.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        if let Some(message) = self.lock_rejection().clone() {
            return Ok(HubResponse::rejected(0, message));
        }
        Ok(HubResponse::success(&to_cbor(&hub_keys::public_key())?))
    }

    async fn register(&self, body: String) -> Result<HubResponse, HandshakeError> {
        self.state.register_requests.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        self.issue_ticket(&body).or_else(|e| Ok(HubResponse::rejected(0, e.to_string())))
    }
}

impl std::fmt::Debug for MockHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHub")
            .field("address", &self.state.address)
            .field("activations", &self.activations())
            .finish_non_exhaustive()
    }
}

async fn read_frame(reader: &mut OwnedReadHalf) -> Result<Vec<u8>, BoxError> {
    let mut header = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header).await?;
    let size = FrameHeader::from_bytes(&header)?.payload_size() as usize;
    if size > MAX_PAYLOAD_SIZE {
        return Err(format!("frame of {size} bytes").into());
    }
    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}
