//! Session lifecycle.
//!
//! [`HubClient`] ties the handshake and the framed transport together and
//! keeps the session alive:
//!
//! ```text
//!            open()              ping/write failure
//! Closed ──────────> Connecting ─────> Connected ─────────────> Disconnected
//!   ^                    │               ^                           │
//!   │ failure            │               └──── reconnect succeeds ───┘
//!   └────────────────────┘                      (new generation)
//! ```
//!
//! Every successful handshake installs a new *generation*: transport, keys
//! and ticket are swapped together under one write lock. Three tasks run
//! while a session is open:
//!
//! - the heartbeat task pings the hub and reconnects when the link is down
//! - the decode loop of the current transport
//! - the forward loop started by [`HubClient::listen`], which verifies every
//!   inbound message and hands it to the application
//!
//! The forward loop drains one generation completely before it moves on to
//! the next, so messages from two generations never interleave. Generations
//! replaced before the loop reached them are queued with their unread
//! sequence and drained in order.
//!
//! [`HubClient::close`] ends the *session*: the link's session counter moves
//! on, and a forward loop started in an earlier session stops instead of
//! following the next [`HubClient::open`].

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use hublink_crypto::IV_SIZE;
use hublink_proto::{ClientIdentity, Letter, Reply, Ticket, to_cbor};
use tokio::{
    sync::{RwLock, mpsc, watch},
    task::JoinHandle,
};

use crate::{
    config::{ClientOptions, HubConfig},
    control::{ControlPlane, HttpControlPlane},
    env::Environment,
    error::{ClientError, TransportError},
    handshake::{Handshake, HandshakeClient},
    keys::SessionKeys,
    system_env::SystemEnv,
    transport::FramedTransport,
};

/// Inbound messages waiting in the application's sequence.
const MESSAGE_BACKLOG: usize = 1;

/// Errors waiting in the application's error sequence. Further errors are
/// dropped and counted until the application catches up.
const ERROR_BACKLOG: usize = 64;

/// Connection status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Not opened, or closed.
    #[default]
    Closed,
    /// Initial handshake in progress.
    Connecting,
    /// A transport is up.
    Connected,
    /// The transport failed; the heartbeat task is reconnecting.
    Disconnected,
}

/// Published link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Link {
    /// Current status.
    pub status: ConnectionStatus,
    /// Generation the status refers to.
    pub generation: u64,
    /// Bumped by every [`HubClient::close`].
    pub session: u64,
}

/// Verified message from another hub client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubMessage {
    /// Sender identifier.
    pub sender: String,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Hub timestamp (seconds since the Unix epoch).
    pub timestamp: i64,
}

impl From<Reply> for HubMessage {
    fn from(reply: Reply) -> Self {
        Self { sender: reply.sender, data: reply.data, timestamp: reply.timestamp }
    }
}

/// Sequences handed to the application by [`HubClient::listen`].
///
/// Both end when the session is closed, even if it is opened again later.
#[derive(Debug)]
pub struct Subscription {
    /// Verified inbound messages, in arrival order.
    pub messages: mpsc::Receiver<HubMessage>,
    /// Inbound messages that failed verification.
    ///
    /// Holds up to 64 unread errors. Errors arriving while it is full are
    /// dropped and counted in [`HubClient::dropped_errors`]; the message
    /// sequence is never held back by an unread error.
    pub errors: mpsc::Receiver<ClientError>,
}

/// One installed generation.
#[derive(Clone)]
struct Active {
    generation: u64,
    transport: Arc<FramedTransport>,
    keys: SessionKeys,
    ticket: Ticket,
}

/// A replaced generation whose inbound sequence was never taken.
struct Superseded {
    generation: u64,
    keys: SessionKeys,
    source: mpsc::Receiver<Reply>,
}

struct Inner<C, E> {
    options: ClientOptions,
    handshaker: HandshakeClient<C, E>,
    env: E,
    identity: Mutex<ClientIdentity>,
    conn_id: Mutex<Option<String>>,
    active: RwLock<Option<Active>>,
    link: watch::Sender<Link>,
    next_generation: AtomicU64,
    open_lock: tokio::sync::Mutex<()>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    /// Session the running forward loop belongs to.
    listener: Mutex<Option<u64>>,
    superseded: Mutex<VecDeque<Superseded>>,
    dropped_errors: AtomicU64,
}

/// Self-healing session with the hub.
///
/// Cheap to clone; clones share the session. Dropping the last clone stops
/// the heartbeat task.
///
/// # Type Parameters
///
/// - `C`: control plane used for handshakes
/// - `E`: Environment implementation for time/randomness
pub struct HubClient<C: ControlPlane, E: Environment = SystemEnv> {
    inner: Arc<Inner<C, E>>,
}

impl<C: ControlPlane, E: Environment> Clone for HubClient<C, E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl HubClient<HttpControlPlane, SystemEnv> {
    /// Session against the hub named in `config`, over HTTP(S).
    pub fn from_config(config: HubConfig, options: ClientOptions) -> Result<Self, ClientError> {
        let control = HttpControlPlane::new(&config.host, &options)?;
        Ok(Self::new(&config, options, control, SystemEnv::new()))
    }

    /// Session configured from a JSON file with default options.
    pub fn from_config_file(path: impl AsRef<std::path::Path>) -> Result<Self, ClientError> {
        Self::from_config(HubConfig::load(path)?, ClientOptions::default())
    }
}

impl<C: ControlPlane, E: Environment> HubClient<C, E> {
    /// Closed session using `control` for handshakes.
    pub fn new(config: &HubConfig, options: ClientOptions, control: C, env: E) -> Self {
        let identity = ClientIdentity {
            id: config.id.clone(),
            token: config.token.clone(),
            alias_name: String::new(),
            version: options.version.clone(),
        };
        let (link, _) = watch::channel(Link::default());

        Self {
            inner: Arc::new(Inner {
                options,
                handshaker: HandshakeClient::new(control, env.clone()),
                env,
                identity: Mutex::new(identity),
                conn_id: Mutex::new(None),
                active: RwLock::new(None),
                link,
                next_generation: AtomicU64::new(0),
                open_lock: tokio::sync::Mutex::new(()),
                heartbeat: Mutex::new(None),
                listener: Mutex::new(None),
                superseded: Mutex::new(VecDeque::new()),
                dropped_errors: AtomicU64::new(0),
            }),
        }
    }

    /// Connect to the hub as `alias`.
    ///
    /// Does nothing when the session is already open. On failure the session
    /// stays closed and no background task is started.
    pub async fn open(&self, alias: &str) -> Result<(), ClientError> {
        let inner = &self.inner;
        let _opening = inner.open_lock.lock().await;
        if inner.status() != ConnectionStatus::Closed {
            return Ok(());
        }

        inner.lock_identity().alias_name = alias.to_string();
        inner.link.send_modify(|link| link.status = ConnectionStatus::Connecting);

        let installed = match inner.establish().await {
            Ok((handshake, transport)) => inner.install(handshake, transport).await,
            Err(e) => Err(e),
        };

        match installed {
            Ok(generation) => {
                tracing::info!(conn_id = ?inner.connection_id(), generation, alias, "session open");
                self.spawn_heartbeat();
                Ok(())
            },
            Err(e) => {
                inner.link.send_modify(|link| {
                    if link.status == ConnectionStatus::Connecting {
                        link.status = ConnectionStatus::Closed;
                    }
                });
                tracing::warn!(error = %e, "open failed");
                Err(e)
            },
        }
    }

    /// Start delivering inbound messages.
    ///
    /// Can be called once per open session; a second call fails with
    /// [`ClientError::AlreadyListening`] until the first subscription ends.
    pub async fn listen(&self) -> Result<Subscription, ClientError> {
        let inner = &self.inner;
        let active = inner.active.read().await;
        let current = active.as_ref().ok_or(ClientError::NotOpen)?;
        let session = inner.link.borrow().session;
        {
            let mut listener = inner.lock_listener();
            if listener.is_some() {
                return Err(ClientError::AlreadyListening);
            }
            *listener = Some(session);
        }
        inner.lock_superseded().clear();

        let (message_tx, messages) = mpsc::channel(MESSAGE_BACKLOG);
        let (error_tx, errors) = mpsc::channel(ERROR_BACKLOG);

        let forward = ForwardLoop {
            inner: Arc::downgrade(inner),
            link: inner.link.subscribe(),
            session,
            generation: current.generation,
            keys: current.keys.clone(),
            source: current.transport.take_messages(),
            messages: message_tx,
            errors: error_tx,
        };
        drop(active);
        tokio::spawn(forward.run());

        Ok(Subscription { messages, errors })
    }

    /// Send `data` to `receiver`, encrypted unless `encrypted` is false.
    pub async fn send_message(
        &self,
        receiver: &str,
        data: &[u8],
        encrypted: bool,
    ) -> Result<(), ClientError> {
        let active = self.inner.current().await?;
        self.inner.send_on(&active, &Letter::single(receiver, data.to_vec()), encrypted).await
    }

    /// Change the alias other clients address this session by.
    pub async fn rename_connection(&self, alias: &str) -> Result<(), ClientError> {
        let active = self.inner.current().await?;
        let identity = ClientIdentity {
            id: active.ticket.conn_id().to_string(),
            token: active.ticket.client_ticket.token.clone(),
            alias_name: alias.to_string(),
            version: self.inner.options.version.clone(),
        };
        let letter = Letter::rename(to_cbor(&identity)?);
        self.inner.send_on(&active, &letter, true).await?;

        self.inner.lock_identity().alias_name = alias.to_string();
        Ok(())
    }

    /// Send a keepalive.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.inner.ping().await
    }

    /// Stop the heartbeat, drop the transport and end the sequences handed
    /// out by [`Self::listen`]. Idempotent.
    pub async fn close(&self) {
        let heartbeat = self.inner.heartbeat.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }

        let mut active = self.inner.active.write().await;
        self.inner.link.send_modify(|link| {
            link.status = ConnectionStatus::Closed;
            link.session += 1;
        });
        self.inner.lock_listener().take();
        self.inner.lock_superseded().clear();
        if let Some(previous) = active.take() {
            previous.transport.close();
            tracing::info!(generation = previous.generation, "session closed");
        }
    }

    /// Connection ID issued by the most recent handshake.
    pub fn connection_id(&self) -> Option<String> {
        self.inner.connection_id()
    }

    /// Protocol version announced to the hub.
    pub fn version(&self) -> &str {
        &self.inner.options.version
    }

    /// Alias other clients address this session by.
    pub fn alias_name(&self) -> String {
        self.inner.lock_identity().alias_name.clone()
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status()
    }

    /// Watch link changes.
    pub fn link(&self) -> watch::Receiver<Link> {
        self.inner.link.subscribe()
    }

    /// Integrity errors discarded because the error sequence was full.
    pub fn dropped_errors(&self) -> u64 {
        self.inner.dropped_errors.load(Ordering::Relaxed)
    }

    fn spawn_heartbeat(&self) {
        let inner = Arc::downgrade(&self.inner);
        let env = self.inner.env.clone();
        let interval = self.inner.options.heartbeat_interval;

        let handle = tokio::spawn(async move {
            loop {
                env.sleep(interval).await;
                let Some(inner) = inner.upgrade() else { break };
                if !inner.tick().await {
                    break;
                }
            }
            tracing::debug!("heartbeat stopped");
        });

        let previous =
            self.inner.heartbeat.lock().unwrap_or_else(PoisonError::into_inner).replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl<C: ControlPlane, E: Environment> Inner<C, E> {
    fn status(&self) -> ConnectionStatus {
        self.link.borrow().status
    }

    fn connection_id(&self) -> Option<String> {
        self.conn_id.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn lock_identity(&self) -> MutexGuard<'_, ClientIdentity> {
        self.identity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<u64>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_superseded(&self) -> MutexGuard<'_, VecDeque<Superseded>> {
        self.superseded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn current(&self) -> Result<Active, ClientError> {
        self.active.read().await.clone().ok_or(ClientError::NotOpen)
    }

    /// Handshake, connect and activate a transport. Nothing is installed.
    async fn establish(&self) -> Result<(Handshake, FramedTransport), ClientError> {
        let identity = self.lock_identity().clone();
        let handshake = self.handshaker.handshake(&identity).await?;

        let transport = FramedTransport::connect(
            &handshake.ticket.address,
            handshake.keys.clone(),
            self.options.max_frame_size,
        )
        .await?;
        if let Err(e) = transport.send_frame(&handshake.activation).await {
            transport.close();
            return Err(e.into());
        }
        Ok((handshake, transport))
    }

    /// Make a freshly established transport the current generation.
    async fn install(
        &self,
        handshake: Handshake,
        transport: FramedTransport,
    ) -> Result<u64, ClientError> {
        let mut active = self.active.write().await;
        if self.status() == ConnectionStatus::Closed {
            transport.close();
            return Err(ClientError::NotOpen);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.conn_id.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(handshake.ticket.conn_id().to_string());

        let previous = active.replace(Active {
            generation,
            transport: Arc::new(transport),
            keys: handshake.keys,
            ticket: handshake.ticket,
        });
        if let Some(previous) = previous {
            // keep unread replies for a forward loop that has not reached them
            let listened = self.lock_listener().is_some();
            if let Some(source) = previous.transport.take_messages().filter(|_| listened) {
                self.lock_superseded().push_back(Superseded {
                    generation: previous.generation,
                    keys: previous.keys,
                    source,
                });
            }
            previous.transport.close();
        }

        self.link.send_modify(|link| {
            link.status = ConnectionStatus::Connected;
            link.generation = generation;
        });
        Ok(generation)
    }

    /// Mark `generation` as lost. No-op when a newer generation is current.
    fn mark_disconnected(&self, generation: u64) {
        let changed = self.link.send_if_modified(|link| {
            if link.status == ConnectionStatus::Connected && link.generation == generation {
                link.status = ConnectionStatus::Disconnected;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!(generation, "connection lost");
        }
    }

    fn seal(
        &self,
        keys: &SessionKeys,
        letter: &Letter,
        encrypted: bool,
    ) -> Result<Vec<u8>, ClientError> {
        let iv = if encrypted { Some(self.env.random_array::<IV_SIZE>()?) } else { None };
        let envelope = keys.seal(to_cbor(letter)?, iv)?;
        Ok(to_cbor(&envelope)?)
    }

    async fn send_on(
        &self,
        active: &Active,
        letter: &Letter,
        encrypted: bool,
    ) -> Result<(), ClientError> {
        let payload = self.seal(&active.keys, letter, encrypted)?;
        match active.transport.send_frame(&payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if !matches!(e, TransportError::Frame(_)) {
                    self.mark_disconnected(active.generation);
                }
                Err(e.into())
            },
        }
    }

    async fn ping(&self) -> Result<(), ClientError> {
        let active = self.current().await?;
        self.send_on(&active, &Letter::ping(), true).await
    }

    /// One heartbeat step. Returns false once the session is closed.
    async fn tick(&self) -> bool {
        match self.status() {
            ConnectionStatus::Closed => false,
            ConnectionStatus::Connecting => true,
            ConnectionStatus::Disconnected => {
                self.reconnect().await;
                true
            },
            ConnectionStatus::Connected => {
                if let Err(e) = self.ping().await {
                    tracing::warn!(error = %e, "heartbeat ping failed");
                    self.reconnect().await;
                }
                true
            },
        }
    }

    async fn reconnect(&self) {
        if self.status() != ConnectionStatus::Disconnected {
            return;
        }

        let established = match self.establish().await {
            Ok((handshake, transport)) => {
                let ping = self.seal(&handshake.keys, &Letter::ping(), true);
                match ping {
                    Ok(ping) => match transport.send_frame(&ping).await {
                        Ok(()) => Ok((handshake, transport)),
                        Err(e) => {
                            transport.close();
                            Err(ClientError::from(e))
                        },
                    },
                    Err(e) => Err(e),
                }
            },
            Err(e) => Err(e),
        };

        let result = match established {
            Ok((handshake, transport)) => self.install(handshake, transport).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(generation) => {
                tracing::info!(conn_id = ?self.connection_id(), generation, "reconnected");
            },
            Err(e) => tracing::warn!(error = %e, "reconnect failed, retrying"),
        }
    }
}

/// Consumer side of [`HubClient::listen`].
struct ForwardLoop<C, E> {
    inner: Weak<Inner<C, E>>,
    link: watch::Receiver<Link>,
    session: u64,
    generation: u64,
    keys: SessionKeys,
    source: Option<mpsc::Receiver<Reply>>,
    messages: mpsc::Sender<HubMessage>,
    errors: mpsc::Sender<ClientError>,
}

impl<C: ControlPlane, E: Environment> ForwardLoop<C, E> {
    async fn run(mut self) {
        while self.drain().await && self.advance().await {}

        if let Some(inner) = self.inner.upgrade() {
            let mut listener = inner.lock_listener();
            if *listener == Some(self.session) {
                *listener = None;
            }
        }
        tracing::debug!(session = self.session, "forward loop stopped");
    }

    /// Forward the current generation until its sequence ends. Returns false
    /// if the application dropped its message sequence.
    async fn drain(&mut self) -> bool {
        let Some(source) = self.source.as_mut() else { return true };

        while let Some(reply) = source.recv().await {
            if !self.keys.verify(&reply) {
                tracing::warn!(sender = %reply.sender, "dropping message with bad integrity tag");
                let error = ClientError::Integrity { sender: reply.sender };
                if let Err(mpsc::error::TrySendError::Full(_)) = self.errors.try_send(error) {
                    if let Some(inner) = self.inner.upgrade() {
                        let dropped = inner.dropped_errors.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::warn!(dropped, "error sequence full, integrity error dropped");
                    }
                }
                continue;
            }

            if self.messages.send(HubMessage::from(reply)).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Move on to the oldest generation newer than the one just drained:
    /// a queued superseded one, else the current one once it is connected.
    /// Returns false once the session is closed.
    async fn advance(&mut self) -> bool {
        let (session, generation) = (self.session, self.generation);
        if let Some(inner) = self.inner.upgrade() {
            inner.mark_disconnected(generation);
        }

        let next = self
            .link
            .wait_for(|link| {
                link.session != session
                    || link.status == ConnectionStatus::Closed
                    || (link.status == ConnectionStatus::Connected && link.generation > generation)
            })
            .await
            .map(|link| *link);
        match next {
            Ok(link) if link.session == session && link.status == ConnectionStatus::Connected => {},
            _ => return false,
        }

        let Some(inner) = self.inner.upgrade() else { return false };
        let active = inner.active.read().await;
        if inner.link.borrow().session != session {
            return false;
        }

        let queued = inner.lock_superseded().pop_front();
        let (next_generation, keys, source) = match (queued, active.as_ref()) {
            (Some(queued), _) => (queued.generation, queued.keys, Some(queued.source)),
            (None, Some(current)) => {
                (current.generation, current.keys.clone(), current.transport.take_messages())
            },
            (None, None) => return false,
        };
        drop(active);

        tracing::debug!(from = generation, to = next_generation, "forwarding next generation");
        self.generation = next_generation;
        self.keys = keys;
        self.source = source;
        true
    }
}
