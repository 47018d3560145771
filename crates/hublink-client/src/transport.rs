//! Framed channel to the hub.
//!
//! One [`FramedTransport`] owns one stream. Writes go through
//! [`FramedTransport::send_frame`]; reads happen in a background decode loop
//! that turns frames into [`Reply`] values and hands them over one at a time.
//!
//! The decode loop ends (and the message sequence with it) when the peer
//! closes the stream, a read comes up short, a header announces an oversized
//! frame, or the transport is closed locally. Frames that fail to decode or
//! decrypt are dropped without ending the loop.

use std::sync::{
    Arc, Mutex, PoisonError, RwLock,
    atomic::{AtomicBool, Ordering},
};

use hublink_proto::{CipherEnvelope, FrameHeader, Reply, encode_frame, from_cbor};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::{Notify, mpsc},
};

use crate::{error::TransportError, keys::SessionKeys};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Length-prefixed framed connection with a background decode loop.
pub struct FramedTransport {
    writer: Arc<tokio::sync::Mutex<Option<BoxedWriter>>>,
    keys: Arc<RwLock<SessionKeys>>,
    messages: Mutex<Option<mpsc::Receiver<Reply>>>,
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    max_frame_size: usize,
}

impl FramedTransport {
    /// Dial the hub's transport address.
    pub async fn connect(
        address: &str,
        keys: SessionKeys,
        max_frame_size: usize,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(address).await.map_err(|e| TransportError::Connect {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        stream.set_nodelay(true)?;

        tracing::debug!(%address, "transport connected");
        Ok(Self::from_stream(stream, keys, max_frame_size))
    }

    /// Run the framing over an already established stream.
    ///
    /// Spawns the decode loop, so it must be called within a tokio runtime.
    pub fn from_stream<S>(stream: S, keys: SessionKeys, max_frame_size: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let writer: Arc<tokio::sync::Mutex<Option<BoxedWriter>>> =
            Arc::new(tokio::sync::Mutex::new(Some(Box::new(writer))));
        let keys = Arc::new(RwLock::new(keys));
        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(Notify::new());
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(decode_loop(DecodeLoop {
            reader,
            writer: Arc::clone(&writer),
            keys: Arc::clone(&keys),
            messages: tx,
            closed: Arc::clone(&closed),
            shutdown: Arc::clone(&shutdown),
            max_frame_size,
        }));

        Self {
            writer,
            keys,
            messages: Mutex::new(Some(rx)),
            closed,
            shutdown,
            max_frame_size,
        }
    }

    /// Write one frame carrying `payload`.
    pub async fn send_frame(&self, payload: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let frame = encode_frame(payload, self.max_frame_size)?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;

        let result = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::debug!(error = %e, "frame write failed");
            guard.take();
            self.mark_closed();
            return Err(TransportError::Io(e));
        }

        // close() could not take the writer while this write held it
        if self.is_closed() {
            guard.take();
        }
        Ok(())
    }

    /// Stop the transport and release the stream. Idempotent.
    ///
    /// Frames already read by the decode loop are still delivered to a
    /// consumer that took the sequence; pending reads are abandoned.
    pub fn close(&self) {
        self.mark_closed();
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        // nobody will consume a sequence that was never taken
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// True once the transport was closed locally or the decode loop ended.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Keys currently used to open inbound envelopes.
    pub fn session_keys(&self) -> SessionKeys {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the keys used to open inbound envelopes.
    pub fn set_session_keys(&self, keys: SessionKeys) {
        *self.keys.write().unwrap_or_else(PoisonError::into_inner) = keys;
    }

    /// Hand out the inbound message sequence.
    ///
    /// Returns `None` after the first call. The sequence ends when the
    /// decode loop stops.
    pub fn take_messages(&self) -> Option<mpsc::Receiver<Reply>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shutdown.notify_one();
        }
    }
}

impl Drop for FramedTransport {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

impl std::fmt::Debug for FramedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedTransport")
            .field("closed", &self.is_closed())
            .field("max_frame_size", &self.max_frame_size)
            .finish_non_exhaustive()
    }
}

struct DecodeLoop<R> {
    reader: R,
    writer: Arc<tokio::sync::Mutex<Option<BoxedWriter>>>,
    keys: Arc<RwLock<SessionKeys>>,
    messages: mpsc::Sender<Reply>,
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    max_frame_size: usize,
}

async fn decode_loop<R: AsyncRead + Unpin>(mut state: DecodeLoop<R>) {
    loop {
        let payload = tokio::select! {
            () = state.shutdown.notified() => {
                tracing::debug!("decode loop stopped");
                break;
            },
            frame = read_frame(&mut state.reader, state.max_frame_size) => match frame {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::debug!(error = %e, "stream ended");
                    break;
                },
            },
        };

        let reply = {
            let keys = state.keys.read().unwrap_or_else(PoisonError::into_inner);
            decode_reply(&keys, &payload)
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(error = %e, len = payload.len(), "dropping undecodable frame");
                continue;
            },
        };

        // Outside the select: a frame already read is never discarded.
        if state.messages.send(reply).await.is_err() {
            tracing::debug!("message sequence dropped");
            break;
        }
    }

    state.closed.store(true, Ordering::Release);
    state.writer.lock().await.take();
}

/// Read one frame payload. Any short read ends the stream.
async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_size: usize,
) -> Result<Vec<u8>, TransportError> {
    let mut header = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header).await?;

    let size = FrameHeader::from_bytes(&header)?.payload_size() as usize;
    if size > max_frame_size {
        return Err(TransportError::Frame(hublink_proto::ProtocolError::PayloadTooLarge {
            size,
            max: max_frame_size,
        }));
    }

    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

fn decode_reply(keys: &SessionKeys, payload: &[u8]) -> Result<Reply, TransportError> {
    let envelope: CipherEnvelope = from_cbor(payload)?;
    Ok(from_cbor(&keys.open(envelope)?)?)
}
