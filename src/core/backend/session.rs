// src/core/backend/session.rs

//! A pipelined connection to one backend endpoint (component C). The
//! dispatcher pushes `(frame, reply_sink)` onto the outbound queue; a writer
//! task drains it onto the socket, and a reader task decodes replies and
//! completes sinks strictly FIFO, mirroring the raw-socket request/response
//! pattern this codebase's cluster client uses for migration commands, but
//! generalized here to an arbitrary number of in-flight pipelined requests.

use crate::core::errors::ProxyError;
use crate::core::metrics;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::warn;

const OUTBOUND_QUEUE_CAPACITY: usize = 4096;

type ReplySink = oneshot::Sender<Result<RespFrame, ProxyError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Ready,
    Broken,
}

impl From<u8> for SessionState {
    fn from(v: u8) -> Self {
        match v {
            0 => SessionState::Connecting,
            1 => SessionState::Ready,
            _ => SessionState::Broken,
        }
    }
}

struct Pending {
    frame: RespFrame,
    reply: ReplySink,
}

/// Handle to a live backend session. Cheaply cloneable; internally a sender
/// onto the session's outbound queue, which is the session's multiplexer --
/// every dispatch task enqueues here and the queue enforces FIFO.
#[derive(Clone)]
pub struct BackendSession {
    endpoint: String,
    outbound: mpsc::Sender<Pending>,
    state: Arc<AtomicU8>,
}

impl BackendSession {
    /// Connects to `endpoint` and spawns the paired reader/writer tasks.
    pub async fn connect(endpoint: String) -> Result<Self, ProxyError> {
        let stream = TcpStream::connect(&endpoint).await?;
        stream.set_nodelay(true).ok();
        let framed = Framed::new(stream, RespFrameCodec::new(2));
        let (writer_half, reader_half) = framed.split();

        let (outbound_tx, outbound_rx) = mpsc::channel::<Pending>(OUTBOUND_QUEUE_CAPACITY);
        // Reply sinks flow writer -> reader in the exact order requests were
        // written, so the reader can complete each decoded reply FIFO
        // without any separate sequence numbering.
        let (inflight_tx, inflight_rx) = mpsc::unbounded_channel::<ReplySink>();
        let state = Arc::new(AtomicU8::new(SessionState::Ready as u8));

        metrics::BACKEND_SESSIONS.with_label_values(&[endpoint.as_str()]).inc();

        tokio::spawn(run_writer(
            writer_half,
            outbound_rx,
            inflight_tx,
            state.clone(),
            endpoint.clone(),
        ));
        tokio::spawn(run_reader(reader_half, inflight_rx, state.clone(), endpoint.clone()));

        Ok(Self {
            endpoint,
            outbound: outbound_tx,
            state,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> SessionState {
        SessionState::from(self.state.load(Ordering::Acquire))
    }

    /// Enqueues a request and returns its reply once the session completes
    /// the matching sink (or fails it, on session death).
    pub async fn send(&self, frame: RespFrame) -> Result<RespFrame, ProxyError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.outbound
            .send(Pending {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ProxyError::BackendUnreachable)?;
        reply_rx.await.map_err(|_| ProxyError::BackendUnreachable)?
    }

    /// As `send`, but gives up after `timeout` and marks the session
    /// `Broken` -- a reply that eventually does arrive would otherwise be
    /// paired with a future, unrelated request under the FIFO contract, so
    /// a timed-out session can never be trusted again and is torn down.
    pub async fn send_with_timeout(
        &self,
        frame: RespFrame,
        timeout: std::time::Duration,
    ) -> Result<RespFrame, ProxyError> {
        match tokio::time::timeout(timeout, self.send(frame)).await {
            Ok(result) => result,
            Err(_) => {
                self.mark_broken();
                Err(ProxyError::Timeout)
            }
        }
    }

    pub fn mark_broken(&self) {
        transition_to_broken(&self.state, &self.endpoint);
    }
}

/// Moves `state` to `Broken` and decrements the live-session gauge, but only
/// on the transition that actually flips it -- `mark_broken` and the
/// reader/writer tasks can all race to report the same dead session, and the
/// gauge must only be decremented once per `connect`'s increment.
fn transition_to_broken(state: &AtomicU8, endpoint: &str) {
    let previous = state.swap(SessionState::Broken as u8, Ordering::AcqRel);
    if previous != SessionState::Broken as u8 {
        metrics::BACKEND_SESSIONS.with_label_values(&[endpoint]).dec();
    }
}

type WriterHalf = futures::stream::SplitSink<Framed<TcpStream, RespFrameCodec>, RespFrame>;
type ReaderHalf = futures::stream::SplitStream<Framed<TcpStream, RespFrameCodec>>;

/// Drains the outbound queue onto the socket, handing each reply sink to the
/// reader task (via `inflight_tx`) in write order. On a write error the
/// session transitions to `Broken` and the offending sink is failed directly;
/// the reader's own failure path unwinds everything still in flight.
async fn run_writer(
    mut writer: WriterHalf,
    mut rx: mpsc::Receiver<Pending>,
    inflight_tx: mpsc::UnboundedSender<ReplySink>,
    state: Arc<AtomicU8>,
    endpoint: String,
) {
    while let Some(pending) = rx.recv().await {
        if state.load(Ordering::Acquire) == SessionState::Broken as u8 {
            let _ = pending.reply.send(Err(ProxyError::BackendUnreachable));
            continue;
        }
        if writer.send(pending.frame).await.is_err() {
            warn!("backend {endpoint}: write failed, marking session broken");
            transition_to_broken(&state, &endpoint);
            let _ = pending.reply.send(Err(ProxyError::BackendUnreachable));
            continue;
        }
        if inflight_tx.send(pending.reply).is_err() {
            break;
        }
    }
}

/// Decodes replies in order and completes each queued sink FIFO. On a
/// decode error, EOF, or writer failure, every sink still queued is failed
/// with `ErrBackendDown` -- the in-order reply contract forbids skipping one.
async fn run_reader(
    mut reader: ReaderHalf,
    mut inflight_rx: mpsc::UnboundedReceiver<ReplySink>,
    state: Arc<AtomicU8>,
    endpoint: String,
) {
    loop {
        let Some(sink) = inflight_rx.recv().await else {
            break;
        };
        match reader.next().await {
            Some(Ok(frame)) => {
                let _ = sink.send(Ok(frame));
            }
            Some(Err(e)) => {
                warn!("backend {endpoint}: decode error: {e}, marking session broken");
                transition_to_broken(&state, &endpoint);
                let _ = sink.send(Err(ProxyError::BackendUnreachable));
                break;
            }
            None => {
                warn!("backend {endpoint}: connection closed by peer");
                transition_to_broken(&state, &endpoint);
                let _ = sink.send(Err(ProxyError::BackendUnreachable));
                break;
            }
        }
    }
    // Drain and fail anything left queued once the session is dead.
    while let Ok(sink) = inflight_rx.try_recv() {
        let _ = sink.send(Err(ProxyError::BackendUnreachable));
    }
}
