// src/connection/handler.rs

//! Drives one client connection end to end. Mirrors the backend session's
//! reader/writer split (§5: "Each client connection is handled by two
//! logical tasks"), but in the opposite direction: here the *writer* is the
//! side that must reassemble out-of-order completions, since dispatching a
//! frame may mean waiting on an arbitrary, independently-slow backend.
//!
//! The reader decodes frames and dispatches each one onto its own task
//! immediately, handing the resulting `JoinHandle` to the writer over a
//! channel in arrival order. The writer awaits those handles strictly in
//! that order, so a fast reply to request 2 still waits behind a slow
//! request 1 -- this is the per-client ordering guarantee -- while the two
//! backends serving them run concurrently instead of serializing on each
//! other.

use super::guard::ConnectionGuard;
use super::session::ClientSession;
use crate::core::dispatch::Dispatcher;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// Bounds how many dispatched-but-not-yet-written replies a single client
/// connection may have in flight before the reader stops accepting new
/// frames from the socket -- a well-behaved client pipelining requests
/// shouldn't notice; a client that floods requests without ever reading
/// replies is backpressured instead of let to grow this unbounded.
const INFLIGHT_CAPACITY: usize = 256;

/// Owns the framed client socket and the pieces needed to answer it.
pub struct ConnectionHandler {
    socket: TcpStream,
    session: ClientSession,
    dispatcher: Arc<Dispatcher>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ConnectionHandler {
    pub fn new(
        socket: TcpStream,
        addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            session: ClientSession::new(addr),
            dispatcher,
            shutdown_rx,
        }
    }

    /// Runs the connection's request/reply loop until the client disconnects,
    /// a protocol error occurs, or the server signals shutdown. Consumes
    /// `self`: the socket is split into owned halves for the reader/writer
    /// tasks below, so there is nothing left to reuse afterward.
    pub async fn run(mut self) {
        let _guard = ConnectionGuard::new(self.session.addr);
        let framed = Framed::new(self.socket, RespFrameCodec::new(2));
        let (mut sink, mut stream) = framed.split();

        let (inflight_tx, mut inflight_rx) = mpsc::channel::<JoinHandle<RespFrame>>(INFLIGHT_CAPACITY);
        let addr = self.session.addr;

        let mut writer_shutdown = self.shutdown_rx.resubscribe();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = writer_shutdown.recv() => {
                        let _ = sink.send(RespFrame::error("server is shutting down")).await;
                        return;
                    }
                    next = inflight_rx.recv() => {
                        let Some(handle) = next else { return };
                        let reply = match handle.await {
                            Ok(reply) => reply,
                            Err(e) => {
                                warn!("connection {addr}: dispatch task panicked: {e:?}");
                                RespFrame::error("internal error")
                            }
                        };
                        if sink.send(reply).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => break,
                next = stream.next() => {
                    match next {
                        Some(Ok(frame)) => {
                            let dispatcher = self.dispatcher.clone();
                            let handle = tokio::spawn(async move { dispatcher.dispatch(frame).await });
                            // The writer task owns reassembly order; if it has
                            // already exited (client gone, shutdown), dropping
                            // this handle simply cancels its in-flight reply.
                            if inflight_tx.send(handle).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            warn!("connection {addr}: protocol error: {e}");
                            let handle = tokio::spawn(async move { RespFrame::error(e.to_string()) });
                            let _ = inflight_tx.send(handle).await;
                            break;
                        }
                        None => {
                            debug!("connection {addr} closed by peer");
                            break;
                        }
                    }
                }
            }
        }

        drop(inflight_tx);
        let _ = writer.await;
    }
}
