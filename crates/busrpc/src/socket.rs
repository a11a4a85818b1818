// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The transport socket: the external collaborator consumed by the proxy,
//! plus [`FramedSocket`], this crate's concrete, idiomatic realization of it
//! over a length-delimited TCP stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::message::Message;

/// A registered per-service inbound handler.
pub type DispatchHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Opaque handle returned by [`TransportSocket::message_pending_connect`],
/// presented back to [`TransportSocket::message_pending_disconnect`] to
/// detach the same registration (and no other, if it has since been
/// replaced).
pub type DispatchToken = u64;

/// The full-duplex framed channel contract consumed by the proxy.
///
/// `send` is non-blocking: it queues the message onto the socket and
/// reports whether that queuing succeeded, not whether the peer has
/// received it.
pub trait TransportSocket: Send + Sync {
    fn send(&self, message: Message) -> impl std::future::Future<Output = bool> + Send;
    fn is_connected(&self) -> bool;
    fn message_pending_connect(&self, service: u32, handler: DispatchHandler) -> DispatchToken;
    fn message_pending_disconnect(&self, service: u32, token: DispatchToken);
}

struct DispatchEntry {
    token: DispatchToken,
    handler: DispatchHandler,
}

/// Shared per-service dispatch table. Lives behind an `Arc` so both halves
/// of a split framed stream (or, in tests, a synthetic peer) can reach it.
#[derive(Default)]
struct DispatchTable {
    entries: Mutex<HashMap<u32, DispatchEntry>>,
    next_token: AtomicU64,
}

impl DispatchTable {
    fn connect(&self, service: u32, handler: DispatchHandler) -> DispatchToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(service, DispatchEntry { token, handler });
        token
    }

    fn disconnect(&self, service: u32, token: DispatchToken) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let std::collections::hash_map::Entry::Occupied(entry) = entries.entry(service) {
            if entry.get().token == token {
                entry.remove();
            }
        }
    }

    fn dispatch(&self, message: Message) {
        let handler = {
            let entries = match self.entries.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            entries.get(&message.address.service).map(|entry| entry.handler.clone())
        };
        match handler {
            Some(handler) => handler(message),
            None => {
                tracing::warn!(service = message.address.service, "no dispatcher registered for service");
            }
        }
    }
}

/// A `TcpStream`-backed [`TransportSocket`].
///
/// Framing uses `tokio_util::codec::LengthDelimitedCodec` (a 4-byte
/// big-endian length prefix) with `serde_json` for the message body. Exact
/// wire byte-format is an implementation choice, not a mandated contract.
pub struct FramedSocket {
    outbound: mpsc::UnboundedSender<Message>,
    dispatch: Arc<DispatchTable>,
    connected: Arc<AtomicBool>,
}

impl FramedSocket {
    /// Wrap an already-connected `TcpStream`, spawning its read and write
    /// pump tasks. Used both by the server's accept loop (one `FramedSocket`
    /// per accepted connection) and by [`FramedSocket::connect`] on the
    /// client side.
    pub fn new(stream: TcpStream) -> Arc<Self> {
        let framed = Framed::new(stream, LengthDelimitedCodec::new());
        let (mut write, mut read) = framed.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let dispatch = Arc::new(DispatchTable::default());
        let connected = Arc::new(AtomicBool::new(true));

        let socket = Arc::new(FramedSocket {
            outbound: outbound_tx,
            dispatch: Arc::clone(&dispatch),
            connected: Arc::clone(&connected),
        });

        let write_connected = Arc::clone(&connected);
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let Ok(bytes) = serde_json::to_vec(&message) else {
                    tracing::error!("failed to encode outbound message, dropping");
                    continue;
                };
                if write.send(Bytes::from(bytes)).await.is_err() {
                    write_connected.store(false, Ordering::Relaxed);
                    break;
                }
            }
            write_connected.store(false, Ordering::Relaxed);
        });

        let read_connected = Arc::clone(&connected);
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let bytes = match frame {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        tracing::debug!(%err, "transport read error, closing");
                        break;
                    }
                };
                match serde_json::from_slice::<Message>(&bytes) {
                    Ok(message) => dispatch.dispatch(message),
                    Err(err) => {
                        tracing::warn!(%err, "malformed frame, dropping");
                    }
                }
            }
            read_connected.store(false, Ordering::Relaxed);
        });

        socket
    }

    /// Connect to a peer and wrap the resulting stream.
    pub async fn connect(addr: impl tokio::net::ToSocketAddrs) -> std::io::Result<Arc<Self>> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream))
    }
}

impl TransportSocket for FramedSocket {
    async fn send(&self, message: Message) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.outbound.send(message).is_ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn message_pending_connect(&self, service: u32, handler: DispatchHandler) -> DispatchToken {
        self.dispatch.connect(service, handler)
    }

    fn message_pending_disconnect(&self, service: u32, token: DispatchToken) {
        self.dispatch.disconnect(service, token);
    }
}
