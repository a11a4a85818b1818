// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The transport server: accepts inbound connections, wraps each into a
//! framed socket, and hands it off via a pending-connection queue.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpSocket};

use crate::error::BusError;
use crate::socket::FramedSocket;

/// Notified once per accepted connection. Expected to drain via
/// [`TransportServer::next_pending_connection`]; notifications prior to
/// [`TransportServer::set_callbacks`] installing a delegate are lost.
pub trait ServerDelegate: Send + Sync {
    fn new_connection(&self);
}

type DelegateSlot = Mutex<Option<Arc<dyn ServerDelegate>>>;

/// Server-side listener. Starts `Idle`; `start` transitions it to
/// `Listening`, which is terminal — there is no stop operation.
#[derive(Default)]
pub struct TransportServer {
    queue: Mutex<VecDeque<Arc<FramedSocket>>>,
    delegate: DelegateSlot,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl TransportServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Install or replace the delegate notified on new connections.
    pub fn set_callbacks(&self, delegate: Arc<dyn ServerDelegate>) {
        let mut slot = match self.delegate.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(delegate);
    }

    /// Parse `scheme://host:port`, bind on `host:port`, and begin accepting
    /// in a spawned task. Returns `false` (logging why) if the host is not a
    /// dotted-quad IPv4 address or the port does not parse as a `u16`;
    /// returns `false` if the bind itself fails.
    pub async fn start(self: &Arc<Self>, url: &str) -> bool {
        let (host, port) = match parse_host_port(url) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(url, %err, "rejecting server url");
                return false;
            }
        };

        let listener = match bind_reuseaddr(host, port) {
            Ok(listener) => listener,
            Err(err) => {
                tracing::warn!(url, %err, "bind failed");
                return false;
            }
        };

        match listener.local_addr() {
            Ok(addr) => {
                let mut slot = match self.local_addr.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *slot = Some(addr);
            }
            Err(err) => tracing::warn!(%err, "could not read bound local address"),
        }

        let server = Arc::clone(self);
        tokio::spawn(async move {
            server.accept_loop(listener).await;
        });
        true
    }

    /// The address actually bound by the most recent successful `start`
    /// (useful when the url passed port `0` to request an ephemeral port).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        let slot = match self.local_addr.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!(%err, "accept failed, continuing");
                    continue;
                }
            };
            tracing::debug!(%peer, "accepted connection");
            let socket = FramedSocket::new(stream);
            self.push(socket);
            self.notify_new_connection();
        }
    }

    fn push(&self, socket: Arc<FramedSocket>) {
        let mut queue = match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.push_back(socket);
    }

    fn notify_new_connection(&self) {
        let delegate = {
            let slot = match self.delegate.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.clone()
        };
        match delegate {
            Some(delegate) => delegate.new_connection(),
            None => tracing::debug!("new connection accepted with no delegate installed, notification lost"),
        }
    }

    /// Pop the oldest accepted socket, or `None` if the queue is empty.
    pub fn next_pending_connection(&self) -> Option<Arc<FramedSocket>> {
        let mut queue = match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.pop_front()
    }

    /// Number of sockets currently queued. Test/diagnostic helper.
    pub fn pending_len(&self) -> usize {
        let queue = match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.len()
    }
}

fn parse_host_port(url: &str) -> Result<(Ipv4Addr, u16), BusError> {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let (host, port) = without_scheme.rsplit_once(':').ok_or(BusError::InvalidPort)?;
    let host = Ipv4Addr::from_str(host).map_err(|_| BusError::InvalidHost)?;
    let port: u16 = port.parse().map_err(|_| BusError::InvalidPort)?;
    Ok((host, port))
}

/// Generous default backlog for a listener with no caller-specified bound.
const LISTEN_BACKLOG: u32 = 1024;

/// Bind with `SO_REUSEADDR` set before `listen`, since `TcpListener::bind`
/// alone does not set it. Close-on-free/close-on-exec are the platform
/// default for a socket owned by a single `TcpSocket`/`TcpListener`, so only
/// address reuse needs to be requested explicitly.
fn bind_reuseaddr(host: Ipv4Addr, port: u16) -> std::io::Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::new(IpAddr::V4(host), port))?;
    socket.listen(LISTEN_BACKLOG)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::value::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingDelegate {
        count: AtomicUsize,
    }

    impl ServerDelegate for CountingDelegate {
        fn new_connection(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn parse_host_port_accepts_dotted_quad() {
        let (host, port) = parse_host_port("tcp://127.0.0.1:4242").expect("parses");
        assert_eq!(host, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(port, 4242);
    }

    #[test]
    fn parse_host_port_rejects_hostname() {
        assert_eq!(parse_host_port("tcp://localhost:4242"), Err(BusError::InvalidHost));
    }

    #[test]
    fn parse_host_port_rejects_missing_port() {
        assert_eq!(parse_host_port("tcp://127.0.0.1"), Err(BusError::InvalidPort));
    }

    #[test]
    fn parse_host_port_accepts_ephemeral_zero() {
        let (_, port) = parse_host_port("tcp://127.0.0.1:0").expect("parses");
        assert_eq!(port, 0);
    }

    #[tokio::test]
    async fn start_on_zero_port_binds_an_ephemeral_port() {
        let server = TransportServer::new();
        assert!(server.start("tcp://127.0.0.1:0").await);
    }

    #[tokio::test]
    async fn start_rejects_non_ipv4_host() {
        let server = TransportServer::new();
        assert!(!server.start("tcp://example.com:9999").await);
    }

    #[tokio::test]
    async fn accept_ordering_is_fifo_across_three_clients() {
        let server = TransportServer::new();
        let delegate = Arc::new(CountingDelegate::default());
        server.set_callbacks(Arc::clone(&delegate) as Arc<dyn ServerDelegate>);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let server_for_loop = Arc::clone(&server);
        tokio::spawn(async move {
            server_for_loop.accept_loop(listener).await;
        });

        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(FramedSocket::connect(addr).await.expect("connect"));
        }

        for _ in 0..200 {
            if delegate.count.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(delegate.count.load(Ordering::SeqCst), 3);

        for client in &clients {
            let _ = client.send(Message::call(1, 1, Value::Nil)).await;
        }

        assert!(server.next_pending_connection().is_some());
        assert!(server.next_pending_connection().is_some());
        assert!(server.next_pending_connection().is_some());
        assert!(server.next_pending_connection().is_none());
    }
}
