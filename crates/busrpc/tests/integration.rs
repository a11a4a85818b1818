// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests wiring `TransportServer` + `FramedSocket` +
//! `RemoteObjectProxy` over real loopback TCP, rather than against a mock
//! socket (see the `proxy` module's own unit tests for the mock-backed
//! coverage of every dispatch branch).

use std::sync::{Arc, Mutex};

use busrpc::message::Message;
use busrpc::meta::MetaObject;
use busrpc::proxy::RemoteObjectProxy;
use busrpc::server::{ServerDelegate, TransportServer};
use busrpc::socket::FramedSocket;
use busrpc::value::Value;

#[derive(Default)]
struct RecordingDelegate {
    notified: Mutex<usize>,
}

impl ServerDelegate for RecordingDelegate {
    fn new_connection(&self) {
        if let Ok(mut count) = self.notified.lock() {
            *count += 1;
        }
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

fn echo_meta() -> MetaObject {
    MetaObject::new().with_method(3, "add", "()i").with_signal(9, "tick", "(i)")
}

/// Scenario 1 (happy call) and scenario 5 (event dispatch) driven over a real
/// accepted TCP connection instead of a `MockSocket`.
#[tokio::test]
async fn proxy_round_trip_and_event_dispatch_over_real_tcp() {
    let server = TransportServer::new();
    let delegate = Arc::new(RecordingDelegate::default());
    server.set_callbacks(Arc::clone(&delegate) as Arc<dyn ServerDelegate>);
    assert!(server.start("tcp://127.0.0.1:0").await);
    let addr = server.local_addr().expect("server reports its bound address");

    let client_socket = FramedSocket::connect(addr).await.expect("client connects to server");

    wait_for(|| delegate.notified.lock().map(|c| *c >= 1).unwrap_or(false)).await;
    assert_eq!(*delegate.notified.lock().expect("lock"), 1);

    let server_socket = server.next_pending_connection().expect("accepted socket queued");
    assert!(server.next_pending_connection().is_none());

    // Client-side proxy for service 7, talking to a peer that plays the
    // "service 7" role on the accepted server-side socket.
    let client_proxy = RemoteObjectProxy::new(7, echo_meta(), client_socket);

    // The peer: on receiving a Call for method 3, reply with `i:42`; on
    // receiving a RegisterEvent control call, emit one Event(9, (5)) back.
    let peer_socket = Arc::clone(&server_socket);
    server_socket.message_pending_connect(
        7,
        Arc::new(move |msg: Message| {
            if msg.address.function == 3 {
                let reply = Message::reply_to(&msg, Value::Int(42));
                let sock = Arc::clone(&peer_socket);
                tokio::spawn(async move {
                    sock.send(reply).await;
                });
            }
        }),
    );
    let peer_for_control = Arc::clone(&server_socket);
    server_socket.message_pending_connect(
        busrpc::message::SERVICE_SERVER,
        Arc::new(move |msg: Message| {
            if msg.address.function == busrpc::message::FUNCTION_REGISTER_EVENT {
                let event = Message::event(7, 9, Value::Tuple(vec![Value::Int(5)]));
                let sock = Arc::clone(&peer_for_control);
                tokio::spawn(async move {
                    sock.send(event).await;
                });
            }
        }),
    );

    let fut = client_proxy.meta_call(3, Value::Tuple(vec![])).await;
    match fut.await {
        Ok(busrpc::registry::CallOutcome::Value(Value::Int(v))) => assert_eq!(v, 42),
        other => panic!("unexpected call outcome: {other:?}"),
    }

    let received: Arc<Mutex<Option<i64>>> = Arc::new(Mutex::new(None));
    let received_clone = Arc::clone(&received);
    client_proxy.connect(
        9,
        Arc::new(move |params: &[Value]| {
            if let (Some(first), Ok(mut slot)) = (params.first(), received_clone.lock()) {
                *slot = first.as_int();
            }
        }),
    );

    wait_for(|| received.lock().map(|g| g.is_some()).unwrap_or(false)).await;
    assert_eq!(*received.lock().expect("lock"), Some(5));
}
