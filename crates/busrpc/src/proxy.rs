// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The client-side remote object proxy: method invocation, signal
//! subscription, and incoming-message demultiplexing for one service on one
//! transport socket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{mpsc, oneshot};

use crate::message::{control_message, Message, MessageType, FUNCTION_REGISTER_EVENT, FUNCTION_UNREGISTER_EVENT};
use crate::meta::MetaObject;
use crate::registry::{CallFuture, CallOutcome, PendingCallRegistry};
use crate::socket::{DispatchToken, TransportSocket};
use crate::value::Value;

/// A local signal subscriber: invoked with the event's decoded argument tuple.
pub type Subscriber = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Policy applied to outstanding pending calls when a proxy is closed.
///
/// `LeaveDangling` leaves outstanding futures dangling (the caller holds a
/// future that will simply never resolve); `CancelPending` is available to
/// callers who would rather fail fast on close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePolicy {
    LeaveDangling,
    CancelPending,
}

struct Attachment<S> {
    socket: Arc<S>,
    token: DispatchToken,
}

/// Per-event, per-subscriber local table backing `connect`/`disconnect`.
#[derive(Default)]
struct SubscriberTable {
    next_index: Mutex<HashMap<u32, u32>>,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
}

impl SubscriberTable {
    fn register(&self, event: u32, subscriber: Subscriber) -> u64 {
        let index = {
            let mut counters = match self.next_index.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let counter = counters.entry(event).or_insert(0);
            let idx = *counter;
            *counter = counter.wrapping_add(1);
            idx
        };
        let link = ((event as u64) << 32) | (index as u64);
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.insert(link, subscriber);
        link
    }

    fn remove(&self, link: u64) -> bool {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.remove(&link).is_some()
    }

    fn trigger(&self, event: u32, params: &[Value]) {
        let handlers: Vec<Subscriber> = {
            let subscribers = match self.subscribers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            subscribers
                .iter()
                .filter(|(link, _)| ((*link >> 32) as u32) == event)
                .map(|(_, subscriber)| Arc::clone(subscriber))
                .collect()
        };
        for handler in handlers {
            handler(params);
        }
    }
}

/// The client-side stand-in for a service hosted on a peer.
pub struct RemoteObjectProxy<S: TransportSocket> {
    service: u32,
    meta: MetaObject,
    attachment: Mutex<Option<Attachment<S>>>,
    registry: PendingCallRegistry,
    subscribers: SubscriberTable,
    /// Ordered feed for `RegisterEvent`/`UnregisterEvent` control messages.
    /// A single background task drains this in send order, so a `connect`
    /// immediately followed by a `disconnect` cannot have its
    /// `UnregisterEvent` race ahead of the `RegisterEvent` on the wire.
    control_tx: mpsc::UnboundedSender<Message>,
}

impl<S: TransportSocket + 'static> RemoteObjectProxy<S> {
    /// Construct a proxy bound to `service`/`meta`, attaching `socket`'s
    /// inbound dispatcher immediately.
    pub fn new(service: u32, meta: MetaObject, socket: Arc<S>) -> Arc<Self> {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let proxy = Arc::new(RemoteObjectProxy {
            service,
            meta,
            attachment: Mutex::new(None),
            registry: PendingCallRegistry::new(),
            subscribers: SubscriberTable::default(),
            control_tx,
        });
        Self::set_transport_socket(&proxy, Some(socket));
        tokio::spawn(Self::run_control_loop(Arc::downgrade(&proxy), control_rx));
        proxy
    }

    /// Drains `control_tx` one message at a time, in send order, so
    /// `RegisterEvent`/`UnregisterEvent` calls preserve the order `connect`
    /// and `disconnect` were invoked in. Holds only a `Weak` reference: the
    /// loop must not keep the proxy alive on its own (it is, after all, the
    /// thing sending into the channel this loop drains).
    async fn run_control_loop(proxy: Weak<Self>, mut control_rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = control_rx.recv().await {
            let Some(proxy) = proxy.upgrade() else { break };
            let function = message.address.function;
            if !proxy.send_message(message).await {
                tracing::warn!(function, "control message send failed");
            }
        }
    }

    pub fn service(&self) -> u32 {
        self.service
    }

    /// Detach any previous dispatcher, then attach `socket`'s dispatcher
    /// (if given). Passing `None` only detaches.
    pub fn set_transport_socket(self: &Arc<Self>, socket: Option<Arc<S>>) {
        Self::detach(self);
        let Some(socket) = socket else {
            return;
        };
        let weak = Arc::downgrade(self);
        let token = socket.message_pending_connect(
            self.service,
            Arc::new(move |msg| {
                if let Some(proxy) = weak.upgrade() {
                    proxy.on_message_pending(msg);
                }
            }),
        );
        let mut attachment = match self.attachment.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *attachment = Some(Attachment { socket, token });
    }

    fn detach(self: &Arc<Self>) {
        let mut attachment = match self.attachment.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(old) = attachment.take() {
            old.socket.message_pending_disconnect(self.service, old.token);
        }
    }

    /// Idempotent close: detaches the dispatcher and, per `policy`, either
    /// leaves outstanding calls dangling (the default) or fails them with a
    /// cancellation error.
    pub fn close(self: &Arc<Self>, policy: ClosePolicy) {
        Self::detach(self);
        if policy == ClosePolicy::CancelPending {
            for slot in self.registry.take_all() {
                let _ = slot.send(CallOutcome::Error("proxy closed".to_owned()));
            }
        }
    }

    fn current_socket(&self) -> Option<Arc<S>> {
        let attachment = match self.attachment.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        attachment.as_ref().map(|a| Arc::clone(&a.socket))
    }

    async fn send_message(&self, message: Message) -> bool {
        match self.current_socket() {
            Some(socket) if socket.is_connected() => socket.send(message).await,
            _ => false,
        }
    }

    /// Issue an outbound method call. The returned future resolves when a
    /// matching Reply/Error is dispatched, or immediately if the send
    /// itself failed.
    pub async fn meta_call(&self, function: u32, args: Value) -> CallFuture {
        let method_label =
            self.meta.method(function).map(|m| m.name.clone()).unwrap_or_else(|| function.to_string());

        let message = Message::call(self.service, function, args);
        if let Some(method) = self.meta.method(function) {
            let actual_args: String = match message.payload.as_tuple() {
                Some(items) => items.iter().map(Value::signature).collect(),
                None => message.payload.signature(),
            };
            debug_assert_eq!(
                actual_args,
                method.args_signature(),
                "metaCall argument signature mismatch for {method_label}"
            );
        }

        let id = message.address.id;
        let (tx, rx) = oneshot::channel();
        self.registry.insert(id, tx);

        let sent = self.send_message(message).await;
        if !sent {
            tracing::warn!(method = %method_label, id, "call could not be sent, resolving with transport error");
            if let Some(slot) = self.registry.take(id) {
                let _ = slot
                    .send(CallOutcome::Error(format!("call to {method_label} failed: transport unavailable")));
            }
        }
        rx
    }

    /// Subscribe `subscriber` to `event`, returning its link id. Registers
    /// remotely via `RegisterEvent`, enqueued onto the proxy's ordered
    /// control-send loop (not a detached task) so that a `disconnect` issued
    /// right after this `connect` cannot race its `UnregisterEvent` ahead of
    /// this `RegisterEvent` on the wire.
    pub fn connect(self: &Arc<Self>, event: u32, subscriber: Subscriber) -> u64 {
        let link = self.subscribers.register(event, subscriber);
        let msg = control_message(FUNCTION_REGISTER_EVENT, self.service, event, link);
        if self.control_tx.send(msg).is_err() {
            tracing::warn!(event, link, "RegisterEvent could not be queued, control loop is gone");
        }
        link
    }

    /// Unsubscribe `link`. Local removal is authoritative: if it fails,
    /// nothing is sent and `false` is returned. Otherwise `UnregisterEvent`
    /// is enqueued onto the same ordered control-send loop as `connect` and
    /// `true` is returned regardless of whether the send eventually succeeds.
    pub fn disconnect(self: &Arc<Self>, link: u64) -> bool {
        if !self.subscribers.remove(link) {
            return false;
        }
        let event = (link >> 32) as u32;
        let msg = control_message(FUNCTION_UNREGISTER_EVENT, self.service, event, link);
        if self.control_tx.send(msg).is_err() {
            tracing::warn!(event, link, "UnregisterEvent could not be queued, control loop is gone");
        }
        true
    }

    /// Emit an event for this service/function. Fire-and-forget: send
    /// failure is logged, never surfaced to the caller.
    pub async fn meta_emit(&self, function: u32, args: Value) {
        let msg = Message::event(self.service, function, args);
        if !self.send_message(msg).await {
            tracing::warn!(function, "metaEmit send failed");
        }
    }

    fn on_message_pending(&self, msg: Message) {
        let id = msg.address.id;
        match msg.ty {
            MessageType::Reply => {
                let slot = self.registry.take(id);
                match slot {
                    None => tracing::error!(id, "reply for unknown request id, dropping"),
                    Some(slot) => {
                        let outcome = self.decode_reply(&msg);
                        let _ = slot.send(outcome);
                    }
                }
            }
            MessageType::Error => {
                let slot = self.registry.take(id);
                match slot {
                    None => tracing::error!(id, "error reply for unknown request id, dropping"),
                    Some(slot) => {
                        let outcome = match &msg.payload {
                            Value::Str(text) => CallOutcome::Error(text.clone()),
                            _ => CallOutcome::Error("unknown error".to_owned()),
                        };
                        let _ = slot.send(outcome);
                    }
                }
            }
            MessageType::Event => self.dispatch_event(&msg),
            MessageType::Call => {
                tracing::warn!(id, "unexpected Call message delivered to a proxy, dropping");
            }
        }
    }

    fn decode_reply(&self, msg: &Message) -> CallOutcome {
        let Some(method) = self.meta.method(msg.address.function) else {
            return CallOutcome::Error(format!("unknown method id {}", msg.address.function));
        };
        match method.return_signature() {
            None => CallOutcome::Error(format!("method {} has no declared return type", method.name)),
            Some(expected) => {
                let actual = msg.payload.signature();
                if actual == expected {
                    CallOutcome::Value(msg.payload.clone())
                } else {
                    CallOutcome::Error(format!(
                        "reply signature mismatch for {}: expected {expected}, got {actual}",
                        method.name
                    ))
                }
            }
        }
    }

    fn dispatch_event(&self, msg: &Message) {
        let Some(signal) = self.meta.signal(msg.address.function) else {
            tracing::warn!(event = msg.address.function, "event for unregistered signal, dropping");
            return;
        };
        let expected = signal.args_signature();
        let Some(items) = msg.payload.as_tuple() else {
            tracing::warn!(event = msg.address.function, "event payload is not a tuple, dropping");
            return;
        };
        let actual: String = items.iter().map(Value::signature).collect();
        if actual != expected {
            tracing::warn!(
                event = msg.address.function,
                expected,
                actual = %actual,
                "event payload signature mismatch, dropping"
            );
            return;
        }
        self.subscribers.trigger(msg.address.function, items);
    }
}
