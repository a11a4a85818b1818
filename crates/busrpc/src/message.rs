// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The message envelope shared by the proxy and the transport server.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Reserved service id addressing the control sub-protocol. All other
/// service ids address user services.
pub const SERVICE_SERVER: u32 = 0;

/// Object id fixed for this core; multi-object-per-service is out of scope.
pub const OBJECT_MAIN: u32 = 1;

/// Control function ids on [`SERVICE_SERVER`].
pub const FUNCTION_REGISTER_EVENT: u32 = 1;
pub const FUNCTION_UNREGISTER_EVENT: u32 = 2;

/// Message type, carried in the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Call,
    Reply,
    Error,
    Event,
}

/// Address of a message: the (service, object, function, id) tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub service: u32,
    pub object: u32,
    pub function: u32,
    pub id: u32,
}

/// A full wire message: fixed header plus a payload value.
///
/// The payload buffer is realized here directly as a [`Value`] rather than
/// as raw bytes, since this crate's `Value`/signature contract already *is*
/// the minimal generic-type-system boundary — an extra byte-buffer
/// indirection in front of it would add nothing but noise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub address: Address,
    pub ty: MessageType,
    pub payload: Value,
}

/// Global request-id counter. Ids only need to be unique per socket, but a
/// single process-wide counter trivially satisfies that and avoids needing a
/// handle back to the owning socket just to mint one.
static NEXT_ID: AtomicU32 = AtomicU32::new(1);

fn next_id() -> u32 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

impl Message {
    /// Build a new outbound Call, generating its id.
    pub fn call(service: u32, function: u32, args: Value) -> Self {
        Message {
            address: Address { service, object: OBJECT_MAIN, function, id: next_id() },
            ty: MessageType::Call,
            payload: args,
        }
    }

    /// Build a Reply addressed back to `request`.
    pub fn reply_to(request: &Message, value: Value) -> Self {
        Message { address: request.address, ty: MessageType::Reply, payload: value }
    }

    /// Build an Error addressed back to `request`. Payload is always `(s)`-shaped:
    /// signature `"s"` followed by the error string.
    pub fn error_to(request: &Message, text: impl Into<String>) -> Self {
        Message {
            address: request.address,
            ty: MessageType::Error,
            payload: Value::Str(text.into()),
        }
    }

    /// Build an outbound Event for this service/function (fire-and-forget, no
    /// reply correlation — the id is still assigned for wire uniformity).
    pub fn event(service: u32, function: u32, args: Value) -> Self {
        Message {
            address: Address { service, object: OBJECT_MAIN, function, id: next_id() },
            ty: MessageType::Event,
            payload: args,
        }
    }

    /// The signature of this message's payload, as observed on the wire.
    pub fn payload_signature(&self) -> String {
        self.payload.signature()
    }
}

/// Build a `RegisterEvent`/`UnregisterEvent` control message to [`SERVICE_SERVER`].
pub fn control_message(function: u32, target_service: u32, event: u32, link: u64) -> Message {
    Message {
        address: Address { service: SERVICE_SERVER, object: OBJECT_MAIN, function, id: next_id() },
        ty: MessageType::Call,
        payload: Value::Tuple(vec![
            Value::Int(target_service as i64),
            Value::Int(event as i64),
            Value::Int(link as i64),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_ids_are_unique() {
        let a = Message::call(7, 3, Value::Nil);
        let b = Message::call(7, 3, Value::Nil);
        assert_ne!(a.address.id, b.address.id);
    }

    #[test]
    fn reply_echoes_request_address() {
        let call = Message::call(7, 3, Value::Nil);
        let reply = Message::reply_to(&call, Value::Int(42));
        assert_eq!(reply.address, call.address);
        assert_eq!(reply.ty, MessageType::Reply);
    }

    #[test]
    fn error_payload_is_string_signature() {
        let call = Message::call(7, 3, Value::Nil);
        let err = Message::error_to(&call, "boom");
        assert_eq!(err.payload_signature(), "s");
        assert_eq!(err.payload.as_str(), Some("boom"));
    }

    #[test]
    fn control_message_carries_service_event_link() {
        let msg = control_message(FUNCTION_REGISTER_EVENT, 7, 9, 0x0009_0001);
        assert_eq!(msg.address.service, SERVICE_SERVER);
        assert_eq!(msg.address.function, FUNCTION_REGISTER_EVENT);
        assert_eq!(msg.payload.as_tuple().map(<[Value]>::len), Some(3));
    }
}
