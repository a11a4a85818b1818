// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! busrpc: the client/server core of a distributed object bus.
//!
//! A [`proxy::RemoteObjectProxy`] is the client-side stand-in for a service
//! hosted on a peer: it turns method calls into wire [`message::Message`]s,
//! correlates asynchronous replies through a [`registry::PendingCallRegistry`],
//! and dispatches inbound events to local subscribers. A
//! [`server::TransportServer`] accepts inbound connections and hands them off
//! through a FIFO pending-connection queue. Both sit on top of a
//! [`socket::TransportSocket`], this crate's socket abstraction, realized
//! concretely by [`socket::FramedSocket`] over TCP.
//!
//! The session layer (handshake, service directory lookup) and the generic
//! type system beyond the minimal [`value::Value`]/signature contract are
//! external collaborators this crate does not implement.

pub mod config;
pub mod error;
pub mod message;
pub mod meta;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod socket;
pub mod value;
