// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The pending-call registry: id → one-shot completion slot.
//!
//! Guarded by a single `std::sync::Mutex`. Both the issuing path (any caller
//! thread/task) and the dispatch path (the socket's inbound read task)
//! serialize through it. The lock is only ever held for a lookup+removal or
//! an insert — slot resolution itself always happens after the lock is
//! released, so resolving a slot (which may run user callbacks) never nests
//! under the registry lock.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::value::Value;

/// What a pending call resolves to: a decoded return value, or an error string.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Value(Value),
    Error(String),
}

/// The sending half of a one-shot completion. Consumed exactly once.
pub type CompletionSlot = oneshot::Sender<CallOutcome>;

/// Future-side handle returned to the caller of `metaCall`.
pub type CallFuture = oneshot::Receiver<CallOutcome>;

/// Maps in-flight request ids to their completion slot.
#[derive(Default)]
pub struct PendingCallRegistry {
    slots: Mutex<HashMap<u32, CompletionSlot>>,
}

impl PendingCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new slot for `id`. If `id` is already present this is a bug
    /// condition (id-generation should guarantee uniqueness): the old slot
    /// is logged and dropped (resolving it to nothing, since the receiver
    /// just sees the sender go away) and the new slot takes its place —
    /// overwrite is never silent.
    pub fn insert(&self, id: u32, slot: CompletionSlot) {
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slots.insert(id, slot).is_some() {
            tracing::error!(id, "pending-call registry: overwriting an in-flight request id");
        }
    }

    /// Atomically find-and-remove the slot for `id`.
    pub fn take(&self, id: u32) -> Option<CompletionSlot> {
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.remove(&id)
    }

    /// Whether `id` is currently in flight. Test/diagnostic helper.
    pub fn contains(&self, id: u32) -> bool {
        let slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        let slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every outstanding slot, e.g. to fail them all on close.
    pub fn take_all(&self) -> Vec<CompletionSlot> {
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.drain().map(|(_, slot)| slot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_take_resolves_future() {
        let registry = PendingCallRegistry::new();
        let (tx, rx) = oneshot::channel();
        registry.insert(1, tx);
        assert!(registry.contains(1));

        let slot = registry.take(1);
        assert!(slot.is_some());
        assert!(!registry.contains(1));

        if let Some(slot) = slot {
            let _ = slot.send(CallOutcome::Value(Value::Int(42)));
        }
        match rx.await {
            Ok(CallOutcome::Value(Value::Int(v))) => assert_eq!(v, 42),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn take_on_missing_id_returns_none() {
        let registry = PendingCallRegistry::new();
        assert!(registry.take(99).is_none());
    }

    #[tokio::test]
    async fn overwrite_replaces_slot_with_the_new_one() {
        let registry = PendingCallRegistry::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        registry.insert(1, tx1);
        registry.insert(1, tx2);
        assert_eq!(registry.len(), 1);

        if let Some(slot) = registry.take(1) {
            let _ = slot.send(CallOutcome::Error("x".into()));
        }
        // the original slot's sender was dropped when overwritten, so its
        // receiver observes a closed channel rather than a value.
        assert!(rx1.await.is_err());
        assert!(matches!(rx2.await, Ok(CallOutcome::Error(_))));
    }
}
