// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Descriptive metadata for a service's methods and signals.
//!
//! A `MetaObject` is consumed, not owned, by the proxy: it is built once by
//! whatever resolved the service's interface (the session/directory layer,
//! out of scope here) and handed to [`crate::proxy::RemoteObjectProxy`] at
//! construction.

use std::collections::HashMap;

/// A method's declared signature, e.g. `"(is)i"` for `fn(i64, String) -> i64`.
#[derive(Debug, Clone)]
pub struct MethodMeta {
    pub name: String,
    /// Full `(args)ret` signature.
    pub signature: String,
}

impl MethodMeta {
    /// The inner argument-tuple signature, extracted by stripping the outer
    /// parentheses of the full `(args)ret` signature.
    pub fn args_signature(&self) -> &str {
        crate::value::inner_tuple(&self.signature)
    }

    /// The return-type signature: everything after the closing `)`.
    pub fn return_signature(&self) -> Option<&str> {
        let close = self.signature.find(')')?;
        Some(&self.signature[close + 1..])
    }
}

/// A signal's declared signature, e.g. `"(i)"` for a single-int event.
#[derive(Debug, Clone)]
pub struct SignalMeta {
    pub name: String,
    /// Full `(args)` signature; signals have no return type.
    pub signature: String,
}

impl SignalMeta {
    pub fn args_signature(&self) -> &str {
        crate::value::inner_tuple(&self.signature)
    }
}

/// Describes one service's methods and signals, keyed by their function id.
#[derive(Debug, Clone, Default)]
pub struct MetaObject {
    methods: HashMap<u32, MethodMeta>,
    signals: HashMap<u32, SignalMeta>,
}

impl MetaObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, id: u32, name: impl Into<String>, signature: impl Into<String>) -> Self {
        self.methods.insert(id, MethodMeta { name: name.into(), signature: signature.into() });
        self
    }

    pub fn with_signal(mut self, id: u32, name: impl Into<String>, signature: impl Into<String>) -> Self {
        self.signals.insert(id, SignalMeta { name: name.into(), signature: signature.into() });
        self
    }

    pub fn method(&self, id: u32) -> Option<&MethodMeta> {
        self.methods.get(&id)
    }

    pub fn signal(&self, id: u32) -> Option<&SignalMeta> {
        self.signals.get(&id)
    }
}
