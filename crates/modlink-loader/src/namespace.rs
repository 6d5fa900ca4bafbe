// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module namespace objects
//!
//! A [`Namespace`] is a shared handle: clones observe the same bindings, and
//! the loader never swaps the handle owned by a Load. Importers therefore see
//! writes made after they linked.

use crate::value::Value;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Binding name carrying the interop marker of a bulk export
pub const MODULE_MARKER: &str = "__esModule";

/// Reference-stable mapping from export name to value
#[derive(Clone, Default)]
pub struct Namespace {
    bindings: Arc<RwLock<IndexMap<String, Value>>>,
}

impl Namespace {
    /// Create an empty namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a namespace holding a copy of `bindings`
    pub fn from_bindings<I, K, V>(bindings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let map = bindings
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            bindings: Arc::new(RwLock::new(map)),
        }
    }

    /// Get an exported value
    pub fn get(&self, name: &str) -> Option<Value> {
        self.bindings.read().get(name).cloned()
    }

    /// Check whether a name is bound
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.read().contains_key(name)
    }

    /// Export names in binding order
    pub fn keys(&self) -> Vec<String> {
        self.bindings.read().keys().cloned().collect()
    }

    /// Number of bindings
    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    /// Check if nothing is exported
    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// Copy of the current bindings
    pub fn snapshot(&self) -> IndexMap<String, Value> {
        self.bindings.read().clone()
    }

    /// Whether both handles point at the same namespace
    pub fn ptr_eq(&self, other: &Namespace) -> bool {
        Arc::ptr_eq(&self.bindings, &other.bindings)
    }

    /// Whether the interop marker is set
    pub fn is_es_module(&self) -> bool {
        self.get(MODULE_MARKER).is_some_and(|v| v.is_truthy())
    }

    /// Render the bindings as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        let bindings = self.bindings.read();
        serde_json::Value::Object(
            bindings
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }

    /// Write one binding, reporting whether it changed
    pub(crate) fn write(&self, name: &str, value: Value) -> bool {
        let mut bindings = self.bindings.write();
        match bindings.get_mut(name) {
            Some(current) if *current == value => false,
            Some(current) => {
                *current = value;
                true
            }
            None => {
                bindings.insert(name.to_string(), value);
                true
            }
        }
    }

    /// Replace every binding in place, keeping the handle
    pub(crate) fn replace(&self, bindings: IndexMap<String, Value>) {
        *self.bindings.write() = bindings;
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Module ")?;
        f.debug_map().entries(self.bindings.read().iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_bindings() {
        let ns = Namespace::new();
        let view = ns.clone();
        assert!(ns.write("value", Value::from("x")));
        assert_eq!(view.get("value"), Some(Value::from("x")));
        assert!(ns.ptr_eq(&view));
        assert!(!ns.ptr_eq(&Namespace::new()));
    }

    #[test]
    fn test_write_reports_changes() {
        let ns = Namespace::new();
        assert!(ns.write("a", Value::from(1)));
        assert!(!ns.write("a", Value::from(1)));
        assert!(ns.write("a", Value::from(2)));
        // a new name counts as a change even when the value is undefined
        assert!(ns.write("b", Value::Undefined));
        assert_eq!(ns.keys(), vec!["a", "b"]);
    }

    #[test]
    fn test_module_marker() {
        let ns = Namespace::from_bindings([(MODULE_MARKER, true)]);
        assert!(ns.is_es_module());
        assert!(!Namespace::new().is_es_module());
    }

    #[test]
    fn test_debug_is_tagged() {
        let ns = Namespace::from_bindings([("default", 42)]);
        assert_eq!(format!("{ns:?}"), "Module {\"default\": 42}");
    }
}
