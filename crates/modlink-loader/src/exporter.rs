// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Live-binding exporter
//!
//! A module publishes values through its [`Exporter`]. A write only counts
//! when the name is new or the value is not strictly equal to the previous
//! one; any counted write re-runs every importer setter, in registration
//! order, with the full namespace.

use crate::declaration::Setter;
use crate::namespace::Namespace;
use crate::value::Value;
use crate::ModuleId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A setter registered by an importing module
#[derive(Clone)]
pub(crate) struct Importer {
    pub(crate) id: ModuleId,
    pub(crate) setter: Setter,
}

/// Export side of a Load: namespace, importer setters and hoisting flags
#[derive(Default)]
pub(crate) struct Bindings {
    namespace: Namespace,
    importers: Mutex<Vec<Importer>>,
    hoisted: AtomicBool,
    executing: AtomicBool,
}

impl Bindings {
    pub(crate) fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            ..Self::default()
        }
    }

    pub(crate) fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Exported anything before execution started
    pub(crate) fn is_hoisted(&self) -> bool {
        self.hoisted.load(Ordering::SeqCst)
    }

    pub(crate) fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_execution(&self) {
        self.executing.store(true, Ordering::SeqCst);
    }

    pub(crate) fn add_importer(&self, id: ModuleId, setter: Setter) {
        self.importers.lock().push(Importer { id, setter });
    }

    /// Drop every setter registered by `id`
    pub(crate) fn remove_importer(&self, id: &ModuleId) {
        self.importers.lock().retain(|importer| importer.id != *id);
    }

    pub(crate) fn importers(&self) -> Vec<Importer> {
        self.importers.lock().clone()
    }

    /// Run every importer setter against the current namespace
    pub(crate) fn notify(&self) {
        // Setters may export or link re-entrantly, so never call them under the lock.
        let importers = self.importers();
        for importer in &importers {
            (importer.setter)(&self.namespace);
        }
    }

    fn note_export(&self) {
        if !self.is_executing() {
            self.hoisted.store(true, Ordering::SeqCst);
        }
    }
}

/// Handle a module uses to publish its exports
#[derive(Clone)]
pub struct Exporter {
    bindings: Arc<Bindings>,
}

impl Exporter {
    pub(crate) fn new(bindings: Arc<Bindings>) -> Self {
        Self { bindings }
    }

    /// Export one named value, returning it
    pub fn export(&self, name: &str, value: impl Into<Value>) -> Value {
        let value = value.into();
        self.bindings.note_export();
        if self.bindings.namespace.write(name, value.clone()) {
            self.bindings.notify();
        }
        value
    }

    /// Export many values at once
    ///
    /// Importers are notified once, after every binding is written. A
    /// [`MODULE_MARKER`](crate::MODULE_MARKER) entry is copied into the
    /// namespace like any other binding.
    pub fn export_all<I, K, V>(&self, bindings: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.bindings.note_export();
        let mut changed = false;
        for (name, value) in bindings {
            changed |= self.bindings.namespace.write(name.as_ref(), value.into());
        }
        if changed {
            self.bindings.notify();
        }
    }

    /// Export every binding of another namespace (`export * from`)
    pub fn export_from(&self, namespace: &Namespace) {
        self.export_all(namespace.snapshot());
    }

    /// The namespace this exporter writes into
    pub fn namespace(&self) -> Namespace {
        self.bindings.namespace.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::MODULE_MARKER;

    fn recording_setter(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Setter {
        let log = Arc::clone(log);
        Arc::new(move |ns: &Namespace| {
            let value = ns.get("value").map(|v| v.to_string()).unwrap_or_default();
            log.lock().push(format!("{tag}:{value}"));
        })
    }

    #[test]
    fn test_identical_export_notifies_once() {
        let bindings = Arc::new(Bindings::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        bindings.add_importer("importer".into(), recording_setter(&log, "s"));

        let exporter = Exporter::new(Arc::clone(&bindings));
        exporter.export("value", "x");
        exporter.export("value", "x");

        assert_eq!(*log.lock(), vec!["s:x"]);
    }

    #[test]
    fn test_setters_run_in_registration_order() {
        let bindings = Arc::new(Bindings::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        bindings.add_importer("first".into(), recording_setter(&log, "s1"));
        bindings.add_importer("second".into(), recording_setter(&log, "s2"));

        Exporter::new(Arc::clone(&bindings)).export("value", 1);

        assert_eq!(*log.lock(), vec!["s1:1", "s2:1"]);
    }

    #[test]
    fn test_bulk_export_notifies_once_and_keeps_marker() {
        let bindings = Arc::new(Bindings::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        bindings.add_importer("importer".into(), recording_setter(&log, "s"));

        let exporter = Exporter::new(Arc::clone(&bindings));
        exporter.export_all([
            ("value", Value::from("a")),
            ("other", Value::from(2)),
            (MODULE_MARKER, Value::from(true)),
        ]);

        assert_eq!(log.lock().len(), 1);
        assert!(exporter.namespace().is_es_module());

        exporter.export_all([("value", "a"), ("other", "b")]);
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_hoisting_only_before_execution() {
        let bindings = Arc::new(Bindings::default());
        let exporter = Exporter::new(Arc::clone(&bindings));
        assert!(!bindings.is_hoisted());

        bindings.begin_execution();
        exporter.export("late", 1);
        assert!(!bindings.is_hoisted());

        let early = Arc::new(Bindings::default());
        Exporter::new(Arc::clone(&early)).export("fn", "hoisted");
        assert!(early.is_hoisted());
    }

    #[test]
    fn test_remove_importer() {
        let bindings = Bindings::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        bindings.add_importer("a".into(), recording_setter(&log, "a"));
        bindings.add_importer("b".into(), recording_setter(&log, "b"));
        bindings.remove_importer(&"a".into());
        assert_eq!(bindings.importers().len(), 1);
        bindings.notify();
        assert_eq!(*log.lock(), vec!["b:"]);
    }
}
