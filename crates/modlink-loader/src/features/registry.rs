// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Registry operations
//!
//! Direct access to the Load table: read completed namespaces, inject
//! modules, and drop modules so they can be reloaded.

use crate::error::{LoaderError, Result};
use crate::exporter::Importer;
use crate::hooks::{Resolve, ResolveNext, ResolveRequest, Resolved};
use crate::loader::load::{ExecutorSlot, Load};
use crate::loader::{ModuleLoader, Registry};
use crate::namespace::Namespace;
use crate::value::Value;
use crate::ModuleId;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::debug;

/// Resolves ids that already name an available module
pub(crate) struct RegistryResolver {
    registry: Arc<Registry>,
}

impl RegistryResolver {
    pub(crate) fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

impl Resolve for RegistryResolver {
    fn resolve(&self, request: &ResolveRequest<'_>, next: ResolveNext<'_>) -> Resolved {
        let available = self
            .registry
            .get(request.id)
            .is_some_and(|load| load.is_available());
        if available {
            return Resolved::ok(request.id);
        }
        next.resolve(request)
    }
}

/// Importer setters detached by [`ModuleLoader::delete`]
///
/// Once a fresh copy of the module is available again, [`Rebind::rebind`]
/// reattaches the old importers to it.
#[must_use = "dropping a Rebind discards the detached importers"]
pub struct Rebind {
    loader: ModuleLoader,
    id: ModuleId,
    importers: Vec<Importer>,
}

impl Rebind {
    /// Id of the deleted module
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    /// Number of detached importer setters
    pub fn len(&self) -> usize {
        self.importers.len()
    }

    /// Whether nothing imported the deleted module
    pub fn is_empty(&self) -> bool {
        self.importers.is_empty()
    }

    /// Reattach the importers to the current module under the same id
    ///
    /// Each setter runs once with the new namespace. Returns `false`, and
    /// does nothing, while no available module is registered under the id.
    pub fn rebind(self) -> bool {
        let Some(load) = self.loader.lookup(&self.id) else {
            return false;
        };
        if !load.is_available() {
            return false;
        }
        debug!(id = %self.id, importers = self.importers.len(), "rebinding importers");
        for importer in self.importers {
            load.bindings
                .add_importer(importer.id, Arc::clone(&importer.setter));
            (importer.setter)(load.bindings.namespace());
        }
        true
    }
}

impl std::fmt::Debug for Rebind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rebind")
            .field("id", &self.id)
            .field("importers", &self.importers.len())
            .finish()
    }
}

impl ModuleLoader {
    /// Namespace of an available module
    ///
    /// Loads that are still in flight or failed are not available.
    pub fn get(&self, id: &str) -> Option<Namespace> {
        self.lookup(id)
            .filter(|load| load.is_available())
            .map(|load| load.namespace())
    }

    /// Whether any Load exists for `id`, whatever its state
    pub fn has(&self, id: &str) -> bool {
        self.inner.registry.contains_key(id)
    }

    /// Canonical ids of every Load
    pub fn ids(&self) -> Vec<ModuleId> {
        self.inner
            .registry
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of Loads
    pub fn len(&self) -> usize {
        self.inner.registry.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.inner.registry.is_empty()
    }

    /// Store a copy of `bindings` as an available module
    ///
    /// Setting an id that already holds a settled module replaces its
    /// bindings in place, keeping the namespace handle, and notifies its
    /// importers. Ids whose Load is still in flight are refused.
    pub fn set<I, K, V>(&self, id: impl Into<ModuleId>, bindings: I) -> Result<Namespace>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let id = id.into();
        let fresh = Namespace::from_bindings(bindings);

        let existing = match self.inner.registry.entry(id.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Load::settled(id.clone(), fresh.clone())));
                debug!(id = %id, "module set");
                return Ok(fresh);
            }
            Entry::Occupied(entry) => Arc::clone(entry.get()),
        };

        if existing.is_in_flight() {
            return Err(LoaderError::InvalidModule {
                id,
                reason: "module is still loading".into(),
            });
        }

        let namespace = existing.namespace();
        namespace.replace(fresh.snapshot());
        {
            let mut state = existing.state.lock();
            state.executor = ExecutorSlot::Consumed;
            state.error = None;
            state.completed = true;
            state.instantiate = None;
            state.link = None;
            state.completion = Some(crate::loader::load::ready_task(Ok(namespace.clone())));
        }
        existing.bindings.notify();
        debug!(id = %id, "module replaced");
        Ok(namespace)
    }

    /// Store `namespace` itself as an available module
    ///
    /// Unlike [`set`](Self::set) the handle is not copied, so the caller keeps
    /// writing through it. Refused when a different module already holds the
    /// id.
    pub fn share(&self, id: impl Into<ModuleId>, namespace: Namespace) -> Result<Namespace> {
        let id = id.into();
        match self.inner.registry.entry(id.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Load::settled(id, namespace.clone())));
                Ok(namespace)
            }
            Entry::Occupied(entry) if entry.get().namespace().ptr_eq(&namespace) => Ok(namespace),
            Entry::Occupied(_) => Err(LoaderError::InvalidModule {
                id,
                reason: "a different module is already registered".into(),
            }),
        }
    }

    /// Remove the Load for `id`
    ///
    /// Returns `None` when there is nothing to remove, when the module is
    /// still awaited by the import that created it, or while its
    /// asynchronous completion is pending. Otherwise the Load is unlinked
    /// from its dependencies and its importer setters are handed back as a
    /// [`Rebind`].
    pub fn delete(&self, id: &str) -> Option<Rebind> {
        let load = self.lookup(id)?;

        let parent_running = load
            .parent()
            .is_some_and(|parent| !parent.executor_consumed());
        let pending = load.state.lock().pending.is_some();
        if parent_running || pending {
            debug!(id = %id, "refusing to delete a module that is still loading");
            return None;
        }

        for dep in load.dependencies() {
            dep.bindings.remove_importer(&load.id);
        }
        self.inner
            .registry
            .remove_if(id, |_, current| Arc::ptr_eq(current, &load))?;
        debug!(id = %id, "module deleted");

        Some(Rebind {
            loader: self.clone(),
            id: load.id.clone(),
            importers: load.bindings.importers(),
        })
    }

    /// Remove every Load
    pub fn clear(&self) {
        self.inner.registry.clear();
    }
}
