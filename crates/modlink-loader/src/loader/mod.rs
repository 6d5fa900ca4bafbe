// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The module loader
//!
//! [`ModuleLoader`] is a cheap, cloneable handle. Importing a module walks
//! four stages, each deduplicated per canonical id:
//!
//! 1. resolve the requested id through the resolve hooks
//! 2. instantiate the Load through the instantiate hooks, then declare it
//! 3. link: resolve every dependency edge and register importer setters
//! 4. execute the graph in post-order, awaiting asynchronous completions
//!
//! The stage tasks are shared futures that do nothing until awaited, so the
//! loader is not tied to a particular async runtime.

mod exec;
mod link;
pub(crate) mod load;

use crate::context::{DeclarationContext, MetaHook, ImportMeta};
use crate::declaration::{Declaration, ModuleOptions};
use crate::error::{LoaderError, Result};
use crate::features::named::{NamedInstantiator, NamedRegistry, NamedResolver};
use crate::features::registry::RegistryResolver;
use crate::hooks::{
    Instantiate, LoadEvent, OnLoad, Resolve, ResolveNext, ResolveRequest, Resolved,
};
use crate::namespace::Namespace;
use crate::ModuleId;
use dashmap::DashMap;
use load::{Load, Phase};
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

pub(crate) type Registry = DashMap<ModuleId, Arc<Load>>;

pub(crate) struct LoaderInner {
    pub(crate) registry: Arc<Registry>,
    pub(crate) named: Arc<NamedRegistry>,
    resolvers: Vec<Arc<dyn Resolve>>,
    instantiators: Vec<Arc<dyn Instantiate>>,
    /// Single-slot anonymous registration
    last_register: Mutex<Option<Declaration>>,
    /// Held while module bodies run, so executions never interleave
    pub(crate) execution: ReentrantMutex<()>,
    on_load: Option<OnLoad>,
    meta_hook: Option<MetaHook>,
}

/// Dynamic module loader
#[derive(Clone)]
pub struct ModuleLoader {
    pub(crate) inner: Arc<LoaderInner>,
}

/// Weak handle held by module contexts
#[derive(Clone, Default)]
pub(crate) struct WeakLoader(Weak<LoaderInner>);

impl WeakLoader {
    pub(crate) fn upgrade(&self) -> Option<ModuleLoader> {
        self.0.upgrade().map(|inner| ModuleLoader { inner })
    }
}

/// Composition root for a [`ModuleLoader`]
///
/// Hooks run in installation order. Before any user hook, the loader answers
/// from the registry and from named registrations.
#[derive(Default)]
pub struct LoaderBuilder {
    resolvers: Vec<Arc<dyn Resolve>>,
    instantiators: Vec<Arc<dyn Instantiate>>,
    on_load: Option<OnLoad>,
    meta_hook: Option<MetaHook>,
}

impl LoaderBuilder {
    /// Create a builder with no user hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resolve hook
    pub fn resolver(mut self, hook: impl Resolve + 'static) -> Self {
        self.resolvers.push(Arc::new(hook));
        self
    }

    /// Append an instantiate hook
    pub fn instantiator(mut self, hook: impl Instantiate + 'static) -> Self {
        self.instantiators.push(Arc::new(hook));
        self
    }

    /// Observe every Load as it settles
    pub fn on_load(mut self, observer: impl Fn(&LoadEvent<'_>) + Send + Sync + 'static) -> Self {
        self.on_load = Some(Arc::new(observer));
        self
    }

    /// Decorate the import metadata of every module context
    pub fn meta(
        mut self,
        hook: impl Fn(&ModuleId, &mut ImportMeta) + Send + Sync + 'static,
    ) -> Self {
        self.meta_hook = Some(Arc::new(hook));
        self
    }

    /// Build the loader
    pub fn build(self) -> ModuleLoader {
        let registry = Arc::new(Registry::new());
        let named = Arc::new(NamedRegistry::default());

        let mut resolvers: Vec<Arc<dyn Resolve>> = vec![
            Arc::new(NamedResolver::new(Arc::clone(&named))),
            Arc::new(RegistryResolver::new(Arc::clone(&registry))),
        ];
        resolvers.extend(self.resolvers);

        let mut instantiators: Vec<Arc<dyn Instantiate>> =
            vec![Arc::new(NamedInstantiator::new(Arc::clone(&named)))];
        instantiators.extend(self.instantiators);

        ModuleLoader {
            inner: Arc::new(LoaderInner {
                registry,
                named,
                resolvers,
                instantiators,
                last_register: Mutex::new(None),
                execution: ReentrantMutex::new(()),
                on_load: self.on_load,
                meta_hook: self.meta_hook,
            }),
        }
    }
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader {
    /// Create a loader with only the built-in hooks
    pub fn new() -> Self {
        LoaderBuilder::new().build()
    }

    /// Start configuring a loader
    pub fn builder() -> LoaderBuilder {
        LoaderBuilder::new()
    }

    pub(crate) fn downgrade(&self) -> WeakLoader {
        WeakLoader(Arc::downgrade(&self.inner))
    }

    /// Import a top-level module
    pub async fn import(&self, id: &str) -> Result<Namespace> {
        self.import_from(id, None, None).await
    }

    /// Import `id` as requested by `parent`
    ///
    /// Concurrent imports of one canonical id share the same Load and settle
    /// with the same namespace or the same error.
    pub async fn import_from(
        &self,
        id: &str,
        parent: Option<&ModuleId>,
        options: Option<ModuleOptions>,
    ) -> Result<Namespace> {
        let module_id = self.resolve_from(id, parent, options.as_ref()).await?;
        debug!(id = %module_id, "importing module");
        let load = self.get_or_create_load(&module_id, None, options);
        self.top_level_load(&load).await
    }

    /// Resolve a top-level id
    pub async fn resolve(&self, id: &str) -> Result<ModuleId> {
        self.resolve_from(id, None, None).await
    }

    /// Resolve `id` relative to `parent` through the resolve hooks
    pub async fn resolve_from(
        &self,
        id: &str,
        parent: Option<&ModuleId>,
        options: Option<&ModuleOptions>,
    ) -> Result<ModuleId> {
        let request = ResolveRequest {
            id,
            parent,
            options,
        };
        let resolved = ResolveNext::new(&self.inner.resolvers).resolve(&request);
        resolved
            .into_result()
            .await
            .map_err(|err| LoaderError::from_resolve_hook(id, parent, err))
    }

    /// Resolve without suspending
    ///
    /// Fails with `SYNC_UNAVAILABLE` when a hook answers asynchronously.
    pub fn resolve_sync(&self, id: &str, parent: Option<&ModuleId>) -> Result<ModuleId> {
        let request = ResolveRequest {
            id,
            parent,
            options: None,
        };
        match ResolveNext::new(&self.inner.resolvers).resolve(&request) {
            Resolved::Ready(result) => {
                result.map_err(|err| LoaderError::from_resolve_hook(id, parent, err))
            }
            Resolved::Pending(_) => Err(LoaderError::SyncUnavailable { id: id.into() }),
        }
    }

    /// Store an anonymous registration for the next [`consume_register`](Self::consume_register)
    ///
    /// A later registration replaces an unconsumed one.
    pub fn register(&self, declaration: Declaration) {
        self.inner.named.forget_first(None);
        self.fill_register_slot(declaration);
    }

    pub(crate) fn fill_register_slot(&self, declaration: Declaration) {
        *self.inner.last_register.lock() = Some(declaration);
    }

    pub(crate) fn clear_register_slot_if(&self, declaration: &Declaration) {
        let mut slot = self.inner.last_register.lock();
        if slot.as_ref().is_some_and(|held| held.same_declarator(declaration)) {
            *slot = None;
        }
    }

    /// Take the pending registration, clearing the slot
    ///
    /// While the slot still holds a bundle of named registrations, the first
    /// of them wins and its name becomes an alias of `for_id`. A later
    /// [`register`](Self::register), or importing that first module, ends the
    /// bundle.
    pub fn consume_register(&self, for_id: Option<&ModuleId>) -> Option<Declaration> {
        let anonymous = self.inner.last_register.lock().take();
        match self.inner.named.take_first() {
            Some((name, declaration)) => {
                if let Some(for_id) = for_id {
                    self.inner.named.alias(name, for_id.clone());
                }
                Some(declaration)
            }
            None => anonymous,
        }
    }

    /// Create the context handed to declarators of `id`
    pub fn create_context(&self, id: &ModuleId) -> DeclarationContext {
        DeclarationContext::new(self.downgrade(), id.clone(), self.inner.meta_hook.as_ref())
    }

    /// Lifecycle position of the Load for `id`
    pub fn phase(&self, id: &str) -> Option<Phase> {
        self.inner.registry.get(id).map(|load| load.phase())
    }

    pub(crate) fn lookup(&self, id: &str) -> Option<Arc<Load>> {
        self.inner.registry.get(id).map(|load| Arc::clone(load.value()))
    }

    /// Latch `err` on `load` and make its executor unreachable
    ///
    /// The first latched error wins; it is returned so that every consumer
    /// observes the same instance.
    pub(crate) fn fail_load(&self, load: &Arc<Load>, err: LoaderError, is_source: bool) -> LoaderError {
        let latched = {
            let mut state = load.state.lock();
            state.executor = load::ExecutorSlot::Consumed;
            state.pending = None;
            match &state.error {
                Some(existing) => return existing.clone(),
                None => {
                    state.error = Some(err.clone());
                    err
                }
            }
        };
        warn!(id = %load.id, code = latched.code(), "module failed: {latched}");
        self.emit_load(load, Some(&latched), is_source);
        latched
    }

    /// Mark `load` completed with its namespace
    pub(crate) fn finish_load(&self, load: &Arc<Load>) {
        {
            let mut state = load.state.lock();
            state.completed = true;
            state.pending = None;
            state.instantiate = None;
            state.link = None;
            state.completion = Some(load::ready_task(Ok(load.namespace())));
        }
        debug!(id = %load.id, "module completed");
        self.emit_load(load, None, true);
    }

    fn emit_load(&self, load: &Arc<Load>, error: Option<&LoaderError>, is_source: bool) {
        if let Some(on_load) = &self.inner.on_load {
            let dependencies = load.dependency_ids();
            on_load(&LoadEvent {
                id: &load.id,
                dependencies: &dependencies,
                error,
                is_error_source: is_source,
            });
        }
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("modules", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}
