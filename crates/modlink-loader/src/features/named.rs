// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Named registrations
//!
//! A bundle may register several modules under explicit ids. Named ids
//! resolve to themselves once every other resolver gave up, and the first
//! import of a named id consumes its declaration.

use crate::declaration::Declaration;
use crate::hooks::{
    Instantiate, InstantiateNext, InstantiateRequest, Resolve, ResolveNext, ResolveRequest,
    Resolved,
};
use crate::loader::ModuleLoader;
use crate::ModuleId;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// Declarations registered under explicit ids
#[derive(Default)]
pub(crate) struct NamedRegistry {
    /// `None` once consumed; the id keeps resolving
    declarations: DashMap<ModuleId, Option<Declaration>>,
    /// Name of a bundle's first registration mapped to the id it was loaded as
    aliases: DashMap<ModuleId, ModuleId>,
    first: Mutex<Option<(ModuleId, Declaration)>>,
}

impl NamedRegistry {
    pub(crate) fn insert(&self, id: ModuleId, declaration: Declaration) {
        {
            let mut first = self.first.lock();
            if first.is_none() {
                *first = Some((id.clone(), declaration.clone()));
            }
        }
        self.declarations.insert(id, Some(declaration));
    }

    /// Take a declaration, leaving the id resolvable
    pub(crate) fn take(&self, id: &str) -> Option<Declaration> {
        self.declarations
            .get_mut(id)
            .and_then(|mut entry| entry.value_mut().take())
    }

    /// Put back a declaration that could not be used
    pub(crate) fn restore(&self, id: ModuleId, declaration: Declaration) {
        self.declarations.insert(id, Some(declaration));
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.declarations.contains_key(id)
    }

    pub(crate) fn take_first(&self) -> Option<(ModuleId, Declaration)> {
        self.first.lock().take()
    }

    /// Stop preferring the first registration
    ///
    /// With `Some(id)`, only when `id` is that registration.
    pub(crate) fn forget_first(&self, id: Option<&str>) {
        let mut first = self.first.lock();
        let matches = match (id, first.as_ref()) {
            (None, _) => true,
            (Some(id), Some((name, _))) => &**name == id,
            (Some(_), None) => false,
        };
        if matches {
            *first = None;
        }
    }

    pub(crate) fn alias(&self, name: ModuleId, target: ModuleId) {
        if name != target {
            self.aliases.insert(name, target);
        }
    }

    /// Canonical id for a named registration
    fn lookup(&self, id: &str) -> Option<ModuleId> {
        if let Some(target) = self.aliases.get(id) {
            return Some(target.value().clone());
        }
        self.declarations.get(id).map(|entry| entry.key().clone())
    }
}

/// Resolves named ids after the rest of the chain failed
pub(crate) struct NamedResolver {
    named: Arc<NamedRegistry>,
}

impl NamedResolver {
    pub(crate) fn new(named: Arc<NamedRegistry>) -> Self {
        Self { named }
    }
}

impl Resolve for NamedResolver {
    fn resolve(&self, request: &ResolveRequest<'_>, next: ResolveNext<'_>) -> Resolved {
        let named = Arc::clone(&self.named);
        let id = request.id.to_string();
        next.resolve(request)
            .or_else(move |err| named.lookup(&id).ok_or(err))
    }
}

/// Instantiates named ids from their registration
pub(crate) struct NamedInstantiator {
    named: Arc<NamedRegistry>,
}

impl NamedInstantiator {
    pub(crate) fn new(named: Arc<NamedRegistry>) -> Self {
        Self { named }
    }
}

#[async_trait]
impl Instantiate for NamedInstantiator {
    async fn instantiate(
        &self,
        request: &InstantiateRequest<'_>,
        next: InstantiateNext<'_>,
    ) -> anyhow::Result<Option<Declaration>> {
        if let Some(declaration) = self.named.take(request.id) {
            trace!(id = %request.id, "instantiating named registration");
            request.loader.named_consumed(request.id, &declaration);
            return Ok(Some(declaration));
        }
        next.instantiate(request).await
    }
}

impl ModuleLoader {
    /// Register a declaration under an explicit id
    ///
    /// The declaration also fills the anonymous slot, so a bundle loaded as a
    /// single script still yields its first module from
    /// [`consume_register`](Self::consume_register).
    pub fn register_named(&self, id: impl Into<ModuleId>, declaration: Declaration) {
        let id = id.into();
        trace!(id = %id, "named registration");
        self.inner.named.insert(id, declaration.clone());
        self.fill_register_slot(declaration);
    }

    /// A named declaration was taken for instantiation; it no longer stands
    /// in for an anonymous registration
    pub(crate) fn named_consumed(&self, id: &ModuleId, declaration: &Declaration) {
        self.inner.named.forget_first(Some(id));
        self.clear_register_slot_if(declaration);
    }

    /// Whether a named registration exists for `id`
    pub fn has_named(&self, id: &str) -> bool {
        self.inner.named.contains(id)
    }
}
