// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Shared fixtures for the loader integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use modlink_loader::{
    Declaration, Declared, Instantiate, InstantiateNext, InstantiateRequest, ModuleId,
    ModuleLoader, Resolve, ResolveNext, ResolveRequest, Resolved,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory module graph with instantiation counters and an execution log
#[derive(Clone, Default)]
pub struct Fixture {
    modules: Arc<Mutex<HashMap<String, Declaration>>>,
    failures: Arc<Mutex<HashMap<String, String>>>,
    instantiations: Arc<Mutex<HashMap<String, usize>>>,
    pub log: Log,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module
    pub fn define(&self, id: &str, declaration: Declaration) -> &Self {
        self.modules.lock().insert(id.to_string(), declaration);
        self
    }

    /// Add a module that logs its id when it runs and exports `<id>: true`
    pub fn plain(&self, id: &'static str, dependencies: &[&'static str]) -> &Self {
        let log = self.log.clone();
        self.define(
            id,
            Declaration::new(dependencies.to_vec(), move |export, _| {
                let log = log.clone();
                Ok(Declared::new().execute(move || {
                    log.push(id);
                    export.export(id, true);
                    Ok(())
                }))
            }),
        )
    }

    /// Make instantiation of `id` fail
    pub fn reject(&self, id: &str, message: &str) -> &Self {
        self.failures.lock().insert(id.to_string(), message.to_string());
        self
    }

    pub fn instantiations(&self, id: &str) -> usize {
        self.instantiations.lock().get(id).copied().unwrap_or(0)
    }

    pub fn loader(&self) -> ModuleLoader {
        ModuleLoader::builder()
            .resolver(self.clone())
            .instantiator(self.clone())
            .build()
    }
}

impl Resolve for Fixture {
    fn resolve(&self, request: &ResolveRequest<'_>, next: ResolveNext<'_>) -> Resolved {
        let known = self.modules.lock().contains_key(request.id)
            || self.failures.lock().contains_key(request.id);
        if known {
            Resolved::ok(request.id)
        } else {
            next.resolve(request)
        }
    }
}

#[async_trait]
impl Instantiate for Fixture {
    async fn instantiate(
        &self,
        request: &InstantiateRequest<'_>,
        next: InstantiateNext<'_>,
    ) -> anyhow::Result<Option<Declaration>> {
        *self
            .instantiations
            .lock()
            .entry(request.id.to_string())
            .or_default() += 1;
        // Give concurrent importers a chance to race for the same Load.
        tokio::task::yield_now().await;

        if let Some(message) = self.failures.lock().get(&**request.id).cloned() {
            anyhow::bail!(message);
        }
        let declaration = self.modules.lock().get(&**request.id).cloned();
        match declaration {
            Some(declaration) => Ok(Some(declaration)),
            None => next.instantiate(request).await,
        }
    }
}

/// Execution log shared with module bodies
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| e.as_str() == entry).count()
    }
}

pub fn no_dependencies() -> Vec<ModuleId> {
    Vec::new()
}
