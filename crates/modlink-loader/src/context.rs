// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Per-module context handed to declarators
//!
//! The context lets a module import other modules dynamically and exposes its
//! import metadata. It only holds a weak handle to the loader, so modules that
//! stash their context do not keep the loader alive.

use crate::declaration::ModuleOptions;
use crate::error::{LoaderError, Result};
use crate::loader::WeakLoader;
use crate::namespace::Namespace;
use crate::ModuleId;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

/// Hook to decorate the metadata of every created context
pub type MetaHook = Arc<dyn Fn(&ModuleId, &mut ImportMeta) + Send + Sync>;

/// Module metadata (`import.meta`)
#[derive(Clone)]
pub struct ImportMeta {
    /// Canonical id of the module
    pub url: ModuleId,
    /// Host-defined extra fields
    pub extra: serde_json::Map<String, serde_json::Value>,
    loader: WeakLoader,
}

impl ImportMeta {
    /// Resolve `id` relative to `parent`, or to this module
    pub fn resolve(&self, id: &str, parent: Option<&ModuleId>) -> BoxFuture<'static, Result<ModuleId>> {
        let parent = parent.unwrap_or(&self.url).clone();
        let id = id.to_string();
        let loader = self.loader.clone();
        async move {
            let loader = loader
                .upgrade()
                .ok_or_else(|| loader_dropped(&id, &parent))?;
            loader.resolve_from(&id, Some(&parent), None).await
        }
        .boxed()
    }
}

impl std::fmt::Debug for ImportMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportMeta")
            .field("url", &self.url)
            .field("extra", &self.extra)
            .finish()
    }
}

/// Context passed to declarators that ask for one
#[derive(Clone, Debug)]
pub struct DeclarationContext {
    /// Module metadata
    pub meta: ImportMeta,
}

impl DeclarationContext {
    pub(crate) fn new(loader: WeakLoader, id: ModuleId, meta_hook: Option<&MetaHook>) -> Self {
        let mut meta = ImportMeta {
            url: id.clone(),
            extra: serde_json::Map::new(),
            loader,
        };
        if let Some(hook) = meta_hook {
            hook(&id, &mut meta);
        }
        Self { meta }
    }

    /// Id of the module this context belongs to
    pub fn id(&self) -> &ModuleId {
        &self.meta.url
    }

    /// Dynamically import `id` relative to this module
    pub fn import(
        &self,
        id: &str,
        options: Option<ModuleOptions>,
    ) -> BoxFuture<'static, Result<Namespace>> {
        let parent = self.meta.url.clone();
        let id = id.to_string();
        let loader = self.meta.loader.clone();
        async move {
            let loader = loader
                .upgrade()
                .ok_or_else(|| loader_dropped(&id, &parent))?;
            loader.import_from(&id, Some(&parent), options).await
        }
        .boxed()
    }
}

fn loader_dropped(id: &str, parent: &ModuleId) -> LoaderError {
    LoaderError::Resolution {
        id: id.into(),
        parent: Some(parent.clone()),
        cause: Some(Arc::new(anyhow::anyhow!("module loader was dropped"))),
    }
}
