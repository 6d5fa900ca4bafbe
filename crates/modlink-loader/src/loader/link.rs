// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Load creation, instantiation and linking

use super::load::{ExecutorSlot, Linkage, Load, SharedTask};
use super::ModuleLoader;
use crate::declaration::{noop_executor, Declared, ModuleOptions};
use crate::error::{LoaderError, Result};
use crate::exporter::Exporter;
use crate::hooks::{InstantiateNext, InstantiateRequest};
use crate::ModuleId;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use std::sync::Arc;
use tracing::trace;

impl ModuleLoader {
    /// Return the Load for `id`, creating it on first sight
    ///
    /// A new Load is fully set up (instantiate and link tasks attached) before
    /// it becomes visible in the registry. Neither task starts until awaited.
    pub(crate) fn get_or_create_load(
        &self,
        id: &ModuleId,
        parent: Option<&ModuleId>,
        options: Option<ModuleOptions>,
    ) -> Arc<Load> {
        match self.inner.registry.entry(id.clone()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let load = Arc::new(Load::new(id.clone(), options));
                let instantiate = self
                    .clone()
                    .instantiate_load(Arc::clone(&load), parent.cloned())
                    .boxed()
                    .shared();
                let link = self
                    .clone()
                    .link_load(Arc::clone(&load), instantiate.clone())
                    .boxed()
                    .shared();
                {
                    let mut state = load.state.lock();
                    state.instantiate = Some(instantiate);
                    state.link = Some(link);
                }
                trace!(id = %id, parent = ?parent, "created load");
                entry.insert(Arc::clone(&load));
                load
            }
        }
    }

    async fn instantiate_load(self, load: Arc<Load>, parent: Option<ModuleId>) -> Result<()> {
        load.state.lock().instantiating = true;

        let request = InstantiateRequest {
            id: &load.id,
            parent: parent.as_ref(),
            options: load.options.as_ref(),
            loader: &self,
        };
        let declaration = match InstantiateNext::new(&self.inner.instantiators)
            .instantiate(&request)
            .await
        {
            Ok(Some(declaration)) => declaration,
            Ok(None) => {
                let err = LoaderError::instantiation(
                    load.id.clone(),
                    parent.clone(),
                    "instantiate did not return a valid module declaration",
                );
                return Err(self.fail_load(&load, err, true));
            }
            Err(err) => {
                let err = LoaderError::from_instantiate_hook(&load.id, parent.as_ref(), err);
                return Err(self.fail_load(&load, err, true));
            }
        };

        let context = declaration
            .wants_context
            .then(|| self.create_context(&load.id));
        let exporter = Exporter::new(Arc::clone(&load.bindings));
        let Declared { setters, execute } = match declaration.declare(exporter, context) {
            Ok(declared) => declared,
            Err(err) => {
                let err = LoaderError::execution(load.id.clone(), err);
                return Err(self.fail_load(&load, err, true));
            }
        };

        trace!(id = %load.id, dependencies = declaration.dependencies.len(), "declared");
        let mut state = load.state.lock();
        state.executor = ExecutorSlot::Ready(execute.unwrap_or_else(noop_executor));
        state.linkage = Some(Linkage {
            dependencies: declaration.dependencies,
            setters,
            options: declaration.options,
        });
        Ok(())
    }

    /// Resolve every dependency edge and wire up importer setters
    ///
    /// Dependencies are only instantiated here, never linked, so cycles in
    /// the graph cannot make this task wait on itself.
    async fn link_load(self, load: Arc<Load>, instantiate: SharedTask<()>) -> Result<()> {
        instantiate.await?;

        let linkage = load.state.lock().linkage.take();
        let Some(Linkage {
            dependencies,
            setters,
            options,
        }) = linkage
        else {
            return Ok(());
        };

        let edges = dependencies.into_iter().enumerate().map(|(index, dependency)| {
            let loader = self.clone();
            let importer = load.id.clone();
            let setter = setters.get(index).cloned().flatten();
            let options = options.get(index).cloned();
            async move {
                let id = loader
                    .resolve_from(&dependency, Some(&importer), options.as_ref())
                    .await?;
                let dep = loader.get_or_create_load(&id, Some(&importer), options);
                let instantiate = dep.state.lock().instantiate.clone();
                if let Some(instantiate) = instantiate {
                    instantiate.await?;
                }
                if let Some(setter) = setter {
                    dep.bindings.add_importer(importer, Arc::clone(&setter));
                    if dep.exports_visible() {
                        setter(dep.bindings.namespace());
                    }
                }
                Ok::<_, LoaderError>(dep)
            }
        });
        let dependencies = futures::future::try_join_all(edges).await?;

        trace!(id = %load.id, "linked");
        load.state.lock().dependencies = Some(dependencies);
        Ok(())
    }
}
