// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Synchronous front-end
//!
//! `require` returns a namespace without ever suspending. It succeeds for
//! modules that are already available and for named registrations whose
//! whole dependency graph can be declared and executed synchronously.

use crate::declaration::{noop_executor, Declaration, Declared};
use crate::error::{LoaderError, Result};
use crate::exporter::Exporter;
use crate::loader::load::{ExecutorSlot, Load, Running};
use crate::loader::ModuleLoader;
use crate::namespace::Namespace;
use crate::ModuleId;
use std::sync::Arc;
use tracing::debug;

impl ModuleLoader {
    /// Get a module without suspending
    ///
    /// Fails with `SYNC_UNAVAILABLE` when the module (or a dependency) could
    /// only be reached asynchronously, and with `SYNC_ASYNC_MISMATCH` when an
    /// executor suspends. In the latter case the suspended body is kept as
    /// the module's pending completion; it makes progress once a later
    /// `import` awaits it.
    pub fn require(&self, id: &str) -> Result<Namespace> {
        self.require_from(id, None)
    }

    /// [`require`](Self::require) relative to `parent`
    pub fn require_from(&self, id: &str, parent: Option<&ModuleId>) -> Result<Namespace> {
        let module_id = self.resolve_sync(id, parent)?;
        self.require_resolved(&module_id)?;
        self.get(&module_id)
            .ok_or(LoaderError::SyncUnavailable { id: module_id })
    }

    fn require_resolved(&self, id: &ModuleId) -> Result<()> {
        if let Some(load) = self.lookup(id) {
            if let Some(err) = load.error() {
                return Err(err);
            }
            if load.is_available() {
                return Ok(());
            }
            return Err(LoaderError::SyncUnavailable { id: id.clone() });
        }

        match self.inner.named.take(id) {
            Some(declaration) => self.instantiate_sync(id, declaration),
            None => Err(LoaderError::SyncUnavailable { id: id.clone() }),
        }
    }

    /// Declare, link and execute a named registration in one go
    ///
    /// Dependencies are required before the declarator runs, so a graph that
    /// cannot be reached synchronously leaves nothing behind: the
    /// registration is put back, undeclared, for a later `import`. A
    /// declarator or executor failure is latched on a registered Load.
    fn instantiate_sync(&self, id: &ModuleId, declaration: Declaration) -> Result<()> {
        debug!(id = %id, "instantiating synchronously");
        let dependencies = match self.require_dependencies(id, &declaration.dependencies) {
            Ok(dependencies) => dependencies,
            Err(err) => {
                self.inner.named.restore(id.clone(), declaration);
                return Err(err);
            }
        };
        self.named_consumed(id, &declaration);

        let load = Arc::new(Load::new(id.clone(), None));
        let context = declaration
            .wants_context
            .then(|| self.create_context(id));
        let exporter = Exporter::new(Arc::clone(&load.bindings));
        let Declared { setters, execute } = match declaration.declare(exporter, context) {
            Ok(declared) => declared,
            Err(err) => {
                self.inner.registry.insert(id.clone(), Arc::clone(&load));
                let err = LoaderError::execution(id.clone(), err);
                return Err(self.fail_load(&load, err, true));
            }
        };

        for (dep, setter) in dependencies.iter().zip(setters) {
            if let Some(setter) = setter {
                dep.bindings.add_importer(id.clone(), Arc::clone(&setter));
                setter(dep.bindings.namespace());
            }
        }

        let running = {
            let mut state = load.state.lock();
            state.dependencies = Some(dependencies);
            state.executor = ExecutorSlot::Consumed;
            Running::install(id, &mut state)
        };
        self.inner.registry.insert(id.clone(), Arc::clone(&load));

        let executor = execute.unwrap_or_else(noop_executor);
        let outcome = self.run_executor(&load, executor);
        running.settle(&outcome);
        match outcome? {
            None => Ok(()),
            Some(_) => Err(LoaderError::SyncAsyncMismatch { id: id.clone() }),
        }
    }

    fn require_dependencies(
        &self,
        id: &ModuleId,
        dependencies: &[ModuleId],
    ) -> Result<Vec<Arc<Load>>> {
        dependencies
            .iter()
            .map(|dependency| {
                let dep_id = self.resolve_sync(dependency, Some(id))?;
                self.require_resolved(&dep_id)?;
                self.lookup(&dep_id)
                    .ok_or(LoaderError::SyncUnavailable { id: dep_id })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn exporting(name: &'static str, value: i32) -> Declaration {
        Declaration::new(Vec::<ModuleId>::new(), move |export, _| {
            Ok(Declared::new().execute(move || {
                export.export(name, value);
                Ok(())
            }))
        })
    }

    #[test]
    fn test_require_available_module() {
        let loader = ModuleLoader::new();
        let ns = loader.set("x", [("a", 1)]).unwrap();
        assert!(loader.require("x").unwrap().ptr_eq(&ns));
    }

    #[test]
    fn test_require_named_with_dependencies() {
        let loader = ModuleLoader::new();
        loader.register_named("dep", exporting("value", 3));
        loader.register_named(
            "app",
            Declaration::new(["dep"], |export, _| {
                let dep = Arc::new(Mutex::new(Namespace::new()));
                let slot = Arc::clone(&dep);
                Ok(Declared::new()
                    .setter(move |ns| *slot.lock() = ns.clone())
                    .execute(move || {
                        let value = dep.lock().get("value").unwrap_or_default();
                        export.export("copy", value);
                        Ok(())
                    }))
            }),
        );

        let ns = loader.require("app").unwrap();
        assert_eq!(ns.get("copy"), Some(3.into()));
        assert!(loader.get("dep").is_some());
    }

    #[test]
    fn test_require_unknown_module() {
        let loader = ModuleLoader::new();
        loader.register_named("known", exporting("x", 1));
        let err = loader.require("known/other").unwrap_err();
        assert_eq!(err.code(), "RESOLUTION");
    }

    #[test]
    fn test_require_missing_dependency() {
        let loader = ModuleLoader::new();
        loader.register_named(
            "app",
            Declaration::new(["missing"], |_, _| Ok(Declared::new())),
        );
        let err = loader.require("app").unwrap_err();
        assert_eq!(err.code(), "RESOLUTION");
        assert!(!loader.has("app"));
        assert!(loader.has_named("app"));
    }

    #[test]
    fn test_require_dependency_in_flight() {
        let loader = ModuleLoader::new();
        loader.register_named(
            "slow",
            Declaration::new(Vec::<ModuleId>::new(), |_, _| {
                Ok(Declared::new().execute_async(|| async { Ok(()) }))
            }),
        );
        loader.register_named(
            "app",
            Declaration::new(["slow"], |_, _| Ok(Declared::new().no_setter())),
        );
        assert!(loader.require("slow").is_err());

        let err = loader.require("app").unwrap_err();
        assert_eq!(err.code(), "SYNC_UNAVAILABLE");
        assert_eq!(&**err.id(), "slow");
    }

    #[tokio::test]
    async fn test_unavailable_dependency_leaves_module_undeclared() {
        let loader = ModuleLoader::new();
        loader.register_named(
            "slow",
            Declaration::new(Vec::<ModuleId>::new(), |_, _| {
                Ok(Declared::new().execute_async(|| async { Ok(()) }))
            }),
        );
        let declared = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&declared);
        loader.register_named(
            "app",
            Declaration::new(["slow"], move |_, _| {
                *counter.lock() += 1;
                Ok(Declared::new().no_setter())
            }),
        );
        assert!(loader.require("slow").is_err());

        let err = loader.require("app").unwrap_err();
        assert_eq!(err.code(), "SYNC_UNAVAILABLE");
        assert_eq!(*declared.lock(), 0);

        loader.import("app").await.unwrap();
        assert_eq!(*declared.lock(), 1);
    }

    #[test]
    fn test_require_async_executor() {
        let loader = ModuleLoader::new();
        loader.register_named(
            "slow",
            Declaration::new(Vec::<ModuleId>::new(), |_, _| {
                Ok(Declared::new().execute_async(|| async { Ok(()) }))
            }),
        );
        let err = loader.require("slow").unwrap_err();
        assert_eq!(err.code(), "SYNC_ASYNC_MISMATCH");
        assert!(loader.has("slow"));
        assert!(loader.get("slow").is_none());
    }

    #[tokio::test]
    async fn test_import_after_async_mismatch() {
        let loader = ModuleLoader::new();
        loader.register_named(
            "slow",
            Declaration::new(Vec::<ModuleId>::new(), |export, _| {
                Ok(Declared::new().execute_async(move || async move {
                    export.export("ready", true);
                    Ok(())
                }))
            }),
        );
        assert!(loader.require("slow").is_err());

        let ns = loader.import("slow").await.unwrap();
        assert_eq!(ns.get("ready"), Some(true.into()));
    }

    #[test]
    fn test_require_failing_executor_is_latched() {
        let loader = ModuleLoader::new();
        loader.register_named(
            "broken",
            Declaration::new(Vec::<ModuleId>::new(), |_, _| {
                Ok(Declared::new().execute(|| anyhow::bail!("boom")))
            }),
        );
        let first = loader.require("broken").unwrap_err();
        assert_eq!(first.code(), "EXECUTION");
        let second = loader.require("broken").unwrap_err();
        assert!(first.same_instance(&second));
    }
}
