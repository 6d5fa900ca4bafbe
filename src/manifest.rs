// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module graphs described in a JSON manifest
//!
//! ```json
//! {
//!   "entry": "./main",
//!   "modules": {
//!     "main": {
//!       "dependencies": ["./lib/math"],
//!       "imports": [{ "from": "./lib/math", "name": "pi" }],
//!       "exports": { "ready": true }
//!     },
//!     "lib/math": { "exports": { "pi": 3.14 }, "delay_ms": 10 }
//!   }
//! }
//! ```
//!
//! Relative specifiers resolve against the importing module's id. A module
//! with `delay_ms` completes asynchronously; one with `fail` throws when it
//! runs.

use anyhow::{Context, bail};
use async_trait::async_trait;
use modlink_loader::{
    Declaration, Declared, Instantiate, InstantiateNext, InstantiateRequest, ModuleId,
    ModuleLoader, Namespace, Resolve, ResolveNext, ResolveRequest, Resolved,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default entry when the manifest names none
pub const DEFAULT_ENTRY: &str = "main";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub entry: Option<String>,
    pub modules: HashMap<String, ModuleEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModuleEntry {
    pub dependencies: Vec<String>,
    pub imports: Vec<ImportEntry>,
    pub exports: serde_json::Map<String, serde_json::Value>,
    pub delay_ms: Option<u64>,
    pub fail: Option<String>,
}

/// Copy export `name` of dependency `from` into this module as `as`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportEntry {
    pub from: String,
    pub name: String,
    #[serde(rename = "as", default)]
    pub local: Option<String>,
}

impl ImportEntry {
    fn local_name(&self) -> &str {
        self.local.as_deref().unwrap_or(&self.name)
    }
}

impl Manifest {
    /// Read and validate a manifest file
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid manifest {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let manifest: Manifest = serde_json::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (id, entry) in &self.modules {
            if let Some(import) = entry
                .imports
                .iter()
                .find(|import| !entry.dependencies.contains(&import.from))
            {
                bail!(
                    "module {id:?} imports from {:?}, which is not one of its dependencies",
                    import.from
                );
            }
        }
        Ok(())
    }

    pub fn entry(&self) -> &str {
        self.entry.as_deref().unwrap_or(DEFAULT_ENTRY)
    }
}

/// Join a relative specifier onto the directory of `parent`
///
/// Bare specifiers are returned unchanged.
pub fn join(parent: Option<&str>, specifier: &str) -> String {
    if !(specifier.starts_with("./") || specifier.starts_with("../")) {
        return specifier.to_string();
    }
    let mut segments: Vec<&str> = parent
        .map(|parent| parent.split('/').collect())
        .unwrap_or_default();
    segments.pop();
    for part in specifier.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Resolve and instantiate hooks serving the modules of a manifest
#[derive(Clone)]
pub struct ManifestModules {
    manifest: Arc<Manifest>,
}

impl ManifestModules {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest: Arc::new(manifest),
        }
    }

    /// Register every module under its id, making the graph reachable
    /// without suspending
    pub fn register_all(&self, loader: &ModuleLoader) {
        for (id, entry) in &self.manifest.modules {
            let id: ModuleId = id.as_str().into();
            loader.register_named(id.clone(), declare(id, entry.clone()));
        }
    }
}

impl Resolve for ManifestModules {
    fn resolve(&self, request: &ResolveRequest<'_>, next: ResolveNext<'_>) -> Resolved {
        let id = join(request.parent.map(|parent| &**parent), request.id);
        if self.manifest.modules.contains_key(&id) {
            Resolved::ok(id)
        } else {
            next.resolve(request)
        }
    }
}

#[async_trait]
impl Instantiate for ManifestModules {
    async fn instantiate(
        &self,
        request: &InstantiateRequest<'_>,
        next: InstantiateNext<'_>,
    ) -> anyhow::Result<Option<Declaration>> {
        match self.manifest.modules.get(&**request.id) {
            Some(entry) => Ok(Some(declare(request.id.clone(), entry.clone()))),
            None => next.instantiate(request).await,
        }
    }
}

type Imported = Arc<Mutex<serde_json::Map<String, serde_json::Value>>>;

fn declare(id: ModuleId, entry: ModuleEntry) -> Declaration {
    let dependencies = entry.dependencies.clone();
    Declaration::new(dependencies, move |export, _| {
        let imported: Imported = Arc::default();
        let mut declared = Declared::new();
        for dependency in &entry.dependencies {
            let bindings: Vec<(String, String)> = entry
                .imports
                .iter()
                .filter(|import| &import.from == dependency)
                .map(|import| (import.name.clone(), import.local_name().to_string()))
                .collect();
            if bindings.is_empty() {
                declared = declared.no_setter();
                continue;
            }
            let imported = Arc::clone(&imported);
            declared = declared.setter(move |ns: &Namespace| {
                let mut imported = imported.lock();
                for (name, local) in &bindings {
                    if let Some(value) = ns.get(name) {
                        imported.insert(local.clone(), value.to_json());
                    }
                }
            });
        }

        let id = id.clone();
        let exports = entry.exports.clone();
        let fail = entry.fail.clone();
        let body = move || -> anyhow::Result<()> {
            debug!(id = %id, "executing manifest module");
            if let Some(message) = fail {
                bail!(message);
            }
            let mut bindings = exports;
            bindings.extend(imported.lock().clone());
            export.export_all(bindings);
            Ok(())
        };

        Ok(match entry.delay_ms {
            Some(ms) => declared.execute_async(move || async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                body()
            }),
            None => declared.execute(body),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn loader(manifest: &str) -> ModuleLoader {
        let modules = ManifestModules::new(Manifest::parse(manifest).unwrap());
        ModuleLoader::builder()
            .resolver(modules.clone())
            .instantiator(modules)
            .build()
    }

    #[test]
    fn test_join() {
        assert_eq!(join(None, "./main"), "main");
        assert_eq!(join(Some("app/main"), "./util"), "app/util");
        assert_eq!(join(Some("app/main"), "../lib/math"), "lib/math");
        assert_eq!(join(Some("app/main"), "lodash"), "lodash");
    }

    #[test]
    fn test_imports_must_name_dependencies() {
        let err = Manifest::parse(
            r#"{ "modules": { "main": { "imports": [{ "from": "./lib", "name": "x" }] } } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not one of its dependencies"));
    }

    #[test]
    fn test_default_entry() {
        let manifest = Manifest::parse(r#"{ "modules": {} }"#).unwrap();
        assert_eq!(manifest.entry(), DEFAULT_ENTRY);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "entry": "app", "modules": {{ "app": {{}} }} }}"#).unwrap();
        let manifest = Manifest::load(file.path()).await.unwrap();
        assert_eq!(manifest.entry(), "app");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Manifest::load(&dir.path().join("missing.json")).await.unwrap_err();
        assert!(err.to_string().contains("failed to read manifest"));
    }

    #[tokio::test]
    async fn test_imports_flow_through_graph() {
        let loader = loader(
            r#"{
                "modules": {
                    "app/main": {
                        "dependencies": ["../lib/math"],
                        "imports": [{ "from": "../lib/math", "name": "pi", "as": "tau_half" }],
                        "exports": { "ready": true }
                    },
                    "lib/math": { "exports": { "pi": 3.5 }, "delay_ms": 5 }
                }
            }"#,
        );
        let ns = loader.import("app/main").await.unwrap();
        assert_eq!(
            ns.to_json(),
            serde_json::json!({ "ready": true, "tau_half": 3.5 })
        );
    }

    #[tokio::test]
    async fn test_failing_module() {
        let loader = loader(
            r#"{
                "modules": {
                    "main": { "dependencies": ["./broken"] },
                    "broken": { "fail": "boom" }
                }
            }"#,
        );
        let err = loader.import("main").await.unwrap_err();
        assert_eq!(err.root_cause().code(), "EXECUTION");
        assert_eq!(&**err.root_cause().id(), "broken");
    }

    fn registered(manifest: &str) -> ModuleLoader {
        let modules = ManifestModules::new(Manifest::parse(manifest).unwrap());
        let loader = ModuleLoader::builder()
            .resolver(modules.clone())
            .instantiator(modules.clone())
            .build();
        modules.register_all(&loader);
        loader
    }

    #[test]
    fn test_require_synchronous_manifest() {
        let loader = registered(
            r#"{
                "modules": {
                    "app/main": {
                        "dependencies": ["../lib/math"],
                        "imports": [{ "from": "../lib/math", "name": "pi" }],
                        "exports": { "x": 1.5 }
                    },
                    "lib/math": { "exports": { "pi": 3.5 } }
                }
            }"#,
        );
        let ns = loader.require("app/main").unwrap();
        assert_eq!(ns.to_json(), serde_json::json!({ "x": 1.5, "pi": 3.5 }));
    }

    #[test]
    fn test_require_rejects_delayed_module() {
        let loader = registered(
            r#"{
                "modules": {
                    "main": { "dependencies": ["./lib"] },
                    "lib": { "delay_ms": 1 }
                }
            }"#,
        );
        let err = loader.require("main").unwrap_err();
        assert_eq!(err.code(), "SYNC_ASYNC_MISMATCH");
        assert_eq!(&**err.id(), "lib");
    }

    #[test]
    fn test_require_needs_registration() {
        let loader = loader(r#"{ "modules": { "main": {} } }"#);
        let err = loader.require("main").unwrap_err();
        assert_eq!(err.code(), "SYNC_UNAVAILABLE");
    }
}
