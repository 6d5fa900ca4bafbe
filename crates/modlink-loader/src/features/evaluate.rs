// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Turning module sources into declarations
//!
//! Scripts are handed to a host [`SourceEvaluator`], which is expected to
//! call [`ModuleLoader::register`] while it runs. JSON sources need no host:
//! they become a module exporting the parsed document as `default`.

use crate::declaration::{Declaration, Declared};
use crate::error::{LoaderError, Result};
use crate::hooks::{
    Instantiate, InstantiateNext, InstantiateRequest, Resolve, ResolveNext, ResolveRequest,
    Resolved,
};
use crate::loader::ModuleLoader;
use crate::value::Value;
use crate::ModuleId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

/// Module source text plus its media type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSource {
    /// Media type, parameters allowed (`text/javascript;charset=utf-8`)
    pub content_type: String,
    /// Source text
    pub body: String,
}

impl ModuleSource {
    /// A script source
    pub fn script(body: impl Into<String>) -> Self {
        Self {
            content_type: "text/javascript".into(),
            body: body.into(),
        }
    }

    /// A JSON source
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            content_type: "application/json".into(),
            body: body.into(),
        }
    }

    /// Media type without parameters, lowercased
    pub fn essence(&self) -> String {
        self.content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }
}

/// Host capability that runs script sources
pub trait SourceEvaluator: Send + Sync {
    /// Evaluate `source` as module `id`, registering its declaration
    fn evaluate(&self, loader: &ModuleLoader, source: &str, id: &ModuleId) -> anyhow::Result<()>;
}

impl ModuleLoader {
    /// Evaluate a script and take the declaration it registered
    pub fn evaluate_source(
        &self,
        evaluator: &dyn SourceEvaluator,
        source: &str,
        id: &ModuleId,
    ) -> Result<Declaration> {
        evaluator
            .evaluate(self, source, id)
            .map_err(|err| LoaderError::from_instantiate_hook(id, None, err))?;
        self.consume_register(Some(id)).ok_or_else(|| {
            LoaderError::instantiation(id.clone(), None, "source did not register a module")
        })
    }

    /// Turn a module source into a declaration according to its media type
    pub fn evaluate_module(
        &self,
        evaluator: Option<&dyn SourceEvaluator>,
        source: &ModuleSource,
        id: &ModuleId,
    ) -> Result<Declaration> {
        let essence = source.essence();
        trace!(id = %id, content_type = %essence, "evaluating module source");
        match essence.as_str() {
            "text/javascript" | "application/javascript" => match evaluator {
                Some(evaluator) => self.evaluate_source(evaluator, &source.body, id),
                None => Err(LoaderError::instantiation(
                    id.clone(),
                    None,
                    "no source evaluator installed",
                )),
            },
            "text/json" | "application/json" => {
                let data: serde_json::Value = serde_json::from_str(&source.body).map_err(|err| {
                    LoaderError::instantiation(id.clone(), None, format!("invalid JSON: {err}"))
                })?;
                Ok(json_module(Value::from(data)))
            }
            other => Err(LoaderError::instantiation(
                id.clone(),
                None,
                format!("unknown content type {other:?}"),
            )),
        }
    }
}

fn json_module(data: Value) -> Declaration {
    Declaration::new(Vec::<ModuleId>::new(), move |export, _| {
        let data = data.clone();
        Ok(Declared::new().execute(move || {
            export.export("default", data);
            Ok(())
        }))
    })
}

/// In-memory module sources, served by id
///
/// Install it as both a resolver and an instantiator: ids with a source
/// resolve to themselves and instantiate through the evaluator.
#[derive(Clone)]
pub struct SourceFiles {
    files: Arc<DashMap<ModuleId, ModuleSource>>,
    evaluator: Option<Arc<dyn SourceEvaluator>>,
}

impl SourceFiles {
    /// Sources that are JSON only
    pub fn new() -> Self {
        Self {
            files: Arc::new(DashMap::new()),
            evaluator: None,
        }
    }

    /// Sources that may include scripts
    pub fn with_evaluator(evaluator: impl SourceEvaluator + 'static) -> Self {
        Self {
            files: Arc::new(DashMap::new()),
            evaluator: Some(Arc::new(evaluator)),
        }
    }

    /// Add or replace sources
    pub fn add_files<I, K>(&self, files: I)
    where
        I: IntoIterator<Item = (K, ModuleSource)>,
        K: Into<ModuleId>,
    {
        for (id, source) in files {
            self.files.insert(id.into(), source);
        }
    }

    /// Drop every source
    pub fn reset_files(&self) {
        self.files.clear();
    }

    /// Whether a source exists for `id`
    pub fn contains(&self, id: &str) -> bool {
        self.files.contains_key(id)
    }
}

impl Default for SourceFiles {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolve for SourceFiles {
    fn resolve(&self, request: &ResolveRequest<'_>, next: ResolveNext<'_>) -> Resolved {
        if self.contains(request.id) {
            return Resolved::ok(request.id);
        }
        next.resolve(request)
    }
}

#[async_trait]
impl Instantiate for SourceFiles {
    async fn instantiate(
        &self,
        request: &InstantiateRequest<'_>,
        next: InstantiateNext<'_>,
    ) -> anyhow::Result<Option<Declaration>> {
        let source = self.files.get(&**request.id).map(|entry| entry.value().clone());
        match source {
            Some(source) => Ok(Some(request.loader.evaluate_module(
                self.evaluator.as_deref(),
                &source,
                request.id,
            )?)),
            None => next.instantiate(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Understands one statement per line: `export <name> <json>`
    struct ExportLines;

    impl SourceEvaluator for ExportLines {
        fn evaluate(&self, loader: &ModuleLoader, source: &str, _id: &ModuleId) -> anyhow::Result<()> {
            let mut bindings = Vec::new();
            for line in source.lines().filter(|line| !line.trim().is_empty()) {
                let mut parts = line.trim().splitn(3, ' ');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some("export"), Some(name), Some(json)) => {
                        bindings.push((name.to_string(), serde_json::from_str::<serde_json::Value>(json)?));
                    }
                    _ => anyhow::bail!("syntax error: {line}"),
                }
            }
            loader.register(Declaration::new(Vec::<ModuleId>::new(), move |export, _| {
                let bindings = bindings.clone();
                Ok(Declared::new().execute(move || {
                    export.export_all(bindings);
                    Ok(())
                }))
            }));
            Ok(())
        }
    }

    #[test]
    fn test_essence_strips_parameters() {
        let source = ModuleSource {
            content_type: "Text/JavaScript; charset=utf-8".into(),
            body: String::new(),
        };
        assert_eq!(source.essence(), "text/javascript");
    }

    #[test]
    fn test_unknown_content_type() {
        let loader = ModuleLoader::new();
        let source = ModuleSource {
            content_type: "text/plain".into(),
            body: "some text".into(),
        };
        let err = loader
            .evaluate_module(None, &source, &"http://example.com/some-module.txt".into())
            .unwrap_err();
        assert_eq!(err.code(), "INSTANTIATION");
        assert!(err.to_string().contains("text/plain"));
    }

    #[test]
    fn test_script_without_registration() {
        struct Silent;
        impl SourceEvaluator for Silent {
            fn evaluate(&self, _: &ModuleLoader, _: &str, _: &ModuleId) -> anyhow::Result<()> {
                Ok(())
            }
        }
        let loader = ModuleLoader::new();
        let err = loader
            .evaluate_source(&Silent, "", &"empty.js".into())
            .unwrap_err();
        assert_eq!(err.code(), "INSTANTIATION");
    }

    #[tokio::test]
    async fn test_json_source_exports_default() {
        let files = SourceFiles::new();
        files.add_files([("data.json", ModuleSource::json(r#"{ "hello": "world" }"#))]);
        let loader = ModuleLoader::builder()
            .resolver(files.clone())
            .instantiator(files)
            .build();

        let ns = loader.import("data.json").await.unwrap();
        assert_eq!(
            ns.get("default").map(|v| v.to_json()),
            Some(serde_json::json!({ "hello": "world" }))
        );
    }

    #[tokio::test]
    async fn test_script_sources_through_evaluator() {
        let files = SourceFiles::with_evaluator(ExportLines);
        files.add_files([(
            "http://example.com/some-module.js",
            ModuleSource::script("export hello \"world\"\nexport answer 42"),
        )]);
        let loader = ModuleLoader::builder()
            .resolver(files.clone())
            .instantiator(files.clone())
            .build();

        let ns = loader.import("http://example.com/some-module.js").await.unwrap();
        assert_eq!(ns.get("hello"), Some("world".into()));
        assert_eq!(ns.get("answer"), Some(42.into()));

        files.reset_files();
        assert!(!files.contains("http://example.com/some-module.js"));
    }

    #[tokio::test]
    async fn test_evaluator_errors_fail_instantiation() {
        let files = SourceFiles::with_evaluator(ExportLines);
        files.add_files([("bad.js", ModuleSource::script("oops"))]);
        let loader = ModuleLoader::builder()
            .resolver(files.clone())
            .instantiator(files)
            .build();

        let err = loader.import("bad.js").await.unwrap_err();
        assert_eq!(err.code(), "INSTANTIATION");
        assert!(err.to_string().contains("syntax error"));
    }
}
