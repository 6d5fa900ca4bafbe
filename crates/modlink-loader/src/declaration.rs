// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module declarations
//!
//! Instantiation turns a module id into a [`Declaration`]: the ordered
//! dependency ids plus a declarator. The loader calls the declarator once per
//! Load with an [`Exporter`] (and, when asked for, a [`DeclarationContext`]);
//! the declarator answers with the per-dependency setters and the executor.

use crate::context::DeclarationContext;
use crate::exporter::Exporter;
use crate::namespace::Namespace;
use crate::ModuleId;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Callback receiving a dependency's namespace whenever it changes
pub type Setter = Arc<dyn Fn(&Namespace) + Send + Sync>;

/// Factory producing the setters and executor of a module
pub type Declarator =
    Arc<dyn Fn(Exporter, Option<DeclarationContext>) -> anyhow::Result<Declared> + Send + Sync>;

/// Runs a module body. Consumed exactly once.
pub type Executor = Box<dyn FnOnce() -> anyhow::Result<Completion> + Send>;

/// What an executor left behind
pub enum Completion {
    /// Everything observable happened synchronously
    Done,
    /// Top-level asynchronous completion still in flight
    Pending(BoxFuture<'static, anyhow::Result<()>>),
}

impl Completion {
    /// Check whether the executor suspended
    pub fn is_pending(&self) -> bool {
        matches!(self, Completion::Pending(_))
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Done => write!(f, "Done"),
            Completion::Pending(_) => write!(f, "Pending"),
        }
    }
}

/// Extra information attached to an import edge
///
/// Shaped like `{ "assert": { "type": "json" } }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleOptions(pub serde_json::Map<String, serde_json::Value>);

impl ModuleOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get a key
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// The asserted module type, if any
    pub fn assert_type(&self) -> Option<&str> {
        self.0.get("assert")?.get("type")?.as_str()
    }
}

/// The setters and executor returned by a declarator
#[derive(Default)]
pub struct Declared {
    /// One entry per dependency, in declaration order
    pub setters: Vec<Option<Setter>>,
    /// Module body; `None` is a no-op
    pub execute: Option<Executor>,
}

impl Declared {
    /// Nothing bound, nothing to run
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a setter for the next dependency
    pub fn setter(mut self, setter: impl Fn(&Namespace) + Send + Sync + 'static) -> Self {
        self.setters.push(Some(Arc::new(setter)));
        self
    }

    /// Skip the next dependency (imported for side effects only)
    pub fn no_setter(mut self) -> Self {
        self.setters.push(None);
        self
    }

    /// Synchronous module body
    pub fn execute(mut self, body: impl FnOnce() -> anyhow::Result<()> + Send + 'static) -> Self {
        self.execute = Some(Box::new(move || body().map(|()| Completion::Done)));
        self
    }

    /// Module body with a top-level asynchronous completion
    pub fn execute_async<F, Fut>(mut self, body: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.execute = Some(Box::new(move || Ok(Completion::Pending(Box::pin(body())))));
        self
    }

    /// Raw executor, for bodies that decide at runtime whether to suspend
    pub fn executor(mut self, executor: Executor) -> Self {
        self.execute = Some(executor);
        self
    }
}

/// An instantiated module, ready to be linked
#[derive(Clone)]
pub struct Declaration {
    /// Dependency ids as written by the module, resolved relative to it
    pub dependencies: Vec<ModuleId>,
    /// Factory for setters and executor
    pub declarator: Declarator,
    /// Per-dependency edge options
    pub options: Vec<ModuleOptions>,
    /// Whether the declarator wants a [`DeclarationContext`]
    pub wants_context: bool,
}

impl Declaration {
    /// Create a declaration
    pub fn new<I, S, F>(dependencies: I, declarator: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ModuleId>,
        F: Fn(Exporter, Option<DeclarationContext>) -> anyhow::Result<Declared>
            + Send
            + Sync
            + 'static,
    {
        Self {
            dependencies: dependencies.into_iter().map(Into::into).collect(),
            declarator: Arc::new(declarator),
            options: Vec::new(),
            wants_context: false,
        }
    }

    /// Attach per-dependency options
    pub fn with_options(mut self, options: Vec<ModuleOptions>) -> Self {
        self.options = options;
        self
    }

    /// Ask the loader for a context (`import`, `meta`)
    pub fn with_context(mut self) -> Self {
        self.wants_context = true;
        self
    }

    /// Run the declarator
    pub fn declare(
        &self,
        exporter: Exporter,
        context: Option<DeclarationContext>,
    ) -> anyhow::Result<Declared> {
        (self.declarator)(exporter, context)
    }

    /// Check if two handles share the same declarator
    pub fn same_declarator(&self, other: &Declaration) -> bool {
        Arc::ptr_eq(&self.declarator, &other.declarator)
    }
}

impl fmt::Debug for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Declaration")
            .field("dependencies", &self.dependencies)
            .field("options", &self.options)
            .field("wants_context", &self.wants_context)
            .finish_non_exhaustive()
    }
}

pub(crate) fn noop_executor() -> Executor {
    Box::new(|| Ok(Completion::Done))
}
