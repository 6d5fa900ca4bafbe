// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # modlink-loader
//!
//! A dynamic module loader for dependency graphs whose modules are declared
//! at runtime. It provides:
//!
//! - Load deduplication: one Load per canonical id, however many importers
//! - Pluggable resolve and instantiate hook chains
//! - Live bindings: importers see every export made after they linked
//! - Cycle-tolerant linking and dependencies-first execution
//! - Top-level asynchronous completion, gating dependents until it settles
//! - A synchronous `require` front-end for graphs that never suspend
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use modlink_loader::{Declaration, Declared, ModuleLoader};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let loader = ModuleLoader::new();
//!     loader.register_named(
//!         "answer",
//!         Declaration::new(Vec::<modlink_loader::ModuleId>::new(), |export, _| {
//!             Ok(Declared::new().execute(move || {
//!                 export.export("default", 42);
//!                 Ok(())
//!             }))
//!         }),
//!     );
//!     let ns = loader.import("answer").await?;
//!     println!("{ns:?}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod declaration;
pub mod error;
pub mod exporter;
pub mod features;
pub mod hooks;
pub mod loader;
pub mod namespace;
pub mod value;

use std::sync::Arc;

/// Canonical module identifier
pub type ModuleId = Arc<str>;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-exports
pub use context::{DeclarationContext, ImportMeta};
pub use declaration::{
    Completion, Declaration, Declared, Declarator, Executor, ModuleOptions, Setter,
};
pub use error::{LoaderError, Result};
pub use exporter::Exporter;
pub use features::evaluate::{ModuleSource, SourceEvaluator, SourceFiles};
pub use features::registry::Rebind;
pub use hooks::{
    resolve_fn, Instantiate, InstantiateNext, InstantiateRequest, LoadEvent, Resolve,
    ResolveNext, ResolveRequest, Resolved,
};
pub use loader::load::Phase;
pub use loader::{LoaderBuilder, ModuleLoader};
pub use namespace::{Namespace, MODULE_MARKER};
pub use value::Value;
