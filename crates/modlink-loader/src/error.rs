// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the module loader
//!
//! Every failure carries a stable code (see [`LoaderError::code`]) plus the
//! offending module id and, where one exists, the referring id. Errors are
//! cheap to clone: sources live behind `Arc`, so an error latched on a Load
//! is handed out by identity to every later consumer.

use crate::ModuleId;
use std::sync::Arc;
use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Errors that can occur while resolving, linking or executing modules
#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    /// No resolver produced a canonical id
    #[error("Unable to resolve module \"{id}\"{} (RESOLUTION)", parent_suffix(.parent))]
    Resolution {
        /// Requested id
        id: ModuleId,
        /// Referring module
        parent: Option<ModuleId>,
        /// Failure raised by a resolver, if any
        cause: Option<Arc<anyhow::Error>>,
    },

    /// The instantiate hooks rejected or produced no declaration
    #[error("Unable to instantiate module \"{id}\"{}: {reason} (INSTANTIATION)", parent_suffix(.parent))]
    Instantiation {
        /// Canonical id
        id: ModuleId,
        /// Referring module
        parent: Option<ModuleId>,
        /// Human readable reason
        reason: String,
        /// Failure raised by an instantiator, if any
        cause: Option<Arc<anyhow::Error>>,
    },

    /// A dependency failed, so the dependent failed with it
    #[error("Module \"{id}\" failed through a dependency: {source} (LINK)")]
    Link {
        /// The dependent module
        id: ModuleId,
        /// The original failure
        #[source]
        source: Arc<LoaderError>,
    },

    /// A declarator or executor raised, or its asynchronous completion rejected
    #[error("Module \"{id}\" failed to execute: {cause} (EXECUTION)")]
    Execution {
        /// Failing module
        id: ModuleId,
        /// The raised error
        cause: Arc<anyhow::Error>,
    },

    /// The synchronous front-end cannot reach a module without suspending
    #[error(
        "Module \"{id}\" is not (yet) available and \"require\" can't load modules async, use \"import\" instead (SYNC_UNAVAILABLE)"
    )]
    SyncUnavailable {
        /// Unavailable module
        id: ModuleId,
    },

    /// The synchronous front-end reached an executor that suspended
    #[error(
        "Module \"{id}\" needs to be initialized asynchronously, use \"import\" instead (SYNC_ASYNC_MISMATCH)"
    )]
    SyncAsyncMismatch {
        /// Module whose executor suspended
        id: ModuleId,
    },

    /// A registry write was rejected
    #[error("Invalid module instance for \"{id}\": {reason} (INVALID_MODULE)")]
    InvalidModule {
        /// Target id
        id: ModuleId,
        /// Why it was refused
        reason: String,
    },
}

fn parent_suffix(parent: &Option<ModuleId>) -> String {
    match parent {
        Some(parent) => format!(" from \"{parent}\""),
        None => String::new(),
    }
}

impl LoaderError {
    /// Stable string code for this error kind
    pub fn code(&self) -> &'static str {
        match self {
            Self::Resolution { .. } => "RESOLUTION",
            Self::Instantiation { .. } => "INSTANTIATION",
            Self::Link { .. } => "LINK",
            Self::Execution { .. } => "EXECUTION",
            Self::SyncUnavailable { .. } => "SYNC_UNAVAILABLE",
            Self::SyncAsyncMismatch { .. } => "SYNC_ASYNC_MISMATCH",
            Self::InvalidModule { .. } => "INVALID_MODULE",
        }
    }

    /// The module this error is reported against
    pub fn id(&self) -> &ModuleId {
        match self {
            Self::Resolution { id, .. }
            | Self::Instantiation { id, .. }
            | Self::Link { id, .. }
            | Self::Execution { id, .. }
            | Self::SyncUnavailable { id }
            | Self::SyncAsyncMismatch { id }
            | Self::InvalidModule { id, .. } => id,
        }
    }

    /// The referring module, for errors raised while following an import edge
    pub fn parent(&self) -> Option<&ModuleId> {
        match self {
            Self::Resolution { parent, .. } | Self::Instantiation { parent, .. } => parent.as_ref(),
            _ => None,
        }
    }

    /// Follow `Link` attribution down to the failure that started it
    pub fn root_cause(&self) -> &LoaderError {
        let mut current = self;
        while let Self::Link { source, .. } = current {
            current = source;
        }
        current
    }

    /// Create a resolution error
    pub fn resolution(id: impl Into<ModuleId>, parent: Option<ModuleId>) -> Self {
        Self::Resolution {
            id: id.into(),
            parent,
            cause: None,
        }
    }

    /// Create an instantiation error without an underlying cause
    pub fn instantiation(
        id: impl Into<ModuleId>,
        parent: Option<ModuleId>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Instantiation {
            id: id.into(),
            parent,
            reason: reason.into(),
            cause: None,
        }
    }

    /// Create an execution error from whatever the module raised
    pub fn execution(id: impl Into<ModuleId>, source: anyhow::Error) -> Self {
        Self::Execution {
            id: id.into(),
            cause: Arc::new(source),
        }
    }

    /// Attribute `source` to the dependent `id`
    pub fn link(id: impl Into<ModuleId>, source: LoaderError) -> Self {
        Self::Link {
            id: id.into(),
            source: Arc::new(source),
        }
    }

    /// Whether two errors are the same latched instance
    ///
    /// Two clones of one latched error share their `Arc` sources, so this
    /// tells a cached error apart from a freshly computed one.
    pub fn same_instance(&self, other: &LoaderError) -> bool {
        match (self, other) {
            (Self::Link { source: a, .. }, Self::Link { source: b, .. }) => Arc::ptr_eq(a, b),
            (Self::Execution { cause: a, .. }, Self::Execution { cause: b, .. }) => {
                Arc::ptr_eq(a, b)
            }
            (
                Self::Instantiation { cause: Some(a), .. },
                Self::Instantiation { cause: Some(b), .. },
            )
            | (Self::Resolution { cause: Some(a), .. }, Self::Resolution { cause: Some(b), .. }) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }

    /// Wrap a hook failure as an instantiation error
    ///
    /// A `LoaderError` raised from inside a hook passes through untouched.
    pub(crate) fn from_instantiate_hook(
        id: &ModuleId,
        parent: Option<&ModuleId>,
        err: anyhow::Error,
    ) -> Self {
        match err.downcast::<LoaderError>() {
            Ok(err) => err,
            Err(err) => Self::Instantiation {
                id: id.clone(),
                parent: parent.cloned(),
                reason: err.to_string(),
                cause: Some(Arc::new(err)),
            },
        }
    }

    /// Wrap a hook failure as a resolution error annotated with the request
    pub(crate) fn from_resolve_hook(
        id: &str,
        parent: Option<&ModuleId>,
        err: anyhow::Error,
    ) -> Self {
        match err.downcast::<LoaderError>() {
            Ok(err) => err,
            Err(err) => Self::Resolution {
                id: id.into(),
                parent: parent.cloned(),
                cause: Some(Arc::new(err)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(LoaderError::resolution("a", None).code(), "RESOLUTION");
        assert_eq!(
            LoaderError::instantiation("a", None, "nope").code(),
            "INSTANTIATION"
        );
        assert_eq!(
            LoaderError::execution("a", anyhow::anyhow!("boom")).code(),
            "EXECUTION"
        );
        assert_eq!(
            LoaderError::SyncUnavailable { id: "a".into() }.code(),
            "SYNC_UNAVAILABLE"
        );
    }

    #[test]
    fn test_message_mentions_ids() {
        let err = LoaderError::resolution("./dep", Some("app".into()));
        let message = err.to_string();
        assert!(message.contains("\"./dep\""));
        assert!(message.contains("from \"app\""));
        assert_eq!(err.parent().map(|p| &**p), Some("app"));
    }

    #[test]
    fn test_root_cause_unwraps_links() {
        let original = LoaderError::instantiation("z", None, "offline");
        let err = LoaderError::link("a", LoaderError::link("b", original));
        assert_eq!(err.code(), "LINK");
        assert_eq!(&**err.root_cause().id(), "z");
        assert_eq!(err.root_cause().code(), "INSTANTIATION");
    }

    #[test]
    fn test_hook_errors_pass_through() {
        let inner = LoaderError::resolution("x", None);
        let wrapped = LoaderError::from_instantiate_hook(&"x".into(), None, inner.into());
        assert_eq!(wrapped.code(), "RESOLUTION");

        let foreign =
            LoaderError::from_instantiate_hook(&"x".into(), None, anyhow::anyhow!("timeout"));
        assert_eq!(foreign.code(), "INSTANTIATION");
        assert!(foreign.to_string().contains("timeout"));
    }

    #[test]
    fn test_same_instance_tracks_clones() {
        let err = LoaderError::execution("a", anyhow::anyhow!("boom"));
        let clone = err.clone();
        let other = LoaderError::execution("a", anyhow::anyhow!("boom"));
        assert!(err.same_instance(&clone));
        assert!(!err.same_instance(&other));
    }
}
