// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Load records
//!
//! One [`Load`] exists per canonical id in the registry. It owns the
//! namespace, the lazily driven instantiate and link tasks, the executor slot
//! and any latched error. Every field is guarded by a single mutex that is
//! never held across an await or a user callback.

use crate::declaration::{Executor, ModuleOptions, Setter};
use crate::error::{LoaderError, Result};
use crate::exporter::Bindings;
use crate::namespace::Namespace;
use crate::ModuleId;
use futures::channel::oneshot;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// A shareable, lazily driven task
pub(crate) type SharedTask<T> = Shared<BoxFuture<'static, Result<T>>>;

pub(crate) fn ready_task<T>(value: Result<T>) -> SharedTask<T>
where
    T: Clone + Send + Sync + 'static,
{
    futures::future::ready(value).boxed().shared()
}

/// Lifecycle position of a Load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, instantiation not started
    Pending,
    /// Waiting for the instantiate hooks
    Instantiating,
    /// Declared; dependency edges being followed
    Linking,
    /// Linked, executor not yet run
    Linked,
    /// Executor taken; waiting for dependencies, running, or awaiting async completion
    Executing,
    /// Namespace complete
    Completed,
    /// Error latched
    Failed,
}

/// Module body slot
#[derive(Default)]
pub(crate) enum ExecutorSlot {
    /// Not instantiated yet
    #[default]
    Unset,
    /// Waiting to run
    Ready(Executor),
    /// Taken, or the Load failed
    Consumed,
}

impl ExecutorSlot {
    pub(crate) fn is_consumed(&self) -> bool {
        matches!(self, ExecutorSlot::Consumed)
    }

    /// Take the executor, leaving the slot consumed
    pub(crate) fn take(&mut self) -> Option<Executor> {
        match std::mem::replace(self, ExecutorSlot::Consumed) {
            ExecutorSlot::Ready(executor) => Some(executor),
            ExecutorSlot::Unset => {
                *self = ExecutorSlot::Unset;
                None
            }
            ExecutorSlot::Consumed => None,
        }
    }
}

/// What an executor left behind: nothing, or a task still in flight
pub(crate) type Outcome = Result<Option<SharedTask<()>>>;

/// Marks a Load as running from the moment its executor is taken
///
/// Installs a `pending` task that settles with the outcome handed to
/// [`settle`](Self::settle), so concurrent importers wait instead of
/// treating a half-run module as available.
pub(crate) struct Running {
    tx: oneshot::Sender<Outcome>,
}

impl Running {
    pub(crate) fn install(id: &ModuleId, state: &mut LoadState) -> Self {
        let (tx, rx) = oneshot::channel::<Outcome>();
        let id = id.clone();
        let task = async move {
            match rx.await {
                Ok(Ok(Some(next))) => next.await,
                Ok(Ok(None)) => Ok(()),
                Ok(Err(err)) => Err(err),
                Err(oneshot::Canceled) => Err(LoaderError::execution(
                    id,
                    anyhow::anyhow!("module execution was abandoned"),
                )),
            }
        }
        .boxed()
        .shared();
        state.pending = Some(task);
        Self { tx }
    }

    pub(crate) fn settle(self, outcome: &Outcome) {
        // Nobody waiting is fine.
        let _ = self.tx.send(outcome.clone());
    }
}

/// Declared dependency edges waiting to be linked
pub(crate) struct Linkage {
    pub(crate) dependencies: Vec<ModuleId>,
    pub(crate) setters: Vec<Option<Setter>>,
    pub(crate) options: Vec<ModuleOptions>,
}

#[derive(Default)]
pub(crate) struct LoadState {
    /// Instantiate task, dropped once the Load completes
    pub(crate) instantiate: Option<SharedTask<()>>,
    /// Link task, dropped once the Load completes
    pub(crate) link: Option<SharedTask<()>>,
    pub(crate) instantiating: bool,
    pub(crate) linkage: Option<Linkage>,
    /// Dependency Loads, in declaration order
    pub(crate) dependencies: Option<Vec<Arc<Load>>>,
    pub(crate) executor: ExecutorSlot,
    pub(crate) error: Option<LoaderError>,
    /// In-flight execution, including waiting on asynchronous dependencies
    pub(crate) pending: Option<SharedTask<()>>,
    /// Top-level completion
    pub(crate) completion: Option<SharedTask<Namespace>>,
    pub(crate) completed: bool,
    /// Load whose top-level import is responsible for this one
    pub(crate) parent: Option<Weak<Load>>,
}

/// Per-module record in the registry
pub(crate) struct Load {
    pub(crate) id: ModuleId,
    pub(crate) options: Option<ModuleOptions>,
    pub(crate) bindings: Arc<Bindings>,
    pub(crate) state: Mutex<LoadState>,
}

impl Load {
    /// Create a Load shell
    pub(crate) fn new(id: ModuleId, options: Option<ModuleOptions>) -> Self {
        Self {
            id,
            options,
            bindings: Arc::new(Bindings::default()),
            state: Mutex::new(LoadState::default()),
        }
    }

    /// Create an already completed Load around `namespace`
    pub(crate) fn settled(id: ModuleId, namespace: Namespace) -> Self {
        let load = Self {
            id,
            options: None,
            bindings: Arc::new(Bindings::new(namespace.clone())),
            state: Mutex::new(LoadState::default()),
        };
        {
            let mut state = load.state.lock();
            state.executor = ExecutorSlot::Consumed;
            state.completed = true;
            state.completion = Some(ready_task(Ok(namespace)));
        }
        load
    }

    pub(crate) fn namespace(&self) -> Namespace {
        self.bindings.namespace().clone()
    }

    pub(crate) fn phase(&self) -> Phase {
        let state = self.state.lock();
        if state.error.is_some() {
            return Phase::Failed;
        }
        if state.completed {
            return Phase::Completed;
        }
        match &state.executor {
            ExecutorSlot::Unset if state.instantiating => Phase::Instantiating,
            ExecutorSlot::Unset => Phase::Pending,
            ExecutorSlot::Ready(_) => match state.link.as_ref().and_then(|link| link.peek()) {
                Some(Ok(())) => Phase::Linked,
                _ => Phase::Linking,
            },
            ExecutorSlot::Consumed => Phase::Executing,
        }
    }

    /// Executor consumed, nothing in flight and no error: the namespace is final
    pub(crate) fn is_available(&self) -> bool {
        let state = self.state.lock();
        state.executor.is_consumed() && state.pending.is_none() && state.error.is_none()
    }

    /// Executor still waiting to run, or execution still in flight
    pub(crate) fn is_in_flight(&self) -> bool {
        let state = self.state.lock();
        !state.executor.is_consumed() || state.pending.is_some()
    }

    pub(crate) fn executor_consumed(&self) -> bool {
        self.state.lock().executor.is_consumed()
    }

    /// Importers may read the namespace right away: exports were hoisted,
    /// execution started, or the Load already settled
    pub(crate) fn exports_visible(&self) -> bool {
        self.bindings.is_hoisted()
            || self.bindings.is_executing()
            || self.state.lock().instantiate.is_none()
    }

    pub(crate) fn error(&self) -> Option<LoaderError> {
        self.state.lock().error.clone()
    }

    pub(crate) fn dependencies(&self) -> Vec<Arc<Load>> {
        self.state.lock().dependencies.clone().unwrap_or_default()
    }

    pub(crate) fn dependency_ids(&self) -> Vec<ModuleId> {
        self.dependencies().iter().map(|dep| dep.id.clone()).collect()
    }

    pub(crate) fn parent(&self) -> Option<Arc<Load>> {
        self.state.lock().parent.as_ref().and_then(Weak::upgrade)
    }

    /// Record `parent` unless a live parent still owns this Load
    pub(crate) fn adopt_parent(&self, parent: &Arc<Load>) {
        let replace = match self.parent() {
            None => true,
            Some(current) => current.executor_consumed(),
        };
        if replace {
            self.state.lock().parent = Some(Arc::downgrade(parent));
        }
    }
}

impl std::fmt::Debug for Load {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Load")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish()
    }
}
