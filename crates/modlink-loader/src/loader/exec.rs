// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Graph-wide linking and post-order execution

use super::load::{Load, Outcome, Running, SharedTask};
use super::ModuleLoader;
use crate::declaration::{Completion, Executor};
use crate::error::{LoaderError, Result};
use crate::namespace::Namespace;
use crate::ModuleId;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

type Visited = Arc<Mutex<HashSet<ModuleId>>>;

impl ModuleLoader {
    /// Top-level completion of `load`, created on first request
    pub(crate) fn top_level_load(&self, load: &Arc<Load>) -> SharedTask<Namespace> {
        let mut state = load.state.lock();
        if let Some(completion) = &state.completion {
            return completion.clone();
        }

        let loader = self.clone();
        let root = Arc::clone(load);
        let completion = async move {
            let visited = Visited::default();
            if let Some(pass) = loader.instantiate_all(&root, &root, &visited) {
                pass.await?;
            }
            let pending = loader.post_order_exec(&root, &mut HashSet::new())?;
            if let Some(pending) = pending {
                pending.await?;
            }
            Ok::<_, LoaderError>(root.namespace())
        }
        .boxed()
        .shared();

        state.completion = Some(completion.clone());
        completion
    }

    /// Link every Load reachable from `load`
    ///
    /// `visited` is checked before anything is awaited, so a cycle never
    /// schedules a second pass over the same Load.
    fn instantiate_all(
        &self,
        load: &Arc<Load>,
        parent: &Arc<Load>,
        visited: &Visited,
    ) -> Option<BoxFuture<'static, Result<()>>> {
        if !visited.lock().insert(load.id.clone()) {
            return None;
        }

        let loader = self.clone();
        let load = Arc::clone(load);
        let parent = Arc::clone(parent);
        let visited = Arc::clone(visited);
        Some(
            async move {
                match loader.link_graph(&load, &parent, &visited).await {
                    Ok(()) => Ok(()),
                    Err(err) => Err(loader.fail_link(&load, err)),
                }
            }
            .boxed(),
        )
    }

    async fn link_graph(&self, load: &Arc<Load>, parent: &Arc<Load>, visited: &Visited) -> Result<()> {
        let link = load.state.lock().link.clone();
        if let Some(link) = link {
            link.await?;
        }
        load.adopt_parent(parent);

        let passes: Vec<_> = load
            .dependencies()
            .iter()
            .filter_map(|dep| self.instantiate_all(dep, parent, visited))
            .collect();
        futures::future::try_join_all(passes).await?;
        Ok(())
    }

    /// Attribute a linking failure to `load`
    fn fail_link(&self, load: &Arc<Load>, err: LoaderError) -> LoaderError {
        if let Some(existing) = load.error() {
            return existing;
        }
        let err = if err.id() == &load.id {
            err
        } else {
            LoaderError::link(load.id.clone(), err)
        };
        self.fail_load(load, err, false)
    }

    /// Execute the graph below `load`, dependencies first
    ///
    /// Synchronous graphs run to completion before this returns. When an
    /// executor suspends, the returned task settles once it and everything
    /// waiting on it has run.
    pub(crate) fn post_order_exec(
        &self,
        load: &Arc<Load>,
        seen: &mut HashSet<ModuleId>,
    ) -> Result<Option<SharedTask<()>>> {
        let _execution = self.inner.execution.lock();
        if !seen.insert(load.id.clone()) {
            return Ok(None);
        }

        let (executor, running) = {
            let mut state = load.state.lock();
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            match state.executor.take() {
                Some(executor) => (executor, Running::install(&load.id, &mut state)),
                None => return Ok(state.pending.clone()),
            }
        };

        let outcome = self.exec_after_dependencies(load, executor, seen);
        running.settle(&outcome);
        outcome
    }

    fn exec_after_dependencies(
        &self,
        load: &Arc<Load>,
        executor: Executor,
        seen: &mut HashSet<ModuleId>,
    ) -> Outcome {
        let mut waiting = Vec::new();
        for dep in load.dependencies() {
            match self.post_order_exec(&dep, seen) {
                Ok(Some(task)) => waiting.push(task),
                Ok(None) => {}
                Err(err) => {
                    let err = LoaderError::link(load.id.clone(), err);
                    return Err(self.fail_load(load, err, false));
                }
            }
        }

        if waiting.is_empty() {
            return self.run_executor(load, executor);
        }

        trace!(id = %load.id, waiting = waiting.len(), "waiting on asynchronous dependencies");
        let loader = self.clone();
        let target = Arc::clone(load);
        let task = async move {
            if let Err(err) = futures::future::try_join_all(waiting).await {
                let err = LoaderError::link(target.id.clone(), err);
                return Err(loader.fail_load(&target, err, false));
            }
            let pending = loader.run_executor(&target, executor)?;
            if let Some(pending) = pending {
                pending.await?;
            }
            Ok::<_, LoaderError>(())
        }
        .boxed()
        .shared();
        load.state.lock().pending = Some(task.clone());
        Ok(Some(task))
    }

    /// Run a module body, latching whatever it leaves behind
    pub(crate) fn run_executor(
        &self,
        load: &Arc<Load>,
        executor: Executor,
    ) -> Outcome {
        let _execution = self.inner.execution.lock();
        let running = Running::install(&load.id, &mut load.state.lock());
        let outcome = self.execute(load, executor);
        running.settle(&outcome);
        outcome
    }

    fn execute(&self, load: &Arc<Load>, executor: Executor) -> Outcome {
        debug!(id = %load.id, "executing module");
        load.bindings.begin_execution();

        match executor() {
            Err(err) => {
                let err = LoaderError::execution(load.id.clone(), err);
                Err(self.fail_load(load, err, true))
            }
            Ok(Completion::Done) => {
                self.finish_load(load);
                Ok(None)
            }
            Ok(Completion::Pending(body)) => {
                let loader = self.clone();
                let target = Arc::clone(load);
                let task = async move {
                    match body.await {
                        Ok(()) => {
                            loader.finish_load(&target);
                            Ok(())
                        }
                        Err(err) => {
                            let err = LoaderError::execution(target.id.clone(), err);
                            Err(loader.fail_load(&target, err, true))
                        }
                    }
                }
                .boxed()
                .shared();
                load.state.lock().pending = Some(task.clone());
                Ok(Some(task))
            }
        }
    }
}
