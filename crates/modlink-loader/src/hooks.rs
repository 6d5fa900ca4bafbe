// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Resolve and instantiate hook chains
//!
//! Hooks are installed in order on a [`LoaderBuilder`](crate::LoaderBuilder).
//! Each one receives the request plus a `next` continuation for the rest of
//! the chain, so a hook can answer, delegate, or delegate and then recover
//! from the failure. Falling off the end of the resolve chain is a
//! `RESOLUTION` error; falling off the instantiate chain is an
//! `INSTANTIATION` error.

use crate::declaration::{Declaration, ModuleOptions};
use crate::error::LoaderError;
use crate::loader::ModuleLoader;
use crate::ModuleId;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

/// A resolution request
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    /// Requested id, possibly relative
    pub id: &'a str,
    /// Referring module
    pub parent: Option<&'a ModuleId>,
    /// Edge options
    pub options: Option<&'a ModuleOptions>,
}

/// Outcome of a resolve hook
///
/// Resolution is synchronous when every hook answers with `Ready`, which is
/// what lets [`ModuleLoader::require`] share the chain with `import`.
pub enum Resolved {
    /// Answered immediately
    Ready(anyhow::Result<ModuleId>),
    /// Answer arrives later
    Pending(BoxFuture<'static, anyhow::Result<ModuleId>>),
}

impl Resolved {
    /// Resolved to `id`
    pub fn ok(id: impl Into<ModuleId>) -> Self {
        Resolved::Ready(Ok(id.into()))
    }

    /// Failed with `err`
    pub fn err(err: impl Into<anyhow::Error>) -> Self {
        Resolved::Ready(Err(err.into()))
    }

    /// Whether the answer is available without waiting
    pub fn is_ready(&self) -> bool {
        matches!(self, Resolved::Ready(_))
    }

    /// Wait for the answer
    pub async fn into_result(self) -> anyhow::Result<ModuleId> {
        match self {
            Resolved::Ready(result) => result,
            Resolved::Pending(future) => future.await,
        }
    }

    /// Replace a failure, now or once it arrives
    pub fn or_else<F>(self, recover: F) -> Resolved
    where
        F: FnOnce(anyhow::Error) -> anyhow::Result<ModuleId> + Send + 'static,
    {
        match self {
            Resolved::Ready(Err(err)) => Resolved::Ready(recover(err)),
            Resolved::Ready(ok) => Resolved::Ready(ok),
            Resolved::Pending(future) => {
                Resolved::Pending(async move { future.await.or_else(recover) }.boxed())
            }
        }
    }
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolved::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Resolved::Pending(_) => write!(f, "Pending"),
        }
    }
}

/// Maps a requested id to a canonical module id
pub trait Resolve: Send + Sync {
    /// Resolve `request`, optionally delegating to `next`
    fn resolve(&self, request: &ResolveRequest<'_>, next: ResolveNext<'_>) -> Resolved;
}

/// The rest of the resolve chain
#[derive(Clone, Copy)]
pub struct ResolveNext<'a> {
    chain: &'a [Arc<dyn Resolve>],
}

impl<'a> ResolveNext<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Resolve>]) -> Self {
        Self { chain }
    }

    /// Hand the request to the next hook
    pub fn resolve(self, request: &ResolveRequest<'_>) -> Resolved {
        match self.chain.split_first() {
            Some((hook, rest)) => hook.resolve(request, ResolveNext::new(rest)),
            None => Resolved::err(LoaderError::resolution(
                request.id,
                request.parent.cloned(),
            )),
        }
    }
}

/// Adapter turning a closure into a [`Resolve`] hook
pub struct ResolveFn<F>(F);

/// Build a resolve hook from a closure
pub fn resolve_fn<F>(f: F) -> ResolveFn<F>
where
    F: Fn(&ResolveRequest<'_>, ResolveNext<'_>) -> Resolved + Send + Sync,
{
    ResolveFn(f)
}

impl<F> Resolve for ResolveFn<F>
where
    F: Fn(&ResolveRequest<'_>, ResolveNext<'_>) -> Resolved + Send + Sync,
{
    fn resolve(&self, request: &ResolveRequest<'_>, next: ResolveNext<'_>) -> Resolved {
        (self.0)(request, next)
    }
}

/// An instantiation request
#[derive(Clone, Copy)]
pub struct InstantiateRequest<'a> {
    /// Canonical id
    pub id: &'a ModuleId,
    /// First module that asked for it
    pub parent: Option<&'a ModuleId>,
    /// Options of the edge that created the Load
    pub options: Option<&'a ModuleOptions>,
    /// The loader, for hooks that evaluate sources and consume registrations
    pub loader: &'a ModuleLoader,
}

/// Produces the declaration of a resolved module
#[async_trait]
pub trait Instantiate: Send + Sync {
    /// Instantiate `request`, optionally delegating to `next`
    ///
    /// `Ok(None)` means "no declaration", which the loader reports as an
    /// `INSTANTIATION` error.
    async fn instantiate(
        &self,
        request: &InstantiateRequest<'_>,
        next: InstantiateNext<'_>,
    ) -> anyhow::Result<Option<Declaration>>;
}

/// The rest of the instantiate chain
#[derive(Clone, Copy)]
pub struct InstantiateNext<'a> {
    chain: &'a [Arc<dyn Instantiate>],
}

impl<'a> InstantiateNext<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Instantiate>]) -> Self {
        Self { chain }
    }

    /// Hand the request to the next hook
    pub async fn instantiate(
        self,
        request: &InstantiateRequest<'_>,
    ) -> anyhow::Result<Option<Declaration>> {
        match self.chain.split_first() {
            Some((hook, rest)) => hook.instantiate(request, InstantiateNext::new(rest)).await,
            None => Err(LoaderError::instantiation(
                request.id.clone(),
                request.parent.cloned(),
                "no instantiate hook handled the module",
            )
            .into()),
        }
    }
}

/// Notification emitted when a Load settles
#[derive(Debug, Clone, Copy)]
pub struct LoadEvent<'a> {
    /// The Load
    pub id: &'a ModuleId,
    /// Canonical ids of its dependencies, when linked
    pub dependencies: &'a [ModuleId],
    /// The latched error, for failures
    pub error: Option<&'a LoaderError>,
    /// Whether the failure started here rather than in a dependency
    pub is_error_source: bool,
}

/// Observer called once per settled Load
pub type OnLoad = Arc<dyn Fn(&LoadEvent<'_>) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    struct Prefix(&'static str);

    impl Resolve for Prefix {
        fn resolve(&self, request: &ResolveRequest<'_>, next: ResolveNext<'_>) -> Resolved {
            match request.id.strip_prefix(self.0) {
                Some(rest) => Resolved::ok(rest),
                None => next.resolve(request),
            }
        }
    }

    fn request(id: &str) -> ResolveRequest<'_> {
        ResolveRequest {
            id,
            parent: None,
            options: None,
        }
    }

    #[test]
    fn test_chain_order() {
        let chain: Vec<Arc<dyn Resolve>> = vec![Arc::new(Prefix("a:")), Arc::new(Prefix("b:"))];
        let next = ResolveNext::new(&chain);

        match next.resolve(&request("b:x")) {
            Resolved::Ready(Ok(id)) => assert_eq!(&*id, "x"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_end_of_chain_is_resolution_error() {
        let next = ResolveNext::new(&[]);
        let Resolved::Ready(Err(err)) = next.resolve(&request("missing")) else {
            panic!("expected a failure");
        };
        let err = err.downcast::<LoaderError>().unwrap();
        assert_eq!(err.code(), "RESOLUTION");
        assert_eq!(&**err.id(), "missing");
    }

    #[tokio::test]
    async fn test_or_else_recovers_pending() {
        let pending = Resolved::Pending(async { Err::<ModuleId, _>(anyhow::anyhow!("offline")) }.boxed());
        let recovered = pending.or_else(|_| Ok("fallback".into()));
        assert!(!recovered.is_ready());
        assert_eq!(&*recovered.into_result().await.unwrap(), "fallback");
    }

    #[test]
    fn test_resolve_fn() {
        let hook = resolve_fn(|request: &ResolveRequest<'_>, _next: ResolveNext<'_>| {
            Resolved::ok(format!("/{}", request.id))
        });
        let chain: Vec<Arc<dyn Resolve>> = vec![Arc::new(hook)];
        let resolved = ResolveNext::new(&chain).resolve(&request("x"));
        assert!(matches!(resolved, Resolved::Ready(Ok(id)) if &*id == "/x"));
    }
}
