//! Handler wrapping and the internal `Subscription` record.
//!
//! Two handler shapes are supported, mirroring the upstream bus's
//! `asyncio.to_thread` split for plain functions: an async handler runs
//! in-place on the dispatch loop, a sync handler runs via
//! [`tokio::task::block_in_place`] so a slow blocking plugin callback never
//! starves other tasks on the same runtime (§4.1, §5).

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{matcher::Matcher, Event};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Signature accepted by [`Handler::from_async`].
pub type HandlerFn =
    dyn for<'a> Fn(&'a mut Event) -> BoxFuture<'a, ncatbot_common::Result<serde_json::Value>> + Send + Sync;

/// Signature accepted by [`Handler::from_sync`].
pub type SyncHandlerFn = dyn Fn(&mut Event) -> ncatbot_common::Result<serde_json::Value> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) uuid::Uuid);

#[async_trait]
trait Call: Send + Sync {
    async fn call(&self, event: &mut Event) -> ncatbot_common::Result<serde_json::Value>;
}

struct AsyncHandler {
    f: Box<HandlerFn>,
}

#[async_trait]
impl Call for AsyncHandler {
    async fn call(&self, event: &mut Event) -> ncatbot_common::Result<serde_json::Value> {
        (self.f)(event).await
    }
}

struct SyncHandler {
    f: Arc<SyncHandlerFn>,
}

#[async_trait]
impl Call for SyncHandler {
    async fn call(&self, event: &mut Event) -> ncatbot_common::Result<serde_json::Value> {
        let f = self.f.clone();
        tokio::task::block_in_place(|| f(event))
    }
}

/// A named, callable handler. Cheap to clone — the subscription tables
/// store `Handler` by value.
#[derive(Clone)]
pub struct Handler {
    name: Arc<str>,
    inner: Arc<dyn Call>,
}

impl Handler {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, event: &mut Event) -> ncatbot_common::Result<serde_json::Value> {
        self.inner.call(event).await
    }

    /// Wrap an async handler function. `name` identifies the handler for
    /// priority-tiebreak ordering and for diagnostics (§4.1).
    pub fn from_async(
        name: impl Into<String>,
        f: impl for<'a> Fn(&'a mut Event) -> BoxFuture<'a, ncatbot_common::Result<serde_json::Value>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: Arc::from(name.into()),
            inner: Arc::new(AsyncHandler { f: Box::new(f) }),
        }
    }

    /// Wrap a synchronous handler function, run via `block_in_place` so it
    /// never blocks the rest of the dispatch loop (§4.1, §5).
    pub fn from_sync(
        name: impl Into<String>,
        f: impl Fn(&mut Event) -> ncatbot_common::Result<serde_json::Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: Arc::from(name.into()),
            inner: Arc::new(SyncHandler { f: Arc::new(f) }),
        }
    }
}

#[derive(Clone)]
pub struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) matcher: Matcher,
    pub(crate) handler: Handler,
    pub(crate) priority: i32,
    pub(crate) timeout: Duration,
}

impl Subscription {
    #[must_use]
    pub fn new(id: SubscriptionId, matcher: Matcher, handler: Handler, priority: i32, timeout: Duration) -> Self {
        Self {
            id,
            matcher,
            handler,
            priority,
            timeout,
        }
    }
}
