//! The event bus (§4.1): exact, prefix and regex subscriptions, priority
//! ordering, per-handler timeouts, cooperative cancellation and exception
//! isolation.
//!
//! The bus is deliberately agnostic to what an event's `data` payload looks
//! like — typing that payload into `MessageEvent`/`NoticeEvent`/… variants is
//! `ncatbot-events`'s job. What the bus owns is the *dispatch contract*:
//! collection, ordering, timeouts, isolation.

use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    tracing::{debug, error, warn},
    uuid::Uuid,
};

mod matcher;
mod subscription;

pub use matcher::Matcher;
pub use subscription::{Handler, HandlerFn, Subscription, SubscriptionId, SyncHandlerFn};

/// Default per-handler timeout (§4.1), matching the upstream `EventBus`'s
/// 120-second default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// An exception captured from a handler, or a recorded timeout (§3, §7).
/// Dispatch never propagates this out of `publish` — it is collected here.
#[derive(Debug, Clone)]
pub enum HandlerException {
    /// The handler's per-subscription timeout elapsed before it completed.
    Timeout {
        handler: String,
        owner: Option<String>,
        limit: Duration,
    },
    /// The handler returned an error.
    Failed {
        handler: String,
        message: String,
    },
}

impl std::fmt::Display for HandlerException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { handler, owner, limit } => write!(
                f,
                "handler {handler} (owner={}) timed out after {limit:?}",
                owner.as_deref().unwrap_or("unknown")
            ),
            Self::Failed { handler, message } => write!(f, "handler {handler} failed: {message}"),
        }
    }
}

/// The event value object (§3). `data` is an opaque JSON payload; typed
/// access belongs one layer up in `ncatbot-events`. `results`/`exceptions`/
/// `propagation_stopped` are the bus's mutable collaboration fields.
pub struct Event {
    pub event_type: String,
    pub data: serde_json::Value,
    pub results: Vec<serde_json::Value>,
    pub exceptions: Vec<HandlerException>,
    pub propagation_stopped: bool,
    api: Option<Arc<dyn Any + Send + Sync>>,
}

impl Event {
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            results: Vec::new(),
            exceptions: Vec::new(),
            propagation_stopped: false,
            api: None,
        }
    }

    /// Bind an API handle onto the event after parsing and before publish
    /// (§4.2, §9 "per-event bound API handle"), so helper methods such as
    /// `reply` work without the plugin author threading an API reference
    /// through every handler signature.
    pub fn bind_api<T: Send + Sync + 'static>(&mut self, api: Arc<T>) {
        self.api = Some(api);
    }

    /// Recover the bound API handle, downcast to its concrete type.
    #[must_use]
    pub fn api<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.api.clone()?.downcast::<T>().ok()
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }
}

struct OwnerMeta {
    owner: Option<String>,
}

/// The event bus itself. Single-threaded cooperative dispatch core: the
/// subscription tables are mutated only from `subscribe`/`unsubscribe`,
/// which run on the same cooperative context as `publish` (§5) — a
/// `std::sync::Mutex` is enough, never held across an `.await`.
pub struct EventBus {
    exact: Mutex<HashMap<String, Vec<Subscription>>>,
    regex: Mutex<Vec<Subscription>>,
    owners: Mutex<HashMap<SubscriptionId, OwnerMeta>>,
    default_timeout: Duration,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl EventBus {
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            exact: Mutex::new(HashMap::new()),
            regex: Mutex::new(Vec::new()),
            owners: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Subscribe a handler to `type_expr` (§4.1). A `re:`-prefixed expression
    /// is compiled as a regex (and rejected at subscribe time, not dispatch
    /// time, if invalid); anything else is an exact/prefix matcher.
    pub fn subscribe(
        &self,
        type_expr: &str,
        handler: Handler,
        priority: i32,
        timeout: Option<Duration>,
        owner: Option<String>,
    ) -> ncatbot_common::Result<SubscriptionId> {
        let id = SubscriptionId(Uuid::new_v4());
        let timeout = timeout.unwrap_or(self.default_timeout);

        let sub = if let Some(pattern) = type_expr.strip_prefix("re:") {
            let matcher = Matcher::regex(pattern)?;
            Subscription::new(id, matcher, handler, priority, timeout)
        } else {
            Subscription::new(id, Matcher::Exact(type_expr.to_string()), handler, priority, timeout)
        };

        self.owners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, OwnerMeta { owner });

        match &sub.matcher {
            Matcher::Exact(t) => {
                let mut exact = self.exact.lock().unwrap_or_else(|p| p.into_inner());
                let bucket = exact.entry(t.clone()).or_default();
                bucket.push(sub);
                bucket.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.handler.name().cmp(b.handler.name())));
            },
            Matcher::Regex(_) => {
                let mut regex = self.regex.lock().unwrap_or_else(|p| p.into_inner());
                regex.push(sub);
                regex.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.handler.name().cmp(b.handler.name())));
            },
        }

        Ok(id)
    }

    /// Remove a subscription from every bucket. Idempotent (§4.1).
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;

        self.owners.lock().unwrap_or_else(|p| p.into_inner()).remove(&id);

        let mut exact = self.exact.lock().unwrap_or_else(|p| p.into_inner());
        for bucket in exact.values_mut() {
            let before = bucket.len();
            bucket.retain(|s| s.id != id);
            removed |= bucket.len() != before;
        }
        exact.retain(|_, bucket| !bucket.is_empty());
        drop(exact);

        let mut regex = self.regex.lock().unwrap_or_else(|p| p.into_inner());
        let before = regex.len();
        regex.retain(|s| s.id != id);
        removed |= regex.len() != before;

        removed
    }

    /// Collect the dispatch set for `event_type`: exact match, every strict
    /// dotted prefix, and every matching regex (§4.1), merged and sorted by
    /// (descending priority, ascending handler name), stable on ties.
    fn collect(&self, event_type: &str) -> Vec<Subscription> {
        let exact = self.exact.lock().unwrap_or_else(|p| p.into_inner());
        let regex = self.regex.lock().unwrap_or_else(|p| p.into_inner());

        let mut set: Vec<Subscription> = exact.get(event_type).cloned().unwrap_or_default();

        let parts: Vec<&str> = event_type.split('.').collect();
        for i in (1..parts.len()).rev() {
            let prefix = parts[..i].join(".");
            if let Some(bucket) = exact.get(&prefix) {
                set.extend(bucket.iter().cloned());
            }
        }

        for sub in regex.iter() {
            if sub.matcher.matches(event_type) {
                set.push(sub.clone());
            }
        }

        set.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.handler.name().cmp(b.handler.name())));
        set
    }

    /// Publish `event`, running every matching handler sequentially in
    /// priority order (§4.1, §5). Returns the successful results, in handler
    /// order; failures and timeouts land on `event.exceptions` instead.
    pub async fn publish(&self, event: &mut Event) -> Vec<serde_json::Value> {
        let handlers = self.collect(&event.event_type);
        debug!(event_type = %event.event_type, candidates = handlers.len(), "dispatching event");

        for sub in handlers {
            if event.propagation_stopped {
                break;
            }

            let owner = self
                .owners
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .get(&sub.id)
                .and_then(|m| m.owner.clone());

            match tokio::time::timeout(sub.timeout, sub.handler.call(event)).await {
                Ok(Ok(value)) => event.results.push(value),
                Ok(Err(e)) => {
                    error!(handler = sub.handler.name(), error = %e, "handler failed");
                    event.exceptions.push(HandlerException::Failed {
                        handler: sub.handler.name().to_string(),
                        message: e.to_string(),
                    });
                },
                Err(_elapsed) => {
                    warn!(handler = sub.handler.name(), timeout = ?sub.timeout, "handler timed out");
                    event.exceptions.push(HandlerException::Timeout {
                        handler: sub.handler.name().to_string(),
                        owner,
                        limit: sub.timeout,
                    });
                },
            }
        }

        event.results.clone()
    }

    /// Clear all subscriptions and owner metadata (§4.1).
    pub fn shutdown(&self) {
        self.exact.lock().unwrap_or_else(|p| p.into_inner()).clear();
        self.regex.lock().unwrap_or_else(|p| p.into_inner()).clear();
        self.owners.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    /// Number of currently-registered subscriptions (used by tests and by
    /// the plugin loader's reload-idempotence checks, §8).
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        let exact: usize = self
            .exact
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .map(Vec::len)
            .sum();
        let regex = self.regex.lock().unwrap_or_else(|p| p.into_inner()).len();
        exact + regex
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn named_async_handler(
        name: &'static str,
        f: impl Fn(&mut Event) -> ncatbot_common::Result<serde_json::Value> + Send + Sync + 'static,
    ) -> Handler {
        Handler::from_async(name, move |event| {
            let result = f(event);
            Box::pin(async move { result })
        })
    }

    #[tokio::test]
    async fn priority_ordering_runs_highest_first() {
        let bus = EventBus::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (name, priority) in [("low", 1), ("high", 100), ("mid", 50)] {
            let order = order.clone();
            bus.subscribe(
                "ncatbot.message_event",
                named_async_handler(name, move |_event| {
                    order.lock().unwrap().push(name);
                    Ok(serde_json::Value::Null)
                }),
                priority,
                None,
                None,
            )
            .unwrap();
        }

        let mut event = Event::new("ncatbot.message_event", serde_json::json!({}));
        bus.publish(&mut event).await;

        assert_eq!(*order.lock().unwrap(), vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn prefix_subscription_fires_on_descendant_types() {
        let bus = EventBus::default();
        let hit = Arc::new(AtomicUsize::new(0));
        let hit2 = hit.clone();
        bus.subscribe(
            "ncatbot.notice_event",
            named_async_handler("prefix", move |_e| {
                hit2.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::Value::Null)
            }),
            0,
            None,
            None,
        )
        .unwrap();

        let mut direct = Event::new("ncatbot.notice_event", serde_json::json!({}));
        bus.publish(&mut direct).await;
        let mut nested = Event::new("ncatbot.notice_event.group_increase", serde_json::json!({}));
        bus.publish(&mut nested).await;
        let mut unrelated = Event::new("ncatbot.request_event", serde_json::json!({}));
        bus.publish(&mut unrelated).await;

        assert_eq!(hit.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn regex_subscription_matches_by_pattern() {
        let bus = EventBus::default();
        bus.subscribe(
            "re:ncatbot\\..*",
            named_async_handler("regex", |_e| Ok(serde_json::json!("ok"))),
            0,
            None,
            None,
        )
        .unwrap();

        let mut event = Event::new("ncatbot.notice_event", serde_json::json!({}));
        let results = bus.publish(&mut event).await;
        assert_eq!(results, vec![serde_json::json!("ok")]);
    }

    #[tokio::test]
    async fn isolation_one_handler_failing_does_not_stop_another() {
        let bus = EventBus::default();
        bus.subscribe(
            "ncatbot.message_event",
            named_async_handler("boom", |_e| Err(ncatbot_common::Error::message("kaboom"))),
            100,
            None,
            None,
        )
        .unwrap();
        bus.subscribe(
            "ncatbot.message_event",
            named_async_handler("fine", |_e| Ok(serde_json::json!("ok"))),
            1,
            None,
            None,
        )
        .unwrap();

        let mut event = Event::new("ncatbot.message_event", serde_json::json!({}));
        bus.publish(&mut event).await;

        assert_eq!(event.results, vec![serde_json::json!("ok")]);
        assert_eq!(event.exceptions.len(), 1);
        assert!(matches!(event.exceptions[0], HandlerException::Failed { .. }));
    }

    #[tokio::test]
    async fn handler_timeout_is_recorded_and_dispatch_continues() {
        let bus = EventBus::default();
        bus.subscribe(
            "ncatbot.message_event",
            Handler::from_async("slow", |_event| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(serde_json::Value::Null)
                })
            }),
            50,
            Some(Duration::from_millis(5)),
            Some("slow-owner".to_string()),
        )
        .unwrap();
        bus.subscribe(
            "ncatbot.message_event",
            named_async_handler("after", |_e| Ok(serde_json::json!("ran"))),
            1,
            None,
            None,
        )
        .unwrap();

        let mut event = Event::new("ncatbot.message_event", serde_json::json!({}));
        bus.publish(&mut event).await;

        assert_eq!(event.results, vec![serde_json::json!("ran")]);
        assert_eq!(event.exceptions.len(), 1);
        match &event.exceptions[0] {
            HandlerException::Timeout { owner, .. } => assert_eq!(owner.as_deref(), Some("slow-owner")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn propagation_stopped_skips_lower_priority_handlers() {
        let bus = EventBus::default();
        bus.subscribe(
            "ncatbot.message_event",
            Handler::from_async("stopper", |event| {
                Box::pin(async move {
                    event.stop_propagation();
                    Ok(serde_json::json!("first"))
                })
            }),
            100,
            None,
            None,
        )
        .unwrap();
        bus.subscribe(
            "ncatbot.message_event",
            named_async_handler("never", |_e| Ok(serde_json::json!("second"))),
            1,
            None,
            None,
        )
        .unwrap();

        let mut event = Event::new("ncatbot.message_event", serde_json::json!({}));
        let results = bus.publish(&mut event).await;
        assert_eq!(results, vec![serde_json::json!("first")]);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_removes_handler() {
        let bus = EventBus::default();
        let hit = Arc::new(AtomicUsize::new(0));
        let hit2 = hit.clone();
        let id = bus
            .subscribe(
                "ncatbot.message_event",
                named_async_handler("counted", move |_e| {
                    hit2.fetch_add(1, Ordering::SeqCst);
                    Ok(serde_json::Value::Null)
                }),
                0,
                None,
                None,
            )
            .unwrap();

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id), "unsubscribe must be idempotent");

        let mut event = Event::new("ncatbot.message_event", serde_json::json!({}));
        bus.publish(&mut event).await;
        assert_eq!(hit.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscribe_rejects_invalid_regex_at_subscribe_time() {
        let bus = EventBus::default();
        let err = bus.subscribe(
            "re:(unclosed",
            named_async_handler("never-runs", |_e| Ok(serde_json::Value::Null)),
            0,
            None,
            None,
        );
        assert!(err.is_err());
    }

    #[test]
    fn subscription_ids_are_unique() {
        let bus = EventBus::default();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..50 {
            let id = bus
                .subscribe(
                    "ncatbot.message_event",
                    named_async_handler("h", |_e| Ok(serde_json::Value::Null)),
                    0,
                    None,
                    None,
                )
                .unwrap();
            assert!(ids.insert(id));
        }
    }
}
