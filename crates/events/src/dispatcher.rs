//! Binds parsed events onto the bus (§4.2, data flow in §2: `router.decode →
//! dispatcher.dispatch(payload) → parser.parse(payload) → event.bind(api) →
//! bus.publish(event)`).

use std::sync::Arc;

use ncatbot_eventbus::{Event, EventBus};
use serde_json::Value;

use crate::kind::EventKind;

/// Generic over the bound API type so `ncatbot-events` never needs to know
/// about `ncatbot-api`'s concrete facade (that dependency would be circular
/// — the facade itself publishes through this dispatcher).
pub struct EventDispatcher<A> {
    bus: Arc<EventBus>,
    api: Arc<A>,
}

impl<A: Send + Sync + 'static> EventDispatcher<A> {
    #[must_use]
    pub fn new(bus: Arc<EventBus>, api: Arc<A>) -> Self {
        Self { bus, api }
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Parse and publish one raw gateway event payload. Returns the
    /// `(kind, results)` pair on success, or `None` if the payload didn't
    /// parse (already logged by [`crate::parser::parse`]).
    pub async fn dispatch(&self, payload: Value) -> Option<(EventKind, Vec<Value>)> {
        let parsed = crate::parser::parse(payload)?;
        let mut event = Event::new(parsed.event_type, parsed.data);
        event.bind_api(self.api.clone());
        let results = self.bus.publish(&mut event).await;
        Some((parsed.kind, results))
    }

    /// Publish the `ncatbot.plugin_load` lifecycle event (§6).
    pub async fn publish_plugin_load(&self, plugin_name: &str) {
        self.publish_lifecycle(ncatbot_protocol::event_types::PLUGIN_LOAD, plugin_name).await;
    }

    /// Publish the `ncatbot.plugin_unload` lifecycle event (§6).
    pub async fn publish_plugin_unload(&self, plugin_name: &str) {
        self.publish_lifecycle(ncatbot_protocol::event_types::PLUGIN_UNLOAD, plugin_name).await;
    }

    async fn publish_lifecycle(&self, event_type: &str, plugin_name: &str) {
        let mut event = Event::new(event_type, serde_json::json!({ "plugin": plugin_name }));
        event.bind_api(self.api.clone());
        self.bus.publish(&mut event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncatbot_eventbus::Handler;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn dispatch_publishes_under_canonical_type() {
        let bus = Arc::new(EventBus::default());
        let seen = Arc::new(AtomicBool::new(false));
        let seen2 = seen.clone();
        bus.subscribe(
            "ncatbot.message_event",
            Handler::from_async("seen", move |_event| {
                let seen2 = seen2.clone();
                Box::pin(async move {
                    seen2.store(true, Ordering::SeqCst);
                    Ok(serde_json::Value::Null)
                })
            }),
            0,
            None,
            None,
        )
        .unwrap();

        let dispatcher = EventDispatcher::new(bus, Arc::new(()));
        let outcome = dispatcher
            .dispatch(serde_json::json!({
                "post_type": "message",
                "message_type": "private",
                "user_id": 10,
            }))
            .await;

        assert!(outcome.is_some());
        assert!(seen.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unparseable_payload_yields_none() {
        let bus = Arc::new(EventBus::default());
        let dispatcher = EventDispatcher::new(bus, Arc::new(()));
        assert!(dispatcher.dispatch(serde_json::json!({"nothing": "useful"})).await.is_none());
    }
}
