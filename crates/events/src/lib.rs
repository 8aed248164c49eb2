//! Typed event model and dispatch for gateway payloads (§3, §4.2).
//!
//! `ncatbot-eventbus` owns the generic publish/subscribe mechanics; this
//! crate is the layer that knows what a gateway payload actually *is* — the
//! `(post_type, sub_key)` lookup table, ID normalization, and the canonical
//! event-type naming used on publish.

mod dispatcher;
mod kind;
pub mod parser;
mod reply;

pub use dispatcher::EventDispatcher;
pub use kind::EventKind;
pub use reply::EventReplyExt;

pub use ncatbot_eventbus::{Event, EventBus, HandlerException, SubscriptionId};
