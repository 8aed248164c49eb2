//! The tagged-variant sum of §3: `MessageEvent`, `NoticeEvent`, `RequestEvent`,
//! `MetaEvent`, each with a sub-key discriminator. The payload itself stays
//! raw JSON on the bus `Event` — `EventKind` is the discriminator a handler
//! can match on without re-deriving the `(post_type, sub_key)` rule itself.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    MessagePrivate,
    MessageGroup,
    MessageSentPrivate,
    MessageSentGroup,
    NoticeGroupUpload,
    NoticeGroupAdmin,
    NoticeGroupDecrease,
    NoticeGroupIncrease,
    NoticeGroupBan,
    NoticeFriendAdd,
    NoticeGroupRecall,
    NoticeFriendRecall,
    NoticePoke,
    NoticeLuckyKing,
    NoticeHonor,
    RequestFriend,
    RequestGroup,
    MetaLifecycle,
    MetaHeartbeat,
}

impl EventKind {
    /// Look up the variant for a `(post_type, sub_key)` pair (§4.2's
    /// `table[post_type][sub_key] → constructor`). `None` means the
    /// combination is unregistered — the caller logs and drops (§4.2.3).
    #[must_use]
    pub fn lookup(post_type: &str, sub_key: &str) -> Option<Self> {
        use EventKind::{
            MessageGroup, MessagePrivate, MessageSentGroup, MessageSentPrivate, MetaHeartbeat, MetaLifecycle,
            NoticeFriendAdd, NoticeFriendRecall, NoticeGroupAdmin, NoticeGroupBan, NoticeGroupDecrease,
            NoticeGroupIncrease, NoticeGroupRecall, NoticeGroupUpload, NoticeHonor, NoticeLuckyKing, NoticePoke,
            RequestFriend, RequestGroup,
        };
        Some(match (post_type, sub_key) {
            ("message", "private") => MessagePrivate,
            ("message", "group") => MessageGroup,
            ("message_sent", "private") => MessageSentPrivate,
            ("message_sent", "group") => MessageSentGroup,
            ("request", "friend") => RequestFriend,
            ("request", "group") => RequestGroup,
            ("meta_event", "lifecycle") => MetaLifecycle,
            ("meta_event", "heartbeat") => MetaHeartbeat,
            ("notice", "group_upload") => NoticeGroupUpload,
            ("notice", "group_admin") => NoticeGroupAdmin,
            ("notice", "group_decrease") => NoticeGroupDecrease,
            ("notice", "group_increase") => NoticeGroupIncrease,
            ("notice", "group_ban") => NoticeGroupBan,
            ("notice", "friend_add") => NoticeFriendAdd,
            ("notice", "group_recall") => NoticeGroupRecall,
            ("notice", "friend_recall") => NoticeFriendRecall,
            ("notice", "poke") => NoticePoke,
            ("notice", "lucky_king") => NoticeLuckyKing,
            ("notice", "honor") => NoticeHonor,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_subtypes_resolve() {
        assert_eq!(EventKind::lookup("notice", "poke"), Some(EventKind::NoticePoke));
        assert_eq!(EventKind::lookup("notice", "lucky_king"), Some(EventKind::NoticeLuckyKing));
    }

    #[test]
    fn unregistered_combination_is_none() {
        assert_eq!(EventKind::lookup("message", "channel"), None);
        assert_eq!(EventKind::lookup("unknown", "whatever"), None);
    }
}
