//! Subscription matchers: exact/dotted-prefix string match, or a `re:`
//! compiled regex (§4.1).

use regex::Regex;

#[derive(Clone)]
pub enum Matcher {
    Exact(String),
    Regex(Regex),
}

impl Matcher {
    pub fn regex(pattern: &str) -> ncatbot_common::Result<Self> {
        Regex::new(pattern)
            .map(Matcher::Regex)
            .map_err(|e| ncatbot_common::Error::message(format!("invalid regex `{pattern}`: {e}")))
    }

    #[must_use]
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::Exact(s) => s == event_type,
            Self::Regex(re) => re.is_match(event_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_matches_only_identical_type() {
        let m = Matcher::Exact("ncatbot.message_event".to_string());
        assert!(m.matches("ncatbot.message_event"));
        assert!(!m.matches("ncatbot.message_event.group"));
    }

    #[test]
    fn regex_matches_by_pattern() {
        let m = Matcher::regex("^ncatbot\\.notice_event").unwrap();
        assert!(m.matches("ncatbot.notice_event.group_increase"));
        assert!(!m.matches("ncatbot.request_event"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(Matcher::regex("(unterminated").is_err());
    }
}
