//! Topic matching: an optional string tag narrowing delivery beyond the
//! payload type.
//!
//! A registration that declares no topic accepts only events published
//! without a topic. A registration that declares a topic requires the
//! event to carry a topic accepted by the registration's [`TopicFilter`].

use std::sync::Arc;

/// Pure predicate matching a published topic against a declared topic.
pub trait TopicFilter: Send + Sync + 'static {
    fn accepts(&self, declared: &str, event_topic: &str) -> bool;
}

/// Default topic filter: plain string equality.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactTopicFilter;

impl TopicFilter for ExactTopicFilter {
    fn accepts(&self, declared: &str, event_topic: &str) -> bool {
        declared == event_topic
    }
}

/// A declared topic paired with the filter that interprets it.
#[derive(Clone)]
pub(crate) struct TopicSpec {
    declared: Arc<str>,
    filter: Arc<dyn TopicFilter>,
}

impl TopicSpec {
    pub(crate) fn exact(declared: &str) -> Self {
        Self::with_filter(declared, ExactTopicFilter)
    }

    pub(crate) fn with_filter(declared: &str, filter: impl TopicFilter) -> Self {
        Self {
            declared: Arc::from(declared),
            filter: Arc::new(filter),
        }
    }

    pub(crate) fn declared(&self) -> &str {
        &self.declared
    }

    pub(crate) fn matches(&self, event_topic: Option<&str>) -> bool {
        match event_topic {
            Some(topic) => self.filter.accepts(&self.declared, topic),
            None => false,
        }
    }
}

/// Does an (optional) declared topic accept an (optional) event topic?
///
/// `None` on the registration side is the "no topic" sentinel: it accepts
/// exactly the events that carry no topic.
pub(crate) fn topic_accepts(spec: Option<&TopicSpec>, event_topic: Option<&str>) -> bool {
    match spec {
        None => event_topic.is_none(),
        Some(spec) => spec.matches(event_topic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_filter_requires_string_equality() {
        let spec = TopicSpec::exact("alerts");
        assert!(spec.matches(Some("alerts")));
        assert!(!spec.matches(Some("alerts/disk")));
        assert!(!spec.matches(Some("")));
        assert!(!spec.matches(None));
    }

    #[test]
    fn no_declared_topic_accepts_only_untopiced_events() {
        assert!(topic_accepts(None, None));
        assert!(!topic_accepts(None, Some("alerts")));
        // The empty string is a topic, not the absence of one.
        assert!(!topic_accepts(None, Some("")));
    }

    #[test]
    fn custom_filter_is_consulted() {
        struct PrefixFilter;
        impl TopicFilter for PrefixFilter {
            fn accepts(&self, declared: &str, event_topic: &str) -> bool {
                event_topic.starts_with(declared)
            }
        }

        let spec = TopicSpec::with_filter("alerts", PrefixFilter);
        assert!(spec.matches(Some("alerts/disk")));
        assert!(!spec.matches(Some("audit/disk")));
    }
}
