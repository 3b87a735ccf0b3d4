//! Subscription registry
//!
//! Ordered set of (source, identifier) interests. Either field may be the
//! reserved wildcard. At most one entry exists per pair; incoming events
//! are matched in registration order and only the first match is invoked.

use crate::options::MessageCallback;
use mbus_core::{METHOD_EVENT_IDENTIFIER_ALL, METHOD_EVENT_SOURCE_ALL};

/// A registered interest in events from `source` named `identifier`
pub struct Subscription {
    source: String,
    identifier: String,
    callback: Option<MessageCallback>,
}

impl Subscription {
    pub(crate) fn new(source: String, identifier: String, callback: Option<MessageCallback>) -> Self {
        Self {
            source,
            identifier,
            callback,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub(crate) fn callback_mut(&mut self) -> Option<&mut MessageCallback> {
        self.callback.as_mut()
    }

    fn matches(&self, source: &str, identifier: &str) -> bool {
        (self.source == METHOD_EVENT_SOURCE_ALL || self.source == source)
            && (self.identifier == METHOD_EVENT_IDENTIFIER_ALL || self.identifier == identifier)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("source", &self.source)
            .field("identifier", &self.identifier)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Ordered registry enforcing the one-entry-per-pair invariant
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    entries: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn contains(&self, source: &str, identifier: &str) -> bool {
        self.entries
            .iter()
            .any(|s| s.source == source && s.identifier == identifier)
    }

    /// Insert in registration order; a duplicate pair is rejected
    pub fn insert(&mut self, subscription: Subscription) -> bool {
        if self.contains(subscription.source(), subscription.identifier()) {
            return false;
        }
        self.entries.push(subscription);
        true
    }

    pub fn remove(&mut self, source: &str, identifier: &str) -> Option<Subscription> {
        let index = self
            .entries
            .iter()
            .position(|s| s.source == source && s.identifier == identifier)?;
        Some(self.entries.remove(index))
    }

    /// First entry matching the event, in registration order
    pub fn find_match(&mut self, source: &str, identifier: &str) -> Option<&mut Subscription> {
        self.entries.iter_mut().find(|s| s.matches(source, identifier))
    }

    pub fn drain(&mut self) -> Vec<Subscription> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(source: &str, identifier: &str) -> Subscription {
        Subscription::new(source.to_string(), identifier.to_string(), None)
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let mut registry = SubscriptionRegistry::default();
        assert!(registry.insert(subscription("a", "e")));
        assert!(!registry.insert(subscription("a", "e")));
        assert!(registry.insert(subscription("b", "e")));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_wildcard_source_matches() {
        let mut registry = SubscriptionRegistry::default();
        registry.insert(subscription(METHOD_EVENT_SOURCE_ALL, "e"));
        assert!(registry.find_match("anyone", "e").is_some());
        assert!(registry.find_match("anyone", "other").is_none());
    }

    #[test]
    fn test_wildcard_identifier_matches() {
        let mut registry = SubscriptionRegistry::default();
        registry.insert(subscription("peer", METHOD_EVENT_IDENTIFIER_ALL));
        assert!(registry.find_match("peer", "whatever").is_some());
        assert!(registry.find_match("stranger", "whatever").is_none());
    }

    #[test]
    fn test_first_match_wins_in_registration_order() {
        let mut registry = SubscriptionRegistry::default();
        registry.insert(subscription("peer", "e"));
        registry.insert(subscription(METHOD_EVENT_SOURCE_ALL, "e"));

        let matched = registry.find_match("peer", "e").unwrap();
        assert_eq!(matched.source(), "peer");
    }

    #[test]
    fn test_remove_is_literal_not_matched() {
        let mut registry = SubscriptionRegistry::default();
        registry.insert(subscription(METHOD_EVENT_SOURCE_ALL, "e"));
        assert!(registry.remove("peer", "e").is_none());
        assert!(registry.remove(METHOD_EVENT_SOURCE_ALL, "e").is_some());
        assert_eq!(registry.len(), 0);
    }
}
