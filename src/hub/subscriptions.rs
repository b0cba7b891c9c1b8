//! Topic membership bookkeeping

use crate::types::{Identity, Topic};
use std::collections::{HashMap, HashSet};

/// Maps each topic to the set of identities interested in it. Membership is
/// at-most-once: subscribing twice and unsubscribing twice are both no-ops.
#[derive(Default)]
pub struct SubscriptionIndex {
    topics: HashMap<Topic, HashSet<Identity>>,
}

impl SubscriptionIndex {
    pub fn subscribe(&mut self, identity: &str, topic: Topic) {
        self.topics
            .entry(topic)
            .or_default()
            .insert(identity.to_owned());
    }

    /// Remove `identity` from `topic`. A topic left without subscribers is
    /// dropped from the index entirely.
    pub fn unsubscribe(&mut self, identity: &str, topic: &Topic) {
        if let Some(members) = self.topics.get_mut(topic) {
            members.remove(identity);
            if members.is_empty() {
                self.topics.remove(topic);
            }
        }
    }

    /// Current subscriber set for `topic`; empty for unknown topics so
    /// broadcast loops never special-case absence.
    pub fn subscribers_of(&self, topic: &Topic) -> HashSet<Identity> {
        self.topics.get(topic).cloned().unwrap_or_default()
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics.get(topic).map_or(0, HashSet::len)
    }

    /// Remove `identity` from every topic; used on connection teardown.
    pub fn purge(&mut self, identity: &str) {
        self.topics.retain(|_, members| {
            members.remove(identity);
            !members.is_empty()
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Topic, &HashSet<Identity>)> {
        self.topics.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc() -> Topic {
        Topic::Symbol("BTC".to_string())
    }

    fn eth() -> Topic {
        Topic::Symbol("ETH".to_string())
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut index = SubscriptionIndex::default();
        index.subscribe("u1", btc());
        index.subscribe("u1", btc());

        assert_eq!(index.subscriber_count(&btc()), 1);
    }

    #[test]
    fn test_unsubscribe_prunes_empty_topics() {
        let mut index = SubscriptionIndex::default();
        index.subscribe("u1", btc());
        index.unsubscribe("u1", &btc());

        assert_eq!(index.subscriber_count(&btc()), 0);
        // entry removed, not retained empty
        assert_eq!(index.iter().count(), 0);
    }

    #[test]
    fn test_unsubscribe_unknown_topic_is_noop() {
        let mut index = SubscriptionIndex::default();
        index.unsubscribe("u1", &btc());
        assert_eq!(index.iter().count(), 0);
    }

    #[test]
    fn test_subscribers_of_unknown_topic_is_empty_set() {
        let index = SubscriptionIndex::default();
        assert!(index.subscribers_of(&btc()).is_empty());
    }

    #[test]
    fn test_purge_removes_identity_everywhere() {
        let mut index = SubscriptionIndex::default();
        index.subscribe("u1", btc());
        index.subscribe("u1", eth());
        index.subscribe("u2", eth());
        index.subscribe("u1", Topic::Portfolio);

        index.purge("u1");

        assert!(!index.subscribers_of(&btc()).contains("u1"));
        assert!(!index.subscribers_of(&eth()).contains("u1"));
        assert_eq!(index.subscriber_count(&Topic::Portfolio), 0);
        // ETH keeps its other subscriber, BTC and portfolio are pruned
        assert_eq!(index.iter().count(), 1);
        assert!(index.subscribers_of(&eth()).contains("u2"));
    }

    #[test]
    fn test_net_membership_is_order_independent() {
        let mut index = SubscriptionIndex::default();
        index.subscribe("u1", btc());
        index.subscribe("u1", eth());
        index.unsubscribe("u1", &btc());
        index.subscribe("u1", btc());
        index.unsubscribe("u1", &eth());

        assert!(index.subscribers_of(&btc()).contains("u1"));
        assert!(index.subscribers_of(&eth()).is_empty());
    }
}
