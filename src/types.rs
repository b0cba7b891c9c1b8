use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque ID types for type safety
pub type Identity = String;
pub type ConnectionId = String;

/// A named channel of updates a client can subscribe to: a price feed keyed
/// by instrument symbol, or the per-identity portfolio channel. The global
/// signal channel is implicit and has no subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Symbol(String),
    Portfolio,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Symbol(symbol) => write!(f, "{}", symbol),
            Topic::Portfolio => write!(f, "portfolio"),
        }
    }
}

/// Subscriber count for a single price topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSubscribers {
    pub symbol: String,
    pub subscribers: usize,
}

/// Read-only projection of hub state for the introspection endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubStats {
    pub total_connections: usize,
    pub price_subscriptions: Vec<TopicSubscribers>,
    pub portfolio_subscriptions: usize,
}
