//! The realtime broadcast hub.
//!
//! Owns the connection registry and the subscription index behind a single
//! writer lock, and exposes the producer-facing push API. Producers never
//! touch the registries directly; connections never touch them outside of
//! their own handshake and teardown.

mod registry;
mod subscriptions;

pub use registry::{ConnectionHandle, DeliveryError, Outbound, OUTBOUND_QUEUE_CAPACITY};

use crate::auth::{AuthError, CredentialVerifier};
use crate::protocol::ServerMessage;
use crate::types::{HubStats, Identity, Topic, TopicSubscribers};
use chrono::Utc;
use registry::ConnectionRegistry;
use std::collections::HashSet;
use std::sync::Arc;
use subscriptions::SubscriptionIndex;
use tokio::sync::RwLock;

#[derive(Default)]
struct HubState {
    registry: ConnectionRegistry,
    index: SubscriptionIndex,
}

pub struct Hub {
    state: RwLock<HubState>,
    verifier: Arc<dyn CredentialVerifier>,
}

impl Hub {
    pub fn new(verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            verifier,
        }
    }

    /// Resolve a credential and bind the connection to the resolved identity.
    /// A previous live connection for the same identity is superseded and
    /// explicitly closed.
    ///
    /// The verifier runs before the lock is taken; the connection stays
    /// unauthenticated while the lookup is in flight.
    pub async fn authenticate(
        &self,
        credential: &str,
        handle: ConnectionHandle,
    ) -> Result<Identity, AuthError> {
        let identity = self.verifier.verify(credential).await?;

        let superseded = {
            let mut state = self.state.write().await;
            state.registry.register(identity.clone(), handle)
        };
        if let Some(old) = superseded {
            tracing::info!(identity = %identity, "superseding previous connection");
            old.close();
        }

        Ok(identity)
    }

    /// Tear down a connection's bookkeeping. Only acts if the registry still
    /// points at `conn_id`; a superseded socket closing late is a no-op and
    /// leaves its successor's subscriptions alone. Safe to call repeatedly.
    pub async fn disconnect(&self, identity: &str, conn_id: &str) {
        let mut state = self.state.write().await;
        if state.registry.unregister(identity, conn_id) {
            state.index.purge(identity);
            tracing::info!(identity, "disconnected");
        }
    }

    /// The live connection for `identity`, if any
    pub async fn lookup(&self, identity: &str) -> Option<ConnectionHandle> {
        self.state.read().await.registry.lookup(identity).cloned()
    }

    pub async fn subscribe(&self, identity: &str, topic: Topic) {
        self.state.write().await.index.subscribe(identity, topic);
    }

    pub async fn unsubscribe(&self, identity: &str, topic: &Topic) {
        self.state.write().await.index.unsubscribe(identity, topic);
    }

    pub async fn subscribers_of(&self, topic: &Topic) -> HashSet<Identity> {
        self.state.read().await.index.subscribers_of(topic)
    }

    pub async fn has_subscribers(&self, symbol: &str) -> bool {
        self.state
            .read()
            .await
            .index
            .subscriber_count(&Topic::Symbol(symbol.to_owned()))
            > 0
    }

    pub async fn portfolio_subscribers(&self) -> Vec<Identity> {
        self.state
            .read()
            .await
            .index
            .subscribers_of(&Topic::Portfolio)
            .into_iter()
            .collect()
    }

    /// Deliver a topic update to every subscribed identity with a live
    /// connection. Identities without one are silently skipped; recipients
    /// whose channel is gone are torn down without aborting the fan-out.
    /// Returns how many recipients the update was queued for.
    pub async fn push_to_topic(&self, symbol: &str, data: serde_json::Value) -> usize {
        let topic = Topic::Symbol(symbol.to_owned());
        let timestamp = Utc::now().timestamp_millis();

        let mut state = self.state.write().await;
        let subscribers = state.index.subscribers_of(&topic);

        let mut delivered = 0;
        let mut failed = Vec::new();
        for identity in subscribers {
            let Some(handle) = state.registry.lookup(&identity) else {
                continue;
            };
            let message = ServerMessage::TopicUpdate {
                topic: symbol.to_owned(),
                data: data.clone(),
                timestamp,
            };
            match handle.send(message) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::QueueFull) => {
                    tracing::debug!(identity = %identity, topic = %symbol, "outbound queue full, dropping update");
                }
                Err(DeliveryError::Closed) => {
                    failed.push((identity.clone(), handle.conn_id().to_owned()));
                }
            }
        }
        Self::teardown_failed(&mut state, failed);

        delivered
    }

    /// Deliver a signal to every connection currently in the registry,
    /// regardless of topic subscriptions.
    pub async fn push_global(&self, data: serde_json::Value) -> usize {
        let timestamp = Utc::now().timestamp_millis();

        let mut state = self.state.write().await;
        let mut delivered = 0;
        let mut failed = Vec::new();
        for (identity, handle) in state.registry.iter() {
            let message = ServerMessage::SignalBroadcast {
                data: data.clone(),
                timestamp,
            };
            match handle.send(message) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::QueueFull) => {
                    tracing::debug!(identity = %identity, "outbound queue full, dropping signal");
                }
                Err(DeliveryError::Closed) => {
                    failed.push((identity.clone(), handle.conn_id().to_owned()));
                }
            }
        }
        Self::teardown_failed(&mut state, failed);

        delivered
    }

    /// Deliver identity-scoped data (portfolio valuations) to one identity's
    /// live connection; silently skipped if there is none.
    pub async fn push_to_identity(&self, identity: &str, data: serde_json::Value) -> bool {
        let timestamp = Utc::now().timestamp_millis();

        let mut state = self.state.write().await;
        let result = match state.registry.lookup(identity) {
            Some(handle) => {
                let message = ServerMessage::IdentityUpdate { data, timestamp };
                handle
                    .send(message)
                    .map_err(|e| (e, handle.conn_id().to_owned()))
            }
            None => return false,
        };

        match result {
            Ok(()) => true,
            Err((DeliveryError::QueueFull, _)) => {
                tracing::debug!(identity, "outbound queue full, dropping identity update");
                false
            }
            Err((DeliveryError::Closed, conn_id)) => {
                Self::teardown_failed(&mut state, vec![(identity.to_owned(), conn_id)]);
                false
            }
        }
    }

    /// Stats snapshot for the introspection endpoints
    pub async fn stats(&self) -> HubStats {
        let state = self.state.read().await;

        let mut price_subscriptions: Vec<TopicSubscribers> = state
            .index
            .iter()
            .filter_map(|(topic, members)| match topic {
                Topic::Symbol(symbol) => Some(TopicSubscribers {
                    symbol: symbol.clone(),
                    subscribers: members.len(),
                }),
                Topic::Portfolio => None,
            })
            .collect();
        price_subscriptions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        HubStats {
            total_connections: state.registry.len(),
            price_subscriptions,
            portfolio_subscriptions: state.index.subscriber_count(&Topic::Portfolio),
        }
    }

    fn teardown_failed(state: &mut HubState, failed: Vec<(Identity, String)>) {
        for (identity, conn_id) in failed {
            tracing::warn!(identity = %identity, "delivery failed, tearing down connection");
            if state.registry.unregister(&identity, &conn_id) {
                state.index.purge(&identity);
            }
        }
    }
}
