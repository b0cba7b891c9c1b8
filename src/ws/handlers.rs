//! WebSocket message dispatch
//!
//! The per-connection protocol state machine: authentication gates the
//! subscription operations, and every request a client sends is answered on
//! its own connection.

use crate::auth::AuthError;
use crate::hub::Hub;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::types::{Identity, Topic};
use chrono::Utc;
use std::sync::Arc;

use super::Session;

/// Macro to check authentication and reply with an error if absent
macro_rules! require_identity {
    ($session:expr) => {
        match $session.identity() {
            Some(identity) => identity.clone(),
            None => {
                return Some(ServerMessage::Error {
                    message: "Not authenticated".to_string(),
                })
            }
        }
    };
}

/// Handle one client message and return the reply, if any
pub async fn handle_message(
    msg: ClientMessage,
    session: &mut Session,
    hub: &Arc<Hub>,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Auth { credential } => handle_auth(session, hub, credential).await,

        ClientMessage::SubscribeTopic { topics } => {
            let identity = require_identity!(session);
            for symbol in &topics {
                hub.subscribe(&identity, Topic::Symbol(symbol.clone())).await;
            }
            tracing::debug!(identity = %identity, ?topics, "subscribed to topics");
            Some(ServerMessage::SubscribeTopicSuccess { topics })
        }

        // an unauthenticated unsubscribe has nothing to undo
        ClientMessage::UnsubscribeTopic { topics } => {
            let identity = session.identity()?.clone();
            for symbol in &topics {
                hub.unsubscribe(&identity, &Topic::Symbol(symbol.clone()))
                    .await;
            }
            Some(ServerMessage::UnsubscribeTopicSuccess { topics })
        }

        ClientMessage::SubscribePortfolio {} => {
            let identity = require_identity!(session);
            hub.subscribe(&identity, Topic::Portfolio).await;
            tracing::debug!(identity = %identity, "subscribed to portfolio updates");
            Some(ServerMessage::SubscribePortfolioSuccess {})
        }

        ClientMessage::UnsubscribePortfolio {} => {
            let identity = session.identity()?.clone();
            hub.unsubscribe(&identity, &Topic::Portfolio).await;
            Some(ServerMessage::UnsubscribePortfolioSuccess {})
        }

        ClientMessage::Ping {} => Some(ServerMessage::Pong {
            timestamp: Utc::now().timestamp_millis(),
        }),
    }
}

async fn handle_auth(
    session: &mut Session,
    hub: &Arc<Hub>,
    credential: String,
) -> Option<ServerMessage> {
    if credential.is_empty() {
        return Some(ServerMessage::AuthError {
            message: AuthError::MissingCredential.to_string(),
        });
    }

    let result = hub.authenticate(&credential, session.handle()).await;
    Some(finish_auth(result, session, hub).await)
}

/// Apply the outcome of a credential verification to the session and build
/// the reply. Shared between the inline dispatch above and the socket loop,
/// where verification runs as a pending future.
pub async fn finish_auth(
    result: Result<Identity, AuthError>,
    session: &mut Session,
    hub: &Arc<Hub>,
) -> ServerMessage {
    match result {
        Ok(identity) => {
            // rebinding to a different identity drops the old binding first
            if let Some(previous) = session.identity().cloned() {
                if previous != identity {
                    hub.disconnect(&previous, session.conn_id()).await;
                }
            }
            session.set_identity(identity.clone());
            tracing::info!(identity = %identity, "authenticated via WebSocket");
            ServerMessage::AuthSuccess { identity }
        }
        Err(e) => ServerMessage::AuthError {
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, CredentialVerifier};
    use crate::hub::{Outbound, OUTBOUND_QUEUE_CAPACITY};
    use crate::types::Identity;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct SingleToken;

    #[async_trait]
    impl CredentialVerifier for SingleToken {
        async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
            match credential {
                "tok-u1" => Ok("u1".to_string()),
                "tok-gone" => Err(AuthError::PrincipalNotFound),
                _ => Err(AuthError::InvalidCredential),
            }
        }
    }

    fn setup() -> (Arc<Hub>, Session, mpsc::Receiver<Outbound>) {
        let hub = Arc::new(Hub::new(Arc::new(SingleToken)));
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        (hub, Session::new("c1".to_string(), tx), rx)
    }

    #[tokio::test]
    async fn test_subscribe_before_auth_is_rejected() {
        let (hub, mut session, _rx) = setup();

        let reply = handle_message(
            ClientMessage::SubscribeTopic {
                topics: vec!["BTC".to_string()],
            },
            &mut session,
            &hub,
        )
        .await;

        assert_eq!(
            reply,
            Some(ServerMessage::Error {
                message: "Not authenticated".to_string()
            })
        );
        // subscription state unchanged
        assert!(hub
            .subscribers_of(&Topic::Symbol("BTC".to_string()))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_before_auth_is_silent() {
        let (hub, mut session, _rx) = setup();

        let reply = handle_message(
            ClientMessage::UnsubscribeTopic {
                topics: vec!["BTC".to_string()],
            },
            &mut session,
            &hub,
        )
        .await;
        assert_eq!(reply, None);

        let reply =
            handle_message(ClientMessage::UnsubscribePortfolio {}, &mut session, &hub).await;
        assert_eq!(reply, None);
    }

    #[tokio::test]
    async fn test_auth_success_and_subscribe() {
        let (hub, mut session, _rx) = setup();

        let reply = handle_message(
            ClientMessage::Auth {
                credential: "tok-u1".to_string(),
            },
            &mut session,
            &hub,
        )
        .await;
        assert_eq!(
            reply,
            Some(ServerMessage::AuthSuccess {
                identity: "u1".to_string()
            })
        );
        assert_eq!(session.identity(), Some(&"u1".to_string()));

        let reply = handle_message(
            ClientMessage::SubscribeTopic {
                topics: vec!["BTC".to_string(), "ETH".to_string()],
            },
            &mut session,
            &hub,
        )
        .await;
        assert_eq!(
            reply,
            Some(ServerMessage::SubscribeTopicSuccess {
                topics: vec!["BTC".to_string(), "ETH".to_string()]
            })
        );
        assert!(hub
            .subscribers_of(&Topic::Symbol("ETH".to_string()))
            .await
            .contains("u1"));
    }

    #[tokio::test]
    async fn test_auth_failure_keeps_connection_unauthenticated() {
        let (hub, mut session, _rx) = setup();

        let reply = handle_message(
            ClientMessage::Auth {
                credential: "wrong".to_string(),
            },
            &mut session,
            &hub,
        )
        .await;
        assert_eq!(
            reply,
            Some(ServerMessage::AuthError {
                message: "Invalid credential".to_string()
            })
        );
        assert!(session.identity().is_none());

        let reply = handle_message(
            ClientMessage::Auth {
                credential: "tok-gone".to_string(),
            },
            &mut session,
            &hub,
        )
        .await;
        assert_eq!(
            reply,
            Some(ServerMessage::AuthError {
                message: "Account not found".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_auth_empty_credential() {
        let (hub, mut session, _rx) = setup();

        let reply = handle_message(
            ClientMessage::Auth {
                credential: String::new(),
            },
            &mut session,
            &hub,
        )
        .await;
        assert_eq!(
            reply,
            Some(ServerMessage::AuthError {
                message: "Credential required".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_ping_works_in_any_state() {
        let (hub, mut session, _rx) = setup();
        let before = Utc::now().timestamp_millis();

        let reply = handle_message(ClientMessage::Ping {}, &mut session, &hub).await;
        match reply {
            Some(ServerMessage::Pong { timestamp }) => assert!(timestamp >= before),
            other => panic!("expected Pong, got {:?}", other),
        }

        handle_message(
            ClientMessage::Auth {
                credential: "tok-u1".to_string(),
            },
            &mut session,
            &hub,
        )
        .await;
        let reply = handle_message(ClientMessage::Ping {}, &mut session, &hub).await;
        assert!(matches!(reply, Some(ServerMessage::Pong { .. })));
    }
}
