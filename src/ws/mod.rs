pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::auth::AuthError;
use crate::hub::{ConnectionHandle, Hub, Outbound, OUTBOUND_QUEUE_CAPACITY};
use crate::protocol::{ClientMessage, DecodeError, ServerMessage};
use crate::types::{ConnectionId, Identity};

/// Per-connection protocol state. A connection starts unauthenticated and
/// gains an identity once a credential has been resolved; everything else
/// about the connection lives in the hub's registries.
pub struct Session {
    conn_id: ConnectionId,
    outbound: mpsc::Sender<Outbound>,
    identity: Option<Identity>,
}

impl Session {
    pub fn new(conn_id: ConnectionId, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            conn_id,
            outbound,
            identity: None,
        }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    /// Handle the hub can use to deliver to this connection
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle::new(self.conn_id.clone(), self.outbound.clone())
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

type VerificationFuture = Pin<Box<dyn Future<Output = Result<Identity, AuthError>> + Send>>;

fn start_verification(
    hub: Arc<Hub>,
    credential: String,
    handle: ConnectionHandle,
) -> VerificationFuture {
    Box::pin(async move { hub.authenticate(&credential, handle).await })
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let conn_id = ulid::Ulid::new().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE_CAPACITY);

    // Writer task: drains the outbound queue so broadcast fan-out never
    // blocks on a slow socket.
    let writer = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match item {
                Outbound::Message(msg) => {
                    let Ok(json) = serde_json::to_string(&msg) else {
                        continue;
                    };
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Pong(data) => {
                    if ws_sender.send(Message::Pong(data.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let mut session = Session::new(conn_id.clone(), tx.clone());

    // Credential verification may hit an external lookup, so it runs as a
    // pending future instead of blocking the read loop: messages arriving
    // meanwhile are handled in the unauthenticated state. Further auth
    // attempts queue up behind the one in flight.
    let mut pending_verification: Option<VerificationFuture> = None;
    let mut verification_backlog: VecDeque<String> = VecDeque::new();

    loop {
        tokio::select! {
            result = async { pending_verification.as_mut().expect("guarded by select condition").await },
                if pending_verification.is_some() =>
            {
                pending_verification = None;
                let reply = handlers::finish_auth(result, &mut session, &hub).await;
                if tx.send(Outbound::Message(reply)).await.is_err() {
                    break;
                }
                if let Some(credential) = verification_backlog.pop_front() {
                    pending_verification =
                        Some(start_verification(hub.clone(), credential, session.handle()));
                }
            }

            frame = ws_receiver.next() => {
                let Some(frame) = frame else { break };
                match frame {
                    Ok(Message::Text(text)) => {
                        tracing::debug!(conn_id = %conn_id, "received message: {}", text);

                        let reply = match ClientMessage::decode(&text) {
                            Ok(ClientMessage::Auth { credential }) => {
                                if credential.is_empty() {
                                    Some(ServerMessage::AuthError {
                                        message: AuthError::MissingCredential.to_string(),
                                    })
                                } else if pending_verification.is_some() {
                                    verification_backlog.push_back(credential);
                                    None
                                } else {
                                    pending_verification = Some(start_verification(
                                        hub.clone(),
                                        credential,
                                        session.handle(),
                                    ));
                                    None
                                }
                            }
                            Ok(msg) => handlers::handle_message(msg, &mut session, &hub).await,
                            Err(DecodeError::UnknownType) => Some(ServerMessage::Error {
                                message: "Unknown message type".to_string(),
                            }),
                            Err(DecodeError::Malformed) => Some(ServerMessage::Error {
                                message: "Invalid message format".to_string(),
                            }),
                        };

                        if let Some(reply) = reply {
                            // Replies to the connection's own requests go through
                            // the same queue, with backpressure instead of dropping.
                            if tx.send(Outbound::Message(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        if tx.send(Outbound::Pong(data.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!(conn_id = %conn_id, "WebSocket closed");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    if let Some(identity) = session.identity().cloned() {
        hub.disconnect(&identity, &conn_id).await;
    }
    writer.abort();

    tracing::info!(conn_id = %conn_id, "connection handler finished");
}
